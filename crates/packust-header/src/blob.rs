//! On-disk blob codec: loading and unloading the
//! `[il][dl][entry info...][data]` layout, including sealed regions and
//! trailing dribble entries.

use byteorder::{BigEndian, ByteOrder};
use packust_common::{Error, ErrorKind, Result};

use crate::entry::{EntrySource, IndexEntry, TagData};
use crate::header::{Header, RegionInfo};
use crate::tags::{Tag, TagType};

/// Optional 8-byte magic prefix in front of a framed blob.
pub const HEADER_MAGIC: [u8; 8] = [0x8e, 0xad, 0xe8, 0x01, 0x00, 0x00, 0x00, 0x00];

/// Size of one on-disk entry info record.
pub const ENTRY_INFO_SIZE: usize = 16;

/// Hard limit on the number of index entries.
pub const MAX_TAGS: usize = 65535;
/// Hard limit on the data segment length.
pub const MAX_DATA: usize = 16 * 1024 * 1024;
/// Hard limit on the whole blob.
pub const MAX_BLOB: usize = 32 * 1024 * 1024;

fn bad(detail: &str) -> Error {
    Error::new(ErrorKind::BadHeader).with_detail(detail)
}

/// One decoded entry info record.
#[derive(Debug, Clone, Copy)]
struct RawInfo {
    tag: u32,
    ty: TagType,
    offset: usize,
    count: u32,
}

fn parse_info(raw: &[u8], dl: usize) -> Result<RawInfo> {
    let tag = BigEndian::read_u32(&raw[0..4]);
    let ty = TagType::from_code(BigEndian::read_u32(&raw[4..8]))
        .ok_or_else(|| bad("unknown tag type code"))?;
    let offset = BigEndian::read_i32(&raw[8..12]);
    let count = BigEndian::read_u32(&raw[12..16]);
    if offset < 0 {
        return Err(bad("negative data offset"));
    }
    #[allow(clippy::cast_sign_loss)]
    let offset = offset as usize;
    if offset > dl {
        return Err(bad("data offset out of range"));
    }
    if offset % ty.alignment() != 0 {
        return Err(bad("misaligned data offset"));
    }
    if count as usize > MAX_DATA {
        return Err(bad("element count out of range"));
    }
    Ok(RawInfo { tag, ty, offset, count })
}

fn read_nul_string(data: &[u8], start: usize) -> Result<(String, usize)> {
    let rest = data
        .get(start..)
        .ok_or_else(|| bad("string data out of range"))?;
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| bad("unterminated string data"))?;
    let s = std::str::from_utf8(&rest[..nul])
        .map_err(|_| bad("string data is not valid UTF-8"))?;
    Ok((s.to_owned(), start + nul + 1))
}

/// Extracts one entry's data; returns the value and the end offset of the
/// bytes it occupied.
fn extract(info: RawInfo, data: &[u8]) -> Result<(TagData, usize)> {
    let count = info.count as usize;
    let start = info.offset;
    let fixed = |size: usize| -> Result<&[u8]> {
        let len = count
            .checked_mul(size)
            .ok_or_else(|| bad("element count overflow"))?;
        data.get(start..start + len)
            .ok_or_else(|| bad("entry data out of range"))
    };
    let value = match info.ty {
        TagType::Null => return Err(bad("null-typed entry carries no data")),
        TagType::Char => TagData::Char(fixed(1)?.to_vec()),
        TagType::Int8 => TagData::Int8(fixed(1)?.to_vec()),
        TagType::Int16 => {
            let raw = fixed(2)?;
            TagData::Int16(raw.chunks_exact(2).map(BigEndian::read_u16).collect())
        }
        TagType::Int32 => {
            let raw = fixed(4)?;
            TagData::Int32(raw.chunks_exact(4).map(BigEndian::read_u32).collect())
        }
        TagType::Int64 => {
            let raw = fixed(8)?;
            TagData::Int64(raw.chunks_exact(8).map(BigEndian::read_u64).collect())
        }
        TagType::Bin => TagData::Bin(fixed(1)?.to_vec()),
        TagType::String => {
            if count != 1 {
                return Err(bad("string entry with count != 1"));
            }
            let (s, end) = read_nul_string(data, start)?;
            return Ok((TagData::String(s), end));
        }
        TagType::StringArray | TagType::I18nString => {
            let mut strings = Vec::with_capacity(count.min(4096));
            let mut pos = start;
            for _ in 0..count {
                let (s, next) = read_nul_string(data, pos)?;
                strings.push(s);
                pos = next;
            }
            let value = if info.ty == TagType::StringArray {
                TagData::StringArray(strings)
            } else {
                TagData::I18nString(strings)
            };
            return Ok((value, pos));
        }
    };
    let end = start + value.disk_len();
    Ok((value, end))
}

/// Parses a blob into a header.
///
/// # Errors
///
/// Returns `BadHeader` when any sanity limit (tag count, data length,
/// alignment, offset range, entry ordering) is violated.
pub fn load(blob: &[u8]) -> Result<Header> {
    if blob.len() < 8 {
        return Err(bad("blob shorter than intro"));
    }
    let il = BigEndian::read_u32(&blob[0..4]) as usize;
    let dl = BigEndian::read_u32(&blob[4..8]) as usize;
    if il > MAX_TAGS {
        return Err(bad("too many index entries"));
    }
    if dl > MAX_DATA {
        return Err(bad("data segment too large"));
    }
    let total = 8 + il * ENTRY_INFO_SIZE + dl;
    if total > MAX_BLOB {
        return Err(bad("blob exceeds the hard size limit"));
    }
    if blob.len() < total {
        return Err(bad("blob shorter than its declared length"));
    }
    if il == 0 {
        if dl != 0 {
            return Err(bad("empty index with non-empty data"));
        }
        return Ok(Header::empty());
    }

    let info_bytes = &blob[8..8 + il * ENTRY_INFO_SIZE];
    let data = &blob[8 + il * ENTRY_INFO_SIZE..total];
    let infos = info_bytes
        .chunks_exact(ENTRY_INFO_SIZE)
        .map(|raw| parse_info(raw, dl))
        .collect::<Result<Vec<_>>>()?;

    let first = infos[0];
    let (region, member_infos, dribble_infos) = if first.tag >= Tag::I18NTABLE.0 {
        // No region self-tag: a legacy blob where every entry belongs to
        // an implicit image region.
        let region = RegionInfo { tag: Tag::IMAGE, legacy: true };
        (region, &infos[..], &[][..])
    } else {
        if first.ty != TagType::Bin || first.count as usize != ENTRY_INFO_SIZE {
            return Err(bad("malformed region self-tag"));
        }
        let (tag, ril) = if first.offset == 0 {
            (Tag::IMAGE, il)
        } else {
            let trailer = data
                .get(first.offset..first.offset + ENTRY_INFO_SIZE)
                .ok_or_else(|| bad("region trailer out of range"))?;
            let neg = BigEndian::read_i32(&trailer[8..12]);
            if neg >= 0 || neg.unsigned_abs() % (ENTRY_INFO_SIZE as u32) != 0 {
                return Err(bad("malformed region trailer offset"));
            }
            let ril = neg.unsigned_abs() as usize / ENTRY_INFO_SIZE;
            (Tag(first.tag), ril)
        };
        if ril < 1 || ril > il {
            return Err(bad("region index length out of range"));
        }
        let region = RegionInfo { tag, legacy: false };
        (region, &infos[1..ril], &infos[ril..])
    };

    let mut entries: Vec<IndexEntry> = Vec::with_capacity(il);
    let mut walk_end = 0usize;
    let mut prev_offset = 0usize;
    for (rank, info) in member_infos.iter().enumerate() {
        if info.offset < prev_offset {
            return Err(bad("region entries out of disk order"));
        }
        prev_offset = info.offset;
        let (value, end) = extract(*info, data)?;
        walk_end = walk_end.max(end);
        entries.push(IndexEntry {
            tag: Tag(info.tag),
            data: value,
            source: EntrySource::Region {
                rank: u32::try_from(rank).unwrap_or(u32::MAX),
            },
        });
    }

    if !region.legacy {
        // Blobs written before the 8/98 builder fix carry i18n entries
        // whose offsets and lengths disagree about the region's extent;
        // honor the larger of the trailer-derived and walk-derived sizes
        // instead of rejecting the blob.
        let trailer_end = if first.offset == 0 {
            0
        } else {
            first.offset + ENTRY_INFO_SIZE
        };
        let region_end = walk_end.max(trailer_end);
        if region_end > dl {
            return Err(bad("region data extends past the data segment"));
        }
    }

    prev_offset = 0;
    for info in dribble_infos {
        if info.offset < prev_offset {
            return Err(bad("dribble entries out of disk order"));
        }
        prev_offset = info.offset;
        let (value, _) = extract(*info, data)?;
        let tag = Tag(info.tag);
        // A dribble supersedes any same-tagged entry loaded from the
        // region; a basenames dribble also retires the legacy file list.
        entries.retain(|e| e.tag != tag);
        if tag == Tag::BASENAMES {
            entries.retain(|e| e.tag != Tag::OLDFILENAMES);
        }
        entries.push(IndexEntry {
            tag,
            data: value,
            source: EntrySource::Dribble,
        });
    }

    tracing::debug!(
        entries = entries.len(),
        region = %region.tag,
        legacy = region.legacy,
        "loaded header blob"
    );
    Ok(Header::from_parts(entries, Some(region)))
}

/// Serialization order and size summary of a header.
pub(crate) struct Layout<'h> {
    /// Region members in original disk order.
    pub region: Vec<&'h IndexEntry>,
    /// Dribbles in tag order.
    pub dribbles: Vec<&'h IndexEntry>,
    /// Region tag emitted with the self-entry, if any.
    pub region_tag: Option<Tag>,
    /// Index entry count, self-entry included.
    pub il: usize,
    /// Data segment length.
    pub dl: usize,
}

fn align_up(pos: usize, alignment: usize) -> usize {
    pos.next_multiple_of(alignment)
}

pub(crate) fn layout(h: &Header) -> Layout<'_> {
    let mut region: Vec<&IndexEntry> = h
        .entries()
        .iter()
        .filter(|e| e.source.in_region())
        .collect();
    region.sort_by_key(|e| match e.source {
        EntrySource::Region { rank } => rank,
        EntrySource::Dribble => u32::MAX,
    });
    let mut dribbles: Vec<&IndexEntry> = h
        .entries()
        .iter()
        .filter(|e| !e.source.in_region())
        .collect();
    dribbles.sort_by_key(|e| e.tag);

    let region_tag = if region.is_empty() {
        None
    } else {
        Some(h.region_info().map_or(Tag::IMAGE, |r| r.tag))
    };

    let mut dl = 0usize;
    for e in &region {
        dl = align_up(dl, e.data.ty().alignment());
        dl += e.data.disk_len();
    }
    if region_tag.is_some() {
        dl += ENTRY_INFO_SIZE;
    }
    for e in &dribbles {
        dl = align_up(dl, e.data.ty().alignment());
        dl += e.data.disk_len();
    }
    let il = region.len() + dribbles.len() + usize::from(region_tag.is_some());
    Layout { region, dribbles, region_tag, il, dl }
}

fn push_info(buf: &mut Vec<u8>, tag: Tag, ty: TagType, offset: usize, count: u32) {
    let mut raw = [0u8; ENTRY_INFO_SIZE];
    BigEndian::write_u32(&mut raw[0..4], tag.0);
    BigEndian::write_u32(&mut raw[4..8], ty as u32);
    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    BigEndian::write_i32(&mut raw[8..12], offset as i32);
    BigEndian::write_u32(&mut raw[12..16], count);
    buf.extend_from_slice(&raw);
}

fn push_data(buf: &mut Vec<u8>, data: &TagData) {
    match data {
        TagData::Char(v) | TagData::Int8(v) | TagData::Bin(v) => buf.extend_from_slice(v),
        TagData::Int16(v) => {
            for x in v {
                buf.extend_from_slice(&x.to_be_bytes());
            }
        }
        TagData::Int32(v) => {
            for x in v {
                buf.extend_from_slice(&x.to_be_bytes());
            }
        }
        TagData::Int64(v) => {
            for x in v {
                buf.extend_from_slice(&x.to_be_bytes());
            }
        }
        TagData::String(s) => {
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
        }
        TagData::StringArray(v) | TagData::I18nString(v) => {
            for s in v {
                buf.extend_from_slice(s.as_bytes());
                buf.push(0);
            }
        }
    }
}

/// Serializes a header to its blob form.
///
/// Region members are emitted first in their original disk order, then
/// the region self-trailer, then dribbles in tag order. The emitted blob
/// reloads into a structurally equal header.
///
/// # Errors
///
/// Returns `Internal` when the result would exceed a hard size limit or
/// when the writer fails to land exactly on the computed layout.
pub fn unload(h: &Header) -> Result<Vec<u8>> {
    let plan = layout(h);
    if plan.il > MAX_TAGS || plan.dl > MAX_DATA {
        return Err(Error::new(ErrorKind::Internal)
            .with_detail("serialized header exceeds a hard size limit"));
    }
    let total = 8 + plan.il * ENTRY_INFO_SIZE + plan.dl;
    let mut buf = Vec::with_capacity(total);
    #[allow(clippy::cast_possible_truncation)]
    {
        buf.extend_from_slice(&(plan.il as u32).to_be_bytes());
        buf.extend_from_slice(&(plan.dl as u32).to_be_bytes());
    }

    // Index: self-entry, region members, dribbles. Offsets replay the
    // same walk the layout pass performed.
    let mut pos = 0usize;
    let mut region_offsets = Vec::with_capacity(plan.region.len());
    for e in &plan.region {
        pos = align_up(pos, e.data.ty().alignment());
        region_offsets.push(pos);
        pos += e.data.disk_len();
    }
    let trailer_offset = pos;
    if plan.region_tag.is_some() {
        pos += ENTRY_INFO_SIZE;
    }
    let mut dribble_offsets = Vec::with_capacity(plan.dribbles.len());
    for e in &plan.dribbles {
        pos = align_up(pos, e.data.ty().alignment());
        dribble_offsets.push(pos);
        pos += e.data.disk_len();
    }
    debug_assert_eq!(pos, plan.dl);

    if let Some(region_tag) = plan.region_tag {
        #[allow(clippy::cast_possible_truncation)]
        push_info(&mut buf, region_tag, TagType::Bin, trailer_offset, ENTRY_INFO_SIZE as u32);
    }
    for (e, off) in plan.region.iter().zip(&region_offsets) {
        push_info(&mut buf, e.tag, e.data.ty(), *off, e.data.count());
    }
    for (e, off) in plan.dribbles.iter().zip(&dribble_offsets) {
        push_info(&mut buf, e.tag, e.data.ty(), *off, e.data.count());
    }

    // Data segment.
    let data_start = buf.len();
    for (e, off) in plan.region.iter().zip(&region_offsets) {
        buf.resize(data_start + off, 0);
        push_data(&mut buf, &e.data);
    }
    if let Some(region_tag) = plan.region_tag {
        let mut trailer = [0u8; ENTRY_INFO_SIZE];
        BigEndian::write_u32(&mut trailer[0..4], region_tag.0);
        BigEndian::write_u32(&mut trailer[4..8], TagType::Bin as u32);
        let index_bytes = (plan.region.len() + 1) * ENTRY_INFO_SIZE;
        #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
        BigEndian::write_i32(&mut trailer[8..12], -(index_bytes as i64) as i32);
        #[allow(clippy::cast_possible_truncation)]
        BigEndian::write_u32(&mut trailer[12..16], ENTRY_INFO_SIZE as u32);
        buf.extend_from_slice(&trailer);
    }
    for (e, off) in plan.dribbles.iter().zip(&dribble_offsets) {
        buf.resize(data_start + off, 0);
        push_data(&mut buf, &e.data);
    }

    if buf.len() != total {
        return Err(Error::new(ErrorKind::Internal)
            .with_detail("serialized header does not match its computed layout"));
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        let mut h = Header::new();
        h.add(Tag::NAME, TagData::String("foo".into())).expect("add");
        h.add(Tag::VERSION, TagData::String("1".into())).expect("add");
        h.add(Tag::EPOCH, TagData::Int32(vec![7])).expect("add");
        h.add(Tag::FILEMODES, TagData::Int16(vec![0o644, 0o755])).expect("add");
        h
    }

    #[test]
    fn load_rejects_short_blobs() {
        assert_eq!(
            load(&[0u8; 4]).expect_err("short").kind(),
            ErrorKind::BadHeader
        );
    }

    #[test]
    fn load_rejects_oversized_index() {
        let mut blob = vec![0u8; 8];
        BigEndian::write_u32(&mut blob[0..4], 70_000);
        assert_eq!(load(&blob).expect_err("il").kind(), ErrorKind::BadHeader);
    }

    #[test]
    fn load_rejects_oversized_data() {
        let mut blob = vec![0u8; 8];
        BigEndian::write_u32(&mut blob[4..8], 17 * 1024 * 1024);
        assert_eq!(load(&blob).expect_err("dl").kind(), ErrorKind::BadHeader);
    }

    #[test]
    fn empty_header_round_trips_as_eight_bytes() {
        let h = Header::new();
        let blob = unload(&h).expect("unload");
        assert_eq!(blob, vec![0u8; 8]);
        let back = load(&blob).expect("load");
        assert_eq!(back.len(), 0);
    }

    #[test]
    fn alignment_padding_is_zeroed() {
        let mut h = Header::new();
        h.add(Tag::NAME, TagData::String("x".into())).expect("add");
        h.add(Tag::EPOCH, TagData::Int32(vec![1])).expect("add");
        let blob = unload(&h).expect("unload");
        // NAME ("x\0") lands first in tag order, then 2 bytes of zero fill
        // so the int32 starts 4-aligned.
        let data = &blob[8 + 2 * ENTRY_INFO_SIZE..];
        assert_eq!(&data[0..2], b"x\0");
        assert_eq!(&data[2..4], &[0, 0]);
        assert_eq!(BigEndian::read_u32(&data[4..8]), 1);
    }

    #[test]
    fn unaligned_offset_is_rejected() {
        let mut h = Header::new();
        h.add(Tag::EPOCH, TagData::Int32(vec![1])).expect("add");
        let mut blob = unload(&h).expect("unload");
        // Nudge the int32 offset to an odd value.
        BigEndian::write_i32(&mut blob[8 + 8..8 + 12], 1);
        assert_eq!(load(&blob).expect_err("align").kind(), ErrorKind::BadHeader);
    }

    #[test]
    fn offset_past_data_segment_is_rejected() {
        let mut h = Header::new();
        h.add(Tag::NAME, TagData::String("foo".into())).expect("add");
        let mut blob = unload(&h).expect("unload");
        BigEndian::write_i32(&mut blob[8 + 8..8 + 12], 1024);
        assert_eq!(load(&blob).expect_err("range").kind(), ErrorKind::BadHeader);
    }

    #[test]
    fn plain_blob_loads_as_legacy_region() {
        let h = sample();
        let back = load(&unload(&h).expect("unload")).expect("load");
        let region = back.region_info().expect("region");
        assert_eq!(region.tag, Tag::IMAGE);
        assert!(region.legacy);
    }

    #[test]
    fn round_trip_preserves_tag_tuples() {
        let h = sample();
        let back = load(&unload(&h).expect("unload")).expect("load");
        for entry in h.entries() {
            let other = back.get_raw(entry.tag).expect("tag survives");
            assert_eq!(other.data, entry.data, "tag {}", entry.tag);
        }
        assert_eq!(h.len(), back.len());
    }

    #[test]
    fn sealed_round_trip_preserves_region_tag() {
        let h = sample().reload(Tag::IMMUTABLE).expect("reload");
        assert_eq!(h.region_info().map(|r| r.tag), Some(Tag::IMMUTABLE));
        let blob = unload(&h).expect("unload");
        let back = load(&blob).expect("load");
        assert_eq!(back.region_info().map(|r| r.tag), Some(Tag::IMMUTABLE));
        assert_eq!(back.len(), h.len());
    }

    #[test]
    fn dribble_overrides_region_entry_on_load() {
        // Seal a header, then append a same-tagged dribble and reload.
        let mut h = sample().reload(Tag::IMMUTABLE).expect("reload");
        h.modify(Tag::NAME, TagData::String("bar".into())).expect("modify");
        let back = load(&unload(&h).expect("unload")).expect("load");
        assert_eq!(
            back.get_raw(Tag::NAME).map(|e| &e.data),
            Some(&TagData::String("bar".into()))
        );
        // Only one NAME entry survives the override.
        let names = back.entries().iter().filter(|e| e.tag == Tag::NAME).count();
        assert_eq!(names, 1);
    }

    #[test]
    fn second_unload_of_reloaded_blob_is_accepted() {
        let h = sample();
        let blob = unload(&h).expect("unload");
        let again = unload(&load(&blob).expect("load")).expect("unload 2");
        let back = load(&again).expect("load 2");
        assert_eq!(back.len(), h.len());
    }
}
