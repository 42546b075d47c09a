//! The in-memory tag container and its operations.

use std::io::{Read, Write};

use packust_common::{Error, ErrorKind, Result};

use crate::blob::{self, ENTRY_INFO_SIZE, HEADER_MAGIC, MAX_DATA, MAX_TAGS};
use crate::entry::{EntrySource, IndexEntry, TagData};
use crate::i18n;
use crate::tags::{Tag, TagType};

/// Whether framed header I/O carries the 8-byte magic prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    /// No magic prefix; the frame starts at the index length word.
    None,
    /// The frame starts with the 8-byte header magic.
    Prefixed,
}

/// The sealed region a loaded header carries, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionInfo {
    /// Region tag stamped on the self-entry.
    pub tag: Tag,
    /// Whether the blob predated region self-tags.
    pub legacy: bool,
}

/// An ordered collection of tagged values with bit-exact serialization.
///
/// Mutation requires `&mut Header`; iterators and the format evaluator
/// borrow the header, so exclusive mutation falls out of the borrow
/// rules rather than a reference count.
#[derive(Debug, Clone, Default)]
pub struct Header {
    entries: Vec<IndexEntry>,
    region: Option<RegionInfo>,
    sorted: bool,
}

impl Header {
    /// Creates an empty header.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            region: None,
            sorted: true,
        }
    }

    pub(crate) const fn empty() -> Self {
        Self::new()
    }

    pub(crate) fn from_parts(entries: Vec<IndexEntry>, region: Option<RegionInfo>) -> Self {
        let mut h = Self {
            entries,
            region,
            sorted: false,
        };
        h.sort();
        h
    }

    /// Parses a blob into a header.
    ///
    /// # Errors
    ///
    /// Returns `BadHeader` when any structural sanity limit is violated.
    pub fn load(blob: &[u8]) -> Result<Self> {
        blob::load(blob)
    }

    /// Parses a blob into a header that owns a copy of all data.
    ///
    /// Headers always own their data in this implementation, so this is
    /// the same operation as [`Header::load`].
    ///
    /// # Errors
    ///
    /// Returns `BadHeader` when any structural sanity limit is violated.
    pub fn copy_load(blob: &[u8]) -> Result<Self> {
        blob::load(blob)
    }

    /// Serializes the header to its blob form.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when a serialization invariant is violated.
    pub fn unload(&self) -> Result<Vec<u8>> {
        blob::unload(self)
    }

    /// Unloads and reloads the header, sealing it under `region_tag`.
    ///
    /// # Errors
    ///
    /// Propagates serialization and parse failures.
    pub fn reload(self, region_tag: Tag) -> Result<Self> {
        let blob = self.unload()?;
        let mut fresh = Self::load(&blob)?;
        if region_tag == Tag::SIGNATURES || region_tag == Tag::IMMUTABLE {
            if let Some(region) = fresh.region.as_mut() {
                region.tag = region_tag;
            }
        }
        Ok(fresh)
    }

    /// Reads a framed header from a stream.
    ///
    /// # Errors
    ///
    /// Returns `BadMagic` on a magic mismatch, `ReadFailed` on short
    /// reads, and `BadHeader` on structural failures.
    pub fn read<R: Read>(reader: &mut R, magic: Magic) -> Result<Self> {
        fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
            reader
                .read_exact(buf)
                .map_err(|e| Error::new(ErrorKind::ReadFailed).with_source(e))
        }

        if magic == Magic::Prefixed {
            let mut prefix = [0u8; 8];
            read_exact(reader, &mut prefix)?;
            if prefix != HEADER_MAGIC {
                return Err(Error::new(ErrorKind::BadMagic));
            }
        }
        let mut intro = [0u8; 8];
        read_exact(reader, &mut intro)?;
        let il = u32::from_be_bytes([intro[0], intro[1], intro[2], intro[3]]) as usize;
        let dl = u32::from_be_bytes([intro[4], intro[5], intro[6], intro[7]]) as usize;
        if il > MAX_TAGS || dl > MAX_DATA {
            return Err(Error::new(ErrorKind::BadHeader)
                .with_detail("framed header intro exceeds a hard limit"));
        }
        let mut blob = vec![0u8; 8 + il * ENTRY_INFO_SIZE + dl];
        blob[..8].copy_from_slice(&intro);
        read_exact(reader, &mut blob[8..])?;
        Self::load(&blob)
    }

    /// Writes the framed header to a stream, returning the byte count.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures and maps I/O failures to
    /// `WriteFailed`.
    pub fn write<W: Write>(&self, writer: &mut W, magic: Magic) -> Result<usize> {
        let blob = self.unload()?;
        let mut written = 0usize;
        if magic == Magic::Prefixed {
            writer
                .write_all(&HEADER_MAGIC)
                .map_err(|e| Error::new(ErrorKind::WriteFailed).with_source(e))?;
            written += HEADER_MAGIC.len();
        }
        writer
            .write_all(&blob)
            .map_err(|e| Error::new(ErrorKind::WriteFailed).with_source(e))?;
        written += blob.len();
        Ok(written)
    }

    /// Number of bytes [`Header::write`] would emit.
    #[must_use]
    pub fn size_of(&self, magic: Magic) -> usize {
        let plan = blob::layout(self);
        let prefix = if magic == Magic::Prefixed { HEADER_MAGIC.len() } else { 0 };
        prefix + 8 + plan.il * ENTRY_INFO_SIZE + plan.dl
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the header holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The sealed region this header was loaded with, if any.
    #[must_use]
    pub const fn region_info(&self) -> Option<RegionInfo> {
        self.region
    }

    /// All entries, in the current internal order.
    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    fn sort(&mut self) {
        if self.sorted {
            return;
        }
        // Ties between a region member and a dribble keep the region
        // member first.
        self.entries
            .sort_by_key(|e| (e.tag, !e.source.in_region()));
        self.sorted = true;
    }

    fn find(&self, tag: Tag) -> Option<&IndexEntry> {
        if self.sorted {
            let idx = self.entries.partition_point(|e| e.tag < tag);
            self.entries.get(idx).filter(|e| e.tag == tag)
        } else {
            self.entries.iter().find(|e| e.tag == tag)
        }
    }

    pub(crate) fn entry_mut(&mut self, tag: Tag) -> Option<&mut IndexEntry> {
        self.find_mut(tag)
    }

    fn find_mut(&mut self, tag: Tag) -> Option<&mut IndexEntry> {
        self.sort();
        let idx = self.entries.partition_point(|e| e.tag < tag);
        self.entries.get_mut(idx).filter(|e| e.tag == tag)
    }

    /// Appends a new entry.
    ///
    /// # Errors
    ///
    /// Rejects data with no elements or interior NULs.
    pub fn add(&mut self, tag: Tag, data: TagData) -> Result<()> {
        data.check()?;
        self.entries.push(IndexEntry::new(tag, data));
        self.sorted = false;
        Ok(())
    }

    /// Extends an existing non-scalar entry with further elements.
    ///
    /// # Errors
    ///
    /// Fails for `String`/`I18nString` entries, on a type mismatch, and
    /// when the tag is not present.
    pub fn append(&mut self, tag: Tag, data: TagData) -> Result<()> {
        data.check()?;
        let entry = self.find_mut(tag).ok_or_else(|| {
            Error::new(ErrorKind::Internal).with_detail("append to a tag that is not present")
        })?;
        if matches!(entry.data.ty(), TagType::String | TagType::I18nString) {
            return Err(Error::new(ErrorKind::Internal)
                .with_detail("cannot append to a scalar string tag"));
        }
        if entry.data.ty() != data.ty() {
            return Err(Error::new(ErrorKind::Internal)
                .with_detail("append with a mismatched tag type"));
        }
        match (&mut entry.data, data) {
            (TagData::Char(dst), TagData::Char(src))
            | (TagData::Int8(dst), TagData::Int8(src))
            | (TagData::Bin(dst), TagData::Bin(src)) => dst.extend(src),
            (TagData::Int16(dst), TagData::Int16(src)) => dst.extend(src),
            (TagData::Int32(dst), TagData::Int32(src)) => dst.extend(src),
            (TagData::Int64(dst), TagData::Int64(src)) => dst.extend(src),
            (TagData::StringArray(dst), TagData::StringArray(src)) => dst.extend(src),
            _ => unreachable!("type equality checked above"),
        }
        // A modified entry leaves the sealed region.
        entry.source = EntrySource::Dribble;
        Ok(())
    }

    /// Appends to an existing entry, or adds one if the tag is new.
    ///
    /// # Errors
    ///
    /// Propagates the [`Header::add`]/[`Header::append`] failures.
    pub fn add_or_append(&mut self, tag: Tag, data: TagData) -> Result<()> {
        if self.is_entry(tag) {
            self.append(tag, data)
        } else {
            self.add(tag, data)
        }
    }

    /// Adds a translated string under `tag` for locale `lang`,
    /// maintaining the locale table as needed.
    ///
    /// # Errors
    ///
    /// Propagates insertion failures.
    pub fn add_i18n_string(&mut self, tag: Tag, string: &str, lang: Option<&str>) -> Result<()> {
        i18n::add_i18n_string(self, tag, string, lang)
    }

    /// Replaces the payload of the first entry carrying `tag`.
    ///
    /// # Errors
    ///
    /// Fails when the tag is not present or the data is unsound.
    pub fn modify(&mut self, tag: Tag, data: TagData) -> Result<()> {
        data.check()?;
        let entry = self.find_mut(tag).ok_or_else(|| {
            Error::new(ErrorKind::Internal).with_detail("modify of a tag that is not present")
        })?;
        entry.data = data;
        entry.source = EntrySource::Dribble;
        Ok(())
    }

    /// Removes every entry carrying `tag`. Returns whether any existed.
    pub fn remove(&mut self, tag: Tag) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.tag != tag);
        before != self.entries.len()
    }

    /// Membership test.
    #[must_use]
    pub fn is_entry(&self, tag: Tag) -> bool {
        self.find(tag).is_some()
    }

    /// Canonical getter: returns the entry's value, resolving i18n
    /// string entries to the best-matching locale as a plain string.
    #[must_use]
    pub fn get(&self, tag: Tag) -> Option<TagData> {
        let entry = self.find(tag)?;
        match &entry.data {
            TagData::I18nString(_) => {
                Some(TagData::String(i18n::resolve(self, entry).to_owned()))
            }
            other => Some(other.clone()),
        }
    }

    /// Returns the entry verbatim, without i18n translation.
    #[must_use]
    pub fn get_raw(&self, tag: Tag) -> Option<&IndexEntry> {
        self.find(tag)
    }

    /// The string value of a `String` or i18n entry.
    #[must_use]
    pub fn get_str(&self, tag: Tag) -> Option<&str> {
        let entry = self.find(tag)?;
        match &entry.data {
            TagData::String(s) => Some(s),
            TagData::I18nString(_) => Some(i18n::resolve(self, entry)),
            _ => None,
        }
    }

    /// The string slice of a `StringArray` entry.
    #[must_use]
    pub fn get_string_array(&self, tag: Tag) -> Option<&[String]> {
        self.find(tag).and_then(|e| e.data.as_str_array())
    }

    /// The 32-bit elements of an `Int32` entry.
    #[must_use]
    pub fn get_u32_array(&self, tag: Tag) -> Option<&[u32]> {
        self.find(tag).and_then(|e| e.data.as_u32_array())
    }

    /// The 16-bit elements of an `Int16` entry.
    #[must_use]
    pub fn get_u16_array(&self, tag: Tag) -> Option<&[u16]> {
        self.find(tag).and_then(|e| e.data.as_u16_array())
    }

    /// The bytes of a `Char`, `Int8`, or `Bin` entry.
    #[must_use]
    pub fn get_bytes(&self, tag: Tag) -> Option<&[u8]> {
        self.find(tag).and_then(|e| e.data.as_bytes())
    }

    /// The first element of an `Int32` entry.
    #[must_use]
    pub fn get_u32(&self, tag: Tag) -> Option<u32> {
        self.find(tag).and_then(|e| e.data.as_u32())
    }

    /// Iterates user-visible entries in tag order, each tag once.
    #[must_use]
    pub fn iter(&self) -> HeaderIter<'_> {
        let mut items: Vec<&IndexEntry> = self.entries.iter().collect();
        items.sort_by_key(|e| (e.tag, !e.source.in_region()));
        items.dedup_by_key(|e| e.tag);
        HeaderIter { items, pos: 0 }
    }

    /// Copies the listed tags from `src`, skipping tags already present.
    ///
    /// # Errors
    ///
    /// Propagates insertion failures.
    pub fn copy_tags_from(&mut self, src: &Self, tags: &[Tag]) -> Result<()> {
        for &tag in tags {
            if self.is_entry(tag) {
                continue;
            }
            if let Some(entry) = src.find(tag) {
                self.add(tag, entry.data.clone())?;
            }
        }
        Ok(())
    }
}

impl<'h> IntoIterator for &'h Header {
    type Item = &'h IndexEntry;
    type IntoIter = HeaderIter<'h>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a header's user-visible entries.
#[derive(Debug)]
pub struct HeaderIter<'h> {
    items: Vec<&'h IndexEntry>,
    pos: usize,
}

impl<'h> Iterator for HeaderIter<'h> {
    type Item = &'h IndexEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.items.get(self.pos)?;
        self.pos += 1;
        Some(item)
    }
}
