//! The "new ASCII" CPIO entry codec.
//!
//! An entry is a fixed 110-byte header — a 6-byte magic and thirteen
//! 8-digit lower-case hex fields — followed by the NUL-terminated name,
//! zero fill to 4-byte alignment, the payload data, and zero fill again.
//! A payload ends with the sentinel entry named `TRAILER!!!`. The CRC
//! variant's checksum field is carried but never validated.

use std::io::{Read, Write};

use packust_common::{Error, ErrorKind, Result};

use crate::stream::{ALIGNMENT, PayloadReader, PayloadWriter};

/// Magic of the new-ASCII format.
pub const MAGIC_NEWC: &[u8; 6] = b"070701";
/// Magic of the new-ASCII format with checksums.
pub const MAGIC_CRC: &[u8; 6] = b"070702";
/// Name of the sentinel entry ending a payload.
pub const TRAILER: &str = "TRAILER!!!";

/// Size of the fixed entry header.
pub const HEADER_SIZE: usize = 110;

/// Stat-like description of one archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStat {
    /// Inode number.
    pub ino: u64,
    /// File mode and type bits.
    pub mode: u32,
    /// Owner id.
    pub uid: u32,
    /// Group id.
    pub gid: u32,
    /// Hard link count.
    pub nlink: u32,
    /// Modification time, seconds since the epoch.
    pub mtime: u32,
    /// Payload size in bytes.
    pub size: u64,
    /// Device holding the file.
    pub dev: u64,
    /// Device number of character/block special files.
    pub rdev: u64,
}

impl FileStat {
    /// Whether the mode describes a regular file.
    #[must_use]
    pub const fn is_reg(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFREG
    }

    /// Whether the mode describes a directory.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }

    /// Whether the mode describes a symbolic link.
    #[must_use]
    pub const fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFLNK
    }

    /// Whether the mode describes a FIFO.
    #[must_use]
    pub const fn is_fifo(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFIFO
    }

    /// Whether the mode describes a socket.
    #[must_use]
    pub const fn is_sock(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFSOCK
    }

    /// Whether the mode describes a character or block device.
    #[must_use]
    pub const fn is_dev(&self) -> bool {
        matches!(self.mode & libc::S_IFMT, libc::S_IFCHR | libc::S_IFBLK)
    }

    /// Permission bits of the mode.
    #[must_use]
    pub const fn perms(&self) -> u32 {
        self.mode & 0o7777
    }
}

fn parse_hex(field: &[u8]) -> Result<u32> {
    let text = std::str::from_utf8(field)
        .map_err(|_| Error::new(ErrorKind::BadHeader).with_detail("non-ASCII header field"))?;
    u32::from_str_radix(text, 16)
        .map_err(|_| Error::new(ErrorKind::BadHeader).with_detail("non-hex header field"))
}

/// Reads one entry header, returning the stat description and the entry
/// name with the trailing NUL stripped.
///
/// # Errors
///
/// `BadMagic` for an unrecognized magic, `BadHeader` for malformed hex
/// fields or names, `ReadFailed` for stream shortfalls.
pub fn read_header<R: Read>(reader: &mut PayloadReader<R>) -> Result<(FileStat, String)> {
    let mut raw = [0u8; HEADER_SIZE];
    reader.read_exact(&mut raw)?;

    let magic = &raw[0..6];
    if magic != MAGIC_NEWC && magic != MAGIC_CRC {
        return Err(Error::new(ErrorKind::BadMagic));
    }

    let field = |index: usize| &raw[6 + index * 8..6 + (index + 1) * 8];
    let ino = parse_hex(field(0))?;
    let mode = parse_hex(field(1))?;
    let uid = parse_hex(field(2))?;
    let gid = parse_hex(field(3))?;
    let nlink = parse_hex(field(4))?;
    let mtime = parse_hex(field(5))?;
    let size = parse_hex(field(6))?;
    let dev_major = parse_hex(field(7))?;
    let dev_minor = parse_hex(field(8))?;
    let rdev_major = parse_hex(field(9))?;
    let rdev_minor = parse_hex(field(10))?;
    let name_size = parse_hex(field(11))?;
    // field(12) is the checksum; carried by the CRC variant but never
    // validated.
    let _checksum = parse_hex(field(12))?;

    if name_size == 0 {
        return Err(Error::new(ErrorKind::BadHeader).with_detail("empty entry name"));
    }
    let mut name_buf = vec![0u8; name_size as usize];
    reader.read_exact(&mut name_buf)?;
    if name_buf.pop() != Some(0) {
        return Err(Error::new(ErrorKind::BadHeader).with_detail("entry name is not terminated"));
    }
    let name = String::from_utf8(name_buf)
        .map_err(|_| Error::new(ErrorKind::BadHeader).with_detail("entry name is not UTF-8"))?;
    reader.align(ALIGNMENT)?;

    let st = FileStat {
        ino: u64::from(ino),
        mode,
        uid,
        gid,
        nlink,
        mtime,
        size: u64::from(size),
        dev: nix::sys::stat::makedev(u64::from(dev_major), u64::from(dev_minor)),
        rdev: nix::sys::stat::makedev(u64::from(rdev_major), u64::from(rdev_minor)),
    };
    Ok((st, name))
}

fn push_hex(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(format!("{value:08x}").as_bytes());
}

/// Writes one entry header followed by the name and alignment fill.
///
/// # Errors
///
/// Returns `WriteFailed` on stream failures.
pub fn write_header<W: Write>(
    writer: &mut PayloadWriter<W>,
    st: &FileStat,
    name: &str,
) -> Result<()> {
    #[allow(clippy::cast_possible_truncation)]
    let (dev_major, dev_minor) = (
        nix::sys::stat::major(st.dev) as u32,
        nix::sys::stat::minor(st.dev) as u32,
    );
    #[allow(clippy::cast_possible_truncation)]
    let (rdev_major, rdev_minor) = (
        nix::sys::stat::major(st.rdev) as u32,
        nix::sys::stat::minor(st.rdev) as u32,
    );

    let mut raw = Vec::with_capacity(HEADER_SIZE + name.len() + 1);
    raw.extend_from_slice(MAGIC_NEWC);
    #[allow(clippy::cast_possible_truncation)]
    {
        push_hex(&mut raw, st.ino as u32);
        push_hex(&mut raw, st.mode);
        push_hex(&mut raw, st.uid);
        push_hex(&mut raw, st.gid);
        push_hex(&mut raw, st.nlink);
        push_hex(&mut raw, st.mtime);
        push_hex(&mut raw, st.size as u32);
        push_hex(&mut raw, dev_major);
        push_hex(&mut raw, dev_minor);
        push_hex(&mut raw, rdev_major);
        push_hex(&mut raw, rdev_minor);
        push_hex(&mut raw, name.len() as u32 + 1);
        push_hex(&mut raw, 0);
    }
    raw.extend_from_slice(name.as_bytes());
    raw.push(0);
    writer.write_all(&raw)?;
    writer.pad(ALIGNMENT)
}

/// Consumes exactly `size` payload bytes plus the trailing alignment.
///
/// # Errors
///
/// Returns `ReadFailed` on stream shortfalls.
pub fn skip_data<R: Read>(reader: &mut PayloadReader<R>, size: u64) -> Result<()> {
    reader.skip(size)?;
    reader.align(ALIGNMENT)
}

/// Emits the trailer entry that ends a payload.
///
/// # Errors
///
/// Returns `WriteFailed` on stream failures.
pub fn write_trailer<W: Write>(writer: &mut PayloadWriter<W>) -> Result<()> {
    let st = FileStat {
        nlink: 1,
        ..FileStat::default()
    };
    write_header(writer, &st, TRAILER)
}
