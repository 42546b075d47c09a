//! Verification of installed files against the file table.
//!
//! Each row is compared to the node on disk: digest, size, symlink
//! target, ownership, mode, times, and device numbers, with the checks
//! that make no sense for the node's type masked off. The result is a
//! small bit set; an empty set means the file verifies clean.

use std::io::Read;
use std::ops::{BitOr, BitOrAssign};
use std::os::unix::fs::MetadataExt;

use packust_common::{Error, ErrorKind, Result};

use crate::context::TransactionContext;
use crate::digest::{DigestAlgo, DigestCtx};
use crate::fileinfo::{FileInfo, FileState};
use crate::fsops::FsOps;

/// Bit set of failed verification aspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerifyFailures(u32);

impl VerifyFailures {
    /// Content digest differs.
    pub const DIGEST: Self = Self(1);
    /// File size differs.
    pub const SIZE: Self = Self(1 << 1);
    /// Symlink target differs.
    pub const LINKTO: Self = Self(1 << 2);
    /// Owner differs.
    pub const USER: Self = Self(1 << 3);
    /// Group differs.
    pub const GROUP: Self = Self(1 << 4);
    /// Modification time differs.
    pub const MTIME: Self = Self(1 << 5);
    /// Mode differs.
    pub const MODE: Self = Self(1 << 6);
    /// Device number differs.
    pub const RDEV: Self = Self(1 << 7);
    /// The file could not be read for digesting.
    pub const READ_FAIL: Self = Self(1 << 8);
    /// The symlink target could not be read.
    pub const READLINK_FAIL: Self = Self(1 << 9);

    /// Whether every checked aspect verified clean.
    #[must_use]
    pub const fn is_clean(self) -> bool {
        self.0 == 0
    }

    /// Whether all bits of `other` are set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for VerifyFailures {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for VerifyFailures {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

fn file_digest<O: FsOps>(ops: &O, path: &std::path::Path, algo: DigestAlgo) -> Result<String> {
    let mut source = ops.open_read(path).map_err(|e| {
        Error::new(ErrorKind::OpenFailed)
            .with_source(e)
            .with_path(path)
    })?;
    let mut ctx = DigestCtx::new(algo);
    let mut buf = [0u8; 8192];
    loop {
        let n = source.read(&mut buf).map_err(|e| {
            Error::new(ErrorKind::ReadFailed)
                .with_source(e)
                .with_path(path)
        })?;
        if n == 0 {
            break;
        }
        ctx.update(&buf[..n]);
    }
    Ok(ctx.finish())
}

/// Verifies row `i` of the file table against the filesystem.
///
/// Files whose recorded state says the payload was never transferred
/// verify clean by definition.
///
/// # Errors
///
/// Returns `LstatFailed` with the path attached when the file is
/// missing; comparison differences are reported through the returned
/// bit set instead.
pub fn verify_file<O: FsOps>(
    fi: &FileInfo,
    i: usize,
    ctx: &TransactionContext<'_>,
    ops: &O,
) -> Result<VerifyFailures> {
    let mut failures = VerifyFailures::default();
    if fi.state(i) == FileState::NotInstalled {
        return Ok(failures);
    }

    let fs_rel = fi.map_fs_path(i, None, None);
    let fs_path = ctx.fs_path(&fs_rel);
    let meta = ops.lstat(&fs_path).map_err(|e| {
        Error::new(ErrorKind::LstatFailed)
            .with_source(e)
            .with_path(&fs_path)
    })?;

    let ft = meta.file_type();
    let is_special = ft.is_dir()
        || ft.is_symlink()
        || {
            use std::os::unix::fs::FileTypeExt;
            ft.is_fifo() || ft.is_char_device() || ft.is_block_device() || ft.is_socket()
        };
    let check_content = !is_special;

    if check_content {
        if let Some(expected) = fi.digest(i) {
            match DigestAlgo::from_hex_len(expected.len()) {
                Some(algo) => match file_digest(ops, &fs_path, algo) {
                    Ok(actual) => {
                        if actual != expected {
                            failures |= VerifyFailures::DIGEST;
                        }
                    }
                    Err(_) => {
                        failures |= VerifyFailures::READ_FAIL | VerifyFailures::DIGEST;
                    }
                },
                None => failures |= VerifyFailures::DIGEST,
            }
        }
        if fi.size(i) != meta.size() {
            failures |= VerifyFailures::SIZE;
        }
        if u64::from(fi.mtime(i)) != u64::try_from(meta.mtime()).unwrap_or(0) {
            failures |= VerifyFailures::MTIME;
        }
    }

    if ft.is_symlink() {
        match ops.read_link(&fs_path) {
            Ok(target) => {
                if fi.link_target(i).is_none_or(|t| target.as_os_str() != t) {
                    failures |= VerifyFailures::LINKTO;
                }
            }
            Err(_) => failures |= VerifyFailures::READLINK_FAIL | VerifyFailures::LINKTO,
        }
    } else {
        if u32::from(fi.mode(i)) != meta.mode() {
            failures |= VerifyFailures::MODE;
        }
        {
            use std::os::unix::fs::FileTypeExt;
            if ft.is_char_device() || ft.is_block_device() {
                if u64::from(fi.rdev(i)) != meta.rdev() {
                    failures |= VerifyFailures::RDEV;
                }
            }
        }
    }

    if fi.uid(i) != meta.uid() {
        failures |= VerifyFailures::USER;
    }
    if fi.gid(i) != meta.gid() {
        failures |= VerifyFailures::GROUP;
    }

    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitset_combines_and_reports() {
        let mut set = VerifyFailures::default();
        assert!(set.is_clean());
        set |= VerifyFailures::SIZE;
        set |= VerifyFailures::MTIME;
        assert!(!set.is_clean());
        assert!(set.contains(VerifyFailures::SIZE));
        assert!(!set.contains(VerifyFailures::DIGEST));
        assert!((set | VerifyFailures::DIGEST).contains(VerifyFailures::DIGEST));
    }
}
