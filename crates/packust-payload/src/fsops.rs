//! Leaf filesystem operations.
//!
//! Every syscall the state machine issues goes through this trait, so
//! the machine itself stays linear and testable: the native
//! implementation talks to the OS, and tests substitute doubles that
//! inject failures or record calls.

use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::sys::stat::{Mode, SFlag, mknod, utimes};
use nix::sys::time::TimeVal;
use nix::unistd::mkfifo;

/// The leaf syscalls issued by the payload engine.
///
/// All methods return raw `io::Result`s; the state machine attaches the
/// error kind, path, and stage.
pub trait FsOps {
    /// `lstat(2)`.
    fn lstat(&self, path: &Path) -> io::Result<fs::Metadata>;
    /// `stat(2)`.
    fn stat(&self, path: &Path) -> io::Result<fs::Metadata>;
    /// `readlink(2)`.
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;
    /// `unlink(2)`.
    fn unlink(&self, path: &Path) -> io::Result<()>;
    /// `rename(2)`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    /// `mkdir(2)` with an explicit mode.
    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()>;
    /// `rmdir(2)`.
    fn rmdir(&self, path: &Path) -> io::Result<()>;
    /// `chmod(2)`.
    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()>;
    /// `chown(2)`.
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;
    /// `lchown(2)`.
    fn lchown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;
    /// Sets both timestamps to `mtime`.
    fn utime(&self, path: &Path, mtime: u32) -> io::Result<()>;
    /// `symlink(2)`.
    fn symlink(&self, target: &str, link: &Path) -> io::Result<()>;
    /// `link(2)`.
    fn link(&self, existing: &Path, new: &Path) -> io::Result<()>;
    /// `mkfifo(3)`.
    fn mkfifo(&self, path: &Path, mode: u32) -> io::Result<()>;
    /// `mknod(2)`.
    fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> io::Result<()>;
    /// Opens a file for writing, truncating it.
    fn open_write(&self, path: &Path) -> io::Result<Box<dyn Write>>;
    /// Opens a file for reading.
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read>>;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFs;

fn nix_err(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

impl FsOps for NativeFs {
    fn lstat(&self, path: &Path) -> io::Result<fs::Metadata> {
        fs::symlink_metadata(path)
    }

    fn stat(&self, path: &Path) -> io::Result<fs::Metadata> {
        fs::metadata(path)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::DirBuilder::new().mode(mode).create(path)
    }

    fn rmdir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))
    }

    fn lchown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        std::os::unix::fs::lchown(path, Some(uid), Some(gid))
    }

    fn utime(&self, path: &Path, mtime: u32) -> io::Result<()> {
        let stamp = TimeVal::new(i64::from(mtime), 0);
        utimes(path, &stamp, &stamp).map_err(nix_err)
    }

    fn symlink(&self, target: &str, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, link)
    }

    fn link(&self, existing: &Path, new: &Path) -> io::Result<()> {
        fs::hard_link(existing, new)
    }

    fn mkfifo(&self, path: &Path, mode: u32) -> io::Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        mkfifo(path, Mode::from_bits_truncate(mode as libc::mode_t)).map_err(nix_err)
    }

    fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> io::Result<()> {
        let kind = SFlag::from_bits_truncate(mode & libc::S_IFMT);
        let perm = Mode::from_bits_truncate(mode & 0o7777);
        mknod(path, kind, perm, rdev).map_err(nix_err)
    }

    fn open_write(&self, path: &Path) -> io::Result<Box<dyn Write>> {
        Ok(Box::new(fs::File::create(path)?))
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(fs::File::open(path)?))
    }
}
