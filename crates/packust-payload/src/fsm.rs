//! The per-entry file state machine.
//!
//! One `Fsm` processes the archive of a single transaction element, one
//! entry at a time: `init` reads the next entry header, `pre` maps it to
//! the file table and pre-creates directories, `process` materializes
//! the node, `post` settles hard links, and `commit`/`undo` finish or
//! roll back the entry. `destroy` flushes any hard-link sets left open.
//!
//! Every syscall goes through the [`FsOps`] seam; in test mode the
//! mutating wrappers become no-ops so all checks still run.

use std::io::{self, Read};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

use packust_common::{Error, ErrorKind, Result};

use crate::context::{MapFlags, ProgressEvent, TransactionContext};
use crate::cpio::{self, FileStat, TRAILER};
use crate::digest::DigestAlgo;
use crate::fileinfo::{ElementKind, FileAction, FileInfo, FileState};
use crate::fsops::FsOps;
use crate::hardlink::HardLinkSets;
use crate::stream::{ALIGNMENT, PayloadReader, PayloadWriter};

/// Suffix used to displace an existing file that blocks creation; the
/// rename-then-unlink dance tolerates hosts that refuse to unlink busy
/// executables.
const DELETE_SUFFIX: &str = "-RPMDELETE";

/// Upper bound on a symlink target, NUL terminator included.
const LINK_TARGET_MAX: u64 = 2048;

/// The per-entry state machine.
pub struct Fsm<'a, R, O> {
    reader: &'a mut PayloadReader<R>,
    fi: &'a mut FileInfo,
    ctx: &'a TransactionContext<'a>,
    ops: &'a O,
    stage: &'static str,

    // Per-element state.
    links: HardLinkSets,
    ldn: String,
    dnlx: Vec<usize>,
    failed: Option<PathBuf>,
    staging_suffix: Option<String>,

    // Per-entry state.
    path: String,
    sb: FileStat,
    file_index: Option<usize>,
    action: FileAction,
    postpone: bool,
    commit_entry: bool,
    o_suffix: Option<&'static str>,
    n_suffix: Option<&'static str>,
    suffix: Option<String>,
    digest: Option<String>,
    link_target: Option<String>,
    dperms: u32,
    fperms: u32,
}

impl<'a, R: Read, O: FsOps> Fsm<'a, R, O> {
    /// Sets up the machine for one transaction element.
    pub fn new(
        reader: &'a mut PayloadReader<R>,
        fi: &'a mut FileInfo,
        ctx: &'a TransactionContext<'a>,
        ops: &'a O,
    ) -> Self {
        let staging_suffix = (ctx.id > 0).then(|| format!(";{:08x}", ctx.id));
        Self {
            reader,
            fi,
            ctx,
            ops,
            stage: "create",
            links: HardLinkSets::new(),
            ldn: String::new(),
            dnlx: Vec::new(),
            failed: None,
            staging_suffix,
            path: String::new(),
            sb: FileStat::default(),
            file_index: None,
            action: FileAction::Unknown,
            postpone: false,
            commit_entry: true,
            o_suffix: None,
            n_suffix: None,
            suffix: None,
            digest: None,
            link_target: None,
            dperms: 0o755,
            fperms: 0o644,
        }
    }

    /// Path of the first entry that failed, recorded by `undo` or a
    /// hard-link placement failure.
    #[must_use]
    pub fn failed_file(&self) -> Option<&Path> {
        self.failed.as_deref()
    }

    /// Takes ownership of the recorded failed path.
    pub fn take_failed(&mut self) -> Option<PathBuf> {
        self.failed.take()
    }

    // ── Leaf syscall wrappers ────────────────────────────────────────

    fn leaf(&self, kind: ErrorKind, path: &Path, e: io::Error) -> Error {
        Error::new(kind)
            .with_source(e)
            .with_path(path)
            .at_stage(self.stage)
    }

    fn op_unlink(&self, path: &Path) -> Result<()> {
        if self.ctx.flags.test {
            return Ok(());
        }
        self.ops
            .unlink(path)
            .map_err(|e| self.leaf(ErrorKind::UnlinkFailed, path, e))
    }

    fn op_rename(&self, from: &Path, to: &Path) -> Result<()> {
        if self.ctx.flags.test {
            return Ok(());
        }
        self.ops
            .rename(from, to)
            .map_err(|e| self.leaf(ErrorKind::RenameFailed, to, e))
    }

    fn op_mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        if self.ctx.flags.test {
            return Ok(());
        }
        self.ops
            .mkdir(path, mode)
            .map_err(|e| self.leaf(ErrorKind::MkdirFailed, path, e))
    }

    fn op_rmdir(&self, path: &Path) -> Result<()> {
        if self.ctx.flags.test {
            return Ok(());
        }
        self.ops
            .rmdir(path)
            .map_err(|e| self.leaf(ErrorKind::RmdirFailed, path, e))
    }

    fn op_chmod(&self, path: &Path, mode: u32) -> Result<()> {
        if self.ctx.flags.test {
            return Ok(());
        }
        self.ops
            .chmod(path, mode)
            .map_err(|e| self.leaf(ErrorKind::ChmodFailed, path, e))
    }

    fn op_chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        if self.ctx.flags.test {
            return Ok(());
        }
        self.ops
            .chown(path, uid, gid)
            .map_err(|e| self.leaf(ErrorKind::ChownFailed, path, e))
    }

    fn op_lchown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        if self.ctx.flags.test {
            return Ok(());
        }
        self.ops
            .lchown(path, uid, gid)
            .map_err(|e| self.leaf(ErrorKind::ChownFailed, path, e))
    }

    fn op_utime(&self, path: &Path, mtime: u32) -> Result<()> {
        if self.ctx.flags.test {
            return Ok(());
        }
        self.ops
            .utime(path, mtime)
            .map_err(|e| self.leaf(ErrorKind::UtimeFailed, path, e))
    }

    fn op_symlink(&self, target: &str, link: &Path) -> Result<()> {
        if self.ctx.flags.test {
            return Ok(());
        }
        self.ops
            .symlink(target, link)
            .map_err(|e| self.leaf(ErrorKind::SymlinkFailed, link, e))
    }

    fn op_link(&self, existing: &Path, new: &Path) -> Result<()> {
        if self.ctx.flags.test {
            return Ok(());
        }
        self.ops
            .link(existing, new)
            .map_err(|e| self.leaf(ErrorKind::LinkFailed, new, e))
    }

    fn op_mkfifo(&self, path: &Path, mode: u32) -> Result<()> {
        if self.ctx.flags.test {
            return Ok(());
        }
        self.ops
            .mkfifo(path, mode)
            .map_err(|e| self.leaf(ErrorKind::MkfifoFailed, path, e))
    }

    fn op_mknod(&self, path: &Path, mode: u32, rdev: u64) -> Result<()> {
        if self.ctx.flags.test {
            return Ok(());
        }
        self.ops
            .mknod(path, mode, rdev)
            .map_err(|e| self.leaf(ErrorKind::MknodFailed, path, e))
    }

    // ── Verify ───────────────────────────────────────────────────────

    /// Checks whether the node at `mapped` may stand in for the entry
    /// about to be created.
    ///
    /// Returns `Ok(())` when the existing node is acceptable as-is.
    /// `LstatFailed` means "nothing usable is there, create it" — for an
    /// existing regular file the target is first displaced with a
    /// rename-then-unlink. With `unlink_mismatched`, a node of the wrong
    /// type is unlinked before reporting `LstatFailed`.
    fn verify_path(
        &self,
        mapped: &str,
        expected: &FileStat,
        link_target: Option<&str>,
        unlink_mismatched: bool,
    ) -> Result<()> {
        let fs_path = self.ctx.fs_path(mapped);
        let meta = match self.ops.lstat(&fs_path) {
            Ok(meta) => meta,
            Err(e) => return Err(self.leaf(ErrorKind::LstatFailed, &fs_path, e)),
        };

        if expected.is_reg() {
            let displaced = self.ctx.fs_path(&format!("{mapped}{DELETE_SUFFIX}"));
            return match self.op_rename(&fs_path, &displaced) {
                Ok(()) => {
                    let _ = self.op_unlink(&displaced);
                    Err(Error::new(ErrorKind::LstatFailed).with_path(&fs_path))
                }
                Err(e) => Err(e.with_kind(ErrorKind::UnlinkFailed)),
            };
        }

        let ft = meta.file_type();
        if expected.is_dir() {
            if ft.is_dir() {
                return Ok(());
            }
            if ft.is_symlink() {
                match self.ops.stat(&fs_path) {
                    Ok(target) if target.is_dir() => return Ok(()),
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(self.leaf(ErrorKind::StatFailed, &fs_path, e)),
                }
            }
        } else if expected.is_symlink() {
            if ft.is_symlink() {
                if let (Ok(existing), Some(wanted)) = (self.ops.read_link(&fs_path), link_target)
                {
                    if existing.as_os_str() == wanted {
                        return Ok(());
                    }
                }
            }
        } else if expected.is_fifo() {
            if ft.is_fifo() {
                return Ok(());
            }
        } else if expected.is_sock() {
            if ft.is_socket() {
                return Ok(());
            }
        } else if expected.is_dev()
            && (ft.is_char_device() || ft.is_block_device())
            && meta.rdev() == expected.rdev
        {
            return Ok(());
        }

        if unlink_mismatched {
            self.op_unlink(&fs_path)?;
        }
        Err(Error::new(ErrorKind::LstatFailed).with_path(fs_path))
    }

    // ── Stages ───────────────────────────────────────────────────────

    /// Resets per-entry state and reads the next archive entry header.
    ///
    /// # Errors
    ///
    /// `HdrTrailer` when the payload's sentinel entry is reached; stream
    /// and framing failures otherwise.
    pub fn init(&mut self) -> Result<()> {
        self.stage = "init";
        self.path.clear();
        self.file_index = None;
        self.action = FileAction::Unknown;
        self.postpone = false;
        self.commit_entry = true;
        self.o_suffix = None;
        self.n_suffix = None;
        self.suffix = self.staging_suffix.clone();
        self.digest = None;
        self.link_target = None;
        self.dnlx.clear();
        self.dperms = 0o755;
        self.fperms = 0o644;

        self.reader.align(ALIGNMENT).map_err(|e| e.at_stage(self.stage))?;
        let (st, name) = cpio::read_header(self.reader).map_err(|e| e.at_stage(self.stage))?;
        if name == TRAILER {
            return Err(Error::new(ErrorKind::HdrTrailer));
        }
        self.sb = st;
        self.path = name;
        Ok(())
    }

    /// Joins the entry to the file table and applies mapping overrides.
    fn map(&mut self) {
        let Some(i) = self.fi.map_find(&self.path) else {
            tracing::warn!(path = %self.path, "archive entry not mapped");
            self.commit_entry = false;
            return;
        };
        self.file_index = Some(i);
        self.action = self.fi.action(i);
        let (o_suffix, n_suffix) = self.fi.suffixes(i);
        self.o_suffix = o_suffix;
        self.n_suffix = n_suffix;
        if self.fi.kind() == ElementKind::Added {
            match self.action {
                FileAction::SkipNState => self.fi.set_state(i, FileState::NotInstalled),
                FileAction::SkipNetShared => self.fi.set_state(i, FileState::NetShared),
                _ => {}
            }
        }

        let flags = self.fi.map_flags(i);
        if flags.contains(MapFlags::PATH) || self.n_suffix.is_some() {
            let staged = self.suffix.as_deref().or(self.n_suffix);
            self.path = self.fi.map_fs_path(i, None, staged);
        }
        if flags.contains(MapFlags::MODE) {
            self.sb.mode = u32::from(self.fi.mode(i));
        }
        if flags.contains(MapFlags::UID) {
            self.sb.uid = self.fi.uid(i);
        }
        if flags.contains(MapFlags::GID) {
            self.sb.gid = self.fi.gid(i);
        }
        if self.sb.is_reg() {
            self.digest = self.fi.digest(i).map(str::to_owned);
        }
        self.commit_entry = !self.ctx.flags.commit;
        tracing::debug!(
            path = %self.path,
            mode = %format_args!("{:06o}", self.sb.mode),
            action = ?self.action,
            "mapped archive entry"
        );
    }

    /// Creates every directory component the element's files need.
    fn mkdirs(&mut self) -> Result<()> {
        let dirs: Vec<String> = self
            .fi
            .active_dirs()
            .into_iter()
            .map(str::to_owned)
            .collect();
        let dir_stat = FileStat {
            mode: libc::S_IFDIR,
            ..FileStat::default()
        };
        for dn in dirs {
            if dn.len() <= 1 || dn == self.ldn {
                continue;
            }
            let mut verified = 0usize;
            for (pos, byte) in dn.bytes().enumerate().skip(1) {
                if byte != b'/' {
                    continue;
                }
                let prefix = &dn[..pos];
                match self.verify_path(prefix, &dir_stat, None, false) {
                    Ok(()) => verified = pos,
                    Err(e) if e.kind() == ErrorKind::LstatFailed => {
                        let fs_path = self.ctx.fs_path(prefix);
                        self.op_mkdir(&fs_path, self.dperms)?;
                        tracing::debug!(dir = %prefix, "created directory");
                    }
                    Err(e) => return Err(e),
                }
            }
            self.dnlx.push(verified);
            self.ldn = dn;
        }
        Ok(())
    }

    /// Maps the entry and decides whether it is postponed.
    ///
    /// # Errors
    ///
    /// Propagates directory creation and link placement failures.
    pub fn pre(&mut self) -> Result<()> {
        self.stage = "pre";
        self.map();

        let st = self.sb;
        let mut link_now = false;
        if st.is_reg() && st.nlink > 1 {
            let path = self.path.clone();
            let index = self.file_index;
            let set = self.links.find_or_insert(&st);
            let _ = set.push_member(path, index);
            if st.size == 0 && set.created.is_none() {
                self.postpone = true;
            } else if set.created.is_some() {
                link_now = true;
                self.postpone = true;
            }
        }
        if link_now {
            self.mklinks(st.dev, st.ino)?;
        }
        if !self.postpone {
            self.mkdirs()?;
            self.postpone = self.action.is_skipped();
        }
        if self.postpone {
            self.reader.align(ALIGNMENT).map_err(|e| e.at_stage(self.stage))?;
            self.reader
                .skip(self.sb.size)
                .map_err(|e| e.at_stage(self.stage))?;
        }
        Ok(())
    }

    /// Streams a regular file's bytes to its staged location, checking
    /// the recorded digest at EOF.
    fn expand_regular(&mut self) -> Result<()> {
        let st = self.sb;

        // Displace the existing file under its backup suffix first.
        if let (Some(o_suffix), Some(i)) = (self.o_suffix, self.file_index) {
            let final_path = self.fi.map_fs_path(i, None, None);
            let fs_final = self.ctx.fs_path(&final_path);
            if self.ops.lstat(&fs_final).is_ok() {
                let backup = format!("{final_path}{o_suffix}");
                self.op_rename(&fs_final, &self.ctx.fs_path(&backup))?;
                tracing::warn!(path = %final_path, saved_as = %backup, "saved");
            }
        }

        let mapped = self.path.clone();
        match self.verify_path(&mapped, &st, None, true) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::LstatFailed => {}
            Err(e) => return Err(e),
        }

        let fs_path = self.ctx.fs_path(&mapped);
        let sink: Box<dyn io::Write> = if self.ctx.flags.test {
            Box::new(io::sink())
        } else {
            self.ops
                .open_write(&fs_path)
                .map_err(|e| self.leaf(ErrorKind::OpenFailed, &fs_path, e))?
        };
        let mut writer = PayloadWriter::new(sink);
        let expected = self.digest.clone();
        let algo = expected
            .as_deref()
            .and_then(|d| DigestAlgo::from_hex_len(d.len()));
        if let Some(algo) = algo {
            writer.attach_digest(algo);
        }

        let mut buf = [0u8; 8192];
        let mut left = st.size;
        while left > 0 {
            let bite = usize::try_from(left.min(buf.len() as u64)).unwrap_or(buf.len());
            self.reader
                .read_exact(&mut buf[..bite])
                .map_err(|e| e.at_stage(self.stage))?;
            writer.write_all(&buf[..bite]).map_err(|e| {
                e.with_kind(ErrorKind::CopyFailed)
                    .with_path(&fs_path)
                    .at_stage(self.stage)
            })?;
            left -= bite as u64;
            if left > 0 {
                self.notify_progress();
            }
        }

        if algo.is_some() {
            writer.flush().map_err(|e| e.at_stage(self.stage))?;
            let actual = writer.take_digest();
            if actual.as_deref() != expected.as_deref() {
                return Err(Error::new(ErrorKind::DigestMismatch)
                    .with_path(&fs_path)
                    .at_stage(self.stage));
            }
        }
        drop(writer);
        self.op_chmod(&fs_path, self.fperms)
    }

    /// Materializes the entry on the filesystem.
    ///
    /// # Errors
    ///
    /// Surfaces creation failures, `DigestMismatch`, `HdrSize` for an
    /// oversized symlink target, and `UnknownFiletype`.
    pub fn process(&mut self) -> Result<()> {
        self.stage = "process";
        self.reader.align(ALIGNMENT).map_err(|e| e.at_stage(self.stage))?;
        if self.postpone {
            return Ok(());
        }
        let st = self.sb;
        let mapped = self.path.clone();
        let fs_path = self.ctx.fs_path(&mapped);

        if st.is_reg() {
            return self.expand_regular();
        }
        if st.is_dir() {
            match self.verify_path(&mapped, &st, None, true) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::LstatFailed => {
                    self.op_mkdir(&fs_path, 0)?;
                }
                Err(e) => return Err(e),
            }
            return self.op_chmod(&fs_path, st.perms());
        }
        if st.is_symlink() {
            if st.size + 1 > LINK_TARGET_MAX {
                return Err(Error::new(ErrorKind::HdrSize)
                    .with_path(fs_path)
                    .at_stage(self.stage));
            }
            let mut raw = vec![0u8; usize::try_from(st.size).unwrap_or(0)];
            self.reader
                .read_exact(&mut raw)
                .map_err(|e| e.at_stage(self.stage))?;
            let target = String::from_utf8(raw).map_err(|_| {
                Error::new(ErrorKind::BadHeader)
                    .with_detail("symlink target is not UTF-8")
                    .at_stage(self.stage)
            })?;
            self.link_target = Some(target.clone());
            return match self.verify_path(&mapped, &st, Some(&target), true) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::LstatFailed => {
                    self.op_symlink(&target, &fs_path)
                }
                Err(e) => Err(e),
            };
        }
        if st.is_fifo() || st.is_sock() {
            return match self.verify_path(&mapped, &st, None, true) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::LstatFailed => self.op_mkfifo(&fs_path, 0),
                Err(e) => Err(e),
            };
        }
        if st.is_dev() {
            return match self.verify_path(&mapped, &st, None, true) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::LstatFailed => {
                    self.op_mknod(&fs_path, st.mode & !0o7777, st.rdev)
                }
                Err(e) => Err(e),
            };
        }
        Err(Error::new(ErrorKind::UnknownFiletype)
            .with_path(fs_path)
            .at_stage(self.stage))
    }

    /// Places every pending sibling of the `(dev, ino)` set by linking
    /// it to the created path.
    fn mklinks(&mut self, dev: u64, ino: u64) -> Result<()> {
        let key = FileStat {
            dev,
            ino,
            mode: libc::S_IFREG,
            ..FileStat::default()
        };
        let (created_path, pending) = {
            let Some(set) = self.links.find(&key) else {
                return Ok(());
            };
            let Some(created) = set.created else {
                return Ok(());
            };
            let Some(created_path) = set.members[created].path.clone() else {
                return Ok(());
            };
            let pending: Vec<(usize, String)> = set
                .members
                .iter()
                .enumerate()
                .filter(|&(idx, member)| idx != created && member.path.is_some())
                .map(|(idx, member)| (idx, member.path.clone().unwrap_or_default()))
                .collect();
            (created_path, pending)
        };

        let reg = FileStat {
            dev,
            ino,
            mode: libc::S_IFREG,
            ..FileStat::default()
        };
        let from = self.ctx.fs_path(&created_path);
        for (idx, member_path) in pending {
            match self.verify_path(&member_path, &reg, None, false) {
                Ok(()) => continue,
                Err(e) if e.kind() == ErrorKind::LstatFailed => {}
                Err(e) => {
                    self.failed = Some(self.ctx.fs_path(&member_path));
                    return Err(e);
                }
            }
            let to = self.ctx.fs_path(&member_path);
            if let Err(e) = self.op_link(&from, &to) {
                self.failed = Some(to);
                return Err(e);
            }
            if let Some(set) = self.links.find(&key) {
                set.members[idx].path = None;
                set.links_left = set.links_left.saturating_sub(1);
            }
            tracing::debug!(from = %created_path, to = %member_path, "placed hard link");
        }
        Ok(())
    }

    /// Marks a multi-link regular file as created and settles its set.
    ///
    /// # Errors
    ///
    /// Propagates link placement failures.
    pub fn post(&mut self) -> Result<()> {
        self.stage = "post";
        if self.postpone {
            return Ok(());
        }
        let st = self.sb;
        if st.is_reg() && st.nlink > 1 {
            if let Some(set) = self.links.find(&st) {
                set.mark_created();
            }
            self.mklinks(st.dev, st.ino)?;
        }
        Ok(())
    }

    /// Finalizes a successfully processed entry: the staged-name rename,
    /// ownership, mode, and times, then the progress notification.
    ///
    /// # Errors
    ///
    /// Propagates rename and attribute failures.
    pub fn commit(&mut self) -> Result<()> {
        self.stage = "commit";
        if self.postpone || !self.commit_entry {
            return Ok(());
        }
        let st = self.sb;
        if !st.is_dir() && self.suffix.is_some() {
            if let Some(i) = self.file_index {
                let final_path = self.fi.map_fs_path(i, None, self.n_suffix);
                let from = self.ctx.fs_path(&self.path);
                let to = self.ctx.fs_path(&final_path);
                self.op_rename(&from, &to)?;
                if self.n_suffix.is_some() {
                    let wanted = self.fi.map_fs_path(i, None, None);
                    tracing::warn!(path = %wanted, created_as = %final_path, "created");
                }
                self.path = final_path;
            }
        }

        let fs_path = self.ctx.fs_path(&self.path);
        if nix::unistd::Uid::effective().is_root() {
            if st.is_symlink() {
                self.op_lchown(&fs_path, st.uid, st.gid)?;
            } else {
                self.op_chown(&fs_path, st.uid, st.gid)?;
            }
        }
        if !st.is_symlink() {
            self.op_chmod(&fs_path, st.perms())?;
            self.op_utime(&fs_path, st.mtime)?;
        }
        self.notify_progress();
        Ok(())
    }

    /// Rolls back the entry being installed: removes the node and
    /// records the failed path. Directories created for this entry are
    /// intentionally left in place.
    pub fn undo(&mut self) {
        self.stage = "undo";
        if self.postpone {
            return;
        }
        let fs_path = self.ctx.fs_path(&self.path);
        let result = if self.sb.is_dir() {
            self.op_rmdir(&fs_path)
        } else {
            self.op_unlink(&fs_path)
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "rollback removal failed");
        }
        if self.failed.is_none() {
            self.failed = Some(fs_path);
        }
    }

    /// Flushes remaining hard-link sets and releases per-element state.
    ///
    /// # Errors
    ///
    /// Returns `MissingHardLink` when a set finishes with unplaced
    /// names; cleanup continues past the failure.
    pub fn destroy(&mut self) -> Result<()> {
        self.stage = "destroy";
        self.path.clear();
        self.ldn.clear();
        let mut rc = Ok(());

        let keys: Vec<(u64, u64, bool)> = self
            .links
            .iter_mut()
            .map(|set| (set.dev, set.ino, set.created.is_some()))
            .collect();
        for (dev, ino, has_created) in keys {
            if rc.is_ok() && has_created {
                if let Err(e) = self.mklinks(dev, ino) {
                    rc = Err(e);
                }
            }
        }
        for set in self.links.drain() {
            if set.is_settled() {
                continue;
            }
            let pending = set
                .members
                .iter()
                .find(|m| m.path.is_some())
                .and_then(|m| m.path.clone())
                .unwrap_or_default();
            tracing::warn!(path = %pending, "hard-link set left unplaced names");
            if rc.is_ok() {
                rc = Err(Error::new(ErrorKind::MissingHardLink)
                    .with_path(self.ctx.fs_path(&pending))
                    .at_stage(self.stage));
            }
        }
        rc
    }

    /// Emits an install-progress event at the current archive position.
    pub fn notify_progress(&self) {
        self.ctx.notify(
            ProgressEvent::InstProgress,
            self.reader.pos(),
            self.fi.archive_size(),
        );
    }
}
