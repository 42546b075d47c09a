//! Drivers that run one transaction element end to end.
//!
//! The install driver walks the archive stream entry by entry through
//! the state machine; the build driver walks the file table and emits an
//! archive; the erase driver applies the per-file removal actions in
//! reverse order.

use std::io::{self, Read, Write};
use std::os::unix::fs::MetadataExt;

use packust_common::{Error, ErrorKind, Result};

use crate::context::{MapFlags, ProgressEvent, TransactionContext};
use crate::cpio::{self, FileStat};
use crate::fileinfo::{FileAction, FileInfo, file_flags};
use crate::fsm::Fsm;
use crate::fsops::FsOps;
use crate::hardlink::{HardLinkSet, HardLinkSets};
use crate::stream::{ALIGNMENT, PayloadReader, PayloadWriter};

/// Installs one element's payload into the filesystem.
///
/// Stops on the first fatal failure: the failing entry is rolled back,
/// earlier entries remain on disk, and the failed path rides on the
/// returned error.
///
/// # Errors
///
/// Propagates the first fatal state-machine failure, or the residual
/// `MissingHardLink` from teardown.
pub fn install_archive<R: Read, O: FsOps>(
    fi: &mut FileInfo,
    reader: &mut PayloadReader<R>,
    ctx: &TransactionContext<'_>,
    ops: &O,
) -> Result<()> {
    if ctx.flags.just_db {
        tracing::debug!(package = %fi.name(), "skipping payload (database-only)");
        return Ok(());
    }
    ctx.notify(ProgressEvent::InstStart, 0, fi.archive_size());
    tracing::info!(package = %fi.name(), files = fi.len(), "installing payload");

    let mut fsm = Fsm::new(reader, fi, ctx, ops);
    let mut rc: Result<()> = Ok(());
    loop {
        match fsm.init() {
            Err(e) if e.kind() == ErrorKind::HdrTrailer => break,
            Err(e) => {
                rc = Err(e);
                break;
            }
            Ok(()) => {}
        }

        let step = fsm
            .pre()
            .and_then(|()| fsm.process())
            .and_then(|()| fsm.post());
        match step {
            Ok(()) => {
                if let Err(e) = fsm.commit() {
                    rc = Err(e);
                    break;
                }
            }
            Err(e) => {
                fsm.undo();
                rc = Err(e);
                break;
            }
        }
    }

    let teardown = fsm.destroy();
    let failed = fsm.take_failed();
    let rc = match (rc, teardown) {
        (Err(e), _) => Err(e),
        (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) => Ok(()),
    };
    rc.map_err(|e| match (e.path().is_none(), failed) {
        (true, Some(path)) => e.with_path(path),
        _ => e,
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn stat_from_meta(meta: &std::fs::Metadata) -> FileStat {
    FileStat {
        ino: meta.ino(),
        mode: meta.mode(),
        uid: meta.uid(),
        gid: meta.gid(),
        nlink: meta.nlink() as u32,
        mtime: meta.mtime().clamp(0, i64::from(u32::MAX)) as u32,
        size: meta.size(),
        dev: meta.dev(),
        rdev: meta.rdev(),
    }
}

fn archive_name(fi: &FileInfo, i: usize) -> String {
    let path = fi.archive_path(i);
    if path.starts_with('/') {
        format!(".{path}")
    } else {
        path.to_owned()
    }
}

/// Writes one file table row to the archive.
fn write_file<W: Write, O: FsOps>(
    fi: &FileInfo,
    i: usize,
    st: &FileStat,
    writer: &mut PayloadWriter<W>,
    ctx: &TransactionContext<'_>,
    ops: &O,
    write_data: bool,
) -> Result<()> {
    let flags = fi.map_flags(i);
    let fs_rel = fi.map_fs_path(i, None, None);
    let fs_path = ctx.fs_path(&fs_rel);
    let name = if flags.contains(MapFlags::PATH) {
        archive_name(fi, i)
    } else {
        fs_rel.clone()
    };

    let mut st = *st;
    if flags.contains(MapFlags::MODE) {
        st.mode = (st.mode & libc::S_IFMT) | (u32::from(fi.mode(i)) & 0o7777);
    }
    if flags.contains(MapFlags::UID) {
        st.uid = fi.uid(i);
    }
    if flags.contains(MapFlags::GID) {
        st.gid = fi.gid(i);
    }

    let mut link_target = None;
    if !write_data || st.is_dir() {
        st.size = 0;
    } else if st.is_symlink() {
        let target = ops.read_link(&fs_path).map_err(|e| {
            Error::new(ErrorKind::ReadlinkFailed)
                .with_source(e)
                .with_path(&fs_path)
        })?;
        let target = target.to_string_lossy().into_owned();
        st.size = target.len() as u64;
        link_target = Some(target);
    }

    let start = writer.pos();
    cpio::write_header(writer, &st, &name)?;
    if write_data && st.is_reg() && st.size > 0 {
        let mut source = ops.open_read(&fs_path).map_err(|e| {
            Error::new(ErrorKind::OpenFailed)
                .with_source(e)
                .with_path(&fs_path)
        })?;
        let mut left = st.size;
        let mut buf = [0u8; 8192];
        while left > 0 {
            let bite = usize::try_from(left.min(buf.len() as u64)).unwrap_or(buf.len());
            source.read_exact(&mut buf[..bite]).map_err(|e| {
                Error::new(ErrorKind::ReadFailed)
                    .with_source(e)
                    .with_path(&fs_path)
            })?;
            writer.write_all(&buf[..bite])?;
            left -= bite as u64;
        }
    } else if let Some(target) = link_target {
        writer.write_all(target.as_bytes())?;
    }
    writer.pad(ALIGNMENT)?;

    let emitted = writer.pos() - start;
    ctx.notify(ProgressEvent::InstProgress, emitted, emitted);
    Ok(())
}

/// Writes a complete hard-link set: every collected name as a
/// zero-length entry except the last, which carries the data.
fn write_linked<W: Write, O: FsOps>(
    fi: &FileInfo,
    set: &HardLinkSet,
    writer: &mut PayloadWriter<W>,
    ctx: &TransactionContext<'_>,
    ops: &O,
) -> Result<()> {
    let rows: Vec<usize> = set.members.iter().filter_map(|m| m.file_index).collect();
    let Some((&data_row, name_rows)) = rows.split_last() else {
        return Ok(());
    };
    for &i in name_rows {
        write_file(fi, i, &set.sb, writer, ctx, ops, false)?;
    }
    write_file(fi, data_row, &set.sb, writer, ctx, ops, true)
}

/// Builds one element's payload from the filesystem, returning the
/// total archive size.
///
/// # Errors
///
/// Surfaces stat, open, read, and write failures with the affected path
/// attached.
pub fn build_archive<W: Write, O: FsOps>(
    fi: &FileInfo,
    writer: &mut PayloadWriter<W>,
    ctx: &TransactionContext<'_>,
    ops: &O,
) -> Result<u64> {
    let mut links = HardLinkSets::new();
    tracing::info!(package = %fi.name(), files = fi.len(), "building payload");

    for i in fi.indices() {
        if fi.action(i).is_skipped() {
            continue;
        }
        let fs_rel = fi.map_fs_path(i, None, None);
        let fs_path = ctx.fs_path(&fs_rel);
        let follow = fi.map_flags(i).contains(MapFlags::FOLLOW_SYMLINKS);
        let meta = if follow {
            ops.stat(&fs_path)
                .map_err(|e| Error::new(ErrorKind::StatFailed).with_source(e).with_path(&fs_path))?
        } else {
            ops.lstat(&fs_path)
                .map_err(|e| Error::new(ErrorKind::StatFailed).with_source(e).with_path(&fs_path))?
        };
        let st = stat_from_meta(&meta);

        if !st.is_dir() && st.nlink > 1 {
            let set = links.find_or_insert(&st);
            let _ = set.push_member(fs_rel, Some(i));
            if set.is_complete() {
                let full = links
                    .drain_matching(st.dev, st.ino)
                    .unwrap_or_else(|| unreachable!("set existed a moment ago"));
                write_linked(fi, &full, writer, ctx, ops)?;
            }
        } else {
            write_file(fi, i, &st, writer, ctx, ops, true)?;
        }
    }

    // Sets the walk never completed still flush every collected name.
    for set in links.drain() {
        write_linked(fi, &set, writer, ctx, ops)?;
    }

    cpio::write_trailer(writer)?;
    writer.pad(ALIGNMENT)?;
    writer.flush()?;
    Ok(writer.pos())
}

/// Applies the per-file erase actions of a removed element, in reverse
/// file order.
///
/// # Errors
///
/// Surfaces removal and rename failures; a missing file is tolerated
/// when its flags carry `MISSINGOK`.
pub fn erase_element<O: FsOps>(
    fi: &FileInfo,
    ctx: &TransactionContext<'_>,
    ops: &O,
) -> Result<()> {
    let total = fi.len() as u64;
    ctx.notify(ProgressEvent::UninstStart, total, total);
    tracing::info!(package = %fi.name(), files = fi.len(), "erasing files");

    let mut rc: Result<()> = Ok(());
    for (done, i) in fi.indices().into_iter().enumerate() {
        ctx.notify(ProgressEvent::UninstProgress, done as u64, total);
        if rc.is_err() {
            break;
        }
        let fs_rel = fi.map_fs_path(i, None, None);
        let fs_path = ctx.fs_path(&fs_rel);
        match fi.action(i) {
            FileAction::Remove => {
                if ctx.flags.test {
                    continue;
                }
                if fi.is_dir(i) {
                    match ops.rmdir(&fs_path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) if e.raw_os_error() == Some(libc::ENOTEMPTY) => {
                            tracing::warn!(
                                dir = %fs_rel,
                                "cannot remove - directory not empty"
                            );
                        }
                        Err(e) => {
                            rc = Err(Error::new(ErrorKind::RmdirFailed)
                                .with_source(e)
                                .with_path(&fs_path)
                                .at_stage("erase"));
                        }
                    }
                } else {
                    match ops.unlink(&fs_path) {
                        Ok(()) => {}
                        Err(e)
                            if e.kind() == io::ErrorKind::NotFound
                                && fi.flags(i) & file_flags::MISSINGOK != 0 => {}
                        Err(e) => {
                            rc = Err(Error::new(ErrorKind::UnlinkFailed)
                                .with_source(e)
                                .with_path(&fs_path)
                                .at_stage("erase"));
                        }
                    }
                }
            }
            FileAction::Backup => {
                if ctx.flags.test || ops.lstat(&fs_path).is_err() {
                    continue;
                }
                let (o_suffix, _) = fi.suffixes(i);
                if let Some(suffix) = o_suffix {
                    let saved_rel = format!("{fs_rel}{suffix}");
                    let saved = ctx.fs_path(&saved_rel);
                    tracing::warn!(path = %fs_rel, saved_as = %saved_rel, "saved");
                    if let Err(e) = ops.rename(&fs_path, &saved) {
                        rc = Err(Error::new(ErrorKind::RenameFailed)
                            .with_source(e)
                            .with_path(&fs_path)
                            .at_stage("erase"));
                    }
                }
            }
            _ => {}
        }
    }

    ctx.notify(ProgressEvent::UninstStop, 0, total);
    rc
}
