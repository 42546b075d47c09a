//! Transaction-level context handed to the payload engine by its
//! environment: the install root, behavior flags, the progress callback,
//! and user/group name resolution.

use std::path::PathBuf;

/// Progress callback events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Install of one transaction element begins.
    InstStart,
    /// Install progressed; `amount` is the archive position.
    InstProgress,
    /// Erase of one transaction element begins.
    UninstStart,
    /// Erase progressed; `amount` is the file index.
    UninstProgress,
    /// Erase of one transaction element finished.
    UninstStop,
}

/// Receiver of progress events.
pub trait ProgressSink {
    /// Reports one progress event with its amount/total pair.
    fn progress(&self, event: ProgressEvent, amount: u64, total: u64);
}

/// User/group name resolution supplied by the environment.
///
/// A miss maps the file to root and clears the corresponding
/// setuid/setgid bit.
pub trait IdResolver {
    /// Resolves a user name to a uid.
    fn uid_for(&self, name: &str) -> Option<u32>;
    /// Resolves a group name to a gid.
    fn gid_for(&self, name: &str) -> Option<u32>;
}

/// Transaction behavior flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransFlags {
    /// Perform all checks but touch nothing on disk.
    pub test: bool,
    /// Skip payload extraction entirely.
    pub just_db: bool,
    /// Do not invoke the scriptlet collaborator.
    pub no_scripts: bool,
    /// Per-entry commit is deferred to the caller at transaction end;
    /// skip the per-file commit step.
    pub commit: bool,
    /// Iterate transaction elements in reverse.
    pub reverse: bool,
}

/// Per-file mapping overrides applied while an entry is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapFlags(u32);

impl MapFlags {
    /// Rewrite the archive path to the filesystem target.
    pub const PATH: Self = Self(1 << 0);
    /// Override the archive mode from the file table.
    pub const MODE: Self = Self(1 << 1);
    /// Override the archive uid from the file table.
    pub const UID: Self = Self(1 << 2);
    /// Override the archive gid from the file table.
    pub const GID: Self = Self(1 << 3);
    /// On build, stat through symlinks instead of lstat.
    pub const FOLLOW_SYMLINKS: Self = Self(1 << 4);

    /// No overrides.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// The default install mapping: path, mode, uid, and gid all come
    /// from the file table.
    #[must_use]
    pub const fn install_defaults() -> Self {
        Self(Self::PATH.0 | Self::MODE.0 | Self::UID.0 | Self::GID.0)
    }

    /// Whether all bits of `other` are set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl Default for MapFlags {
    fn default() -> Self {
        Self::install_defaults()
    }
}

impl std::ops::BitOr for MapFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Everything the payload engine needs to know about the transaction it
/// is running inside.
pub struct TransactionContext<'a> {
    /// Install root all mapped paths are resolved under.
    pub root: PathBuf,
    /// Whether the process is already chrooted into `root`.
    pub chroot_done: bool,
    /// Transaction id; non-zero ids stamp a `;xxxxxxxx` staging suffix
    /// on files while their bytes are written.
    pub id: u32,
    /// Behavior flags.
    pub flags: TransFlags,
    /// Progress receiver, if any.
    pub progress: Option<&'a dyn ProgressSink>,
    /// User/group name resolver, if any.
    pub ids: Option<&'a dyn IdResolver>,
}

impl std::fmt::Debug for TransactionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("root", &self.root)
            .field("chroot_done", &self.chroot_done)
            .field("id", &self.id)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl<'a> TransactionContext<'a> {
    /// Creates a context rooted at `root` with default flags.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chroot_done: false,
            id: 0,
            flags: TransFlags::default(),
            progress: None,
            ids: None,
        }
    }

    /// Sets the transaction id.
    #[must_use]
    pub const fn with_id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    /// Sets the behavior flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: TransFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the progress receiver.
    #[must_use]
    pub const fn with_progress(mut self, sink: &'a dyn ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Sets the id resolver.
    #[must_use]
    pub const fn with_ids(mut self, ids: &'a dyn IdResolver) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Resolves a root-relative mapped path to its on-disk location.
    #[must_use]
    pub fn fs_path(&self, mapped: &str) -> PathBuf {
        if self.chroot_done {
            PathBuf::from(mapped)
        } else {
            self.root.join(mapped.trim_start_matches('/'))
        }
    }

    /// Emits a progress event, if a receiver is attached.
    pub fn notify(&self, event: ProgressEvent, amount: u64, total: u64) {
        if let Some(sink) = self.progress {
            sink.progress(event, amount, total);
        }
    }
}
