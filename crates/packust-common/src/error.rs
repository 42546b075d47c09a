//! Unified error types for the Packust workspace.
//!
//! The error model is a closed set of failure kinds plus one error value
//! that carries the kind together with the captured OS error, the path
//! being operated on, and the engine stage that observed the failure.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Closed set of failure kinds recognized across the workspace.
///
/// `HdrTrailer` is not a real failure: it is the sentinel returned when
/// the archive trailer entry is reached and is the only non-fatal kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Stream does not start with a recognized magic value.
    #[error("bad magic")]
    BadMagic,
    /// Metadata header blob failed a structural sanity check.
    #[error("bad/unreadable header")]
    BadHeader,
    /// An entry header field exceeds its representable size.
    #[error("header size too big")]
    HdrSize,
    /// End-of-payload sentinel (archive trailer reached).
    #[error("archive trailer")]
    HdrTrailer,

    /// Reading from a stream failed or came up short.
    #[error("read failed")]
    ReadFailed,
    /// Writing to a stream failed or came up short.
    #[error("write failed")]
    WriteFailed,
    /// Copying payload bytes to their destination failed.
    #[error("copy failed")]
    CopyFailed,
    /// `readlink(2)` failed.
    #[error("readlink failed")]
    ReadlinkFailed,

    /// `open(2)` failed.
    #[error("open failed")]
    OpenFailed,
    /// `stat(2)` failed.
    #[error("stat failed")]
    StatFailed,
    /// `lstat(2)` failed.
    #[error("lstat failed")]
    LstatFailed,

    /// `mkdir(2)` failed.
    #[error("mkdir failed")]
    MkdirFailed,
    /// `rmdir(2)` failed.
    #[error("rmdir failed")]
    RmdirFailed,
    /// `unlink(2)` failed.
    #[error("unlink failed")]
    UnlinkFailed,
    /// `rename(2)` failed.
    #[error("rename failed")]
    RenameFailed,
    /// `link(2)` failed.
    #[error("link failed")]
    LinkFailed,
    /// `symlink(2)` failed.
    #[error("symlink failed")]
    SymlinkFailed,
    /// `mkfifo(3)` failed.
    #[error("mkfifo failed")]
    MkfifoFailed,
    /// `mknod(2)` failed.
    #[error("mknod failed")]
    MknodFailed,

    /// `chown(2)`/`lchown(2)` failed.
    #[error("chown failed")]
    ChownFailed,
    /// `chmod(2)` failed.
    #[error("chmod failed")]
    ChmodFailed,
    /// `utime(2)` failed.
    #[error("utime failed")]
    UtimeFailed,

    /// Streamed file content did not match its recorded digest.
    #[error("digest mismatch")]
    DigestMismatch,
    /// Archive entry has a file type the engine cannot create.
    #[error("unknown file type")]
    UnknownFiletype,
    /// A hard-link set finished with unplaced link names.
    #[error("missing hard link")]
    MissingHardLink,

    /// A header format expression failed to compile or evaluate.
    #[error("format error")]
    FormatError,
    /// An internal invariant was violated.
    #[error("internal error")]
    Internal,
}

impl ErrorKind {
    /// Returns `true` for every kind except the end-of-payload sentinel.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::HdrTrailer)
    }
}

/// Error value carrying a kind plus captured context.
///
/// Renders as `<stage>: <kind> [<os error>]`, with absent pieces omitted.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<io::Error>,
    path: Option<PathBuf>,
    stage: Option<&'static str>,
    detail: Option<String>,
}

impl Error {
    /// Creates an error of the given kind with no further context.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            source: None,
            path: None,
            stage: None,
            detail: None,
        }
    }

    /// Attaches the OS error that caused this failure.
    #[must_use]
    pub fn with_source(mut self, source: io::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Re-labels the failure kind, keeping all captured context.
    #[must_use]
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attaches the path being operated on when the failure occurred.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attaches the engine stage that observed the failure.
    #[must_use]
    pub fn at_stage(mut self, stage: &'static str) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Attaches a free-form detail message (format-language diagnostics).
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// The failure kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The path the failing operation was applied to, if captured.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The engine stage that observed the failure, if captured.
    #[must_use]
    pub const fn stage(&self) -> Option<&'static str> {
        self.stage
    }

    /// The detail message, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(stage) = self.stage {
            write!(f, "{stage}: ")?;
        }
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self.kind)?,
            None => write!(f, "{}", self.kind)?,
        }
        if let Some(path) = &self.path {
            write!(f, " {}", path.display())?;
        }
        if let Some(source) = &self.source {
            write!(f, " [{source}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;
