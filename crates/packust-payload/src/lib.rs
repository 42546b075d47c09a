//! # packust-payload
//!
//! The payload half of the package core: the new-ASCII CPIO codec, the
//! per-package file table, hard-link coalescing, and the per-entry file
//! state machine that extracts an archive into the filesystem — plus the
//! drivers that install, build, and erase whole transaction elements.
//!
//! Flow on install: payload bytes → [`cpio`] codec → [`fsm`] (consulting
//! [`fileinfo::FileInfo`]) → filesystem, driven one archive entry at a
//! time by [`driver::install_archive`].

pub mod context;
pub mod cpio;
pub mod digest;
pub mod driver;
pub mod fileinfo;
pub mod fsm;
pub mod fsops;
pub mod hardlink;
pub mod stream;
pub mod verify;

pub use context::{IdResolver, MapFlags, ProgressEvent, ProgressSink, TransFlags, TransactionContext};
pub use cpio::FileStat;
pub use digest::{DigestAlgo, DigestCtx};
pub use driver::{build_archive, erase_element, install_archive};
pub use fileinfo::{ElementKind, FileAction, FileInfo, FileState};
pub use fsops::{FsOps, NativeFs};
pub use stream::{PayloadReader, PayloadWriter};
