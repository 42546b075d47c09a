//! # packust-header
//!
//! The self-describing tagged binary metadata format used for package
//! headers: an in-memory tag container with bit-exact load/unload to the
//! on-disk blob layout, locale-aware string lookup, and a small query
//! language that renders formatted text from header tags.
//!
//! The on-disk layout is `[i32 il][i32 dl][il × entry info][dl data]`,
//! all big-endian, optionally preceded by an 8-byte magic. Headers loaded
//! from disk may contain a leading *region* — a sealed sub-range of tags
//! emitted as one block — followed by *dribble* entries appended after the
//! region was sealed.

pub mod blob;
pub mod entry;
pub mod format;
pub mod header;
mod i18n;
pub mod tags;

pub use entry::{EntrySource, IndexEntry, TagData};
pub use format::{FormatValue, Formatters};
pub use header::{Header, HeaderIter, Magic};
pub use tags::{Tag, TagType};
