//! # packust-common
//!
//! Shared error taxonomy and foundational constants used across the
//! Packust workspace.
//!
//! This crate is the leaf of the dependency graph — it depends on no other
//! internal crate and provides the primitives that all other crates build
//! upon.

pub mod error;

pub use error::{Error, ErrorKind, Result};
