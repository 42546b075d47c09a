//! Integration tests for the header engine.
//!
//! These tests are implemented in:
//! `crates/packust-header/src/` (inline `#[cfg(test)]` modules)
//!
//! Covered scenarios:
//! - Blob load/unload round trips, legacy and sealed regions
//! - Dribble override of sealed region entries
//! - Hard limits on index length, data length, and alignment
//! - Locale fallback order and weak-match deferral
//! - Format language compilation, array iteration, and XML framing
