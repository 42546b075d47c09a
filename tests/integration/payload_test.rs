//! Integration tests for the payload engine.
//!
//! These tests are implemented in:
//! `crates/packust-payload/tests/install_test.rs`
//!
//! Covered scenarios:
//! - `pipeline_one_file_install`: one entry extracted with attributes
//! - `pipeline_hard_links_share_an_inode`: deferred link placement
//! - `pipeline_backup_action_preserves_the_old_file`: backup suffixes
//! - `pipeline_undo_on_mid_stream_write_failure`: per-entry rollback
//! - `pipeline_erase_removes_in_reverse_and_saves_backups`: erase order
//! - `pipeline_build_then_install_round_trip`: archive round trip
