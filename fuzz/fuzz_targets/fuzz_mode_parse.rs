//! Fuzz target for mode and status parsing.
//!
//! Tests that `ReplicationMode` and `ReplicationStatus` parsing never panics
//! and that every accepted value prints back to a canonical form.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replication_orchestrator::{ReplicationMode, ReplicationStatus};

fuzz_target!(|data: &str| {
    if let Ok(mode) = data.parse::<ReplicationMode>() {
        assert_eq!(mode.as_str().parse::<ReplicationMode>().ok(), Some(mode));
    }
    if let Ok(status) = data.parse::<ReplicationStatus>() {
        assert_eq!(status.as_str().parse::<ReplicationStatus>().ok(), Some(status));
    }
});
