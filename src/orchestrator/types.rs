//! Orchestrator report types.

use crate::model::ConfigId;
use serde::Serialize;

/// Snapshot of the handle registry.
///
/// Built from in-process state only; producing it performs no I/O.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorHealth {
    /// Registered strategy handles (configs running in this process).
    pub active_jobs: usize,
    pub streaming_jobs: usize,
    pub logical_jobs: usize,
    pub physical_jobs: usize,
    /// Logical/physical jobs with a tick executing right now.
    pub ticks_in_progress: usize,
}

impl OrchestratorHealth {
    pub fn is_idle(&self) -> bool {
        self.active_jobs == 0
    }
}

/// Outcome of [`recover()`](super::ReplicationOrchestrator::recover).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Configs whose strategy was started again.
    pub restarted: Vec<ConfigId>,
    /// Configs whose restart failed, with the error text.
    pub failed: Vec<(ConfigId, String)>,
}

impl RecoveryReport {
    /// True when every candidate restarted.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.restarted.len() + self.failed.len()
    }
}
