// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication strategies.
//!
//! One strategy per [`ReplicationMode`]:
//!
//! | Mode | Strategy | Runs as |
//! |------|----------|---------|
//! | `streaming` | [`StreamingReplicator`] | one consumer task per table |
//! | `logical` | [`LogicalSyncer`] | non-overlapping tick every `logical.interval` |
//! | `physical` | [`PhysicalMonitor`] | non-overlapping tick every `physical.interval` |
//!
//! Starting a strategy yields a [`StrategyHandle`]. The orchestrator keeps
//! exactly one handle per active config and tears it down on stop, pause,
//! restart, or shutdown.

mod logical;
mod physical;
mod streaming;

pub use logical::LogicalSyncer;
pub use physical::PhysicalMonitor;
pub use streaming::{StreamingHandle, StreamingReplicator};

use crate::capabilities::Capabilities;
use crate::config::OrchestratorSettings;
use crate::error::Result;
use crate::model::{LagStatus, ReplicationConfig, ReplicationMode};
use crate::recorder::MetricsRecorder;
use crate::telemetry;
use crate::ticker::TickerHandle;
use tracing::warn;

/// Live resources of one running config.
pub enum StrategyHandle {
    Streaming(StreamingHandle),
    Logical(TickerHandle),
    Physical(TickerHandle),
}

impl StrategyHandle {
    pub fn mode(&self) -> ReplicationMode {
        match self {
            StrategyHandle::Streaming(_) => ReplicationMode::Streaming,
            StrategyHandle::Logical(_) => ReplicationMode::Logical,
            StrategyHandle::Physical(_) => ReplicationMode::Physical,
        }
    }

    /// Whether a logical/physical tick is executing. Always false for streaming.
    pub fn tick_in_progress(&self) -> bool {
        match self {
            StrategyHandle::Streaming(_) => false,
            StrategyHandle::Logical(handle) | StrategyHandle::Physical(handle) => {
                handle.tick_in_progress()
            }
        }
    }

    /// Release every subscription or timer the strategy holds.
    pub async fn teardown(self) {
        match self {
            StrategyHandle::Streaming(handle) => handle.teardown().await,
            StrategyHandle::Logical(handle) | StrategyHandle::Physical(handle) => {
                handle.teardown().await
            }
        }
    }
}

impl std::fmt::Debug for StrategyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StrategyHandle").field(&self.mode()).finish()
    }
}

/// The three strategies, built once from the orchestrator's capabilities.
#[derive(Clone)]
pub struct Strategies {
    pub streaming: StreamingReplicator,
    pub logical: LogicalSyncer,
    pub physical: PhysicalMonitor,
}

impl Strategies {
    pub fn new(
        capabilities: &Capabilities,
        recorder: MetricsRecorder,
        settings: &OrchestratorSettings,
    ) -> Self {
        let drain_timeout = settings.shutdown.drain_timeout_duration();
        Self {
            streaming: StreamingReplicator::new(
                capabilities.source.clone(),
                capabilities.writer.clone(),
                recorder.clone(),
                settings.streaming.clone(),
                drain_timeout,
            ),
            logical: LogicalSyncer::new(
                capabilities.reader.clone(),
                capabilities.writer.clone(),
                recorder.clone(),
                settings.logical.clone(),
                drain_timeout,
            ),
            physical: PhysicalMonitor::new(
                capabilities.probe.clone(),
                recorder,
                settings.physical.clone(),
                drain_timeout,
            ),
        }
    }

    /// Start the strategy matching `config.replication_mode`.
    pub async fn dispatch(&self, config: &ReplicationConfig) -> Result<StrategyHandle> {
        match config.replication_mode {
            ReplicationMode::Streaming => {
                self.streaming.start(config).await.map(StrategyHandle::Streaming)
            }
            ReplicationMode::Logical => Ok(StrategyHandle::Logical(self.logical.start(config))),
            ReplicationMode::Physical => Ok(StrategyHandle::Physical(self.physical.start(config))),
        }
    }
}

/// Count and optionally log a lag above the config's advisory threshold.
pub(crate) fn check_lag(
    config_id: &crate::model::ConfigId,
    mode: ReplicationMode,
    lag_ms: u64,
    lag_threshold_ms: u64,
    log: bool,
) {
    if LagStatus::classify(lag_ms, lag_threshold_ms) == LagStatus::Healthy {
        return;
    }
    telemetry::record_lag_threshold_exceeded(mode.as_str());
    if log {
        warn!(
            config_id = %config_id,
            lag_ms,
            lag_threshold_ms,
            "Replication lag above threshold"
        );
    }
}
