// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Physical mode: passive health monitoring of a replication link.
//!
//! Replication itself happens below this crate (WAL shipping, block-level
//! copies). Every `physical.interval` the monitor samples the link through
//! the [`PhysicalHealthProbe`] and records exactly one metrics row, whether
//! the probe succeeded or not.

use super::check_lag;
use crate::capabilities::PhysicalHealthProbe;
use crate::config::PhysicalSettings;
use crate::error::ReplicationError;
use crate::model::{MetricsSample, ReplicationConfig, ReplicationMode};
use crate::recorder::MetricsRecorder;
use crate::telemetry;
use crate::ticker::{spawn_ticker, TickerHandle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Starts link monitoring for a config.
#[derive(Clone)]
pub struct PhysicalMonitor {
    probe: Arc<dyn PhysicalHealthProbe>,
    recorder: MetricsRecorder,
    settings: PhysicalSettings,
    drain_timeout: Duration,
}

impl PhysicalMonitor {
    pub fn new(
        probe: Arc<dyn PhysicalHealthProbe>,
        recorder: MetricsRecorder,
        settings: PhysicalSettings,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            probe,
            recorder,
            settings,
            drain_timeout,
        }
    }

    pub fn start(&self, config: &ReplicationConfig) -> TickerHandle {
        let interval = self.settings.interval_duration();
        let job = Arc::new(PhysicalJob {
            config: config.clone(),
            probe: Arc::clone(&self.probe),
            recorder: self.recorder.clone(),
        });

        info!(
            config_id = %config.id,
            interval_ms = interval.as_millis() as u64,
            "Physical monitoring started"
        );

        let span = tracing::info_span!("physical_monitor", config_id = %config.id);
        spawn_ticker("physical_monitor", interval, self.drain_timeout, span, move || {
            let job = Arc::clone(&job);
            async move { job.run_tick().await }
        })
    }
}

struct PhysicalJob {
    /// Snapshot taken at start; config edits apply on the next start.
    config: ReplicationConfig,
    probe: Arc<dyn PhysicalHealthProbe>,
    recorder: MetricsRecorder,
}

impl PhysicalJob {
    async fn run_tick(&self) {
        let sample = match self.probe.sample(&self.config).await {
            Ok(health) => {
                telemetry::record_probe_sample(true);
                debug!(
                    lag_ms = health.lag_ms,
                    throughput = health.throughput,
                    bytes = health.bytes,
                    errors = health.error_count,
                    "Link health sampled"
                );
                check_lag(
                    &self.config.id,
                    ReplicationMode::Physical,
                    health.lag_ms,
                    self.config.lag_threshold_ms,
                    true,
                );
                let mut sample = MetricsSample::success(health.lag_ms, health.throughput, health.bytes)
                    .with_lsn(health.last_lsn);
                sample.error_count = health.error_count;
                sample
            }
            Err(e) => {
                warn!(error = %e, "Health probe failed");
                telemetry::record_probe_sample(false);
                MetricsSample::failure(ReplicationError::ProbeFailure(e.to_string()))
            }
        };

        self.recorder.append(&self.config.id, sample).await;
    }
}
