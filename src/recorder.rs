// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Best-effort metrics persistence and summaries.
//!
//! Strategies hand every measurement to [`MetricsRecorder::append`]. A store
//! failure is logged and counted, never returned: replication keeps going
//! whether or not its bookkeeping lands.

use crate::model::{ConfigId, LagStatus, MetricsSample, ReplicationMetrics};
use crate::store::MetricsStore;
use crate::telemetry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{trace, warn};

/// Appends [`ReplicationMetrics`] rows to a [`MetricsStore`].
#[derive(Clone)]
pub struct MetricsRecorder {
    store: Arc<dyn MetricsStore>,
}

impl MetricsRecorder {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    /// Stamp `sample` with a fresh id and timestamp and persist it.
    ///
    /// Returns `true` if the row was stored.
    pub async fn append(&self, config_id: &ConfigId, sample: MetricsSample) -> bool {
        let row = ReplicationMetrics::from_sample(config_id.clone(), sample);
        let row_id = row.id.clone();

        match self.store.insert(row).await {
            Ok(()) => {
                trace!(config_id = %config_id, metrics_id = %row_id, "Recorded metrics sample");
                true
            }
            Err(e) => {
                warn!(
                    config_id = %config_id,
                    metrics_id = %row_id,
                    error = %e,
                    "Failed to persist metrics sample"
                );
                telemetry::record_metrics_persist_failure();
                false
            }
        }
    }
}

/// Aggregate view over a window of metrics rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Rows in the window.
    pub samples: usize,
    /// Rows with `error_count > 0`.
    pub error_samples: usize,
    /// `error_samples / samples`, 0 for an empty window.
    pub error_rate: f64,
    /// Mean lag over successful rows.
    pub avg_lag_ms: f64,
    pub max_lag_ms: u64,
    pub total_bytes: u64,
    /// Mean throughput over successful rows.
    pub avg_throughput: f64,
    /// Successful rows whose lag exceeded the threshold.
    pub samples_over_threshold: usize,
    /// Classification of the most recent successful row.
    pub lag_status: LagStatus,
    pub last_processed_lsn: Option<String>,
}

impl MetricsSummary {
    /// Summarize `rows` (oldest first) against an advisory lag threshold.
    pub fn from_samples(rows: &[ReplicationMetrics], lag_threshold_ms: u64) -> Self {
        let mut summary = Self {
            samples: rows.len(),
            ..Default::default()
        };
        if rows.is_empty() {
            return summary;
        }

        let mut ok_rows = 0usize;
        let mut lag_sum = 0u128;
        let mut throughput_sum = 0.0;
        let mut last_ok_lag = None;

        for row in rows {
            summary.total_bytes = summary.total_bytes.saturating_add(row.bytes_replicated);
            if row.is_error() {
                summary.error_samples += 1;
                continue;
            }
            ok_rows += 1;
            lag_sum += u128::from(row.lag_ms);
            throughput_sum += row.throughput_rows_per_second;
            summary.max_lag_ms = summary.max_lag_ms.max(row.lag_ms);
            if LagStatus::classify(row.lag_ms, lag_threshold_ms) == LagStatus::Lagging {
                summary.samples_over_threshold += 1;
            }
            last_ok_lag = Some(row.lag_ms);
            if row.last_processed_lsn.is_some() {
                summary.last_processed_lsn = row.last_processed_lsn.clone();
            }
        }

        summary.error_rate = summary.error_samples as f64 / summary.samples as f64;
        if ok_rows > 0 {
            summary.avg_lag_ms = lag_sum as f64 / ok_rows as f64;
            summary.avg_throughput = throughput_sum / ok_rows as f64;
        }
        if let Some(lag) = last_ok_lag {
            summary.lag_status = LagStatus::classify(lag, lag_threshold_ms);
        }
        summary
    }
}
