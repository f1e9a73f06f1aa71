// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Logical mode: periodic batch sync of changed rows.
//!
//! Every `logical.interval` one tick walks the config's tables in order:
//!
//! 1. Read up to `batch_size` rows changed since
//!    `min(watermark, tick_start - lookback)`
//! 2. Apply them as one batch
//! 3. Record one metrics sample for the table and advance its watermark
//!
//! A failing table records an error sample, keeps its watermark, and the tick
//! moves on to the next table. A full page (`batch_size` rows) means the
//! backlog may not be drained, so the watermark is pinned at the window start
//! the page was read from and the next tick reads from there again. Ticks
//! never overlap (see [`crate::ticker`]).
//!
//! Delivery is at-least-once: the lookback window deliberately re-reads rows
//! near the previous tick boundary and the writer's upsert absorbs them.

use super::check_lag;
use crate::capabilities::{SourceReader, TargetWriter};
use crate::config::LogicalSettings;
use crate::event::batch_encoded_len;
use crate::model::{ConfigId, MetricsSample, ReplicationConfig, ReplicationMode};
use crate::recorder::MetricsRecorder;
use crate::telemetry;
use crate::ticker::{spawn_ticker, TickerHandle};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Starts logical sync for a config.
#[derive(Clone)]
pub struct LogicalSyncer {
    reader: Arc<dyn SourceReader>,
    writer: Arc<dyn TargetWriter>,
    recorder: MetricsRecorder,
    settings: LogicalSettings,
    drain_timeout: Duration,
}

impl LogicalSyncer {
    pub fn new(
        reader: Arc<dyn SourceReader>,
        writer: Arc<dyn TargetWriter>,
        recorder: MetricsRecorder,
        settings: LogicalSettings,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            reader,
            writer,
            recorder,
            settings,
            drain_timeout,
        }
    }

    /// Spawn the recurring sync tick. The first tick runs one interval from now.
    pub fn start(&self, config: &ReplicationConfig) -> TickerHandle {
        let interval = self.settings.interval_duration();
        let lookback = self.settings.lookback_duration();

        let job = Arc::new(LogicalJob {
            config_id: config.id.clone(),
            tables: config.tables.clone(),
            lag_threshold_ms: config.lag_threshold_ms,
            reader: Arc::clone(&self.reader),
            writer: Arc::clone(&self.writer),
            recorder: self.recorder.clone(),
            batch_size: self.settings.batch_size,
            nominal_lag_ms: self.settings.nominal_batch_lag_ms,
            lookback: chrono::Duration::from_std(lookback).unwrap_or_else(|_| chrono::Duration::zero()),
            watermarks: Mutex::new(HashMap::new()),
        });

        info!(
            config_id = %config.id,
            tables = config.tables.len(),
            interval_ms = interval.as_millis() as u64,
            lookback_ms = lookback.as_millis() as u64,
            batch_size = self.settings.batch_size,
            "Logical sync started"
        );

        let span = tracing::info_span!("logical_sync", config_id = %config.id);
        spawn_ticker("logical_sync", interval, self.drain_timeout, span, move || {
            let job = Arc::clone(&job);
            async move { job.run_tick().await }
        })
    }
}

/// Outcome of syncing one table within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableOutcome {
    Applied(usize),
    Empty,
    Failed,
}

struct LogicalJob {
    config_id: ConfigId,
    tables: Vec<String>,
    lag_threshold_ms: u64,
    reader: Arc<dyn SourceReader>,
    writer: Arc<dyn TargetWriter>,
    recorder: MetricsRecorder,
    batch_size: usize,
    nominal_lag_ms: u64,
    lookback: chrono::Duration,
    /// Last successful tick start per table.
    watermarks: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl LogicalJob {
    async fn run_tick(&self) {
        let tick_start = Utc::now();
        let window_floor = tick_start - self.lookback;
        let mut watermarks = self.watermarks.lock().await;

        let mut applied = 0usize;
        let mut failed = 0usize;

        for table in &self.tables {
            let since = watermarks
                .get(table)
                .map_or(window_floor, |watermark| (*watermark).min(window_floor));

            match self.sync_table(table, since).await {
                TableOutcome::Applied(rows) if rows >= self.batch_size => {
                    applied += rows;
                    debug!(table = %table, rows, %since, "Full page, holding watermark for backlog");
                    watermarks.insert(table.clone(), since);
                }
                TableOutcome::Applied(rows) => {
                    applied += rows;
                    watermarks.insert(table.clone(), tick_start);
                }
                TableOutcome::Empty => {
                    watermarks.insert(table.clone(), tick_start);
                }
                TableOutcome::Failed => failed += 1,
            }
        }

        debug!(rows_applied = applied, tables_failed = failed, "Logical sync tick complete");
    }

    async fn sync_table(&self, table: &str, since: DateTime<Utc>) -> TableOutcome {
        let rows = match self.reader.changed_rows(table, since, self.batch_size).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(table = %table, %since, error = %e, "Changed-rows query failed");
                telemetry::record_batch_failed(table);
                let sample = MetricsSample::failure(format!("query failed for table {}: {}", table, e))
                    .with_meta("table", table)
                    .with_meta("phase", "query");
                self.recorder.append(&self.config_id, sample).await;
                return TableOutcome::Failed;
            }
        };

        if rows.is_empty() {
            debug!(table = %table, %since, "No changed rows");
            return TableOutcome::Empty;
        }

        if let Err(e) = self.writer.apply_batch(table, &rows).await {
            warn!(table = %table, rows = rows.len(), error = %e, "Batch apply failed");
            telemetry::record_batch_failed(table);
            let sample = MetricsSample::failure(format!("apply failed for table {}: {}", table, e))
                .with_meta("table", table)
                .with_meta("phase", "apply")
                .with_meta("rows", rows.len());
            self.recorder.append(&self.config_id, sample).await;
            return TableOutcome::Failed;
        }

        let count = rows.len();
        telemetry::record_batch_applied(table, count);
        check_lag(
            &self.config_id,
            ReplicationMode::Logical,
            self.nominal_lag_ms,
            self.lag_threshold_ms,
            true,
        );

        let sample = MetricsSample::success(self.nominal_lag_ms, count as f64, batch_encoded_len(&rows))
            .with_meta("table", table)
            .with_meta("rows", count);
        self.recorder.append(&self.config_id, sample).await;

        debug!(table = %table, rows = count, "Batch applied");
        TableOutcome::Applied(count)
    }
}
