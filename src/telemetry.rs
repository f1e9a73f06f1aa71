//! Process telemetry for observability.
//!
//! Exports Prometheus-compatible metrics through the `metrics` facade for:
//! - Job lifecycle transitions and active job count
//! - Streaming event application
//! - Logical batch application and skipped ticks
//! - Physical probe samples
//! - Metrics-row persistence failures
//!
//! These are process-level counters for operators, distinct from the
//! per-config [`ReplicationMetrics`](crate::model::ReplicationMetrics) rows
//! written to the metrics store.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replication_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Gauge for number of registered strategy handles.
pub fn set_active_jobs(count: usize) {
    gauge!("replication_active_jobs").set(count as f64);
}

/// Record a config status transition made by the orchestrator.
pub fn record_job_transition(mode: &str, status: &str) {
    counter!(
        "replication_job_transitions_total",
        "mode" => mode.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a start() that failed during dispatch.
pub fn record_start_failure(mode: &str) {
    counter!("replication_start_failures_total", "mode" => mode.to_string()).increment(1);
}

/// Record a streaming event applied to the target.
pub fn record_event_applied(table: &str, duration: Duration) {
    counter!("replication_events_applied_total", "table" => table.to_string()).increment(1);
    histogram!("replication_event_apply_duration_seconds", "table" => table.to_string())
        .record(duration.as_secs_f64());
}

/// Record a streaming event whose apply failed.
pub fn record_event_failed(table: &str) {
    counter!("replication_events_failed_total", "table" => table.to_string()).increment(1);
}

/// Record a logical batch applied to the target.
pub fn record_batch_applied(table: &str, rows: usize) {
    counter!("replication_batches_applied_total", "table" => table.to_string()).increment(1);
    counter!("replication_batch_rows_total", "table" => table.to_string()).increment(rows as u64);
}

/// Record a logical batch whose query or apply failed.
pub fn record_batch_failed(table: &str) {
    counter!("replication_batches_failed_total", "table" => table.to_string()).increment(1);
}

/// Record a tick skipped because the previous one was still running.
pub fn record_tick_skipped(task: &str) {
    counter!("replication_ticks_skipped_total", "task" => task.to_string()).increment(1);
}

/// Record a completed tick and its duration.
pub fn record_tick_complete(task: &str, duration: Duration) {
    histogram!("replication_tick_duration_seconds", "task" => task.to_string())
        .record(duration.as_secs_f64());
}

/// Record a physical probe sample.
pub fn record_probe_sample(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("replication_probe_samples_total", "status" => status).increment(1);
}

/// Record a metrics row that could not be persisted.
pub fn record_metrics_persist_failure() {
    counter!("replication_metrics_persist_failures_total").increment(1);
}

/// Record an observed lag above the config's advisory threshold.
pub fn record_lag_threshold_exceeded(mode: &str) {
    counter!("replication_lag_threshold_exceeded_total", "mode" => mode.to_string()).increment(1);
}

/// Record a SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn record_store_retry(operation: &str) {
    counter!("replication_store_retries_total", "operation" => operation.to_string()).increment(1);
}
