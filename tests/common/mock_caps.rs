//! Mock capabilities for testing.
//!
//! Each mock records the calls it receives and can be scripted to fail or to
//! be slow, so tests can assert on exactly what the orchestrator asked for.

use chrono::{DateTime, Utc};
use replication_orchestrator::capabilities::{
    BoxFuture, CapabilityError, ChangeEventSource, ChannelChangeSource, PhysicalHealthProbe,
    SourceReader, Subscription, SubscriptionId, TargetWriter,
};
use replication_orchestrator::store::{MetricsStore, StoreFuture};
use replication_orchestrator::{
    ChangeEvent, ConfigId, HealthSample, ReplicationConfig, ReplicationError, ReplicationMetrics, Row,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Row field that makes [`ScriptedWriter`] fail an apply.
pub const POISON_FIELD: &str = "__poison";

// =============================================================================
// RecordingSource
// =============================================================================

/// Channel-backed source that records every subscribe/unsubscribe.
pub struct RecordingSource {
    inner: ChannelChangeSource,
    fail_on: Mutex<Option<String>>,
    subscribed: Mutex<Vec<(String, SubscriptionId)>>,
    unsubscribed: Mutex<Vec<SubscriptionId>>,
}

impl RecordingSource {
    pub fn new() -> Self {
        Self {
            inner: ChannelChangeSource::new(),
            fail_on: Mutex::new(None),
            subscribed: Mutex::new(Vec::new()),
            unsubscribed: Mutex::new(Vec::new()),
        }
    }

    /// Make every future subscribe() for `table` fail.
    pub fn fail_on(&self, table: &str) {
        *self.fail_on.lock().unwrap() = Some(table.to_string());
    }

    pub fn clear_failure(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    pub async fn publish(&self, event: ChangeEvent) -> usize {
        self.inner.publish(event).await
    }

    /// Successful subscriptions, in order.
    pub fn subscribed(&self) -> Vec<(String, SubscriptionId)> {
        self.subscribed.lock().unwrap().clone()
    }

    pub fn unsubscribed(&self) -> Vec<SubscriptionId> {
        self.unsubscribed.lock().unwrap().clone()
    }

    /// Subscriptions currently open.
    pub fn live(&self) -> usize {
        self.inner.subscriber_count()
    }
}

impl ChangeEventSource for RecordingSource {
    fn subscribe<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Subscription> {
        Box::pin(async move {
            if self.fail_on.lock().unwrap().as_deref() == Some(table) {
                return Err(CapabilityError::new(format!("permission denied for table {}", table)));
            }
            let subscription = self.inner.subscribe(table).await?;
            self.subscribed
                .lock()
                .unwrap()
                .push((table.to_string(), subscription.id));
            Ok(subscription)
        })
    }

    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.unsubscribed.lock().unwrap().push(id);
            self.inner.unsubscribe(id).await
        })
    }
}

// =============================================================================
// ScriptedWriter
// =============================================================================

/// Writer with configurable latency that fails poisoned rows.
pub struct ScriptedWriter {
    apply_delay: Duration,
    batch_delay: Duration,
    /// When set, apply() never completes.
    hang: AtomicBool,
    fail_batches_for: Mutex<Vec<String>>,
    applied: Mutex<Vec<(String, ChangeEvent)>>,
    batches: Mutex<Vec<(String, usize)>>,
    batch_in_flight: AtomicUsize,
    max_batch_in_flight: AtomicUsize,
}

impl ScriptedWriter {
    pub fn new() -> Self {
        Self {
            apply_delay: Duration::ZERO,
            batch_delay: Duration::ZERO,
            hang: AtomicBool::new(false),
            fail_batches_for: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            batch_in_flight: AtomicUsize::new(0),
            max_batch_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = delay;
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn hanging() -> Self {
        let writer = Self::new();
        writer.hang.store(true, Ordering::SeqCst);
        writer
    }

    pub fn fail_batches_for(&self, table: &str) {
        self.fail_batches_for.lock().unwrap().push(table.to_string());
    }

    /// Successfully applied events, in apply order.
    pub fn applied(&self) -> Vec<(String, ChangeEvent)> {
        self.applied.lock().unwrap().clone()
    }

    pub fn batches(&self) -> Vec<(String, usize)> {
        self.batches.lock().unwrap().clone()
    }

    pub fn max_batch_concurrency(&self) -> usize {
        self.max_batch_in_flight.load(Ordering::SeqCst)
    }
}

impl TargetWriter for ScriptedWriter {
    fn apply<'a>(&'a self, table: &'a str, event: &'a ChangeEvent) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if !self.apply_delay.is_zero() {
                tokio::time::sleep(self.apply_delay).await;
            }
            if event.row.contains_key(POISON_FIELD) {
                return Err(CapabilityError::new("duplicate key violates unique constraint"));
            }
            self.applied
                .lock()
                .unwrap()
                .push((table.to_string(), event.clone()));
            Ok(())
        })
    }

    fn apply_batch<'a>(&'a self, table: &'a str, rows: &'a [Row]) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let now = self.batch_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_batch_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
            self.batch_in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_batches_for.lock().unwrap().iter().any(|t| t == table) {
                return Err(CapabilityError::new("target rejected batch"));
            }
            self.batches.lock().unwrap().push((table.to_string(), rows.len()));
            Ok(())
        })
    }
}

// =============================================================================
// ScriptedReader
// =============================================================================

/// Reader serving a fixed row count per table.
pub struct ScriptedReader {
    rows: Mutex<HashMap<String, usize>>,
    failing: Mutex<Vec<String>>,
    calls: Mutex<Vec<(String, DateTime<Utc>, usize)>>,
}

impl ScriptedReader {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            failing: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_rows(&self, table: &str, count: usize) {
        self.rows.lock().unwrap().insert(table.to_string(), count);
    }

    pub fn fail_table(&self, table: &str) {
        self.failing.lock().unwrap().push(table.to_string());
    }

    pub fn calls(&self) -> Vec<(String, DateTime<Utc>, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

impl SourceReader for ScriptedReader {
    fn changed_rows<'a>(
        &'a self,
        table: &'a str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'a, Vec<Row>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push((table.to_string(), since, limit));
            if self.failing.lock().unwrap().iter().any(|t| t == table) {
                return Err(CapabilityError::new(format!("relation \"{}\" does not exist", table)));
            }
            let count = self.rows.lock().unwrap().get(table).copied().unwrap_or(0).min(limit);
            Ok((0..count as i64).map(super::row).collect())
        })
    }
}

// =============================================================================
// ScriptedProbe
// =============================================================================

/// Probe that fails every `fail_every`-th sample (1-based), if set.
pub struct ScriptedProbe {
    calls: AtomicUsize,
    fail_every: AtomicUsize,
    lag_ms: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_every: AtomicUsize::new(0),
            lag_ms: AtomicUsize::new(25),
        }
    }

    pub fn fail_every(&self, n: usize) {
        self.fail_every.store(n, Ordering::SeqCst);
    }

    pub fn set_lag_ms(&self, lag: usize) {
        self.lag_ms.store(lag, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PhysicalHealthProbe for ScriptedProbe {
    fn sample<'a>(&'a self, _config: &'a ReplicationConfig) -> BoxFuture<'a, HealthSample> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let fail_every = self.fail_every.load(Ordering::SeqCst);
            if fail_every > 0 && n % fail_every == 0 {
                return Err(CapabilityError::new("could not connect to standby"));
            }
            Ok(HealthSample {
                lag_ms: self.lag_ms.load(Ordering::SeqCst) as u64,
                throughput: 120.0,
                bytes: 8192,
                error_count: 0,
                last_lsn: Some(format!("0/{:X}", n * 0x100)),
            })
        })
    }
}

// =============================================================================
// FailingMetricsStore
// =============================================================================

/// Metrics store whose inserts always fail.
#[derive(Default)]
pub struct FailingMetricsStore {
    attempts: AtomicUsize,
}

impl FailingMetricsStore {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl MetricsStore for FailingMetricsStore {
    fn insert(&self, _metrics: ReplicationMetrics) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ReplicationError::Store("metrics database unavailable".to_string()))
        })
    }

    fn query<'a>(
        &'a self,
        _config_id: &'a ConfigId,
        _since: DateTime<Utc>,
    ) -> StoreFuture<'a, Vec<ReplicationMetrics>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}
