// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Streaming mode: per-event change application.
//!
//! Each table gets its own subscription and its own consumer task, so events
//! on one table are applied strictly in emission order while tables proceed
//! independently of each other.
//!
//! # Per-event flow
//!
//! ```text
//! recv(event) ─► start timer ─► TargetWriter::apply ─┬─ Ok  ─► sample(lag, 1/elapsed, encoded_len, lsn)
//!                                                    └─ Err ─► sample(error_count = 1)
//! ```
//!
//! A failed apply never stops the consumer; the next event is processed as
//! usual.

use super::check_lag;
use crate::capabilities::{ChangeEventSource, SubscriptionId, TargetWriter};
use crate::config::StreamingSettings;
use crate::error::{ReplicationError, Result};
use crate::event::ChangeEvent;
use crate::model::{ConfigId, MetricsSample, ReplicationConfig, ReplicationMode};
use crate::recorder::MetricsRecorder;
use crate::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Throughput denominator floor, so sub-millisecond applies don't divide by zero.
const MIN_ELAPSED_SECS: f64 = 0.001;

/// Starts streaming replication for a config.
#[derive(Clone)]
pub struct StreamingReplicator {
    source: Arc<dyn ChangeEventSource>,
    writer: Arc<dyn TargetWriter>,
    recorder: MetricsRecorder,
    settings: StreamingSettings,
    drain_timeout: Duration,
}

impl StreamingReplicator {
    pub fn new(
        source: Arc<dyn ChangeEventSource>,
        writer: Arc<dyn TargetWriter>,
        recorder: MetricsRecorder,
        settings: StreamingSettings,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            source,
            writer,
            recorder,
            settings,
            drain_timeout,
        }
    }

    /// Subscribe to every table and spawn one consumer per subscription.
    ///
    /// All-or-nothing: if any subscription fails, the ones already
    /// established are released and `SubscriptionFailure` is returned.
    pub async fn start(&self, config: &ReplicationConfig) -> Result<StreamingHandle> {
        let mut subscriptions = Vec::with_capacity(config.tables.len());

        for table in &config.tables {
            match self.source.subscribe(table).await {
                Ok(subscription) => {
                    debug!(config_id = %config.id, table = %table, subscription = %subscription.id, "Subscribed");
                    subscriptions.push(subscription);
                }
                Err(e) => {
                    error!(
                        config_id = %config.id,
                        table = %table,
                        error = %e,
                        established = subscriptions.len(),
                        "Subscription failed, releasing established subscriptions"
                    );
                    for established in &subscriptions {
                        if let Err(unsub_err) = self.source.unsubscribe(established.id).await {
                            warn!(
                                table = %established.table,
                                subscription = %established.id,
                                error = %unsub_err,
                                "Failed to release subscription"
                            );
                        }
                    }
                    return Err(ReplicationError::SubscriptionFailure {
                        table: table.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut subscription_ids = Vec::with_capacity(subscriptions.len());
        let mut tasks = Vec::with_capacity(subscriptions.len());

        for subscription in subscriptions {
            subscription_ids.push(subscription.id);

            let consumer = TableConsumer {
                config_id: config.id.clone(),
                table: subscription.table.clone(),
                lag_threshold_ms: config.lag_threshold_ms,
                warn_on_lag: self.settings.warn_on_lag,
                writer: Arc::clone(&self.writer),
                recorder: self.recorder.clone(),
            };
            let span = tracing::info_span!(
                "streaming",
                config_id = %config.id,
                table = %subscription.table
            );
            tasks.push(tokio::spawn(
                consumer
                    .run(subscription.events, shutdown_rx.clone())
                    .instrument(span),
            ));
        }

        info!(
            config_id = %config.id,
            tables = config.tables.len(),
            "Streaming replication started"
        );

        Ok(StreamingHandle {
            config_id: config.id.clone(),
            source: Arc::clone(&self.source),
            subscriptions: subscription_ids,
            shutdown_tx,
            tasks,
            drain_timeout: self.drain_timeout,
        })
    }
}

/// Running streaming replication for one config.
pub struct StreamingHandle {
    config_id: ConfigId,
    source: Arc<dyn ChangeEventSource>,
    subscriptions: Vec<SubscriptionId>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl StreamingHandle {
    pub fn subscription_ids(&self) -> &[SubscriptionId] {
        &self.subscriptions
    }

    /// Signal consumers, release subscriptions, then wait for in-flight
    /// applies (bounded by the drain timeout).
    pub async fn teardown(self) {
        let _ = self.shutdown_tx.send(true);

        for id in &self.subscriptions {
            if let Err(e) = self.source.unsubscribe(*id).await {
                warn!(config_id = %self.config_id, subscription = %id, error = %e, "Failed to unsubscribe");
            }
        }

        let tasks = self.tasks;
        let drain = async move {
            for task in tasks {
                if let Err(e) = task.await {
                    if e.is_panic() {
                        warn!(error = %e, "Streaming consumer panicked");
                    }
                }
            }
        };

        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            warn!(
                config_id = %self.config_id,
                timeout_ms = self.drain_timeout.as_millis() as u64,
                "Streaming consumers still applying after drain timeout, detaching"
            );
        }

        info!(
            config_id = %self.config_id,
            subscriptions = self.subscriptions.len(),
            "Streaming replication stopped"
        );
    }
}

/// Applies one table's events in order.
struct TableConsumer {
    config_id: ConfigId,
    table: String,
    lag_threshold_ms: u64,
    warn_on_lag: bool,
    writer: Arc<dyn TargetWriter>,
    recorder: MetricsRecorder,
}

impl TableConsumer {
    async fn run(
        self,
        mut events: mpsc::Receiver<ChangeEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let _ = shutdown_rx.borrow_and_update();
        debug!("Consumer started");

        loop {
            let event = tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        debug!("Shutdown signal received, consumer stopping");
                        break;
                    }
                    continue;
                }

                maybe_event = events.recv() => match maybe_event {
                    Some(event) => event,
                    None => {
                        debug!("Subscription channel closed, consumer stopping");
                        break;
                    }
                },
            };

            // Not raced against shutdown: an apply that has started runs to completion.
            self.process(&event).await;
        }
    }

    async fn process(&self, event: &ChangeEvent) {
        let started = Instant::now();
        let result = self.writer.apply(&self.table, event).await;
        let elapsed = started.elapsed();

        let sample = match result {
            Ok(()) => {
                let lag_ms = elapsed.as_millis() as u64;
                let throughput = 1.0 / elapsed.as_secs_f64().max(MIN_ELAPSED_SECS);
                telemetry::record_event_applied(&self.table, elapsed);
                check_lag(
                    &self.config_id,
                    ReplicationMode::Streaming,
                    lag_ms,
                    self.lag_threshold_ms,
                    self.warn_on_lag,
                );
                MetricsSample::success(lag_ms, throughput, event.encoded_len())
                    .with_lsn(event.lsn.clone())
            }
            Err(e) => {
                warn!(kind = %event.kind, lsn = ?event.lsn, error = %e, "Apply failed");
                telemetry::record_event_failed(&self.table);
                MetricsSample::failure(ReplicationError::ApplyFailure {
                    table: self.table.clone(),
                    message: e.to_string(),
                })
            }
        };

        let sample = sample
            .with_meta("table", self.table.as_str())
            .with_meta("operation", event.kind.as_str());
        self.recorder.append(&self.config_id, sample).await;
    }
}
