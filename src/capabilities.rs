// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Capability traits supplied by the host application.
//!
//! The orchestrator never talks to a database directly. It is handed
//! implementations of these traits and drives them:
//!
//! - [`ChangeEventSource`]: per-table change subscriptions (streaming mode)
//! - [`SourceReader`]: rows changed since a watermark (logical mode)
//! - [`TargetWriter`]: applies events and batches to the target
//! - [`PhysicalHealthProbe`]: samples a physical replication link
//!
//! Every method returns a boxed future so the traits stay object safe and can
//! be held as `Arc<dyn Trait>`.
//!
//! # Example
//!
//! ```rust,no_run
//! use replication_orchestrator::capabilities::{BoxFuture, TargetWriter};
//! use replication_orchestrator::event::{ChangeEvent, Row};
//!
//! struct PrintWriter;
//!
//! impl TargetWriter for PrintWriter {
//!     fn apply<'a>(&'a self, table: &'a str, event: &'a ChangeEvent) -> BoxFuture<'a, ()> {
//!         Box::pin(async move {
//!             println!("{} {}", event.kind, table);
//!             Ok(())
//!         })
//!     }
//!
//!     fn apply_batch<'a>(&'a self, table: &'a str, rows: &'a [Row]) -> BoxFuture<'a, ()> {
//!         Box::pin(async move {
//!             println!("{} rows into {}", rows.len(), table);
//!             Ok(())
//!         })
//!     }
//! }
//! ```

use crate::event::{ChangeEvent, HealthSample, Row};
use crate::model::ReplicationConfig;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Result type for capability calls.
pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = CapabilityResult<T>> + Send + 'a>>;

/// Simplified error for capability calls.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct CapabilityError(pub String);

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Handle identifying one established subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// An established per-table subscription.
///
/// Events arrive on `events` in source-emission order. The channel closes
/// when the source drops its sender (for example after `unsubscribe`).
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub table: String,
    pub events: mpsc::Receiver<ChangeEvent>,
}

/// Per-table change notifications (streaming mode).
pub trait ChangeEventSource: Send + Sync + 'static {
    /// Subscribe to INSERT/UPDATE/DELETE notifications for `table`.
    fn subscribe<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Subscription>;

    /// Release a subscription. Unknown ids are not an error.
    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'_, ()>;
}

/// Incremental reads from the source (logical mode).
pub trait SourceReader: Send + Sync + 'static {
    /// Rows of `table` changed at or after `since`, at most `limit` of them.
    fn changed_rows<'a>(
        &'a self,
        table: &'a str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'a, Vec<Row>>;
}

/// Applies changes to a target store.
///
/// Both methods must be idempotent: delivery is at-least-once.
pub trait TargetWriter: Send + Sync + 'static {
    /// Apply one event: INSERT/UPDATE as upsert-by-key, DELETE as remove-by-key.
    fn apply<'a>(&'a self, table: &'a str, event: &'a ChangeEvent) -> BoxFuture<'a, ()>;

    /// Upsert a batch of rows.
    fn apply_batch<'a>(&'a self, table: &'a str, rows: &'a [Row]) -> BoxFuture<'a, ()>;
}

/// Samples a physical replication link (physical mode).
pub trait PhysicalHealthProbe: Send + Sync + 'static {
    fn sample<'a>(&'a self, config: &'a ReplicationConfig) -> BoxFuture<'a, HealthSample>;
}

/// The set of capabilities the strategies are built from.
#[derive(Clone)]
pub struct Capabilities {
    pub source: Arc<dyn ChangeEventSource>,
    pub reader: Arc<dyn SourceReader>,
    pub writer: Arc<dyn TargetWriter>,
    pub probe: Arc<dyn PhysicalHealthProbe>,
}

impl Capabilities {
    pub fn new(
        source: Arc<dyn ChangeEventSource>,
        reader: Arc<dyn SourceReader>,
        writer: Arc<dyn TargetWriter>,
        probe: Arc<dyn PhysicalHealthProbe>,
    ) -> Self {
        Self {
            source,
            reader,
            writer,
            probe,
        }
    }

    /// Log-only capabilities around an in-process channel source.
    pub fn no_op() -> Self {
        Self::new(
            Arc::new(ChannelChangeSource::new()),
            Arc::new(NoOpSourceReader),
            Arc::new(NoOpTargetWriter),
            Arc::new(NoOpHealthProbe),
        )
    }
}

/// Default buffer per subscription channel.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// In-process change source: the host publishes events, subscribers receive
/// them per table.
pub struct ChannelChangeSource {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: DashMap<SubscriptionId, (String, mpsc::Sender<ChangeEvent>)>,
}

impl Default for ChannelChangeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelChangeSource {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            subscribers: DashMap::new(),
        }
    }

    /// Deliver an event to every subscriber of `event.table`.
    ///
    /// Waits for channel capacity. Returns the number of subscribers reached.
    pub async fn publish(&self, event: ChangeEvent) -> usize {
        // Collect senders first; no map guard may be held across an await.
        let senders: Vec<_> = self
            .subscribers
            .iter()
            .filter(|entry| entry.value().0 == event.table)
            .map(|entry| entry.value().1.clone())
            .collect();

        let mut delivered = 0;
        for sender in senders {
            if sender.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl ChangeEventSource for ChannelChangeSource {
    fn subscribe<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Subscription> {
        Box::pin(async move {
            let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
            let (tx, rx) = mpsc::channel(self.capacity);
            self.subscribers.insert(id, (table.to_string(), tx));
            tracing::debug!(table = %table, subscription = %id, "Channel subscription opened");
            Ok(Subscription {
                id,
                table: table.to_string(),
                events: rx,
            })
        })
    }

    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.subscribers.remove(&id).is_some() {
                tracing::debug!(subscription = %id, "Channel subscription closed");
            }
            Ok(())
        })
    }
}

/// Reader that never reports changes.
#[derive(Clone)]
pub struct NoOpSourceReader;

impl SourceReader for NoOpSourceReader {
    fn changed_rows<'a>(
        &'a self,
        table: &'a str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'a, Vec<Row>> {
        Box::pin(async move {
            tracing::trace!(table = %table, %since, limit, "NoOp: no changed rows");
            Ok(Vec::new())
        })
    }
}

/// Writer that logs and discards.
#[derive(Clone)]
pub struct NoOpTargetWriter;

impl TargetWriter for NoOpTargetWriter {
    fn apply<'a>(&'a self, table: &'a str, event: &'a ChangeEvent) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let action = if event.kind.is_upsert() { "upsert" } else { "delete" };
            tracing::debug!(
                table = %table,
                kind = %event.kind,
                action,
                key = ?event.key_row(),
                "NoOp: would apply event"
            );
            Ok(())
        })
    }

    fn apply_batch<'a>(&'a self, table: &'a str, rows: &'a [Row]) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tracing::debug!(table = %table, rows = rows.len(), "NoOp: would apply batch");
            Ok(())
        })
    }
}

/// Probe that reports an idle, healthy link.
#[derive(Clone)]
pub struct NoOpHealthProbe;

impl PhysicalHealthProbe for NoOpHealthProbe {
    fn sample<'a>(&'a self, config: &'a ReplicationConfig) -> BoxFuture<'a, HealthSample> {
        Box::pin(async move {
            tracing::trace!(config_id = %config.id, "NoOp: idle health sample");
            Ok(HealthSample::default())
        })
    }
}
