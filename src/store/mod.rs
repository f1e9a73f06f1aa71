//! Config and metrics persistence.
//!
//! The orchestrator depends only on the [`ConfigStore`] and [`MetricsStore`]
//! traits. Two implementations ship with the crate:
//!
//! - [`InMemoryStore`]: process-local, for tests and embedded use
//! - [`SqliteStore`]: durable, survives restarts (so `recover()` can resume
//!   jobs left active by a crashed process)

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::model::{ConfigId, ConfigPatch, ReplicationConfig, ReplicationMetrics};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Durable storage of replication configs.
pub trait ConfigStore: Send + Sync + 'static {
    /// Load one config. `Ok(None)` when the id is unknown.
    fn get<'a>(&'a self, id: &'a ConfigId) -> StoreFuture<'a, Option<ReplicationConfig>>;

    /// All configs, in no particular order.
    fn list(&self) -> StoreFuture<'_, Vec<ReplicationConfig>>;

    /// Persist a new config. Fails if the id already exists.
    fn insert(&self, config: ReplicationConfig) -> StoreFuture<'_, ()>;

    /// Merge `patch` into a stored config and return the result.
    /// `Ok(None)` when the id is unknown.
    fn update<'a>(
        &'a self,
        id: &'a ConfigId,
        patch: ConfigPatch,
    ) -> StoreFuture<'a, Option<ReplicationConfig>>;
}

/// Append-only storage of metrics samples.
pub trait MetricsStore: Send + Sync + 'static {
    fn insert(&self, metrics: ReplicationMetrics) -> StoreFuture<'_, ()>;

    /// Samples for `config_id` with `timestamp >= since`, oldest first.
    fn query<'a>(
        &'a self,
        config_id: &'a ConfigId,
        since: DateTime<Utc>,
    ) -> StoreFuture<'a, Vec<ReplicationMetrics>>;
}
