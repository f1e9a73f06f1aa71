//! In-memory store.

use super::{ConfigStore, MetricsStore, StoreFuture};
use crate::error::ReplicationError;
use crate::model::{ConfigId, ConfigPatch, ReplicationConfig, ReplicationMetrics};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;

/// Process-local [`ConfigStore`] + [`MetricsStore`].
#[derive(Default)]
pub struct InMemoryStore {
    configs: DashMap<ConfigId, ReplicationConfig>,
    metrics: RwLock<Vec<ReplicationMetrics>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every metrics row recorded so far, in insertion order.
    pub async fn all_metrics(&self) -> Vec<ReplicationMetrics> {
        self.metrics.read().await.clone()
    }

    /// Metrics rows for one config, in insertion order.
    pub async fn metrics_for(&self, config_id: &ConfigId) -> Vec<ReplicationMetrics> {
        self.metrics
            .read()
            .await
            .iter()
            .filter(|m| &m.config_id == config_id)
            .cloned()
            .collect()
    }

    pub fn config_count(&self) -> usize {
        self.configs.len()
    }
}

impl ConfigStore for InMemoryStore {
    fn get<'a>(&'a self, id: &'a ConfigId) -> StoreFuture<'a, Option<ReplicationConfig>> {
        Box::pin(async move { Ok(self.configs.get(id).map(|r| r.value().clone())) })
    }

    fn list(&self) -> StoreFuture<'_, Vec<ReplicationConfig>> {
        Box::pin(async move { Ok(self.configs.iter().map(|r| r.value().clone()).collect()) })
    }

    fn insert(&self, config: ReplicationConfig) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            match self.configs.entry(config.id.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => Err(ReplicationError::Store(
                    format!("config {} already exists", config.id),
                )),
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(config);
                    Ok(())
                }
            }
        })
    }

    fn update<'a>(
        &'a self,
        id: &'a ConfigId,
        patch: ConfigPatch,
    ) -> StoreFuture<'a, Option<ReplicationConfig>> {
        Box::pin(async move {
            Ok(self.configs.get_mut(id).map(|mut entry| {
                entry.apply_patch(patch);
                entry.clone()
            }))
        })
    }
}

impl MetricsStore for InMemoryStore {
    fn insert(&self, metrics: ReplicationMetrics) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.metrics.write().await.push(metrics);
            Ok(())
        })
    }

    fn query<'a>(
        &'a self,
        config_id: &'a ConfigId,
        since: DateTime<Utc>,
    ) -> StoreFuture<'a, Vec<ReplicationMetrics>> {
        Box::pin(async move {
            let mut rows: Vec<_> = self
                .metrics
                .read()
                .await
                .iter()
                .filter(|m| &m.config_id == config_id && m.timestamp >= since)
                .cloned()
                .collect();
            rows.sort_by_key(|m| m.timestamp);
            Ok(rows)
        })
    }
}
