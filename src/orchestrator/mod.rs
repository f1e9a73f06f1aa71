// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication job lifecycle.
//!
//! The [`ReplicationOrchestrator`] ties together:
//! - Config persistence via [`ConfigStore`]
//! - Metrics persistence via [`MetricsStore`] and [`MetricsRecorder`]
//! - The three strategies in [`crate::strategy`]
//! - A process-local registry of running [`StrategyHandle`]s
//!
//! # Lifecycle
//!
//! ```text
//!             create_config()
//!                   │
//!                   ▼
//!               Pending ──start() ok──► Active ──stop()──► Stopped
//!                   │                    │  │                 │
//!         start() fails                  │  └──pause()──► Paused
//!                   ▼                    │                    │
//!                 Error ◄─start() fails──┘                    │
//!                   │                                         │
//!                   └──────────── start() ◄───────────────────┘
//! ```
//!
//! The orchestrator is the only writer of `status` and the only owner of the
//! registry. While a config is `active` in this process, exactly one handle
//! is registered for it. A process that dies leaves `active` rows behind;
//! [`recover()`](ReplicationOrchestrator::recover) starts them again.

mod types;

pub use types::{OrchestratorHealth, RecoveryReport};

use crate::capabilities::Capabilities;
use crate::config::OrchestratorSettings;
use crate::error::{ReplicationError, Result};
use crate::model::{
    ConfigId, ConfigPatch, ConfigUpdate, NewReplicationConfig, ReplicationConfig,
    ReplicationMetrics, ReplicationMode, ReplicationStatus,
};
use crate::recorder::{MetricsRecorder, MetricsSummary};
use crate::store::{ConfigStore, MetricsStore, SqliteStore};
use crate::strategy::{StrategyHandle, Strategies};
use crate::telemetry;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Manages replication configs and their running strategies.
pub struct ReplicationOrchestrator {
    settings: OrchestratorSettings,
    configs: Arc<dyn ConfigStore>,
    metrics: Arc<dyn MetricsStore>,
    strategies: Strategies,
    registry: DashMap<ConfigId, StrategyHandle>,
}

impl ReplicationOrchestrator {
    /// Create an orchestrator over separate config and metrics stores.
    ///
    /// Fails with [`ReplicationError::Settings`] if `settings` don't validate.
    pub fn new(
        settings: OrchestratorSettings,
        configs: Arc<dyn ConfigStore>,
        metrics: Arc<dyn MetricsStore>,
        capabilities: Capabilities,
    ) -> Result<Self> {
        settings.validate()?;
        let recorder = MetricsRecorder::new(Arc::clone(&metrics));
        let strategies = Strategies::new(&capabilities, recorder, &settings);
        Ok(Self {
            settings,
            configs,
            metrics,
            strategies,
            registry: DashMap::new(),
        })
    }

    /// Create an orchestrator over one store that holds both configs and metrics.
    pub fn with_store<S>(
        settings: OrchestratorSettings,
        store: Arc<S>,
        capabilities: Capabilities,
    ) -> Result<Self>
    where
        S: ConfigStore + MetricsStore,
    {
        let configs: Arc<dyn ConfigStore> = store.clone();
        let metrics: Arc<dyn MetricsStore> = store;
        Self::new(settings, configs, metrics, capabilities)
    }

    /// Open the SQLite store described by `settings.storage` and build an
    /// orchestrator over it.
    pub async fn open_sqlite(settings: OrchestratorSettings, capabilities: Capabilities) -> Result<Self> {
        settings.validate()?;
        let store = Arc::new(SqliteStore::from_settings(&settings.storage).await?);
        Self::with_store(settings, store, capabilities)
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Config management
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate and persist a new config with status `pending`.
    pub async fn create_config(&self, request: NewReplicationConfig) -> Result<ReplicationConfig> {
        let config = ReplicationConfig::from_request(request, self.settings.defaults.lag_threshold_ms);
        config.validate()?;
        self.configs.insert(config.clone()).await?;

        info!(
            config_id = %config.id,
            mode = %config.replication_mode,
            tables = config.tables.len(),
            "Replication config created"
        );
        Ok(config)
    }

    pub async fn get_config(&self, id: &ConfigId) -> Result<ReplicationConfig> {
        self.configs
            .get(id)
            .await?
            .ok_or_else(|| ReplicationError::ConfigNotFound(id.clone()))
    }

    pub async fn list_configs(&self) -> Result<Vec<ReplicationConfig>> {
        self.configs.list().await
    }

    /// Merge `update` into a stored config.
    ///
    /// The merged config must still validate. A running strategy keeps the
    /// settings it was started with until the next `start`.
    pub async fn update_config(&self, id: &ConfigId, update: ConfigUpdate) -> Result<ReplicationConfig> {
        let current = self.get_config(id).await?;
        if update.is_empty() {
            return Ok(current);
        }

        let patch = ConfigPatch::from(update);
        let mut merged = current;
        merged.apply_patch(patch.clone());
        merged.validate()?;

        let updated = self
            .configs
            .update(id, patch)
            .await?
            .ok_or_else(|| ReplicationError::ConfigNotFound(id.clone()))?;

        if self.registry.contains_key(id) {
            debug!(config_id = %id, "Config updated while running; takes effect on next start");
        }
        info!(config_id = %id, "Replication config updated");
        Ok(updated)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start (or restart) replication for a config.
    ///
    /// 1. Load and validate the config (validation failures leave status alone)
    /// 2. Tear down any handle already registered for it
    /// 3. Start the strategy for its mode
    /// 4. Register the handle and mark the config `active`
    ///
    /// If step 3 fails the config is marked `error` and nothing is registered.
    pub async fn start(&self, id: &ConfigId) -> Result<()> {
        let config = self.get_config(id).await?;
        config.validate()?;

        if let Some((_, previous)) = self.registry.remove(id) {
            info!(config_id = %id, mode = %previous.mode(), "Restarting: tearing down running strategy");
            previous.teardown().await;
            telemetry::set_active_jobs(self.registry.len());
        }

        info!(config_id = %id, mode = %config.replication_mode, "Starting replication");

        let handle = match self.strategies.dispatch(&config).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(config_id = %id, mode = %config.replication_mode, error = %e, "Failed to start replication");
                telemetry::record_start_failure(config.replication_mode.as_str());
                if let Err(status_err) = self.set_status(id, config.replication_mode, ReplicationStatus::Error).await {
                    warn!(config_id = %id, error = %status_err, "Failed to mark config as error");
                }
                return Err(e);
            }
        };

        if let Some(displaced) = self.registry.insert(id.clone(), handle) {
            warn!(config_id = %id, "Concurrent start displaced a handle, tearing it down");
            displaced.teardown().await;
        }
        telemetry::set_active_jobs(self.registry.len());

        if let Err(e) = self.set_status(id, config.replication_mode, ReplicationStatus::Active).await {
            error!(config_id = %id, error = %e, "Failed to mark config active, tearing down");
            if let Some((_, handle)) = self.registry.remove(id) {
                handle.teardown().await;
            }
            telemetry::set_active_jobs(self.registry.len());
            return Err(e);
        }

        info!(config_id = %id, mode = %config.replication_mode, "Replication active");
        Ok(())
    }

    /// Stop replication for a config. Idempotent.
    pub async fn stop(&self, id: &ConfigId) -> Result<()> {
        self.halt(id, ReplicationStatus::Stopped).await
    }

    /// Pause replication for a config.
    ///
    /// Releases everything exactly like [`stop`](Self::stop); only the
    /// recorded status differs. `start` resumes from scratch.
    pub async fn pause(&self, id: &ConfigId) -> Result<()> {
        self.halt(id, ReplicationStatus::Paused).await
    }

    async fn halt(&self, id: &ConfigId, status: ReplicationStatus) -> Result<()> {
        // Removed before any await so no new start can observe the old handle.
        let handle = self.registry.remove(id).map(|(_, handle)| handle);
        let mode = handle.as_ref().map(StrategyHandle::mode);

        if let Some(handle) = handle {
            handle.teardown().await;
            telemetry::set_active_jobs(self.registry.len());
        } else {
            debug!(config_id = %id, "No running strategy to tear down");
        }

        let config = self
            .configs
            .update(id, ConfigPatch::status(status))
            .await?
            .ok_or_else(|| ReplicationError::ConfigNotFound(id.clone()))?;
        telemetry::record_job_transition(mode.unwrap_or(config.replication_mode).as_str(), status.as_str());

        info!(config_id = %id, status = %status, "Replication halted");
        Ok(())
    }

    /// Start every config persisted as `active` that has no running handle.
    ///
    /// Meant for process startup after a crash or a [`shutdown`](Self::shutdown).
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let candidates: Vec<ConfigId> = self
            .configs
            .list()
            .await?
            .into_iter()
            .filter(|c| c.status == ReplicationStatus::Active && !self.registry.contains_key(&c.id))
            .map(|c| c.id)
            .collect();

        info!(candidates = candidates.len(), "Recovering active replication configs");

        let mut report = RecoveryReport::default();
        for id in candidates {
            match self.start(&id).await {
                Ok(()) => report.restarted.push(id),
                Err(e) => {
                    warn!(config_id = %id, error = %e, "Recovery start failed");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        info!(
            restarted = report.restarted.len(),
            failed = report.failed.len(),
            "Recovery complete"
        );
        Ok(report)
    }

    /// Tear down every running strategy without touching persisted status.
    pub async fn shutdown(&self) {
        let ids: Vec<ConfigId> = self.registry.iter().map(|entry| entry.key().clone()).collect();
        info!(jobs = ids.len(), "Shutting down replication orchestrator");

        let handles: Vec<StrategyHandle> = ids
            .iter()
            .filter_map(|id| self.registry.remove(id).map(|(_, handle)| handle))
            .collect();
        telemetry::set_active_jobs(self.registry.len());

        // Handles drain concurrently.
        futures::future::join_all(handles.into_iter().map(StrategyHandle::teardown)).await;
        info!("Replication orchestrator shutdown complete");
    }

    async fn set_status(
        &self,
        id: &ConfigId,
        mode: ReplicationMode,
        status: ReplicationStatus,
    ) -> Result<ReplicationConfig> {
        let updated = self
            .configs
            .update(id, ConfigPatch::status(status))
            .await?
            .ok_or_else(|| ReplicationError::ConfigNotFound(id.clone()))?;
        telemetry::record_job_transition(mode.as_str(), status.as_str());
        Ok(updated)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether a strategy is running for `id` in this process.
    pub fn is_active(&self, id: &ConfigId) -> bool {
        self.registry.contains_key(id)
    }

    /// Ids with a running strategy.
    pub fn active_jobs(&self) -> Vec<ConfigId> {
        self.registry.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Registry snapshot. Performs no I/O.
    pub fn health_check(&self) -> OrchestratorHealth {
        let mut health = OrchestratorHealth::default();
        for entry in self.registry.iter() {
            health.active_jobs += 1;
            match entry.value().mode() {
                ReplicationMode::Streaming => health.streaming_jobs += 1,
                ReplicationMode::Logical => health.logical_jobs += 1,
                ReplicationMode::Physical => health.physical_jobs += 1,
            }
            if entry.value().tick_in_progress() {
                health.ticks_in_progress += 1;
            }
        }
        health
    }

    /// Metrics rows for `id` recorded at or after `since`, oldest first.
    pub async fn metrics_since(&self, id: &ConfigId, since: DateTime<Utc>) -> Result<Vec<ReplicationMetrics>> {
        self.metrics.query(id, since).await
    }

    /// Summarize the metrics window against the config's lag threshold.
    pub async fn metrics_summary(&self, id: &ConfigId, since: DateTime<Utc>) -> Result<MetricsSummary> {
        let config = self.get_config(id).await?;
        let rows = self.metrics.query(id, since).await?;
        Ok(MetricsSummary::from_samples(&rows, config.lag_threshold_ms))
    }
}
