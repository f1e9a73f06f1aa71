// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication job records.
//!
//! [`ReplicationConfig`] describes one job and is owned by the
//! [`ConfigStore`](crate::store::ConfigStore). [`ReplicationMetrics`] rows are
//! append-only samples written by the strategies through the
//! [`MetricsRecorder`](crate::recorder::MetricsRecorder).
//!
//! # Status Transitions
//!
//! ```text
//!            start() ok
//! Pending ─────────────────→ Active ──── stop() ───→ Stopped
//!    │                        │  │                      │
//!    │ start() fails          │  └──── pause() ──→ Paused
//!    ↓                        │ start() fails           │
//!  Error ←────────────────────┘                         │
//!    │                                                  │
//!    └──────── start() (re-entrant) ←───────────────────┘
//! ```
//!
//! Only the orchestrator changes `status`. Operator-facing updates go through
//! [`ConfigUpdate`], which has no status field.

use crate::error::{ReplicationError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// Open key-value bag attached to configs and metrics rows.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Opaque identifier of a replication config.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigId(String);

impl ConfigId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConfigId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConfigId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConfigId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Replication strategy. The set is closed; every dispatch site matches it
/// exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    /// Continuous per-event application from change subscriptions.
    Streaming,
    /// Periodic batch sync of rows changed since a watermark.
    Logical,
    /// Passive monitoring of a physical replication link.
    Physical,
}

impl ReplicationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Logical => "logical",
            Self::Physical => "physical",
        }
    }

    /// Whether a config in this mode must name at least one table.
    pub fn requires_tables(&self) -> bool {
        match self {
            Self::Streaming | Self::Logical => true,
            Self::Physical => false,
        }
    }
}

impl std::fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplicationMode {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "streaming" => Ok(Self::Streaming),
            "logical" => Ok(Self::Logical),
            "physical" => Ok(Self::Physical),
            other => Err(ReplicationError::invalid(format!(
                "unknown replication mode '{}' (expected streaming, logical or physical)",
                other
            ))),
        }
    }
}

/// Lifecycle status of a replication config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationStatus {
    Pending,
    Active,
    /// Torn down like `Stopped`; kept distinct so operators can tell an
    /// intentional pause from a stop.
    Paused,
    Stopped,
    Error,
}

impl ReplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ReplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplicationStatus {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            other => Err(ReplicationError::Store(format!("unknown status '{}'", other))),
        }
    }
}

/// Advisory lag classification against `lag_threshold_ms`.
///
/// Never used to cut anything off; it only drives logs and summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LagStatus {
    #[default]
    Healthy,
    Lagging,
}

impl LagStatus {
    /// Lagging strictly above the threshold; a lag equal to it is healthy.
    pub fn classify(lag_ms: u64, lag_threshold_ms: u64) -> Self {
        if lag_ms > lag_threshold_ms {
            Self::Lagging
        } else {
            Self::Healthy
        }
    }
}

/// A replication job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub id: ConfigId,
    pub source_database: String,
    pub target_database: String,
    pub replication_mode: ReplicationMode,
    #[serde(default)]
    pub tables: Vec<String>,
    pub status: ReplicationStatus,
    pub lag_threshold_ms: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ReplicationConfig {
    /// Build a pending config from a creation request.
    pub fn from_request(request: NewReplicationConfig, default_lag_threshold_ms: u64) -> Self {
        let now = Utc::now();
        Self {
            id: ConfigId::generate(),
            source_database: request.source_database.trim().to_string(),
            target_database: request.target_database.trim().to_string(),
            replication_mode: request.replication_mode,
            tables: normalize_tables(request.tables),
            status: ReplicationStatus::Pending,
            lag_threshold_ms: request.lag_threshold_ms.unwrap_or(default_lag_threshold_ms),
            created_at: now,
            updated_at: now,
            metadata: request.metadata,
        }
    }

    /// Check the invariants every runnable config must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.source_database.trim().is_empty() {
            return Err(ReplicationError::invalid("source_database must not be empty"));
        }
        if self.target_database.trim().is_empty() {
            return Err(ReplicationError::invalid("target_database must not be empty"));
        }
        if self.replication_mode.requires_tables() && self.tables.is_empty() {
            return Err(ReplicationError::invalid(format!(
                "{} replication requires at least one table",
                self.replication_mode
            )));
        }

        let mut seen = HashSet::with_capacity(self.tables.len());
        for table in &self.tables {
            if table.trim().is_empty() {
                return Err(ReplicationError::invalid("table names must not be blank"));
            }
            if !seen.insert(table.as_str()) {
                return Err(ReplicationError::invalid(format!("duplicate table '{}'", table)));
            }
        }
        Ok(())
    }

    /// Merge a store-level patch into this config.
    ///
    /// Does not touch `updated_at` unless the patch carries one.
    pub fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(source) = patch.source_database {
            self.source_database = source.trim().to_string();
        }
        if let Some(target) = patch.target_database {
            self.target_database = target.trim().to_string();
        }
        if let Some(mode) = patch.replication_mode {
            self.replication_mode = mode;
        }
        if let Some(tables) = patch.tables {
            self.tables = normalize_tables(tables);
        }
        if let Some(threshold) = patch.lag_threshold_ms {
            self.lag_threshold_ms = threshold;
        }
        if let Some(metadata) = patch.metadata {
            self.metadata = metadata;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = updated_at;
        }
    }
}

/// Trim table names and drop repeats, keeping first-seen order.
fn normalize_tables(tables: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(tables.len());
    tables
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| t.is_empty() || seen.insert(t.clone()))
        .collect()
}

/// Request to create a replication config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReplicationConfig {
    pub source_database: String,
    pub target_database: String,
    pub replication_mode: ReplicationMode,
    #[serde(default)]
    pub tables: Vec<String>,
    /// Falls back to `settings.defaults.lag_threshold_ms`.
    #[serde(default)]
    pub lag_threshold_ms: Option<u64>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewReplicationConfig {
    pub fn new(
        source_database: impl Into<String>,
        target_database: impl Into<String>,
        replication_mode: ReplicationMode,
    ) -> Self {
        Self {
            source_database: source_database.into(),
            target_database: target_database.into(),
            replication_mode,
            tables: Vec::new(),
            lag_threshold_ms: None,
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_lag_threshold_ms(mut self, threshold: u64) -> Self {
        self.lag_threshold_ms = Some(threshold);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Operator-facing partial update. Status is deliberately absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default)]
    pub source_database: Option<String>,
    #[serde(default)]
    pub target_database: Option<String>,
    #[serde(default)]
    pub replication_mode: Option<ReplicationMode>,
    #[serde(default)]
    pub tables: Option<Vec<String>>,
    #[serde(default)]
    pub lag_threshold_ms: Option<u64>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.source_database.is_none()
            && self.target_database.is_none()
            && self.replication_mode.is_none()
            && self.tables.is_none()
            && self.lag_threshold_ms.is_none()
            && self.metadata.is_none()
    }
}

/// Store-level patch handed to [`ConfigStore::update`](crate::store::ConfigStore::update).
#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub source_database: Option<String>,
    pub target_database: Option<String>,
    pub replication_mode: Option<ReplicationMode>,
    pub tables: Option<Vec<String>>,
    pub lag_threshold_ms: Option<u64>,
    pub metadata: Option<Metadata>,
    pub status: Option<ReplicationStatus>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConfigPatch {
    /// A status-only patch that also bumps `updated_at`.
    pub fn status(status: ReplicationStatus) -> Self {
        Self {
            status: Some(status),
            updated_at: Some(Utc::now()),
            ..Default::default()
        }
    }
}

impl From<ConfigUpdate> for ConfigPatch {
    fn from(update: ConfigUpdate) -> Self {
        Self {
            source_database: update.source_database,
            target_database: update.target_database,
            replication_mode: update.replication_mode,
            tables: update.tables,
            lag_threshold_ms: update.lag_threshold_ms,
            metadata: update.metadata,
            status: None,
            updated_at: Some(Utc::now()),
        }
    }
}

/// One persisted metrics sample. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationMetrics {
    pub id: String,
    pub config_id: ConfigId,
    pub timestamp: DateTime<Utc>,
    pub lag_ms: u64,
    pub throughput_rows_per_second: f64,
    pub bytes_replicated: u64,
    pub error_count: u64,
    pub last_processed_lsn: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ReplicationMetrics {
    /// Stamp a sample with a fresh id and the current time.
    pub fn from_sample(config_id: ConfigId, sample: MetricsSample) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            config_id,
            timestamp: Utc::now(),
            lag_ms: sample.lag_ms,
            throughput_rows_per_second: sample.throughput_rows_per_second.max(0.0),
            bytes_replicated: sample.bytes_replicated,
            error_count: sample.error_count,
            last_processed_lsn: sample.last_processed_lsn,
            metadata: sample.metadata,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_count > 0
    }
}

/// The measured fields of a metrics row, before it is stamped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSample {
    pub lag_ms: u64,
    pub throughput_rows_per_second: f64,
    pub bytes_replicated: u64,
    pub error_count: u64,
    pub last_processed_lsn: Option<String>,
    pub metadata: Metadata,
}

impl MetricsSample {
    /// A successful application.
    pub fn success(lag_ms: u64, throughput_rows_per_second: f64, bytes_replicated: u64) -> Self {
        Self {
            lag_ms,
            throughput_rows_per_second,
            bytes_replicated,
            ..Default::default()
        }
    }

    /// A failed application: one error, everything else zero.
    pub fn failure(error: impl std::fmt::Display) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("error".to_string(), serde_json::Value::String(error.to_string()));
        Self {
            error_count: 1,
            metadata,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_lsn(mut self, lsn: Option<String>) -> Self {
        self.last_processed_lsn = lsn;
        self
    }

    #[must_use]
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}
