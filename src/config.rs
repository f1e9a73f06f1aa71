//! Configuration for the replication orchestrator.
//!
//! [`OrchestratorSettings`] tunes the strategies and the bundled stores. It is
//! separate from [`ReplicationConfig`](crate::model::ReplicationConfig), which
//! describes one replication job and lives in the config store.
//!
//! # Quick Start
//!
//! ```rust
//! use replication_orchestrator::config::OrchestratorSettings;
//!
//! let settings = OrchestratorSettings::from_json_str(r#"{
//!     "logical": { "interval": "2s", "batch_size": 500 }
//! }"#).unwrap();
//! assert_eq!(settings.logical.batch_size, 500);
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! OrchestratorSettings
//! ├── streaming: StreamingSettings   # per-event application
//! ├── logical: LogicalSettings       # periodic batch sync
//! ├── physical: PhysicalSettings     # link health sampling
//! ├── shutdown: ShutdownSettings     # teardown drain bound
//! ├── defaults: DefaultsSettings     # defaults for new configs
//! └── storage: StorageSettings       # bundled SQLite store
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "logical": { "interval": "5s", "lookback": "10s", "batch_size": 1000 },
//!   "physical": { "interval": "10s" },
//!   "shutdown": { "drain_timeout": "10s" },
//!   "defaults": { "lag_threshold_ms": 1000 },
//!   "storage": { "sqlite_path": "/var/lib/replication/state.db" }
//! }
//! ```

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level settings
// ═══════════════════════════════════════════════════════════════════════════════

/// Settings passed to [`ReplicationOrchestrator::new()`](crate::ReplicationOrchestrator::new).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default)]
    pub streaming: StreamingSettings,
    #[serde(default)]
    pub logical: LogicalSettings,
    #[serde(default)]
    pub physical: PhysicalSettings,
    #[serde(default)]
    pub shutdown: ShutdownSettings,
    #[serde(default)]
    pub defaults: DefaultsSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

impl OrchestratorSettings {
    /// Parse and validate settings from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| ReplicationError::Settings(format!("invalid settings JSON: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read, parse and validate settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ReplicationError::Settings(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Settings with short intervals for tests.
    pub fn for_testing() -> Self {
        Self {
            logical: LogicalSettings {
                interval: "100ms".to_string(),
                ..Default::default()
            },
            physical: PhysicalSettings {
                interval: "100ms".to_string(),
            },
            shutdown: ShutdownSettings {
                drain_timeout: "1s".to_string(),
            },
            storage: StorageSettings::in_memory(),
            ..Default::default()
        }
    }

    /// Reject malformed durations and zero sizes.
    pub fn validate(&self) -> Result<()> {
        let logical_interval = parse_duration("logical.interval", &self.logical.interval)?;
        if logical_interval.is_zero() {
            return Err(ReplicationError::Settings("logical.interval must be > 0".to_string()));
        }
        if let Some(ref lookback) = self.logical.lookback {
            parse_duration("logical.lookback", lookback)?;
        }
        if self.logical.batch_size == 0 {
            return Err(ReplicationError::Settings("logical.batch_size must be > 0".to_string()));
        }
        let physical_interval = parse_duration("physical.interval", &self.physical.interval)?;
        if physical_interval.is_zero() {
            return Err(ReplicationError::Settings("physical.interval must be > 0".to_string()));
        }
        parse_duration("shutdown.drain_timeout", &self.shutdown.drain_timeout)?;
        Ok(())
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| ReplicationError::Settings(format!("{}: invalid duration '{}': {}", field, value, e)))
}

fn default_true() -> bool {
    true
}

// ═══════════════════════════════════════════════════════════════════════════════
// StreamingSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Streaming (per-event) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingSettings {
    /// Log a warning when an event's apply latency exceeds the config's
    /// `lag_threshold_ms`.
    #[serde(default = "default_true")]
    pub warn_on_lag: bool,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self { warn_on_lag: true }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LogicalSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Logical (periodic batch) sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalSettings {
    /// Tick interval as a duration string (e.g., "5s").
    #[serde(default = "default_logical_interval")]
    pub interval: String,

    /// How far back each query reaches before its watermark.
    /// Never shorter than one interval; `None` means exactly one interval.
    #[serde(default)]
    pub lookback: Option<String>,

    /// Maximum rows fetched per table per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Lag recorded for every successful batch.
    #[serde(default = "default_nominal_batch_lag_ms")]
    pub nominal_batch_lag_ms: u64,
}

fn default_logical_interval() -> String {
    "5s".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_nominal_batch_lag_ms() -> u64 {
    100
}

impl Default for LogicalSettings {
    fn default() -> Self {
        Self {
            interval: default_logical_interval(),
            lookback: None,
            batch_size: default_batch_size(),
            nominal_batch_lag_ms: default_nominal_batch_lag_ms(),
        }
    }
}

impl LogicalSettings {
    /// Parse the interval string to a Duration.
    pub fn interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.interval).unwrap_or(Duration::from_secs(5))
    }

    /// Effective lookback: the configured value, floored at one interval.
    pub fn lookback_duration(&self) -> Duration {
        let interval = self.interval_duration();
        self.lookback
            .as_deref()
            .and_then(|l| humantime::parse_duration(l).ok())
            .map_or(interval, |l| l.max(interval))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PhysicalSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Physical link monitoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalSettings {
    /// Sampling interval as a duration string (e.g., "10s").
    #[serde(default = "default_physical_interval")]
    pub interval: String,
}

fn default_physical_interval() -> String {
    "10s".to_string()
}

impl Default for PhysicalSettings {
    fn default() -> Self {
        Self {
            interval: default_physical_interval(),
        }
    }
}

impl PhysicalSettings {
    pub fn interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.interval).unwrap_or(Duration::from_secs(10))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ShutdownSettings / DefaultsSettings / StorageSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Teardown behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownSettings {
    /// How long teardown waits for in-flight events or ticks before
    /// detaching them. In-flight work is never aborted.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: String,
}

fn default_drain_timeout() -> String {
    "10s".to_string()
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_timeout: default_drain_timeout(),
        }
    }
}

impl ShutdownSettings {
    pub fn drain_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.drain_timeout).unwrap_or(Duration::from_secs(10))
    }
}

/// Defaults applied to newly created configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsSettings {
    #[serde(default = "default_lag_threshold_ms")]
    pub lag_threshold_ms: u64,
}

fn default_lag_threshold_ms() -> u64 {
    1000
}

impl Default for DefaultsSettings {
    fn default() -> Self {
        Self {
            lag_threshold_ms: default_lag_threshold_ms(),
        }
    }
}

/// Bundled SQLite store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Path to the SQLite database holding configs and metrics.
    pub sqlite_path: String,

    /// Whether to use WAL mode for SQLite (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            sqlite_path: "replication_orchestrator.db".to_string(),
            wal_mode: true,
        }
    }
}

impl StorageSettings {
    /// Create an in-memory config for testing.
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: ":memory:".to_string(),
            wal_mode: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = OrchestratorSettings::default();
        assert_eq!(settings.logical.interval_duration(), Duration::from_secs(5));
        assert_eq!(settings.logical.batch_size, 1000);
        assert_eq!(settings.logical.nominal_batch_lag_ms, 100);
        assert_eq!(settings.physical.interval_duration(), Duration::from_secs(10));
        assert_eq!(settings.shutdown.drain_timeout_duration(), Duration::from_secs(10));
        assert_eq!(settings.defaults.lag_threshold_ms, 1000);
        assert!(settings.streaming.warn_on_lag);
        assert!(settings.storage.wal_mode);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let settings = OrchestratorSettings::from_json_str("{}").unwrap();
        assert_eq!(settings.logical.interval, "5s");
        assert_eq!(settings.physical.interval, "10s");
    }

    #[test]
    fn test_partial_json_overrides() {
        let settings = OrchestratorSettings::from_json_str(
            r#"{"logical": {"interval": "2s", "batch_size": 250}, "defaults": {"lag_threshold_ms": 50}}"#,
        )
        .unwrap();
        assert_eq!(settings.logical.interval_duration(), Duration::from_secs(2));
        assert_eq!(settings.logical.batch_size, 250);
        assert_eq!(settings.logical.nominal_batch_lag_ms, 100);
        assert_eq!(settings.defaults.lag_threshold_ms, 50);
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let err = OrchestratorSettings::from_json_str(r#"{"physical": {"interval": "soon"}}"#)
            .unwrap_err();
        assert!(matches!(err, ReplicationError::Settings(_)));
        assert!(err.to_string().contains("physical.interval"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = OrchestratorSettings::from_json_str(r#"{"logical": {"batch_size": 0}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(OrchestratorSettings::from_json_str(r#"{"logical": {"interval": "0s"}}"#).is_err());
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = OrchestratorSettings::from_json_str("{").unwrap_err();
        assert!(matches!(err, ReplicationError::Settings(_)));
    }

    #[test]
    fn test_lookback_never_shorter_than_interval() {
        let mut logical = LogicalSettings::default();
        assert_eq!(logical.lookback_duration(), Duration::from_secs(5));

        logical.lookback = Some("1s".to_string());
        assert_eq!(logical.lookback_duration(), Duration::from_secs(5));

        logical.lookback = Some("30s".to_string());
        assert_eq!(logical.lookback_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_for_testing_settings() {
        let settings = OrchestratorSettings::for_testing();
        assert_eq!(settings.logical.interval_duration(), Duration::from_millis(100));
        assert_eq!(settings.storage.sqlite_path, ":memory:");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_json_roundtrip() {
        let settings = OrchestratorSettings::for_testing();
        let json = serde_json::to_string(&settings).unwrap();
        let parsed = OrchestratorSettings::from_json_str(&json).unwrap();
        assert_eq!(parsed.logical.interval, "100ms");
        assert_eq!(parsed.shutdown.drain_timeout, "1s");
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"physical": {"interval": "3s"}}"#).unwrap();
        let settings = OrchestratorSettings::from_json_file(&path).unwrap();
        assert_eq!(settings.physical.interval_duration(), Duration::from_secs(3));

        assert!(OrchestratorSettings::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
