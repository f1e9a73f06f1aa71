// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication orchestrator.
//!
//! Errors fall into two groups: those returned synchronously from the
//! orchestrator's entry points (`create_config`, `start`, `stop`,
//! `update_config`) and those produced by strategies in steady state, which
//! are recovered locally and surface only as metrics samples.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `ConfigNotFound` | No | Unknown config id |
//! | `InvalidConfig` | No | Bad mode, empty tables, blank identifiers |
//! | `SubscriptionFailure` | Yes | A streaming subscription could not be established |
//! | `ApplyFailure` | Yes | Target write failed for one event or batch |
//! | `ProbeFailure` | Yes | Physical health sample failed |
//! | `Store` | Yes | Config/metrics store reported an error |
//! | `Database` | No | SQLite error in the bundled store |
//! | `Settings` | No | Orchestrator settings are invalid |
//! | `Serialization` | No | JSON encoding of a record failed |

use crate::model::ConfigId;
use thiserror::Error;

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur while managing replication jobs.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// `start`/`stop`/`update_config` on an id the config store doesn't know.
    #[error("Replication config not found: {0}")]
    ConfigNotFound(ConfigId),

    /// The config failed validation.
    ///
    /// Returned by `create_config`, `update_config`, and `start` (before any
    /// status change).
    #[error("Invalid replication config: {0}")]
    InvalidConfig(String),

    /// A streaming subscription could not be established.
    ///
    /// Fatal to `start()`; the config moves to `error`.
    #[error("Subscription failed for table {table}: {message}")]
    SubscriptionFailure { table: String, message: String },

    /// Applying an event or batch to the target failed.
    ///
    /// Never escapes a running strategy: it is recorded as a metrics sample
    /// with `error_count = 1`.
    #[error("Apply failed for table {table}: {message}")]
    ApplyFailure { table: String, message: String },

    /// Sampling the physical replication link failed.
    #[error("Health probe failed: {0}")]
    ProbeFailure(String),

    /// The config or metrics store reported an error.
    #[error("Store error: {0}")]
    Store(String),

    /// SQLite error in the bundled [`SqliteStore`](crate::store::SqliteStore).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Orchestrator settings are malformed.
    #[error("Settings error: {0}")]
    Settings(String),

    /// JSON encoding or decoding of a stored record failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReplicationError {
    /// Shorthand for an `InvalidConfig` error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Check if this error is retryable.
    ///
    /// Retryable errors come from collaborators that may recover on their
    /// own (a source that is briefly unreachable, a busy target).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SubscriptionFailure { .. } => true,
            Self::ApplyFailure { .. } => true,
            Self::ProbeFailure(_) => true,
            Self::Store(_) => true,
            Self::ConfigNotFound(_) => false,
            Self::InvalidConfig(_) => false,
            Self::Database(_) => false,
            Self::Settings(_) => false,
            Self::Serialization(_) => false,
        }
    }
}
