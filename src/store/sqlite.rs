// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed config and metrics store.
//!
//! Persists [`ReplicationConfig`] records and [`ReplicationMetrics`] samples so
//! that a restarted process can find the configs it left `active` and resume
//! them with [`recover()`](crate::ReplicationOrchestrator::recover).
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when the database is
//! contended. Single-statement writes are retried with exponential backoff
//! (default 5 attempts). Read-modify-write updates run inside a transaction.
//!
//! # Storage Format
//!
//! Timestamps are stored as Unix milliseconds; `tables` and `metadata` as JSON
//! text. Sub-millisecond precision is not preserved.

use super::{ConfigStore, MetricsStore, StoreFuture};
use crate::config::StorageSettings;
use crate::error::{ReplicationError, Result};
use crate::model::{ConfigId, ConfigPatch, ReplicationConfig, ReplicationMetrics};
use crate::telemetry;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Backoff schedule for writes that hit SQLITE_BUSY / SQLITE_LOCKED.
#[derive(Debug, Clone, Copy)]
struct BusyRetry {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

const BUSY_RETRY: BusyRetry = BusyRetry {
    max_attempts: 5,
    base_delay: Duration::from_millis(10),
    max_delay: Duration::from_millis(500),
};

impl BusyRetry {
    /// Delay after the `attempt`-th failed try (1-based): doubling, capped.
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op`, retrying busy/locked errors. Other errors return at once.
    async fn run<F, Fut, T>(&self, operation: &str, mut op: F) -> std::result::Result<T, sqlx::Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempts = attempt, "SQLite write went through after busy retries");
                    }
                    return Ok(value);
                }
                Err(e) if is_busy(&e) => e,
                Err(e) => return Err(e),
            };

            if attempt >= self.max_attempts {
                warn!(operation, attempts = attempt, "SQLite still busy, giving up");
                return Err(err);
            }

            let delay = self.delay(attempt);
            warn!(
                operation,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "SQLite busy, backing off"
            );
            telemetry::record_store_retry(operation);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6), by result code or message.
fn is_busy(e: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = e else {
        return false;
    };
    match db_err.code() {
        Some(code) => matches!(&*code, "5" | "6"),
        None => {
            let msg = db_err.message().to_ascii_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
    }
}

type ConfigRow = (String, String, String, String, String, String, i64, i64, i64, String);

type MetricsRow = (String, String, i64, i64, f64, i64, i64, Option<String>, String);

const CONFIG_COLUMNS: &str = "id, source_database, target_database, replication_mode, tables, \
                              status, lag_threshold_ms, created_at, updated_at, metadata";

const METRICS_COLUMNS: &str = "id, config_id, timestamp, lag_ms, throughput_rows_per_second, \
                               bytes_replicated, error_count, last_processed_lsn, metadata";

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| ReplicationError::Store(format!("timestamp out of range: {}", ms)))
}

fn config_from_row(row: ConfigRow) -> Result<ReplicationConfig> {
    let (id, source, target, mode, tables, status, threshold, created_at, updated_at, metadata) = row;
    Ok(ReplicationConfig {
        id: ConfigId::from(id),
        source_database: source,
        target_database: target,
        replication_mode: mode.parse()?,
        tables: serde_json::from_str(&tables)?,
        status: status.parse()?,
        lag_threshold_ms: threshold.max(0) as u64,
        created_at: from_millis(created_at)?,
        updated_at: from_millis(updated_at)?,
        metadata: serde_json::from_str(&metadata)?,
    })
}

fn metrics_from_row(row: MetricsRow) -> Result<ReplicationMetrics> {
    let (id, config_id, timestamp, lag_ms, throughput, bytes, errors, lsn, metadata) = row;
    Ok(ReplicationMetrics {
        id,
        config_id: ConfigId::from(config_id),
        timestamp: from_millis(timestamp)?,
        lag_ms: lag_ms.max(0) as u64,
        throughput_rows_per_second: throughput,
        bytes_replicated: bytes.max(0) as u64,
        error_count: errors.max(0) as u64,
        last_processed_lsn: lsn,
        metadata: serde_json::from_str(&metadata)?,
    })
}

/// Durable [`ConfigStore`] + [`MetricsStore`] backed by SQLite.
pub struct SqliteStore {
    pool: SqlitePool,
    path: String,
    wal_mode: bool,
}

impl SqliteStore {
    /// Open (or create) a store at the given path with WAL enabled.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let settings = StorageSettings {
            sqlite_path: path.as_ref().to_string_lossy().to_string(),
            wal_mode: true,
        };
        Self::from_settings(&settings).await
    }

    /// Open a store as described by [`StorageSettings`].
    ///
    /// `":memory:"` opens a private in-memory database on a single pinned
    /// connection.
    pub async fn from_settings(settings: &StorageSettings) -> Result<Self> {
        let path = settings.sqlite_path.clone();
        let in_memory = path == ":memory:";
        info!(path = %path, "Initializing replication store");

        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", path)
        };

        let mut options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| ReplicationError::Settings(format!("Invalid SQLite path: {}", e)))?
            .create_if_missing(true);
        let wal_mode = settings.wal_mode && !in_memory;
        if wal_mode {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        }

        let pool_options = if in_memory {
            // Every connection to :memory: is its own database; keep exactly one alive.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };
        let pool = pool_options.connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS replication_configs (
                id TEXT PRIMARY KEY,
                source_database TEXT NOT NULL,
                target_database TEXT NOT NULL,
                replication_mode TEXT NOT NULL,
                tables TEXT NOT NULL,
                status TEXT NOT NULL,
                lag_threshold_ms INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                metadata TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS replication_metrics (
                id TEXT PRIMARY KEY,
                config_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                lag_ms INTEGER NOT NULL,
                throughput_rows_per_second REAL NOT NULL,
                bytes_replicated INTEGER NOT NULL,
                error_count INTEGER NOT NULL,
                last_processed_lsn TEXT,
                metadata TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_replication_metrics_config_ts \
             ON replication_metrics (config_id, timestamp)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool, path, wal_mode })
    }

    /// Get database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Force flush WAL to main database (for clean shutdown).
    pub async fn checkpoint(&self) -> Result<()> {
        if !self.wal_mode {
            return Ok(());
        }
        let pool = &self.pool;
        BUSY_RETRY.run("checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(pool).await
        })
        .await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Checkpoint and close the connection pool.
    pub async fn close(&self) {
        if let Err(e) = self.checkpoint().await {
            warn!(error = %e, "Failed to checkpoint WAL on close");
        }
        self.pool.close().await;
        info!("Replication store closed");
    }

    async fn fetch_config(&self, id: &ConfigId) -> Result<Option<ReplicationConfig>> {
        let sql = format!("SELECT {} FROM replication_configs WHERE id = ?", CONFIG_COLUMNS);
        let row: Option<ConfigRow> = sqlx::query_as(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(config_from_row).transpose()
    }

    async fn insert_config(&self, config: ReplicationConfig) -> Result<()> {
        let tables = serde_json::to_string(&config.tables)?;
        let metadata = serde_json::to_string(&config.metadata)?;
        let pool = &self.pool;
        let sql = format!(
            "INSERT INTO replication_configs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            CONFIG_COLUMNS
        );

        BUSY_RETRY.run("insert_config", || async {
            sqlx::query(&sql)
                .bind(config.id.as_str())
                .bind(&config.source_database)
                .bind(&config.target_database)
                .bind(config.replication_mode.as_str())
                .bind(&tables)
                .bind(config.status.as_str())
                .bind(config.lag_threshold_ms as i64)
                .bind(config.created_at.timestamp_millis())
                .bind(config.updated_at.timestamp_millis())
                .bind(&metadata)
                .execute(pool)
                .await
        })
        .await?;
        debug!(config_id = %config.id, "Inserted replication config");
        Ok(())
    }

    async fn update_config(&self, id: &ConfigId, patch: ConfigPatch) -> Result<Option<ReplicationConfig>> {
        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT {} FROM replication_configs WHERE id = ?", CONFIG_COLUMNS);
        let row: Option<ConfigRow> = sqlx::query_as(&select)
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut config = config_from_row(row)?;
        config.apply_patch(patch);

        sqlx::query(
            r#"
            UPDATE replication_configs SET
                source_database = ?, target_database = ?, replication_mode = ?, tables = ?,
                status = ?, lag_threshold_ms = ?, updated_at = ?, metadata = ?
            WHERE id = ?
            "#,
        )
        .bind(&config.source_database)
        .bind(&config.target_database)
        .bind(config.replication_mode.as_str())
        .bind(serde_json::to_string(&config.tables)?)
        .bind(config.status.as_str())
        .bind(config.lag_threshold_ms as i64)
        .bind(config.updated_at.timestamp_millis())
        .bind(serde_json::to_string(&config.metadata)?)
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(config))
    }

    async fn list_configs(&self) -> Result<Vec<ReplicationConfig>> {
        let sql = format!("SELECT {} FROM replication_configs ORDER BY created_at", CONFIG_COLUMNS);
        let rows: Vec<ConfigRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(config_from_row).collect()
    }

    async fn insert_metrics(&self, metrics: ReplicationMetrics) -> Result<()> {
        let metadata = serde_json::to_string(&metrics.metadata)?;
        let pool = &self.pool;
        let sql = format!(
            "INSERT INTO replication_metrics ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            METRICS_COLUMNS
        );

        BUSY_RETRY.run("insert_metrics", || async {
            sqlx::query(&sql)
                .bind(&metrics.id)
                .bind(metrics.config_id.as_str())
                .bind(metrics.timestamp.timestamp_millis())
                .bind(metrics.lag_ms as i64)
                .bind(metrics.throughput_rows_per_second)
                .bind(metrics.bytes_replicated as i64)
                .bind(metrics.error_count as i64)
                .bind(metrics.last_processed_lsn.as_deref())
                .bind(&metadata)
                .execute(pool)
                .await
        })
        .await?;
        Ok(())
    }

    async fn query_metrics(&self, config_id: &ConfigId, since: DateTime<Utc>) -> Result<Vec<ReplicationMetrics>> {
        let sql = format!(
            "SELECT {} FROM replication_metrics WHERE config_id = ? AND timestamp >= ? \
             ORDER BY timestamp, rowid",
            METRICS_COLUMNS
        );
        let rows: Vec<MetricsRow> = sqlx::query_as(&sql)
            .bind(config_id.as_str())
            .bind(since.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(metrics_from_row).collect()
    }
}

impl ConfigStore for SqliteStore {
    fn get<'a>(&'a self, id: &'a ConfigId) -> StoreFuture<'a, Option<ReplicationConfig>> {
        Box::pin(self.fetch_config(id))
    }

    fn list(&self) -> StoreFuture<'_, Vec<ReplicationConfig>> {
        Box::pin(self.list_configs())
    }

    fn insert(&self, config: ReplicationConfig) -> StoreFuture<'_, ()> {
        Box::pin(self.insert_config(config))
    }

    fn update<'a>(
        &'a self,
        id: &'a ConfigId,
        patch: ConfigPatch,
    ) -> StoreFuture<'a, Option<ReplicationConfig>> {
        Box::pin(self.update_config(id, patch))
    }
}

impl MetricsStore for SqliteStore {
    fn insert(&self, metrics: ReplicationMetrics) -> StoreFuture<'_, ()> {
        Box::pin(self.insert_metrics(metrics))
    }

    fn query<'a>(
        &'a self,
        config_id: &'a ConfigId,
        since: DateTime<Utc>,
    ) -> StoreFuture<'a, Vec<ReplicationMetrics>> {
        Box::pin(self.query_metrics(config_id, since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricsSample, NewReplicationConfig, ReplicationMode, ReplicationStatus};
    use serde_json::json;
    use tempfile::tempdir;

    fn config() -> ReplicationConfig {
        ReplicationConfig::from_request(
            NewReplicationConfig::new("pg://src", "pg://dst", ReplicationMode::Streaming)
                .with_tables(["orders", "items"])
                .with_metadata("team", json!("payments")),
            250,
        )
    }

    #[test]
    fn test_busy_retry_backoff_doubles_and_caps() {
        assert_eq!(BUSY_RETRY.delay(1), Duration::from_millis(10));
        assert_eq!(BUSY_RETRY.delay(2), Duration::from_millis(20));
        assert_eq!(BUSY_RETRY.delay(4), Duration::from_millis(80));
        assert_eq!(BUSY_RETRY.delay(7), Duration::from_millis(500));
        assert_eq!(BUSY_RETRY.delay(40), Duration::from_millis(500));
    }

    #[test]
    fn test_non_database_errors_are_not_busy() {
        assert!(!is_busy(&sqlx::Error::RowNotFound));
        assert!(!is_busy(&sqlx::Error::PoolTimedOut));
    }

    #[tokio::test]
    async fn test_busy_retry_passes_other_errors_through() {
        let mut calls = 0;
        let result: std::result::Result<(), sqlx::Error> = BUSY_RETRY
            .run("test", || {
                calls += 1;
                async { Err(sqlx::Error::RowNotFound) }
            })
            .await;
        assert!(matches!(result, Err(sqlx::Error::RowNotFound)));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("state.db")).await.unwrap();
        let cfg = config();
        ConfigStore::insert(&store, cfg.clone()).await.unwrap();

        let loaded = store.get(&cfg.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, cfg.id);
        assert_eq!(loaded.tables, cfg.tables);
        assert_eq!(loaded.replication_mode, ReplicationMode::Streaming);
        assert_eq!(loaded.status, ReplicationStatus::Pending);
        assert_eq!(loaded.lag_threshold_ms, 250);
        assert_eq!(loaded.metadata["team"], "payments");
        assert_eq!(loaded.created_at.timestamp_millis(), cfg.created_at.timestamp_millis());

        assert!(store.get(&ConfigId::from("missing")).await.unwrap().is_none());
        store.close().await;
    }

    #[tokio::test]
    async fn test_duplicate_insert_fails() {
        let store = SqliteStore::from_settings(&StorageSettings::in_memory()).await.unwrap();
        let cfg = config();
        ConfigStore::insert(&store, cfg.clone()).await.unwrap();
        assert!(ConfigStore::insert(&store, cfg).await.is_err());
    }

    #[tokio::test]
    async fn test_update_persists_patch() {
        let store = SqliteStore::from_settings(&StorageSettings::in_memory()).await.unwrap();
        let cfg = config();
        ConfigStore::insert(&store, cfg.clone()).await.unwrap();

        let updated = store
            .update(&cfg.id, ConfigPatch::status(ReplicationStatus::Active))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, ReplicationStatus::Active);

        let reloaded = store.get(&cfg.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, ReplicationStatus::Active);
        assert_eq!(reloaded.tables, cfg.tables);

        let missing = store
            .update(&ConfigId::from("missing"), ConfigPatch::status(ReplicationStatus::Stopped))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_list_configs() {
        let store = SqliteStore::from_settings(&StorageSettings::in_memory()).await.unwrap();
        for _ in 0..3 {
            ConfigStore::insert(&store, config()).await.unwrap();
        }
        assert_eq!(store.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_metrics_insert_and_query() {
        let store = SqliteStore::from_settings(&StorageSettings::in_memory()).await.unwrap();
        let id = ConfigId::from("cfg-1");
        let since = Utc::now() - chrono::Duration::seconds(1);

        let ok = MetricsSample::success(40, 25.0, 120).with_lsn(Some("0/1".to_string()));
        MetricsStore::insert(&store, ReplicationMetrics::from_sample(id.clone(), ok)).await.unwrap();
        MetricsStore::insert(&store, ReplicationMetrics::from_sample(id.clone(), MetricsSample::failure("boom")))
            .await
            .unwrap();
        MetricsStore::insert(
            &store,
            ReplicationMetrics::from_sample(ConfigId::from("other"), MetricsSample::success(1, 1.0, 1)),
        )
        .await
        .unwrap();

        let rows = store.query(&id, since).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].lag_ms, 40);
        assert_eq!(rows[0].bytes_replicated, 120);
        assert_eq!(rows[0].last_processed_lsn.as_deref(), Some("0/1"));
        assert_eq!(rows[1].error_count, 1);
        assert_eq!(rows[1].metadata["error"], "boom");

        let future = Utc::now() + chrono::Duration::hours(1);
        assert!(store.query(&id, future).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let cfg = config();

        {
            let store = SqliteStore::open(&path).await.unwrap();
            ConfigStore::insert(&store, cfg.clone()).await.unwrap();
            store.update(&cfg.id, ConfigPatch::status(ReplicationStatus::Active)).await.unwrap();
            store.close().await;
        }

        let store = SqliteStore::open(&path).await.unwrap();
        let loaded = store.get(&cfg.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ReplicationStatus::Active);
        assert_eq!(store.path(), path.to_string_lossy());
    }
}
