//! # Replication Orchestrator
//!
//! Lifecycle management for database replication jobs: streaming change
//! application, periodic logical sync, and physical link monitoring, with
//! per-job metrics.
//!
//! ## Architecture
//!
//! The orchestrator owns job status and a registry of running strategies. It
//! never talks to a database itself: the host supplies capability traits and
//! stores, and the strategies drive them.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                       ReplicationOrchestrator                             │
//! │   create / update / start / stop / pause / recover / shutdown             │
//! │                                                                           │
//! │  ┌──────────────┐   dispatch on mode   ┌──────────────────────────────┐   │
//! │  │ ConfigStore  │◄────── status ───────│ registry: ConfigId → Handle  │   │
//! │  └──────────────┘                      └──────────────┬───────────────┘   │
//! │                         ┌─────────────────────────────┼──────────────┐    │
//! │                         ▼                             ▼              ▼    │
//! │              ┌────────────────────┐  ┌────────────────┐  ┌───────────────┐│
//! │              │StreamingReplicator │  │ LogicalSyncer  │  │PhysicalMonitor││
//! │              │ task per table     │  │ tick + guard   │  │ tick + guard  ││
//! │              └─────────┬──────────┘  └───────┬────────┘  └──────┬────────┘│
//! │                        └────────────► MetricsRecorder ◄─────────┘         │
//! │                                            │                              │
//! │                                            ▼                              │
//! │                                     ┌──────────────┐                      │
//! │                                     │ MetricsStore │                      │
//! │                                     └──────────────┘                      │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery
//!
//! At-least-once. Targets must apply events and batches idempotently
//! (upsert-by-key, delete-by-key). `lag_threshold_ms` is advisory: it drives
//! warnings and summaries, never cut-offs.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replication_orchestrator::{
//!     Capabilities, InMemoryStore, NewReplicationConfig, OrchestratorSettings,
//!     ReplicationMode, ReplicationOrchestrator,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> replication_orchestrator::Result<()> {
//!     let store = Arc::new(InMemoryStore::new());
//!     let orchestrator = ReplicationOrchestrator::with_store(
//!         OrchestratorSettings::default(),
//!         store,
//!         Capabilities::no_op(),
//!     )?;
//!
//!     let config = orchestrator
//!         .create_config(
//!             NewReplicationConfig::new("pg://primary", "pg://analytics", ReplicationMode::Logical)
//!                 .with_tables(["orders", "customers"]),
//!         )
//!         .await?;
//!
//!     orchestrator.start(&config.id).await?;
//!     // ... replicate ...
//!     orchestrator.stop(&config.id).await?;
//!     Ok(())
//! }
//! ```

pub mod capabilities;
pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod orchestrator;
pub mod recorder;
pub mod store;
pub mod strategy;
pub mod telemetry;
pub mod ticker;

// Re-exports for convenience
pub use capabilities::{
    Capabilities, CapabilityError, ChangeEventSource, ChannelChangeSource, PhysicalHealthProbe,
    SourceReader, TargetWriter,
};
pub use config::OrchestratorSettings;
pub use error::{ReplicationError, Result};
pub use event::{ChangeEvent, ChangeKind, HealthSample, Row};
pub use model::{
    ConfigId, ConfigUpdate, LagStatus, MetricsSample, NewReplicationConfig, ReplicationConfig,
    ReplicationMetrics, ReplicationMode, ReplicationStatus,
};
pub use orchestrator::{OrchestratorHealth, RecoveryReport, ReplicationOrchestrator};
pub use recorder::{MetricsRecorder, MetricsSummary};
pub use store::{ConfigStore, InMemoryStore, MetricsStore, SqliteStore};
pub use strategy::{LogicalSyncer, PhysicalMonitor, StrategyHandle, StreamingReplicator};
