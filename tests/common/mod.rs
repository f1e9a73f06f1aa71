//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Recording/scripted capability mocks
//! - A metrics store that always fails
//! - Orchestrator and config builders

#![allow(dead_code)]

pub mod mock_caps;

pub use mock_caps::*;

use replication_orchestrator::{
    Capabilities, InMemoryStore, NewReplicationConfig, OrchestratorSettings, ReplicationMode,
    ReplicationOrchestrator, Row,
};
use serde_json::json;
use std::sync::Arc;

/// Everything a test needs to drive and inspect an orchestrator.
pub struct Harness {
    pub orchestrator: ReplicationOrchestrator,
    pub store: Arc<InMemoryStore>,
    pub source: Arc<RecordingSource>,
    pub reader: Arc<ScriptedReader>,
    pub writer: Arc<ScriptedWriter>,
    pub probe: Arc<ScriptedProbe>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(OrchestratorSettings::for_testing())
    }

    pub fn with_settings(settings: OrchestratorSettings) -> Self {
        Self::build(settings, ScriptedWriter::new())
    }

    pub fn with_writer(writer: ScriptedWriter) -> Self {
        Self::build(OrchestratorSettings::for_testing(), writer)
    }

    pub fn build(settings: OrchestratorSettings, writer: ScriptedWriter) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let source = Arc::new(RecordingSource::new());
        let reader = Arc::new(ScriptedReader::new());
        let writer = Arc::new(writer);
        let probe = Arc::new(ScriptedProbe::new());

        let capabilities = Capabilities::new(source.clone(), reader.clone(), writer.clone(), probe.clone());
        let orchestrator = ReplicationOrchestrator::with_store(settings, store.clone(), capabilities)
            .expect("valid test settings");

        Self {
            orchestrator,
            store,
            source,
            reader,
            writer,
            probe,
        }
    }
}

pub fn streaming(tables: &[&str]) -> NewReplicationConfig {
    NewReplicationConfig::new("pg://primary", "pg://replica", ReplicationMode::Streaming)
        .with_tables(tables.iter().copied())
}

pub fn logical(tables: &[&str]) -> NewReplicationConfig {
    NewReplicationConfig::new("pg://primary", "warehouse://analytics", ReplicationMode::Logical)
        .with_tables(tables.iter().copied())
}

pub fn physical() -> NewReplicationConfig {
    NewReplicationConfig::new("pg://primary", "pg://standby", ReplicationMode::Physical)
}

/// A row with an integer id.
pub fn row(id: i64) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), json!(id));
    row.insert("status".to_string(), json!("paid"));
    row
}

/// A row the [`ScriptedWriter`] refuses to apply.
pub fn poison_row(id: i64) -> Row {
    let mut row = row(id);
    row.insert(POISON_FIELD.to_string(), json!(true));
    row
}
