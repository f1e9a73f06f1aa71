//! Change events and health samples exchanged with the capabilities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row as seen by sources and targets: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Row-level operation carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Insert and update are both applied as upsert-by-key.
    pub fn is_upsert(&self) -> bool {
        matches!(self, Self::Insert | Self::Update)
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row-level change notification from a source table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
    pub row: Row,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_row: Option<Row>,
    /// Source log position, when the source exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_at: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, table: impl Into<String>, row: Row) -> Self {
        Self {
            kind,
            table: table.into(),
            row,
            previous_row: None,
            lsn: None,
            committed_at: None,
        }
    }

    pub fn insert(table: impl Into<String>, row: Row) -> Self {
        Self::new(ChangeKind::Insert, table, row)
    }

    pub fn update(table: impl Into<String>, row: Row, previous_row: Row) -> Self {
        Self {
            previous_row: Some(previous_row),
            ..Self::new(ChangeKind::Update, table, row)
        }
    }

    pub fn delete(table: impl Into<String>, row: Row) -> Self {
        Self::new(ChangeKind::Delete, table, row)
    }

    #[must_use]
    pub fn with_lsn(mut self, lsn: impl Into<String>) -> Self {
        self.lsn = Some(lsn.into());
        self
    }

    /// The row identifying the target record: the old image for deletes
    /// when present, otherwise the new one.
    pub fn key_row(&self) -> &Row {
        match (self.kind, &self.previous_row) {
            (ChangeKind::Delete, Some(previous)) => previous,
            _ => &self.row,
        }
    }

    /// Size in bytes of the event's JSON encoding.
    pub fn encoded_len(&self) -> u64 {
        serde_json::to_vec(self).map(|b| b.len() as u64).unwrap_or(0)
    }
}

/// Size in bytes of a batch of rows encoded as a JSON array.
pub fn batch_encoded_len(rows: &[Row]) -> u64 {
    serde_json::to_vec(rows).map(|b| b.len() as u64).unwrap_or(0)
}

/// Link-level indicators returned by a
/// [`PhysicalHealthProbe`](crate::capabilities::PhysicalHealthProbe).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub lag_ms: u64,
    pub throughput: f64,
    pub bytes: u64,
    pub error_count: u64,
    #[serde(default)]
    pub last_lsn: Option<String>,
}
