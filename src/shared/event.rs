/**
 * Realtime Change Events
 *
 * Row-level change notifications pushed by the backend. A subscriber asks
 * for a table and an event mask; the backend delivers one `ChangeEvent` per
 * matching insert, update or delete.
 */
use serde::{Deserialize, Serialize};

use crate::shared::models::Record;

/// Kind of row change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "insert" => Some(ChangeKind::Insert),
            "update" => Some(ChangeKind::Update),
            "delete" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

/// Set of change kinds a subscription wants delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl EventMask {
    pub const ALL: EventMask = EventMask { insert: true, update: true, delete: true };
    pub const UPSERTS: EventMask = EventMask { insert: true, update: true, delete: false };

    pub fn contains(&self, kind: ChangeKind) -> bool {
        match kind {
            ChangeKind::Insert => self.insert,
            ChangeKind::Update => self.update,
            ChangeKind::Delete => self.delete,
        }
    }

    /// Comma-separated kind list used on the wire (`insert,update`).
    pub fn to_query(&self) -> String {
        [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]
            .into_iter()
            .filter(|kind| self.contains(*kind))
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Row change delivered by a realtime subscription
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    /// Table the change happened in
    pub table: String,
    /// Kind of change
    pub kind: ChangeKind,
    /// New row for inserts and updates
    #[serde(default)]
    pub record: Option<Record>,
    /// Previous row (or at least its key) for updates and deletes
    #[serde(default)]
    pub old_record: Option<Record>,
    /// Timestamp when the backend committed the change
    pub commit_timestamp: String,
}

impl ChangeEvent {
    pub fn new(table: impl Into<String>, kind: ChangeKind, record: Option<Record>) -> Self {
        Self {
            table: table.into(),
            kind,
            record,
            old_record: None,
            commit_timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_old_record(mut self, old_record: Record) -> Self {
        self.old_record = Some(old_record);
        self
    }
}
