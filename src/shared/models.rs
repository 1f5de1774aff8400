//! Fleet Data Model
//!
//! Types the sync layer understands about the fleet application's records.
//! Entity records themselves stay opaque JSON objects: the sync layer only
//! looks at `id`, the owning `user_id`, and (for notifications) the
//! `target_user_email` visibility field.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::shared::error::SyncError;

/// An opaque entity record as it crosses the backend boundary.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Column carrying a record's unique identifier.
pub const ID_FIELD: &str = "id";
/// Column carrying the owning user's identifier.
pub const OWNER_FIELD: &str = "user_id";
/// Notification column naming the targeted driver; absent means broadcast.
pub const TARGET_EMAIL_FIELD: &str = "target_user_email";

/// Backend table holding driver GPS pings.
pub const PRESENCE_TABLE: &str = "driver_locations";
/// Backend table holding the driver roster.
pub const ROSTER_TABLE: &str = "profiles";

/// Presence records older than this are considered offline.
pub const LIVENESS_WINDOW_SECS: i64 = 10 * 60;

/// Entity collections managed through the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityTable {
    /// Freight trips
    Trips,
    /// Expense entries (fuel, tolls, meals)
    Expenses,
    /// Fleet vehicles
    Vehicles,
    /// Vehicle maintenance items
    Maintenance,
    /// Driver work-hour logs
    JornadaLogs,
    /// Broadcast or targeted notifications
    Notifications,
}

impl EntityTable {
    /// Every entity table, in the order a full refresh walks them.
    pub const ALL: [EntityTable; 6] = [
        EntityTable::Trips,
        EntityTable::Expenses,
        EntityTable::Vehicles,
        EntityTable::Maintenance,
        EntityTable::JornadaLogs,
        EntityTable::Notifications,
    ];

    /// Backend table name
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityTable::Trips => "trips",
            EntityTable::Expenses => "expenses",
            EntityTable::Vehicles => "vehicles",
            EntityTable::Maintenance => "maintenance",
            EntityTable::JornadaLogs => "jornada_logs",
            EntityTable::Notifications => "notifications",
        }
    }

    /// Default display order used when refreshing the read model.
    pub fn default_order(&self) -> Order {
        match self {
            EntityTable::Trips | EntityTable::Expenses | EntityTable::Maintenance => {
                Order::descending("date")
            }
            EntityTable::JornadaLogs => Order::descending("start_time"),
            EntityTable::Vehicles | EntityTable::Notifications => Order::descending("created_at"),
        }
    }

    /// Whether visibility is decided by the target email rather than the owner.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, EntityTable::Notifications)
    }
}

impl fmt::Display for EntityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityTable {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityTable::ALL
            .into_iter()
            .find(|table| table.as_str() == s)
            .ok_or_else(|| SyncError::validation("table", format!("unknown table '{}'", s)))
    }
}

/// Mutation kind carried by a pending operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Insert,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Insert => "insert",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Action::Insert),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            other => Err(SyncError::validation("action", format!("unknown action '{}'", other))),
        }
    }
}

/// Sort order applied by a backend select
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn ascending(column: impl Into<String>) -> Self {
        Self { column: column.into(), ascending: true }
    }

    pub fn descending(column: impl Into<String>) -> Self {
        Self { column: column.into(), ascending: false }
    }
}

/// Signed-in account the sync layer acts for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Owning user identifier used for data scoping
    pub user_id: String,
    /// Account email, the identity key for presence and notifications
    pub email: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), email: email.into() }
    }
}

/// Last-known location of a driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub email: String,
    pub latitude: f64,
    pub longitude: f64,
    pub updated_at: DateTime<Utc>,
}

impl PresenceRecord {
    /// Decode a presence row delivered by the backend.
    pub fn from_record(record: &Record) -> Result<Self, SyncError> {
        Ok(serde_json::from_value(serde_json::Value::Object(record.clone()))?)
    }

    /// Online means the last ping is strictly younger than `window`.
    pub fn is_online_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now.signed_duration_since(self.updated_at) < window
    }
}

/// Roster entry for a driver account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    #[serde(default)]
    pub id: Option<String>,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl Driver {
    pub fn from_record(record: &Record) -> Result<Self, SyncError> {
        let mut fields = record.clone();
        fields.remove(ID_FIELD);
        let mut driver: Driver = serde_json::from_value(serde_json::Value::Object(fields))?;
        driver.id = record_id(record);
        Ok(driver)
    }
}

/// Identifier of a record, accepting string or numeric ids.
pub fn record_id(record: &Record) -> Option<String> {
    match record.get(ID_FIELD)? {
        serde_json::Value::String(id) if !id.is_empty() => Some(id.clone()),
        serde_json::Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Owning user of a record, if stamped.
pub fn record_owner(record: &Record) -> Option<&str> {
    record.get(OWNER_FIELD).and_then(|owner| owner.as_str())
}
