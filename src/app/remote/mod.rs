//! # Remote Backend Boundary
//!
//! Abstract CRUD + realtime API the sync layer consumes. Mutations are always
//! scoped by record id *and* owning user id so one account can never change
//! another account's rows.
//!
//! ## Implementations
//!
//! - `RestBackend`: PostgREST-style HTTP/JSON with Server-Sent Events realtime
//! - `MemoryBackend`: in-process store with the same semantics, used by tests
//!   and offline demos

pub mod memory;
pub mod rest;
pub mod sse;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

pub use crate::shared::error::BackendError;
use crate::shared::event::{ChangeEvent, EventMask};
use crate::shared::models::{Order, Record};

pub use memory::MemoryBackend;
pub use rest::RestBackend;

/// Channel a subscription delivers change events onto
pub type ChangeSink = mpsc::UnboundedSender<ChangeEvent>;

/// Row filter understood by every backend
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`
    Eq(String, Value),
    /// `column IS NULL OR column = value`
    EqOrNull(String, Value),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn eq_or_null(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::EqOrNull(column.into(), value.into())
    }

    /// Evaluate the filter against a row.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Eq(column, value) => record.get(column).is_some_and(|v| loosely_equal(v, value)),
            Filter::EqOrNull(column, value) => match record.get(column) {
                None | Some(Value::Null) => true,
                Some(v) => loosely_equal(v, value),
            },
        }
    }
}

/// Compare ids that may arrive as numbers on one side and strings on the other.
pub(crate) fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(l), Value::Number(r)) | (Value::Number(r), Value::String(l)) => {
            *l == r.to_string()
        }
        _ => left == right,
    }
}

/// Handle identifying a live subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: u64,
    pub table: String,
}

/// CRUD + realtime store
#[async_trait]
pub trait Backend: Send + Sync {
    /// Rows of `table` matching every filter, in `order`
    async fn select(&self, table: &str, filters: &[Filter], order: Option<&Order>) -> Result<Vec<Record>, BackendError>;

    /// Insert a row; returns it as stored (with backend-assigned id)
    async fn insert(&self, table: &str, record: Record) -> Result<Record, BackendError>;

    /// Patch the row with `id` owned by `owner_id`
    async fn update(&self, table: &str, id: &str, owner_id: &str, patch: Record) -> Result<Record, BackendError>;

    /// Delete the row with `id` owned by `owner_id`
    async fn delete(&self, table: &str, id: &str, owner_id: &str) -> Result<(), BackendError>;

    /// Deliver change events for `table` matching `mask` onto `sink`
    async fn subscribe(&self, table: &str, mask: EventMask, sink: ChangeSink) -> Result<SubscriptionHandle, BackendError>;

    /// Stop a subscription; further events are not delivered
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), BackendError>;
}
