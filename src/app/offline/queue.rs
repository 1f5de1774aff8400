//! # Offline Operation Queue
//!
//! Durable FIFO of writes attempted while the device had no connectivity.
//!
//! ## Guarantees
//!
//! - **Durable**: every enqueue is committed to the local database before
//!   returning; a storage failure is returned to the caller
//! - **FIFO**: operations come back in insertion order, across restarts
//! - **No merging**: two updates to the same record stay two operations and
//!   replay independently, so the later one still wins
//! - **Restartable drain**: each `drain()` reads live queue state, so a
//!   drain started after a partial replay yields only what is left
//!
//! ## Usage
//!
//! ```rust,no_run
//! use aurilog_sync::app::offline::OfflineQueue;
//! use aurilog_sync::shared::models::{Action, EntityTable};
//! use futures_util::TryStreamExt;
//!
//! # async fn example(queue: OfflineQueue, trip: aurilog_sync::shared::Record)
//! #     -> aurilog_sync::shared::error::Result<()> {
//! queue.enqueue(EntityTable::Trips, trip, Action::Insert).await?;
//!
//! let mut pending = queue.drain();
//! while let Some(operation) = pending.try_next().await? {
//!     // replay...
//!     queue.remove_one(operation.seq).await?;
//! }
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::app::local_db::LocalDatabase;
use crate::shared::error::{Result, SyncError};
use crate::shared::models::{Action, EntityTable, Record};

/// One queued mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Position in the queue; strictly increasing in insertion order
    pub seq: i64,
    /// Stable identifier of the operation
    pub op_id: Uuid,
    /// Target entity collection
    pub table: EntityTable,
    /// Mutation kind
    pub action: Action,
    /// Full record for insert/update, `{id, user_id}` for delete
    pub payload: Record,
    /// Failed replay attempts so far
    pub attempts: u32,
    /// Error from the last failed replay
    pub last_error: Option<String>,
    /// When the operation was queued
    pub created_at: DateTime<Utc>,
}

/// Operation parked after it could no longer be replayed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub operation: PendingOperation,
    pub dead_at: DateTime<Utc>,
}

/// Durable queue of pending writes
#[derive(Debug, Clone)]
pub struct OfflineQueue {
    db: Arc<LocalDatabase>,
    max_len: Option<usize>,
}

impl OfflineQueue {
    /// Create a queue over the local database
    pub fn new(db: Arc<LocalDatabase>) -> Self {
        Self { db, max_len: None }
    }

    /// Refuse enqueues once `max_len` operations are pending
    pub fn with_max_len(mut self, max_len: Option<usize>) -> Self {
        self.max_len = max_len;
        self
    }

    /// Append an operation; fails with `Storage` when the write fails or the
    /// cap is reached
    pub async fn enqueue(&self, table: EntityTable, payload: Record, action: Action) -> Result<PendingOperation> {
        if let Some(max_len) = self.max_len {
            let len = self.db.count_queue_items().await?;
            if len >= max_len {
                return Err(SyncError::storage(format!(
                    "offline queue is full ({} pending operations)",
                    len
                )));
            }
        }

        let operation = self.db.insert_queue_item(table, action, &payload).await?;
        tracing::debug!(
            "[Queue] Queued {} on {} as #{}",
            operation.action,
            operation.table,
            operation.seq
        );
        Ok(operation)
    }

    /// Lazy FIFO sequence of queued operations
    ///
    /// Each step fetches the next row after the last one yielded, so removals
    /// made while draining are observed.
    pub fn drain(&self) -> BoxStream<'_, Result<PendingOperation>> {
        stream::try_unfold(0i64, move |after| async move {
            let next = self.db.next_queue_item_after(after).await?;
            Ok::<_, SyncError>(next.map(|operation| {
                let seq = operation.seq;
                (operation, seq)
            }))
        })
        .boxed()
    }

    /// Delete one successfully replayed operation
    pub async fn remove_one(&self, seq: i64) -> Result<bool> {
        self.db.delete_queue_item(seq).await
    }

    /// Delete a replayed insert and re-key queued operations that referenced
    /// it by its provisional key
    pub async fn complete_insert(&self, seq: i64, provisional_key: &str, backend_id: &str) -> Result<()> {
        let rewritten = self.db.complete_queue_insert(seq, provisional_key, backend_id).await?;
        if rewritten > 0 {
            tracing::debug!(
                "[Queue] {} queued operations now target {} instead of {}",
                rewritten,
                backend_id,
                provisional_key
            );
        }
        Ok(())
    }

    /// Count a failed replay; returns the attempts made so far
    pub async fn record_failure(&self, seq: i64, error: &SyncError) -> Result<u32> {
        self.db.record_queue_failure(seq, &error.to_string()).await
    }

    /// Move an operation out of the queue into the dead-letter table
    pub async fn dead_letter(&self, seq: i64, error: &SyncError) -> Result<bool> {
        let moved = self.db.move_to_dead_letter(seq, &error.to_string()).await?;
        if moved {
            tracing::warn!("[Queue] Operation #{} dead-lettered: {}", seq, error);
        }
        Ok(moved)
    }

    /// Snapshot of queued operations for one table
    pub async fn pending_for(&self, table: EntityTable) -> Result<Vec<PendingOperation>> {
        self.db.queue_items(Some(table)).await
    }

    /// Snapshot of every queued operation
    pub async fn pending(&self) -> Result<Vec<PendingOperation>> {
        self.db.queue_items(None).await
    }

    /// Number of queued operations
    pub async fn len(&self) -> Result<usize> {
        self.db.count_queue_items().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Parked operations
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.db.dead_letter_items().await
    }
}
