//! # Offline Queue Storage
//!
//! Row-level operations on the `offline_queue` and `dead_letter` tables.
//! Rows are ordered by the autoincrement `seq` column, so insertion order
//! survives restarts and never depends on clock resolution.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::app::local_db::LocalDatabase;
use crate::app::offline::queue::{DeadLetter, PendingOperation};
use crate::shared::error::{Result, SyncError};
use crate::shared::models::{Action, EntityTable, Record};

const QUEUE_COLUMNS: &str =
    "seq, op_id, table_name, action, payload, attempts, last_error, created_at";

impl LocalDatabase {
    /// Append an operation to the offline queue
    pub async fn insert_queue_item(
        &self,
        table: EntityTable,
        action: Action,
        payload: &Record,
    ) -> Result<PendingOperation> {
        let op_id = Uuid::new_v4();
        let created_at = Utc::now();
        let data = serde_json::to_string(payload)?;

        let result = sqlx::query(
            "INSERT INTO offline_queue (op_id, table_name, action, payload, attempts, created_at)
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(op_id.to_string())
        .bind(table.as_str())
        .bind(action.as_str())
        .bind(&data)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(PendingOperation {
            seq: result.last_insert_rowid(),
            op_id,
            table,
            action,
            payload: payload.clone(),
            attempts: 0,
            last_error: None,
            created_at,
        })
    }

    /// Number of queued operations
    pub async fn count_queue_items(&self) -> Result<usize> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM offline_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 as usize)
    }

    /// First queued operation with `seq` greater than `after_seq`
    ///
    /// Rows that no longer decode are moved to the dead-letter table so a
    /// single corrupt row cannot block the rest of the queue.
    pub async fn next_queue_item_after(&self, after_seq: i64) -> Result<Option<PendingOperation>> {
        let mut cursor = after_seq;
        loop {
            let row = sqlx::query(&format!(
                "SELECT {} FROM offline_queue WHERE seq > ? ORDER BY seq ASC LIMIT 1",
                QUEUE_COLUMNS
            ))
            .bind(cursor)
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else {
                return Ok(None);
            };

            match decode_queue_row(&row) {
                Ok(operation) => return Ok(Some(operation)),
                Err(err) => {
                    let seq: i64 = row.try_get("seq")?;
                    tracing::error!("[Queue] Corrupt queue row {}: {}", seq, err);
                    self.move_to_dead_letter(seq, &format!("corrupt row: {}", err)).await?;
                    cursor = seq;
                }
            }
        }
    }

    /// Snapshot of queued operations in FIFO order, optionally for one table
    pub async fn queue_items(&self, table: Option<EntityTable>) -> Result<Vec<PendingOperation>> {
        let rows = match table {
            Some(table) => {
                sqlx::query(&format!(
                    "SELECT {} FROM offline_queue WHERE table_name = ? ORDER BY seq ASC",
                    QUEUE_COLUMNS
                ))
                .bind(table.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM offline_queue ORDER BY seq ASC",
                    QUEUE_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut operations = Vec::with_capacity(rows.len());
        for row in rows {
            match decode_queue_row(&row) {
                Ok(operation) => operations.push(operation),
                Err(err) => tracing::warn!("[Queue] Skipping malformed queue row: {}", err),
            }
        }
        Ok(operations)
    }

    /// Remove a replayed operation
    pub async fn delete_queue_item(&self, seq: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM offline_queue WHERE seq = ?")
            .bind(seq)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a replayed insert and point queued operations that still use
    /// its provisional key at the backend id, in one transaction.
    ///
    /// Returns how many queued payloads were rewritten.
    pub async fn complete_queue_insert(&self, seq: i64, provisional_key: &str, backend_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM offline_queue WHERE seq = ?")
            .bind(seq)
            .execute(&mut *tx)
            .await?;

        let rewritten = sqlx::query(
            "UPDATE offline_queue SET payload = json_set(payload, '$.id', ?)
             WHERE json_extract(payload, '$.id') = ?",
        )
        .bind(backend_id)
        .bind(provisional_key)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(rewritten.rows_affected())
    }

    /// Count a failed replay attempt; returns the new attempt count
    pub async fn record_queue_failure(&self, seq: i64, error_message: &str) -> Result<u32> {
        sqlx::query(
            "UPDATE offline_queue SET
                attempts = attempts + 1,
                last_attempt = ?,
                last_error = ?
             WHERE seq = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(error_message)
        .bind(seq)
        .execute(&self.pool)
        .await?;

        let attempts: Option<(i64,)> = sqlx::query_as("SELECT attempts FROM offline_queue WHERE seq = ?")
            .bind(seq)
            .fetch_optional(&self.pool)
            .await?;

        attempts
            .map(|(count,)| count as u32)
            .ok_or_else(|| SyncError::storage(format!("queue item {} vanished", seq)))
    }

    /// Move a queued operation to the dead-letter table
    pub async fn move_to_dead_letter(&self, seq: i64, error_message: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let copied = sqlx::query(
            "INSERT INTO dead_letter
                (seq, op_id, table_name, action, payload, attempts, last_error, created_at, dead_at)
             SELECT seq, op_id, table_name, action, payload, attempts, ?, created_at, ?
             FROM offline_queue WHERE seq = ?",
        )
        .bind(error_message)
        .bind(Utc::now().to_rfc3339())
        .bind(seq)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM offline_queue WHERE seq = ?")
            .bind(seq)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(copied.rows_affected() > 0)
    }

    /// Parked operations, oldest first
    pub async fn dead_letter_items(&self) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query(&format!(
            "SELECT {}, dead_at FROM dead_letter ORDER BY seq ASC",
            QUEUE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let dead_at: String = row.try_get("dead_at")?;
            match decode_queue_row(&row) {
                Ok(operation) => items.push(DeadLetter {
                    operation,
                    dead_at: parse_timestamp(&dead_at)?,
                }),
                Err(err) => tracing::warn!("[Queue] Skipping undecodable dead letter: {}", err),
            }
        }
        Ok(items)
    }
}

fn decode_queue_row(row: &SqliteRow) -> Result<PendingOperation> {
    let op_id: String = row.try_get("op_id")?;
    let table: String = row.try_get("table_name")?;
    let action: String = row.try_get("action")?;
    let payload: String = row.try_get("payload")?;
    let attempts: i64 = row.try_get("attempts")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(PendingOperation {
        seq: row.try_get("seq")?,
        op_id: Uuid::parse_str(&op_id)
            .map_err(|e| SyncError::storage(format!("invalid op_id '{}': {}", op_id, e)))?,
        table: table.parse()?,
        action: action.parse()?,
        payload: serde_json::from_str(&payload)?,
        attempts: attempts as u32,
        last_error: row.try_get("last_error")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SyncError::storage(format!("invalid timestamp '{}': {}", value, e)))
}
