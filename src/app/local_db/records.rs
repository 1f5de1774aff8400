//! Local Record Snapshots
//!
//! The last authoritative copy of each entity collection, kept so the read
//! model can be rebuilt while offline. Each collection keeps its display
//! order in the `position` column.

use sqlx::Row;

use crate::app::cache::CacheEntry;
use crate::app::local_db::LocalDatabase;
use crate::shared::error::Result;
use crate::shared::models::{EntityTable, Record};

impl LocalDatabase {
    /// All records of a collection in stored order
    pub async fn local_records(&self, table: EntityTable) -> Result<Vec<CacheEntry>> {
        let rows = sqlx::query(
            "SELECT record_key, data FROM local_records
             WHERE table_name = ?
             ORDER BY position ASC",
        )
        .bind(table.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("record_key")?;
            let data: String = row.try_get("data")?;
            match serde_json::from_str::<Record>(&data) {
                Ok(record) => entries.push(CacheEntry { key, record }),
                Err(err) => tracing::warn!("[LocalDb] Dropping unreadable {} record {}: {}", table, key, err),
            }
        }
        Ok(entries)
    }

    /// Replace a collection's snapshot in one transaction
    pub async fn replace_local_records(&self, table: EntityTable, entries: &[CacheEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM local_records WHERE table_name = ?")
            .bind(table.as_str())
            .execute(&mut *tx)
            .await?;

        for (position, entry) in entries.iter().enumerate() {
            sqlx::query(
                "INSERT OR REPLACE INTO local_records (table_name, record_key, data, position)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(table.as_str())
            .bind(&entry.key)
            .bind(serde_json::to_string(&entry.record)?)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Insert or overwrite one record, appending new keys at the end
    pub async fn put_local_record(&self, table: EntityTable, key: &str, record: &Record) -> Result<()> {
        let data = serde_json::to_string(record)?;
        sqlx::query(
            "INSERT INTO local_records (table_name, record_key, data, position)
             VALUES (?, ?, ?, (SELECT COALESCE(MAX(position), -1) + 1 FROM local_records WHERE table_name = ?))
             ON CONFLICT (table_name, record_key) DO UPDATE SET data = excluded.data",
        )
        .bind(table.as_str())
        .bind(key)
        .bind(&data)
        .bind(table.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete one record; returns whether it existed
    pub async fn delete_local_record(&self, table: EntityTable, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM local_records WHERE table_name = ? AND record_key = ?")
            .bind(table.as_str())
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
