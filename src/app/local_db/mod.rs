//! # Local Database Module
//!
//! Local SQLite storage backing the offline-first sync layer. It survives
//! process restarts and is scoped to one device profile (one database file).
//!
//! ## Key Components
//!
//! - `LocalDatabase`: connection pool and schema management
//! - `schema.rs`: table definitions and migration bookkeeping
//! - `queue.rs`: offline queue and dead-letter rows
//! - `records.rs`: last known snapshot of each entity collection
//!
//! ## Usage
//!
//! ```rust,no_run
//! use aurilog_sync::app::local_db::LocalDatabase;
//!
//! # async fn example() -> aurilog_sync::shared::error::Result<()> {
//! let db = LocalDatabase::open(&LocalDatabase::default_path()).await?;
//! let stats = db.get_stats().await?;
//! println!("{} operations waiting", stats.pending_operations);
//! # Ok(())
//! # }
//! ```

pub mod queue;
pub mod records;
pub mod schema;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::shared::error::{Result, SyncError};

/// Local database connection manager
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    pool: SqlitePool,
}

impl LocalDatabase {
    /// Open or create the database file at `path`
    ///
    /// Creates parent directories as needed, enables WAL and initializes the
    /// schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::storage(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let db = Self { pool };
        db.init_schema().await?;

        tracing::info!("[LocalDb] Opened local database at {}", path.display());
        Ok(db)
    }

    /// Open a private in-memory database
    ///
    /// A single long-lived connection keeps the memory database alive for the
    /// lifetime of the pool.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Platform data directory location of the database file.
    pub fn default_path() -> PathBuf {
        let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        path.push("aurilog");
        path.push("local.db");
        path
    }

    /// Create all tables and run pending migrations.
    async fn init_schema(&self) -> Result<()> {
        for statement in schema::SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        self.run_migrations().await
    }

    /// Record applied schema versions.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        let current_version: (i32,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await?;
        if !schema::needs_migration(current_version.0) {
            return Ok(());
        }

        for version in schema::get_pending_migrations(current_version.0) {
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&self.pool)
                .await?;
            tracing::debug!("[LocalDb] Applied schema version {}", version);
        }

        Ok(())
    }

    /// Get connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, flushing WAL to disk.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Basic row counts for diagnostics.
    pub async fn get_stats(&self) -> Result<DatabaseStats> {
        let pending_operations: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM offline_queue")
            .fetch_one(&self.pool)
            .await?;

        let dead_letters: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letter")
            .fetch_one(&self.pool)
            .await?;

        let cached_records: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM local_records")
            .fetch_one(&self.pool)
            .await?;

        Ok(DatabaseStats {
            pending_operations: pending_operations.0 as u64,
            dead_letters: dead_letters.0 as u64,
            cached_records: cached_records.0 as u64,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Operations waiting for replay
    pub pending_operations: u64,
    /// Operations parked after exhausting their attempts
    pub dead_letters: u64,
    /// Records held in local snapshots
    pub cached_records: u64,
}
