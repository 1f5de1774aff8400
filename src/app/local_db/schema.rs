//! Database Schema Definitions
//!
//! Contains the local schema and migration bookkeeping.

/// Current database schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Schema migration versions
pub const MIGRATION_VERSIONS: &[i32] = &[1];

/// Statements creating the local tables, executed one by one at open.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // Pending writes, replayed in `seq` order
    "CREATE TABLE IF NOT EXISTS offline_queue (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        op_id TEXT NOT NULL UNIQUE,
        table_name TEXT NOT NULL,
        action TEXT NOT NULL,
        payload TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        last_attempt TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_offline_queue_table ON offline_queue (table_name, seq)",
    // Operations that exhausted their replay attempts
    "CREATE TABLE IF NOT EXISTS dead_letter (
        seq INTEGER PRIMARY KEY,
        op_id TEXT NOT NULL,
        table_name TEXT NOT NULL,
        action TEXT NOT NULL,
        payload TEXT NOT NULL,
        attempts INTEGER NOT NULL,
        last_error TEXT,
        created_at TEXT NOT NULL,
        dead_at TEXT NOT NULL
    )",
    // Last snapshot of each entity collection
    "CREATE TABLE IF NOT EXISTS local_records (
        table_name TEXT NOT NULL,
        record_key TEXT NOT NULL,
        data TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (table_name, record_key)
    )",
];

/// Check if database needs migration
pub fn needs_migration(current_version: i32) -> bool {
    current_version < CURRENT_SCHEMA_VERSION
}

/// Get pending migrations
pub fn get_pending_migrations(current_version: i32) -> Vec<i32> {
    MIGRATION_VERSIONS
        .iter()
        .filter(|&&v| v > current_version)
        .cloned()
        .collect()
}
