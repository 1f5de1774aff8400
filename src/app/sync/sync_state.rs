//! # Sync State
//!
//! Snapshot of the sync engine for status displays.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of recent errors kept for display
pub const MAX_RECENT_ERRORS: usize = 20;

/// Outcome of one replay pass over the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Applied to the backend and removed from the queue
    pub replayed: usize,
    /// Failed and left queued with the attempt counted
    pub failed: usize,
    /// Failed permanently at the attempt cap and parked
    pub dead_lettered: usize,
    /// Left queued untouched because connectivity dropped
    pub skipped: usize,
}

impl ReplayReport {
    pub fn attempted(&self) -> usize {
        self.replayed + self.failed + self.dead_lettered
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub online: bool,
    pub is_syncing: bool,
    pub pending_operations: usize,
    pub dead_letters: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_replay: Option<ReplayReport>,
    pub errors: Vec<String>,
}

impl SyncStatus {
    /// Remember an error, dropping the oldest past the display limit
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        if self.errors.len() > MAX_RECENT_ERRORS {
            let excess = self.errors.len() - MAX_RECENT_ERRORS;
            self.errors.drain(..excess);
        }
    }
}
