//! # Replay Policy
//!
//! Decides what happens to a queued operation whose replay failed. Nothing
//! here retries on a timer: a retained operation simply waits for the next
//! reconnect.
//!
//! - **Skip**: the device went offline mid-replay; no attempt is counted
//! - **Retain**: the failure is counted and the operation keeps its place
//! - **DeadLetter**: a permanent failure reached the attempt cap, so the
//!   operation is parked instead of blocking the queue forever

use crate::shared::error::SyncError;

/// Outcome of a failed replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayDecision {
    /// Leave queued without counting an attempt
    Skip,
    /// Count the attempt and keep the operation queued
    Retain,
    /// Move the operation to the dead-letter table
    DeadLetter,
}

/// Attempt cap for queued operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayPolicy {
    max_attempts: u32,
}

impl ReplayPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts: max_attempts.max(1) }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide for an operation that had failed `prior_attempts` times before
    /// this failure.
    ///
    /// Transient errors never dead-letter, however often they repeat.
    pub fn decide(&self, prior_attempts: u32, error: &SyncError) -> ReplayDecision {
        if matches!(error, SyncError::ConnectivityRace) {
            return ReplayDecision::Skip;
        }
        let attempts = prior_attempts.saturating_add(1);
        if !error.is_transient() && attempts >= self.max_attempts {
            ReplayDecision::DeadLetter
        } else {
            ReplayDecision::Retain
        }
    }
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self::new(crate::shared::config::DEFAULT_MAX_REPLAY_ATTEMPTS)
    }
}
