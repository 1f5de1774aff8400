//! # Offline Support
//!
//! The local durable queue of pending writes and the policy applied when a
//! queued write fails to replay.
//!
//! - `queue.rs`: durable FIFO of pending operations
//! - `retry.rs`: attempt cap and dead-letter decision

pub mod queue;
pub mod retry;

pub use queue::{DeadLetter, OfflineQueue, PendingOperation};
pub use retry::{ReplayDecision, ReplayPolicy};
