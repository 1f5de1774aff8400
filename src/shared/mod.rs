//! Shared Module
//!
//! Platform-agnostic types used by every part of the sync layer: the fleet
//! data model, realtime change events, the error taxonomy and configuration.

/// Fleet data model
pub mod models;

/// Realtime change events
pub mod event;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use config::{AppConfig, AppConfigBuilder, ConfigError};
pub use error::{BackendError, SyncError};
pub use event::{ChangeEvent, ChangeKind, EventMask};
pub use models::{Action, Driver, EntityTable, Order, PresenceRecord, Record, Session};
