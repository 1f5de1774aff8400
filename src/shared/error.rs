//! Shared Error Types
//!
//! Error taxonomy for the sync layer. Every failure surfaces to the immediate
//! caller; nothing in this crate retries on its own apart from queued
//! operations staying queued until the next replay.
//!
//! # Error Categories
//!
//! - `Validation` - caller handed over a malformed payload
//! - `Backend` - the remote store rejected the operation or was unreachable
//! - `Storage` - the local durable store failed
//! - `ConnectivityRace` - a replay found the device offline again
//! - `Serialization` - JSON encoding or decoding failed
//!
//! # Usage
//!
//! ```rust
//! use aurilog_sync::shared::error::SyncError;
//!
//! let error = SyncError::validation("id", "update requires a record id");
//! assert!(error.user_message().contains("id"));
//! ```
use thiserror::Error;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors reported by the remote backend boundary
#[derive(Debug, Error)]
pub enum BackendError {
    /// No row matched the id and owner scope
    #[error("record not found in '{table}'")]
    NotFound {
        /// Table the mutation targeted
        table: String,
    },

    /// The backend refused the credentials or the row is not ours
    #[error("permission denied: {message}")]
    Forbidden {
        /// Message returned by the backend
        message: String,
    },

    /// Constraint violation or any other non-success response
    #[error("backend rejected request ({status}): {message}")]
    Rejected {
        /// HTTP-style status code
        status: u16,
        /// Message returned by the backend
        message: String,
    },

    /// The request never completed
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a body we could not decode
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// The backend could not be reached at all
    #[error("backend unreachable")]
    Unreachable,
}

impl BackendError {
    pub fn not_found(table: impl Into<String>) -> Self {
        Self::NotFound { table: table.into() }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden { message: message.into() }
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected { status, message: message.into() }
    }

    /// Status code if the backend answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::Forbidden { .. } => Some(403),
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether replaying the same request later can never succeed.
    ///
    /// Transport failures, timeouts, throttling and 5xx answers are
    /// transient; everything else the backend answered is permanent.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::Forbidden { .. } | Self::Decode(_) => true,
            Self::Rejected { status, .. } => {
                !matches!(*status, 408 | 425 | 429 | 500..=599)
            }
            Self::Transport(_) | Self::Unreachable => false,
        }
    }
}

/// Sync layer error taxonomy
#[derive(Debug, Error)]
pub enum SyncError {
    /// Payload failed validation before reaching the backend
    #[error("Validation error in field '{field}': {message}")]
    Validation {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// The remote backend rejected the operation
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Local durable storage failed
    #[error("Storage error: {message}")]
    Storage {
        /// Human-readable error message
        message: String,
    },

    /// Replay attempted while the device dropped offline again
    #[error("connectivity lost during replay")]
    ConnectivityRace,

    /// JSON serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Whether a queued operation failing with this error should stay queued
    /// without counting an attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Backend(err) => !err.is_permanent(),
            Self::ConnectivityRace | Self::Storage { .. } => true,
            Self::Validation { .. } | Self::Serialization(_) => false,
        }
    }

    /// Text shown in the user-visible alert.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { field, message } => format!("Check the '{}' field: {}", field, message),
            Self::Backend(BackendError::NotFound { .. }) => {
                "The record no longer exists or belongs to another account.".to_string()
            }
            Self::Backend(BackendError::Forbidden { .. }) => {
                "You are not allowed to change this record.".to_string()
            }
            Self::Backend(err) => format!("The server rejected the change: {}", err),
            Self::Storage { message } => format!("Could not save on this device: {}", message),
            Self::ConnectivityRace => "Connection dropped while syncing; changes stay queued.".to_string(),
            Self::Serialization(err) => format!("Invalid data: {}", err),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        Self::storage(err.to_string())
    }
}
