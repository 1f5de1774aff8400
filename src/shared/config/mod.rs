//! Application configuration module
//!
//! Provides configuration types for the sync layer.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::shared::models::LIVENESS_WINDOW_SECS;

/// Default backend URL (local development stack)
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:54321";

/// Default replay attempts before a queued operation is dead-lettered
pub const DEFAULT_MAX_REPLAY_ATTEMPTS: u32 = 5;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the REST/realtime backend
    pub backend_url: String,
    /// API key sent with every backend request
    pub api_key: Option<String>,
    /// Local database file; `None` selects the platform data directory
    pub db_path: Option<PathBuf>,
    /// Presence liveness window
    pub liveness_window: Duration,
    /// Failed replays of one operation before it moves to the dead-letter table
    pub max_replay_attempts: u32,
    /// Optional cap on the number of pending operations
    pub max_queue_len: Option<usize>,
    /// Settle delay after an ONLINE edge before replaying
    pub reconnect_debounce: Duration,
    /// Connectivity assumed at startup when it cannot be probed
    pub start_online: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            api_key: None,
            db_path: None,
            liveness_window: Duration::from_secs(LIVENESS_WINDOW_SECS as u64),
            max_replay_attempts: DEFAULT_MAX_REPLAY_ATTEMPTS,
            max_queue_len: None,
            reconnect_debounce: Duration::ZERO,
            start_online: true,
        }
    }
}

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.backend_url.starts_with("http://") || self.backend_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(self.backend_url.clone()));
        }
        if self.liveness_window.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "liveness_window_secs",
                message: "must be positive".to_string(),
            });
        }
        if self.max_replay_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_replay_attempts",
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_queue_len == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "max_queue_len",
                message: "must be at least 1 when set".to_string(),
            });
        }
        Ok(())
    }

    /// Liveness window as a chrono duration for timestamp arithmetic.
    pub fn liveness_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.liveness_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(LIVENESS_WINDOW_SECS))
    }
}

/// Builder for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    backend_url: Option<String>,
    api_key: Option<String>,
    db_path: Option<PathBuf>,
    liveness_window: Option<Duration>,
    max_replay_attempts: Option<u32>,
    max_queue_len: Option<usize>,
    reconnect_debounce: Option<Duration>,
    start_online: Option<bool>,
}

impl AppConfigBuilder {
    /// Set the backend URL
    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = Some(window);
        self
    }

    pub fn max_replay_attempts(mut self, attempts: u32) -> Self {
        self.max_replay_attempts = Some(attempts);
        self
    }

    pub fn max_queue_len(mut self, len: usize) -> Self {
        self.max_queue_len = Some(len);
        self
    }

    pub fn reconnect_debounce(mut self, delay: Duration) -> Self {
        self.reconnect_debounce = Some(delay);
        self
    }

    pub fn start_online(mut self, online: bool) -> Self {
        self.start_online = Some(online);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        let defaults = AppConfig::default();
        let config = AppConfig {
            backend_url: self.backend_url.unwrap_or(defaults.backend_url),
            api_key: self.api_key,
            db_path: self.db_path,
            liveness_window: self.liveness_window.unwrap_or(defaults.liveness_window),
            max_replay_attempts: self.max_replay_attempts.unwrap_or(defaults.max_replay_attempts),
            max_queue_len: self.max_queue_len,
            reconnect_debounce: self.reconnect_debounce.unwrap_or(defaults.reconnect_debounce),
            start_online: self.start_online.unwrap_or(defaults.start_online),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
