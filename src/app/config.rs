//! Runtime configuration for the sync agent.
//!
//! Values come from an optional TOML file, then `AURILOG_*` environment
//! variables override them.
//!
//! ```toml
//! backend_url = "https://fleet.example.com"
//! api_key = "anon-key"
//! max_replay_attempts = 5
//!
//! [session]
//! user_id = "7f1c..."
//! email = "ana@fleet.test"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::shared::config::{AppConfig, ConfigError};
use crate::shared::models::Session;

pub const ENV_BACKEND_URL: &str = "AURILOG_BACKEND_URL";
pub const ENV_API_KEY: &str = "AURILOG_API_KEY";
pub const ENV_DB_PATH: &str = "AURILOG_DB_PATH";
pub const ENV_USER_ID: &str = "AURILOG_USER_ID";
pub const ENV_USER_EMAIL: &str = "AURILOG_USER_EMAIL";
pub const ENV_START_ONLINE: &str = "AURILOG_START_ONLINE";

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    backend_url: Option<String>,
    api_key: Option<String>,
    db_path: Option<PathBuf>,
    liveness_window_secs: Option<u64>,
    max_replay_attempts: Option<u32>,
    max_queue_len: Option<usize>,
    reconnect_debounce_ms: Option<u64>,
    start_online: Option<bool>,
    #[serde(default)]
    session: SessionSection,
}

#[derive(Debug, Default, Deserialize)]
struct SessionSection {
    user_id: Option<String>,
    email: Option<String>,
}

/// Application configuration plus the signed-in account
#[derive(Debug, Clone)]
pub struct Config {
    app: AppConfig,
    user_id: Option<String>,
    email: Option<String>,
}

impl Config {
    /// Default config file location (`<config_dir>/aurilog/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("aurilog").join("config.toml"))
    }

    /// Load from `path` if it exists, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str::<FileConfig>(&text)?
            }
            _ => FileConfig::default(),
        };
        Self::from_parts(file)
    }

    /// Parse TOML text, then apply environment overrides.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Self::from_parts(toml::from_str(text)?)
    }

    fn from_parts(file: FileConfig) -> Result<Self, ConfigError> {
        let mut builder = AppConfig::builder();
        let mut user_id = file.session.user_id;
        let mut email = file.session.email;

        if let Some(url) = file.backend_url {
            builder = builder.backend_url(url);
        }
        if let Some(key) = file.api_key {
            builder = builder.api_key(key);
        }
        if let Some(path) = file.db_path {
            builder = builder.db_path(path);
        }
        if let Some(secs) = file.liveness_window_secs {
            builder = builder.liveness_window(Duration::from_secs(secs));
        }
        if let Some(attempts) = file.max_replay_attempts {
            builder = builder.max_replay_attempts(attempts);
        }
        if let Some(len) = file.max_queue_len {
            builder = builder.max_queue_len(len);
        }
        if let Some(ms) = file.reconnect_debounce_ms {
            builder = builder.reconnect_debounce(Duration::from_millis(ms));
        }
        if let Some(online) = file.start_online {
            builder = builder.start_online(online);
        }

        if let Some(url) = env_value(ENV_BACKEND_URL) {
            builder = builder.backend_url(url);
        }
        if let Some(key) = env_value(ENV_API_KEY) {
            builder = builder.api_key(key);
        }
        if let Some(path) = env_value(ENV_DB_PATH) {
            builder = builder.db_path(path);
        }
        if let Some(online) = env_value(ENV_START_ONLINE) {
            builder = builder.start_online(parse_bool(ENV_START_ONLINE, &online)?);
        }
        if let Some(id) = env_value(ENV_USER_ID) {
            user_id = Some(id);
        }
        if let Some(value) = env_value(ENV_USER_EMAIL) {
            email = Some(value);
        }

        Ok(Self { app: builder.build()?, user_id, email })
    }

    pub fn app(&self) -> &AppConfig {
        &self.app
    }

    /// The configured account; both user id and email are required.
    pub fn session(&self) -> Result<Session, ConfigError> {
        let user_id = self.user_id.clone().ok_or(ConfigError::MissingValue("user_id"))?;
        let email = self.email.clone().ok_or(ConfigError::MissingValue("email"))?;
        Ok(Session::new(user_id, email))
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key,
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}
