//! Server configuration module.
//!
//! Layered with the `config` crate, lowest priority first:
//!
//! 1. Serde defaults on every field
//! 2. TOML file named by `TASKFLOW_CONFIG` (default `taskflow.toml`, optional)
//! 3. `TASKFLOW_*` environment variables, nested keys split on `__`
//!    (`TASKFLOW_AUTH__JWT_SECRET`, `TASKFLOW_SYNC__MAX_BATCH_SIZE`)

use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use taskflow_sync::SyncSettings;

const DEFAULT_CONFIG_FILE: &str = "taskflow.toml";

/// Minimum HS256 secret length accepted at startup.
const MIN_SECRET_LEN: usize = 32;

/// Sync server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for HttpSettings {
    fn default() -> Self {
        HttpSettings {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer queues for the SQLite lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("taskflow.db")
}

fn default_max_connections() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseSettings {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Clone, Deserialize)]
pub struct AuthSettings {
    /// HS256 signing secret. Required.
    #[serde(default)]
    pub jwt_secret: String,

    #[serde(default = "default_access_lifetime")]
    pub access_token_lifetime_secs: i64,
}

fn default_access_lifetime() -> i64 {
    3600
}

impl Default for AuthSettings {
    fn default() -> Self {
        AuthSettings {
            jwt_secret: String::new(),
            access_token_lifetime_secs: default_access_lifetime(),
        }
    }
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &"<redacted>")
            .field("access_token_lifetime_secs", &self.access_token_lifetime_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_sync_limit")]
    pub sync_per_window: u32,

    #[serde(default = "default_batch_delete_limit")]
    pub batch_delete_per_window: u32,

    #[serde(default = "default_shards")]
    pub shards: usize,
}

fn default_window_secs() -> u64 {
    60
}

fn default_sync_limit() -> u32 {
    120
}

fn default_batch_delete_limit() -> u32 {
    30
}

fn default_shards() -> usize {
    16
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        RateLimitSettings {
            window_secs: default_window_secs(),
            sync_per_window: default_sync_limit(),
            batch_delete_per_window: default_batch_delete_limit(),
            shards: default_shards(),
        }
    }
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl ServerConfig {
    /// Load configuration from the optional file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("TASKFLOW_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let layered = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("TASKFLOW")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_config(layered)
    }

    fn from_config(layered: Config) -> Result<Self, ConfigError> {
        let config: ServerConfig = layered.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::MissingRequired("auth.jwt_secret".to_string()));
        }
        if self.auth.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::InvalidValue(format!(
                "auth.jwt_secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        if self.auth.access_token_lifetime_secs <= 0 {
            return Err(ConfigError::InvalidValue(
                "auth.access_token_lifetime_secs".to_string(),
            ));
        }
        if self.rate_limit.window_secs == 0 || self.rate_limit.shards == 0 {
            return Err(ConfigError::InvalidValue("rate_limit".to_string()));
        }
        self.sync
            .validate()
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn from_toml(toml: &str) -> Result<ServerConfig, ConfigError> {
        let layered = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        ServerConfig::from_config(layered)
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = from_toml(&format!("[auth]\njwt_secret = \"{}\"\n", SECRET)).unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.database.max_connections, 8);
        assert_eq!(config.sync.max_batch_size, 500);
        assert_eq!(config.sync.undo_window_secs, 30);
        assert_eq!(config.rate_limit.sync_per_window, 120);
    }

    #[test]
    fn test_nested_sync_settings() {
        let toml = format!(
            "[auth]\njwt_secret = \"{}\"\n\n[sync]\nmax_batch_size = 50\nstatus_ranking = [\"todo\", \"done\", \"in_progress\", \"archived\"]\n",
            SECRET
        );
        let config = from_toml(&toml).unwrap();
        assert_eq!(config.sync.max_batch_size, 50);
        assert_eq!(config.sync.undo_window_secs, 30);
    }

    #[test]
    fn test_secret_is_required_and_redacted() {
        assert!(matches!(from_toml(""), Err(ConfigError::MissingRequired(_))));
        assert!(matches!(
            from_toml("[auth]\njwt_secret = \"short\"\n"),
            Err(ConfigError::InvalidValue(_))
        ));

        let config = from_toml(&format!("[auth]\njwt_secret = \"{}\"\n", SECRET)).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains(SECRET));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_invalid_sync_settings_are_rejected() {
        let toml = format!(
            "[auth]\njwt_secret = \"{}\"\n\n[sync]\nundo_window_secs = 0\n",
            SECRET
        );
        assert!(matches!(from_toml(&toml), Err(ConfigError::InvalidValue(_))));
    }
}
