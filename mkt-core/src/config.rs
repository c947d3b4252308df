//! Application configuration management.
//!
//! Configuration is persisted as TOML. Every field carries a serde default
//! so partial files and older files keep loading.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{MktError, MktResult};
use crate::platform::Platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Realtime change feed and reconnection settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Messaging and review limits.
    #[serde(default)]
    pub messaging: MessagingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file. If empty, uses default location.
    #[serde(default)]
    pub path: String,

    /// Enable WAL (Write-Ahead Logging) mode.
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Run integrity check on startup.
    #[serde(default = "default_true")]
    pub integrity_check_on_startup: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,

    /// Extra filter directives applied after the level, e.g.
    /// `["mkt_realtime=trace", "r2d2=info"]`.
    #[serde(default)]
    pub directives: Vec<String>,
}

/// Realtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Capacity of the store-side broadcast feed. Slow subscribers lag past this.
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,

    /// Per-subscription delivery buffer.
    #[serde(default = "default_subscription_buffer")]
    pub subscription_buffer: usize,

    /// Base delay between resubscribe attempts, in milliseconds.
    #[serde(default = "default_reconnect_base_delay")]
    pub reconnect_base_delay_ms: u64,

    /// Cap on the resubscribe delay, in milliseconds.
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_ms: u64,

    /// Maximum resubscribe attempts (0 = unlimited).
    #[serde(default)]
    pub reconnect_max_attempts: u32,

    /// Jitter factor (0.0 to 1.0) applied to each delay.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

/// Messaging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Maximum characters in a chat message.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// Maximum characters in a review comment.
    #[serde(default = "default_max_review_comment_length")]
    pub max_review_comment_length: usize,

    /// Capacity of the in-process event bus.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

// Default value functions for serde

fn default_true() -> bool {
    true
}

fn default_pool_size() -> u32 {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_feed_capacity() -> usize {
    constants::DEFAULT_FEED_CAPACITY
}

fn default_subscription_buffer() -> usize {
    64
}

fn default_reconnect_base_delay() -> u64 {
    1_000
}

fn default_reconnect_max_delay() -> u64 {
    30_000
}

fn default_jitter_factor() -> f64 {
    0.3
}

fn default_max_message_length() -> usize {
    constants::DEFAULT_MAX_MESSAGE_LENGTH
}

fn default_max_review_comment_length() -> usize {
    constants::DEFAULT_MAX_REVIEW_COMMENT_LENGTH
}

fn default_event_bus_capacity() -> usize {
    constants::DEFAULT_EVENT_BUS_CAPACITY
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            wal_mode: true,
            pool_size: default_pool_size(),
            integrity_check_on_startup: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
            directives: Vec::new(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            feed_capacity: default_feed_capacity(),
            subscription_buffer: default_subscription_buffer(),
            reconnect_base_delay_ms: default_reconnect_base_delay(),
            reconnect_max_delay_ms: default_reconnect_max_delay(),
            reconnect_max_attempts: 0,
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RealtimeConfig {
    /// Base resubscribe delay as a Duration.
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Maximum resubscribe delay as a Duration.
    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
            max_review_comment_length: default_max_review_comment_length(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default config file path.
    pub fn load_default() -> MktResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> MktResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default config file path.
    pub fn save_default(&self) -> MktResult<()> {
        let path = Self::default_config_path()?;
        self.save_to_file(&path)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> MktResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| MktError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> MktResult<PathBuf> {
        Ok(Platform::config_dir()?.join("config.toml"))
    }

    /// Get the effective database path, using the configured path or the default.
    pub fn effective_db_path(&self) -> MktResult<PathBuf> {
        if self.database.path.is_empty() {
            Ok(Platform::data_dir()?.join("marketplace.db"))
        } else {
            Ok(PathBuf::from(&self.database.path))
        }
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> MktResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(Platform::data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Reject values that would make the runtime misbehave.
    pub fn validate(&self) -> MktResult<()> {
        if self.database.pool_size == 0 {
            return Err(MktError::Config("database.pool_size must be at least 1".into()));
        }
        if self.realtime.feed_capacity == 0 || self.realtime.subscription_buffer == 0 {
            return Err(MktError::Config("realtime buffers must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.realtime.jitter_factor) {
            return Err(MktError::Config("realtime.jitter_factor must be within 0.0..=1.0".into()));
        }
        if self.messaging.event_bus_capacity == 0 {
            return Err(MktError::Config("messaging.event_bus_capacity must be non-zero".into()));
        }
        crate::logging::filter_spec(&self.logging.level, &self.logging.directives)?;
        Ok(())
    }
}

/// Thread-safe configuration holder for shared access across services.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// Save the current configuration to disk.
    pub async fn save(&self) -> MktResult<()> {
        let config = self.inner.read().await;
        config.save_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.database.wal_mode);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.realtime.reconnect_max_attempts, 0);
        assert_eq!(config.messaging.max_message_length, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            "[realtime]\nreconnect_base_delay_ms = 50\n",
        )
        .unwrap();
        assert_eq!(config.realtime.reconnect_base_delay(), Duration::from_millis(50));
        assert_eq!(config.realtime.reconnect_max_delay(), Duration::from_secs(30));
        assert_eq!(config.database.pool_size, 4);
    }

    #[test]
    fn test_validate_rejects_bad_jitter() {
        let mut config = AppConfig::default();
        config.realtime.jitter_factor = 1.5;
        assert!(matches!(config.validate(), Err(MktError::Config(_))));
    }

    #[test]
    fn test_logging_directives_from_toml() {
        let config: AppConfig = toml::from_str(
            "[logging]\nlevel = \"debug\"\ndirectives = [\"r2d2=info\"]\n",
        )
        .unwrap();
        assert_eq!(config.logging.directives, vec!["r2d2=info".to_string()]);
        assert!(config.validate().is_ok());

        let mut bad = config.clone();
        bad.logging.directives.push("mkt_core=shouty".into());
        assert!(matches!(bad.validate(), Err(MktError::Config(_))));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.messaging.max_message_length = 140;
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.messaging.max_message_length, 140);
    }
}
