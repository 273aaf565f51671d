// src/config/model.rs

use log::LevelFilter;
use serde::Deserialize;
use std::{str::FromStr, time::Duration};
use thiserror::Error;

/// Top-level runtime config
#[derive(Debug, Clone)]
pub struct Config {
    pub logging:  LoggingConfig,
    pub database: DatabaseConfig,
    pub queue:    QueueConfig,
}

/// Mirror of the whole TOML file before validation
#[derive(Debug, Default, Deserialize)]
pub struct ConfigStub {
    #[serde(default)] pub logging:  LoggingStub,
    #[serde(default)] pub database: DatabaseConfig,
    #[serde(default)] pub queue:    QueueStub,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Deserialize)]
pub struct LoggingStub {
    #[serde(default)]                   pub enable: bool,
    #[serde(default)]                   pub file:   Option<String>,
    #[serde(default = "default_level")] pub level:  String,
}
fn default_level() -> String { "INFO".into() }

impl Default for LoggingStub {
    fn default() -> Self {
        Self { enable: false, file: None, level: default_level() }
    }
}

/// Validated `[logging]` settings
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub enable: bool,
    pub file:   Option<String>,
    pub level:  LevelFilter,
}

/// Mirror of the `[database]` table; used as-is at runtime
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path:               String,
    pub purge_on_restart:   bool,
    pub synchronous:        String,
    pub journal_size_limit: u64,
    pub busy_timeout_ms:    u64,
    /// 0 disables periodic WAL checkpoints
    pub checkpoint_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path:               "offline_queue.db".into(),
            purge_on_restart:   false,
            synchronous:        "NORMAL".into(),
            journal_size_limit: 50_000_000,
            busy_timeout_ms:    5_000,
            checkpoint_seconds: 300,
        }
    }
}

/// Mirror of the `[queue]` table
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QueueStub {
    pub byte_limit:              u64,
    pub min_trim_fraction:       f64,
    pub capacity_check_interval: String,
    pub flush_interval_ms:       u64,
    pub batch_size:              usize,
    pub channel_capacity:        usize,
    pub max_retries:             u32,
}

impl Default for QueueStub {
    fn default() -> Self {
        Self {
            byte_limit:              3 * 1024 * 1024,
            min_trim_fraction:       0.25,
            capacity_check_interval: "30s".into(),
            flush_interval_ms:       250,
            batch_size:              1_000,
            channel_capacity:        10_000,
            max_retries:             3,
        }
    }
}

/// Fully-typed `[queue]` settings
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// 0 disables capacity trimming
    pub byte_limit:              u64,
    pub min_trim_fraction:       f64,
    pub capacity_check_interval: Duration,
    pub flush_interval_ms:       u64,
    pub batch_size:              usize,
    pub channel_capacity:        usize,
    pub max_retries:             u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            byte_limit:              3 * 1024 * 1024,
            min_trim_fraction:       0.25,
            capacity_check_interval: Duration::from_secs(30),
            flush_interval_ms:       250,
            batch_size:              1_000,
            channel_capacity:        10_000,
            max_retries:             3,
        }
    }
}

/// Allowed `synchronous` pragma values
const SYNCHRONOUS_MODES: [&str; 4] = ["OFF", "NORMAL", "FULL", "EXTRA"];

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level '{0}'")]
    InvalidLevel(String),

    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl TryFrom<LoggingStub> for LoggingConfig {
    type Error = ConfigError;

    fn try_from(stub: LoggingStub) -> Result<Self, Self::Error> {
        let level = LevelFilter::from_str(stub.level.trim())
            .map_err(|_| ConfigError::InvalidLevel(stub.level.clone()))?;
        Ok(LoggingConfig { enable: stub.enable, file: stub.file, level })
    }
}

impl TryFrom<QueueStub> for QueueConfig {
    type Error = ConfigError;

    fn try_from(stub: QueueStub) -> Result<Self, Self::Error> {
        let fraction = stub.min_trim_fraction;
        if !fraction.is_finite() || fraction <= 0.0 || fraction > 1.0 {
            return Err(ConfigError::Invalid("queue.min_trim_fraction", fraction.to_string()));
        }
        if stub.batch_size == 0 {
            return Err(ConfigError::Invalid("queue.batch_size", "0".into()));
        }
        if stub.channel_capacity == 0 {
            return Err(ConfigError::Invalid("queue.channel_capacity", "0".into()));
        }
        if stub.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid("queue.flush_interval_ms", "0".into()));
        }
        let interval = humantime::parse_duration(&stub.capacity_check_interval)
            .map_err(|e| ConfigError::InvalidDuration(stub.capacity_check_interval.clone(), e))?;
        if interval.is_zero() {
            return Err(ConfigError::Invalid(
                "queue.capacity_check_interval",
                stub.capacity_check_interval,
            ));
        }

        Ok(QueueConfig {
            byte_limit:              stub.byte_limit,
            min_trim_fraction:       fraction,
            capacity_check_interval: interval,
            flush_interval_ms:       stub.flush_interval_ms,
            batch_size:              stub.batch_size,
            channel_capacity:        stub.channel_capacity,
            max_retries:             stub.max_retries,
        })
    }
}

impl TryFrom<ConfigStub> for Config {
    type Error = ConfigError;

    fn try_from(stub: ConfigStub) -> Result<Self, Self::Error> {
        let mode = stub.database.synchronous.to_uppercase();
        if !SYNCHRONOUS_MODES.contains(&mode.as_str()) {
            return Err(ConfigError::Invalid("database.synchronous", stub.database.synchronous));
        }
        if stub.database.path.trim().is_empty() {
            return Err(ConfigError::Invalid("database.path", String::new()));
        }
        let mut database = stub.database;
        database.synchronous = mode;

        Ok(Config {
            logging: stub.logging.try_into()?,
            database,
            queue: stub.queue.try_into()?,
        })
    }
}
