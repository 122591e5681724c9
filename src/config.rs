//! Configuration module for feedkeeper.

use serde::Deserialize;
use std::path::Path;

use crate::{FeedkeeperError, Result};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/feedkeeper.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/feedkeeper.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// HTTP fetch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// User-Agent header sent with every feed request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Total request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Maximum feed size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
    /// Allow fetching from loopback, private and link-local addresses.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

fn default_user_agent() -> String {
    concat!("feedkeeper/", env!("CARGO_PKG_VERSION"), " (feed fetcher)").to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_feed_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_redirects: default_max_redirects(),
            max_feed_size_bytes: default_max_feed_size(),
            allow_private_hosts: false,
        }
    }
}

/// Scheduling and feed health configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between due-feed sweeps in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Minutes until the next fetch after a successful cycle.
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_minutes: i64,
    /// Backoff after the first consecutive failure, in minutes.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_minutes: i64,
    /// Upper bound on the backoff, in minutes.
    #[serde(default = "default_backoff_max")]
    pub backoff_max_minutes: i64,
    /// Largest exponent applied to the base backoff.
    #[serde(default = "default_backoff_max_exponent")]
    pub backoff_max_exponent: u32,
    /// Consecutive failures before a feed moves to the error state.
    #[serde(default = "default_max_errors")]
    pub max_consecutive_errors: i32,
}

fn default_sweep_interval() -> u64 {
    900 // 15 minutes
}

fn default_fetch_interval() -> i64 {
    15
}

fn default_backoff_base() -> i64 {
    15
}

fn default_backoff_max() -> i64 {
    60
}

fn default_backoff_max_exponent() -> u32 {
    5
}

fn default_max_errors() -> i32 {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            fetch_interval_minutes: default_fetch_interval(),
            backoff_base_minutes: default_backoff_base(),
            backoff_max_minutes: default_backoff_max(),
            backoff_max_exponent: default_backoff_max_exponent(),
            max_consecutive_errors: default_max_errors(),
        }
    }
}

/// Fetch job dispatch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum number of feeds fetched at the same time.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// Delay before a failed job is retried, in seconds.
    #[serde(default = "default_retry_defer")]
    pub retry_defer_secs: u64,
    /// Maximum attempts per job, the first run included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_concurrent_fetches() -> usize {
    10
}

fn default_retry_defer() -> u64 {
    300 // 5 minutes
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            retry_defer_secs: default_retry_defer(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// HTTP fetch configuration.
    #[serde(default)]
    pub fetcher: FetcherConfig,
    /// Scheduling configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Dispatch configuration.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(FeedkeeperError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FeedkeeperError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FEEDKEEPER_DATABASE_PATH`: Override the database path
    /// - `FEEDKEEPER_LOG_LEVEL`: Override the log level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FEEDKEEPER_DATABASE_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
        if let Ok(level) = std::env::var("FEEDKEEPER_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.fetcher.timeout_secs == 0 {
            return Err(FeedkeeperError::Config(
                "fetcher.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.scheduler.sweep_interval_secs == 0 || self.scheduler.fetch_interval_minutes <= 0 {
            return Err(FeedkeeperError::Config(
                "scheduler intervals must be greater than 0".to_string(),
            ));
        }
        if self.scheduler.backoff_base_minutes <= 0
            || self.scheduler.backoff_max_minutes < self.scheduler.backoff_base_minutes
        {
            return Err(FeedkeeperError::Config(
                "scheduler.backoff_max_minutes must be at least backoff_base_minutes".to_string(),
            ));
        }
        if self.scheduler.max_consecutive_errors <= 0 {
            return Err(FeedkeeperError::Config(
                "scheduler.max_consecutive_errors must be greater than 0".to_string(),
            ));
        }
        if self.dispatcher.max_concurrent_fetches == 0 || self.dispatcher.max_attempts == 0 {
            return Err(FeedkeeperError::Config(
                "dispatcher.max_concurrent_fetches and max_attempts must be greater than 0"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
