//! Configuration management
//!
//! TOML configuration files with environment variable overrides and
//! sensible defaults.
//!
//! ```toml
//! [engine]
//! key_prefix = "bitevents"
//! tracking_interval = "day"
//!
//! [redis]
//! url = "redis://127.0.0.1:6379"
//! pool_size = 16
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::interner::DEFAULT_MAX_INTERN_ATTEMPTS;
use crate::keys::DEFAULT_NAMESPACE;
use crate::redis::{RedisConfig, RetryPolicy};
use crate::types::Interval;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Engine behaviour
    #[serde(default)]
    pub engine: EngineConfig,

    /// Redis connection settings
    #[serde(default)]
    pub redis: RedisSettings,
}

/// Engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Namespace prefix for every key the engine writes
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Interval used by track/untrack
    #[serde(default = "default_tracking_interval")]
    pub tracking_interval: Interval,

    /// Allocate-and-record rounds before interning fails
    #[serde(default = "default_max_intern_attempts")]
    pub max_intern_attempts: u32,
}

/// Redis connection settings as written in the config file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisSettings {
    /// Redis server URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Maximum number of in-flight commands
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Command timeout in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Retries for transient failures (0 disables retrying)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Keys requested per SCAN round trip
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// Use TLS (`rediss://`)
    #[serde(default)]
    pub tls: bool,
}

// Default value functions
fn default_key_prefix() -> String { DEFAULT_NAMESPACE.to_string() }
fn default_tracking_interval() -> Interval { Interval::Day }
fn default_max_intern_attempts() -> u32 { DEFAULT_MAX_INTERN_ATTEMPTS }
fn default_redis_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_pool_size() -> u32 { 16 }
fn default_connection_timeout_ms() -> u64 { 5_000 }
fn default_command_timeout_ms() -> u64 { 1_000 }
fn default_max_retries() -> u32 { 3 }
fn default_scan_batch_size() -> usize { 1_000 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            tracking_interval: default_tracking_interval(),
            max_intern_attempts: default_max_intern_attempts(),
        }
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            connection_timeout_ms: default_connection_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            max_retries: default_max_retries(),
            scan_batch_size: default_scan_batch_size(),
            tls: false,
        }
    }
}

impl RedisSettings {
    /// Connection pool configuration for these settings
    pub fn to_redis_config(&self) -> RedisConfig {
        RedisConfig::with_url(self.url.clone())
            .pool_size(self.pool_size)
            .connection_timeout(Duration::from_millis(self.connection_timeout_ms))
            .command_timeout(Duration::from_millis(self.command_timeout_ms))
            .retry_policy(RetryPolicy {
                max_retries: self.max_retries,
                ..Default::default()
            })
            .scan_batch_size(self.scan_batch_size)
            .tls(self.tls)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Recognised: `BITEVENTS_PREFIX`, `BITEVENTS_INTERVAL`,
    /// `BITEVENTS_REDIS_URL`, `BITEVENTS_REDIS_POOL_SIZE`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(prefix) = std::env::var("BITEVENTS_PREFIX") {
            self.engine.key_prefix = prefix;
        }
        if let Ok(interval) = std::env::var("BITEVENTS_INTERVAL") {
            self.engine.tracking_interval = interval
                .parse()
                .map_err(|e| Error::Configuration(format!("BITEVENTS_INTERVAL: {}", e)))?;
        }
        if let Ok(url) = std::env::var("BITEVENTS_REDIS_URL") {
            self.redis.url = url;
        }
        if let Ok(size) = std::env::var("BITEVENTS_REDIS_POOL_SIZE") {
            self.redis.pool_size = size.parse().map_err(|e| {
                Error::Configuration(format!("BITEVENTS_REDIS_POOL_SIZE: {}", e))
            })?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.engine.key_prefix.is_empty() {
            return Err(Error::Configuration("Key prefix cannot be empty".to_string()));
        }
        if self.engine.max_intern_attempts == 0 {
            return Err(Error::Configuration(
                "Max intern attempts must be > 0".to_string(),
            ));
        }
        self.redis.to_redis_config().validate()
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
