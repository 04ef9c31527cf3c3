//! Redis connection pool with health checking and retry logic
//!
//! Provides the connection handling behind [`RedisBitmapStore`](super::RedisBitmapStore):
//! - Bounded concurrency over one multiplexed connection
//! - Per-command timeouts
//! - Exponential backoff retries for transient failures
//! - Connection metrics tracking
//!
//! # Example
//!
//! ```rust,no_run
//! use kuba_bitevents::redis::{RedisConfig, RedisPool};
//! use std::time::Duration;
//!
//! # async fn example() -> kuba_bitevents::Result<()> {
//! let config = RedisConfig::with_url("redis://localhost:6379")
//!     .pool_size(32)
//!     .command_timeout(Duration::from_millis(500));
//!
//! let pool = RedisPool::new(config).await?;
//! let status = pool.health_check().await;
//! # Ok(())
//! # }
//! ```

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, warn};

use super::util::{classify_redis_error, display_target, is_unavailable, sanitize_url};
use crate::error::{Error, Result};

/// Configuration for the Redis connection pool
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Redis server URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Maximum number of in-flight commands
    /// Default: 16
    pub pool_size: u32,

    /// Timeout for establishing new connections
    /// Default: 5 seconds
    pub connection_timeout: Duration,

    /// Timeout for individual Redis commands
    /// Default: 1 second
    pub command_timeout: Duration,

    /// Retry policy for transient failures
    pub retry_policy: RetryPolicy,

    /// Enable TLS for connections
    /// Default: false
    pub tls_enabled: bool,

    /// Keys requested per `SCAN` round trip
    /// Default: 1000
    pub scan_batch_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
            tls_enabled: false,
            scan_batch_size: 1000,
        }
    }
}

impl RedisConfig {
    /// Create a new config with the specified URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the pool size
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the command timeout
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the `SCAN` batch size
    pub fn scan_batch_size(mut self, size: usize) -> Self {
        self.scan_batch_size = size;
        self
    }

    /// Enable or disable TLS (`rediss://`)
    ///
    /// Requires the `redis-tls` feature.
    pub fn tls(mut self, enabled: bool) -> Self {
        self.tls_enabled = enabled;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::Configuration(msg.to_string()));

        if self.url.is_empty() {
            return fail("Redis URL cannot be empty");
        }
        if self.pool_size == 0 {
            return fail("Pool size must be greater than 0");
        }
        if self.pool_size > 1000 {
            return fail("Pool size cannot exceed 1000");
        }
        if self.scan_batch_size == 0 {
            return fail("Scan batch size must be greater than 0");
        }
        if self.command_timeout.is_zero() {
            return fail("Command timeout must be greater than 0");
        }

        #[cfg(not(feature = "redis-tls"))]
        if self.tls_enabled {
            return fail(
                "TLS is enabled but the 'redis-tls' feature is not compiled. \
                 Enable it with: cargo build --features redis-tls",
            );
        }

        if self.tls_enabled && !self.url.starts_with("rediss://") {
            return fail("TLS is enabled but URL doesn't use the 'rediss://' scheme");
        }
        if !self.tls_enabled && self.url.starts_with("rediss://") {
            return fail("URL uses the 'rediss://' scheme but TLS is not enabled");
        }

        Ok(())
    }
}

/// Retry policy with exponential backoff
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    /// Default: 3
    pub max_retries: u32,

    /// Initial delay between retries
    /// Default: 50ms
    pub initial_delay: Duration,

    /// Maximum delay between retries
    /// Default: 2 seconds
    pub max_delay: Duration,

    /// Multiplier for exponential backoff
    /// Default: 2.0
    pub multiplier: f64,

    /// Add up to 25% random jitter to delays
    /// Default: true
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate delay for a given attempt number (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay_ms = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            delay_ms * (1.0 + rand::random::<f64>() * 0.25)
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Check if we should retry after the given attempt
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Connection pool metrics
#[derive(Debug, Default)]
pub struct PoolMetrics {
    connections_created: AtomicU64,
    connection_failures: AtomicU64,
    commands_executed: AtomicU64,
    command_failures: AtomicU64,
    retries: AtomicU64,
    total_latency_us: AtomicU64,
}

impl PoolMetrics {
    fn record_connection(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_command(&self, latency: Duration) {
        self.commands_executed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_command_failure(&self) {
        self.command_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the metrics
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        let total = self.total_latency_us.load(Ordering::Relaxed);
        let count = self.commands_executed.load(Ordering::Relaxed);
        PoolMetricsSnapshot {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            commands_executed: count,
            command_failures: self.command_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            average_latency_us: if count == 0 {
                0.0
            } else {
                total as f64 / count as f64
            },
        }
    }
}

/// Snapshot of pool metrics at a point in time
#[derive(Debug, Clone)]
pub struct PoolMetricsSnapshot {
    /// Connections established during pool lifetime
    pub connections_created: u64,
    /// Failed connection attempts
    pub connection_failures: u64,
    /// Commands that completed successfully
    pub commands_executed: u64,
    /// Commands that failed or timed out
    pub command_failures: u64,
    /// Retry attempts made for transient failures
    pub retries: u64,
    /// Average command latency in microseconds
    pub average_latency_us: f64,
}

/// Health status of the Redis connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Connection is healthy
    Healthy,
    /// Connection works but PING took longer than 100ms
    Degraded,
    /// Connection is unhealthy
    Unhealthy,
    /// Not checked yet
    Unknown,
}

/// Redis connection pool
///
/// Redis multiplexes commands over a single connection; the semaphore bounds
/// how many commands are in flight at once.
pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    config: RedisConfig,
    metrics: Arc<PoolMetrics>,
    semaphore: Arc<Semaphore>,
    health_status: RwLock<HealthStatus>,
}

impl RedisPool {
    /// Create a pool and establish the initial connection
    pub async fn new(config: RedisConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::open(config.url.as_str())
            .map_err(|e| classify_redis_error(&config.url, &e))?;
        let semaphore = Arc::new(Semaphore::new(config.pool_size as usize));

        let pool = Self {
            client,
            connection: RwLock::new(None),
            config,
            metrics: Arc::new(PoolMetrics::default()),
            semaphore,
            health_status: RwLock::new(HealthStatus::Unknown),
        };

        pool.connect().await?;

        debug!(
            server = %display_target(&pool.config.url),
            "Redis connection pool initialized"
        );
        Ok(pool)
    }

    /// Establish or re-establish the connection
    async fn connect(&self) -> Result<()> {
        let start = Instant::now();

        let conn = tokio::time::timeout(
            self.config.connection_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            self.metrics.record_connection_failure();
            Error::StoreUnavailable(format!(
                "Connection to {} timed out",
                sanitize_url(&self.config.url)
            ))
        })?
        .map_err(|e| {
            self.metrics.record_connection_failure();
            classify_redis_error(&self.config.url, &e)
        })?;

        *self.connection.write().await = Some(conn);
        self.metrics.record_connection();
        *self.health_status.write().await = HealthStatus::Healthy;

        debug!("Redis connection established in {:?}", start.elapsed());
        Ok(())
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let existing = self.connection.read().await.clone();
        match existing {
            Some(conn) => Ok(conn),
            None => {
                self.connect().await?;
                self.connection.read().await.clone().ok_or_else(|| {
                    Error::StoreUnavailable("No Redis connection available".to_string())
                })
            },
        }
    }

    /// Execute a command with timeout and retry logic
    ///
    /// Only transient failures (dropped connections, timeouts, server
    /// loading) are retried; command errors are returned immediately.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, RedisError>>,
    {
        let mut attempt = 0;

        loop {
            // The slot is released before any backoff sleep below
            let (outcome, elapsed) = with_permit(&self.semaphore, async {
                let conn = self.connection().await?;
                let start = Instant::now();
                let outcome = tokio::time::timeout(self.config.command_timeout, f(conn)).await;
                Ok::<_, Error>((outcome, start.elapsed()))
            })
            .await??;

            let retriable = match outcome {
                Ok(Ok(value)) => {
                    self.metrics.record_command(elapsed);
                    return Ok(value);
                },
                Ok(Err(e)) => {
                    self.metrics.record_command_failure();
                    if !is_unavailable(&e) || !self.config.retry_policy.should_retry(attempt) {
                        return Err(classify_redis_error(&self.config.url, &e));
                    }
                    if e.is_connection_dropped() || e.is_io_error() {
                        *self.connection.write().await = None;
                    }
                    format!("{:?}", e.kind())
                },
                Err(_) => {
                    self.metrics.record_command_failure();
                    if !self.config.retry_policy.should_retry(attempt) {
                        return Err(Error::StoreUnavailable(format!(
                            "Command to {} timed out after {:?}",
                            display_target(&self.config.url),
                            self.config.command_timeout
                        )));
                    }
                    "timeout".to_string()
                },
            };

            self.metrics.record_retry();
            let delay = self.config.retry_policy.delay_for_attempt(attempt);
            warn!(
                attempt = attempt + 1,
                ?delay,
                reason = %retriable,
                "Redis command failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Send a PING and update the health status
    pub async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        let result = self
            .execute(|mut conn| async move {
                redis::cmd("PING").query_async::<String>(&mut conn).await
            })
            .await;

        let status = match result {
            Ok(_) if start.elapsed() > Duration::from_millis(100) => HealthStatus::Degraded,
            Ok(_) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        *self.health_status.write().await = status;
        status
    }

    /// Last known health status
    ///
    /// Returns `Unknown` if the status is being updated concurrently.
    pub fn health_status(&self) -> HealthStatus {
        self.health_status
            .try_read()
            .map(|guard| *guard)
            .unwrap_or(HealthStatus::Unknown)
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Get the pool configuration
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

/// Run `fut` while holding one in-flight command slot
async fn with_permit<T>(
    semaphore: &Semaphore,
    fut: impl std::future::Future<Output = T>,
) -> Result<T> {
    let _permit = semaphore
        .acquire()
        .await
        .map_err(|_| Error::StoreUnavailable("Redis pool closed".to_string()))?;
    Ok(fut.await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RedisConfig::default();
        assert_eq!(config.pool_size, 16);
        assert_eq!(config.scan_batch_size, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let invalid = [
            RedisConfig {
                url: String::new(),
                ..Default::default()
            },
            RedisConfig::default().pool_size(0),
            RedisConfig::default().pool_size(1001),
            RedisConfig::default().scan_batch_size(0),
            RedisConfig::default().command_timeout(Duration::ZERO),
            RedisConfig::with_url("rediss://localhost:6379"),
        ];
        for config in invalid {
            assert!(
                matches!(config.validate(), Err(Error::Configuration(_))),
                "{:?}",
                config
            );
        }
    }

    #[cfg(not(feature = "redis-tls"))]
    #[test]
    fn test_tls_requires_feature() {
        let config = RedisConfig::with_url("rediss://localhost:6379").tls(true);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("redis-tls"));
    }

    #[test]
    fn test_config_builder() {
        let config = RedisConfig::with_url("redis://localhost:6380")
            .pool_size(32)
            .connection_timeout(Duration::from_secs(10))
            .retry_policy(RetryPolicy::none());

        assert_eq!(config.url, "redis://localhost:6380");
        assert_eq!(config.pool_size, 32);
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
        assert_eq!(config.retry_policy.max_retries, 0);
    }

    #[test]
    fn test_retry_policy_delay() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            jitter: false,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_policy_jitter_bounds() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            ..Default::default()
        };
        for _ in 0..20 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }

    #[test]
    fn test_retry_policy_should_retry() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..Default::default()
        };
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!RetryPolicy::none().should_retry(0));
    }

    #[test]
    fn test_pool_metrics() {
        let metrics = PoolMetrics::default();
        metrics.record_connection();
        metrics.record_command(Duration::from_micros(100));
        metrics.record_command(Duration::from_micros(200));
        metrics.record_command_failure();
        metrics.record_retry();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_created, 1);
        assert_eq!(snapshot.commands_executed, 2);
        assert_eq!(snapshot.command_failures, 1);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.average_latency_us, 150.0);
    }

    #[tokio::test]
    async fn test_permit_held_only_for_one_attempt() {
        let semaphore = Semaphore::new(1);

        let inside = with_permit(&semaphore, async { semaphore.available_permits() })
            .await
            .unwrap();
        assert_eq!(inside, 0);
        // Released once the attempt finishes, so a backoff sleep holds nothing
        assert_eq!(semaphore.available_permits(), 1);

        semaphore.close();
        assert!(matches!(
            with_permit(&semaphore, async {}).await,
            Err(Error::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_is_unavailable() {
        // Port 1 on loopback refuses connections
        let config = RedisConfig::with_url("redis://127.0.0.1:1")
            .connection_timeout(Duration::from_millis(200));
        match RedisPool::new(config).await {
            Err(Error::StoreUnavailable(_)) => {},
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
