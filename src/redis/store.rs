//! Redis-backed bitmap store
//!
//! Maps every [`BitmapStore`] operation onto exactly one Redis command (or, for
//! key enumeration, a `SCAN` cursor loop):
//!
//! | Operation        | Command                    |
//! |------------------|----------------------------|
//! | `get_bit`        | `GETBIT key offset`        |
//! | `set_bit`        | `SETBIT key offset 0\|1`   |
//! | `bit_count`      | `BITCOUNT key`             |
//! | `increment`      | `INCR key`                 |
//! | `get`            | `GET key`                  |
//! | `set_if_absent`  | `SET key value NX`         |
//! | `scan_keys`      | `SCAN cursor MATCH p COUNT n` |

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

use super::connection::{HealthStatus, PoolMetricsSnapshot, RedisConfig, RedisPool};
use crate::engine::traits::BitmapStore;
use crate::error::Result;
use crate::metrics;

/// Bitmap store on top of a Redis connection pool
pub struct RedisBitmapStore {
    pool: Arc<RedisPool>,
}

impl RedisBitmapStore {
    /// Connect to Redis and create the store
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let pool = Arc::new(RedisPool::new(config).await?);
        debug!("Redis bitmap store initialized");
        Ok(Self { pool })
    }

    /// Create a store over an existing pool
    pub fn with_pool(pool: Arc<RedisPool>) -> Self {
        Self { pool }
    }

    /// Ping Redis and report its health
    pub async fn health_check(&self) -> HealthStatus {
        self.pool.health_check().await
    }

    /// Connection pool metrics
    pub fn pool_metrics(&self) -> PoolMetricsSnapshot {
        self.pool.metrics()
    }
}

#[async_trait]
impl BitmapStore for RedisBitmapStore {
    fn store_id(&self) -> &str {
        "redis-bitmap-store-v1"
    }

    async fn get_bit(&self, key: &str, offset: u64) -> Result<bool> {
        self.pool
            .execute(|mut conn| async move {
                redis::cmd("GETBIT")
                    .arg(key)
                    .arg(offset)
                    .query_async::<u8>(&mut conn)
                    .await
            })
            .await
            .map(|bit| bit == 1)
    }

    async fn set_bit(&self, key: &str, offset: u64, value: bool) -> Result<bool> {
        self.pool
            .execute(|mut conn| async move {
                redis::cmd("SETBIT")
                    .arg(key)
                    .arg(offset)
                    .arg(u8::from(value))
                    .query_async::<u8>(&mut conn)
                    .await
            })
            .await
            .map(|previous| previous == 1)
    }

    async fn bit_count(&self, key: &str) -> Result<u64> {
        self.pool
            .execute(|mut conn| async move {
                redis::cmd("BITCOUNT")
                    .arg(key)
                    .query_async::<u64>(&mut conn)
                    .await
            })
            .await
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        self.pool
            .execute(|mut conn| async move {
                redis::cmd("INCR").arg(key).query_async::<i64>(&mut conn).await
            })
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.pool
            .execute(|mut conn| async move {
                redis::cmd("GET")
                    .arg(key)
                    .query_async::<Option<String>>(&mut conn)
                    .await
            })
            .await
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        // SET .. NX answers OK when it wrote and nil when the key existed
        self.pool
            .execute(|mut conn| async move {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .query_async::<Option<String>>(&mut conn)
                    .await
            })
            .await
            .map(|reply| reply.is_some())
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let batch = self.pool.config().scan_batch_size;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        // Each page is its own command so one slow page never holds a permit
        // for the whole enumeration
        loop {
            let (next, page) = self
                .pool
                .execute(|mut conn| async move {
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(batch)
                        .query_async::<(u64, Vec<Vec<u8>>)>(&mut conn)
                        .await
                })
                .await?;

            trace!(cursor, next, found = page.len(), "SCAN page");
            keys.extend(utf8_keys(page));

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }
}

/// Keep the keys of a SCAN page that are valid UTF-8
///
/// Binary key names can share the event prefix but never decode to an event.
fn utf8_keys(page: Vec<Vec<u8>>) -> Vec<String> {
    page.into_iter()
        .filter_map(|raw| match String::from_utf8(raw) {
            Ok(key) => Some(key),
            Err(e) => {
                trace!(key = ?String::from_utf8_lossy(e.as_bytes()), "Skipping non UTF-8 key");
                metrics::record_skipped_key();
                None
            },
        })
        .collect()
}
