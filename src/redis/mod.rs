//! Redis integration
//!
//! Production [`BitmapStore`](crate::engine::traits::BitmapStore) backed by
//! Redis strings used as bitmaps.
//!
//! # Architecture
//!
//! ```text
//! Redis Schema (see crate::keys):
//! {ns}:event:{event}:{interval}:{bucket}   → STRING bitmap (SETBIT/GETBIT/BITCOUNT)
//! {ns}:user:{identifier}                   → STRING offset (SET NX / GET)
//! {ns}:user-counter                        → INTEGER (INCR)
//! ```
//!
//! # Features
//!
//! - Bounded concurrency over a multiplexed connection
//! - Command timeouts and retry with exponential backoff
//! - Incremental key enumeration with `SCAN` instead of `KEYS`
//! - Credential-free error messages
//!
//! # Example
//!
//! ```rust,no_run
//! use kuba_bitevents::redis::{RedisBitmapStore, RedisConfig};
//! use kuba_bitevents::engine::traits::BitmapStore;
//!
//! # async fn example() -> kuba_bitevents::Result<()> {
//! let store = RedisBitmapStore::new(RedisConfig::default()).await?;
//! assert_eq!(store.store_id(), "redis-bitmap-store-v1");
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod store;
pub mod util;

pub use connection::{HealthStatus, PoolMetricsSnapshot, RedisConfig, RedisPool, RetryPolicy};
pub use store::RedisBitmapStore;
