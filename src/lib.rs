//! Kuba Bitevents - bit-indexed per-user event tracking
//!
//! Records, for every named event and every user, whether the user performed
//! the event within an hour/day/week/month/quarter/year bucket, using one bit
//! per user per bucket in a bitmap key-value store:
//! - Deterministic bucket keys derived from UTC timestamps
//! - Store-backed identifier interning to dense bit offsets
//! - Population-count and membership queries
//! - Event discovery by decoding the key space
//! - Redis and in-memory stores behind one trait

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod keys;
pub mod types;

/// Store seam, in-memory store and the engine facade
pub mod engine;

/// Configuration management with TOML support
pub mod config;

/// Prometheus metrics
pub mod metrics;

/// Redis-backed bitmap store
pub mod redis;

/// Identifier to offset interning
pub mod interner;

/// Write path: set and clear user bits
pub mod tracker;

/// Read path: counts and membership
pub mod aggregator;

/// Event name discovery
pub mod catalog;

// Re-export main types
pub use engine::{BitmapStore, EventEngine, EventEngineBuilder, InMemoryBitmapStore};
pub use error::{Error, Result};
pub use types::{Bit, BucketCount, Interval, Offset};
