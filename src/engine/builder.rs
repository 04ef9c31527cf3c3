//! Event engine with a pluggable bitmap store
//!
//! This module provides the [`EventEngine`] type that wires the key scheme,
//! interner, tracker, aggregator and catalog around one store.

use super::traits::BitmapStore;
use crate::aggregator::Aggregator;
use crate::catalog::EventCatalog;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::interner::{IdentifierInterner, DEFAULT_MAX_INTERN_ATTEMPTS};
use crate::keys::{KeyScheme, DEFAULT_NAMESPACE};
use crate::metrics;
use crate::redis::RedisBitmapStore;
use crate::tracker::BitTracker;
use crate::types::{Bit, BucketCount, Interval, Offset};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Builder for configuring the event engine with a custom store
pub struct EventEngineBuilder {
    store: Option<Arc<dyn BitmapStore>>,
    namespace: String,
    tracking_interval: Interval,
    max_intern_attempts: u32,
}

impl EventEngineBuilder {
    /// Create a new engine builder
    pub fn new() -> Self {
        Self {
            store: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            tracking_interval: Interval::Day,
            max_intern_attempts: DEFAULT_MAX_INTERN_ATTEMPTS,
        }
    }

    /// Set the bitmap store
    pub fn with_store(mut self, store: Arc<dyn BitmapStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the key namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the interval used by `track_event` and `untrack_event`
    pub fn with_tracking_interval(mut self, interval: Interval) -> Self {
        self.tracking_interval = interval;
        self
    }

    /// Set how many allocate-and-record rounds the interner tries
    pub fn with_max_intern_attempts(mut self, attempts: u32) -> Self {
        self.max_intern_attempts = attempts;
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<EventEngine> {
        let store = self
            .store
            .ok_or_else(|| Error::Configuration("Bitmap store not configured".to_string()))?;
        if self.namespace.is_empty() {
            return Err(Error::Configuration("Key namespace cannot be empty".to_string()));
        }
        if self.max_intern_attempts == 0 {
            return Err(Error::Configuration(
                "Max intern attempts must be greater than 0".to_string(),
            ));
        }

        let keys = Arc::new(KeyScheme::new(self.namespace));
        let interner = IdentifierInterner::new(store.clone(), keys.clone())
            .with_max_attempts(self.max_intern_attempts);

        info!(
            store = store.store_id(),
            namespace = keys.namespace(),
            tracking_interval = %self.tracking_interval,
            "Event engine initialized"
        );

        Ok(EventEngine {
            tracker: BitTracker::new(store.clone(), keys.clone(), interner.clone()),
            aggregator: Aggregator::new(store.clone(), keys.clone(), interner.clone()),
            catalog: EventCatalog::new(store.clone(), keys.clone()),
            interner,
            keys,
            store,
            tracking_interval: self.tracking_interval,
        })
    }
}

impl Default for EventEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Bit-indexed event tracking engine
///
/// Cheap to clone; clones share the same store.
///
/// # Example
///
/// ```rust
/// use kuba_bitevents::engine::{EventEngine, InMemoryBitmapStore};
/// use kuba_bitevents::Interval;
/// use chrono::{TimeZone, Utc};
/// use std::sync::Arc;
///
/// # async fn example() -> kuba_bitevents::Result<()> {
/// let engine = EventEngine::builder()
///     .with_store(Arc::new(InMemoryBitmapStore::new()))
///     .with_tracking_interval(Interval::Day)
///     .build()?;
///
/// let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
/// engine.track_event("login", "alice", at).await?;
/// assert_eq!(engine.count_event("login", at, Interval::Day).await?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EventEngine {
    store: Arc<dyn BitmapStore>,
    keys: Arc<KeyScheme>,
    interner: IdentifierInterner,
    tracker: BitTracker,
    aggregator: Aggregator,
    catalog: EventCatalog,
    tracking_interval: Interval,
}

impl EventEngine {
    /// Start building an engine
    pub fn builder() -> EventEngineBuilder {
        EventEngineBuilder::new()
    }

    /// Connect to Redis and build an engine from configuration
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let store = RedisBitmapStore::new(config.redis.to_redis_config()).await?;
        Self::builder()
            .with_store(Arc::new(store))
            .with_namespace(config.engine.key_prefix.clone())
            .with_tracking_interval(config.engine.tracking_interval)
            .with_max_intern_attempts(config.engine.max_intern_attempts)
            .build()
    }

    /// Interval used by `track_event` and `untrack_event`
    pub fn tracking_interval(&self) -> Interval {
        self.tracking_interval
    }

    /// Key scheme of this engine
    pub fn keys(&self) -> &KeyScheme {
        &self.keys
    }

    /// Underlying bitmap store
    pub fn store(&self) -> &Arc<dyn BitmapStore> {
        &self.store
    }

    /// Record that `user` did `event` at `at`, in the tracking interval
    pub async fn track_event(&self, event: &str, user: &str, at: DateTime<Utc>) -> Result<()> {
        self.set_event_bit(event, user, at, self.tracking_interval, Bit::On)
            .await
    }

    /// Clear the record of `user` doing `event` at `at`, in the tracking interval
    pub async fn untrack_event(&self, event: &str, user: &str, at: DateTime<Utc>) -> Result<()> {
        self.set_event_bit(event, user, at, self.tracking_interval, Bit::Off)
            .await
    }

    /// Set or clear `user`'s bit for `event` in an explicit interval
    pub async fn set_event_bit(
        &self,
        event: &str,
        user: &str,
        at: DateTime<Utc>,
        interval: Interval,
        bit: Bit,
    ) -> Result<()> {
        instrument(
            "set_event_bit",
            self.tracker.set_event_bit(event, user, at, interval, bit),
        )
        .await
    }

    /// Number of users who did `event` in the bucket containing `at`
    pub async fn count_event(
        &self,
        event: &str,
        at: DateTime<Utc>,
        interval: Interval,
    ) -> Result<u64> {
        instrument("count_event", self.aggregator.count_event(event, at, interval)).await
    }

    /// Per-bucket counts for `event` between `from` and `to`, inclusive
    pub async fn count_event_range(
        &self,
        event: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<BucketCount>> {
        instrument(
            "count_event_range",
            self.aggregator.count_event_range(event, from, to, interval),
        )
        .await
    }

    /// Whether `user` did `event` in the bucket containing `at`
    ///
    /// Never allocates an offset; unknown users yield `false`.
    pub async fn did_event(
        &self,
        event: &str,
        user: &str,
        at: DateTime<Utc>,
        interval: Interval,
    ) -> Result<bool> {
        instrument("did_event", self.aggregator.did_event(event, user, at, interval)).await
    }

    /// Whether `user` did `event`, allocating an offset for unknown users
    pub async fn did_event_or_register(
        &self,
        event: &str,
        user: &str,
        at: DateTime<Utc>,
        interval: Interval,
    ) -> Result<bool> {
        instrument(
            "did_event_or_register",
            self.aggregator.did_event_or_register(event, user, at, interval),
        )
        .await
    }

    /// Distinct tracked event names starting with `name_prefix`
    pub async fn list_events(&self, name_prefix: &str) -> Result<Vec<String>> {
        instrument("list_events", self.catalog.list_events(name_prefix)).await
    }

    /// Offset of a user, allocating one on first sight
    pub async fn resolve_user(&self, user: &str) -> Result<Offset> {
        instrument("resolve_user", self.interner.resolve(user)).await
    }

    /// Number of offsets allocated so far
    pub async fn known_users(&self) -> Result<u64> {
        instrument("known_users", self.interner.allocated()).await
    }
}

/// Time an operation and count its errors
async fn instrument<T>(operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    let start = Instant::now();
    let result = fut.await;
    metrics::observe_duration(operation, start.elapsed().as_secs_f64());
    if let Err(err) = &result {
        metrics::record_error(err, operation);
    }
    result
}
