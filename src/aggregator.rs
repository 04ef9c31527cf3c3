//! Aggregator: the read path
//!
//! Answers "how many users did X in interval I" with a population count and
//! "did user U do X in interval I" with a single bit read.
//!
//! # Membership and allocation
//!
//! [`Aggregator::did_event`] only looks identifiers up; an identifier that was
//! never tracked is reported as `false` and no offset is allocated for it.
//! [`Aggregator::did_event_or_register`] shares the write path's resolve step
//! instead, so querying an unknown identifier permanently assigns it an
//! offset.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::engine::traits::BitmapStore;
use crate::error::{Error, Result};
use crate::interner::IdentifierInterner;
use crate::keys::KeyScheme;
use crate::metrics;
use crate::types::{BucketCount, Interval, Offset};

/// Upper bound on buckets returned by one range query
pub const MAX_RANGE_BUCKETS: usize = 10_000;

/// Read-only queries over interval bitmaps
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn BitmapStore>,
    keys: Arc<KeyScheme>,
    interner: IdentifierInterner,
}

impl Aggregator {
    /// Create an aggregator sharing the engine's store, key scheme and interner
    pub fn new(
        store: Arc<dyn BitmapStore>,
        keys: Arc<KeyScheme>,
        interner: IdentifierInterner,
    ) -> Self {
        Self {
            store,
            keys,
            interner,
        }
    }

    /// Number of users who did `event` in the bucket containing `at`
    pub async fn count_event(
        &self,
        event: &str,
        at: DateTime<Utc>,
        interval: Interval,
    ) -> Result<u64> {
        let key = self.keys.derive_key(event, at, interval)?;
        let count = self.store.bit_count(&key).await?;
        metrics::record_query("count");
        Ok(count)
    }

    /// Whether `user` did `event` in the bucket containing `at`
    ///
    /// Unknown users are reported as `false` without allocating an offset.
    pub async fn did_event(
        &self,
        event: &str,
        user: &str,
        at: DateTime<Utc>,
        interval: Interval,
    ) -> Result<bool> {
        let key = self.keys.derive_key(event, at, interval)?;
        match self.interner.lookup(user).await? {
            Some(offset) => self.read_bit(&key, offset).await,
            None => {
                metrics::record_query("membership");
                Ok(false)
            },
        }
    }

    /// Like [`Aggregator::did_event`], but allocates an offset for unknown users
    pub async fn did_event_or_register(
        &self,
        event: &str,
        user: &str,
        at: DateTime<Utc>,
        interval: Interval,
    ) -> Result<bool> {
        let key = self.keys.derive_key(event, at, interval)?;
        let offset = self.interner.resolve(user).await?;
        self.read_bit(&key, offset).await
    }

    /// Per-bucket counts from the bucket containing `from` through the one containing `to`
    pub async fn count_event_range(
        &self,
        event: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<BucketCount>> {
        if from > to {
            return Err(Error::InvalidRange(format!(
                "range start {} is after end {}",
                from, to
            )));
        }

        let last = interval.truncate(to);
        let mut bucket = interval.truncate(from);
        let mut counts = Vec::new();

        while bucket <= last {
            if counts.len() == MAX_RANGE_BUCKETS {
                return Err(Error::InvalidRange(format!(
                    "range spans more than {} {} buckets",
                    MAX_RANGE_BUCKETS, interval
                )));
            }

            let key = self.keys.derive_key(event, bucket, interval)?;
            counts.push(BucketCount {
                bucket_start: bucket,
                count: self.store.bit_count(&key).await?,
            });

            bucket = match interval.next_bucket(bucket) {
                Some(next) => next,
                None => break,
            };
        }

        metrics::record_query("range");
        Ok(counts)
    }

    async fn read_bit(&self, key: &str, offset: Offset) -> Result<bool> {
        let bit = self.store.get_bit(key, offset).await?;
        metrics::record_query("membership");
        Ok(bit)
    }
}
