//! Identifier interning
//!
//! Maps opaque user identifiers to dense bitmap offsets. Unlike an in-process
//! interner, the mapping lives in the bitmap store so offsets survive restarts
//! and are shared by every engine instance using the same namespace.
//!
//! # Allocation Protocol
//!
//! ```text
//! GET  {ns}:user:{id}            → hit: return stored offset
//! INCR {ns}:user-counter         → n, candidate offset = n - 1
//! SET  {ns}:user:{id} n-1 NX     → won: return n - 1
//!                                → lost: GET again, return the winner's offset
//! ```
//!
//! The conditional write makes racing first-time resolutions of one
//! identifier converge on a single offset. The losing caller's counter value
//! is never used by anyone, so a race leaves a gap in the offset sequence but
//! never a shared offset.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::traits::BitmapStore;
use crate::error::{Error, Result};
use crate::keys::KeyScheme;
use crate::metrics;
use crate::types::Offset;

/// Largest offset a bitmap can address (Redis strings are capped at 512 MB)
pub const MAX_OFFSET: Offset = (1 << 32) - 1;

/// Default number of allocate-and-record rounds before giving up
pub const DEFAULT_MAX_INTERN_ATTEMPTS: u32 = 3;

/// Store-backed identifier interner
///
/// Holds no mutable state of its own, so it is safe to share between tasks.
#[derive(Clone)]
pub struct IdentifierInterner {
    store: Arc<dyn BitmapStore>,
    keys: Arc<KeyScheme>,
    max_attempts: u32,
}

impl IdentifierInterner {
    /// Create an interner over a store and key scheme
    pub fn new(store: Arc<dyn BitmapStore>, keys: Arc<KeyScheme>) -> Self {
        Self {
            store,
            keys,
            max_attempts: DEFAULT_MAX_INTERN_ATTEMPTS,
        }
    }

    /// Set how many allocate-and-record rounds to try before failing
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Offset of an identifier, allocating one on first sight
    pub async fn resolve(&self, identifier: &str) -> Result<Offset> {
        validate_identifier(identifier)?;
        let record_key = self.keys.user_key(identifier);

        if let Some(offset) = self.read_record(identifier, &record_key).await? {
            metrics::record_intern("hit");
            return Ok(offset);
        }

        let counter_key = self.keys.counter_key();
        for attempt in 1..=self.max_attempts {
            let allocated = self.store.increment(&counter_key).await?;
            let candidate = counter_to_offset(identifier, allocated)?;

            if self
                .store
                .set_if_absent(&record_key, &candidate.to_string())
                .await?
            {
                metrics::record_intern("allocated");
                debug!(identifier, offset = candidate, "Allocated offset");
                return Ok(candidate);
            }

            // Another caller recorded this identifier first; adopt its offset
            metrics::record_intern("race_lost");
            if let Some(offset) = self.read_record(identifier, &record_key).await? {
                debug!(
                    identifier,
                    offset,
                    wasted = candidate,
                    "Lost allocation race, using existing offset"
                );
                return Ok(offset);
            }

            warn!(
                identifier,
                attempt, "Identifier record vanished after a lost allocation race"
            );
        }

        Err(Error::InternFailure {
            identifier: identifier.to_string(),
            reason: format!(
                "record could not be written or read after {} attempts",
                self.max_attempts
            ),
        })
    }

    /// Offset of an identifier if one was ever allocated; never allocates
    pub async fn lookup(&self, identifier: &str) -> Result<Option<Offset>> {
        validate_identifier(identifier)?;
        let offset = self
            .read_record(identifier, &self.keys.user_key(identifier))
            .await?;
        if offset.is_none() {
            metrics::record_intern("unknown");
        }
        Ok(offset)
    }

    /// Number of offsets handed out so far, including ones lost to races
    pub async fn allocated(&self) -> Result<u64> {
        match self.store.get(&self.keys.counter_key()).await? {
            None => Ok(0),
            Some(raw) => raw.trim().parse().map_err(|_| {
                Error::Store(format!("offset counter holds non-integer value {:?}", raw))
            }),
        }
    }

    async fn read_record(&self, identifier: &str, record_key: &str) -> Result<Option<Offset>> {
        match self.store.get(record_key).await? {
            None => Ok(None),
            Some(raw) => match raw.trim().parse::<Offset>() {
                Ok(offset) if offset <= MAX_OFFSET => Ok(Some(offset)),
                _ => Err(Error::InternFailure {
                    identifier: identifier.to_string(),
                    reason: format!("stored offset {:?} is not a valid offset", raw),
                }),
            },
        }
    }
}

fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() {
        return Err(Error::InvalidIdentifier(
            "user identifier cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Counter values start at 1, offsets at 0
fn counter_to_offset(identifier: &str, counter: i64) -> Result<Offset> {
    match counter.checked_sub(1).and_then(|v| Offset::try_from(v).ok()) {
        Some(offset) if offset <= MAX_OFFSET => Ok(offset),
        _ => Err(Error::InternFailure {
            identifier: identifier.to_string(),
            reason: format!(
                "offset counter returned {}, outside 1..={}",
                counter,
                MAX_OFFSET + 1
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stubs::InMemoryBitmapStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn interner_with(store: Arc<InMemoryBitmapStore>) -> IdentifierInterner {
        IdentifierInterner::new(store, Arc::new(KeyScheme::new("test")))
    }

    #[tokio::test]
    async fn test_resolve_is_stable_and_dense() {
        let store = Arc::new(InMemoryBitmapStore::new());
        let interner = interner_with(store.clone());

        assert_eq!(interner.resolve("alice").await.unwrap(), 0);
        assert_eq!(interner.resolve("bob").await.unwrap(), 1);
        assert_eq!(interner.resolve("alice").await.unwrap(), 0);
        assert_eq!(interner.resolve("carol").await.unwrap(), 2);
        assert_eq!(interner.allocated().await.unwrap(), 3);

        assert_eq!(store.raw_value("test:user:bob"), Some(b"1".to_vec()));
        assert_eq!(store.raw_value("test:user-counter"), Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn test_offsets_survive_new_interner() {
        let store = Arc::new(InMemoryBitmapStore::new());
        let first = interner_with(store.clone());
        first.resolve("a").await.unwrap();
        let b = first.resolve("b").await.unwrap();

        let restarted = interner_with(store);
        assert_eq!(restarted.resolve("b").await.unwrap(), b);
        assert_eq!(restarted.resolve("c").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lookup_never_allocates() {
        let store = Arc::new(InMemoryBitmapStore::new());
        let interner = interner_with(store.clone());

        assert_eq!(interner.lookup("ghost").await.unwrap(), None);
        assert_eq!(interner.allocated().await.unwrap(), 0);
        assert!(store.is_empty());

        let offset = interner.resolve("ghost").await.unwrap();
        assert_eq!(interner.lookup("ghost").await.unwrap(), Some(offset));
    }

    #[tokio::test]
    async fn test_empty_identifier_rejected() {
        let interner = interner_with(Arc::new(InMemoryBitmapStore::new()));
        assert!(matches!(
            interner.resolve("").await,
            Err(Error::InvalidIdentifier(_))
        ));
        assert!(matches!(
            interner.lookup("").await,
            Err(Error::InvalidIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_intern_failure() {
        let store = Arc::new(InMemoryBitmapStore::new());
        store.insert_raw("test:user:mallory", "not-a-number");
        let interner = interner_with(store);
        assert!(matches!(
            interner.resolve("mallory").await,
            Err(Error::InternFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_counter_past_max_offset_is_intern_failure() {
        let store = Arc::new(InMemoryBitmapStore::new());
        store.insert_raw("test:user-counter", (MAX_OFFSET + 1).to_string());
        let interner = interner_with(store);
        let err = interner.resolve("late").await.unwrap_err();
        assert!(matches!(err, Error::InternFailure { .. }), "{}", err);
    }

    /// Store whose conditional write always loses, as if another caller
    /// recorded the identifier first
    struct RacingStore {
        inner: InMemoryBitmapStore,
        /// Offset the "other caller" wrote; `None` simulates a vanished record
        winner: Option<Offset>,
        rounds: AtomicU32,
    }

    #[async_trait]
    impl BitmapStore for RacingStore {
        fn store_id(&self) -> &str {
            "racing"
        }
        async fn get_bit(&self, key: &str, offset: u64) -> Result<bool> {
            self.inner.get_bit(key, offset).await
        }
        async fn set_bit(&self, key: &str, offset: u64, value: bool) -> Result<bool> {
            self.inner.set_bit(key, offset, value).await
        }
        async fn bit_count(&self, key: &str) -> Result<u64> {
            self.inner.bit_count(key).await
        }
        async fn increment(&self, key: &str) -> Result<i64> {
            self.inner.increment(key).await
        }
        async fn get(&self, key: &str) -> Result<Option<String>> {
            // The first read (fast path) sees nothing; later reads see the winner
            if key.contains(":user:") {
                let round = self.rounds.fetch_add(1, Ordering::SeqCst);
                if round == 0 {
                    return Ok(None);
                }
                return Ok(self.winner.map(|o| o.to_string()));
            }
            self.inner.get(key).await
        }
        async fn set_if_absent(&self, _key: &str, _value: &str) -> Result<bool> {
            Ok(false)
        }
        async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
            self.inner.scan_keys(pattern).await
        }
    }

    #[tokio::test]
    async fn test_lost_race_adopts_winner() {
        let store = Arc::new(RacingStore {
            inner: InMemoryBitmapStore::new(),
            winner: Some(41),
            rounds: AtomicU32::new(0),
        });
        let interner = IdentifierInterner::new(store, Arc::new(KeyScheme::new("test")));
        assert_eq!(interner.resolve("dave").await.unwrap(), 41);
        // Our allocation was consumed even though it went unused
        assert_eq!(interner.allocated().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_vanished_record_exhausts_attempts() {
        let store = Arc::new(RacingStore {
            inner: InMemoryBitmapStore::new(),
            winner: None,
            rounds: AtomicU32::new(0),
        });
        let interner = IdentifierInterner::new(store, Arc::new(KeyScheme::new("test")))
            .with_max_attempts(2);
        match interner.resolve("erin").await {
            Err(Error::InternFailure { identifier, .. }) => assert_eq!(identifier, "erin"),
            other => panic!("expected InternFailure, got {:?}", other),
        }
        assert_eq!(interner.allocated().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolve() {
        let store = Arc::new(InMemoryBitmapStore::new());
        let interner = interner_with(store);

        let mut handles = Vec::new();
        for i in 0..64 {
            let interner = interner.clone();
            handles.push(tokio::spawn(async move {
                // Every user is resolved by two tasks at once
                let user = format!("user-{}", i % 32);
                let offset = interner.resolve(&user).await.unwrap();
                (user, offset)
            }));
        }

        let mut by_user = std::collections::HashMap::new();
        for handle in handles {
            let (user, offset) = handle.await.unwrap();
            let previous = by_user.insert(user.clone(), offset);
            if let Some(previous) = previous {
                assert_eq!(previous, offset, "{} resolved to two offsets", user);
            }
        }

        let distinct: HashSet<Offset> = by_user.values().copied().collect();
        assert_eq!(distinct.len(), 32);
    }
}
