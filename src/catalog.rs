//! Event catalog scanner
//!
//! Rebuilds the set of known event names from the key space. There is no
//! event registry: an event is known as long as one of its bitmaps exists.
//!
//! # Scalability
//!
//! A scan touches every key under the event prefix, so its cost grows with
//! the number of (event, bucket) bitmaps, not with the number of events.
//! Narrow the scan with a name prefix where possible.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::engine::traits::BitmapStore;
use crate::error::Result;
use crate::keys::KeyScheme;
use crate::metrics;

/// Enumerates distinct event names from bitmap keys
#[derive(Clone)]
pub struct EventCatalog {
    store: Arc<dyn BitmapStore>,
    keys: Arc<KeyScheme>,
}

impl EventCatalog {
    /// Create a catalog over the engine's store and key scheme
    pub fn new(store: Arc<dyn BitmapStore>, keys: Arc<KeyScheme>) -> Self {
        Self { store, keys }
    }

    /// Distinct event names starting with `name_prefix`, in first-seen order
    ///
    /// Keys under the event prefix that do not decode are skipped.
    pub async fn list_events(&self, name_prefix: &str) -> Result<Vec<String>> {
        let pattern = self.keys.event_pattern(name_prefix);
        let candidates = self.store.scan_keys(&pattern).await?;

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        let mut skipped = 0usize;

        for key in &candidates {
            let parsed = match self.keys.parse_event_key(key) {
                Ok(parsed) => parsed,
                Err(reason) => {
                    trace!(key = %key, %reason, "Skipping key that is not an event bitmap");
                    metrics::record_skipped_key();
                    skipped += 1;
                    continue;
                },
            };

            // A prefix containing the separator can match across segments
            if !parsed.event.starts_with(name_prefix) {
                continue;
            }

            if seen.insert(parsed.event.clone()) {
                events.push(parsed.event);
            }
        }

        debug!(
            pattern = %pattern,
            scanned = candidates.len(),
            skipped,
            events = events.len(),
            "Event catalog scan complete"
        );
        Ok(events)
    }
}
