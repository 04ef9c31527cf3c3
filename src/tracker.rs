//! Bit tracker: the write path
//!
//! Sets or clears a single user's bit in a single interval bitmap.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::trace;

use crate::engine::traits::BitmapStore;
use crate::error::Result;
use crate::interner::IdentifierInterner;
use crate::keys::KeyScheme;
use crate::metrics;
use crate::types::{Bit, Interval};

/// Writes user bits into interval bitmaps
#[derive(Clone)]
pub struct BitTracker {
    store: Arc<dyn BitmapStore>,
    keys: Arc<KeyScheme>,
    interner: IdentifierInterner,
}

impl BitTracker {
    /// Create a tracker sharing the engine's store, key scheme and interner
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

    /// Set or clear `user`'s bit for `event` in the bucket containing `at`
    ///
    /// Writing the value a bit already holds is a no-op in effect. The event
    /// name is validated before the user is resolved, so a rejected event
    /// never allocates an offset.
    pub async fn set_event_bit(
        &self,
        event: &str,
        user: &str,
        at: DateTime<Utc>,
        interval: Interval,
        bit: Bit,
    ) -> Result<()> {
        let key = self.keys.derive_key(event, at, interval)?;
        let offset = self.interner.resolve(user).await?;

        let previous = self.store.set_bit(&key, offset, bit.as_bool()).await?;
        metrics::record_bit_write(match bit {
            Bit::On => "track",
            Bit::Off => "untrack",
        });
        trace!(key = %key, offset, ?bit, previous, "Bit written");
        Ok(())
    }
}
