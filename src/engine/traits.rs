//! Trait definitions for pluggable bitmap stores

use async_trait::async_trait;

use crate::error::Result;

/// Bitmap key-value store used by the engine
///
/// Every method is a single-key operation that the store must execute
/// atomically. Values are binary-safe strings addressed bit by bit, with bit 0
/// being the most significant bit of the first byte (Redis `SETBIT` order).
/// Bits past the end of a value, and values that do not exist, read as 0.
#[async_trait]
pub trait BitmapStore: Send + Sync + 'static {
    /// Unique identifier for this store backend
    fn store_id(&self) -> &str;

    /// Read one bit
    async fn get_bit(&self, key: &str, offset: u64) -> Result<bool>;

    /// Write one bit, returning its previous value
    async fn set_bit(&self, key: &str, offset: u64, value: bool) -> Result<bool>;

    /// Number of bits set to 1 in the value at `key` (0 if absent)
    async fn bit_count(&self, key: &str) -> Result<u64>;

    /// Atomically increment an integer counter, returning the new value
    ///
    /// A missing counter counts from 0, so the first call returns 1.
    async fn increment(&self, key: &str) -> Result<i64>;

    /// Read a string value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string value only if the key does not exist yet
    ///
    /// Returns `true` if this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool>;

    /// All keys matching a glob pattern (`*`, `?`, `[...]`, `\` escapes)
    ///
    /// Cost is proportional to the size of the key space. The result may
    /// contain duplicates when the store enumerates incrementally. Keys that
    /// are not valid UTF-8 are left out.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>>;
}
