//! In-memory bitmap store
//!
//! A lightweight alternative to Redis for testing and development. It keeps
//! every value as raw bytes with the same semantics Redis applies to the
//! commands the engine uses:
//!
//! - bitmaps grow on write and read as 0 past their end
//! - counters are decimal integer strings
//! - key enumeration uses Redis glob patterns
//!
//! # Warning
//!
//! [`InMemoryBitmapStore`] loses all data when dropped and is not suitable
//! for production use.
//!
//! # Example
//!
//! ```rust
//! use kuba_bitevents::engine::stubs::InMemoryBitmapStore;
//! use kuba_bitevents::engine::traits::BitmapStore;
//!
//! # async fn example() -> kuba_bitevents::Result<()> {
//! let store = InMemoryBitmapStore::new();
//! store.set_bit("flags", 7, true).await?;
//! assert_eq!(store.bit_count("flags").await?, 1);
//! # Ok(())
//! # }
//! ```

use crate::engine::traits::BitmapStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Largest bit offset accepted (same limit as Redis strings: 512 MB)
pub const MAX_BIT_OFFSET: u64 = (1 << 32) - 1;

/// In-memory store with Redis-compatible semantics
#[derive(Debug, Default)]
pub struct InMemoryBitmapStore {
    /// All values, keyed by name
    values: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBitmapStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Check if the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a raw value, replacing any existing one
    ///
    /// Useful for seeding foreign keys in tests.
    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.values.write().insert(key.into(), value.into());
    }

    /// Raw bytes stored at `key`
    pub fn raw_value(&self, key: &str) -> Option<Vec<u8>> {
        self.values.read().get(key).cloned()
    }

    fn check_offset(offset: u64) -> Result<(usize, u8)> {
        if offset > MAX_BIT_OFFSET {
            return Err(Error::Store(format!(
                "bit offset {} is out of range (max: {})",
                offset, MAX_BIT_OFFSET
            )));
        }
        let byte = (offset / 8) as usize;
        let mask = 0x80u8 >> (offset % 8);
        Ok((byte, mask))
    }
}

#[async_trait]
impl BitmapStore for InMemoryBitmapStore {
    fn store_id(&self) -> &str {
        "in-memory-bitmap-store"
    }

    async fn get_bit(&self, key: &str, offset: u64) -> Result<bool> {
        let (byte, mask) = Self::check_offset(offset)?;
        let values = self.values.read();
        Ok(values
            .get(key)
            .and_then(|value| value.get(byte))
            .is_some_and(|b| b & mask != 0))
    }

    async fn set_bit(&self, key: &str, offset: u64, value: bool) -> Result<bool> {
        let (byte, mask) = Self::check_offset(offset)?;
        let mut values = self.values.write();
        let bytes = values.entry(key.to_string()).or_default();

        // Grow if needed
        if byte >= bytes.len() {
            bytes.resize(byte + 1, 0);
        }

        let previous = bytes[byte] & mask != 0;
        if value {
            bytes[byte] |= mask;
        } else {
            bytes[byte] &= !mask;
        }
        Ok(previous)
    }

    async fn bit_count(&self, key: &str) -> Result<u64> {
        let values = self.values.read();
        Ok(values
            .get(key)
            .map(|bytes| bytes.iter().map(|b| u64::from(b.count_ones())).sum())
            .unwrap_or(0))
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut values = self.values.write();
        let current = match values.get(key) {
            Some(bytes) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| {
                    Error::Store(format!("value at '{}' is not an integer", key))
                })?,
            None => 0,
        };

        let next = current
            .checked_add(1)
            .ok_or_else(|| Error::Store(format!("increment of '{}' would overflow", key)))?;
        values.insert(key.to_string(), next.to_string().into_bytes());
        Ok(next)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.read();
        Ok(values
            .get(key)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let mut values = self.values.write();
        if values.contains_key(key) {
            return Ok(false);
        }
        values.insert(key.to_string(), value.as_bytes().to_vec());
        Ok(true)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let values = self.values.read();
        let mut keys: Vec<String> = values
            .keys()
            .filter(|key| glob_match(pattern.as_bytes(), key.as_bytes()))
            .cloned()
            .collect();
        // HashMap order is arbitrary; sort so results are reproducible
        keys.sort();
        Ok(keys)
    }
}

/// Match `text` against a Redis-style glob pattern
///
/// Supports `*`, `?`, `[abc]`, `[^abc]`, `[a-z]` and `\` escapes.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(b'*') => {
            // Try every split point
            let rest = &pattern[1..];
            if rest.is_empty() {
                return true;
            }
            (0..=text.len()).any(|skip| glob_match(rest, &text[skip..]))
        },
        Some(b'?') => !text.is_empty() && glob_match(&pattern[1..], &text[1..]),
        Some(b'[') => {
            let Some((&c, text_rest)) = text.split_first() else {
                return false;
            };
            match match_class(&pattern[1..], c) {
                Some((matched, pattern_rest)) => matched && glob_match(pattern_rest, text_rest),
                // Unterminated class: treat '[' literally
                None => c == b'[' && glob_match(&pattern[1..], text_rest),
            }
        },
        Some(b'\\') if pattern.len() > 1 => {
            text.first() == Some(&pattern[1]) && glob_match(&pattern[2..], &text[1..])
        },
        Some(&p) => text.first() == Some(&p) && glob_match(&pattern[1..], &text[1..]),
    }
}

/// Match one byte against a character class body (after the `[`)
///
/// Returns whether it matched and the pattern after the closing `]`.
fn match_class(class: &[u8], c: u8) -> Option<(bool, &[u8])> {
    let (negate, mut i) = match class.first() {
        Some(b'^') => (true, 1),
        _ => (false, 0),
    };

    let mut matched = false;
    loop {
        let current = *class.get(i)?;
        match current {
            b']' => break,
            b'\\' => {
                let escaped = *class.get(i + 1)?;
                matched |= escaped == c;
                i += 2;
            },
            _ if class.get(i + 1) == Some(&b'-') && class.get(i + 2).is_some_and(|&e| e != b']') => {
                let end = class[i + 2];
                let (lo, hi) = if current <= end { (current, end) } else { (end, current) };
                matched |= (lo..=hi).contains(&c);
                i += 3;
            },
            _ => {
                matched |= current == c;
                i += 1;
            },
        }
    }

    Some((matched != negate, &class[i + 1..]))
}
