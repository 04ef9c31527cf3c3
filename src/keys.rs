//! Interval key scheme
//!
//! Maps `(event, timestamp, interval)` triples onto bitmap keys and parses
//! event names back out of them.
//!
//! # Key Schema
//!
//! ```text
//! {ns}:event:{event}:{interval}:{YYYYMMDDTHH}   → bitmap, bit N = user offset N
//! {ns}:user:{identifier}                        → STRING offset assigned to the identifier
//! {ns}:user-counter                             → INTEGER offsets handed out so far
//! ```
//!
//! The bucket label is fixed width so keys of one event sort chronologically.
//! Event names may not contain `:`, which keeps decoding unambiguous.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use thiserror::Error;

use crate::error::{Error, Result};
use crate::types::Interval;

/// Separator between key segments; reserved, never allowed in event names
pub const SEPARATOR: char = ':';

/// Maximum allowed length for event names in bytes
pub const MAX_EVENT_NAME_LENGTH: usize = 256;

/// Default namespace for all keys owned by the engine
pub const DEFAULT_NAMESPACE: &str = "bitevents";

const EVENT_REGION: &str = "event";
const USER_REGION: &str = "user";
const COUNTER_SUFFIX: &str = "user-counter";

/// Length of the encoded bucket label (`YYYYMMDDTHH`)
const BUCKET_LABEL_LEN: usize = 11;

/// Why a key could not be decoded as an event bitmap key
///
/// Never surfaced to callers; the catalog scanner only logs and skips.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedKey {
    /// Key is outside the event region of this namespace
    #[error("key does not start with the event prefix")]
    MissingPrefix,

    /// Wrong number of segments after the event prefix
    #[error("expected 3 segments after prefix, found {0}")]
    SegmentCount(usize),

    /// Event segment is empty or could never have been written
    #[error("invalid event name segment")]
    InvalidEventName,

    /// Interval segment is not a known label
    #[error("unknown interval label '{0}'")]
    UnknownInterval(String),

    /// Bucket segment is not a valid `YYYYMMDDTHH` label
    #[error("invalid bucket label '{0}'")]
    InvalidBucket(String),

    /// Bucket is not the start of a bucket for its interval
    #[error("bucket '{0}' is not aligned to its interval")]
    UnalignedBucket(String),
}

/// A decoded event bitmap key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventKey {
    /// Event name embedded in the key
    pub event: String,
    /// Interval the bucket belongs to
    pub interval: Interval,
    /// Start of the bucket (UTC)
    pub bucket_start: DateTime<Utc>,
}

/// Key derivation and decoding for one namespace
#[derive(Debug, Clone)]
pub struct KeyScheme {
    namespace: String,
    event_prefix: String,
}

impl Default for KeyScheme {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl KeyScheme {
    /// Create a key scheme for the given namespace
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let event_prefix = format!("{}{}{}{}", namespace, SEPARATOR, EVENT_REGION, SEPARATOR);
        Self {
            namespace,
            event_prefix,
        }
    }

    /// Namespace shared by every key of this scheme
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Check that an event name can be embedded in a key and decoded back
    pub fn validate_event_name(name: &str) -> Result<()> {
        let reason = if name.is_empty() {
            Some("event name cannot be empty".to_string())
        } else if name.len() > MAX_EVENT_NAME_LENGTH {
            Some(format!(
                "event name is {} bytes (max: {} bytes)",
                name.len(),
                MAX_EVENT_NAME_LENGTH
            ))
        } else if name.contains(SEPARATOR) {
            Some(format!("event name cannot contain '{}'", SEPARATOR))
        } else if name.chars().any(char::is_control) {
            Some("event name cannot contain control characters".to_string())
        } else {
            None
        };

        match reason {
            Some(reason) => Err(Error::InvalidEventName {
                name: name.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Bitmap key for an event in the bucket containing `at`
    pub fn derive_key(&self, event: &str, at: DateTime<Utc>, interval: Interval) -> Result<String> {
        Self::validate_event_name(event)?;
        let bucket = encode_bucket(interval.truncate(at))?;
        Ok(format!(
            "{}{}{}{}{}{}",
            self.event_prefix,
            event,
            SEPARATOR,
            interval.label(),
            SEPARATOR,
            bucket
        ))
    }

    /// Parse a key produced by [`KeyScheme::derive_key`]
    pub fn parse_event_key(&self, key: &str) -> std::result::Result<EventKey, MalformedKey> {
        let rest = key
            .strip_prefix(self.event_prefix.as_str())
            .ok_or(MalformedKey::MissingPrefix)?;

        let segments: Vec<&str> = rest.split(SEPARATOR).collect();
        let [event, interval, bucket] = segments.as_slice() else {
            return Err(MalformedKey::SegmentCount(segments.len()));
        };

        if Self::validate_event_name(event).is_err() {
            return Err(MalformedKey::InvalidEventName);
        }

        let interval: Interval = interval
            .parse()
            .map_err(|_| MalformedKey::UnknownInterval(interval.to_string()))?;

        let bucket_start =
            decode_bucket(bucket).ok_or_else(|| MalformedKey::InvalidBucket(bucket.to_string()))?;
        if interval.truncate(bucket_start) != bucket_start {
            return Err(MalformedKey::UnalignedBucket(bucket.to_string()));
        }

        Ok(EventKey {
            event: event.to_string(),
            interval,
            bucket_start,
        })
    }

    /// Event name embedded in a bitmap key, or `None` if the key is not one
    pub fn decode_event_name(&self, key: &str) -> Option<String> {
        self.parse_event_key(key).ok().map(|parsed| parsed.event)
    }

    /// Key holding the offset assigned to an identifier
    pub fn user_key(&self, identifier: &str) -> String {
        format!("{}{}{}{}{}", self.namespace, SEPARATOR, USER_REGION, SEPARATOR, identifier)
    }

    /// Key of the offset allocation counter
    pub fn counter_key(&self) -> String {
        format!("{}{}{}", self.namespace, SEPARATOR, COUNTER_SUFFIX)
    }

    /// Glob pattern matching every bitmap key whose event starts with `filter`
    pub fn event_pattern(&self, filter: &str) -> String {
        format!("{}{}*", escape_glob(&self.event_prefix), escape_glob(filter))
    }
}

/// Escape glob metacharacters so they match literally
pub fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn encode_bucket(start: DateTime<Utc>) -> Result<String> {
    let year = start.year();
    if !(0..=9999).contains(&year) {
        return Err(Error::TimestampOutOfRange(format!(
            "year {} cannot be encoded in a bucket label",
            year
        )));
    }
    Ok(format!(
        "{:04}{:02}{:02}T{:02}",
        year,
        start.month(),
        start.day(),
        start.hour()
    ))
}

fn decode_bucket(label: &str) -> Option<DateTime<Utc>> {
    let bytes = label.as_bytes();
    if bytes.len() != BUCKET_LABEL_LEN || bytes[8] != b'T' {
        return None;
    }
    if !bytes[..8].iter().chain(&bytes[9..]).all(u8::is_ascii_digit) {
        return None;
    }

    let year: i32 = label[0..4].parse().ok()?;
    let month: u32 = label[4..6].parse().ok()?;
    let day: u32 = label[6..8].parse().ok()?;
    let hour: u32 = label[9..11].parse().ok()?;

    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, 0, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}
