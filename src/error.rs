//! Error types for the event tracking engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// The backing store could not be reached or timed out
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The backing store answered with an error (wrong type, bad counter, ...)
    #[error("Store error: {0}")]
    Store(String),

    /// Assigning an offset to a new identifier failed
    #[error("Intern failure for identifier {identifier:?}: {reason}")]
    InternFailure {
        /// The identifier being interned
        identifier: String,
        /// Why the allocation could not complete
        reason: String,
    },

    /// Event name cannot be encoded into a bitmap key
    #[error("Invalid event name {name:?}: {reason}")]
    InvalidEventName {
        /// The rejected event name
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// User identifier is not usable
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Timestamp cannot be encoded as a fixed-width bucket label
    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(String),

    /// Range query bounds are invalid
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short, stable label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::StoreUnavailable(_) => "store_unavailable",
            Error::Store(_) => "store",
            Error::InternFailure { .. } => "intern_failure",
            Error::InvalidEventName { .. } => "invalid_event_name",
            Error::InvalidIdentifier(_) => "invalid_identifier",
            Error::TimestampOutOfRange(_) => "timestamp_out_of_range",
            Error::InvalidRange(_) => "invalid_range",
            Error::Configuration(_) => "configuration",
            Error::Io(_) => "io",
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
