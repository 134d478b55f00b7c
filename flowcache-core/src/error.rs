//! Error types for FLOWCACHE operations.
//!
//! Tiers report failures through [`CacheError`]. The facade never returns
//! them to its callers; every error there degrades to a cache miss.

use std::time::Duration;
use thiserror::Error;

/// Payload encoding and compression errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Compression failed: {reason}")]
    Compress { reason: String },

    #[error("Decompression failed: {reason}")]
    Decompress { reason: String },

    #[error("Value encoding failed: {reason}")]
    Encode { reason: String },

    #[error("Value decoding failed: {reason}")]
    Decode { reason: String },
}

/// Durable store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store operation {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Corrupt record: {reason}")]
    Corrupt { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all FLOWCACHE errors.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Operational classification of a runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The payload or record could not be decoded.
    DecodeError,
    /// The durable store could not be reached in time.
    StoreUnavailable,
    /// Rejected configuration (construction time only).
    InvalidConfig,
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::Codec(_) | CacheError::Store(StoreError::Corrupt { .. }) => {
                ErrorKind::DecodeError
            }
            CacheError::Store(_) => ErrorKind::StoreUnavailable,
            CacheError::Config(_) => ErrorKind::InvalidConfig,
        }
    }

    /// Shorthand for a store connectivity failure.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        StoreError::Unavailable {
            reason: reason.into(),
        }
        .into()
    }
}

/// Result type alias for FLOWCACHE operations.
pub type CacheResult<T> = Result<T, CacheError>;
