//! Cache-related error types

use std::time::Duration;

use thiserror::Error;

use crate::tier::Tier;

/// Cache operation errors
///
/// Only [`CacheError::Configuration`] ever escapes the public engine API; the
/// rest are produced by tier adapters and the compression worker and are
/// converted into `false` / `None` results at the engine boundary.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Write to {tier} tier failed: {message}")]
    StorageWrite { tier: Tier, message: String },

    #[error("Read from {tier} tier failed: {message}")]
    StorageRead { tier: Tier, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Deserialization error: {message}")]
    Deserialization { message: String },

    #[error("Compression error: {message}")]
    Compression { message: String },

    #[error("Compression worker did not answer within {0:?}")]
    CompressionTimeout(Duration),

    #[error("Compression worker unavailable: {0}")]
    CompressionUnavailable(String),

    #[error("The {0} tier is disabled")]
    TierDisabled(Tier),

    #[error("Invalid cache configuration: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl CacheError {
    /// The worker could not answer in time; the payload itself may be fine
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CompressionTimeout(_) | Self::CompressionUnavailable(_)
        )
    }

    pub(crate) fn write(tier: Tier, message: impl Into<String>) -> Self {
        Self::StorageWrite {
            tier,
            message: message.into(),
        }
    }

    pub(crate) fn read(tier: Tier, message: impl Into<String>) -> Self {
        Self::StorageRead {
            tier,
            message: message.into(),
        }
    }
}

/// Re-export commonly used Result type
pub type Result<T> = std::result::Result<T, CacheError>;
