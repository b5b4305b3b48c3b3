//! Integration layer error types

use larder_cache::CacheError;
use larder_http::HttpCacheError;
use thiserror::Error;

/// Result type for integration layer operations
pub type Result<T> = std::result::Result<T, IntegrationError>;

/// Errors surfaced by the integration layer
///
/// Construction and settings loading are the only fallible entry points; the
/// cache-aware fetch additionally reports transport failures and cancellation.
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("Cache engine error: {0}")]
    Cache(#[from] CacheError),

    #[error("HTTP cache error: {0}")]
    Http(#[from] HttpCacheError),

    #[error("Failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Invalid settings: {0}")]
    Validation(String),

    #[error("Request cancelled")]
    Cancelled,
}
