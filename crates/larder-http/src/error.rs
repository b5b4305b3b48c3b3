//! HTTP cache error types

use thiserror::Error;

/// Result type for HTTP cache operations
pub type Result<T> = std::result::Result<T, HttpCacheError>;

/// HTTP cache errors
#[derive(Debug, Error)]
pub enum HttpCacheError {
    /// Network request failed
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A no-cache or private pattern is not a valid regular expression
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Invalid proxy configuration
    #[error("Invalid proxy configuration: {0}")]
    InvalidProxy(String),

    #[error("Invalid HTTP cache configuration: {0}")]
    Configuration(String),

    /// Client build error
    #[error("Failed to build HTTP client: {0}")]
    BuildError(String),
}

impl From<url::ParseError> for HttpCacheError {
    fn from(e: url::ParseError) -> Self {
        HttpCacheError::InvalidUrl(e.to_string())
    }
}
