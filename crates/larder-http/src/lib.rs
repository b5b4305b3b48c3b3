//! HTTP-level caching for Larder
//!
//! Generates cache headers, evaluates conditional requests, keeps resource
//! validators fresh across outbound fetches and purges CDN copies.
//!
//! ## Features
//!
//! - **Validators**: content-hash entity tags and stable `Last-Modified` times
//! - **Header policy**: no-cache and private patterns, resource-type TTLs
//! - **Conditional requests**: `If-None-Match` lists and `If-Modified-Since`
//! - **Cache-aware fetch**: mockable transport wrapper that revalidates GETs
//! - **CDN purge**: advisory, never fails the caller

pub mod cdn;
pub mod client;
pub mod config;
pub mod error;
pub mod fetch;
pub mod strategy;
pub mod validator;

pub use cdn::CdnPurger;
pub use client::{shared_client, FetchRequest, FetchResponse, HttpClient, HttpTransport};
pub use config::{CdnConfig, CdnProvider, HttpCacheConfig, HttpConfig};
pub use error::{HttpCacheError, Result};
pub use fetch::CacheAwareFetch;
pub use strategy::{
    CacheHeaders, ConditionalHeaders, ConditionalResult, HeaderOptions, HttpCacheStats,
    HttpCacheStrategy, ServedResponse,
};
pub use validator::{resource_id, Validator, ValidatorStore};

/// Re-export commonly used types
pub use reqwest::{header, Method, StatusCode};
pub use url::Url;
