//! # Larder Integration
//!
//! A single facade over the Larder cache engine and HTTP cache strategy.
//!
//! ## Features
//!
//! - **Automatic placement**: tier chosen from payload size and declared scope
//! - **Invalidation rules**: glob-matched TTL defaults and cascade policy
//! - **Response cache**: GET responses served from the engine before the network
//! - **Layered settings**: TOML file plus `LARDER__` environment overrides
//! - **Running metrics**: hit rate and response time without request history
//!
//! ## Example
//!
//! ```no_run
//! use larder_integration::{CacheIntegrationLayer, LarderSettings, LayerStoreOptions};
//!
//! # async fn demo() -> larder_integration::Result<()> {
//! let layer = CacheIntegrationLayer::new(LarderSettings::default())?;
//! layer.store("profile:7", &"Ada", LayerStoreOptions::new()).await;
//! let name: Option<String> = layer.retrieve("profile:7").await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod fetch;
pub mod layer;
pub mod metrics;
pub mod rules;
pub mod selection;
pub mod settings;

pub use error::{IntegrationError, Result};
pub use fetch::{response_cache_key, ttl_from_headers, CachedFetch, DEFAULT_RESPONSE_TTL};
pub use layer::{CacheIntegrationLayer, IntegrationStats, LayerStoreOptions, Placement};
pub use metrics::{IntegrationMetrics, PerformanceMetrics};
pub use rules::{InvalidationRule, RuleSet};
pub use selection::{select_tier, Scope, SelectionThresholds};
pub use settings::{LarderSettings, SettingsLoader};

/// Re-export the underlying crates
pub use larder_cache;
pub use larder_http;
