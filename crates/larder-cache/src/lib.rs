//! # Larder Cache
//!
//! Multi-tier cache engine for client-side data with dependency-aware
//! invalidation and offloaded compression.
//!
//! ## Features
//!
//! - **Storage tiers**: memory, session, file-backed persistent and SQLite document stores
//! - **LRU batch eviction**: the oldest quarter of the memory tier goes in one pass
//! - **Dependency graph**: one-hop cascade invalidation
//! - **Compression worker**: gzip/deflate on a dedicated task with a bounded wait
//! - **Background sweeps**: expiry and memory pressure on independent timers
//! - **Best-effort API**: store and retrieve never surface tier failures

pub mod compression;
pub mod config;
pub mod dependency;
pub mod engine;
pub mod entry;
pub mod error;
pub mod metrics;
pub mod storage;
pub mod tier;

pub use compression::{Codec, CompressionWorker};
pub use config::{
    CacheConfig, CompressionAlgorithm, CompressionConfig, DocumentTierConfig, InvalidationConfig,
    InvalidationTrigger, MemoryTierConfig, PersistentTierConfig, SessionTierConfig, SweepConfig,
};
pub use dependency::DependencyGraph;
pub use engine::{BackgroundTasks, CacheEngine, CacheEngineBuilder, RetrieveOptions, StoreOptions};
pub use entry::{CacheEntry, EntryMetadata};
pub use error::{CacheError, Result};
pub use metrics::{CacheMetrics, CacheStats, PerformanceStats, TierStats};
pub use storage::{DocumentTier, MemoryTier, PersistentTier, SessionTier, TierStorage};
pub use tier::Tier;
