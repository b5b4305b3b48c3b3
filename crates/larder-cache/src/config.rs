//! Cache engine configuration

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{CacheError, Result},
    tier::Tier,
};

/// In-process memory tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryTierConfig {
    pub enabled: bool,
    /// Maximum number of resident entries before batch eviction
    pub max_entries: usize,
    /// Default TTL for entries stored without one (seconds)
    pub max_age_secs: u64,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            max_age_secs: 30 * 60,
        }
    }
}

/// Session tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTierConfig {
    pub enabled: bool,
    pub max_size_bytes: u64,
}

impl Default for SessionTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: 1024 * 1024,
        }
    }
}

/// File-backed persistent tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentTierConfig {
    pub enabled: bool,
    /// Directory holding one file per entry; the system temp dir is used when unset
    pub directory: Option<PathBuf>,
    pub max_size_bytes: u64,
    /// Upper bound applied to TTLs of entries written to this tier (seconds)
    pub max_ttl_secs: u64,
}

impl Default for PersistentTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            max_size_bytes: 5 * 1024 * 1024,
            max_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl PersistentTierConfig {
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("larder-cache"))
    }
}

/// SQLite document tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentTierConfig {
    pub enabled: bool,
    /// Database file; an in-memory database is used when unset
    pub path: Option<PathBuf>,
}

impl Default for DocumentTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Compression codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    Gzip,
    Deflate,
}

/// Payload compression settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub algorithm: CompressionAlgorithm,
    /// flate2 level, 0-9
    pub level: u32,
    /// Payloads at or below this many bytes are never compressed
    pub threshold_bytes: usize,
    /// Bounded wait for a worker reply (milliseconds)
    pub timeout_ms: u64,
    /// Largest payload compressed on the caller's path when no worker is running
    pub sync_fallback_limit_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: CompressionAlgorithm::Gzip,
            level: 6,
            threshold_bytes: 1024,
            timeout_ms: 5000,
            sync_fallback_limit_bytes: 64 * 1024,
        }
    }
}

impl CompressionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Events that may invalidate an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationTrigger {
    /// TTL expiry
    Time,
    /// Version mismatch on retrieve
    Version,
    /// Explicit invalidate calls.
    ///
    /// Informational only: [`crate::CacheEngine::invalidate`] always removes
    /// the key, with or without this trigger configured.
    Manual,
    /// Cascade from invalidated dependencies
    Dependency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidationConfig {
    pub triggers: Vec<InvalidationTrigger>,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            triggers: vec![
                InvalidationTrigger::Time,
                InvalidationTrigger::Version,
                InvalidationTrigger::Manual,
                InvalidationTrigger::Dependency,
            ],
        }
    }
}

impl InvalidationConfig {
    pub fn tracks(&self, trigger: InvalidationTrigger) -> bool {
        self.triggers.contains(&trigger)
    }
}

/// Background maintenance timers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub expiry_interval_secs: u64,
    pub pressure_interval_secs: u64,
    /// Fraction of memory capacity above which the pressure sweep evicts
    pub pressure_ratio: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            expiry_interval_secs: 5 * 60,
            pressure_interval_secs: 60,
            pressure_ratio: 0.8,
        }
    }
}

/// Cache engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub memory: MemoryTierConfig,
    pub session: SessionTierConfig,
    pub persistent: PersistentTierConfig,
    pub document: DocumentTierConfig,
    pub compression: CompressionConfig,
    pub invalidation: InvalidationConfig,
    pub sweep: SweepConfig,
    /// Probe order for automatic retrieves
    pub fallback_order: Vec<Tier>,
    /// Version stamped on entries stored without one
    pub default_version: String,
    /// Enable metrics collection
    pub enable_metrics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory: MemoryTierConfig::default(),
            session: SessionTierConfig::default(),
            persistent: PersistentTierConfig::default(),
            document: DocumentTierConfig::default(),
            compression: CompressionConfig::default(),
            invalidation: InvalidationConfig::default(),
            sweep: SweepConfig::default(),
            fallback_order: Tier::default_fallback_order(),
            default_version: "1.0.0".to_string(),
            enable_metrics: true,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory-only configuration, handy for tests and short-lived tools
    pub fn memory_only() -> Self {
        let mut config = Self::default();
        config.session.enabled = false;
        config.persistent.enabled = false;
        config.document.enabled = false;
        config.fallback_order = vec![Tier::Memory];
        config
    }

    pub fn with_memory_capacity(mut self, max_entries: usize) -> Self {
        self.memory.max_entries = max_entries;
        self
    }

    pub fn with_persistent_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persistent.directory = Some(dir.into());
        self
    }

    pub fn with_compression_threshold(mut self, threshold_bytes: usize) -> Self {
        self.compression.threshold_bytes = threshold_bytes;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.memory.max_age_secs)
    }

    pub fn is_enabled(&self, tier: Tier) -> bool {
        match tier {
            Tier::Memory => self.memory.enabled,
            Tier::Session => self.session.enabled,
            Tier::Persistent => self.persistent.enabled,
            Tier::Document => self.document.enabled,
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.memory.enabled && self.memory.max_entries == 0 {
            return Err(CacheError::Configuration(
                "memory.max_entries must be greater than 0".to_string(),
            ));
        }
        if self.compression.level > 9 {
            return Err(CacheError::Configuration(format!(
                "compression.level must be between 0 and 9, got {}",
                self.compression.level
            )));
        }
        if self.compression.timeout_ms == 0 {
            return Err(CacheError::Configuration(
                "compression.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.sweep.pressure_ratio) {
            return Err(CacheError::Configuration(
                "sweep.pressure_ratio must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.sweep.expiry_interval_secs == 0 || self.sweep.pressure_interval_secs == 0 {
            return Err(CacheError::Configuration(
                "sweep intervals must be greater than 0".to_string(),
            ));
        }
        if self.fallback_order.is_empty() {
            return Err(CacheError::Configuration(
                "fallback_order must name at least one tier".to_string(),
            ));
        }
        Ok(())
    }
}
