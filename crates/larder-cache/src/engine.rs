//! Multi-tier cache engine

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{sync::mpsc, task::JoinHandle, time};
use tracing::{debug, info, warn};

use crate::{
    compression::CompressionWorker,
    config::{CacheConfig, InvalidationTrigger},
    dependency::DependencyGraph,
    entry::CacheEntry,
    error::{CacheError, Result},
    metrics::{CacheMetrics, CacheStats, OperationTimer, TierStats},
    storage::{DocumentTier, MemoryTier, PersistentTier, SessionTier, TierStorage},
    tier::Tier,
};

/// Share of the memory tier evicted in one pass
const EVICTION_BATCH: f64 = 0.25;

/// Options for [`CacheEngine::store`]
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Falls back to the memory tier's max age
    pub ttl: Option<Duration>,
    pub tier: Tier,
    pub compress: bool,
    pub dependencies: Vec<String>,
    /// Falls back to the configured default version
    pub version: Option<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            ttl: None,
            tier: Tier::Memory,
            compress: false,
            dependencies: Vec::new(),
            version: None,
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn depends_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Options for [`CacheEngine::retrieve`]
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// Probe only this tier; `None` means automatic fallback
    pub tier: Option<Tier>,
    /// Overrides the configured fallback order in automatic mode
    pub fallback_order: Option<Vec<Tier>>,
    /// Expected entry version
    pub version: Option<String>,
}

impl RetrieveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn fallback_order(mut self, order: Vec<Tier>) -> Self {
        self.fallback_order = Some(order);
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Orchestrates store, retrieve and invalidation across the storage tiers.
///
/// Cloning is cheap and every clone shares the same tiers, dependency graph
/// and metrics. Apart from the constructor, no method returns an error: tier
/// failures are logged and reported as `false` or `None`.
#[derive(Clone)]
pub struct CacheEngine {
    config: Arc<CacheConfig>,
    memory: Option<Arc<MemoryTier>>,
    session: Option<Arc<SessionTier>>,
    persistent: Option<Arc<PersistentTier>>,
    document: Option<Arc<DocumentTier>>,
    graph: Arc<DependencyGraph>,
    compressor: Arc<CompressionWorker>,
    metrics: CacheMetrics,
}

impl CacheEngine {
    /// Create an engine, spawning the compression worker when a runtime is available
    pub fn new(config: CacheConfig) -> Result<Self> {
        CacheEngineBuilder::new().config(config).build()
    }

    pub fn builder() -> CacheEngineBuilder {
        CacheEngineBuilder::new()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Whether an adapter is running for `tier`
    pub fn is_available(&self, tier: Tier) -> bool {
        self.adapter(tier).is_some()
    }

    fn adapter(&self, tier: Tier) -> Option<&dyn TierStorage> {
        match tier {
            Tier::Memory => self.memory.as_deref().map(|t| t as &dyn TierStorage),
            Tier::Session => self.session.as_deref().map(|t| t as &dyn TierStorage),
            Tier::Persistent => self.persistent.as_deref().map(|t| t as &dyn TierStorage),
            Tier::Document => self.document.as_deref().map(|t| t as &dyn TierStorage),
        }
    }

    fn adapters(&self) -> impl Iterator<Item = &dyn TierStorage> + '_ {
        Tier::ALL.into_iter().filter_map(move |tier| self.adapter(tier))
    }

    /// Store a value. Returns `false` when the write did not land.
    pub async fn store<T>(&self, key: &str, value: &T, options: StoreOptions) -> bool
    where
        T: Serialize + ?Sized,
    {
        let timer = OperationTimer::start();
        let tier = options.tier;

        let stored = match self.try_store(key, value, options).await {
            Ok(()) => {
                debug!(key, %tier, "Stored cache entry");
                true
            }
            Err(e) => {
                warn!(key, %tier, error = %e, "Cache store failed");
                false
            }
        };

        if self.config.enable_metrics {
            self.metrics.record_store(timer.elapsed(), stored);
        }
        stored
    }

    async fn try_store<T>(&self, key: &str, value: &T, options: StoreOptions) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let adapter = self
            .adapter(options.tier)
            .ok_or(CacheError::TierDisabled(options.tier))?;

        let json = serde_json::to_string(value).map_err(|e| CacheError::Serialization {
            message: e.to_string(),
        })?;
        let (payload, compressed) = self.maybe_compress(key, json, options.compress).await;

        let mut ttl = options.ttl.unwrap_or_else(|| self.config.default_ttl());
        if options.tier == Tier::Persistent {
            ttl = ttl.min(Duration::from_secs(self.config.persistent.max_ttl_secs));
        }
        let version = options
            .version
            .unwrap_or_else(|| self.config.default_version.clone());

        let entry = CacheEntry::new(
            key,
            payload,
            ttl,
            version,
            options.dependencies.clone(),
            compressed,
        );

        if let Some(memory) = self.memory.as_deref().filter(|_| options.tier == Tier::Memory) {
            if memory.needs_eviction_for(key).await {
                self.evict_memory().await;
            }
        }

        adapter.put(entry).await?;

        if self.config.invalidation.tracks(InvalidationTrigger::Dependency) {
            self.graph.record(key, &options.dependencies);
        }
        Ok(())
    }

    async fn maybe_compress(&self, key: &str, json: String, requested: bool) -> (String, bool) {
        let compression = &self.config.compression;
        if !requested || !compression.enabled || json.len() <= compression.threshold_bytes {
            return (json, false);
        }

        match self.compressor.compress(&json).await {
            Ok(packed) => {
                debug!(key, from = json.len(), to = packed.len(), "Compressed cache payload");
                (packed, true)
            }
            Err(e) => {
                warn!(key, error = %e, "Compression failed, storing uncompressed");
                (json, false)
            }
        }
    }

    /// Retrieve a value, probing tiers in fallback order unless one is named
    pub async fn retrieve<T>(&self, key: &str, options: RetrieveOptions) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let timer = OperationTimer::start();
        let order = match options.tier {
            Some(tier) => vec![tier],
            None => options
                .fallback_order
                .clone()
                .unwrap_or_else(|| self.config.fallback_order.clone()),
        };

        let found = self.probe(key, &order, options.version.as_deref()).await;

        if self.config.enable_metrics {
            match &found {
                Some((tier, _)) => self.metrics.record_hit(*tier, timer.elapsed()),
                None => self.metrics.record_miss(timer.elapsed()),
            }
        }
        found.map(|(_, value)| value)
    }

    async fn probe<T>(&self, key: &str, order: &[Tier], version: Option<&str>) -> Option<(Tier, T)>
    where
        T: DeserializeOwned,
    {
        for &tier in order {
            let Some(adapter) = self.adapter(tier) else {
                continue;
            };

            let entry = match adapter.get(key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e @ CacheError::StorageRead { .. }) => {
                    warn!(key, %tier, error = %e, "Unreadable cache entry, purging");
                    let _ = adapter.remove(key).await;
                    continue;
                }
                Err(e) => {
                    warn!(key, %tier, error = %e, "Cache read failed");
                    continue;
                }
            };

            let invalidation = &self.config.invalidation;
            if invalidation.tracks(InvalidationTrigger::Time) && entry.is_expired() {
                debug!(key, %tier, "Cache entry expired");
                self.remove_everywhere(key).await;
                return None;
            }
            if let Some(expected) = version {
                if invalidation.tracks(InvalidationTrigger::Version) && expected != entry.version {
                    debug!(key, %tier, expected, found = %entry.version, "Cache entry version is stale");
                    self.remove_everywhere(key).await;
                    return None;
                }
            }

            let value = match self.decode::<T>(&entry).await {
                Ok(value) => value,
                Err(e) if e.is_transient() => {
                    warn!(key, %tier, error = %e, "Cache entry could not be decoded in time");
                    continue;
                }
                Err(e) => {
                    warn!(key, %tier, error = %e, "Corrupt cache entry, purging");
                    let _ = adapter.remove(key).await;
                    continue;
                }
            };

            // A concurrent invalidate, eviction or store wins over the hit record
            match adapter.touch(key, entry.timestamp, Utc::now()).await {
                Ok(true) => {}
                Ok(false) => debug!(key, %tier, "Cache entry changed during read, hit not recorded"),
                Err(e) => warn!(key, %tier, error = %e, "Failed to record cache hit"),
            }
            return Some((tier, value));
        }
        None
    }

    async fn decode<T: DeserializeOwned>(&self, entry: &CacheEntry) -> Result<T> {
        let json = if entry.metadata.compressed {
            self.compressor.decompress(&entry.value).await?
        } else {
            entry.value.clone()
        };
        serde_json::from_str(&json).map_err(|e| CacheError::Deserialization {
            message: e.to_string(),
        })
    }

    /// Remove `key` from every tier, then its direct dependents when `cascade` is set.
    ///
    /// Dependents are removed without cascading further. Explicit calls are
    /// honoured whatever the configured trigger set says.
    pub async fn invalidate(&self, key: &str, cascade: bool) {
        let dependents = self.graph.dependents_of(key);
        self.remove_everywhere(key).await;
        if self.config.enable_metrics {
            self.metrics.record_invalidation();
        }

        if !cascade || !self.config.invalidation.tracks(InvalidationTrigger::Dependency) {
            return;
        }
        for dependent in dependents {
            debug!(key, dependent = %dependent, "Cascading invalidation");
            self.remove_everywhere(&dependent).await;
            if self.config.enable_metrics {
                self.metrics.record_invalidation();
            }
        }
    }

    async fn remove_everywhere(&self, key: &str) {
        for adapter in self.adapters() {
            if let Err(e) = adapter.remove(key).await {
                warn!(key, tier = %adapter.tier(), error = %e, "Failed to remove cache entry");
            }
        }
        self.graph.forget(key);
    }

    /// Evict the least recently accessed batch from the memory tier
    pub async fn evict_memory(&self) -> usize {
        let Some(memory) = self.memory.as_deref() else {
            return 0;
        };

        let evicted = memory.evict_lru_batch(EVICTION_BATCH).await;
        for key in &evicted {
            self.graph.forget(key);
        }
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Evicted memory tier batch");
            if self.config.enable_metrics {
                self.metrics.record_evictions(evicted.len());
            }
        }
        evicted.len()
    }

    /// Evict a batch when the memory tier is above its pressure ratio
    pub async fn relieve_memory_pressure(&self) -> usize {
        let Some(memory) = self.memory.as_deref() else {
            return 0;
        };

        let len = memory.len().await.unwrap_or(0);
        let limit = memory.max_entries() as f64 * self.config.sweep.pressure_ratio;
        if (len as f64) <= limit {
            return 0;
        }
        self.evict_memory().await
    }

    /// Remove expired and unreadable entries from every tier
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let check_time = self.config.invalidation.tracks(InvalidationTrigger::Time);
        let mut removed = 0;

        for adapter in self.adapters() {
            let tier = adapter.tier();
            match adapter.purge_unreadable().await {
                Ok(count) => removed += count,
                Err(e) => warn!(%tier, error = %e, "Failed to purge unreadable entries"),
            }

            if !check_time {
                continue;
            }

            let entries = match adapter.entries().await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(%tier, error = %e, "Expiry sweep could not list entries");
                    continue;
                }
            };

            for entry in entries.iter().filter(|e| e.is_expired_at(now)) {
                match adapter.remove(&entry.key).await {
                    Ok(true) => {
                        self.graph.forget(&entry.key);
                        removed += 1;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(key = %entry.key, %tier, error = %e, "Failed to remove expired entry"),
                }
            }
        }

        if removed > 0 {
            debug!(removed, "Expiry sweep finished");
        }
        removed
    }

    /// Start the expiry sweep and memory-pressure timers
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let engine = self.clone();
        let expiry_every = Duration::from_secs(self.config.sweep.expiry_interval_secs);
        let pressure_every = Duration::from_secs(self.config.sweep.pressure_interval_secs);

        let task = tokio::spawn(async move {
            let mut expiry_timer = time::interval(expiry_every);
            let mut pressure_timer = time::interval(pressure_every);

            loop {
                tokio::select! {
                    _ = expiry_timer.tick() => {
                        engine.sweep_expired().await;
                    }
                    _ = pressure_timer.tick() => {
                        engine.relieve_memory_pressure().await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Cache background tasks shutting down");
                        break;
                    }
                }
            }
        });

        info!(
            expiry_secs = expiry_every.as_secs(),
            pressure_secs = pressure_every.as_secs(),
            "Cache background tasks started"
        );
        BackgroundTasks {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Occupancy per tier plus performance counters
    pub async fn stats(&self) -> CacheStats {
        let mut by_tier = BTreeMap::new();
        let mut entries = 0;
        let mut size_bytes = 0;

        for tier in Tier::ALL {
            let mut tier_stats = TierStats {
                hits: self.metrics.tier_hits(tier),
                ..Default::default()
            };
            if let Some(adapter) = self.adapter(tier) {
                tier_stats.enabled = true;
                tier_stats.entries = adapter.len().await.unwrap_or_else(|e| {
                    warn!(%tier, error = %e, "Failed to count entries");
                    0
                });
                tier_stats.size_bytes = adapter.size_bytes().await.unwrap_or_else(|e| {
                    warn!(%tier, error = %e, "Failed to measure tier size");
                    0
                });
            }
            entries += tier_stats.entries;
            size_bytes += tier_stats.size_bytes;
            by_tier.insert(tier, tier_stats);
        }

        let performance = self.metrics.snapshot();
        CacheStats {
            entries,
            size_bytes,
            hit_rate: performance.hit_rate(),
            by_tier,
            performance,
            tracked_dependencies: self.graph.len(),
            uptime: self.metrics.uptime(),
        }
    }

    /// Clear all tiers and the dependency graph, and reset metrics
    pub async fn clear_all(&self) {
        for adapter in self.adapters() {
            if let Err(e) = adapter.clear().await {
                warn!(tier = %adapter.tier(), error = %e, "Failed to clear tier");
            }
        }
        self.graph.clear();
        self.metrics.reset();
        info!("Cache cleared");
    }
}

/// Handle to the background sweep task; dropping it stops the task
pub struct BackgroundTasks {
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the timers and wait for the task to finish
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

/// Builder pattern for engine construction
pub struct CacheEngineBuilder {
    config: CacheConfig,
    offload_compression: bool,
}

impl CacheEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            offload_compression: true,
        }
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Run compression inline instead of on the worker task
    pub fn inline_compression(mut self) -> Self {
        self.offload_compression = false;
        self
    }

    /// Build the engine.
    ///
    /// Only configuration errors fail. A document store that cannot be opened
    /// is disabled with a warning and the remaining tiers keep working.
    pub fn build(self) -> Result<CacheEngine> {
        let config = self.config;
        config.validate()?;

        let memory = config
            .memory
            .enabled
            .then(|| Arc::new(MemoryTier::new(config.memory.max_entries)));
        let session = config
            .session
            .enabled
            .then(|| Arc::new(SessionTier::new(config.session.max_size_bytes)));
        let persistent = config.persistent.enabled.then(|| {
            Arc::new(PersistentTier::new(
                config.persistent.resolved_directory(),
                config.persistent.max_size_bytes,
            ))
        });

        let document = if config.document.enabled {
            let opened = match &config.document.path {
                Some(path) => DocumentTier::open(path),
                None => DocumentTier::in_memory(),
            };
            match opened {
                Ok(tier) => Some(Arc::new(tier)),
                Err(e) => {
                    warn!(error = %e, "Document tier unavailable, continuing without it");
                    None
                }
            }
        } else {
            None
        };

        let compressor = if self.offload_compression && config.compression.enabled {
            CompressionWorker::spawn(&config.compression)
        } else {
            CompressionWorker::inline(&config.compression)
        };

        debug!(
            memory = memory.is_some(),
            session = session.is_some(),
            persistent = persistent.is_some(),
            document = document.is_some(),
            "Cache engine initialised"
        );

        Ok(CacheEngine {
            config: Arc::new(config),
            memory,
            session,
            persistent,
            document,
            graph: Arc::new(DependencyGraph::new()),
            compressor: Arc::new(compressor),
            metrics: CacheMetrics::new(),
        })
    }
}

impl Default for CacheEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use tempfile::TempDir;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Meal {
        name: String,
        kcal: u32,
    }

    fn meal(name: &str) -> Meal {
        Meal {
            name: name.to_string(),
            kcal: 450,
        }
    }

    fn memory_engine(capacity: usize) -> CacheEngine {
        CacheEngine::new(CacheConfig::memory_only().with_memory_capacity(capacity)).unwrap()
    }

    fn all_tiers(dir: &TempDir) -> CacheConfig {
        let mut config = CacheConfig::default().with_persistent_dir(dir.path());
        config.fallback_order = vec![Tier::Memory, Tier::Session, Tier::Persistent, Tier::Document];
        config
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let engine = memory_engine(10);

        assert!(engine.store("meal", &meal("oats"), StoreOptions::new()).await);
        let back: Option<Meal> = engine.retrieve("meal", RetrieveOptions::new()).await;
        assert_eq!(back, Some(meal("oats")));

        let missing: Option<Meal> = engine.retrieve("nope", RetrieveOptions::new()).await;
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_short_ttl_expires() {
        let engine = memory_engine(10);
        engine
            .store("k", &1u32, StoreOptions::new().ttl(Duration::from_millis(1)))
            .await;

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(engine.retrieve::<u32>("k", RetrieveOptions::new()).await, None);
        assert_eq!(engine.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_batch() {
        let engine = memory_engine(3);
        for i in 0..5 {
            assert!(engine.store(&format!("key-{i}"), &i, StoreOptions::new()).await);
        }

        for gone in ["key-0", "key-1"] {
            assert_eq!(engine.retrieve::<i32>(gone, RetrieveOptions::new()).await, None);
        }
        for (i, kept) in ["key-2", "key-3", "key-4"].iter().enumerate() {
            assert_eq!(
                engine.retrieve::<i32>(kept, RetrieveOptions::new()).await,
                Some(i as i32 + 2)
            );
        }
        assert_eq!(engine.stats().await.performance.evictions, 2);
    }

    #[tokio::test]
    async fn test_recently_read_entry_survives_eviction() {
        let engine = memory_engine(3);
        for key in ["a", "b", "c"] {
            engine.store(key, key, StoreOptions::new()).await;
        }
        // Touch "a" so "b" becomes the oldest
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(engine.retrieve::<String>("a", RetrieveOptions::new()).await.is_some());

        engine.store("d", "d", StoreOptions::new()).await;

        assert!(engine.retrieve::<String>("a", RetrieveOptions::new()).await.is_some());
        assert!(engine.retrieve::<String>("b", RetrieveOptions::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_cascade_is_one_hop() {
        let engine = memory_engine(10);
        engine.store("base", &1, StoreOptions::new()).await;
        engine
            .store("child", &2, StoreOptions::new().depends_on(["base"]))
            .await;
        engine
            .store("grandchild", &3, StoreOptions::new().depends_on(["child"]))
            .await;

        engine.invalidate("base", true).await;

        assert_eq!(engine.retrieve::<i32>("base", RetrieveOptions::new()).await, None);
        assert_eq!(engine.retrieve::<i32>("child", RetrieveOptions::new()).await, None);
        assert_eq!(
            engine.retrieve::<i32>("grandchild", RetrieveOptions::new()).await,
            Some(3)
        );
    }

    #[tokio::test]
    async fn test_invalidate_without_cascade_keeps_dependents() {
        let engine = memory_engine(10);
        engine.store("base", &1, StoreOptions::new()).await;
        engine
            .store("child", &2, StoreOptions::new().depends_on(["base"]))
            .await;

        engine.invalidate("base", false).await;
        engine.invalidate("absent", true).await;

        assert_eq!(engine.retrieve::<i32>("child", RetrieveOptions::new()).await, Some(2));
        assert_eq!(engine.stats().await.performance.invalidations, 2);
    }

    #[tokio::test]
    async fn test_compressed_roundtrip_worker_and_inline() {
        let big: Vec<Meal> = (0..200).map(|i| meal(&format!("meal-{i}"))).collect();

        let worker = memory_engine(10);
        let inline = CacheEngine::builder()
            .config(CacheConfig::memory_only())
            .inline_compression()
            .build()
            .unwrap();

        for engine in [worker, inline] {
            assert!(engine.store("big", &big, StoreOptions::new().compress(true)).await);
            let stats = engine.stats().await;
            assert!(stats.size_bytes < serde_json::to_string(&big).unwrap().len() as u64);

            let back: Option<Vec<Meal>> = engine.retrieve("big", RetrieveOptions::new()).await;
            assert_eq!(back, Some(big.clone()));
        }
    }

    #[tokio::test]
    async fn test_small_payload_not_compressed() {
        let engine = memory_engine(10);
        engine.store("tiny", "x", StoreOptions::new().compress(true)).await;
        let entry = engine.memory.as_ref().unwrap().get("tiny").await.unwrap().unwrap();
        assert!(!entry.metadata.compressed);
    }

    #[tokio::test]
    async fn test_inline_over_limit_stores_uncompressed() {
        let mut config = CacheConfig::memory_only().with_compression_threshold(10);
        config.compression.sync_fallback_limit_bytes = 20;
        let engine = CacheEngine::builder()
            .config(config)
            .inline_compression()
            .build()
            .unwrap();

        let payload = "z".repeat(100);
        assert!(engine.store("k", &payload, StoreOptions::new().compress(true)).await);
        let entry = engine.memory.as_ref().unwrap().get("k").await.unwrap().unwrap();
        assert!(!entry.metadata.compressed);
        assert_eq!(engine.retrieve::<String>("k", RetrieveOptions::new()).await, Some(payload));
    }

    fn bulky() -> Vec<String> {
        (0..200_000u64)
            .map(|i| format!("row {i} checksum {}", i.wrapping_mul(2_654_435_761) % 1_000_003))
            .collect()
    }

    fn roomy_disk(dir: &TempDir) -> CacheConfig {
        let mut config = CacheConfig::default().with_persistent_dir(dir.path());
        config.persistent.max_size_bytes = 64 * 1024 * 1024;
        config
    }

    #[tokio::test]
    async fn test_compression_timeout_stores_uncompressed() {
        let mut config = CacheConfig::memory_only();
        config.compression.timeout_ms = 1;
        let engine = CacheEngine::new(config).unwrap();
        let payload = bulky();

        assert!(engine.store("bulk", &payload, StoreOptions::new().compress(true)).await);
        let entry = engine.memory.as_ref().unwrap().get("bulk").await.unwrap().unwrap();
        assert!(!entry.metadata.compressed);
        assert_eq!(
            engine.retrieve::<Vec<String>>("bulk", RetrieveOptions::new()).await,
            Some(payload)
        );
    }

    #[tokio::test]
    async fn test_slow_decompression_keeps_entry() {
        let dir = TempDir::new().unwrap();
        let payload = bulky();
        let on_disk = RetrieveOptions::new().tier(Tier::Persistent);

        let patient = CacheEngine::new(roomy_disk(&dir)).unwrap();
        let options = StoreOptions::new().tier(Tier::Persistent).compress(true);
        assert!(patient.store("bulk", &payload, options).await);

        let mut hurried_config = roomy_disk(&dir);
        hurried_config.compression.timeout_ms = 1;
        let hurried = CacheEngine::new(hurried_config).unwrap();
        assert_eq!(hurried.retrieve::<Vec<String>>("bulk", on_disk.clone()).await, None);

        assert!(patient.persistent.as_ref().unwrap().contains("bulk").await.unwrap());
        assert_eq!(
            patient.retrieve::<Vec<String>>("bulk", on_disk).await,
            Some(payload)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_read_racing_invalidate_does_not_resurrect() {
        let dir = TempDir::new().unwrap();
        let engine = CacheEngine::new(roomy_disk(&dir)).unwrap();
        let big: Vec<Meal> = (0..2000).map(|i| meal(&format!("meal-{i}"))).collect();
        let on_disk = RetrieveOptions::new().tier(Tier::Persistent);

        for _ in 0..10 {
            let options = StoreOptions::new().tier(Tier::Persistent).compress(true);
            assert!(engine.store("doc", &big, options).await);

            let readers: Vec<_> = (0..4)
                .map(|_| {
                    let engine = engine.clone();
                    let options = on_disk.clone();
                    tokio::spawn(async move {
                        engine.retrieve::<Vec<Meal>>("doc", options).await
                    })
                })
                .collect();
            tokio::task::yield_now().await;
            engine.invalidate("doc", false).await;

            for reader in readers {
                if let Some(found) = reader.await.unwrap() {
                    assert_eq!(found, big);
                }
            }
            assert!(!engine.persistent.as_ref().unwrap().contains("doc").await.unwrap());
            assert_eq!(engine.retrieve::<Vec<Meal>>("doc", on_disk.clone()).await, None);
        }
    }

    #[tokio::test]
    async fn test_invalidate_honoured_without_manual_trigger() {
        let mut config = CacheConfig::memory_only();
        config.invalidation.triggers = vec![
            InvalidationTrigger::Time,
            InvalidationTrigger::Version,
            InvalidationTrigger::Dependency,
        ];
        let engine = CacheEngine::new(config).unwrap();
        engine.store("k", &1, StoreOptions::new()).await;

        engine.invalidate("k", true).await;

        assert_eq!(engine.retrieve::<i32>("k", RetrieveOptions::new()).await, None);
        assert_eq!(engine.stats().await.performance.invalidations, 1);
    }

    #[tokio::test]
    async fn test_version_mismatch_is_stale() {
        let engine = memory_engine(10);
        engine
            .store("profile", &1, StoreOptions::new().version("2.0.0"))
            .await;

        let same = engine
            .retrieve::<i32>("profile", RetrieveOptions::new().version("2.0.0"))
            .await;
        assert_eq!(same, Some(1));

        let stale = engine
            .retrieve::<i32>("profile", RetrieveOptions::new().version("3.0.0"))
            .await;
        assert_eq!(stale, None);
        assert_eq!(engine.retrieve::<i32>("profile", RetrieveOptions::new()).await, None);
    }

    #[tokio::test]
    async fn test_wrong_type_purges_entry() {
        let engine = memory_engine(10);
        engine.store("k", "text", StoreOptions::new()).await;

        assert_eq!(engine.retrieve::<u64>("k", RetrieveOptions::new()).await, None);
        assert_eq!(engine.retrieve::<String>("k", RetrieveOptions::new()).await, None);
    }

    #[tokio::test]
    async fn test_disabled_tier_store_returns_false() {
        let engine = memory_engine(10);
        assert!(!engine.store("k", &1, StoreOptions::new().tier(Tier::Document)).await);

        let stats = engine.stats().await;
        assert_eq!(stats.performance.failed_stores, 1);
        assert!(!stats.by_tier[&Tier::Document].enabled);
    }

    #[tokio::test]
    async fn test_fallback_probes_lower_tiers() {
        let dir = TempDir::new().unwrap();
        let engine = CacheEngine::new(all_tiers(&dir)).unwrap();

        engine.store("p", &"disk", StoreOptions::new().tier(Tier::Persistent)).await;
        engine.store("d", &"doc", StoreOptions::new().tier(Tier::Document)).await;
        engine.store("s", &"session", StoreOptions::new().tier(Tier::Session)).await;

        assert_eq!(engine.retrieve::<String>("p", RetrieveOptions::new()).await.as_deref(), Some("disk"));
        assert_eq!(engine.retrieve::<String>("d", RetrieveOptions::new()).await.as_deref(), Some("doc"));
        assert_eq!(engine.retrieve::<String>("s", RetrieveOptions::new()).await.as_deref(), Some("session"));

        let only_memory = RetrieveOptions::new().tier(Tier::Memory);
        assert_eq!(engine.retrieve::<String>("p", only_memory).await, None);

        let stats = engine.stats().await;
        assert_eq!(stats.by_tier[&Tier::Persistent].hits, 1);
        assert_eq!(stats.by_tier[&Tier::Document].hits, 1);
        assert_eq!(stats.entries, 3);
    }

    #[tokio::test]
    async fn test_invalidate_removes_from_every_tier() {
        let dir = TempDir::new().unwrap();
        let engine = CacheEngine::new(all_tiers(&dir)).unwrap();

        for tier in Tier::ALL {
            engine.store("shared", &1, StoreOptions::new().tier(tier)).await;
        }
        engine.invalidate("shared", true).await;

        for tier in Tier::ALL {
            let options = RetrieveOptions::new().tier(tier);
            assert_eq!(engine.retrieve::<i32>("shared", options).await, None);
        }
    }

    #[tokio::test]
    async fn test_corrupt_persistent_file_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let engine = CacheEngine::new(all_tiers(&dir)).unwrap();
        engine.store("k", &1, StoreOptions::new().tier(Tier::Persistent)).await;

        let file = std::fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap().path();
        std::fs::write(&file, "{broken").unwrap();

        assert_eq!(engine.retrieve::<i32>("k", RetrieveOptions::new()).await, None);
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_everywhere() {
        let dir = TempDir::new().unwrap();
        let engine = CacheEngine::new(all_tiers(&dir)).unwrap();
        let short = Duration::from_millis(1);

        for tier in Tier::ALL {
            engine.store(&format!("old-{tier}"), &1, StoreOptions::new().tier(tier).ttl(short)).await;
            engine.store(&format!("new-{tier}"), &1, StoreOptions::new().tier(tier)).await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(engine.sweep_expired().await, 4);
        assert_eq!(engine.stats().await.entries, 4);
    }

    #[tokio::test]
    async fn test_pressure_sweep_only_above_ratio() {
        let engine = memory_engine(10);
        for i in 0..8 {
            engine.store(&format!("k{i}"), &i, StoreOptions::new()).await;
        }
        assert_eq!(engine.relieve_memory_pressure().await, 0);

        engine.store("k8", &8, StoreOptions::new()).await;
        // ceil(9 * 0.25)
        assert_eq!(engine.relieve_memory_pressure().await, 3);
    }

    #[tokio::test]
    async fn test_background_tasks_sweep_and_stop() {
        let engine = memory_engine(10);
        engine
            .store("k", &1, StoreOptions::new().ttl(Duration::from_millis(1)))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let tasks = engine.start_background_tasks();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tasks.is_running());
        assert_eq!(engine.stats().await.entries, 0);

        tasks.shutdown().await;
    }

    #[tokio::test]
    async fn test_clear_all_resets_state() {
        let engine = memory_engine(10);
        engine.store("a", &1, StoreOptions::new()).await;
        engine.store("b", &2, StoreOptions::new().depends_on(["a"])).await;
        let _ = engine.retrieve::<i32>("a", RetrieveOptions::new()).await;

        engine.clear_all().await;

        let stats = engine.stats().await;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.tracked_dependencies, 0);
        assert_eq!(stats.performance.total_requests, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn test_invalid_config_fails_construction() {
        let config = CacheConfig::memory_only().with_memory_capacity(0);
        assert!(matches!(CacheEngine::new(config), Err(CacheError::Configuration(_))));
    }
}
