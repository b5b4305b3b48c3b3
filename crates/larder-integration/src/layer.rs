//! Unified cache facade

use std::{sync::Arc, time::Duration};

use larder_cache::{
    BackgroundTasks, CacheEngine, CacheStats, InvalidationTrigger, RetrieveOptions, StoreOptions,
    Tier,
};
use larder_http::{
    header::HeaderMap, shared_client, CacheAwareFetch, CacheHeaders, CdnPurger,
    ConditionalHeaders, ConditionalResult, HeaderOptions, HttpCacheStats, HttpCacheStrategy,
    HttpTransport, ServedResponse,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    fetch::CachedFetch,
    metrics::{IntegrationMetrics, PerformanceMetrics},
    rules::RuleSet,
    selection::{select_tier, Scope, SelectionThresholds},
    settings::{LarderSettings, SettingsLoader},
};

/// Probe order for facade reads, covering every tier automatic placement can choose
const AUTO_PROBE_ORDER: [Tier; 4] = [Tier::Memory, Tier::Session, Tier::Persistent, Tier::Document];

/// Where a facade store lands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// Chosen by [`select_tier`] from payload size and scope
    #[default]
    Auto,
    Tier(Tier),
}

/// Options for [`CacheIntegrationLayer::store`]
#[derive(Debug, Clone, Default)]
pub struct LayerStoreOptions {
    pub placement: Placement,
    /// Declared lifetime; shared unless the caller says otherwise
    pub scope: Scope,
    /// Falls back to the matching rule's TTL, then the engine default
    pub ttl: Option<Duration>,
    pub compress: bool,
    pub dependencies: Vec<String>,
    pub version: Option<String>,
}

impl LayerStoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_tier(mut self, tier: Tier) -> Self {
        self.placement = Placement::Tier(tier);
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
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

/// Combined statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationStats {
    pub performance: PerformanceMetrics,
    pub cache: CacheStats,
    pub http: HttpCacheStats,
}

/// One entry point over the cache engine and the HTTP cache strategy.
///
/// Stores pick a tier automatically unless told otherwise, invalidations
/// honour the configured rules, and HTTP helpers pass through to the
/// strategy. Construct it once and share it; there is no global instance.
pub struct CacheIntegrationLayer {
    engine: CacheEngine,
    http: Arc<HttpCacheStrategy>,
    transport: Arc<dyn HttpTransport>,
    rules: RuleSet,
    thresholds: SelectionThresholds,
    metrics: Arc<IntegrationMetrics>,
}

impl CacheIntegrationLayer {
    /// Build from settings with a reqwest transport
    pub fn new(settings: LarderSettings) -> Result<Self> {
        let transport = shared_client(settings.http.clone())?;
        Self::with_transport(settings, transport)
    }

    /// Build from settings with a caller-supplied transport
    pub fn with_transport(
        settings: LarderSettings,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        settings.validate()?;

        let engine = CacheEngine::new(settings.cache)?;
        let mut strategy = HttpCacheStrategy::new(settings.http_cache)?;
        if let Some(purger) = CdnPurger::from_config(&settings.cdn, transport.clone()) {
            strategy = strategy.with_cdn(purger);
        }
        let rules = RuleSet::new(settings.rules)?;

        info!(
            rules = rules.len(),
            cdn = strategy.has_cdn(),
            "Cache integration layer ready"
        );

        Ok(Self {
            engine,
            http: Arc::new(strategy),
            transport,
            rules,
            thresholds: settings.selection,
            metrics: Arc::new(IntegrationMetrics::new()),
        })
    }

    /// Load layered settings and build
    pub fn from_settings(loader: &SettingsLoader) -> Result<Self> {
        Self::new(loader.load()?)
    }

    pub fn engine(&self) -> &CacheEngine {
        &self.engine
    }

    pub fn http_strategy(&self) -> &Arc<HttpCacheStrategy> {
        &self.http
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Tier an automatic store of `size` bytes with `scope` would use
    pub fn select_tier(&self, size: usize, scope: Scope) -> Tier {
        select_tier(size, scope, &self.thresholds)
    }

    /// Store `value`; `false` when it could not be serialized or stored
    pub async fn store<T>(&self, key: &str, value: &T, options: LayerStoreOptions) -> bool
    where
        T: Serialize + ?Sized,
    {
        let tier = match options.placement {
            Placement::Tier(tier) => tier,
            Placement::Auto => match serde_json::to_vec(value) {
                Ok(bytes) => self.select_tier(bytes.len(), options.scope),
                Err(e) => {
                    warn!(key, error = %e, "Failed to serialize value for tier selection");
                    return false;
                }
            },
        };

        let ttl = options
            .ttl
            .or_else(|| self.rules.find(key).and_then(|rule| rule.ttl()));

        let mut store = StoreOptions::new()
            .tier(tier)
            .compress(options.compress)
            .depends_on(options.dependencies);
        if let Some(ttl) = ttl {
            store = store.ttl(ttl);
        }
        if let Some(version) = options.version {
            store = store.version(version);
        }

        debug!(key, %tier, "Storing through integration layer");
        self.engine.store(key, value, store).await
    }

    /// Retrieve from whichever tier holds `key`
    pub async fn retrieve<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        self.retrieve_with(key, RetrieveOptions::new().fallback_order(AUTO_PROBE_ORDER.to_vec()))
            .await
    }

    pub async fn retrieve_with<T>(&self, key: &str, options: RetrieveOptions) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let started = std::time::Instant::now();
        let value = self.engine.retrieve(key, options).await;
        self.metrics
            .record_request(started.elapsed(), value.is_some());
        value
    }

    /// Invalidate `pattern`, consulting the rule set for whether to cascade.
    ///
    /// With a matching rule the cascade runs only when the rule lists the
    /// dependency trigger and `cascade` is set; without one `cascade` is
    /// used as given.
    pub async fn invalidate(&self, pattern: &str, cascade: bool) {
        let cascade = match self.rules.find(pattern) {
            Some(rule) => {
                debug!(pattern, rule = %rule.pattern, "Applying invalidation rule");
                cascade && rule.has_trigger(InvalidationTrigger::Dependency)
            }
            None => cascade,
        };

        self.engine.invalidate(pattern, cascade).await;
        self.metrics.record_invalidation();
    }

    /// Fetch wrapper that consults the application cache before the network
    pub fn create_cache_aware_fetch(&self) -> CachedFetch {
        let http = CacheAwareFetch::new(self.http.clone(), self.transport.clone());
        CachedFetch::new(
            self.engine.clone(),
            http,
            self.thresholds,
            self.metrics.clone(),
        )
    }

    pub async fn purge_cdn(&self, urls: &[String]) -> bool {
        self.http.purge_cdn(urls).await
    }

    pub fn generate_cache_headers(
        &self,
        resource: &str,
        content: &str,
        options: &HeaderOptions,
    ) -> CacheHeaders {
        self.http.generate_cache_headers(resource, content, options)
    }

    pub fn check_conditional_request(
        &self,
        resource: &str,
        request: &ConditionalHeaders,
    ) -> ConditionalResult {
        self.http.check_conditional_request(resource, request)
    }

    /// Serve `content` for a GET, answering 304 when the request's validators match
    pub fn respond(&self, resource: &str, request: &HeaderMap, content: &str) -> ServedResponse {
        self.http.respond(resource, request, content)
    }

    /// Start the engine's expiry and memory-pressure sweeps
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        self.engine.start_background_tasks()
    }

    pub async fn stats(&self) -> IntegrationStats {
        let cache = self.engine.stats().await;
        self.metrics.set_cache_size(cache.size_bytes);

        IntegrationStats {
            performance: self.metrics.snapshot(),
            cache,
            http: self.http.stats(),
        }
    }

    /// Empty every tier, drop all validators and reset metrics
    pub async fn clear_all(&self) {
        self.engine.clear_all().await;
        self.http.clear();
        self.metrics.reset();
        info!("Cleared all caches");
    }
}

#[cfg(test)]
mod tests {
    use larder_cache::CacheConfig;
    use larder_http::HttpClient;
    use tempfile::TempDir;

    use super::*;
    use crate::rules::InvalidationRule;

    fn layer_in(dir: &TempDir, settings: LarderSettings) -> CacheIntegrationLayer {
        let mut cache = settings.cache.clone().with_persistent_dir(dir.path().join("kv"));
        cache.document.path = Some(dir.path().join("documents.db"));
        let transport: Arc<dyn HttpTransport> = Arc::new(HttpClient::with_defaults().unwrap());
        CacheIntegrationLayer::with_transport(settings.with_cache(cache), transport).unwrap()
    }

    #[tokio::test]
    async fn test_auto_placement_by_size_and_scope() {
        let dir = TempDir::new().unwrap();
        let layer = layer_in(&dir, LarderSettings::default());

        let small = "x".repeat(100);
        let medium = "x".repeat(50 * 1024);
        let large = "x".repeat(200 * 1024);

        assert!(layer.store("small", &small, LayerStoreOptions::new()).await);
        assert!(layer.store("medium", &medium, LayerStoreOptions::new()).await);
        assert!(layer.store("large", &large, LayerStoreOptions::new()).await);
        assert!(layer
            .store("draft", &small, LayerStoreOptions::new().scope(Scope::Session))
            .await);
        // Key names carry no scope
        assert!(layer.store("session_token", &small, LayerStoreOptions::new()).await);
        assert!(layer.store("http_GET_/template", &small, LayerStoreOptions::new()).await);

        let in_tier = |tier| RetrieveOptions::new().tier(tier);
        assert!(layer.engine().retrieve::<String>("small", in_tier(Tier::Memory)).await.is_some());
        assert!(layer
            .engine()
            .retrieve::<String>("medium", in_tier(Tier::Persistent))
            .await
            .is_some());
        assert!(layer
            .engine()
            .retrieve::<String>("large", in_tier(Tier::Document))
            .await
            .is_some());
        assert!(layer
            .engine()
            .retrieve::<String>("draft", in_tier(Tier::Session))
            .await
            .is_some());
        for key in ["session_token", "http_GET_/template"] {
            assert!(layer.engine().retrieve::<String>(key, in_tier(Tier::Memory)).await.is_some());
            assert!(layer.engine().retrieve::<String>(key, in_tier(Tier::Session)).await.is_none());
        }
        assert_eq!(layer.select_tier(100, Scope::Shared), Tier::Memory);
        assert_eq!(layer.select_tier(100, Scope::Session), Tier::Session);

        assert_eq!(layer.retrieve::<String>("large").await, Some(large));
        assert_eq!(layer.retrieve::<String>("draft").await, Some(small));
    }

    #[tokio::test]
    async fn test_explicit_tier_overrides_selection() {
        let dir = TempDir::new().unwrap();
        let layer = layer_in(&dir, LarderSettings::default());

        let options = LayerStoreOptions::new().in_tier(Tier::Persistent);
        assert!(layer.store("tiny", &1u8, options).await);
        assert!(layer
            .engine()
            .retrieve::<u8>("tiny", RetrieveOptions::new().tier(Tier::Persistent))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_rule_ttl_applies_without_explicit_ttl() {
        let settings = LarderSettings::new()
            .with_cache(CacheConfig::memory_only())
            .with_rule(
                InvalidationRule::new("api/user/*", &[InvalidationTrigger::Time])
                    .with_ttl(Duration::from_secs(0)),
            );
        let layer = CacheIntegrationLayer::with_transport(
            settings,
            Arc::new(HttpClient::with_defaults().unwrap()),
        )
        .unwrap();

        assert!(layer.store("api/user/1", &"ada", LayerStoreOptions::new()).await);
        assert!(layer.store("api/other", &"bob", LayerStoreOptions::new()).await);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(layer.retrieve::<String>("api/user/1").await, None);
        assert_eq!(layer.retrieve::<String>("api/other").await.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_rule_without_dependency_trigger_blocks_cascade() {
        let settings = LarderSettings::new()
            .with_cache(CacheConfig::memory_only())
            .with_rule(InvalidationRule::new("catalog", &[InvalidationTrigger::Manual]))
            .with_rule(InvalidationRule::new(
                "orders",
                &[InvalidationTrigger::Manual, InvalidationTrigger::Dependency],
            ));
        let layer = CacheIntegrationLayer::with_transport(
            settings,
            Arc::new(HttpClient::with_defaults().unwrap()),
        )
        .unwrap();

        let opts = LayerStoreOptions::new;
        layer.store("catalog", &1, opts()).await;
        layer.store("catalog:view", &2, opts().depends_on(["catalog"])).await;
        layer.store("orders", &3, opts()).await;
        layer.store("orders:view", &4, opts().depends_on(["orders"])).await;
        layer.store("free", &5, opts()).await;
        layer.store("free:view", &6, opts().depends_on(["free"])).await;

        layer.invalidate("catalog", true).await;
        layer.invalidate("orders", true).await;
        layer.invalidate("free", true).await;

        assert_eq!(layer.retrieve::<i32>("catalog").await, None);
        assert_eq!(layer.retrieve::<i32>("catalog:view").await, Some(2));
        assert_eq!(layer.retrieve::<i32>("orders:view").await, None);
        assert_eq!(layer.retrieve::<i32>("free:view").await, None);
        assert_eq!(layer.stats().await.performance.invalidations, 3);
    }

    #[tokio::test]
    async fn test_stats_and_clear_all() {
        let layer = CacheIntegrationLayer::with_transport(
            LarderSettings::new().with_cache(CacheConfig::memory_only()),
            Arc::new(HttpClient::with_defaults().unwrap()),
        )
        .unwrap();

        layer.store("a", &"value", LayerStoreOptions::new()).await;
        layer.retrieve::<String>("a").await;
        layer.retrieve::<String>("missing").await;
        layer.generate_cache_headers("/page.html", "<html/>", &HeaderOptions::default());

        let stats = layer.stats().await;
        assert_eq!(stats.performance.total_requests, 2);
        assert!((stats.performance.hit_rate - 0.5).abs() < 1e-9);
        assert!(stats.performance.cache_size_bytes > 0);
        assert_eq!(stats.cache.entries, 1);
        assert_eq!(stats.http.etag_count, 1);

        layer.clear_all().await;
        let stats = layer.stats().await;
        assert_eq!(stats.performance.total_requests, 0);
        assert_eq!(stats.cache.entries, 0);
        assert_eq!(stats.http.etag_count, 0);
    }

    #[tokio::test]
    async fn test_purge_without_cdn_is_false() {
        let layer = CacheIntegrationLayer::with_transport(
            LarderSettings::new().with_cache(CacheConfig::memory_only()),
            Arc::new(HttpClient::with_defaults().unwrap()),
        )
        .unwrap();
        assert!(!layer.http_strategy().has_cdn());
        assert!(!layer.purge_cdn(&[]).await);
    }

    #[test]
    fn test_invalid_settings_fail_construction() {
        let settings = LarderSettings::new().with_cache(CacheConfig::new().with_memory_capacity(0));
        let result = CacheIntegrationLayer::with_transport(
            settings,
            Arc::new(HttpClient::with_defaults().unwrap()),
        );
        assert!(result.is_err());
    }
}
