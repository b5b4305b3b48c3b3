//! HTTP client, header policy and CDN configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HttpCacheError, Result};

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection timeout (seconds)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// HTTP/HTTPS proxy URL
    #[serde(default)]
    pub proxy: Option<String>,

    /// Custom user agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum redirects to follow (0 = no redirects)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Pool idle timeout (seconds)
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            proxy: None,
            user_agent: default_user_agent(),
            max_redirects: default_max_redirects(),
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Short timeouts for advisory calls such as CDN purges
    pub fn fast() -> Self {
        Self {
            timeout_secs: 5,
            connect_timeout_secs: 2,
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Header policy for generated responses and conditional requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCacheConfig {
    /// TTL for resources no heuristic recognises (seconds)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Upper bound on emitted `max-age` (seconds)
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// `stale-while-revalidate` window, omitted when 0 (seconds)
    #[serde(default = "default_stale_while_revalidate_secs")]
    pub stale_while_revalidate_secs: u64,

    #[serde(default)]
    pub must_revalidate: bool,

    /// Regular expressions for resources that must never be cached
    #[serde(default = "default_no_cache_patterns")]
    pub no_cache_patterns: Vec<String>,

    /// Regular expressions for resources served with `private`
    #[serde(default = "default_private_patterns")]
    pub private_patterns: Vec<String>,

    #[serde(default = "default_vary_headers")]
    pub vary_headers: Vec<String>,
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            max_age_secs: default_max_age_secs(),
            stale_while_revalidate_secs: default_stale_while_revalidate_secs(),
            must_revalidate: false,
            no_cache_patterns: default_no_cache_patterns(),
            private_patterns: default_private_patterns(),
            vary_headers: default_vary_headers(),
        }
    }
}

impl HttpCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_no_cache_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.no_cache_patterns.push(pattern.into());
        self
    }

    pub fn with_private_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.private_patterns.push(pattern.into());
        self
    }

    pub fn with_stale_while_revalidate(mut self, secs: u64) -> Self {
        self.stale_while_revalidate_secs = secs;
        self
    }

    pub fn with_must_revalidate(mut self, must_revalidate: bool) -> Self {
        self.must_revalidate = must_revalidate;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_age_secs == 0 {
            return Err(HttpCacheError::Configuration(
                "max_age_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// CDN provider identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdnProvider {
    Cloudflare,
    Aws,
    Azure,
    Custom,
}

impl CdnProvider {
    /// Well-known purge endpoint, with a `{zoneId}` placeholder
    pub fn default_purge_endpoint(&self) -> Option<&'static str> {
        match self {
            CdnProvider::Cloudflare => {
                Some("https://api.cloudflare.com/client/v4/zones/{zoneId}/purge_cache")
            }
            CdnProvider::Aws => Some(
                "https://cloudfront.amazonaws.com/2020-05-31/distribution/{zoneId}/invalidation",
            ),
            CdnProvider::Azure | CdnProvider::Custom => None,
        }
    }
}

/// CDN purge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdnConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_provider")]
    pub provider: CdnProvider,

    /// Bearer token sent with purge requests
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub zone_id: Option<String>,

    /// Overrides the provider's default endpoint
    #[serde(default)]
    pub purge_endpoint: Option<String>,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            api_key: None,
            zone_id: None,
            purge_endpoint: None,
        }
    }
}

impl CdnConfig {
    pub fn custom(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            enabled: true,
            provider: CdnProvider::Custom,
            api_key: Some(api_key.into()),
            zone_id: None,
            purge_endpoint: Some(endpoint.into()),
        }
    }

    pub fn cloudflare(zone_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            enabled: true,
            provider: CdnProvider::Cloudflare,
            api_key: Some(api_key.into()),
            zone_id: Some(zone_id.into()),
            purge_endpoint: None,
        }
    }

    /// Endpoint with the zone id substituted
    pub fn resolved_endpoint(&self) -> Result<String> {
        let template = self
            .purge_endpoint
            .as_deref()
            .or_else(|| self.provider.default_purge_endpoint())
            .ok_or_else(|| {
                HttpCacheError::Configuration(format!(
                    "no purge endpoint configured for provider {:?}",
                    self.provider
                ))
            })?;

        if !template.contains("{zoneId}") {
            return Ok(template.to_string());
        }
        let zone_id = self.zone_id.as_deref().ok_or_else(|| {
            HttpCacheError::Configuration("purge endpoint needs a zone id".to_string())
        })?;
        Ok(template.replace("{zoneId}", zone_id))
    }
}

// Default value functions for serde
fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("Larder/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_redirects() -> usize {
    10
}

fn default_pool_idle_timeout_secs() -> u64 {
    90
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_max_age_secs() -> u64 {
    31_536_000
}

fn default_stale_while_revalidate_secs() -> u64 {
    86_400
}

fn default_no_cache_patterns() -> Vec<String> {
    vec![
        "/api/auth/".to_string(),
        "/api/user/current".to_string(),
        "/admin/".to_string(),
    ]
}

fn default_private_patterns() -> Vec<String> {
    vec![
        "/api/user/".to_string(),
        "/profile/".to_string(),
        "/settings/".to_string(),
    ]
}

fn default_vary_headers() -> Vec<String> {
    vec![
        "Accept-Encoding".to_string(),
        "Accept-Language".to_string(),
        "User-Agent".to_string(),
    ]
}

fn default_provider() -> CdnProvider {
    CdnProvider::Custom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HttpCacheConfig::default();
        assert_eq!(config.default_ttl_secs, 3600);
        assert_eq!(config.max_age_secs, 31_536_000);
        assert_eq!(config.vary_headers.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: HttpCacheConfig =
            serde_json::from_str(r#"{"stale_while_revalidate_secs": 0}"#).unwrap();
        assert_eq!(config.stale_while_revalidate_secs, 0);
        assert_eq!(config.default_ttl_secs, 3600);
    }

    #[test]
    fn test_cloudflare_endpoint_substitutes_zone() {
        let config = CdnConfig::cloudflare("zone-1", "secret");
        assert_eq!(
            config.resolved_endpoint().unwrap(),
            "https://api.cloudflare.com/client/v4/zones/zone-1/purge_cache"
        );
    }

    #[test]
    fn test_missing_zone_is_configuration_error() {
        let config = CdnConfig {
            enabled: true,
            provider: CdnProvider::Aws,
            ..Default::default()
        };
        assert!(matches!(
            config.resolved_endpoint(),
            Err(HttpCacheError::Configuration(_))
        ));

        let azure = CdnConfig {
            enabled: true,
            provider: CdnProvider::Azure,
            ..Default::default()
        };
        assert!(azure.resolved_endpoint().is_err());
    }

    #[test]
    fn test_client_builder_pattern() {
        let config = HttpConfig::new()
            .with_timeout(Duration::from_secs(15))
            .with_proxy("http://proxy.example.com:8080");

        assert_eq!(config.timeout(), Duration::from_secs(15));
        assert_eq!(config.proxy.as_deref(), Some("http://proxy.example.com:8080"));
        assert_eq!(HttpConfig::fast().timeout(), Duration::from_secs(5));
    }
}
