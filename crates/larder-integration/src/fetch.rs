//! Application-level response cache layered over the validator-aware fetch

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use larder_cache::{CacheEngine, RetrieveOptions, StoreOptions, Tier};
use larder_http::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    resource_id, CacheAwareFetch, FetchRequest, FetchResponse, Method, StatusCode,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::{IntegrationError, Result},
    metrics::IntegrationMetrics,
    selection::{select_tier, Scope, SelectionThresholds},
};

/// TTL for responses that carry neither `max-age` nor `Expires`
pub const DEFAULT_RESPONSE_TTL: Duration = Duration::from_secs(60 * 60);

/// Probe order for cached responses; every tier selection can produce is covered
const RESPONSE_PROBE_ORDER: [Tier; 4] = Tier::ALL;

/// Response as kept in the application cache
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedResponse {
    status: u16,
    headers: BTreeMap<String, String>,
    body: String,
}

impl CachedResponse {
    fn capture(response: &FetchResponse) -> Option<Self> {
        let body = String::from_utf8(response.body.clone()).ok()?;
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        Some(Self {
            status: response.status.as_u16(),
            headers,
            body,
        })
    }

    fn into_response(self) -> FetchResponse {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        FetchResponse {
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers,
            body: self.body.into_bytes(),
            from_cache: true,
        }
    }
}

/// Application cache key: `http_<METHOD>_<path>[?query]`
pub fn response_cache_key(request: &FetchRequest) -> String {
    format!("http_{}_{}", request.method, resource_id(&request.url))
}

/// Lifetime of a response: `max-age`, else `Expires` relative to `now`, else one hour
pub fn ttl_from_headers(headers: &HeaderMap, now: SystemTime) -> Duration {
    let max_age = headers
        .get(header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(|value| {
            value
                .split(',')
                .filter_map(|directive| {
                    let (name, secs) = directive.trim().split_once('=')?;
                    name.trim().eq_ignore_ascii_case("max-age").then_some(secs)
                })
                .find_map(|secs| secs.trim().trim_matches('"').parse::<u64>().ok())
        });
    if let Some(secs) = max_age {
        return Duration::from_secs(secs);
    }

    let expires = headers
        .get(header::EXPIRES)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v).ok());
    if let Some(expires) = expires {
        return expires.duration_since(now).unwrap_or(Duration::ZERO);
    }

    DEFAULT_RESPONSE_TTL
}

fn forbids_storing(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(',').any(|d| d.trim().eq_ignore_ascii_case("no-store")))
}

/// Fetch that answers repeated GETs from the cache engine before touching
/// the network.
///
/// Misses go through [`CacheAwareFetch`], so revalidation still uses the
/// validators recorded by the HTTP strategy. Successful GET responses are
/// written back with a TTL taken from their own headers.
#[derive(Clone)]
pub struct CachedFetch {
    engine: CacheEngine,
    http: CacheAwareFetch,
    thresholds: SelectionThresholds,
    metrics: Arc<IntegrationMetrics>,
}

impl CachedFetch {
    pub(crate) fn new(
        engine: CacheEngine,
        http: CacheAwareFetch,
        thresholds: SelectionThresholds,
        metrics: Arc<IntegrationMetrics>,
    ) -> Self {
        Self {
            engine,
            http,
            thresholds,
            metrics,
        }
    }

    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        self.fetch_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Fetch, giving up on the network call and skipping the cache write-back
    /// once `cancel` fires.
    pub async fn fetch_with_cancel(
        &self,
        request: FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse> {
        let started = Instant::now();
        let is_get = request.method == Method::GET;
        let key = response_cache_key(&request);
        let resource = resource_id(&request.url);

        if is_get {
            let options = RetrieveOptions::new().fallback_order(RESPONSE_PROBE_ORDER.to_vec());
            if let Some(cached) = self.engine.retrieve::<CachedResponse>(&key, options).await {
                debug!(key, "Serving response from application cache");
                self.metrics.record_request(started.elapsed(), true);
                return Ok(cached.into_response());
            }
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IntegrationError::Cancelled),
            response = self.http.fetch(request) => response?,
        };
        if is_get {
            self.metrics.record_request(started.elapsed(), false);
        }

        if !is_get || !response.is_success() || response.from_cache {
            return Ok(response);
        }
        if cancel.is_cancelled() {
            debug!(key, "Caller cancelled, skipping response write-back");
            return Ok(response);
        }
        if self.http.strategy().is_no_cache(&resource) || forbids_storing(&response.headers) {
            return Ok(response);
        }

        self.write_back(&key, &response).await;
        Ok(response)
    }

    async fn write_back(&self, key: &str, response: &FetchResponse) {
        let Some(cached) = CachedResponse::capture(response) else {
            debug!(key, "Response body is not UTF-8, not caching");
            return;
        };
        let ttl = ttl_from_headers(&response.headers, SystemTime::now());
        if ttl.is_zero() {
            return;
        }

        let size = cached.body.len() + cached.headers.values().map(String::len).sum::<usize>();
        let tier = select_tier(size, Scope::Shared, &self.thresholds);
        let options = StoreOptions::new().ttl(ttl).tier(tier);
        if !self.engine.store(key, &cached, options).await {
            warn!(key, %tier, "Failed to cache response");
        }
    }
}
