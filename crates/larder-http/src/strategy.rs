//! Cache header generation and conditional request evaluation

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use parking_lot::Mutex;
use regex::Regex;
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    cdn::CdnPurger,
    config::HttpCacheConfig,
    error::{HttpCacheError, Result},
    validator::{parse_etag_list, truncate_to_secs, Validator, ValidatorStore},
};

const STATIC_ASSET_TTL: u64 = 31_536_000;
const IMAGE_TTL: u64 = 2_592_000;
const API_TTL: u64 = 300;
const PAGE_TTL: u64 = 3600;

/// Per-call overrides for [`HttpCacheStrategy::generate_cache_headers`]
#[derive(Debug, Clone, Default)]
pub struct HeaderOptions {
    pub is_private: bool,
    /// Overrides the resource-type heuristic (seconds)
    pub ttl: Option<u64>,
    pub must_revalidate: bool,
}

/// Generated response headers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHeaders {
    pub cache_control: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub expires: Option<String>,
    pub vary: Option<String>,
    pub pragma: Option<String>,
}

impl CacheHeaders {
    fn no_store() -> Self {
        Self {
            cache_control: "no-cache, no-store, must-revalidate".to_string(),
            etag: None,
            last_modified: None,
            expires: Some("0".to_string()),
            vary: None,
            pragma: Some("no-cache".to_string()),
        }
    }

    /// Whether these are the strict no-store directives
    pub fn is_no_store(&self) -> bool {
        self.cache_control.contains("no-store")
    }

    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        let mut put = |name: header::HeaderName, value: &str| {
            if let Ok(value) = HeaderValue::from_str(value) {
                map.insert(name, value);
            }
        };

        put(header::CACHE_CONTROL, &self.cache_control);
        if let Some(etag) = &self.etag {
            put(header::ETAG, etag);
        }
        if let Some(last_modified) = &self.last_modified {
            put(header::LAST_MODIFIED, last_modified);
        }
        if let Some(expires) = &self.expires {
            put(header::EXPIRES, expires);
        }
        if let Some(vary) = &self.vary {
            put(header::VARY, vary);
        }
        if let Some(pragma) = &self.pragma {
            put(header::PRAGMA, pragma);
        }
        map
    }
}

/// Validators carried by an incoming request
#[derive(Debug, Clone, Default)]
pub struct ConditionalHeaders {
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
}

impl ConditionalHeaders {
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let text = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            if_none_match: text(header::IF_NONE_MATCH),
            if_modified_since: text(header::IF_MODIFIED_SINCE),
        }
    }
}

/// Outcome of a conditional request check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalResult {
    pub not_modified: bool,
    /// Quoted entity tag, set when it matched or when nothing matched
    pub etag: Option<String>,
    /// HTTP date, set when it matched or when nothing matched
    pub last_modified: Option<String>,
}

/// Response produced by [`HttpCacheStrategy::respond`]
#[derive(Debug, Clone)]
pub struct ServedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Empty for 304
    pub body: Option<String>,
}

/// Validator statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpCacheStats {
    pub etag_count: usize,
    pub last_modified_count: usize,
    /// Requests that went through the cache-aware fetch
    pub total_requests: u64,
    pub not_modified_responses: u64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Default)]
struct ResponseTimes {
    requests: u64,
    not_modified: u64,
    total: Duration,
}

/// Protocol-level cache policy: headers, validators and CDN purge
pub struct HttpCacheStrategy {
    config: HttpCacheConfig,
    no_cache: Vec<Regex>,
    private: Vec<Regex>,
    validators: ValidatorStore,
    timings: Mutex<ResponseTimes>,
    cdn: Option<Arc<CdnPurger>>,
}

impl HttpCacheStrategy {
    /// Create a strategy, compiling every configured pattern
    pub fn new(config: HttpCacheConfig) -> Result<Self> {
        config.validate()?;
        let no_cache = compile_patterns(&config.no_cache_patterns)?;
        let private = compile_patterns(&config.private_patterns)?;

        Ok(Self {
            config,
            no_cache,
            private,
            validators: ValidatorStore::new(),
            timings: Mutex::new(ResponseTimes::default()),
            cdn: None,
        })
    }

    /// Attach a CDN purger
    pub fn with_cdn(mut self, purger: CdnPurger) -> Self {
        self.cdn = Some(Arc::new(purger));
        self
    }

    pub fn config(&self) -> &HttpCacheConfig {
        &self.config
    }

    pub fn validators(&self) -> &ValidatorStore {
        &self.validators
    }

    pub fn has_cdn(&self) -> bool {
        self.cdn.is_some()
    }

    pub fn is_no_cache(&self, resource: &str) -> bool {
        self.no_cache.iter().any(|re| re.is_match(resource))
    }

    pub fn is_private(&self, resource: &str) -> bool {
        self.private.iter().any(|re| re.is_match(resource))
    }

    /// Resource-type TTL heuristic (seconds), before the `max_age` cap
    pub fn ttl_for_resource(&self, resource: &str) -> u64 {
        let path = resource.split('?').next().unwrap_or(resource);
        let extension = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.contains('/'));

        match extension.as_deref() {
            Some("css" | "js" | "woff" | "woff2" | "ttf" | "eot" | "ico") => STATIC_ASSET_TTL,
            Some("jpg" | "jpeg" | "png" | "gif" | "webp" | "svg") => IMAGE_TTL,
            _ if resource.contains("/api/") => API_TTL,
            Some("html") => PAGE_TTL,
            _ if path.ends_with('/') => PAGE_TTL,
            _ => self.config.default_ttl_secs,
        }
    }

    /// Build response headers for `content` and record its validator
    pub fn generate_cache_headers(
        &self,
        resource: &str,
        content: &str,
        options: &HeaderOptions,
    ) -> CacheHeaders {
        if self.is_no_cache(resource) {
            debug!(resource, "No-cache resource");
            return CacheHeaders::no_store();
        }

        let ttl = options
            .ttl
            .unwrap_or_else(|| self.ttl_for_resource(resource));
        let max_age = ttl.min(self.config.max_age_secs);

        let visibility = if options.is_private || self.is_private(resource) {
            "private"
        } else {
            "public"
        };
        let mut cache_control = format!("{visibility}, max-age={max_age}");
        if self.config.stale_while_revalidate_secs > 0 {
            cache_control.push_str(&format!(
                ", stale-while-revalidate={}",
                self.config.stale_while_revalidate_secs
            ));
        }
        if options.must_revalidate || self.config.must_revalidate {
            cache_control.push_str(", must-revalidate");
        }

        let now = SystemTime::now();
        let validator = self
            .validators
            .record_content(resource, content.as_bytes(), now);
        let expires = truncate_to_secs(now) + Duration::from_secs(max_age);

        CacheHeaders {
            cache_control,
            etag: validator.etag_header(),
            last_modified: validator.last_modified_header(),
            expires: Some(httpdate::fmt_http_date(expires)),
            vary: (!self.config.vary_headers.is_empty())
                .then(|| self.config.vary_headers.join(", ")),
            pragma: None,
        }
    }

    /// Evaluate `If-None-Match` first, then `If-Modified-Since`
    pub fn check_conditional_request(
        &self,
        resource: &str,
        request: &ConditionalHeaders,
    ) -> ConditionalResult {
        if self.is_no_cache(resource) {
            return ConditionalResult::default();
        }
        let Some(known) = self.validators.get(resource) else {
            return ConditionalResult::default();
        };

        if let (Some(header), Some(etag)) = (&request.if_none_match, &known.etag) {
            let tags = parse_etag_list(header);
            if tags.iter().any(|tag| tag == etag || tag == "*") {
                return ConditionalResult {
                    not_modified: true,
                    etag: known.etag_header(),
                    last_modified: None,
                };
            }
        }

        if let (Some(header), Some(cached)) = (&request.if_modified_since, known.last_modified) {
            if let Ok(since) = httpdate::parse_http_date(header) {
                if since >= cached {
                    return ConditionalResult {
                        not_modified: true,
                        etag: None,
                        last_modified: known.last_modified_header(),
                    };
                }
            }
        }

        ConditionalResult {
            not_modified: false,
            etag: known.etag_header(),
            last_modified: known.last_modified_header(),
        }
    }

    /// Answer a GET for `resource`: an empty 304 when the request's validators
    /// still match, otherwise 200 with fresh cache headers.
    pub fn respond(&self, resource: &str, request: &HeaderMap, content: &str) -> ServedResponse {
        let conditional = ConditionalHeaders::from_header_map(request);
        let result = self.check_conditional_request(resource, &conditional);

        if result.not_modified {
            let mut headers = HeaderMap::new();
            for (name, value) in [
                (header::ETAG, &result.etag),
                (header::LAST_MODIFIED, &result.last_modified),
            ] {
                if let Some(value) = value.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
                    headers.insert(name, value);
                }
            }
            return ServedResponse {
                status: StatusCode::NOT_MODIFIED,
                headers,
                body: None,
            };
        }

        let headers = self
            .generate_cache_headers(resource, content, &HeaderOptions::default())
            .to_header_map();
        ServedResponse {
            status: StatusCode::OK,
            headers,
            body: Some(content.to_string()),
        }
    }

    /// Validator known for a resource
    pub fn validator(&self, resource: &str) -> Option<Validator> {
        self.validators.get(resource)
    }

    pub(crate) fn record_fetch(&self, elapsed: Duration, not_modified: bool) {
        let mut timings = self.timings.lock();
        timings.requests += 1;
        timings.total += elapsed;
        if not_modified {
            timings.not_modified += 1;
        }
    }

    /// Purge CDN copies; `false` when CDN integration is off or the purge failed
    pub async fn purge_cdn(&self, urls: &[String]) -> bool {
        match &self.cdn {
            Some(purger) => purger.purge(urls).await,
            None => false,
        }
    }

    pub fn stats(&self) -> HttpCacheStats {
        let timings = self.timings.lock();
        let avg_response_time_ms = if timings.requests == 0 {
            0.0
        } else {
            timings.total.as_secs_f64() * 1000.0 / timings.requests as f64
        };

        HttpCacheStats {
            etag_count: self.validators.etag_count(),
            last_modified_count: self.validators.last_modified_count(),
            total_requests: timings.requests,
            not_modified_responses: timings.not_modified,
            avg_response_time_ms,
        }
    }

    /// Drop all validators and timings
    pub fn clear(&self) {
        self.validators.clear();
        *self.timings.lock() = ResponseTimes::default();
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| HttpCacheError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}
