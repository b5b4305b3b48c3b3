//! Validator-aware fetch wrapper

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use reqwest::{
    header::{self, HeaderValue},
    Method,
};
use tracing::debug;

use crate::{
    client::{FetchRequest, FetchResponse, HttpTransport},
    error::Result,
    strategy::HttpCacheStrategy,
    validator::{normalize_etag, resource_id},
};

/// Wraps a transport so GET requests carry known validators and 2xx
/// responses refresh them.
///
/// A `304` is answered from the validator store without reading a body.
/// Every other method passes through untouched.
#[derive(Clone)]
pub struct CacheAwareFetch {
    strategy: Arc<HttpCacheStrategy>,
    transport: Arc<dyn HttpTransport>,
}

impl CacheAwareFetch {
    pub fn new(strategy: Arc<HttpCacheStrategy>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            strategy,
            transport,
        }
    }

    pub fn strategy(&self) -> &Arc<HttpCacheStrategy> {
        &self.strategy
    }

    pub async fn fetch(&self, mut request: FetchRequest) -> Result<FetchResponse> {
        if request.method != Method::GET {
            return self.transport.execute(request).await;
        }

        let resource = resource_id(&request.url);
        if self.strategy.is_no_cache(&resource) {
            debug!(resource, "Bypassing validators for no-cache resource");
            return self.transport.execute(request).await;
        }

        let known = self.strategy.validator(&resource);
        if let Some(validator) = &known {
            if let Some(value) = validator
                .etag_header()
                .and_then(|v| HeaderValue::from_str(&v).ok())
            {
                request.headers.insert(header::IF_NONE_MATCH, value);
            }
            if let Some(value) = validator
                .last_modified_header()
                .and_then(|v| HeaderValue::from_str(&v).ok())
            {
                request.headers.insert(header::IF_MODIFIED_SINCE, value);
            }
        }

        let started = Instant::now();
        let response = self.transport.execute(request).await?;
        let not_modified = response.is_not_modified();
        self.strategy.record_fetch(started.elapsed(), not_modified);

        if not_modified {
            debug!(resource, "Validator still current (304)");
            let mut headers = response.headers;
            if let Some(validator) = known {
                if let Some(value) = validator
                    .etag_header()
                    .and_then(|v| HeaderValue::from_str(&v).ok())
                {
                    headers.entry(header::ETAG).or_insert(value);
                }
                if let Some(value) = validator
                    .last_modified_header()
                    .and_then(|v| HeaderValue::from_str(&v).ok())
                {
                    headers.entry(header::LAST_MODIFIED).or_insert(value);
                }
            }
            return Ok(FetchResponse {
                status: response.status,
                headers,
                body: Vec::new(),
                from_cache: true,
            });
        }

        if response.is_success() {
            let etag = response.header(header::ETAG.as_str()).map(normalize_etag);
            let last_modified = response
                .header(header::LAST_MODIFIED.as_str())
                .and_then(|v| httpdate::parse_http_date(v).ok());
            self.strategy
                .validators()
                .record_response(&resource, etag, last_modified);
        }
        Ok(response)
    }
}

#[async_trait]
impl HttpTransport for CacheAwareFetch {
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse> {
        self.fetch(request).await
    }
}
