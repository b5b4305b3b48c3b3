//! HTTP transport

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{header::HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::{
    config::HttpConfig,
    error::{HttpCacheError, Result},
};

/// Outbound request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    pub fn new(method: Method, url: &str) -> Result<Self> {
        Ok(Self {
            method,
            url: Url::parse(url)?,
            headers: HeaderMap::new(),
            body: None,
        })
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    pub fn post(url: &str) -> Result<Self> {
        Self::new(Method::POST, url)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Fully buffered response
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Answered from a local cache rather than a fresh network body
    pub from_cache: bool,
}

impl FetchResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
            from_cache: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// Mockable transport. Non-2xx statuses are responses, not errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse>;
}

/// reqwest-backed transport
pub struct HttpClient {
    inner: reqwest::Client,
    config: HttpConfig,
}

impl HttpClient {
    /// Create a new HTTP client with configuration
    pub fn new(config: HttpConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(&config.user_agent)
            .pool_idle_timeout(config.pool_idle_timeout())
            .redirect(if config.max_redirects > 0 {
                reqwest::redirect::Policy::limited(config.max_redirects)
            } else {
                reqwest::redirect::Policy::none()
            });

        if let Some(proxy_url) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| HttpCacheError::InvalidProxy(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let inner = builder
            .build()
            .map_err(|e| HttpCacheError::BuildError(e.to_string()))?;

        Ok(Self { inner, config })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(HttpConfig::default())
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }
}

#[async_trait]
impl HttpTransport for HttpClient {
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse> {
        debug!("HTTP {}: {}", request.method, request.url);

        let mut builder = self
            .inner
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(FetchResponse::new(status, headers, body))
    }
}

/// Create a shared transport (Arc-wrapped for cloning)
pub fn shared_client(config: HttpConfig) -> Result<Arc<dyn HttpTransport>> {
    Ok(Arc::new(HttpClient::new(config)?))
}
