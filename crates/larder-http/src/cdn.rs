//! CDN purge requests

use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    client::{FetchRequest, HttpTransport},
    config::{CdnConfig, CdnProvider},
    error::{HttpCacheError, Result},
};

#[derive(Serialize)]
struct PurgeBody<'a> {
    files: Vec<&'a str>,
}

/// Issues authenticated purge requests to the configured CDN endpoint
pub struct CdnPurger {
    provider: CdnProvider,
    endpoint: Url,
    api_key: String,
    transport: Arc<dyn HttpTransport>,
}

impl CdnPurger {
    /// Build a purger, failing on incomplete configuration
    pub fn new(config: &CdnConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let endpoint = Url::parse(&config.resolved_endpoint()?)?;
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| HttpCacheError::Configuration("CDN api_key is missing".to_string()))?;

        Ok(Self {
            provider: config.provider,
            endpoint,
            api_key,
            transport,
        })
    }

    /// Purger for an enabled, complete configuration; `None` otherwise.
    ///
    /// A broken configuration disables CDN integration with a warning.
    pub fn from_config(config: &CdnConfig, transport: Arc<dyn HttpTransport>) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        match Self::new(config, transport) {
            Ok(purger) => {
                info!(provider = ?config.provider, "CDN purge enabled");
                Some(purger)
            }
            Err(e) => {
                warn!(provider = ?config.provider, error = %e, "CDN integration disabled");
                None
            }
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Purge `urls`, or everything when the list is empty
    pub async fn purge(&self, urls: &[String]) -> bool {
        match self.try_purge(urls).await {
            Ok(purged) => purged,
            Err(e) => {
                warn!(provider = ?self.provider, error = %e, "CDN purge failed");
                false
            }
        }
    }

    async fn try_purge(&self, urls: &[String]) -> Result<bool> {
        let files = if urls.is_empty() {
            vec!["/*"]
        } else {
            urls.iter().map(String::as_str).collect()
        };
        let body = serde_json::to_vec(&PurgeBody { files })
            .map_err(|e| HttpCacheError::Configuration(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| HttpCacheError::Configuration(e.to_string()))?;
        headers.insert(header::AUTHORIZATION, bearer);

        let request = FetchRequest {
            method: reqwest::Method::POST,
            url: self.endpoint.clone(),
            headers,
            body: Some(body),
        };
        let response = self.transport.execute(request).await?;

        if response.is_success() {
            debug!(count = urls.len(), "CDN purge accepted");
            Ok(true)
        } else {
            warn!(status = %response.status, "CDN purge rejected");
            Ok(false)
        }
    }
}
