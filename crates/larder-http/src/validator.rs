//! Content validators (ETag and Last-Modified)

use std::{
    collections::HashMap,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use url::Url;

/// Deterministic entity tag: 16 hex chars of the SHA-256 digest plus the length in hex
pub fn content_hash(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    format!("{}-{:x}", &hex::encode(digest)[..16], content.len())
}

/// Drop sub-second precision; HTTP dates carry whole seconds only
pub fn truncate_to_secs(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => UNIX_EPOCH + Duration::from_secs(elapsed.as_secs()),
        Err(_) => time,
    }
}

/// Strip a weak prefix and surrounding quotes from an entity tag
pub fn normalize_etag(raw: &str) -> String {
    let tag = raw.trim();
    let tag = tag.strip_prefix("W/").unwrap_or(tag);
    tag.trim_matches('"').to_string()
}

/// Parse a comma-separated `If-None-Match` value
pub fn parse_etag_list(header: &str) -> Vec<String> {
    header
        .split(',')
        .map(normalize_etag)
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Identifier under which validators are stored: `path[?query]`
pub fn resource_id(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Freshness tokens known for one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    /// Unquoted entity tag
    pub etag: Option<String>,
    pub last_modified: Option<SystemTime>,
}

impl Validator {
    /// Validator for locally generated content
    pub fn for_content(content: &[u8], now: SystemTime) -> Self {
        Self {
            etag: Some(content_hash(content)),
            last_modified: Some(truncate_to_secs(now)),
        }
    }

    /// Quoted form for `ETag` / `If-None-Match`
    pub fn etag_header(&self) -> Option<String> {
        self.etag.as_ref().map(|tag| format!("\"{tag}\""))
    }

    pub fn last_modified_header(&self) -> Option<String> {
        self.last_modified.map(httpdate::fmt_http_date)
    }
}

/// Map of resource identifier to its latest validator
#[derive(Debug, Default)]
pub struct ValidatorStore {
    entries: RwLock<HashMap<String, Validator>>,
}

impl ValidatorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a validator for generated content.
    ///
    /// Identical content keeps its original timestamp so `Last-Modified` does
    /// not move on every render.
    pub fn record_content(&self, resource: &str, content: &[u8], now: SystemTime) -> Validator {
        let fresh = Validator::for_content(content, now);
        let mut entries = self.entries.write();

        if let Some(existing) = entries.get(resource) {
            if existing.etag == fresh.etag && existing.last_modified.is_some() {
                return existing.clone();
            }
        }
        entries.insert(resource.to_string(), fresh.clone());
        fresh
    }

    /// Record validators taken from a response; absent fields keep their old value
    pub fn record_response(
        &self,
        resource: &str,
        etag: Option<String>,
        last_modified: Option<SystemTime>,
    ) {
        if etag.is_none() && last_modified.is_none() {
            return;
        }
        let mut entries = self.entries.write();
        let validator = entries.entry(resource.to_string()).or_insert(Validator {
            etag: None,
            last_modified: None,
        });
        if let Some(etag) = etag {
            validator.etag = Some(etag);
        }
        if let Some(last_modified) = last_modified {
            validator.last_modified = Some(truncate_to_secs(last_modified));
        }
    }

    pub fn get(&self, resource: &str) -> Option<Validator> {
        self.entries.read().get(resource).cloned()
    }

    pub fn remove(&self, resource: &str) -> Option<Validator> {
        self.entries.write().remove(resource)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of resources with an entity tag
    pub fn etag_count(&self) -> usize {
        self.entries.read().values().filter(|v| v.etag.is_some()).count()
    }

    /// Number of resources with a modification time
    pub fn last_modified_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|v| v.last_modified.is_some())
            .count()
    }
}
