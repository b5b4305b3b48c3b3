//! Layered settings: defaults, an optional TOML file, then environment

use std::path::PathBuf;

use config::{Config, Environment, File};
use larder_cache::CacheConfig;
use larder_http::{CdnConfig, HttpCacheConfig, HttpConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{IntegrationError, Result},
    rules::{InvalidationRule, RuleSet},
    selection::SelectionThresholds,
};

/// Everything the integration layer needs to start
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LarderSettings {
    pub cache: CacheConfig,
    pub http_cache: HttpCacheConfig,
    /// Outbound client used for fetches and CDN purges
    pub http: HttpConfig,
    pub cdn: CdnConfig,
    pub rules: Vec<InvalidationRule>,
    pub selection: SelectionThresholds,
}

impl LarderSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_http_cache(mut self, http_cache: HttpCacheConfig) -> Self {
        self.http_cache = http_cache;
        self
    }

    pub fn with_cdn(mut self, cdn: CdnConfig) -> Self {
        self.cdn = cdn;
        self
    }

    pub fn with_rule(mut self, rule: InvalidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_selection(mut self, selection: SelectionThresholds) -> Self {
        self.selection = selection;
        self
    }

    /// Check every section; CDN problems are left to startup, which disables CDN instead
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.http_cache.validate()?;

        if self.selection.small_bytes > self.selection.large_bytes {
            return Err(IntegrationError::Validation(format!(
                "selection.small_bytes ({}) exceeds selection.large_bytes ({})",
                self.selection.small_bytes, self.selection.large_bytes
            )));
        }
        RuleSet::new(self.rules.clone())?;
        Ok(())
    }
}

/// Loads [`LarderSettings`] from an optional file and prefixed environment variables.
///
/// Environment keys are nested with `__`, so `LARDER__CACHE__MEMORY__MAX_ENTRIES=50`
/// sets `cache.memory.max_entries`.
pub struct SettingsLoader {
    path: Option<PathBuf>,
    env_prefix: String,
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self {
            path: None,
            env_prefix: "LARDER".to_string(),
        }
    }

    /// Read this file first; a missing file is not an error
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn load(&self) -> Result<LarderSettings> {
        let mut builder = Config::builder();
        if let Some(path) = &self.path {
            debug!(path = %path.display(), "Loading settings file");
            builder = builder.add_source(File::from(path.clone()).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let settings: LarderSettings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}
