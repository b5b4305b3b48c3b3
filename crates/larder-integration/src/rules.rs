//! Invalidation rules keyed by glob pattern

use std::time::Duration;

use globset::{Glob, GlobMatcher};
use larder_cache::InvalidationTrigger;
use serde::{Deserialize, Serialize};

use crate::error::{IntegrationError, Result};

/// Policy applied to keys matching `pattern`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRule {
    /// Glob over cache keys, e.g. `api/user/*`
    pub pattern: String,
    #[serde(default)]
    pub triggers: Vec<InvalidationTrigger>,
    /// TTL for matching keys stored without one (seconds)
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl InvalidationRule {
    pub fn new(pattern: impl Into<String>, triggers: &[InvalidationTrigger]) -> Self {
        Self {
            pattern: pattern.into(),
            triggers: triggers.to_vec(),
            ttl_secs: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = Some(ttl.as_secs());
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    pub fn has_trigger(&self, trigger: InvalidationTrigger) -> bool {
        self.triggers.contains(&trigger)
    }
}

/// Compiled rule list
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<(InvalidationRule, GlobMatcher)>,
}

impl RuleSet {
    /// Compile every rule pattern, rejecting malformed globs
    pub fn new(rules: Vec<InvalidationRule>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let matcher = Glob::new(&rule.pattern)
                    .map_err(|e| {
                        IntegrationError::Validation(format!(
                            "invalid rule pattern '{}': {e}",
                            rule.pattern
                        ))
                    })?
                    .compile_matcher();
                Ok((rule, matcher))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    /// Rule for `key`: a rule whose pattern equals `key` wins, otherwise the
    /// first rule whose glob matches.
    pub fn find(&self, key: &str) -> Option<&InvalidationRule> {
        self.rules
            .iter()
            .find(|(rule, _)| rule.pattern == key)
            .or_else(|| self.rules.iter().find(|(_, matcher)| matcher.is_match(key)))
            .map(|(rule, _)| rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
