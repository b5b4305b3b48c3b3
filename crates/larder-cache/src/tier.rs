//! Storage tiers

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// One storage backend with its own capacity, latency and persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// In-process map with LRU batch eviction
    Memory,
    /// In-process map scoped to the running session, bounded by bytes
    Session,
    /// File-backed key-value area with a byte quota
    Persistent,
    /// SQLite-backed document store for large payloads
    Document,
}

impl Tier {
    /// All tiers, in declaration order
    pub const ALL: [Tier; 4] = [Tier::Memory, Tier::Session, Tier::Persistent, Tier::Document];

    /// Probe order used when a retrieve does not specify one
    pub fn default_fallback_order() -> Vec<Tier> {
        vec![Tier::Memory, Tier::Persistent, Tier::Document]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Memory => "memory",
            Tier::Session => "session",
            Tier::Persistent => "persistent",
            Tier::Document => "document",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Tier::Memory),
            "session" => Ok(Tier::Session),
            "persistent" => Ok(Tier::Persistent),
            "document" => Ok(Tier::Document),
            other => Err(format!("unknown cache tier: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse_roundtrip() {
        for tier in Tier::ALL {
            assert_eq!(tier.as_str().parse::<Tier>().unwrap(), tier);
        }
        assert!("indexeddb".parse::<Tier>().is_err());
    }

    #[test]
    fn test_default_fallback_skips_session() {
        assert_eq!(
            Tier::default_fallback_order(),
            vec![Tier::Memory, Tier::Persistent, Tier::Document]
        );
    }
}
