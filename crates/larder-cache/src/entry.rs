//! Cache entries

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bookkeeping attached to every cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Size of the stored (possibly compressed) payload in bytes
    pub size_bytes: u64,
    /// Whether `value` holds a base64-encoded compressed payload
    pub compressed: bool,
    /// Number of live hits served from this entry
    pub hits: u64,
    /// Last time the entry was stored or served
    pub last_accessed: DateTime<Utc>,
}

/// A stored payload and its freshness information.
///
/// Entries are never mutated in place by the engine: a hit produces a
/// replacement through [`CacheEntry::touched`] that is written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// Serialized payload (JSON, or base64 of the compressed JSON)
    pub value: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    pub ttl: Duration,
    pub version: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub metadata: EntryMetadata,
}

impl CacheEntry {
    /// Create a new entry stamped with the current time
    pub fn new(
        key: impl Into<String>,
        value: String,
        ttl: Duration,
        version: impl Into<String>,
        dependencies: Vec<String>,
        compressed: bool,
    ) -> Self {
        let now = Utc::now();
        let size_bytes = value.len() as u64;

        Self {
            key: key.into(),
            value,
            timestamp: now,
            ttl,
            version: version.into(),
            dependencies,
            metadata: EntryMetadata {
                size_bytes,
                compressed,
                hits: 0,
                last_accessed: now,
            },
        }
    }

    /// Time at which the entry stops being served
    pub fn expires_at(&self) -> DateTime<Utc> {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => self
                .timestamp
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            Err(_) => DateTime::<Utc>::MAX_UTC,
        }
    }

    /// Expired once strictly more than `ttl` has elapsed since creation
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match (now - self.timestamp).to_std() {
            Ok(elapsed) => elapsed > self.ttl,
            // Clock went backwards: treat as fresh
            Err(_) => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Replacement entry recording one more hit at `now`
    pub fn touched(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.metadata.hits += 1;
        next.metadata.last_accessed = now;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ttl: Duration) -> CacheEntry {
        CacheEntry::new("k", "\"v\"".to_string(), ttl, "1.0.0", vec![], false)
    }

    #[test]
    fn test_size_tracks_serialized_value() {
        let e = entry(Duration::from_secs(1));
        assert_eq!(e.metadata.size_bytes, 3);
        assert_eq!(e.metadata.hits, 0);
        assert_eq!(e.metadata.last_accessed, e.timestamp);
    }

    #[test]
    fn test_expiry_is_strictly_after_ttl() {
        let e = entry(Duration::from_millis(100));
        let at_ttl = e.timestamp + chrono::Duration::milliseconds(100);
        let past_ttl = e.timestamp + chrono::Duration::milliseconds(101);

        assert!(!e.is_expired_at(at_ttl));
        assert!(e.is_expired_at(past_ttl));
        assert_eq!(e.expires_at(), at_ttl);
    }

    #[test]
    fn test_clock_skew_is_not_expiry() {
        let e = entry(Duration::from_millis(1));
        let earlier = e.timestamp - chrono::Duration::seconds(10);
        assert!(!e.is_expired_at(earlier));
    }

    #[test]
    fn test_touched_returns_replacement() {
        let e = entry(Duration::from_secs(60));
        let later = e.timestamp + chrono::Duration::seconds(5);
        let t = e.touched(later);

        assert_eq!(t.metadata.hits, 1);
        assert_eq!(t.metadata.last_accessed, later);
        assert_eq!(e.metadata.hits, 0);
        assert_eq!(t.timestamp, e.timestamp);
    }

    #[test]
    fn test_entry_json_roundtrip() {
        let e = CacheEntry::new(
            "child",
            "[1,2]".to_string(),
            Duration::from_secs(30),
            "2.0.0",
            vec!["parent".to_string()],
            false,
        );
        let json = serde_json::to_string(&e).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
