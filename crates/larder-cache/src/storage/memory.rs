use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::TierStorage;
use crate::{entry::CacheEntry, tier::Tier, Result};

struct Slot {
    entry: CacheEntry,
    /// Monotonic write order, breaks `last_accessed` ties
    recency: u64,
}

/// In-memory cache tier with LRU batch eviction
pub struct MemoryTier {
    data: RwLock<HashMap<String, Slot>>,
    max_entries: usize,
    clock: AtomicU64,
}

impl MemoryTier {
    /// Create new in-memory storage holding at most `max_entries`
    pub fn new(max_entries: usize) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            max_entries,
            clock: AtomicU64::new(0),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// True when inserting a new key requires eviction first
    pub async fn needs_eviction_for(&self, key: &str) -> bool {
        let data = self.data.read().await;
        !data.contains_key(key) && data.len() >= self.max_entries
    }

    /// Evict the least recently accessed `ceil(len * fraction)` entries in one pass.
    ///
    /// Returns the evicted keys, oldest first.
    pub async fn evict_lru_batch(&self, fraction: f64) -> Vec<String> {
        let mut data = self.data.write().await;
        if data.is_empty() {
            return Vec::new();
        }

        let mut order: Vec<(String, DateTime<Utc>, u64)> = data
            .iter()
            .map(|(k, slot)| (k.clone(), slot.entry.metadata.last_accessed, slot.recency))
            .collect();
        order.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));

        let to_remove = ((order.len() as f64) * fraction).ceil() as usize;
        let evicted: Vec<String> = order
            .into_iter()
            .take(to_remove)
            .map(|(key, _, _)| key)
            .collect();

        for key in &evicted {
            data.remove(key);
        }
        evicted
    }
}

#[async_trait]
impl TierStorage for MemoryTier {
    fn tier(&self) -> Tier {
        Tier::Memory
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        let recency = self.clock.fetch_add(1, Ordering::Relaxed);
        let mut data = self.data.write().await;
        data.insert(entry.key.clone(), Slot { entry, recency });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let data = self.data.read().await;
        Ok(data.get(key).map(|slot| slot.entry.clone()))
    }

    async fn touch(&self, key: &str, created: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool> {
        let mut data = self.data.write().await;
        match data.get_mut(key) {
            Some(slot) if slot.entry.timestamp == created => {
                slot.entry = slot.entry.touched(now);
                slot.recency = self.clock.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut data = self.data.write().await;
        Ok(data.remove(key).is_some())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let data = self.data.read().await;
        Ok(data.contains_key(key))
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>> {
        let data = self.data.read().await;
        Ok(data.values().map(|slot| slot.entry.clone()).collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut data = self.data.write().await;
        data.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let data = self.data.read().await;
        Ok(data.len())
    }

    async fn size_bytes(&self) -> Result<u64> {
        let data = self.data.read().await;
        Ok(data.values().map(|slot| slot.entry.metadata.size_bytes).sum())
    }
}
