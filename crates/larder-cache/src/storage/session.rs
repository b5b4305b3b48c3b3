use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::TierStorage;
use crate::{entry::CacheEntry, error::CacheError, tier::Tier, Result};

/// Session-scoped tier: lives as long as the process and refuses writes past
/// its byte quota instead of evicting.
pub struct SessionTier {
    data: RwLock<HashMap<String, CacheEntry>>,
    max_size_bytes: u64,
}

impl SessionTier {
    pub fn new(max_size_bytes: u64) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            max_size_bytes,
        }
    }
}

#[async_trait]
impl TierStorage for SessionTier {
    fn tier(&self) -> Tier {
        Tier::Session
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        let mut data = self.data.write().await;
        let used: u64 = data
            .iter()
            .filter(|(k, _)| **k != entry.key)
            .map(|(_, e)| e.metadata.size_bytes)
            .sum();

        if used + entry.metadata.size_bytes > self.max_size_bytes {
            return Err(CacheError::write(
                Tier::Session,
                format!(
                    "quota exceeded: {} + {} > {} bytes",
                    used, entry.metadata.size_bytes, self.max_size_bytes
                ),
            ));
        }

        data.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn touch(&self, key: &str, created: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool> {
        let mut data = self.data.write().await;
        match data.get_mut(key) {
            Some(entry) if entry.timestamp == created => {
                *entry = entry.touched(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.data.write().await.remove(key).is_some())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.data.read().await.contains_key(key))
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.data.read().await.values().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        self.data.write().await.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.data.read().await.len())
    }

    async fn size_bytes(&self) -> Result<u64> {
        Ok(self
            .data
            .read()
            .await
            .values()
            .map(|e| e.metadata.size_bytes)
            .sum())
    }
}
