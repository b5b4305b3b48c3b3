use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::{fs, sync::Mutex};
use tracing::{debug, warn};

use super::TierStorage;
use crate::{entry::CacheEntry, error::CacheError, tier::Tier, Result};

const EXTENSION: &str = "cache";

/// File-backed key-value tier with a byte quota.
///
/// Every entry is a JSON file named after the hex-encoded key. When a write
/// would exceed the quota, the least recently accessed half of the stored
/// entries (plus anything unreadable) is dropped before retrying.
pub struct PersistentTier {
    base_path: PathBuf,
    max_size_bytes: u64,
    write_lock: Mutex<()>,
}

impl PersistentTier {
    /// Create new disk storage with base path
    pub fn new<P: AsRef<Path>>(base_path: P, max_size_bytes: u64) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            max_size_bytes,
            write_lock: Mutex::new(()),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get file path for a key
    fn key_path(&self, key: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", hex::encode(key.as_bytes()), EXTENSION))
    }

    /// Ensure base directory exists
    async fn ensure_base_dir(&self) -> Result<()> {
        if !fs::try_exists(&self.base_path).await? {
            fs::create_dir_all(&self.base_path).await?;
        }
        Ok(())
    }

    async fn cache_files(&self) -> Result<Vec<PathBuf>> {
        if !fs::try_exists(&self.base_path).await? {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut dir = fs::read_dir(&self.base_path).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }

    async fn read_file(path: &Path) -> Result<CacheEntry> {
        let raw = fs::read_to_string(path).await?;
        serde_json::from_str(&raw).map_err(|e| {
            CacheError::read(Tier::Persistent, format!("{}: {}", path.display(), e))
        })
    }

    async fn used_bytes(&self, excluding: Option<&Path>) -> Result<u64> {
        let mut total = 0u64;
        for path in self.cache_files().await? {
            if Some(path.as_path()) == excluding {
                continue;
            }
            if let Ok(metadata) = fs::metadata(&path).await {
                total += metadata.len();
            }
        }
        Ok(total)
    }

    /// Drop unreadable files and the older half of the readable ones
    async fn cleanup(&self) -> Result<usize> {
        let mut readable = Vec::new();
        let mut removed = 0;

        for path in self.cache_files().await? {
            match Self::read_file(&path).await {
                Ok(entry) => readable.push((path, entry.metadata.last_accessed)),
                Err(_) => {
                    let _ = fs::remove_file(&path).await;
                    removed += 1;
                }
            }
        }

        readable.sort_by(|a, b| a.1.cmp(&b.1));
        let to_remove = (readable.len() as f64 * 0.5).ceil() as usize;
        for (path, _) in readable.into_iter().take(to_remove) {
            if fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }

        debug!("Persistent tier cleanup removed {} files", removed);
        Ok(removed)
    }
}

#[async_trait]
impl TierStorage for PersistentTier {
    fn tier(&self) -> Tier {
        Tier::Persistent
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.ensure_base_dir().await?;

        let file_path = self.key_path(&entry.key);
        let json = serde_json::to_string(&entry).map_err(|e| CacheError::Serialization {
            message: e.to_string(),
        })?;
        let needed = json.len() as u64;

        if needed > self.max_size_bytes {
            return Err(CacheError::write(
                Tier::Persistent,
                format!("entry of {} bytes exceeds quota of {}", needed, self.max_size_bytes),
            ));
        }

        if self.used_bytes(Some(&file_path)).await? + needed > self.max_size_bytes {
            warn!(key = %entry.key, "Persistent tier near quota, cleaning up");
            self.cleanup().await?;
            if self.used_bytes(Some(&file_path)).await? + needed > self.max_size_bytes {
                return Err(CacheError::write(Tier::Persistent, "quota exceeded"));
            }
        }

        fs::write(&file_path, json)
            .await
            .map_err(|e| CacheError::write(Tier::Persistent, e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let file_path = self.key_path(key);
        if !fs::try_exists(&file_path).await? {
            return Ok(None);
        }
        Self::read_file(&file_path).await.map(Some)
    }

    async fn touch(&self, key: &str, created: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let file_path = self.key_path(key);
        if !fs::try_exists(&file_path).await? {
            return Ok(false);
        }
        let current = Self::read_file(&file_path).await?;
        if current.timestamp != created {
            return Ok(false);
        }

        let json = serde_json::to_string(&current.touched(now)).map_err(|e| {
            CacheError::Serialization {
                message: e.to_string(),
            }
        })?;
        fs::write(&file_path, json)
            .await
            .map_err(|e| CacheError::write(Tier::Persistent, e.to_string()))?;
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let file_path = self.key_path(key);
        match fs::remove_file(&file_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(fs::try_exists(self.key_path(key)).await?)
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for path in self.cache_files().await? {
            match Self::read_file(&path).await {
                Ok(entry) => entries.push(entry),
                Err(e) => debug!("Skipping unreadable cache file: {}", e),
            }
        }
        Ok(entries)
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        for path in self.cache_files().await? {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.cache_files().await?.len())
    }

    async fn size_bytes(&self) -> Result<u64> {
        self.used_bytes(None).await
    }

    async fn purge_unreadable(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        for path in self.cache_files().await? {
            if Self::read_file(&path).await.is_err() && fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
