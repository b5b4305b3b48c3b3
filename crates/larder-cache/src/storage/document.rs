use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::TierStorage;
use crate::{entry::CacheEntry, error::CacheError, tier::Tier, Result};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    entry_json TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    version TEXT NOT NULL,
    size_bytes INTEGER NOT NULL
)";

/// SQLite-backed document store for large payloads.
///
/// The connection is shared behind a mutex and every statement runs on the
/// blocking pool so callers never stall the async runtime.
pub struct DocumentTier {
    conn: Arc<Mutex<Connection>>,
}

impl DocumentTier {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Private in-memory database, gone when the tier is dropped
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            op(&mut guard)
        })
        .await
        .map_err(|e| CacheError::read(Tier::Document, format!("blocking task failed: {e}")))?
    }

    fn decode(json: &str) -> Result<CacheEntry> {
        serde_json::from_str(json).map_err(|e| CacheError::read(Tier::Document, e.to_string()))
    }
}

#[async_trait]
impl TierStorage for DocumentTier {
    fn tier(&self) -> Tier {
        Tier::Document
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        let json = serde_json::to_string(&entry).map_err(|e| CacheError::Serialization {
            message: e.to_string(),
        })?;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR REPLACE INTO cache_entries (key, entry_json, timestamp, version, size_bytes)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.key,
                    json,
                    entry.timestamp.to_rfc3339(),
                    entry.version,
                    entry.metadata.size_bytes as i64
                ],
            )
            .map_err(|e| CacheError::write(Tier::Document, e.to_string()))?;
            tx.commit()
                .map_err(|e| CacheError::write(Tier::Document, e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let key = key.to_string();
        let json: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT entry_json FROM cache_entries WHERE key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;

        json.map(|j| Self::decode(&j)).transpose()
    }

    async fn touch(&self, key: &str, created: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let created = created.to_rfc3339();
            let tx = conn.transaction()?;
            let json: Option<String> = tx
                .query_row(
                    "SELECT entry_json FROM cache_entries WHERE key = ?1 AND timestamp = ?2",
                    params![key, created],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(json) = json else {
                return Ok(false);
            };

            let touched = Self::decode(&json)?.touched(now);
            let json = serde_json::to_string(&touched).map_err(|e| CacheError::Serialization {
                message: e.to_string(),
            })?;
            let changed = tx
                .execute(
                    "UPDATE cache_entries SET entry_json = ?1 WHERE key = ?2 AND timestamp = ?3",
                    params![json, key, created],
                )
                .map_err(|e| CacheError::write(Tier::Document, e.to_string()))?;
            tx.commit()
                .map_err(|e| CacheError::write(Tier::Document, e.to_string()))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
            Ok(changed > 0)
        })
        .await
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM cache_entries WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>> {
        let rows: Vec<String> = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT entry_json FROM cache_entries")?;
                let rows = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(rows)
            })
            .await?;

        Ok(rows.iter().filter_map(|j| Self::decode(j).ok()).collect())
    }

    async fn clear(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM cache_entries", [])?;
            Ok(())
        })
        .await
    }

    async fn len(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    async fn size_bytes(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(size_bytes), 0) FROM cache_entries",
                [],
                |row| row.get(0),
            )?;
            Ok(total as u64)
        })
        .await
    }

    async fn purge_unreadable(&self) -> Result<usize> {
        let rows: Vec<(String, String)> = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT key, entry_json FROM cache_entries")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<Vec<(String, String)>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut removed = 0;
        for (key, json) in rows {
            if Self::decode(&json).is_err() && self.remove(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    fn entry(key: &str) -> CacheEntry {
        CacheEntry::new(
            key,
            "{\"meals\":[1,2,3]}".to_string(),
            Duration::from_secs(60),
            "3.1.0",
            vec!["day".to_string()],
            false,
        )
    }

    #[tokio::test]
    async fn test_document_tier_roundtrip() {
        let tier = DocumentTier::in_memory().unwrap();
        let stored = entry("diary");
        tier.put(stored.clone()).await.unwrap();

        let back = tier.get("diary").await.unwrap().unwrap();
        assert_eq!(back, stored);
        assert_eq!(tier.len().await.unwrap(), 1);
        assert_eq!(tier.size_bytes().await.unwrap(), stored.metadata.size_bytes);

        assert!(tier.remove("diary").await.unwrap());
        assert!(!tier.remove("diary").await.unwrap());
        assert!(tier.get("diary").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_document_tier_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.db");

        {
            let tier = DocumentTier::open(&path).unwrap();
            tier.put(entry("diary")).await.unwrap();
        }

        let tier = DocumentTier::open(&path).unwrap();
        assert!(tier.contains("diary").await.unwrap());
    }

    #[tokio::test]
    async fn test_touch_matches_creation_time() {
        let tier = DocumentTier::in_memory().unwrap();
        let stored = entry("diary");
        tier.put(stored.clone()).await.unwrap();

        let stale = stored.timestamp - chrono::Duration::seconds(1);
        assert!(!tier.touch("diary", stale, Utc::now()).await.unwrap());
        assert!(tier.touch("diary", stored.timestamp, Utc::now()).await.unwrap());
        assert_eq!(tier.get("diary").await.unwrap().unwrap().metadata.hits, 1);

        tier.remove("diary").await.unwrap();
        assert!(!tier.touch("diary", stored.timestamp, Utc::now()).await.unwrap());
        assert_eq!(tier.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_rows_are_purged() {
        let tier = DocumentTier::in_memory().unwrap();
        tier.put(entry("good")).await.unwrap();
        tier.with_conn(|conn| {
            conn.execute(
                "INSERT INTO cache_entries VALUES ('bad', 'garbage', '', '', 0)",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        assert!(matches!(
            tier.get("bad").await,
            Err(CacheError::StorageRead { tier: Tier::Document, .. })
        ));
        assert_eq!(tier.entries().await.unwrap().len(), 1);
        assert_eq!(tier.purge_unreadable().await.unwrap(), 1);
        assert_eq!(tier.len().await.unwrap(), 1);
    }
}
