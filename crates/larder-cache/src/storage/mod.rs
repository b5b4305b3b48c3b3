//! Cache storage backends
//!
//! Each tier has its own adapter behind the [`TierStorage`] trait. Adapters
//! report failures as [`crate::CacheError`]; the engine decides what a failure
//! means for the caller.

mod document;
mod memory;
mod persistent;
mod session;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{entry::CacheEntry, tier::Tier, Result};

pub use document::DocumentTier;
pub use memory::MemoryTier;
pub use persistent::PersistentTier;
pub use session::SessionTier;

/// Uniform read/write/delete interface over one backend
#[async_trait]
pub trait TierStorage: Send + Sync {
    /// Tier this adapter serves
    fn tier(&self) -> Tier;

    /// Store an entry, replacing any previous entry for the same key
    async fn put(&self, entry: CacheEntry) -> Result<()>;

    /// Retrieve an entry
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Record a hit on the entry stored under `key`, but only if it is still
    /// the one created at `created`. Returns `Ok(false)` when the key was
    /// removed or replaced in the meantime, leaving the tier untouched.
    async fn touch(&self, key: &str, created: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool>;

    /// Remove an entry; `Ok(false)` when the key was absent
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Check if key exists
    async fn contains(&self, key: &str) -> Result<bool>;

    /// Every readable entry, used by sweeps and statistics
    async fn entries(&self) -> Result<Vec<CacheEntry>>;

    /// Clear all entries
    async fn clear(&self) -> Result<()>;

    /// Get number of entries
    async fn len(&self) -> Result<usize>;

    /// Get total payload size in bytes
    async fn size_bytes(&self) -> Result<u64>;

    /// Remove entries that can no longer be decoded, returning how many went
    async fn purge_unreadable(&self) -> Result<usize> {
        Ok(0)
    }
}
