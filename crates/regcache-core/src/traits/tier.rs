//! Cache tier trait

use async_trait::async_trait;
use crate::{CacheValue, EntryMetadata, Result, TierName};

/// Core trait every storage tier implements.
///
/// Implementations include the in-memory tier, the embedded-SQL tier and
/// the remote registry adapter. The orchestrator and the fallback chain
/// consume tiers through this trait.
#[async_trait]
pub trait CacheTier: Send + Sync + 'static {
    /// Which tier this is, for stats and availability tracking
    fn tier(&self) -> TierName;

    /// Get a value from the tier
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    async fn get(&self, key: &str) -> Result<Option<CacheValue>>;

    /// Read a value ignoring its freshness policy.
    ///
    /// Returns the value together with its age in seconds. Tiers that
    /// cannot serve stale data return `None`.
    async fn get_stale(&self, key: &str) -> Result<Option<(CacheValue, u64)>> {
        let _ = key;
        Ok(None)
    }

    /// Set a value in the tier
    async fn set(&self, key: &str, value: &CacheValue, ttl_seconds: Option<u64>) -> Result<()>;

    /// Delete a key from the tier
    ///
    /// Returns `true` if the key existed and was deleted.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check if a key exists and is fresh
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Get multiple keys at once
    ///
    /// Returns results in the same order as the input keys.
    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<CacheValue>>>;

    /// Set multiple entries at once
    async fn set_many(&self, entries: &[(String, CacheValue, Option<u64>)]) -> Result<()>;

    /// List keys matching a glob pattern (`*` wildcard, full-key match)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Number of entries in the tier
    async fn len(&self) -> Result<usize>;

    /// Check if the tier is empty
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Per-entry accounting metadata, if the key is present
    async fn get_metadata(&self, key: &str) -> Result<Option<EntryMetadata>>;

    /// Clear all entries from the tier
    async fn clear(&self) -> Result<()>;

    /// Release tier resources.
    ///
    /// Idempotent; externally managed resources (such as a database pool)
    /// are left open.
    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}
