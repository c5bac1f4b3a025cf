//! In-memory cache tier using DashMap

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use regcache_core::{
    epoch_seconds, glob_match, validate_key, CacheError, CacheTier, CacheValue, EntryMetadata,
    MemoryTierConfig, Result, TierName,
};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: CacheValue,
    size: u64,
    created_at: i64,
    updated_at: i64,
    accessed_at: i64,
    access_count: u64,
    expires_at: Option<Instant>,
    ttl_seconds: Option<u64>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Bounded in-memory tier with TTL and per-entry accounting.
///
/// The size cap is a hard limit: a write that would push the total past
/// `max_bytes` is refused with a capacity error rather than evicting.
/// Cloning creates a new handle to the SAME underlying store.
#[derive(Clone)]
pub struct MemoryTier {
    data: Arc<DashMap<String, MemoryEntry>>,
    /// Guards the capacity check-and-update so totals stay exact
    total_bytes: Arc<Mutex<u64>>,
    config: MemoryTierConfig,
}

impl MemoryTier {
    pub fn new(config: MemoryTierConfig) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            total_bytes: Arc::new(Mutex::new(0)),
            config,
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(MemoryTierConfig::default())
    }

    /// Current total stored bytes
    pub fn total_bytes(&self) -> u64 {
        *self.total_bytes.lock()
    }

    /// Remove every expired entry; returns how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let expired: Vec<String> = self
            .data
            .iter()
            .filter(|e| e.value().is_expired())
            .map(|e| e.key().clone())
            .collect();

        let mut count = 0;
        for key in expired {
            if self.remove_entry(&key) {
                count += 1;
            }
        }
        count
    }

    fn remove_entry(&self, key: &str) -> bool {
        let mut total = self.total_bytes.lock();
        if let Some((_, entry)) = self.data.remove(key) {
            *total = total.saturating_sub(entry.size);
            true
        } else {
            false
        }
    }

    fn effective_ttl(&self, ttl_seconds: Option<u64>) -> Option<u64> {
        match ttl_seconds {
            Some(0) => None,
            Some(ttl) => Some(ttl),
            None if self.config.ttl_seconds > 0 => Some(self.config.ttl_seconds),
            None => None,
        }
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn tier(&self) -> TierName {
        TierName::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        validate_key(key)?;
        match self.data.get_mut(key) {
            Some(mut entry) => {
                if entry.is_expired() {
                    drop(entry);
                    self.remove_entry(key);
                    return Ok(None);
                }
                entry.accessed_at = epoch_seconds();
                entry.access_count += 1;
                Ok(Some(entry.value.clone()))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl_seconds: Option<u64>) -> Result<()> {
        validate_key(key)?;
        let size = value.estimated_size();
        let now = epoch_seconds();
        let ttl = self.effective_ttl(ttl_seconds);

        let mut total = self.total_bytes.lock();
        let existing = self.data.get(key).map(|e| e.size).unwrap_or(0);
        let new_total = total.saturating_sub(existing).saturating_add(size);
        if new_total > self.config.max_bytes {
            return Err(CacheError::Capacity(format!(
                "memory tier: {} bytes would exceed limit of {}",
                new_total, self.config.max_bytes
            )));
        }

        let created_at = self.data.get(key).map(|e| e.created_at).unwrap_or(now);
        let entry = MemoryEntry {
            value: value.clone(),
            size,
            created_at,
            updated_at: now,
            accessed_at: now,
            access_count: 0,
            expires_at: ttl.map(|t| Instant::now() + Duration::from_secs(t)),
            ttl_seconds: ttl,
        };
        self.data.insert(key.to_string(), entry);
        *total = new_total;

        if self.config.debug {
            tracing::debug!(key, size, ttl = ?ttl, "memory set");
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.remove_entry(key))
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<CacheValue>>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.get(key).await?);
        }
        Ok(results)
    }

    async fn set_many(&self, entries: &[(String, CacheValue, Option<u64>)]) -> Result<()> {
        for (key, value, ttl) in entries {
            self.set(key, value, *ttl).await?;
        }
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .data
            .iter()
            .filter(|e| !e.value().is_expired())
            .filter(|e| glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.data.len())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<EntryMetadata>> {
        validate_key(key)?;
        Ok(self.data.get(key).map(|entry| EntryMetadata {
            size: entry.size,
            cached_at: entry.updated_at,
            accessed_at: entry.accessed_at,
            access_count: entry.access_count,
            ttl_seconds: entry.ttl_seconds,
        }))
    }

    async fn clear(&self) -> Result<()> {
        let mut total = self.total_bytes.lock();
        self.data.clear();
        *total = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regcache_core::OpaqueEntry;

    fn opaque(payload: &str) -> CacheValue {
        CacheValue::Opaque(OpaqueEntry {
            content_type: "text/plain".to_string(),
            payload: payload.as_bytes().to_vec(),
        })
    }

    fn tier(max_bytes: u64) -> MemoryTier {
        MemoryTier::new(MemoryTierConfig {
            enabled: true,
            max_bytes,
            ttl_seconds: 0,
            debug: false,
        })
    }

    #[tokio::test]
    async fn test_basic_get_set() {
        let tier = tier(1024 * 1024);
        tier.set("metadata:a", &opaque("value"), Some(60)).await.unwrap();
        let got = tier.get("metadata:a").await.unwrap();
        assert_eq!(got, Some(opaque("value")));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let tier = tier(1024);
        assert!(tier.get("metadata:missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_capacity_refusal() {
        let value = opaque("0123456789");
        let size = value.estimated_size();
        let tier = tier(size * 2 + 1);

        tier.set("metadata:a", &value, None).await.unwrap();
        tier.set("metadata:b", &value, None).await.unwrap();
        let err = tier.set("metadata:c", &value, None).await;
        assert!(matches!(err, Err(CacheError::Capacity(_))));

        // Existing entries untouched
        assert_eq!(tier.len().await.unwrap(), 2);
        assert_eq!(tier.total_bytes(), size * 2);
    }

    #[tokio::test]
    async fn test_replace_accounts_size_delta() {
        let small = opaque("s");
        let big = opaque("a much longer payload than before");
        let tier = tier(big.estimated_size() + 1);

        tier.set("metadata:k", &small, None).await.unwrap();
        tier.set("metadata:k", &big, None).await.unwrap();
        assert_eq!(tier.total_bytes(), big.estimated_size());
        assert_eq!(tier.len().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_lazy() {
        let tier = tier(1024 * 1024);
        tier.set("metadata:short", &opaque("v"), Some(1)).await.unwrap();
        assert!(tier.get("metadata:short").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(tier.get("metadata:short").await.unwrap().is_none());
        // Lazy delete reclaimed the bytes
        assert_eq!(tier.total_bytes(), 0);
    }

    #[tokio::test]
    async fn test_access_count_monotonic() {
        let tier = tier(1024 * 1024);
        tier.set("metadata:k", &opaque("v"), None).await.unwrap();
        tier.get("metadata:k").await.unwrap();
        tier.get("metadata:k").await.unwrap();
        let meta = tier.get_metadata("metadata:k").await.unwrap().unwrap();
        assert_eq!(meta.access_count, 2);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let tier = tier(1024 * 1024);
        tier.set("metadata:a", &opaque("1"), None).await.unwrap();
        tier.set("metadata:b", &opaque("2"), None).await.unwrap();

        assert!(tier.delete("metadata:a").await.unwrap());
        assert!(!tier.delete("metadata:a").await.unwrap());

        tier.clear().await.unwrap();
        assert_eq!(tier.len().await.unwrap(), 0);
        assert_eq!(tier.total_bytes(), 0);
    }

    #[tokio::test]
    async fn test_keys_glob() {
        let tier = tier(1024 * 1024);
        tier.set("component:react:button", &opaque("1"), None).await.unwrap();
        tier.set("component:react:card", &opaque("2"), None).await.unwrap();
        tier.set("block:react:login-02", &opaque("3"), None).await.unwrap();

        let mut keys = tier.keys("component:react:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["component:react:button", "component:react:card"]);

        let all = tier.keys("*").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired() {
        let tier = tier(1024 * 1024);
        tier.set("metadata:keep", &opaque("1"), None).await.unwrap();
        tier.set("metadata:drop", &opaque("2"), Some(1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(tier.cleanup_expired(), 1);
        assert_eq!(tier.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let tier = tier(1024);
        assert!(tier.get("bad\u{0000}key").await.is_err());
        assert!(tier.set("", &opaque("v"), None).await.is_err());
    }
}
