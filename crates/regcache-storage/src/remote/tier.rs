//! Read-mostly adapter over the external registry client
//!
//! Parses each key and dispatches to the matching fetch. Sets land only in
//! a small TTL-bounded in-process response cache; nothing is ever pushed
//! to the remote source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use regcache_core::{
    epoch_seconds, glob_match, validate_key, CacheError, CacheTier, CacheValue, EntryMetadata,
    KeyKind, OpaqueEntry, RegistryClient, RegistryKey, RegistryTierConfig, Result, TierName,
};

#[derive(Debug, Clone)]
struct CachedResponse {
    value: CacheValue,
    size: u64,
    cached_at: i64,
    accessed_at: i64,
    access_count: u64,
    expires_at: Instant,
}

impl CachedResponse {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Remote registry tier.
///
/// Cloning creates a new handle to the SAME response cache.
#[derive(Clone)]
pub struct RemoteTier {
    client: Arc<dyn RegistryClient>,
    config: RegistryTierConfig,
    responses: Arc<DashMap<String, CachedResponse>>,
}

impl RemoteTier {
    pub fn new(client: Arc<dyn RegistryClient>, config: RegistryTierConfig) -> Self {
        Self {
            client,
            config,
            responses: Arc::new(DashMap::new()),
        }
    }

    /// Fetch through the registry client, surfacing transport errors.
    ///
    /// The orchestrator calls this under the circuit breaker; absence
    /// (`NotFound` from the client) is not an error.
    pub async fn fetch(&self, key: &str) -> Result<Option<CacheValue>> {
        validate_key(key)?;
        if let Some(hit) = self.cache_lookup(key) {
            return Ok(Some(hit));
        }

        let parsed = RegistryKey::parse(key)?;
        let deadline = Duration::from_millis(self.config.timeout_ms);

        let fetched = match parsed.kind {
            KeyKind::Component => {
                let (fw, name) = (
                    parsed.framework.unwrap_or_default(),
                    parsed.name.unwrap_or_default(),
                );
                self.bounded(deadline, self.client.fetch_component(&fw, &name))
                    .await
                    .map(CacheValue::Component)
            }
            KeyKind::Block => {
                let (fw, name) = (
                    parsed.framework.unwrap_or_default(),
                    parsed.name.unwrap_or_default(),
                );
                self.bounded(deadline, self.client.fetch_block(&fw, &name))
                    .await
                    .map(CacheValue::Block)
            }
            KeyKind::Metadata => {
                let sub = parsed.sub.unwrap_or_default();
                self.fetch_metadata(&sub, deadline).await
            }
            KeyKind::Directory => {
                let sub = parsed.sub.unwrap_or_default();
                self.bounded(deadline, self.client.fetch_directory(&sub))
                    .await
                    .map(|tree| CacheValue::Opaque(OpaqueEntry::json(&tree)))
            }
            KeyKind::Other => return Ok(None),
        };

        match fetched {
            Ok(value) => {
                self.cache_store(key, &value);
                Ok(Some(value))
            }
            Err(CacheError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_metadata(&self, sub: &str, deadline: Duration) -> Result<CacheValue> {
        // `metadata:components:<framework>` lists what the registry offers;
        // everything else is account metadata.
        if let Some(framework) = sub.strip_prefix("components:") {
            let names = self
                .bounded(deadline, self.client.list_components(framework))
                .await?;
            return Ok(CacheValue::Opaque(OpaqueEntry::json(&serde_json::json!(names))));
        }
        let value = self.bounded(deadline, self.client.fetch_rate_limit()).await?;
        Ok(CacheValue::Opaque(OpaqueEntry::json(&value)))
    }

    async fn bounded<T>(
        &self,
        deadline: Duration,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout),
        }
    }

    fn cache_lookup(&self, key: &str) -> Option<CacheValue> {
        let mut entry = self.responses.get_mut(key)?;
        if entry.is_expired() {
            drop(entry);
            self.responses.remove(key);
            return None;
        }
        entry.accessed_at = epoch_seconds();
        entry.access_count += 1;
        Some(entry.value.clone())
    }

    fn cache_store(&self, key: &str, value: &CacheValue) {
        // Keep the response cache bounded: drop the oldest entry when full
        if self.responses.len() >= self.config.response_cache_max
            && !self.responses.contains_key(key)
        {
            let oldest = self
                .responses
                .iter()
                .min_by_key(|e| e.value().cached_at)
                .map(|e| e.key().clone());
            if let Some(oldest) = oldest {
                self.responses.remove(&oldest);
            }
        }

        let now = epoch_seconds();
        self.responses.insert(
            key.to_string(),
            CachedResponse {
                value: value.clone(),
                size: value.estimated_size(),
                cached_at: now,
                accessed_at: now,
                access_count: 0,
                expires_at: Instant::now()
                    + Duration::from_secs(self.config.response_cache_ttl_seconds),
            },
        );
    }
}

#[async_trait]
impl CacheTier for RemoteTier {
    fn tier(&self) -> TierName {
        TierName::Remote
    }

    /// Absorbs transport errors: a failing registry reads as a miss here.
    /// Use [`RemoteTier::fetch`] where errors must surface.
    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        match self.fetch(key).await {
            Ok(value) => Ok(value),
            Err(e @ (CacheError::Validation(_) | CacheError::Disposed)) => Err(e),
            Err(e) => {
                tracing::warn!(key, error = %e, "remote fetch failed; treating as absent");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &CacheValue, _ttl_seconds: Option<u64>) -> Result<()> {
        // The remote source is read-only; sets only refresh the local
        // response cache.
        validate_key(key)?;
        self.cache_store(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.responses.remove(key).is_some())
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
            .responses
            .iter()
            .filter(|e| !e.value().is_expired())
            .filter(|e| glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.responses.len())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<EntryMetadata>> {
        validate_key(key)?;
        Ok(self.responses.get(key).map(|entry| EntryMetadata {
            size: entry.size,
            cached_at: entry.cached_at,
            accessed_at: entry.accessed_at,
            access_count: entry.access_count,
            ttl_seconds: Some(self.config.response_cache_ttl_seconds),
        }))
    }

    async fn clear(&self) -> Result<()> {
        self.responses.clear();
        Ok(())
    }
}
