//! Hybrid tier orchestrator
//!
//! Composes the memory, sqlite and remote tiers behind one read/write
//! surface: read-through with upward promotion, four write strategies,
//! a write-behind queue and circuit-breaker gating of remote traffic.

mod stats;
mod write_behind;

pub(crate) use stats::StatsRecorder;
pub(crate) use write_behind::{PendingWrite, WriteBehindQueue};

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use sqlx::sqlite::SqlitePool;

use regcache_core::{
    validate_key, BreakerStatus, CacheConfig, CacheError, CacheStats, CacheTier, CacheValue,
    EntryMetadata, Lookup, RegistryClient, RegistryKey, Result, StorageKind, TierName,
    WriteStrategy,
};
use regcache_storage::{CircuitBreaker, MemoryTier, RemoteTier, SqliteTier};

use crate::recovery::{DegradationNotifier, RecoveryManager, Severity};

/// Dispose waits this many polls of 100 ms for the drainer to go idle
const DISPOSE_POLLS: u32 = 50;

type WriteOutcome<'a> = Pin<Box<dyn Future<Output = (TierName, Result<()>)> + Send + 'a>>;

/// Tier composition with configurable write strategy.
///
/// Cloning creates a new handle to the SAME orchestrator state.
#[derive(Clone)]
pub struct HybridOrchestrator {
    memory: Option<MemoryTier>,
    sqlite: Option<SqliteTier>,
    remote: Option<RemoteTier>,
    breaker: CircuitBreaker,
    stats: Arc<StatsRecorder>,
    queue: Arc<WriteBehindQueue>,
    notifier: DegradationNotifier,
    recovery: Arc<RecoveryManager>,
    config: CacheConfig,
    disposed: Arc<AtomicBool>,
}

impl HybridOrchestrator {
    /// Build the configured tiers.
    ///
    /// A tier that fails to initialize is logged and marked unavailable;
    /// construction itself never fails because of a bad tier.
    pub async fn new(
        config: CacheConfig,
        client: Option<Arc<dyn RegistryClient>>,
        pool: Option<SqlitePool>,
        breaker: CircuitBreaker,
        notifier: DegradationNotifier,
        recovery: Arc<RecoveryManager>,
    ) -> Self {
        let stats = Arc::new(StatsRecorder::new());

        let memory = if config.storage.kind != StorageKind::SqliteOnly
            && config.storage.memory.enabled
        {
            Some(MemoryTier::new(config.storage.memory.clone()))
        } else {
            stats.set_available(TierName::Memory, false);
            None
        };

        let sqlite = if config.storage.kind != StorageKind::MemoryOnly
            && config.storage.sqlite.enabled
        {
            let built = match pool {
                Some(pool) => {
                    SqliteTier::new(pool, config.storage.sqlite.clone(), config.ttl.clone()).await
                }
                None => SqliteTier::open(config.storage.sqlite.clone(), config.ttl.clone()).await,
            };
            match built {
                Ok(tier) => Some(tier),
                Err(e) => {
                    tracing::warn!(error = %e, "persistent tier failed to initialize");
                    notifier.notify(
                        Severity::Error,
                        "persistent",
                        None,
                        format!("tier initialization failed: {e}"),
                    );
                    stats.set_available(TierName::Persistent, false);
                    None
                }
            }
        } else {
            stats.set_available(TierName::Persistent, false);
            None
        };

        let remote = match (config.storage.kind, client) {
            (StorageKind::Hybrid, Some(client)) if config.storage.registry.enabled => {
                Some(RemoteTier::new(client, config.storage.registry.clone()))
            }
            _ => {
                stats.set_available(TierName::Remote, false);
                None
            }
        };

        let queue = Arc::new(WriteBehindQueue::new(config.performance.queue_size));

        Self {
            memory,
            sqlite,
            remote,
            breaker,
            stats,
            queue,
            notifier,
            recovery,
            config,
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(CacheError::Disposed)
        } else {
            Ok(())
        }
    }

    fn memory_if_available(&self) -> Option<&MemoryTier> {
        self.memory
            .as_ref()
            .filter(|_| self.stats.is_available(TierName::Memory))
    }

    fn sqlite_if_available(&self) -> Option<&SqliteTier> {
        self.sqlite
            .as_ref()
            .filter(|_| self.stats.is_available(TierName::Persistent))
    }

    fn remote_if_available(&self) -> Option<&RemoteTier> {
        self.remote
            .as_ref()
            .filter(|_| self.stats.is_available(TierName::Remote))
    }

    fn tier_error(&self, tier: TierName, key: &str, error: &CacheError) {
        self.stats.set_available(tier, false);
        self.recovery.record_error(tier.as_str(), error);
        self.notifier.notify(
            Severity::Warning,
            tier.as_str(),
            Some(key.to_string()),
            format!("tier error: {error}"),
        );
        tracing::debug!(tier = %tier, key, error = %error, "tier error on read");
    }

    /// Remote read failures are isolated by the circuit breaker, not the
    /// availability flag; flipping the flag here would starve the breaker
    /// of the consecutive failures it counts.
    fn remote_read_error(&self, key: &str, error: &CacheError) {
        self.recovery.record_error(TierName::Remote.as_str(), error);
        self.notifier.notify(
            Severity::Warning,
            TierName::Remote.as_str(),
            Some(key.to_string()),
            format!("registry error: {error}"),
        );
        tracing::debug!(key, error = %error, "remote read failed");
    }

    fn ttl_for(&self, key: &str) -> Option<u64> {
        RegistryKey::parse(key)
            .ok()
            .map(|k| self.config.ttl.for_kind(k.kind))
    }

    async fn promote_to_memory(&self, key: &str, value: &CacheValue) {
        let Some(memory) = &self.memory else { return };
        match memory.set(key, value, self.ttl_for(key)).await {
            Ok(()) => self.stats.set_available(TierName::Memory, true),
            // A full L1 is not an unavailable L1
            Err(CacheError::Capacity(_)) => {
                tracing::debug!(key, "memory promotion skipped: tier full");
            }
            Err(e) => {
                tracing::debug!(key, error = %e, "memory promotion failed");
                self.stats.set_available(TierName::Memory, false);
            }
        }
    }

    async fn promote_to_sqlite(&self, key: &str, value: &CacheValue) {
        let Some(sqlite) = &self.sqlite else { return };
        match sqlite.set(key, value, self.ttl_for(key)).await {
            Ok(()) => self.stats.set_available(TierName::Persistent, true),
            Err(e) => {
                tracing::debug!(key, error = %e, "persistent promotion failed");
                self.stats.set_available(TierName::Persistent, false);
            }
        }
    }

    async fn stale_from_sqlite(&self, key: &str) -> Result<Option<CacheValue>> {
        match &self.sqlite {
            Some(sqlite) => Ok(sqlite.get_stale(key).await?.map(|(value, _age)| value)),
            None => Ok(None),
        }
    }

    /// Read through the chain: L1, then L2 (promoting), then the remote
    /// registry under the circuit breaker with a stale-L2 fallback.
    pub async fn get(&self, key: &str) -> Result<Lookup> {
        self.ensure_live()?;
        validate_key(key)?;
        self.stats.record_operation();

        if let Some(memory) = self.memory_if_available() {
            let start = Instant::now();
            match memory.get(key).await {
                Ok(Some(value)) => {
                    self.stats.record_hit(TierName::Memory, start.elapsed());
                    return Ok(Lookup::Hit(value));
                }
                Ok(None) => {}
                Err(e @ CacheError::Validation(_)) => return Err(e),
                Err(e) => self.tier_error(TierName::Memory, key, &e),
            }
        }

        if let Some(sqlite) = self.sqlite_if_available() {
            let start = Instant::now();
            // Freshness-checked read that leaves expired rows behind: a
            // stale fallback further down may still need them.
            match sqlite.get_fresh(key).await {
                Ok(Some(value)) => {
                    self.stats.record_hit(TierName::Persistent, start.elapsed());
                    self.promote_to_memory(key, &value).await;
                    return Ok(Lookup::Hit(value));
                }
                Ok(None) => {}
                Err(e @ CacheError::Validation(_)) => return Err(e),
                Err(e) => self.tier_error(TierName::Persistent, key, &e),
            }
        }

        if let Some(remote) = self.remote_if_available() {
            if !self.breaker.allows_request() {
                // Breaker refused remote traffic; serve a stale row if one
                // exists and tag it for the caller.
                if let Ok(Some(value)) = self.stale_from_sqlite(key).await {
                    self.notifier.notify(
                        Severity::Warning,
                        TierName::Remote.as_str(),
                        Some(key.to_string()),
                        "circuit open; serving fallback value",
                    );
                    return Ok(Lookup::Fallback(value));
                }
                self.stats.record_miss();
                return Ok(Lookup::Miss);
            }

            let start = Instant::now();
            let result = self
                .breaker
                .execute_with_fallback(
                    || async {
                        match remote.fetch(key).await? {
                            Some(value) => Ok(Lookup::Hit(value)),
                            None => Ok(Lookup::Miss),
                        }
                    },
                    || async {
                        // No stale row means the fallback failed; the
                        // original fetch error then propagates.
                        match self.stale_from_sqlite(key).await? {
                            Some(value) => Ok(Lookup::Stale(value)),
                            None => Err(CacheError::NotFound(key.to_string())),
                        }
                    },
                )
                .await;

            match result {
                Ok(Lookup::Hit(value)) => {
                    self.stats.record_hit(TierName::Remote, start.elapsed());
                    self.stats.set_available(TierName::Remote, true);
                    self.promote_to_sqlite(key, &value).await;
                    self.promote_to_memory(key, &value).await;
                    return Ok(Lookup::Hit(value));
                }
                Ok(Lookup::Stale(value)) => {
                    // The fetch failed and the fallback produced a stale
                    // row; no promotion for degraded values.
                    self.notifier.notify(
                        Severity::Warning,
                        TierName::Remote.as_str(),
                        Some(key.to_string()),
                        "registry fetch failed; serving stale value",
                    );
                    return Ok(Lookup::Stale(value));
                }
                Ok(_) => {}
                Err(e) => self.remote_read_error(key, &e),
            }
        }

        self.stats.record_miss();
        Ok(Lookup::Miss)
    }

    /// Write according to the configured strategy
    pub async fn set(&self, key: &str, value: &CacheValue, ttl_seconds: Option<u64>) -> Result<()> {
        self.ensure_live()?;
        validate_key(key)?;
        self.stats.record_operation();
        let ttl = ttl_seconds.or_else(|| self.ttl_for(key));

        match self.config.strategy {
            WriteStrategy::WriteThrough => self.fan_out_write(key, value, ttl, true).await,
            WriteStrategy::ReadThrough | WriteStrategy::CacheAside => {
                self.fan_out_write(key, value, ttl, false).await
            }
            WriteStrategy::WriteBehind => {
                if let Some(memory) = &self.memory {
                    memory.set(key, value, ttl).await?;
                    self.stats.set_available(TierName::Memory, true);
                }
                self.queue.push(PendingWrite {
                    key: key.to_string(),
                    value: value.clone(),
                    ttl_seconds: ttl,
                    enqueued_at: Instant::now(),
                });
                self.spawn_drain();
                Ok(())
            }
        }
    }

    /// Concurrent fan-out to the constructed tiers.
    ///
    /// Succeeds when at least one of L1/L2 accepted the write; tier
    /// failures are tallied and flip availability, but do not roll back
    /// writes that already landed elsewhere.
    async fn fan_out_write(
        &self,
        key: &str,
        value: &CacheValue,
        ttl: Option<u64>,
        include_remote: bool,
    ) -> Result<()> {
        let mut writes: Vec<WriteOutcome<'_>> = Vec::new();

        if let Some(memory) = &self.memory {
            writes.push(Box::pin(async move {
                let result = self
                    .recovery
                    .execute_with_retry(TierName::Memory.as_str(), || {
                        memory.set(key, value, ttl)
                    })
                    .await;
                (TierName::Memory, result)
            }));
        }
        if let Some(sqlite) = &self.sqlite {
            writes.push(Box::pin(async move {
                let result = self
                    .recovery
                    .execute_with_retry(TierName::Persistent.as_str(), || {
                        sqlite.set(key, value, ttl)
                    })
                    .await;
                (TierName::Persistent, result)
            }));
        }
        if include_remote {
            if let Some(remote) = &self.remote {
                writes.push(Box::pin(async move {
                    // Remote sets only touch its response cache, but remote
                    // traffic stays breaker-gated.
                    let result = self.breaker.execute(|| remote.set(key, value, ttl)).await;
                    (TierName::Remote, result)
                }));
            }
        }

        if writes.is_empty() {
            return Err(CacheError::Unavailable("no tiers constructed".to_string()));
        }

        let mut mandatory_ok = false;
        let mut mandatory_seen = false;
        let mut last_error: Option<CacheError> = None;

        for (tier, result) in join_all(writes).await {
            let mandatory = matches!(tier, TierName::Memory | TierName::Persistent);
            mandatory_seen |= mandatory;
            match result {
                Ok(()) => {
                    self.stats.set_available(tier, true);
                    mandatory_ok |= mandatory;
                }
                Err(e) => {
                    self.stats.record_failed_write();
                    self.stats.set_available(tier, false);
                    self.notifier.notify(
                        Severity::Warning,
                        tier.as_str(),
                        Some(key.to_string()),
                        format!("write rejected: {e}"),
                    );
                    if mandatory {
                        last_error = Some(e);
                    }
                }
            }
        }

        if mandatory_ok || !mandatory_seen {
            Ok(())
        } else {
            Err(last_error
                .unwrap_or_else(|| CacheError::Unavailable("all cache tiers rejected the write".to_string())))
        }
    }

    /// Three-phase batch read: L1, then L2 for the misses, then the
    /// registry for what remains, promoting hits upward.
    pub async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<CacheValue>>> {
        self.ensure_live()?;
        for key in keys {
            validate_key(key)?;
        }
        self.stats.record_operation();

        let mut results: Vec<Option<CacheValue>> = vec![None; keys.len()];
        let mut missing: Vec<usize> = (0..keys.len()).collect();

        if let Some(memory) = self.memory_if_available() {
            let start = Instant::now();
            match memory.get_many(keys).await {
                Ok(values) => {
                    let mut still_missing = Vec::new();
                    for (idx, value) in values.into_iter().enumerate() {
                        match value {
                            Some(v) => {
                                self.stats.record_hit(TierName::Memory, start.elapsed());
                                results[idx] = Some(v);
                            }
                            None => still_missing.push(idx),
                        }
                    }
                    missing = still_missing;
                }
                Err(e) => self.tier_error(TierName::Memory, "mget", &e),
            }
        }

        if !missing.is_empty() {
            if let Some(sqlite) = self.sqlite_if_available() {
                let miss_keys: Vec<&str> = missing.iter().map(|&i| keys[i]).collect();
                let start = Instant::now();
                match sqlite.get_many(&miss_keys).await {
                    Ok(values) => {
                        let mut still_missing = Vec::new();
                        for (slot, value) in missing.iter().zip(values) {
                            match value {
                                Some(v) => {
                                    self.stats.record_hit(TierName::Persistent, start.elapsed());
                                    // Promote off the read path
                                    let this = self.clone();
                                    let key = keys[*slot].to_string();
                                    let promoted = v.clone();
                                    tokio::spawn(async move {
                                        this.promote_to_memory(&key, &promoted).await;
                                    });
                                    results[*slot] = Some(v);
                                }
                                None => still_missing.push(*slot),
                            }
                        }
                        missing = still_missing;
                    }
                    Err(e) => self.tier_error(TierName::Persistent, "mget", &e),
                }
            }
        }

        if !missing.is_empty() {
            if let Some(remote) = self.remote_if_available() {
                for &idx in &missing {
                    let key = keys[idx];
                    let start = Instant::now();
                    match self.breaker.execute(|| remote.fetch(key)).await {
                        Ok(Some(value)) => {
                            self.stats.record_hit(TierName::Remote, start.elapsed());
                            let this = self.clone();
                            let key = key.to_string();
                            let promoted = value.clone();
                            tokio::spawn(async move {
                                this.promote_to_sqlite(&key, &promoted).await;
                                this.promote_to_memory(&key, &promoted).await;
                            });
                            results[idx] = Some(value);
                        }
                        Ok(None) => {}
                        Err(CacheError::CircuitOpen(_)) => break,
                        Err(e) => self.remote_read_error(key, &e),
                    }
                }
            }
        }

        for result in &results {
            if result.is_none() {
                self.stats.record_miss();
            }
        }
        Ok(results)
    }

    /// Batch write mirroring the single-key strategies
    pub async fn set_many(&self, entries: &[(String, CacheValue, Option<u64>)]) -> Result<()> {
        self.ensure_live()?;
        for (key, _, _) in entries {
            validate_key(key)?;
        }
        self.stats.record_operation();

        let filled: Vec<(String, CacheValue, Option<u64>)> = entries
            .iter()
            .map(|(k, v, ttl)| (k.clone(), v.clone(), ttl.or_else(|| self.ttl_for(k))))
            .collect();

        match self.config.strategy {
            WriteStrategy::WriteBehind => {
                for (key, value, ttl) in &filled {
                    if let Some(memory) = &self.memory {
                        memory.set(key, value, *ttl).await?;
                    }
                    self.queue.push(PendingWrite {
                        key: key.clone(),
                        value: value.clone(),
                        ttl_seconds: *ttl,
                        enqueued_at: Instant::now(),
                    });
                }
                self.spawn_drain();
                Ok(())
            }
            strategy => {
                let include_remote = strategy == WriteStrategy::WriteThrough;
                self.fan_out_write_many(&filled, include_remote).await
            }
        }
    }

    async fn fan_out_write_many(
        &self,
        entries: &[(String, CacheValue, Option<u64>)],
        include_remote: bool,
    ) -> Result<()> {
        let mut writes: Vec<WriteOutcome<'_>> = Vec::new();

        if let Some(memory) = &self.memory {
            writes.push(Box::pin(async move {
                let result = self
                    .recovery
                    .execute_with_retry(TierName::Memory.as_str(), || memory.set_many(entries))
                    .await;
                (TierName::Memory, result)
            }));
        }
        if let Some(sqlite) = &self.sqlite {
            writes.push(Box::pin(async move {
                let result = self
                    .recovery
                    .execute_with_retry(TierName::Persistent.as_str(), || {
                        sqlite.set_many(entries)
                    })
                    .await;
                (TierName::Persistent, result)
            }));
        }
        if include_remote {
            if let Some(remote) = &self.remote {
                writes.push(Box::pin(async move {
                    let result = self.breaker.execute(|| remote.set_many(entries)).await;
                    (TierName::Remote, result)
                }));
            }
        }

        if writes.is_empty() {
            return Err(CacheError::Unavailable("no tiers constructed".to_string()));
        }

        let mut mandatory_ok = false;
        let mut mandatory_seen = false;
        let mut last_error: Option<CacheError> = None;
        for (tier, result) in join_all(writes).await {
            let mandatory = matches!(tier, TierName::Memory | TierName::Persistent);
            mandatory_seen |= mandatory;
            match result {
                Ok(()) => {
                    self.stats.set_available(tier, true);
                    mandatory_ok |= mandatory;
                }
                Err(e) => {
                    self.stats.record_failed_write();
                    self.stats.set_available(tier, false);
                    if mandatory {
                        last_error = Some(e);
                    }
                }
            }
        }

        if mandatory_ok || !mandatory_seen {
            Ok(())
        } else {
            Err(last_error
                .unwrap_or_else(|| CacheError::Unavailable("all cache tiers rejected the batch".to_string())))
        }
    }

    /// Presence without payload transfer; the remote check stays
    /// breaker-gated.
    pub async fn has(&self, key: &str) -> Result<bool> {
        self.ensure_live()?;
        validate_key(key)?;

        if let Some(memory) = self.memory_if_available() {
            if memory.exists(key).await.unwrap_or(false) {
                return Ok(true);
            }
        }
        if let Some(sqlite) = self.sqlite_if_available() {
            if sqlite.exists(key).await.unwrap_or(false) {
                return Ok(true);
            }
        }
        if let Some(remote) = self.remote_if_available() {
            if let Ok(found) = self
                .breaker
                .execute(|| async { Ok(remote.fetch(key).await?.is_some()) })
                .await
            {
                return Ok(found);
            }
        }
        Ok(false)
    }

    /// Delete from every constructed tier; true when any tier held the key
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_live()?;
        validate_key(key)?;
        self.stats.record_operation();

        let mut deleted = false;
        if let Some(memory) = &self.memory {
            match memory.delete(key).await {
                Ok(d) => deleted |= d,
                Err(e) => self.tier_error(TierName::Memory, key, &e),
            }
        }
        if let Some(sqlite) = &self.sqlite {
            match sqlite.delete(key).await {
                Ok(d) => deleted |= d,
                Err(e) => self.tier_error(TierName::Persistent, key, &e),
            }
        }
        if let Some(remote) = &self.remote {
            // Only the local response cache; never the remote source
            deleted |= remote.delete(key).await.unwrap_or(false);
        }
        Ok(deleted)
    }

    /// Union of keys across tiers matching a glob pattern
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.ensure_live()?;
        let mut all = std::collections::BTreeSet::new();
        if let Some(memory) = &self.memory {
            if let Ok(keys) = memory.keys(pattern).await {
                all.extend(keys);
            }
        }
        if let Some(sqlite) = &self.sqlite {
            if let Ok(keys) = sqlite.keys(pattern).await {
                all.extend(keys);
            }
        }
        if let Some(remote) = &self.remote {
            if let Ok(keys) = remote.keys(pattern).await {
                all.extend(keys);
            }
        }
        Ok(all.into_iter().collect())
    }

    /// Entry count; the persistent tier is authoritative when present
    pub async fn len(&self) -> Result<usize> {
        self.ensure_live()?;
        if let Some(sqlite) = &self.sqlite {
            return sqlite.len().await;
        }
        if let Some(memory) = &self.memory {
            return memory.len().await;
        }
        match &self.remote {
            Some(remote) => remote.len().await,
            None => Ok(0),
        }
    }

    /// Per-entry accounting from the nearest tier that has the key
    pub async fn get_metadata(&self, key: &str) -> Result<Option<EntryMetadata>> {
        self.ensure_live()?;
        validate_key(key)?;
        if let Some(memory) = &self.memory {
            if let Some(meta) = memory.get_metadata(key).await? {
                return Ok(Some(meta));
            }
        }
        if let Some(sqlite) = &self.sqlite {
            if let Some(meta) = sqlite.get_metadata(key).await? {
                return Ok(Some(meta));
            }
        }
        match &self.remote {
            Some(remote) => remote.get_metadata(key).await,
            None => Ok(None),
        }
    }

    /// Clear every tier and the write-behind queue
    pub async fn clear(&self) -> Result<()> {
        self.ensure_live()?;
        self.queue.clear();
        if let Some(memory) = &self.memory {
            memory.clear().await?;
        }
        if let Some(sqlite) = &self.sqlite {
            sqlite.clear().await?;
        }
        if let Some(remote) = &self.remote {
            remote.clear().await?;
        }
        Ok(())
    }

    /// Aggregate statistics snapshot
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.breaker.status())
    }

    pub fn breaker_status(&self) -> BreakerStatus {
        self.breaker.status()
    }

    pub fn open_breaker(&self) {
        self.breaker.force_open();
    }

    pub fn close_breaker(&self) {
        self.breaker.force_close();
    }

    pub(crate) fn sqlite_tier(&self) -> Option<&SqliteTier> {
        self.sqlite.as_ref()
    }

    pub(crate) fn memory_tier(&self) -> Option<&MemoryTier> {
        self.memory.as_ref()
    }

    /// Pending write-behind entries
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    fn spawn_drain(&self) {
        if !self.queue.try_begin_drain() {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.drain_loop().await;
        });
    }

    /// Single-flight drainer: batches of `batch_size` with per-item
    /// isolation, yielding briefly between batches.
    async fn drain_loop(&self) {
        let batch_size = self.config.performance.batch_size.max(1);
        let pause = Duration::from_millis(self.config.performance.flush_interval_ms);
        loop {
            let batch = self.queue.pop_batch(batch_size);
            if batch.is_empty() {
                self.queue.end_drain();
                // An enqueue may have raced the empty check
                if self.queue.is_empty() || !self.queue.try_begin_drain() {
                    return;
                }
                continue;
            }
            let flushes: Vec<_> = batch
                .into_iter()
                .map(|write| self.flush_pending(write))
                .collect();
            join_all(flushes).await;
            tokio::time::sleep(pause).await;
        }
    }

    async fn flush_pending(&self, write: PendingWrite) {
        let Some(sqlite) = &self.sqlite else { return };
        let lag = write.enqueued_at.elapsed();
        let result = self
            .recovery
            .execute_with_retry(TierName::Persistent.as_str(), || {
                sqlite.set(&write.key, &write.value, write.ttl_seconds)
            })
            .await;
        match result {
            Ok(()) => {
                self.stats.set_available(TierName::Persistent, true);
                tracing::trace!(key = %write.key, lag_ms = lag.as_millis() as u64, "flushed");
            }
            Err(e) => {
                self.stats.record_failed_write();
                self.stats.set_available(TierName::Persistent, false);
                self.notifier.notify(
                    Severity::Warning,
                    TierName::Persistent.as_str(),
                    Some(write.key.clone()),
                    format!("write-behind flush failed: {e}"),
                );
            }
        }
    }

    /// Idempotent teardown: waits for the drainer to go idle, then
    /// disposes each tier best-effort and clears the queue.
    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for _ in 0..DISPOSE_POLLS {
            if self.queue.is_idle() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if let Some(memory) = &self.memory {
            if let Err(e) = memory.dispose().await {
                tracing::warn!(error = %e, "memory tier dispose failed");
            }
        }
        if let Some(sqlite) = &self.sqlite {
            // The pool is externally managed and stays open
            if let Err(e) = sqlite.dispose().await {
                tracing::warn!(error = %e, "persistent tier dispose failed");
            }
        }
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.dispose().await {
                tracing::warn!(error = %e, "remote tier dispose failed");
            }
        }

        self.queue.clear();
        Ok(())
    }
}
