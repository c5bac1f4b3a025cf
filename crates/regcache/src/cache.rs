//! Public cache handle
//!
//! [`HybridCache`] is the surface the embedding application talks to:
//! explicit `initialize`/`dispose` lifecycle, reads through the
//! orchestrator (plus the fallback chain when recovery is on), and the
//! management operations for the breaker, recovery state and
//! notifications.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePool;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use regcache_core::{
    BreakerStatus, CacheConfig, CacheStats, CacheTier, CacheValue, EntryMetadata, Lookup,
    RecoveryConfig, RegistryClient, Result, TierName,
};
use regcache_storage::SqliteTier;

use crate::hybrid::HybridOrchestrator;
use crate::recovery::{
    DegradationNotifier, DegradationSummary, ErrorSummary, FallbackChain, FallbackOptions,
    FallbackTier, NotificationEvent, RecoveryManager,
};

/// Persistent tier handle whose chain reads keep expired rows in place,
/// so the stale step that follows can still serve them.
struct FreshSqlite {
    tier: SqliteTier,
}

#[async_trait]
impl CacheTier for FreshSqlite {
    fn tier(&self) -> TierName {
        TierName::Persistent
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        self.tier.get_fresh(key).await
    }

    async fn get_stale(&self, key: &str) -> Result<Option<(CacheValue, u64)>> {
        self.tier.get_stale(key).await
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<u64>) -> Result<()> {
        self.tier.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.tier.delete(key).await
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<CacheValue>>> {
        self.tier.get_many(keys).await
    }

    async fn set_many(&self, entries: &[(String, CacheValue, Option<u64>)]) -> Result<()> {
        self.tier.set_many(entries).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.tier.keys(pattern).await
    }

    async fn len(&self) -> Result<usize> {
        self.tier.len().await
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<EntryMetadata>> {
        self.tier.get_metadata(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.tier.clear().await
    }
}

/// Snapshot of the recovery layer
#[derive(Debug, Clone)]
pub struct RecoveryStatus {
    pub enabled: bool,
    pub breakers: BTreeMap<String, BreakerStatus>,
    pub queue_depth: usize,
}

/// The hybrid multi-tier cache.
///
/// Created with [`HybridCache::initialize`]; all operations fail fast with
/// `Disposed` after [`HybridCache::dispose`]. The embedding program owns
/// the handle; the library keeps no global state.
pub struct HybridCache {
    orchestrator: HybridOrchestrator,
    recovery: Arc<RecoveryManager>,
    chain: Option<FallbackChain>,
    notifier: DegradationNotifier,
    config: CacheConfig,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl HybridCache {
    /// Construct the configured tiers and background tasks.
    ///
    /// `client` provides the remote registry; without it (or outside the
    /// hybrid storage kind) the cache runs on local tiers only. `pool`
    /// supplies an externally managed database handle; when absent the
    /// configured path is opened.
    pub async fn initialize(
        config: CacheConfig,
        client: Option<Arc<dyn RegistryClient>>,
        pool: Option<SqlitePool>,
    ) -> Result<Self> {
        let notifier = DegradationNotifier::new(config.recovery.notifications.clone());

        // A disabled breaker still exists but can never trip on its own
        let mut breaker_config = config.breaker.clone();
        if !breaker_config.enabled {
            breaker_config.failure_threshold = u32::MAX;
        }
        let recovery = Arc::new(RecoveryManager::new(
            config.recovery.clone(),
            breaker_config,
            notifier.clone(),
        ));
        let breaker = recovery.breaker(TierName::Remote.as_str());

        let orchestrator = HybridOrchestrator::new(
            config.clone(),
            client,
            pool,
            breaker.clone(),
            notifier.clone(),
            recovery.clone(),
        )
        .await;

        // The chain is the local degraded sweep: stale/partial acceptance
        // over the cache tiers with per-call deadlines. Remote traffic is
        // not registered here; the orchestrator's direct path already
        // engages the registry under the breaker, and a second attempt
        // per read would double the breaker's failure accounting.
        let chain = if config.recovery.enabled && config.recovery.fallback.enabled {
            let mut chain = FallbackChain::new(notifier.clone());
            if let Some(memory) = orchestrator.memory_tier() {
                chain.register(FallbackTier {
                    name: TierName::Memory.as_str().to_string(),
                    provider: Arc::new(memory.clone()),
                    priority: 10,
                    allow_stale: false,
                    allow_partial: false,
                });
            }
            if let Some(sqlite) = orchestrator.sqlite_tier() {
                chain.register(FallbackTier {
                    name: TierName::Persistent.as_str().to_string(),
                    provider: Arc::new(FreshSqlite { tier: sqlite.clone() }),
                    priority: 20,
                    allow_stale: true,
                    allow_partial: true,
                });
            }
            (!chain.is_empty()).then_some(chain)
        } else {
            None
        };

        let cache = Self {
            orchestrator,
            recovery,
            chain,
            notifier,
            config,
            maintenance: Mutex::new(None),
        };
        cache.spawn_maintenance();
        Ok(cache)
    }

    fn spawn_maintenance(&self) {
        let interval_seconds = self.config.storage.sqlite.vacuum_interval_seconds;
        if interval_seconds == 0 || self.orchestrator.sqlite_tier().is_none() {
            return;
        }
        let orchestrator = self.orchestrator.clone();
        let interval = Duration::from_secs(interval_seconds);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(sqlite) = orchestrator.sqlite_tier() else { break };
                match sqlite.needs_maintenance().await {
                    Ok(true) => match sqlite.perform_maintenance().await {
                        Ok(report) => {
                            tracing::info!(
                                expired = report.expired_cleaned,
                                evicted = report.items_evicted,
                                size = report.final_size,
                                "periodic maintenance"
                            );
                        }
                        Err(e) => tracing::warn!(error = %e, "maintenance pass failed"),
                    },
                    Ok(false) => {}
                    Err(e) => tracing::warn!(error = %e, "maintenance check failed"),
                }
            }
        });
        *self.maintenance.lock() = Some(handle);
    }

    /// Read a value.
    ///
    /// Goes through the direct orchestrator path (promotion, breaker,
    /// stale fallback); when that misses and recovery is enabled, the
    /// fallback chain makes a second, policy-driven sweep with per-tier
    /// timeouts and stale/partial acceptance.
    pub async fn get(&self, key: &str) -> Result<Lookup> {
        let direct = self.orchestrator.get(key).await?;
        if direct.is_usable() {
            return Ok(direct);
        }
        if let Some(chain) = &self.chain {
            let options = FallbackOptions::from(&self.config.recovery.fallback);
            let result = chain.get_with_fallback(key, &options).await;
            if result.is_usable() {
                return Ok(result);
            }
        }
        Ok(Lookup::Miss)
    }

    /// Write a value with an optional TTL override (seconds)
    pub async fn set(&self, key: &str, value: &CacheValue, ttl_seconds: Option<u64>) -> Result<()> {
        self.orchestrator.set(key, value, ttl_seconds).await
    }

    /// Presence check without payload transfer
    pub async fn has(&self, key: &str) -> Result<bool> {
        self.orchestrator.has(key).await
    }

    /// Delete from every tier
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.orchestrator.delete(key).await
    }

    /// Clear every tier and the write-behind queue
    pub async fn clear(&self) -> Result<()> {
        self.orchestrator.clear().await
    }

    /// Batch read; results align with the input keys
    pub async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<CacheValue>>> {
        self.orchestrator.get_many(keys).await
    }

    /// Batch write mirroring the configured strategy
    pub async fn set_many(&self, entries: &[(String, CacheValue, Option<u64>)]) -> Result<()> {
        self.orchestrator.set_many(entries).await
    }

    /// Per-entry accounting metadata from the nearest tier holding the key
    pub async fn get_metadata(&self, key: &str) -> Result<Option<EntryMetadata>> {
        self.orchestrator.get_metadata(key).await
    }

    /// Keys matching a glob pattern, across all tiers
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.orchestrator.keys(pattern).await
    }

    /// Entry count (persistent tier is authoritative when present)
    pub async fn len(&self) -> Result<usize> {
        self.orchestrator.len().await
    }

    /// Aggregate statistics
    pub fn stats(&self) -> CacheStats {
        self.orchestrator.stats()
    }

    /// Remote-tier circuit breaker snapshot
    pub fn breaker_status(&self) -> BreakerStatus {
        self.orchestrator.breaker_status()
    }

    /// Manually open the remote breaker; masks all traffic until closed
    pub fn open_breaker(&self) {
        self.orchestrator.open_breaker();
    }

    /// Clear a manual open and reset the breaker
    pub fn close_breaker(&self) {
        self.orchestrator.close_breaker();
    }

    /// Snapshot of the recovery layer
    pub fn recovery_status(&self) -> RecoveryStatus {
        RecoveryStatus {
            enabled: self.recovery.is_enabled(),
            breakers: self.recovery.status_all(),
            queue_depth: self.orchestrator.queue_depth(),
        }
    }

    /// Recent error history aggregates
    pub fn recovery_stats(&self) -> ErrorSummary {
        self.recovery.error_summary(50)
    }

    /// Reset breakers and error history
    pub fn reset_recovery(&self) {
        self.recovery.reset_all();
        self.recovery.clear_error_history();
    }

    /// Replace the recovery configuration at runtime
    pub fn update_recovery_config(&self, config: RecoveryConfig) {
        self.recovery.update_config(config);
    }

    /// Subscribe to degraded-operation events; drop the receiver to
    /// unsubscribe
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.notifier.subscribe()
    }

    /// Summarize degradation events over the trailing window
    pub fn degradation_summary(&self, window: Duration) -> DegradationSummary {
        self.notifier.degradation_summary(window)
    }

    /// Idempotent teardown: stops background tasks, waits for the
    /// write-behind drainer, disposes tiers best-effort.
    pub async fn dispose(&self) -> Result<()> {
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
        self.orchestrator.dispose().await
    }
}
