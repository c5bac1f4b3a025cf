//! Typed cache configuration
//!
//! The merged configuration is a strongly typed record with defaults.
//! Sources (environment, file, programmatic overrides) produce
//! [`ConfigDelta`] values; [`CacheConfig::merged`] applies them by
//! ascending priority.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::key::KeyKind;

/// Which tiers are constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    /// Memory + sqlite + remote
    Hybrid,
    /// Memory tier only
    MemoryOnly,
    /// Sqlite tier only
    SqliteOnly,
}

/// Orchestrator write mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteStrategy {
    ReadThrough,
    WriteThrough,
    WriteBehind,
    CacheAside,
}

impl WriteStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteStrategy::ReadThrough => "read-through",
            WriteStrategy::WriteThrough => "write-through",
            WriteStrategy::WriteBehind => "write-behind",
            WriteStrategy::CacheAside => "cache-aside",
        }
    }
}

impl std::str::FromStr for WriteStrategy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read-through" => Ok(WriteStrategy::ReadThrough),
            "write-through" => Ok(WriteStrategy::WriteThrough),
            "write-behind" => Ok(WriteStrategy::WriteBehind),
            "cache-aside" => Ok(WriteStrategy::CacheAside),
            other => Err(CacheError::Config(format!("unknown cache strategy: {other}"))),
        }
    }
}

/// L1 policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryTierConfig {
    pub enabled: bool,
    /// Hard cap on total stored bytes; writes past it are refused
    pub max_bytes: u64,
    /// Default TTL in seconds applied when a set carries none
    pub ttl_seconds: u64,
    /// Verbose per-operation logging
    pub debug: bool,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: 50 * 1024 * 1024,
            ttl_seconds: 3600,
            debug: false,
        }
    }
}

/// L2 policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteTierConfig {
    pub enabled: bool,
    /// Database file path; `:memory:` for tests
    pub path: String,
    /// Size cap enforced by LRU eviction during maintenance
    pub max_bytes: u64,
    pub busy_timeout_ms: u64,
    /// Period of the background maintenance task, in seconds
    pub vacuum_interval_seconds: u64,
    pub enable_wal: bool,
}

impl Default for SqliteTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "regcache.db".to_string(),
            max_bytes: 500 * 1024 * 1024,
            busy_timeout_ms: 5_000,
            vacuum_interval_seconds: 3_600,
            enable_wal: true,
        }
    }
}

/// L3 adapter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryTierConfig {
    pub enabled: bool,
    pub token: Option<String>,
    pub base_url: String,
    pub timeout_ms: u64,
    pub retries: u32,
    pub user_agent: String,
    /// TTL of the in-process response cache, in seconds
    pub response_cache_ttl_seconds: u64,
    /// Entry cap of the in-process response cache
    pub response_cache_max: usize,
}

impl Default for RegistryTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: None,
            base_url: "https://api.github.com".to_string(),
            timeout_ms: 30_000,
            retries: 3,
            user_agent: "regcache".to_string(),
            response_cache_ttl_seconds: 300,
            response_cache_max: 256,
        }
    }
}

/// Tier construction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    pub kind: StorageKind,
    pub memory: MemoryTierConfig,
    pub sqlite: SqliteTierConfig,
    pub registry: RegistryTierConfig,
}

impl Default for StorageKind {
    fn default() -> Self {
        StorageKind::Hybrid
    }
}

/// Default TTLs per key kind, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlConfig {
    pub components: u64,
    pub blocks: u64,
    pub metadata: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            components: 7 * 24 * 3600,
            blocks: 7 * 24 * 3600,
            metadata: 3600,
        }
    }
}

impl TtlConfig {
    /// TTL for a key kind
    pub fn for_kind(&self, kind: KeyKind) -> u64 {
        match kind {
            KeyKind::Component => self.components,
            KeyKind::Block => self.blocks,
            KeyKind::Metadata | KeyKind::Directory | KeyKind::Other => self.metadata,
        }
    }
}

/// Circuit breaker policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub enabled: bool,
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe, in ms
    pub open_timeout_ms: u64,
    /// Consecutive probe successes required to close
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            open_timeout_ms: 60_000,
            success_threshold: 2,
        }
    }
}

/// Retry policy for one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Base backoff for a 1-indexed attempt, before jitter
    pub fn backoff_for_attempt(&self, attempt: u32) -> u64 {
        let exp = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = (self.backoff_ms as f64 * exp) as u64;
        delay.min(self.max_backoff_ms)
    }
}

/// Fallback chain policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub enabled: bool,
    /// Per-tier call deadline, in ms
    pub timeout_ms: u64,
    pub allow_stale: bool,
    /// Oldest acceptable stale value, in seconds
    pub max_stale_age_seconds: u64,
    pub partial_acceptable: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 5_000,
            allow_stale: true,
            max_stale_age_seconds: 24 * 3600,
            partial_acceptable: false,
        }
    }
}

/// Degradation notification retention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub retention_ms: u64,
    pub max_notifications: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_ms: 3_600_000,
            max_notifications: 500,
        }
    }
}

/// Retry + fallback policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub enabled: bool,
    /// Default retry policy
    pub retry: RetryPolicy,
    /// Per-tier overrides keyed by tier name
    pub tiers: BTreeMap<String, RetryPolicy>,
    pub fallback: FallbackConfig,
    pub notifications: NotificationConfig,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry: RetryPolicy::default(),
            tiers: BTreeMap::new(),
            fallback: FallbackConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl RecoveryConfig {
    /// Effective retry policy for a tier
    pub fn policy_for(&self, tier: &str) -> RetryPolicy {
        self.tiers.get(tier).cloned().unwrap_or_else(|| self.retry.clone())
    }
}

/// Write-behind tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Entries drained per batch
    pub batch_size: usize,
    /// Fan-out width inside a batch
    pub concurrency: usize,
    /// Advisory queue depth before warnings are emitted
    pub queue_size: usize,
    /// Pause between drained batches, in ms
    pub flush_interval_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 10,
            queue_size: 1_000,
            flush_interval_ms: 10,
        }
    }
}

/// Full merged cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    pub storage: StorageConfig,
    pub strategy: WriteStrategy,
    pub ttl: TtlConfig,
    pub breaker: BreakerConfig,
    pub recovery: RecoveryConfig,
    pub performance: PerformanceConfig,
}

impl Default for WriteStrategy {
    fn default() -> Self {
        WriteStrategy::ReadThrough
    }
}

impl CacheConfig {
    /// Apply deltas in ascending priority order over the defaults
    pub fn merged(deltas: Vec<ConfigDelta>) -> Result<Self> {
        let mut config = Self::default();
        let mut deltas = deltas;
        deltas.sort_by_key(|d| d.priority);
        for delta in deltas {
            delta.apply(&mut config)?;
        }
        Ok(config)
    }
}

/// Partial configuration produced by one source.
///
/// Unset fields leave the merged value untouched. Size fields accept
/// human-readable values (`"50MB"`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigDelta {
    /// Lower priorities apply first
    #[serde(default)]
    pub priority: i32,
    pub storage_kind: Option<StorageKind>,
    pub strategy: Option<WriteStrategy>,
    pub memory_enabled: Option<bool>,
    pub memory_max_size: Option<String>,
    pub memory_ttl_seconds: Option<u64>,
    pub sqlite_enabled: Option<bool>,
    pub sqlite_path: Option<String>,
    pub sqlite_max_size: Option<String>,
    pub sqlite_enable_wal: Option<bool>,
    pub registry_enabled: Option<bool>,
    pub registry_token: Option<String>,
    pub registry_base_url: Option<String>,
    pub registry_timeout_ms: Option<u64>,
    pub ttl_components: Option<u64>,
    pub ttl_blocks: Option<u64>,
    pub ttl_metadata: Option<u64>,
    pub breaker_enabled: Option<bool>,
    pub breaker_failure_threshold: Option<u32>,
    pub breaker_open_timeout_ms: Option<u64>,
    pub breaker_success_threshold: Option<u32>,
    pub recovery_enabled: Option<bool>,
    pub recovery_max_retries: Option<u32>,
    pub recovery_backoff_ms: Option<u64>,
    pub recovery_backoff_multiplier: Option<f64>,
    pub recovery_max_backoff_ms: Option<u64>,
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub queue_size: Option<usize>,
    pub flush_interval_ms: Option<u64>,
}

macro_rules! apply_field {
    ($delta:expr, $target:expr) => {
        if let Some(v) = $delta.clone() {
            $target = v;
        }
    };
}

impl ConfigDelta {
    /// Apply this delta on top of `config`
    pub fn apply(&self, config: &mut CacheConfig) -> Result<()> {
        apply_field!(self.storage_kind, config.storage.kind);
        apply_field!(self.strategy, config.strategy);

        apply_field!(self.memory_enabled, config.storage.memory.enabled);
        if let Some(size) = &self.memory_max_size {
            config.storage.memory.max_bytes = parse_size(size)?;
        }
        apply_field!(self.memory_ttl_seconds, config.storage.memory.ttl_seconds);

        apply_field!(self.sqlite_enabled, config.storage.sqlite.enabled);
        apply_field!(self.sqlite_path, config.storage.sqlite.path);
        if let Some(size) = &self.sqlite_max_size {
            config.storage.sqlite.max_bytes = parse_size(size)?;
        }
        apply_field!(self.sqlite_enable_wal, config.storage.sqlite.enable_wal);

        apply_field!(self.registry_enabled, config.storage.registry.enabled);
        if self.registry_token.is_some() {
            config.storage.registry.token = self.registry_token.clone();
        }
        apply_field!(self.registry_base_url, config.storage.registry.base_url);
        apply_field!(self.registry_timeout_ms, config.storage.registry.timeout_ms);

        apply_field!(self.ttl_components, config.ttl.components);
        apply_field!(self.ttl_blocks, config.ttl.blocks);
        apply_field!(self.ttl_metadata, config.ttl.metadata);

        apply_field!(self.breaker_enabled, config.breaker.enabled);
        apply_field!(self.breaker_failure_threshold, config.breaker.failure_threshold);
        apply_field!(self.breaker_open_timeout_ms, config.breaker.open_timeout_ms);
        apply_field!(self.breaker_success_threshold, config.breaker.success_threshold);

        apply_field!(self.recovery_enabled, config.recovery.enabled);
        apply_field!(self.recovery_max_retries, config.recovery.retry.max_retries);
        apply_field!(self.recovery_backoff_ms, config.recovery.retry.backoff_ms);
        apply_field!(self.recovery_backoff_multiplier, config.recovery.retry.backoff_multiplier);
        apply_field!(self.recovery_max_backoff_ms, config.recovery.retry.max_backoff_ms);

        apply_field!(self.batch_size, config.performance.batch_size);
        apply_field!(self.concurrency, config.performance.concurrency);
        apply_field!(self.queue_size, config.performance.queue_size);
        apply_field!(self.flush_interval_ms, config.performance.flush_interval_ms);

        Ok(())
    }
}

/// Parse a human-readable size: `N(B|KB|MB|GB)`, case-insensitive,
/// 1024-based. A bare integer is bytes.
pub fn parse_size(input: &str) -> Result<u64> {
    let s = input.trim();
    if s.is_empty() {
        return Err(CacheError::Config("empty size".to_string()));
    }

    let upper = s.to_ascii_uppercase();
    let (digits, multiplier) = if let Some(d) = upper.strip_suffix("GB") {
        (d, 1024u64 * 1024 * 1024)
    } else if let Some(d) = upper.strip_suffix("MB") {
        (d, 1024u64 * 1024)
    } else if let Some(d) = upper.strip_suffix("KB") {
        (d, 1024u64)
    } else if let Some(d) = upper.strip_suffix('B') {
        (d, 1u64)
    } else {
        (upper.as_str(), 1u64)
    };

    let digits = digits.trim();
    let value: u64 = digits
        .parse()
        .map_err(|_| CacheError::Config(format!("invalid size: {input}")))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| CacheError::Config(format!("size overflows: {input}")))
}
