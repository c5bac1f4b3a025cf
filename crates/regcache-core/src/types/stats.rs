//! Tier statistics and circuit breaker status types

use serde::{Deserialize, Serialize};

/// The three tiers of the hybrid cache, nearest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierName {
    /// Volatile in-memory tier (L1)
    Memory,
    /// Persistent embedded-SQL tier (L2)
    Persistent,
    /// Remote registry (L3)
    Remote,
}

impl TierName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierName::Memory => "memory",
            TierName::Persistent => "persistent",
            TierName::Remote => "remote",
        }
    }
}

impl std::fmt::Display for TierName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerTier<T> {
    pub memory: T,
    pub persistent: T,
    pub remote: T,
}

impl<T> PerTier<T> {
    pub fn get(&self, tier: TierName) -> &T {
        match tier {
            TierName::Memory => &self.memory,
            TierName::Persistent => &self.persistent,
            TierName::Remote => &self.remote,
        }
    }

    pub fn get_mut(&mut self, tier: TierName) -> &mut T {
        match tier {
            TierName::Memory => &mut self.memory,
            TierName::Persistent => &mut self.persistent,
            TierName::Remote => &mut self.remote,
        }
    }
}

/// Circuit breaker state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// Point-in-time circuit breaker snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub state: BreakerState,
    pub failure_count: u32,
    pub is_request_allowed: bool,
    /// Seconds since the last recorded failure, if any
    pub seconds_since_failure: Option<u64>,
}

impl BreakerStatus {
    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }
}

/// Aggregate statistics reported by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Hit counts per tier
    pub hits: PerTier<u64>,
    /// Misses across the whole chain
    pub misses: u64,
    /// Average response time per tier over the last <=100 samples, in ms
    pub avg_response_ms: PerTier<f64>,
    /// Number of response-time samples currently retained per tier
    pub response_samples: PerTier<usize>,
    /// Per-tier availability flags
    pub availability: PerTier<bool>,
    /// Circuit breaker snapshot for the remote tier
    pub breaker: BreakerStatus,
    /// Writes that failed on at least one tier
    pub failed_writes: u64,
    /// Total operations served
    pub total_operations: u64,
}

impl CacheStats {
    /// Total hits across tiers
    pub fn total_hits(&self) -> u64 {
        self.hits.memory + self.hits.persistent + self.hits.remote
    }

    /// Hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.total_hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.total_hits() as f64 / total as f64
        }
    }
}
