//! Shared statistics for the orchestrator

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use regcache_core::{BreakerStatus, CacheStats, PerTier, TierName};

/// Bounded ring of response-time samples, per tier
const MAX_SAMPLES: usize = 100;

#[derive(Default)]
struct StatsInner {
    hits: PerTier<u64>,
    misses: u64,
    failed_writes: u64,
    total_operations: u64,
    samples: PerTier<VecDeque<f64>>,
}

/// Hit/miss counters, response-time rings and availability flags.
///
/// Mutations take a short lock; readers may observe slightly stale counts.
pub(crate) struct StatsRecorder {
    inner: Mutex<StatsInner>,
    memory_available: AtomicBool,
    persistent_available: AtomicBool,
    remote_available: AtomicBool,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatsInner::default()),
            memory_available: AtomicBool::new(true),
            persistent_available: AtomicBool::new(true),
            remote_available: AtomicBool::new(true),
        }
    }

    fn flag(&self, tier: TierName) -> &AtomicBool {
        match tier {
            TierName::Memory => &self.memory_available,
            TierName::Persistent => &self.persistent_available,
            TierName::Remote => &self.remote_available,
        }
    }

    pub fn is_available(&self, tier: TierName) -> bool {
        self.flag(tier).load(Ordering::Relaxed)
    }

    pub fn set_available(&self, tier: TierName, available: bool) {
        let was = self.flag(tier).swap(available, Ordering::Relaxed);
        if was != available {
            if available {
                tracing::info!(tier = %tier, "tier recovered");
            } else {
                tracing::warn!(tier = %tier, "tier marked unavailable");
            }
        }
    }

    pub fn record_operation(&self) {
        self.inner.lock().total_operations += 1;
    }

    pub fn record_hit(&self, tier: TierName, elapsed: Duration) {
        let mut inner = self.inner.lock();
        *inner.hits.get_mut(tier) += 1;
        let ring = inner.samples.get_mut(tier);
        if ring.len() >= MAX_SAMPLES {
            ring.pop_front();
        }
        ring.push_back(elapsed.as_secs_f64() * 1_000.0);
    }

    pub fn record_miss(&self) {
        self.inner.lock().misses += 1;
    }

    pub fn record_failed_write(&self) {
        self.inner.lock().failed_writes += 1;
    }

    pub fn snapshot(&self, breaker: BreakerStatus) -> CacheStats {
        let inner = self.inner.lock();
        let avg = |ring: &VecDeque<f64>| {
            if ring.is_empty() {
                0.0
            } else {
                ring.iter().sum::<f64>() / ring.len() as f64
            }
        };
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            avg_response_ms: PerTier {
                memory: avg(&inner.samples.memory),
                persistent: avg(&inner.samples.persistent),
                remote: avg(&inner.samples.remote),
            },
            response_samples: PerTier {
                memory: inner.samples.memory.len(),
                persistent: inner.samples.persistent.len(),
                remote: inner.samples.remote.len(),
            },
            availability: PerTier {
                memory: self.is_available(TierName::Memory),
                persistent: self.is_available(TierName::Persistent),
                remote: self.is_available(TierName::Remote),
            },
            breaker,
            failed_writes: inner.failed_writes,
            total_operations: inner.total_operations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regcache_core::BreakerState;

    fn closed_breaker() -> BreakerStatus {
        BreakerStatus {
            state: BreakerState::Closed,
            failure_count: 0,
            is_request_allowed: true,
            seconds_since_failure: None,
        }
    }

    #[test]
    fn test_hit_and_miss_counts() {
        let stats = StatsRecorder::new();
        stats.record_hit(TierName::Memory, Duration::from_micros(100));
        stats.record_hit(TierName::Persistent, Duration::from_millis(2));
        stats.record_miss();

        let snap = stats.snapshot(closed_breaker());
        assert_eq!(snap.hits.memory, 1);
        assert_eq!(snap.hits.persistent, 1);
        assert_eq!(snap.misses, 1);
        assert!(snap.avg_response_ms.persistent >= 2.0);
    }

    #[test]
    fn test_sample_ring_is_bounded() {
        let stats = StatsRecorder::new();
        for _ in 0..250 {
            stats.record_hit(TierName::Memory, Duration::from_micros(50));
        }
        let snap = stats.snapshot(closed_breaker());
        assert_eq!(snap.response_samples.memory, MAX_SAMPLES);
        assert_eq!(snap.hits.memory, 250);
    }

    #[test]
    fn test_availability_flags() {
        let stats = StatsRecorder::new();
        assert!(stats.is_available(TierName::Persistent));
        stats.set_available(TierName::Persistent, false);
        assert!(!stats.is_available(TierName::Persistent));
        let snap = stats.snapshot(closed_breaker());
        assert!(!snap.availability.persistent);
        assert!(snap.availability.memory);

        stats.set_available(TierName::Persistent, true);
        assert!(stats.is_available(TierName::Persistent));
    }
}
