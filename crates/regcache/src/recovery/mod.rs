//! Failure-recovery layer: retries, per-tier breakers, error history

mod fallback;
mod notify;

pub use fallback::{FallbackChain, FallbackOptions, FallbackTier};
pub use notify::{DegradationNotifier, DegradationSummary, NotificationEvent, Severity};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::time::{Duration, SystemTime};

use regcache_storage::CircuitBreaker;

use regcache_core::{BreakerConfig, BreakerStatus, CacheError, RecoveryConfig, Result};

/// Bounded ring of observed errors
const HISTORY_CAP: usize = 200;

/// One observed error, as retained in the history ring
#[derive(Debug, Clone)]
pub struct RecordedError {
    pub tier: String,
    pub kind: &'static str,
    pub message: String,
    pub at: SystemTime,
}

/// Aggregated view over the error history
#[derive(Debug, Clone, Default)]
pub struct ErrorSummary {
    pub recent: Vec<RecordedError>,
    pub count_by_tier: BTreeMap<String, usize>,
    pub count_by_kind: BTreeMap<String, usize>,
}

/// Wraps operations in per-tier retry policies and owns one circuit
/// breaker per tier name.
pub struct RecoveryManager {
    config: RwLock<RecoveryConfig>,
    breaker_config: BreakerConfig,
    breakers: DashMap<String, CircuitBreaker>,
    history: Mutex<VecDeque<RecordedError>>,
    notifier: DegradationNotifier,
}

impl RecoveryManager {
    pub fn new(
        config: RecoveryConfig,
        breaker_config: BreakerConfig,
        notifier: DegradationNotifier,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            breaker_config,
            breakers: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            notifier,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.read().enabled
    }

    pub fn config(&self) -> RecoveryConfig {
        self.config.read().clone()
    }

    /// Replace the recovery configuration at runtime
    pub fn update_config(&self, config: RecoveryConfig) {
        *self.config.write() = config;
        self.notifier.notify(
            Severity::Info,
            "recovery",
            None,
            "recovery configuration updated",
        );
    }

    /// Handle to the breaker for a tier name, creating it on first use
    pub fn breaker(&self, tier: &str) -> CircuitBreaker {
        self.breakers
            .entry(tier.to_string())
            .or_insert_with(|| CircuitBreaker::new(&self.breaker_config))
            .clone()
    }

    /// Run `op`, retrying transient failures per the tier's policy.
    ///
    /// Backoff for attempt `i` is `min(max, base * multiplier^(i-1))`
    /// plus up to 20% jitter. Non-retryable errors surface immediately;
    /// after exhaustion the last error is returned.
    pub async fn execute_with_retry<T, F, Fut>(&self, tier: &str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (enabled, policy) = {
            let config = self.config.read();
            (config.enabled, config.policy_for(tier))
        };

        let max_attempts = if enabled { policy.max_retries + 1 } else { 1 };
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    self.record_error(tier, &e);
                    if !e.is_retryable() || attempt >= max_attempts {
                        return Err(e);
                    }
                    let delay = jittered(policy.backoff_for_attempt(attempt));
                    tracing::debug!(
                        tier,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Append an error to the bounded history ring
    pub fn record_error(&self, tier: &str, error: &CacheError) {
        let mut history = self.history.lock();
        history.push_back(RecordedError {
            tier: tier.to_string(),
            kind: error.kind(),
            message: error.to_string(),
            at: SystemTime::now(),
        });
        while history.len() > HISTORY_CAP {
            history.pop_front();
        }
    }

    /// Summary over the latest `n` recorded errors
    pub fn error_summary(&self, n: usize) -> ErrorSummary {
        let history = self.history.lock();
        let recent: Vec<RecordedError> =
            history.iter().rev().take(n).rev().cloned().collect();

        let mut count_by_tier: BTreeMap<String, usize> = BTreeMap::new();
        let mut count_by_kind: BTreeMap<String, usize> = BTreeMap::new();
        for error in history.iter() {
            *count_by_tier.entry(error.tier.clone()).or_default() += 1;
            *count_by_kind.entry(error.kind.to_string()).or_default() += 1;
        }

        ErrorSummary { recent, count_by_tier, count_by_kind }
    }

    pub fn clear_error_history(&self) {
        self.history.lock().clear();
    }

    /// Reset every breaker to CLOSED
    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.value().reset();
        }
    }

    /// Status snapshot per tier name
    pub fn status_all(&self) -> BTreeMap<String, BreakerStatus> {
        self.breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().status()))
            .collect()
    }
}

fn jittered(base_ms: u64) -> Duration {
    let jitter = (base_ms as f64 * 0.2 * rand::random::<f64>()) as u64;
    Duration::from_millis(base_ms + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use regcache_core::{NotificationConfig, RetryPolicy};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn manager(policy: RetryPolicy) -> RecoveryManager {
        let config = RecoveryConfig {
            enabled: true,
            retry: policy,
            ..Default::default()
        };
        RecoveryManager::new(
            config,
            BreakerConfig::default(),
            DegradationNotifier::new(NotificationConfig::default()),
        )
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_ms: 1,
            backoff_multiplier: 2.0,
            max_backoff_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let manager = manager(fast_policy(3));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();

        let result = manager
            .execute_with_retry("persistent", move || {
                let calls = calls_op.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CacheError::Timeout)
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let manager = manager(fast_policy(2));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();

        let result: Result<u32> = manager
            .execute_with_retry("remote", move || {
                let calls = calls_op.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CacheError::Connection("reset".to_string()))
                }
            })
            .await;
        assert!(matches!(result, Err(CacheError::Connection(_))));
        // 1 initial + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_surfaces_immediately() {
        let manager = manager(fast_policy(5));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();

        let result: Result<u32> = manager
            .execute_with_retry("memory", move || {
                let calls = calls_op.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CacheError::Validation("bad key".to_string()))
                }
            })
            .await;
        assert!(matches!(result, Err(CacheError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_recovery_runs_once() {
        let manager = manager(fast_policy(5));
        manager.update_config(RecoveryConfig {
            enabled: false,
            ..manager.config()
        });

        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();
        let result: Result<u32> = manager
            .execute_with_retry("remote", move || {
                let calls = calls_op.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CacheError::Timeout)
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_history_and_summary() {
        let manager = manager(fast_policy(1));
        let _: Result<u32> = manager
            .execute_with_retry("remote", || async {
                Err(CacheError::Timeout)
            })
            .await;
        manager.record_error("persistent", &CacheError::Backend("locked".to_string()));

        let summary = manager.error_summary(10);
        assert_eq!(summary.count_by_tier.get("remote"), Some(&2));
        assert_eq!(summary.count_by_tier.get("persistent"), Some(&1));
        assert_eq!(summary.count_by_kind.get("timeout"), Some(&2));
        assert_eq!(summary.recent.len(), 3);

        manager.clear_error_history();
        assert!(manager.error_summary(10).recent.is_empty());
    }

    #[tokio::test]
    async fn test_history_ring_bounded() {
        let manager = manager(fast_policy(0));
        for _ in 0..(HISTORY_CAP + 50) {
            manager.record_error("remote", &CacheError::Timeout);
        }
        let summary = manager.error_summary(HISTORY_CAP + 50);
        assert_eq!(summary.recent.len(), HISTORY_CAP);
    }

    #[test]
    fn test_breaker_per_tier() {
        let manager = manager(fast_policy(1));
        let remote = manager.breaker("remote");
        remote.on_failure();
        remote.on_failure();

        // Same tier name resolves to the same breaker
        assert_eq!(manager.breaker("remote").status().failure_count, 2);
        // A different tier gets its own
        assert_eq!(manager.breaker("persistent").status().failure_count, 0);

        let all = manager.status_all();
        assert_eq!(all.len(), 2);

        manager.reset_all();
        assert_eq!(manager.breaker("remote").status().failure_count, 0);
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let delay = jittered(100);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(120));
        }
    }
}
