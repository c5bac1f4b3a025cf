//! Degraded-operation notifications
//!
//! A small publish/subscribe channel: subscribers get a broadcast
//! receiver, and recent events are retained in a bounded ring for
//! inspection and summaries.

use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::broadcast;

use regcache_core::NotificationConfig;

/// Identical events within this window are coalesced
const DEDUP_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// One degraded-operation event
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub timestamp: SystemTime,
    pub severity: Severity,
    pub tier: String,
    pub key: Option<String>,
    pub message: String,
}

/// Aggregate over a recent window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradationSummary {
    pub is_degraded: bool,
    pub total_issues: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_tier: BTreeMap<String, usize>,
}

/// Observer channel for degraded-operation events.
///
/// Cloning creates a new handle to the SAME channel and retention ring.
#[derive(Clone)]
pub struct DegradationNotifier {
    tx: broadcast::Sender<NotificationEvent>,
    ring: Arc<Mutex<VecDeque<NotificationEvent>>>,
    config: NotificationConfig,
}

impl DegradationNotifier {
    pub fn new(config: NotificationConfig) -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self {
            tx,
            ring: Arc::new(Mutex::new(VecDeque::new())),
            config,
        }
    }

    /// Publish an event to subscribers and the retention ring
    pub fn notify(
        &self,
        severity: Severity,
        tier: impl Into<String>,
        key: Option<String>,
        message: impl Into<String>,
    ) {
        if !self.config.enabled {
            return;
        }
        let event = NotificationEvent {
            timestamp: SystemTime::now(),
            severity,
            tier: tier.into(),
            key,
            message: message.into(),
        };

        {
            let mut ring = self.ring.lock();
            // Coalesce repeats of the same condition
            if let Some(last) = ring.back() {
                let recent = event
                    .timestamp
                    .duration_since(last.timestamp)
                    .map(|d| d < DEDUP_WINDOW)
                    .unwrap_or(true);
                if recent
                    && last.severity == event.severity
                    && last.tier == event.tier
                    && last.message == event.message
                {
                    return;
                }
            }
            ring.push_back(event.clone());
            self.prune(&mut ring);
        }

        // Nobody listening is fine
        let _ = self.tx.send(event);
    }

    fn prune(&self, ring: &mut VecDeque<NotificationEvent>) {
        let cutoff = SystemTime::now() - Duration::from_millis(self.config.retention_ms);
        while ring.front().is_some_and(|e| e.timestamp < cutoff) {
            ring.pop_front();
        }
        while ring.len() > self.config.max_notifications {
            ring.pop_front();
        }
    }

    /// Register a subscriber; dropping the receiver unsubscribes
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }

    /// Most recent `n` retained events, newest last
    pub fn recent(&self, n: usize) -> Vec<NotificationEvent> {
        let ring = self.ring.lock();
        ring.iter().rev().take(n).rev().cloned().collect()
    }

    /// Summarize retained events over the trailing window
    pub fn degradation_summary(&self, window: Duration) -> DegradationSummary {
        let cutoff = SystemTime::now() - window;
        let ring = self.ring.lock();

        let mut by_severity: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_tier: BTreeMap<String, usize> = BTreeMap::new();
        let mut total = 0usize;
        for event in ring.iter().filter(|e| e.timestamp >= cutoff) {
            total += 1;
            *by_severity.entry(event.severity.as_str().to_string()).or_default() += 1;
            *by_tier.entry(event.tier.clone()).or_default() += 1;
        }

        DegradationSummary {
            is_degraded: total > 0,
            total_issues: total,
            by_severity,
            by_tier,
        }
    }

    /// Drop all retained events
    pub fn clear(&self) {
        self.ring.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> DegradationNotifier {
        DegradationNotifier::new(NotificationConfig::default())
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let notifier = notifier();
        let mut rx = notifier.subscribe();

        notifier.notify(Severity::Warning, "persistent", None, "write failed");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.tier, "persistent");
        assert_eq!(event.severity, Severity::Warning);
    }

    #[test]
    fn test_retention_and_recent() {
        let notifier = notifier();
        notifier.notify(Severity::Info, "memory", None, "one");
        notifier.notify(Severity::Error, "remote", Some("component:react:button".to_string()), "two");

        let recent = notifier.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].message, "two");
        assert_eq!(recent[1].key.as_deref(), Some("component:react:button"));
    }

    #[test]
    fn test_dedup_of_identical_events() {
        let notifier = notifier();
        for _ in 0..5 {
            notifier.notify(Severity::Warning, "remote", None, "registry unreachable");
        }
        assert_eq!(notifier.recent(10).len(), 1);

        // A different message is not coalesced
        notifier.notify(Severity::Warning, "remote", None, "rate limited");
        assert_eq!(notifier.recent(10).len(), 2);
    }

    #[test]
    fn test_ring_cap() {
        let notifier = DegradationNotifier::new(NotificationConfig {
            enabled: true,
            retention_ms: 3_600_000,
            max_notifications: 3,
        });
        for i in 0..10 {
            notifier.notify(Severity::Info, "memory", None, format!("event {i}"));
        }
        let recent = notifier.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[2].message, "event 9");
    }

    #[test]
    fn test_summary() {
        let notifier = notifier();
        notifier.notify(Severity::Warning, "persistent", None, "slow");
        notifier.notify(Severity::Error, "remote", None, "down");
        notifier.notify(Severity::Error, "remote", None, "still down");

        let summary = notifier.degradation_summary(Duration::from_secs(60));
        assert!(summary.is_degraded);
        assert_eq!(summary.total_issues, 3);
        assert_eq!(summary.by_severity.get("error"), Some(&2));
        assert_eq!(summary.by_tier.get("remote"), Some(&2));

        notifier.clear();
        let summary = notifier.degradation_summary(Duration::from_secs(60));
        assert!(!summary.is_degraded);
    }

    #[test]
    fn test_disabled_notifier_drops_events() {
        let notifier = DegradationNotifier::new(NotificationConfig {
            enabled: false,
            ..Default::default()
        });
        notifier.notify(Severity::Error, "remote", None, "down");
        assert!(notifier.recent(10).is_empty());
    }
}
