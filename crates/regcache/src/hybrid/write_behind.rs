//! Write-behind queue
//!
//! FIFO queue of pending writes with a single-flight drainer flag. The
//! drain loop itself lives on the orchestrator; this type owns the data
//! and the flag.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use regcache_core::CacheValue;

#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    pub key: String,
    pub value: CacheValue,
    pub ttl_seconds: Option<u64>,
    pub enqueued_at: Instant,
}

pub(crate) struct WriteBehindQueue {
    queue: Mutex<VecDeque<PendingWrite>>,
    draining: AtomicBool,
    /// Advisory depth; exceeding it logs a warning but never refuses
    advisory_cap: usize,
}

impl WriteBehindQueue {
    pub fn new(advisory_cap: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            advisory_cap,
        }
    }

    pub fn push(&self, write: PendingWrite) {
        let mut queue = self.queue.lock();
        queue.push_back(write);
        if queue.len() > self.advisory_cap {
            tracing::warn!(depth = queue.len(), "write-behind queue above advisory depth");
        }
    }

    /// Pop up to `n` entries in FIFO order
    pub fn pop_batch(&self, n: usize) -> Vec<PendingWrite> {
        let mut queue = self.queue.lock();
        let take = n.min(queue.len());
        queue.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    /// Claim the drainer slot; only one drain loop runs at a time
    pub fn try_begin_drain(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_drain(&self) {
        self.draining.store(false, Ordering::Release);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Drainer idle and nothing pending
    pub fn is_idle(&self) -> bool {
        !self.is_draining() && self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regcache_core::OpaqueEntry;

    fn write(key: &str) -> PendingWrite {
        PendingWrite {
            key: key.to_string(),
            value: CacheValue::Opaque(OpaqueEntry {
                content_type: "text/plain".to_string(),
                payload: b"v".to_vec(),
            }),
            ttl_seconds: None,
            enqueued_at: Instant::now(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = WriteBehindQueue::new(100);
        queue.push(write("metadata:a"));
        queue.push(write("metadata:b"));
        queue.push(write("metadata:c"));

        let batch = queue.pop_batch(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].key, "metadata:a");
        assert_eq!(batch[1].key, "metadata:b");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_pop_batch_caps_at_queue_len() {
        let queue = WriteBehindQueue::new(100);
        queue.push(write("metadata:a"));
        let batch = queue.pop_batch(10);
        assert_eq!(batch.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_single_flight_drain_flag() {
        let queue = WriteBehindQueue::new(100);
        assert!(queue.try_begin_drain());
        assert!(!queue.try_begin_drain());
        assert!(queue.is_draining());
        queue.end_drain();
        assert!(queue.try_begin_drain());
    }

    #[test]
    fn test_idle_requires_both() {
        let queue = WriteBehindQueue::new(100);
        assert!(queue.is_idle());
        queue.push(write("metadata:a"));
        assert!(!queue.is_idle());
        queue.clear();
        assert!(queue.try_begin_drain());
        assert!(!queue.is_idle());
        queue.end_drain();
        assert!(queue.is_idle());
    }
}
