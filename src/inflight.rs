//! Shared byte accounting between writer and persister.

use crate::progress::ProgressSignal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Tracks bytes that have been enqueued by the writer but not yet completed
/// by the persister, and wakes waiters when capacity frees up.
pub struct InflightCounter {
    bytes: AtomicU64,
    limit: AtomicU64,
    signal: ProgressSignal,
}

impl InflightCounter {
    pub fn new(limit: u64) -> Arc<Self> {
        Arc::new(Self {
            bytes: AtomicU64::new(0),
            limit: AtomicU64::new(limit),
            signal: ProgressSignal::new(),
        })
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> u64 {
        self.limit.load(Ordering::Relaxed)
    }

    pub fn set_limit(&self, limit: u64) {
        self.limit.store(limit, Ordering::Relaxed);
        self.signal.notify_all();
    }

    /// Called by the writer when enqueuing `amount` bytes of work.
    pub fn add(&self, amount: u64) {
        self.bytes.fetch_add(amount, Ordering::AcqRel);
    }

    /// Called by the persister after finishing `amount` bytes of work.
    /// Wakes any writer blocked on the shared signal.
    pub fn complete(&self, amount: u64) {
        let previous = self.bytes.fetch_sub(amount, Ordering::AcqRel);
        debug_assert!(previous >= amount, "inflight byte count went negative");
        self.signal.notify_all();
    }

    pub fn signal(&self) -> &ProgressSignal {
        &self.signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_goes_negative_in_balanced_use() {
        let counter = InflightCounter::new(1024);
        counter.add(100);
        assert_eq!(counter.bytes(), 100);
        counter.complete(100);
        assert_eq!(counter.bytes(), 0);
    }

    #[test]
    fn respects_limit() {
        let counter = InflightCounter::new(100);
        counter.add(90);
        let deadline = Some(std::time::Instant::now() + std::time::Duration::from_millis(10));
        assert!(!counter.signal().wait_until(deadline, || counter.bytes() + 20 <= counter.limit()));
        counter.complete(90);
        assert!(counter.signal().wait_until(None, || counter.bytes() + 20 <= counter.limit()));
    }
}
