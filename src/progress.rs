//! Generic blocking wait used for writer backpressure.
//!
//! Grounded on `Core::futex`'s wait/wake pair, generalized: that
//! futex only works on the `AtomicU32` it was built for and falls
//! back to a busy `yield_now` loop off Linux, but the writer here needs to
//! block indefinitely on an arbitrary predicate (inflight budget available,
//! *or* return queue non-empty). `parking_lot::Condvar` gives that uniformly
//! across platforms, so the futex syscall path is not carried forward; what
//! survives is the shape — a signal object one side waits on and the other
//! side notifies after making progress.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A condition variable with no associated data, used purely to wake a
/// waiter after some external atomic state (inflight bytes, a queue slot)
/// has changed.
#[derive(Default)]
pub struct ProgressSignal {
    lock: Mutex<()>,
    condvar: Condvar,
}

impl ProgressSignal {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Wakes every thread currently blocked in `wait_until`.
    pub fn notify_all(&self) {
        self.condvar.notify_all();
    }

    /// Blocks until `condition` returns `true`, or until `deadline` (if
    /// given) passes. Returns `true` if the condition was met, `false` on
    /// timeout.
    ///
    /// `condition` may be called spuriously and must be cheap and
    /// side-effect-free beyond reading shared atomics.
    pub fn wait_until(&self, deadline: Option<Instant>, mut condition: impl FnMut() -> bool) -> bool {
        if condition() {
            return true;
        }
        let mut guard = self.lock.lock();
        loop {
            if condition() {
                return true;
            }
            match deadline {
                None => {
                    self.condvar.wait(&mut guard);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return condition();
                    }
                    let timed_out = self
                        .condvar
                        .wait_for(&mut guard, deadline - now)
                        .timed_out();
                    if timed_out {
                        return condition();
                    }
                }
            }
        }
    }

    /// Convenience wrapper computing an absolute deadline from a relative
    /// timeout, mirroring the writer config's `Option<Duration>` contract:
    /// `None` waits forever, `Some(Duration::ZERO)` never blocks.
    pub fn deadline_from(timeout: Option<Duration>) -> Option<Instant> {
        timeout.map(|d| Instant::now() + d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wakes_on_notify() {
        let signal = Arc::new(ProgressSignal::new());
        let ready = Arc::new(AtomicBool::new(false));

        let s2 = signal.clone();
        let r2 = ready.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            r2.store(true, Ordering::Release);
            s2.notify_all();
        });

        let met = signal.wait_until(None, || ready.load(Ordering::Acquire));
        assert!(met);
        handle.join().unwrap();
    }

    #[test]
    fn times_out_when_condition_never_true() {
        let signal = ProgressSignal::new();
        let deadline = ProgressSignal::deadline_from(Some(Duration::from_millis(10)));
        let met = signal.wait_until(deadline, || false);
        assert!(!met);
    }

    #[test]
    fn zero_timeout_never_blocks() {
        let signal = ProgressSignal::new();
        let deadline = ProgressSignal::deadline_from(Some(Duration::ZERO));
        let met = signal.wait_until(deadline, || false);
        assert!(!met);
    }
}
