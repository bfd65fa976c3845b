// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wake notification for sleeping worker threads.
//!
//! Two-tier design: an atomic flag covers the hot path where the consumer is
//! still polling its queues, and a condvar covers the idle case where one or
//! more worker threads have gone to sleep.
//!
//! Producers call [`WakeSignal::notify`] after every enqueue; the atomic
//! store costs a few nanoseconds when nobody is sleeping.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Wake signal shared between task submitters and worker threads.
#[derive(Debug)]
pub struct WakeSignal {
    /// Set by producers, consumed by exactly one waiter.
    ready: AtomicBool,
    /// Number of threads currently blocked in `wait_timeout`.
    sleepers: Mutex<usize>,
    condvar: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            sleepers: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Signal that work is available (lock-free unless a thread is asleep).
    #[inline]
    pub fn notify(&self) {
        self.ready.store(true, Ordering::Release);

        // The sleeper check is racy but safe: a waiter that misses the signal
        // re-polls its queues on timeout.
        if *self.sleepers.lock() > 0 {
            self.condvar.notify_all();
        }
    }

    /// Block until notified or `timeout` elapses.
    ///
    /// Returns `true` if this waiter consumed a pending notification. Callers
    /// must re-check their queues either way; the flag is advisory.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.ready.swap(false, Ordering::Acquire) {
            return true;
        }

        let mut sleepers = self.sleepers.lock();
        if self.ready.swap(false, Ordering::Acquire) {
            return true;
        }

        *sleepers += 1;
        let _ = self.condvar.wait_for(&mut sleepers, timeout);
        *sleepers -= 1;

        self.ready.swap(false, Ordering::Acquire)
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_notify_before_wait_returns_immediately() {
        let signal = WakeSignal::new();
        signal.notify();

        let start = std::time::Instant::now();
        assert!(signal.wait_timeout(Duration::from_millis(100)));
        assert!(start.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn test_wait_times_out_without_notify() {
        let signal = WakeSignal::new();

        let start = std::time::Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
        assert!(start.elapsed() >= Duration::from_millis(9));
    }

    #[test]
    fn test_notify_wakes_sleeping_thread() {
        let signal = Arc::new(WakeSignal::new());
        let s = Arc::clone(&signal);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            s.notify();
        });

        let woken = signal.wait_timeout(Duration::from_millis(500));
        assert!(woken, "sleeper should be woken by notify");
        handle.join().unwrap();
    }
}
