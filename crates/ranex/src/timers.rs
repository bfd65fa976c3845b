// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide timer service.
//!
//! One background thread owns a deadline heap and fires expired callbacks.
//! Handles ([`UniqueTimer`]) are epoch-guarded: stopping or rearming a timer
//! bumps its epoch, so an already queued expiry for an older epoch is
//! discarded instead of firing.
//!
//! Callbacks run on the timer thread and must not block; long work belongs
//! on an executor, with the callback only submitting it.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Idle wait when no deadline is pending.
const IDLE_WAIT: Duration = Duration::from_millis(100);

struct TimerEntry {
    deadline: Instant,
    timer_id: u64,
    epoch: u64,
    callback: Box<dyn FnOnce() + Send>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.timer_id == other.timer_id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // Reversed so the BinaryHeap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.timer_id.cmp(&self.timer_id))
    }
}

struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    /// Current epoch per timer id; heap entries with an older epoch are dead.
    epochs: HashMap<u64, u64>,
}

struct TimerInner {
    state: Mutex<TimerState>,
    condvar: Condvar,
    stopping: AtomicBool,
    next_timer_id: AtomicU64,
}

/// Background timer wheel thread plus handle factory.
pub struct TimerService {
    inner: Arc<TimerInner>,
    handle: Option<JoinHandle<()>>,
}

impl TimerService {
    pub fn new() -> Self {
        let inner = Arc::new(TimerInner {
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                epochs: HashMap::new(),
            }),
            condvar: Condvar::new(),
            stopping: AtomicBool::new(false),
            next_timer_id: AtomicU64::new(0),
        });

        let thread_inner = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("ranex-timers".to_string())
            .spawn(move || run_loop(&thread_inner))
            .unwrap_or_else(|e| panic!("failed to spawn timer thread: {}", e));

        Self {
            inner,
            handle: Some(handle),
        }
    }

    /// Create an independent timer handle.
    pub fn create_unique_timer(&self) -> UniqueTimer {
        UniqueTimer {
            timer_id: self.inner.next_timer_id.fetch_add(1, Ordering::Relaxed),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Stop the timer thread. Pending timers never fire after this returns.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.inner.stopping.store(true, Ordering::Release);
            self.inner.condvar.notify_all();
            let _ = handle.join();
        }
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(inner: &TimerInner) {
    loop {
        let due = {
            let mut state = inner.state.lock();
            loop {
                if inner.stopping.load(Ordering::Acquire) {
                    return;
                }

                let now = Instant::now();
                let mut due = Vec::new();
                while state.heap.peek().is_some_and(|e| e.deadline <= now) {
                    if let Some(entry) = state.heap.pop() {
                        if state.epochs.get(&entry.timer_id) == Some(&entry.epoch) {
                            due.push(entry.callback);
                        }
                    }
                }
                if !due.is_empty() {
                    break due;
                }

                let wait = state
                    .heap
                    .peek()
                    .map(|e| e.deadline.saturating_duration_since(now))
                    .unwrap_or(IDLE_WAIT);
                let _ = inner.condvar.wait_for(&mut state, wait);
            }
        };

        // Callbacks run without the state lock so they may arm or stop
        // timers themselves.
        for callback in due {
            callback();
        }
    }
}

/// Handle to one logical timer slot in the service.
///
/// Rearming replaces any pending expiry; dropping the handle disarms it.
pub struct UniqueTimer {
    timer_id: u64,
    inner: Arc<TimerInner>,
}

impl UniqueTimer {
    /// Arm the timer: run `callback` after `delay` unless stopped or rearmed
    /// first.
    pub fn schedule(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.inner.state.lock();
            let epoch = {
                let e = state.epochs.entry(self.timer_id).or_insert(0);
                *e += 1;
                *e
            };
            state.heap.push(TimerEntry {
                deadline: Instant::now() + delay,
                timer_id: self.timer_id,
                epoch,
                callback: Box::new(callback),
            });
        }
        self.inner.condvar.notify_all();
    }

    /// Disarm the timer. A pending expiry that has not fired yet never will.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        if let Some(epoch) = state.epochs.get_mut(&self.timer_id) {
            *epoch += 1;
        }
    }
}

impl Drop for UniqueTimer {
    fn drop(&mut self) {
        // Timer ids are never reused, so removing the epoch entry both
        // disarms any queued expiry (the lookup misses) and reclaims the
        // map slot for good.
        self.inner.state.lock().epochs.remove(&self.timer_id);
    }
}
