// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-subscriber async event source/observer.
//!
//! A one-shot future/promise pair used to sequence multi-step control
//! procedures without blocking worker threads. The source side publishes a
//! value with [`EventSource::set`]; the observer side either blocks on
//! [`EventObserver::wait`] (test and synchronous contexts) or registers a
//! continuation with [`EventObserver::on_complete`] that is submitted to an
//! executor on delivery.
//!
//! Ownership is deliberately one-directional: while subscribed, the source
//! holds a strong reference to the shared completion cell and the observer
//! keeps only a weak back-reference to its source. Destroying either side
//! while linked leaves the other in a defined state (empty subscriber slot,
//! or a transaction that never completes and is reclaimed with the source);
//! no dangling reference survives a suspension point.
//!
//! # Invariants
//!
//! - At most one live subscriber per source; a second subscription panics.
//! - An observer is single-use: once completed it never re-subscribes and
//!   subscribing a completed observer panics.
//! - A source delivers at most once per transaction. `set` with no
//!   subscriber logs and drops the value (best-effort delivery: publishers
//!   may legitimately race with a timeout that already cancelled the
//!   transaction).

use crate::exec::{Task, TaskExecutor};
use crate::timers::{TimerService, UniqueTimer};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::Duration;

type Continuation<T> = (Arc<dyn TaskExecutor>, Box<dyn FnOnce(T) + Send>);

enum CellState<T> {
    Pending {
        continuation: Option<Continuation<T>>,
    },
    Ready(T),
    /// The delivered value was moved out by `take_result`.
    Taken,
}

/// Completion slot transitioning once from pending to complete.
struct CompletionCell<T> {
    state: Mutex<CellState<T>>,
    condvar: Condvar,
}

impl<T: Clone + Send + Sync + 'static> CompletionCell<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(CellState::Pending { continuation: None }),
            condvar: Condvar::new(),
        }
    }

    fn is_set(&self) -> bool {
        matches!(
            *self.state.lock(),
            CellState::Ready(_) | CellState::Taken
        )
    }

    fn complete(&self, value: T) {
        let continuation = {
            let mut state = self.state.lock();
            match &mut *state {
                CellState::Pending { continuation } => {
                    let cont = continuation.take();
                    *state = CellState::Ready(value.clone());
                    cont
                }
                CellState::Ready(_) | CellState::Taken => panic!("event completed twice"),
            }
        };
        self.condvar.notify_all();

        if let Some((executor, callback)) = continuation {
            submit_continuation(executor, callback, value);
        }
    }
}

fn submit_continuation<T: Send + 'static>(
    executor: Arc<dyn TaskExecutor>,
    callback: Box<dyn FnOnce(T) + Send>,
    value: T,
) {
    let task: Task = Box::new(move || callback(value));
    if !executor.execute(task) {
        log::error!("[ranex] executor rejected event continuation, result dropped");
    }
}

struct ObserverInner<T> {
    cell: CompletionCell<T>,
    source: Mutex<Weak<SourceInner<T>>>,
}

struct SourceInner<T> {
    cancel_value: T,
    timer: UniqueTimer,
    subscriber: Mutex<Option<Arc<ObserverInner<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> SourceInner<T> {
    /// Deliver `value` to the subscriber, tearing the link down first.
    fn deliver(&self, value: T) -> bool {
        let observer = {
            let mut slot = self.subscriber.lock();
            match slot.take() {
                Some(observer) => observer,
                None => {
                    log::debug!(
                        "[ranex] setting transaction result, but no subscriber is listening"
                    );
                    return false;
                }
            }
        };

        self.timer.stop();
        *observer.source.lock() = Weak::new();
        observer.cell.complete(value);
        true
    }
}

/// Publisher side of a single-subscriber async transaction.
///
/// Reusable across many sequential transactions, never concurrent ones.
pub struct EventSource<T: Clone + Send + Sync + 'static> {
    inner: Arc<SourceInner<T>>,
}

impl<T: Clone + Send + Sync + 'static> EventSource<T> {
    /// Create a source with a fixed cancellation value, delivered on timeout.
    pub fn new(timers: &TimerService, cancel_value: T) -> Self {
        Self {
            inner: Arc::new(SourceInner {
                cancel_value,
                timer: timers.create_unique_timer(),
                subscriber: Mutex::new(None),
            }),
        }
    }

    /// True when an observer is currently subscribed.
    pub fn has_subscriber(&self) -> bool {
        self.inner.subscriber.lock().is_some()
    }

    /// Forward a result to the subscriber.
    ///
    /// Returns `true` iff a subscriber was present; the subscription is torn
    /// down atomically with respect to later calls, so a second `set` for
    /// the same transaction observes "no subscriber".
    pub fn set(&self, value: T) -> bool {
        self.inner.deliver(value)
    }
}

/// Subscriber side of a single-subscriber async transaction. Single-use.
///
/// The handle may be dropped after [`on_complete`](Self::on_complete): the
/// registered continuation then owns the wait and the transaction stays
/// live. Dropping a subscribed observer that still owns its wait (no
/// continuation) unsubscribes it, leaving the source free for a new
/// transaction.
pub struct EventObserver<T: Clone + Send + Sync + 'static> {
    inner: Arc<ObserverInner<T>>,
}

impl<T: Clone + Send + Sync + 'static> EventObserver<T> {
    /// Unsubscribed observer with an empty completion slot.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ObserverInner {
                cell: CompletionCell::new(),
                source: Mutex::new(Weak::new()),
            }),
        }
    }

    /// Subscribe to `source`. Panics if the source already has a subscriber
    /// or this observer already completed.
    pub fn subscribe_to(&self, source: &EventSource<T>) {
        self.attach(source, None);
    }

    /// Subscribe with a timeout: if no value arrives within `timeout`, the
    /// source auto-delivers its cancellation value. Delivery before expiry
    /// disarms the timer.
    pub fn subscribe_with_timeout(&self, source: &EventSource<T>, timeout: Duration) {
        self.attach(source, Some(timeout));
    }

    fn attach(&self, source: &EventSource<T>, timeout: Option<Duration>) {
        assert!(
            !self.inner.cell.is_set(),
            "cannot subscribe an already completed observer"
        );
        assert!(
            self.inner.source.lock().upgrade().is_none(),
            "observer is already subscribed to a source"
        );
        {
            let mut slot = source.inner.subscriber.lock();
            assert!(
                slot.is_none(),
                "event source allows only one subscriber per transaction"
            );
            *slot = Some(Arc::clone(&self.inner));
        }
        *self.inner.source.lock() = Arc::downgrade(&source.inner);

        if let Some(timeout) = timeout {
            let weak_source = Arc::downgrade(&source.inner);
            source.inner.timer.schedule(timeout, move || {
                if let Some(src) = weak_source.upgrade() {
                    let cancel = src.cancel_value.clone();
                    src.deliver(cancel);
                }
            });
        }
    }

    /// True while linked to a source with no result delivered yet.
    pub fn subscribed(&self) -> bool {
        self.inner.source.lock().upgrade().is_some()
    }

    /// True once the source (or its timeout) delivered a value.
    pub fn complete(&self) -> bool {
        self.inner.cell.is_set()
    }

    /// Result delivered by the source. Panics while the transaction is
    /// incomplete or after the result was taken.
    pub fn result(&self) -> T {
        match &*self.inner.cell.state.lock() {
            CellState::Ready(value) => value.clone(),
            CellState::Pending { .. } => {
                panic!("trying to fetch result of incomplete transaction")
            }
            CellState::Taken => panic!("transaction result was already taken"),
        }
    }

    /// Move the delivered result out of the completion slot.
    ///
    /// Consumes the value, consistent with the observer's single-use
    /// contract. Panics while the transaction is incomplete or on a second
    /// take.
    pub fn take_result(&self) -> T {
        let mut state = self.inner.cell.state.lock();
        match std::mem::replace(&mut *state, CellState::Taken) {
            CellState::Ready(value) => value,
            CellState::Pending { continuation } => {
                *state = CellState::Pending { continuation };
                panic!("trying to fetch result of incomplete transaction")
            }
            CellState::Taken => panic!("transaction result was already taken"),
        }
    }

    /// Block the calling thread until the result arrives.
    ///
    /// Suspension handle for synchronous contexts; worker-hosted procedures
    /// use [`on_complete`](Self::on_complete) instead so the worker loop
    /// keeps draining.
    pub fn wait(&self) -> T {
        let mut state = self.inner.cell.state.lock();
        loop {
            match &*state {
                CellState::Ready(value) => return value.clone(),
                CellState::Pending { .. } => self.inner.cell.condvar.wait(&mut state),
                CellState::Taken => panic!("transaction result was already taken"),
            }
        }
    }

    /// Block until the result arrives or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.inner.cell.state.lock();
        loop {
            match &*state {
                CellState::Ready(value) => return Some(value.clone()),
                CellState::Pending { .. } => {
                    if self
                        .inner
                        .cell
                        .condvar
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        return match &*state {
                            CellState::Ready(value) => Some(value.clone()),
                            CellState::Pending { .. } => None,
                            CellState::Taken => {
                                panic!("transaction result was already taken")
                            }
                        };
                    }
                }
                CellState::Taken => panic!("transaction result was already taken"),
            }
        }
    }

    /// Register a continuation: when the result arrives, submit
    /// `callback(result)` as a task on `executor`. If the result is already
    /// available the task is submitted immediately.
    ///
    /// After registration the continuation owns the wait; this handle may be
    /// dropped without tearing the subscription down. At most one
    /// continuation per observer; a second registration panics.
    pub fn on_complete(
        &self,
        executor: Arc<dyn TaskExecutor>,
        callback: impl FnOnce(T) + Send + 'static,
    ) {
        let callback: Box<dyn FnOnce(T) + Send> = Box::new(callback);

        // The box moves exactly once: into the pending slot, or out of the
        // match together with the already delivered value.
        let ready = {
            let mut state = self.inner.cell.state.lock();
            match &mut *state {
                CellState::Pending { continuation } => {
                    assert!(
                        continuation.is_none(),
                        "observer already has a continuation registered"
                    );
                    *continuation = Some((Arc::clone(&executor), callback));
                    None
                }
                CellState::Ready(value) => Some((callback, value.clone())),
                CellState::Taken => {
                    panic!("cannot register a continuation after the result was taken")
                }
            }
        };

        if let Some((callback, value)) = ready {
            submit_continuation(executor, callback, value);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for EventObserver<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for EventObserver<T> {
    fn drop(&mut self) {
        // Unsubscribe only while this handle still owns the wait; a pending
        // continuation or a delivered result keeps the link's fate with the
        // source side.
        let owns_wait = matches!(
            *self.inner.cell.state.lock(),
            CellState::Pending { continuation: None }
        );
        if !owns_wait {
            return;
        }
        if let Some(source) = self.inner.source.lock().upgrade() {
            let mut slot = source.subscriber.lock();
            if slot
                .as_ref()
                .is_some_and(|observer| Arc::ptr_eq(observer, &self.inner))
            {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{TaskWorker, WorkerExecutor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_set_delivers_exactly_once() {
        let timers = TimerService::new();
        let source = EventSource::new(&timers, 0u32);
        let observer = EventObserver::new();

        observer.subscribe_to(&source);
        assert!(source.has_subscriber());
        assert!(!observer.complete());

        assert!(source.set(7));
        assert!(observer.complete());
        assert!(!observer.subscribed());
        assert_eq!(observer.result(), 7);

        // Second set for the same transaction observes no subscriber.
        assert!(!source.set(8));
        assert_eq!(observer.result(), 7);
    }

    #[test]
    fn test_set_without_subscriber_drops_value() {
        let timers = TimerService::new();
        let source = EventSource::new(&timers, 0u32);
        assert!(!source.set(1));
    }

    #[test]
    fn test_timeout_delivers_cancel_value_within_margin() {
        let timers = TimerService::new();
        let source = EventSource::new(&timers, u32::MAX);
        let observer = EventObserver::new();

        let start = Instant::now();
        observer.subscribe_with_timeout(&source, Duration::from_millis(40));
        let result = observer.wait();

        assert_eq!(result, u32::MAX);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(39), "fired early: {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(500), "fired late: {:?}", elapsed);
    }

    #[test]
    fn test_delivery_before_timeout_disarms_timer() {
        let timers = TimerService::new();
        let source = EventSource::new(&timers, u32::MAX);
        let observer = EventObserver::new();

        observer.subscribe_with_timeout(&source, Duration::from_millis(30));
        assert!(source.set(5));
        assert_eq!(observer.result(), 5);

        // The expiry window passes; the late timer must not deliver again.
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(observer.result(), 5);
        assert!(!source.has_subscriber());
    }

    #[test]
    fn test_dropping_observer_frees_subscriber_slot() {
        let timers = TimerService::new();
        let source = EventSource::new(&timers, 0u32);

        {
            let observer = EventObserver::new();
            observer.subscribe_to(&source);
            assert!(source.has_subscriber());
        }
        assert!(!source.has_subscriber());

        // The slot is reusable for a fresh transaction.
        let second = EventObserver::new();
        second.subscribe_to(&source);
        assert!(source.set(3));
        assert_eq!(second.result(), 3);
    }

    #[test]
    fn test_source_is_reusable_across_transactions() {
        let timers = TimerService::new();
        let source = EventSource::new(&timers, 0u32);

        for i in 1..=3 {
            let observer = EventObserver::new();
            observer.subscribe_to(&source);
            assert!(source.set(i));
            assert_eq!(observer.result(), i);
        }
    }

    #[test]
    #[should_panic(expected = "only one subscriber")]
    fn test_second_subscription_panics() {
        let timers = TimerService::new();
        let source = EventSource::new(&timers, 0u32);
        let first = EventObserver::new();
        let second = EventObserver::new();
        first.subscribe_to(&source);
        second.subscribe_to(&source);
    }

    #[test]
    #[should_panic(expected = "already completed observer")]
    fn test_resubscribing_completed_observer_panics() {
        let timers = TimerService::new();
        let source = EventSource::new(&timers, 0u32);
        let observer = EventObserver::new();
        observer.subscribe_to(&source);
        assert!(source.set(1));
        observer.subscribe_to(&source);
    }

    #[test]
    fn test_take_result_moves_the_value_out() {
        let timers = TimerService::new();
        let source = EventSource::new(&timers, 0u32);
        let observer = EventObserver::new();

        observer.subscribe_to(&source);
        assert!(source.set(11));
        assert_eq!(observer.take_result(), 11);
        assert!(observer.complete(), "taken observer stays completed");
    }

    #[test]
    #[should_panic(expected = "already taken")]
    fn test_second_take_result_panics() {
        let timers = TimerService::new();
        let source = EventSource::new(&timers, 0u32);
        let observer = EventObserver::new();

        observer.subscribe_to(&source);
        assert!(source.set(1));
        let _ = observer.take_result();
        let _ = observer.take_result();
    }

    #[test]
    #[should_panic(expected = "incomplete transaction")]
    fn test_result_before_completion_panics() {
        let timers = TimerService::new();
        let source = EventSource::new(&timers, 0u32);
        let observer = EventObserver::new();
        observer.subscribe_to(&source);
        let _ = observer.result();
    }

    #[test]
    fn test_continuation_runs_on_executor() {
        let timers = TimerService::new();
        let mut worker = TaskWorker::new("event_cont", 16);
        let exec: Arc<dyn TaskExecutor> = Arc::new(WorkerExecutor::new(&worker));

        let source = EventSource::new(&timers, 0u32);
        let observer = EventObserver::new();
        observer.subscribe_to(&source);

        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        observer.on_complete(exec, move |value| {
            s.store(value as usize, Ordering::SeqCst);
        });

        assert!(source.set(42));
        worker.stop();
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_continuation_outlives_dropped_observer_handle() {
        let timers = TimerService::new();
        let mut worker = TaskWorker::new("event_detach", 16);
        let exec: Arc<dyn TaskExecutor> = Arc::new(WorkerExecutor::new(&worker));

        let source = EventSource::new(&timers, 0u32);
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let observer = EventObserver::new();
            observer.subscribe_to(&source);
            let s = Arc::clone(&seen);
            observer.on_complete(exec, move |value| {
                s.store(value as usize, Ordering::SeqCst);
            });
        }

        // The handle is gone but the continuation owns the wait.
        assert!(source.has_subscriber());
        assert!(source.set(9));
        worker.stop();
        assert_eq!(seen.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn test_continuation_runs_on_timeout_cancel() {
        let timers = TimerService::new();
        let mut worker = TaskWorker::new("event_cancel", 16);
        let exec: Arc<dyn TaskExecutor> = Arc::new(WorkerExecutor::new(&worker));

        let source = EventSource::new(&timers, u32::MAX);
        let observer = EventObserver::new();
        observer.subscribe_with_timeout(&source, Duration::from_millis(20));

        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        observer.on_complete(exec, move |value| {
            s.store(value as usize, Ordering::SeqCst);
        });

        assert_eq!(observer.wait_timeout(Duration::from_secs(2)), Some(u32::MAX));
        worker.stop();
        assert_eq!(seen.load(Ordering::SeqCst), u32::MAX as usize);
    }
}
