// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-threaded task worker with strict-priority queue lanes.
//!
//! A `TaskWorker` owns exactly one OS thread for its lifetime and one or more
//! bounded FIFO lanes. At every dequeue decision the lowest-index non-empty
//! lane wins, so a dual-lane worker drains its `Max` lane completely before
//! touching the `Min` lane. This bounds the latency of timer-critical tasks
//! queued behind bulk control work.
//!
//! Queues are fixed capacity: submission to a full lane fails immediately and
//! the caller applies its own fallback (drop-and-log by default).

use super::affinity::{self, CpuMask, RtPriority};
use super::task::{Task, TaskPriority};
use super::wake::WakeSignal;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long an idle worker thread sleeps before re-polling its lanes.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Counters updated by the worker loop and by rejected submissions.
///
/// Relaxed atomics; consumers only need monotonic snapshots for
/// observability.
#[derive(Debug)]
pub struct WorkerMetrics {
    pub tasks_executed: AtomicU64,
    pub tasks_dropped: AtomicU64,
}

impl WorkerMetrics {
    pub(crate) fn new() -> Self {
        Self {
            tasks_executed: AtomicU64::new(0),
            tasks_dropped: AtomicU64::new(0),
        }
    }

    /// (executed, dropped) counters.
    #[must_use]
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.tasks_executed.load(Ordering::Relaxed),
            self.tasks_dropped.load(Ordering::Relaxed),
        )
    }
}

/// State shared between the worker thread and its executor handles.
pub(crate) struct WorkerShared {
    name: String,
    lanes: Vec<ArrayQueue<Task>>,
    wake: WakeSignal,
    stopping: AtomicBool,
    metrics: WorkerMetrics,
}

impl WorkerShared {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }

    /// Enqueue a task on the lane selected by `priority`.
    ///
    /// Returns `false` when the lane is full or the worker is stopping; the
    /// task is dropped in both cases.
    pub(crate) fn push(&self, priority: TaskPriority, task: Task) -> bool {
        if self.stopping.load(Ordering::Acquire) {
            self.metrics.tasks_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let lane = priority.lane().min(self.lanes.len() - 1);
        match self.lanes[lane].push(task) {
            Ok(()) => {
                self.wake.notify();
                true
            }
            Err(_) => {
                self.metrics.tasks_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop the next task, preferring lower lane indices.
    fn pop_next(&self) -> Option<Task> {
        self.lanes.iter().find_map(ArrayQueue::pop)
    }

    fn run_loop(&self) {
        loop {
            match self.pop_next() {
                Some(task) => {
                    // A panicking task is a programming-error fault. The
                    // panic hook has already printed the diagnostic; abort
                    // instead of leaving a silently dead worker behind.
                    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).is_err() {
                        log::error!("[ranex] task on worker {} panicked, aborting", self.name);
                        std::process::abort();
                    }
                    self.metrics.tasks_executed.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    // Pending tasks are drained before shutdown completes;
                    // push() already rejects new work once stopping is set.
                    if self.stopping.load(Ordering::Acquire) {
                        break;
                    }
                    self.wake.wait_timeout(IDLE_SLEEP);
                }
            }
        }
    }
}

/// One OS thread draining one or more bounded task lanes in priority order.
pub struct TaskWorker {
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<()>>,
}

impl TaskWorker {
    /// Single-lane worker with default scheduling attributes.
    pub fn new(name: impl Into<String>, queue_size: usize) -> Self {
        Self::with_attributes(
            name,
            &[queue_size],
            RtPriority::none(),
            CpuMask::unpinned(),
        )
    }

    /// Single-lane worker with explicit scheduling attributes.
    pub fn with_priority(
        name: impl Into<String>,
        queue_size: usize,
        prio: RtPriority,
        mask: CpuMask,
    ) -> Self {
        Self::with_attributes(name, &[queue_size], prio, mask)
    }

    /// Worker with one bounded lane per entry of `lane_sizes`, drained in
    /// strict index order. Lane 0 serves [`TaskPriority::Max`].
    pub fn with_attributes(
        name: impl Into<String>,
        lane_sizes: &[usize],
        prio: RtPriority,
        mask: CpuMask,
    ) -> Self {
        let name = name.into();
        assert!(
            !lane_sizes.is_empty(),
            "worker {} needs at least one queue lane",
            name
        );

        let shared = Arc::new(WorkerShared {
            name: name.clone(),
            lanes: lane_sizes.iter().map(|&s| ArrayQueue::new(s)).collect(),
            wake: WakeSignal::new(),
            stopping: AtomicBool::new(false),
            metrics: WorkerMetrics::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(format!("ranex-{}", name))
            .spawn(move || {
                affinity::apply_thread_attributes(thread_shared.name(), prio, &mask);
                thread_shared.run_loop();
            })
            .unwrap_or_else(|e| panic!("failed to spawn worker thread {}: {}", name, e));

        Self {
            shared,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// Submit a task onto the lane selected by `priority`.
    pub fn push(&self, priority: TaskPriority, task: Task) -> bool {
        self.shared.push(priority, task)
    }

    /// (executed, dropped) task counters.
    pub fn metrics(&self) -> (u64, u64) {
        self.shared.metrics().snapshot()
    }

    pub(crate) fn shared(&self) -> Arc<WorkerShared> {
        Arc::clone(&self.shared)
    }

    /// Stop accepting work, drain pending tasks and join the thread.
    ///
    /// Idempotent; safe to call on a worker that already stopped.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            log::debug!("[ranex] stopping worker {}", self.shared.name());
            self.shared.stopping.store(true, Ordering::Release);
            self.shared.wake.notify();
            let _ = handle.join();
        }
    }
}

impl Drop for TaskWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn test_tasks_run_in_submission_order() {
        let mut worker = TaskWorker::new("order", 64);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..32 {
            let seen = Arc::clone(&seen);
            assert!(worker.push(
                TaskPriority::Min,
                Box::new(move || seen.lock().unwrap().push(i))
            ));
        }
        worker.stop();

        assert_eq!(*seen.lock().unwrap(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_full_lane_rejects_submission() {
        let gate = Arc::new(WakeSignal::new());
        let g = Arc::clone(&gate);
        let mut worker = TaskWorker::new("tiny", 2);

        // Block the worker so the lane stays full.
        assert!(worker.push(
            TaskPriority::Min,
            Box::new(move || {
                while !g.wait_timeout(Duration::from_millis(50)) {}
            })
        ));
        std::thread::sleep(Duration::from_millis(20));

        assert!(worker.push(TaskPriority::Min, Box::new(|| {})));
        assert!(worker.push(TaskPriority::Min, Box::new(|| {})));
        assert!(!worker.push(TaskPriority::Min, Box::new(|| {})));

        let (_, dropped) = worker.metrics();
        assert_eq!(dropped, 1);

        gate.notify();
        worker.stop();
    }

    #[test]
    fn test_max_lane_drains_before_min_lane() {
        let mut worker =
            TaskWorker::with_attributes("prio", &[8, 8], RtPriority::none(), CpuMask::unpinned());
        let order = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(WakeSignal::new());

        // Hold the worker busy while both lanes fill up.
        let g = Arc::clone(&gate);
        assert!(worker.push(
            TaskPriority::Max,
            Box::new(move || {
                while !g.wait_timeout(Duration::from_millis(50)) {}
            })
        ));
        std::thread::sleep(Duration::from_millis(20));

        for i in 0..4 {
            let order = Arc::clone(&order);
            assert!(worker.push(
                TaskPriority::Min,
                Box::new(move || order.lock().unwrap().push(("min", i)))
            ));
        }
        for i in 0..4 {
            let order = Arc::clone(&order);
            assert!(worker.push(
                TaskPriority::Max,
                Box::new(move || order.lock().unwrap().push(("max", i)))
            ));
        }

        gate.notify();
        worker.stop();

        let order = order.lock().unwrap();
        assert_eq!(order.len(), 8);
        assert!(
            order[..4].iter().all(|(lane, _)| *lane == "max"),
            "max lane must drain first, got {:?}",
            *order
        );
    }

    #[test]
    fn test_no_two_tasks_overlap() {
        let mut worker = TaskWorker::new("serial", 1024);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let mut producers = Vec::new();
        let shared = worker.shared();
        for _ in 0..4 {
            let shared = Arc::clone(&shared);
            let in_flight = Arc::clone(&in_flight);
            let overlaps = Arc::clone(&overlaps);
            producers.push(std::thread::spawn(move || {
                for _ in 0..64 {
                    while !shared.push(TaskPriority::Min, {
                        let in_flight = Arc::clone(&in_flight);
                        let overlaps = Arc::clone(&overlaps);
                        Box::new(move || {
                            if in_flight.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            std::hint::spin_loop();
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                        })
                    }) {
                        std::thread::yield_now();
                    }
                }
            }));
        }
        for p in producers {
            p.join().unwrap();
        }
        worker.stop();

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        let (executed, _) = worker.metrics();
        assert_eq!(executed, 4 * 64);
    }

    #[test]
    fn test_push_after_stop_is_rejected() {
        let mut worker = TaskWorker::new("stopped", 8);
        worker.stop();
        assert!(!worker.push(TaskPriority::Min, Box::new(|| {})));
    }
}
