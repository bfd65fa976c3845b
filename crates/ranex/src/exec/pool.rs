// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Worker pool: N OS threads draining one shared bounded queue.
//!
//! Pools trade per-task ordering for horizontal scaling; two tasks submitted
//! close in time may run concurrently on different threads. Use them only for
//! data-parallel, order-independent work (per-transport-block decode and the
//! like). Strictly ordered pipelines belong on a [`TaskWorker`].
//!
//! [`TaskWorker`]: super::worker::TaskWorker

use super::affinity::{self, CpuMask, RtPriority};
use super::task::Task;
use super::wake::WakeSignal;
use super::worker::WorkerMetrics;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const IDLE_SLEEP: Duration = Duration::from_millis(1);

pub(crate) struct PoolShared {
    name: String,
    queue: ArrayQueue<Task>,
    wake: WakeSignal,
    stopping: AtomicBool,
    metrics: WorkerMetrics,
}

impl PoolShared {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn push(&self, task: Task) -> bool {
        if self.stopping.load(Ordering::Acquire) {
            self.metrics.tasks_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.queue.push(task) {
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

    fn run_loop(&self) {
        loop {
            match self.queue.pop() {
                Some(task) => {
                    // Same fault policy as TaskWorker: a panicking task
                    // aborts the process rather than thinning the pool.
                    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).is_err() {
                        log::error!(
                            "[ranex] task on worker pool {} panicked, aborting",
                            self.name
                        );
                        std::process::abort();
                    }
                    self.metrics.tasks_executed.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    if self.stopping.load(Ordering::Acquire) {
                        break;
                    }
                    self.wake.wait_timeout(IDLE_SLEEP);
                }
            }
        }
    }
}

/// N OS threads sharing one bounded task queue.
///
/// All threads carry the same name stem, priority and (optional) CPU mask.
pub struct TaskWorkerPool {
    shared: Arc<PoolShared>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskWorkerPool {
    pub fn new(
        name: impl Into<String>,
        nof_workers: usize,
        queue_size: usize,
        prio: RtPriority,
    ) -> Self {
        let name = name.into();
        assert!(
            nof_workers > 0,
            "worker pool {} needs at least one thread",
            name
        );

        let shared = Arc::new(PoolShared {
            name: name.clone(),
            queue: ArrayQueue::new(queue_size),
            wake: WakeSignal::new(),
            stopping: AtomicBool::new(false),
            metrics: WorkerMetrics::new(),
        });

        let handles = (0..nof_workers)
            .map(|i| {
                let thread_shared = Arc::clone(&shared);
                let mask = CpuMask::unpinned();
                std::thread::Builder::new()
                    .name(format!("ranex-{}#{}", name, i))
                    .spawn(move || {
                        affinity::apply_thread_attributes(thread_shared.name(), prio, &mask);
                        thread_shared.run_loop();
                    })
                    .unwrap_or_else(|e| {
                        panic!("failed to spawn pool thread {}#{}: {}", name, i, e)
                    })
            })
            .collect();

        Self { shared, handles }
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn nof_workers(&self) -> usize {
        self.handles.len()
    }

    /// Submit a task to the shared queue.
    pub fn push(&self, task: Task) -> bool {
        self.shared.push(task)
    }

    /// (executed, dropped) task counters, aggregated across threads.
    pub fn metrics(&self) -> (u64, u64) {
        self.shared.metrics.snapshot()
    }

    pub(crate) fn shared(&self) -> Arc<PoolShared> {
        Arc::clone(&self.shared)
    }

    /// Stop accepting work, drain the queue and join every thread.
    pub fn stop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        log::debug!("[ranex] stopping worker pool {}", self.shared.name());
        self.shared.stopping.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            self.shared.wake.notify();
            let _ = handle.join();
        }
    }
}

impl Drop for TaskWorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn test_all_accepted_tasks_execute_exactly_once() {
        let mut pool = TaskWorkerPool::new("decode", 4, 1024, RtPriority::none());
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..512 {
            while !pool.push({
                let counter = Arc::clone(&counter);
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            }) {
                std::thread::yield_now();
            }
        }
        pool.stop();

        assert_eq!(counter.load(Ordering::SeqCst), 512);
        assert_eq!(pool.metrics().0, 512);
    }

    #[test]
    fn test_work_spreads_across_threads() {
        let mut pool = TaskWorkerPool::new("spread", 4, 256, RtPriority::none());
        let names = Arc::new(Mutex::new(HashSet::new()));

        for _ in 0..128 {
            while !pool.push({
                let names = Arc::clone(&names);
                Box::new(move || {
                    let name = std::thread::current().name().map(String::from);
                    names.lock().unwrap().insert(name);
                    std::thread::sleep(Duration::from_micros(200));
                })
            }) {
                std::thread::yield_now();
            }
        }
        pool.stop();

        // With 128 sleeping tasks and 4 threads, at least 2 threads must
        // have picked up work.
        assert!(names.lock().unwrap().len() >= 2);
    }

    #[test]
    fn test_full_queue_rejects() {
        let gate = Arc::new(WakeSignal::new());
        let mut pool = TaskWorkerPool::new("full", 1, 1, RtPriority::none());

        let g = Arc::clone(&gate);
        assert!(pool.push(Box::new(move || {
            while !g.wait_timeout(Duration::from_millis(50)) {}
        })));
        std::thread::sleep(Duration::from_millis(20));

        assert!(pool.push(Box::new(|| {})));
        assert!(!pool.push(Box::new(|| {})));

        gate.notify();
        pool.stop();
    }
}
