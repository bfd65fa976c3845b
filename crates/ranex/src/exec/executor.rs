// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Task executor handles.
//!
//! An executor is a lightweight submission handle bound to one worker or
//! worker pool, optionally tagging submitted tasks with a priority class.
//! Several executors may reference the same worker (distinct priority lanes
//! into one queue). Executors never own the threads they submit to; the
//! topology does.

use super::pool::{PoolShared, TaskWorkerPool};
use super::task::{Task, TaskPriority};
use super::worker::{TaskWorker, WorkerShared};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Narrow submission interface exposed to every external collaborator.
///
/// `execute` returns `true` iff the task was accepted; a `false` return means
/// overload (full queue) or shutdown, and the task was dropped. Tasks produce
/// no return value; responses travel back through the async event primitive.
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, task: Task) -> bool;
}

/// Executor submitting into one [`TaskWorker`] lane.
pub struct WorkerExecutor {
    shared: Arc<WorkerShared>,
    priority: TaskPriority,
    report_on_failure: bool,
}

impl WorkerExecutor {
    /// Plain executor into the worker's general lane.
    pub fn new(worker: &TaskWorker) -> Self {
        Self::with_priority(worker, TaskPriority::Min)
    }

    /// Executor tagging every submission with `priority`.
    pub fn with_priority(worker: &TaskWorker, priority: TaskPriority) -> Self {
        Self {
            shared: worker.shared(),
            priority,
            report_on_failure: true,
        }
    }

    /// Suppress the per-rejection error log. Used for lanes where overload is
    /// an expected steady-state condition handled upstream (e.g. user-plane
    /// PDU ingress).
    pub fn silent(mut self) -> Self {
        self.report_on_failure = false;
        self
    }
}

impl TaskExecutor for WorkerExecutor {
    fn execute(&self, task: Task) -> bool {
        let accepted = self.shared.push(self.priority, task);
        if !accepted && self.report_on_failure {
            log::error!(
                "[ranex] worker {} rejected task: queue full or stopping",
                self.shared.name()
            );
        }
        accepted
    }
}

/// Executor submitting into a [`TaskWorkerPool`]'s shared queue.
pub struct PoolExecutor {
    shared: Arc<PoolShared>,
}

impl PoolExecutor {
    pub fn new(pool: &TaskWorkerPool) -> Self {
        Self {
            shared: pool.shared(),
        }
    }
}

impl TaskExecutor for PoolExecutor {
    fn execute(&self, task: Task) -> bool {
        let accepted = self.shared.push(task);
        if !accepted {
            log::error!(
                "[ranex] worker pool {} rejected task: queue full or stopping",
                self.shared.name()
            );
        }
        accepted
    }
}

/// Adapter that blocks the submitting thread until the wrapped task ran.
///
/// This is the only place in the substrate where a calling thread
/// deliberately blocks. It exists to lock-step simulated time sources with
/// real processing: when the radio is a loopback driver, slot-boundary tasks
/// must complete before the simulation advances.
pub struct SyncExecutor {
    inner: Arc<dyn TaskExecutor>,
}

impl SyncExecutor {
    pub fn new(inner: Arc<dyn TaskExecutor>) -> Self {
        Self { inner }
    }
}

impl TaskExecutor for SyncExecutor {
    fn execute(&self, task: Task) -> bool {
        let done = Arc::new((Mutex::new(false), Condvar::new()));
        let task_done = Arc::clone(&done);

        let accepted = self.inner.execute(Box::new(move || {
            task();
            let (lock, condvar) = &*task_done;
            *lock.lock() = true;
            condvar.notify_one();
        }));

        if accepted {
            let (lock, condvar) = &*done;
            let mut finished = lock.lock();
            while !*finished {
                condvar.wait(&mut finished);
            }
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::affinity::{CpuMask, RtPriority};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_sync_executor_runs_task_before_returning() {
        let mut worker = TaskWorker::new("sync_target", 16);
        let exec: Arc<dyn TaskExecutor> = Arc::new(WorkerExecutor::new(&worker));
        let sync = SyncExecutor::new(exec);

        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        assert!(sync.execute(Box::new(move || {
            std::thread::sleep(Duration::from_millis(10));
            r.store(true, Ordering::SeqCst);
        })));
        assert!(ran.load(Ordering::SeqCst), "task must complete before execute returns");

        worker.stop();
    }

    #[test]
    fn test_sync_executor_propagates_rejection() {
        let mut worker = TaskWorker::new("sync_reject", 8);
        worker.stop();
        let exec: Arc<dyn TaskExecutor> = Arc::new(WorkerExecutor::new(&worker).silent());
        let sync = SyncExecutor::new(exec);

        assert!(!sync.execute(Box::new(|| {})));
    }

    #[test]
    fn test_two_priority_lanes_into_one_worker() {
        let mut worker = TaskWorker::with_attributes(
            "lanes",
            &[8, 8],
            RtPriority::none(),
            CpuMask::unpinned(),
        );
        let timer_exec = WorkerExecutor::with_priority(&worker, TaskPriority::Max);
        let ctrl_exec = WorkerExecutor::with_priority(&worker, TaskPriority::Min);

        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let c1 = Arc::clone(&count);
            let c2 = Arc::clone(&count);
            assert!(timer_exec.execute(Box::new(move || {
                c1.fetch_add(1, Ordering::SeqCst);
            })));
            assert!(ctrl_exec.execute(Box::new(move || {
                c2.fetch_add(1, Ordering::SeqCst);
            })));
        }
        worker.stop();
        assert_eq!(count.load(Ordering::SeqCst), 8);
    }
}
