// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-key ordered task lanes over a shared executor.
//!
//! Tasks enqueued under the same key run strictly one after another, even
//! when a task suspends (awaits an event) before finishing; tasks under
//! different keys interleave freely on the executor. A lane task receives a
//! [`LaneToken`] and the next task for that key is dispatched only once the
//! token is released or dropped; moving the token into an event
//! continuation keeps the lane occupied across the suspension.

use crate::exec::TaskExecutor;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// A lane task: runs on the executor, owns its lane until the token goes.
pub type SequencedTask = Box<dyn FnOnce(LaneToken) + Send + 'static>;

#[derive(Default)]
struct Lane {
    /// A task for this key is running or suspended.
    busy: bool,
    pending: VecDeque<SequencedTask>,
}

struct SequencerInner {
    executor: Arc<dyn TaskExecutor>,
    lanes: Mutex<HashMap<u32, Lane>>,
}

impl SequencerInner {
    fn dispatch(self: &Arc<Self>, key: u32, task: SequencedTask) {
        let token = LaneToken {
            key,
            inner: Arc::clone(self),
            released: false,
        };
        let accepted = self.executor.execute(Box::new(move || task(token)));
        if !accepted {
            // The token inside the rejected closure is dropped with it,
            // which releases the lane and lets queued tasks proceed.
            log::error!(
                "[ranex] executor rejected lane task for key {}, task dropped",
                key
            );
        }
    }

    fn advance(self: &Arc<Self>, key: u32) {
        let next = {
            let mut lanes = self.lanes.lock();
            match lanes.get_mut(&key) {
                Some(lane) => match lane.pending.pop_front() {
                    Some(task) => Some(task),
                    None => {
                        lanes.remove(&key);
                        None
                    }
                },
                None => None,
            }
        };
        if let Some(task) = next {
            self.dispatch(key, task);
        }
    }
}

/// Multiplexes per-key FIFO lanes onto one executor.
#[derive(Clone)]
pub struct KeyedTaskSequencer {
    inner: Arc<SequencerInner>,
}

impl KeyedTaskSequencer {
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            inner: Arc::new(SequencerInner {
                executor,
                lanes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Enqueue `task` on `key`'s lane. Runs immediately when the lane is
    /// idle, otherwise after every earlier task of that key released its
    /// token.
    pub fn enqueue(&self, key: u32, task: SequencedTask) {
        let mut task = Some(task);
        let run_now = {
            let mut lanes = self.inner.lanes.lock();
            let lane = lanes.entry(key).or_default();
            if lane.busy {
                lane.pending.push_back(task.take().unwrap());
                false
            } else {
                lane.busy = true;
                true
            }
        };
        if run_now {
            self.inner.dispatch(key, task.take().unwrap());
        }
    }

    /// Number of keys with a running or queued task.
    pub fn active_lanes(&self) -> usize {
        self.inner.lanes.lock().len()
    }
}

/// Occupancy token for one lane step.
///
/// The next task for the key runs when this is released (or dropped). Move
/// it into an event continuation to keep the lane held across a suspension
/// point.
pub struct LaneToken {
    key: u32,
    inner: Arc<SequencerInner>,
    released: bool,
}

impl LaneToken {
    /// Key this token's lane belongs to.
    pub fn key(&self) -> u32 {
        self.key
    }

    /// Finish this lane step explicitly.
    pub fn release(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.inner.advance(self.key);
    }
}

impl Drop for LaneToken {
    fn drop(&mut self) {
        self.finish();
    }
}
