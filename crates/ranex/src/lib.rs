// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # RANEX - Real-time executor substrate for 5G RAN stacks
//!
//! Maps the logical processing stages of a base-station stack (radio
//! front-end, PHY encode/decode, scheduler, control-plane procedures) onto a
//! fixed topology of OS worker threads and thread pools, and provides the
//! single-subscriber async event primitive used to sequence multi-step
//! control procedures without blocking worker threads.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ranex::{AppConfig, RadioConfig, SdrConfig, PhyThreadProfile, UpperPhyConfig, WorkerTopology};
//!
//! let cfg = AppConfig {
//!     radio: RadioConfig::Sdr(SdrConfig {
//!         device_driver: "zmq".into(),
//!         profile: PhyThreadProfile::Blocking,
//!     }),
//!     upper_phy: UpperPhyConfig::default(),
//!     nof_cells: 1,
//!     cpu_core_budget: None,
//! };
//!
//! let mut topology = WorkerTopology::build(&cfg);
//! let ctrl = topology.executor("du_ctrl_exec");
//! assert!(ctrl.execute(Box::new(|| { /* control procedure step */ })));
//! topology.stop();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                       External collaborators                       |
//! |    scheduler | PHY layers | radio abstraction | control plane      |
//! +--------------------------------------------------------------------+
//! |                     Named executor registry                        |
//! |    role name -> TaskExecutor, built once, immutable afterwards     |
//! +--------------------------------------------------------------------+
//! |                        Worker topology                             |
//! |    TaskWorker (priority lanes) | TaskWorkerPool | SyncExecutor     |
//! +--------------------------------------------------------------------+
//! |              Async transactions and entity lifetime                |
//! |    EventSource/EventObserver | EntityRepository (ordered teardown) |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`WorkerTopology`] | Builds and owns all workers, publishes named executors |
//! | [`exec::TaskExecutor`] | `submit(task) -> accepted` handle bound to one worker/pool |
//! | [`EventSource`] / [`EventObserver`] | One-shot single-subscriber async transaction |
//! | [`EntityRepository`] | Bounded entity table with serialized async teardown |
//! | [`TimerService`] | Process-wide timer wheel backing event timeouts |
//!
//! ## Concurrency model
//!
//! Workers run a tight dequeue-execute loop; no thread executes two tasks
//! concurrently, and a worker's priority lanes are drained strictly in
//! order. Queues are bounded; a full lane rejects the submission and the
//! caller applies its fallback (drop-and-log by default). Control-plane
//! state is mutated only via tasks submitted to the control worker
//! (single-writer discipline by construction, not by locking).

pub mod config;
pub mod event;
pub mod exec;
pub mod repository;
pub mod timers;
pub mod topology;

pub use config::{AppConfig, PhyThreadProfile, RadioConfig, SdrConfig, UpperPhyConfig};
pub use event::{EventObserver, EventSource};
pub use exec::{Task, TaskExecutor, TaskPriority};
pub use repository::{EntityId, EntityRepository, KeyedTaskSequencer, LaneToken};
pub use timers::{TimerService, UniqueTimer};
pub use topology::WorkerTopology;
