// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Executor topology builder.
//!
//! Consumes the deployment configuration and constructs the full set of
//! workers, worker pools and named executors the rest of the stack resolves
//! by role (`"du_ctrl_exec"`, `"upper_pusch_exec"`, ...). Built once at
//! startup; the registry is immutable afterwards and consumers never address
//! threads directly.
//!
//! Failure semantics follow two classes. Duplicate registrations and missing
//! required workers are configuration-integrity bugs and panic with a
//! diagnostic. CPU affinity exhaustion and host-thread shortfalls are logged
//! and degrade (unpinned threads, reduced parallelism).

use crate::config::{
    AppConfig, PhyThreadProfile, RadioConfig, UpperPhyConfig, PDSCH_POOL_QUEUE_SIZE,
    TASK_WORKER_QUEUE_SIZE,
};
use crate::exec::{
    AffinityManager, CpuMask, PoolExecutor, RtPriority, SyncExecutor, TaskExecutor, TaskPriority,
    TaskWorker, TaskWorkerPool, WorkerExecutor,
};
use std::collections::HashMap;
use std::sync::Arc;

/// The complete worker/pool/executor set for one process.
///
/// Dropping the topology (or calling [`stop`](Self::stop)) joins every
/// thread. Workers created before a failed (panicking) construction are
/// joined during unwind through their own `Drop`, so partial construction
/// never leaks threads.
pub struct WorkerTopology {
    workers: HashMap<String, TaskWorker>,
    pools: HashMap<String, TaskWorkerPool>,
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
    dl_executors: Vec<Arc<dyn TaskExecutor>>,
    affinity: AffinityManager,
}

impl WorkerTopology {
    /// Build the topology for `cfg`.
    ///
    /// Logs configuration advisories, decides blocking mode from the radio
    /// driver, then instantiates control-plane, upper-PHY and radio workers.
    pub fn build(cfg: &AppConfig) -> Self {
        cfg.validate();

        let mut topo = Self {
            workers: HashMap::new(),
            pools: HashMap::new(),
            executors: HashMap::new(),
            dl_executors: Vec::new(),
            affinity: match cfg.cpu_core_budget {
                Some(limit) => AffinityManager::new(limit),
                None => AffinityManager::with_host_budget(),
            },
        };

        let blocking = cfg.radio.is_blocking_mode();
        topo.create_du_cu_executors(blocking, &cfg.upper_phy);
        topo.create_radio_executors(cfg);
        topo
    }

    // ========================================================================
    // Registry access
    // ========================================================================

    /// Resolve an executor by role name. Panics for unknown roles: consumers
    /// are wired against the deployment configuration, so a miss is a bug.
    pub fn executor(&self, role: &str) -> Arc<dyn TaskExecutor> {
        self.try_executor(role)
            .unwrap_or_else(|| panic!("no executor registered for role {}", role))
    }

    /// Resolve an executor by role name, `None` when absent.
    pub fn try_executor(&self, role: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(role).cloned()
    }

    /// All registered role names, sorted.
    pub fn executor_roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = self.executors.keys().cloned().collect();
        roles.sort();
        roles
    }

    /// Downlink executors for the upper PHY, one per configured DL worker.
    pub fn dl_executors(&self) -> &[Arc<dyn TaskExecutor>] {
        &self.dl_executors
    }

    /// Names of all single-thread workers, sorted.
    pub fn worker_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of all worker pools, sorted.
    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Cores handed out to pinned workers so far.
    pub fn reserved_cores(&self) -> usize {
        self.affinity.reserved()
    }

    /// Join every worker and pool thread. Idempotent; order across workers
    /// is unspecified but complete.
    pub fn stop(&mut self) {
        for worker in self.workers.values_mut() {
            worker.stop();
        }
        for pool in self.pools.values_mut() {
            pool.stop();
        }
    }

    // ========================================================================
    // Construction helpers
    // ========================================================================

    fn create_worker(&mut self, name: &str, queue_size: usize) {
        self.create_worker_with(name, &[queue_size], RtPriority::none(), CpuMask::unpinned());
    }

    fn create_worker_with(
        &mut self,
        name: &str,
        lane_sizes: &[usize],
        prio: RtPriority,
        mask: CpuMask,
    ) {
        let worker = TaskWorker::with_attributes(name, lane_sizes, prio, mask);
        assert!(
            self.workers.insert(name.to_string(), worker).is_none(),
            "unable to create worker {}: name already registered",
            name
        );
    }

    fn create_worker_pool(
        &mut self,
        name: &str,
        nof_workers: usize,
        queue_size: usize,
        prio: RtPriority,
    ) {
        let pool = TaskWorkerPool::new(name, nof_workers, queue_size, prio);
        assert!(
            self.pools.insert(name.to_string(), pool).is_none(),
            "unable to create worker pool {}: name already registered",
            name
        );
    }

    fn worker(&self, name: &str) -> &TaskWorker {
        self.workers
            .get(name)
            .unwrap_or_else(|| panic!("required worker {} is missing", name))
    }

    fn register(&mut self, role: &str, exec: Arc<dyn TaskExecutor>) {
        assert!(
            self.executors.insert(role.to_string(), exec).is_none(),
            "duplicate executor role {}",
            role
        );
    }

    fn worker_exec(&self, worker_name: &str) -> Arc<dyn TaskExecutor> {
        Arc::new(WorkerExecutor::new(self.worker(worker_name)))
    }

    fn lane_exec(&self, worker_name: &str, prio: TaskPriority) -> Arc<dyn TaskExecutor> {
        Arc::new(WorkerExecutor::with_priority(self.worker(worker_name), prio))
    }

    fn pool_exec(&self, pool_name: &str) -> Arc<dyn TaskExecutor> {
        let pool = self
            .pools
            .get(pool_name)
            .unwrap_or_else(|| panic!("required worker pool {} is missing", pool_name));
        Arc::new(PoolExecutor::new(pool))
    }

    // ========================================================================
    // Control plane + upper PHY
    // ========================================================================

    fn create_du_cu_executors(&mut self, blocking: bool, upper: &UpperPhyConfig) {
        // Aggregate UE worker plus two dual-lane priority workers: a control
        // worker with a short high-priority lane for low-latency procedures,
        // and the per-slot cell worker whose max lane is reserved for
        // timer-critical work.
        self.create_worker("gnb_ue", 512);
        self.create_worker_with(
            "gnb_ctrl",
            &[64, TASK_WORKER_QUEUE_SIZE],
            RtPriority::max_minus(2),
            CpuMask::unpinned(),
        );
        self.create_worker_with(
            "du_cell",
            &[8, TASK_WORKER_QUEUE_SIZE],
            RtPriority::max_minus(2),
            CpuMask::unpinned(),
        );

        let cu_cp = self.lane_exec("gnb_ctrl", TaskPriority::Min);
        self.register("cu_cp_exec", cu_cp);
        let cu_up = self.worker_exec("gnb_ue");
        self.register("cu_up_exec", cu_up);
        // User-plane PDU ingress drops silently under overload; upstream flow
        // control owns that signal.
        let gtpu = Arc::new(WorkerExecutor::new(self.worker("gnb_ue")).silent());
        self.register("gtpu_pdu_exec", gtpu);
        let du_ctrl = self.lane_exec("gnb_ctrl", TaskPriority::Min);
        self.register("du_ctrl_exec", du_ctrl);
        let du_timer = self.lane_exec("gnb_ctrl", TaskPriority::Max);
        self.register("du_timer_exec", du_timer);
        let du_ue = self.worker_exec("gnb_ue");
        self.register("du_ue_exec", du_ue);
        let du_cell = self.lane_exec("du_cell", TaskPriority::Min);
        self.register("du_cell_exec", du_cell);

        // In blocking mode the slot indication must not outrun processing:
        // the simulated radio's time source advances only when the slot task
        // completed.
        let du_slot: Arc<dyn TaskExecutor> = if blocking {
            Arc::new(SyncExecutor::new(
                self.lane_exec("du_cell", TaskPriority::Max),
            ))
        } else {
            self.lane_exec("du_cell", TaskPriority::Max)
        };
        self.register("du_slot_exec", du_slot);

        if blocking {
            self.create_worker_with(
                "phy_worker",
                &[TASK_WORKER_QUEUE_SIZE],
                RtPriority::max(),
                CpuMask::unpinned(),
            );
            let pusch = self.worker_exec("phy_worker");
            self.register("upper_pusch_exec", pusch);
            let pucch = self.worker_exec("phy_worker");
            self.register("upper_pucch_exec", pucch);
            let prach = self.worker_exec("phy_worker");
            self.register("upper_prach_exec", prach);
            let dl = self.worker_exec("phy_worker");
            self.register("upper_phy_dl_exec#0", Arc::clone(&dl));
            self.dl_executors.push(dl);
        } else {
            // PUSCH/PUCCH decode is per-transport-block independent work;
            // it scales horizontally on a pool.
            self.create_worker_pool(
                "upper_phy_ul",
                upper.nof_ul_threads.max(1),
                TASK_WORKER_QUEUE_SIZE,
                RtPriority::max_minus(20),
            );
            let pusch = self.pool_exec("upper_phy_ul");
            self.register("upper_pusch_exec", pusch);
            let pucch = self.pool_exec("upper_phy_ul");
            self.register("upper_pucch_exec", pucch);

            self.create_worker_with(
                "phy_prach",
                &[TASK_WORKER_QUEUE_SIZE],
                RtPriority::max_minus(2),
                CpuMask::unpinned(),
            );
            let prach = self.worker_exec("phy_prach");
            self.register("upper_prach_exec", prach);

            // DL encode is a strictly ordered per-cell pipeline: one worker
            // per configured DL thread, never a pool.
            for i in 0..upper.nof_dl_threads.max(1) {
                let worker_name = format!("upper_phy_dl#{}", i);
                self.create_worker_with(
                    &worker_name,
                    &[TASK_WORKER_QUEUE_SIZE],
                    RtPriority::max_minus(10),
                    CpuMask::unpinned(),
                );
                let dl = self.worker_exec(&worker_name);
                self.register(&format!("upper_phy_dl_exec#{}", i), Arc::clone(&dl));
                self.dl_executors.push(dl);
            }
        }

        if upper.nof_pdsch_threads > 1 {
            self.create_worker_pool(
                "pdsch",
                upper.nof_pdsch_threads,
                PDSCH_POOL_QUEUE_SIZE,
                RtPriority::max_minus(10),
            );
            let pdsch = self.pool_exec("pdsch");
            self.register("upper_pdsch_exec", pdsch);
        }
    }

    // ========================================================================
    // Radio front-end
    // ========================================================================

    fn create_radio_executors(&mut self, cfg: &AppConfig) {
        match &cfg.radio {
            RadioConfig::Fronthaul => self.create_fronthaul_executors(cfg.nof_cells),
            RadioConfig::Sdr(sdr) => {
                let profile = if sdr.is_simulated() {
                    PhyThreadProfile::Blocking
                } else {
                    sdr.profile
                };
                self.create_lower_phy_executors(profile);
            }
        }
    }

    /// One pinned worker per fronthaul role; affinity is best-effort.
    fn create_fronthaul_worker(
        &mut self,
        name: &str,
        role: &str,
        priority_from_max: u8,
        queue_size: usize,
    ) {
        let mask = match self.affinity.reserve_core() {
            Ok(core) => {
                log::debug!("[ranex] affinity {} for worker {}", core, name);
                CpuMask::single(core)
            }
            Err(e) => {
                log::warn!(
                    "[ranex] could not reserve a core for worker {} ({}), running unpinned",
                    name,
                    e
                );
                CpuMask::unpinned()
            }
        };
        self.create_worker_with(
            name,
            &[queue_size],
            RtPriority::max_minus(priority_from_max),
            mask,
        );
        let exec = self.worker_exec(name);
        self.register(role, exec);
    }

    fn create_fronthaul_executors(&mut self, nof_cells: usize) {
        // Timing first: it gets the best core and a one-slot queue so a
        // stalled consumer surfaces immediately.
        self.create_fronthaul_worker("ru_timing", "ru_timing_exec", 0, 1);

        for i in 0..nof_cells {
            // Per-cell triad: message codification, transmission, reception.
            self.create_fronthaul_worker(
                &format!("ru_dl_{}", i),
                &format!("ru_dl_exec#{}", i),
                5,
                TASK_WORKER_QUEUE_SIZE,
            );
            self.create_fronthaul_worker(
                &format!("ru_tx_{}", i),
                &format!("ru_tx_exec#{}", i),
                1,
                TASK_WORKER_QUEUE_SIZE,
            );
            self.create_fronthaul_worker(&format!("ru_rx_{}", i), &format!("ru_rx_exec#{}", i), 1, 1);
        }
    }

    fn create_lower_phy_executors(&mut self, profile: PhyThreadProfile) {
        // Radio driver worker and the statistics printer.
        self.create_worker("radio", TASK_WORKER_QUEUE_SIZE);
        let radio = self.worker_exec("radio");
        self.register("radio_exec", radio);
        self.create_worker("ru_stats_worker", 1);
        let stats = self.worker_exec("ru_stats_worker");
        self.register("ru_printer_exec", stats);

        match profile {
            PhyThreadProfile::Blocking => {
                log::info!("[ranex] lower PHY in executor blocking mode");
                // Everything shares the upper PHY worker so simulated slots
                // and processing advance in lock-step.
                for role in [
                    "lower_prach_exec",
                    "lower_phy_tx_exec",
                    "lower_phy_rx_exec",
                    "lower_phy_dl_exec",
                    "lower_phy_ul_exec",
                ] {
                    let exec = self.worker_exec("phy_worker");
                    self.register(role, exec);
                }
            }
            PhyThreadProfile::Single => {
                log::info!("[ranex] lower PHY in single executor mode");
                self.create_worker_with(
                    "lower_phy",
                    &[128],
                    RtPriority::max(),
                    CpuMask::unpinned(),
                );
                for role in [
                    "lower_phy_tx_exec",
                    "lower_phy_rx_exec",
                    "lower_phy_dl_exec",
                    "lower_phy_ul_exec",
                ] {
                    let exec = self.worker_exec("lower_phy");
                    self.register(role, exec);
                }
                let prach = self.worker_exec("phy_prach");
                self.register("lower_prach_exec", prach);
            }
            PhyThreadProfile::Dual => {
                log::info!("[ranex] lower PHY in dual executor mode");
                self.create_worker_with(
                    "lower_phy_dl",
                    &[128],
                    RtPriority::max(),
                    CpuMask::unpinned(),
                );
                self.create_worker_with(
                    "lower_phy_ul",
                    &[2],
                    RtPriority::max_minus(1),
                    CpuMask::unpinned(),
                );
                let tx = self.worker_exec("lower_phy_dl");
                self.register("lower_phy_tx_exec", tx);
                let rx = self.worker_exec("lower_phy_ul");
                self.register("lower_phy_rx_exec", rx);
                let dl = self.worker_exec("lower_phy_dl");
                self.register("lower_phy_dl_exec", dl);
                let ul = self.worker_exec("lower_phy_ul");
                self.register("lower_phy_ul_exec", ul);
                let prach = self.worker_exec("phy_prach");
                self.register("lower_prach_exec", prach);
            }
            PhyThreadProfile::Quad => {
                log::info!("[ranex] lower PHY in quad executor mode");
                self.create_worker_with(
                    "lower_phy_tx",
                    &[128],
                    RtPriority::max(),
                    CpuMask::unpinned(),
                );
                self.create_worker_with(
                    "lower_phy_rx",
                    &[1],
                    RtPriority::max_minus(2),
                    CpuMask::unpinned(),
                );
                self.create_worker_with(
                    "lower_phy_dl",
                    &[128],
                    RtPriority::max_minus(1),
                    CpuMask::unpinned(),
                );
                self.create_worker_with(
                    "lower_phy_ul",
                    &[128],
                    RtPriority::max_minus(3),
                    CpuMask::unpinned(),
                );
                for (role, worker) in [
                    ("lower_phy_tx_exec", "lower_phy_tx"),
                    ("lower_phy_rx_exec", "lower_phy_rx"),
                    ("lower_phy_dl_exec", "lower_phy_dl"),
                    ("lower_phy_ul_exec", "lower_phy_ul"),
                ] {
                    let exec = self.worker_exec(worker);
                    self.register(role, exec);
                }
                let prach = self.worker_exec("phy_prach");
                self.register("lower_prach_exec", prach);
            }
        }
    }
}

impl Drop for WorkerTopology {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SdrConfig;

    fn simulated_config() -> AppConfig {
        AppConfig {
            radio: RadioConfig::Sdr(SdrConfig {
                device_driver: "zmq".into(),
                profile: PhyThreadProfile::Single,
            }),
            upper_phy: UpperPhyConfig::default(),
            nof_cells: 1,
            cpu_core_budget: Some(4),
        }
    }

    #[test]
    #[should_panic(expected = "name already registered")]
    fn test_duplicate_worker_name_is_a_fault() {
        let mut topo = WorkerTopology::build(&simulated_config());
        topo.create_worker("gnb_ue", 8);
    }

    #[test]
    #[should_panic(expected = "duplicate executor role")]
    fn test_duplicate_role_is_a_fault() {
        let mut topo = WorkerTopology::build(&simulated_config());
        let exec = topo.worker_exec("gnb_ue");
        topo.register("du_ctrl_exec", exec);
    }

    #[test]
    #[should_panic(expected = "is missing")]
    fn test_missing_required_worker_is_a_fault() {
        let topo = WorkerTopology::build(&simulated_config());
        let _ = topo.worker_exec("nonexistent_worker");
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut topo = WorkerTopology::build(&simulated_config());
        topo.stop();
        topo.stop();
    }
}
