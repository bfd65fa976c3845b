// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Deployment configuration consumed by the topology builder.
//!
//! All queue-depth constants live here. Malformed values (e.g. a cell count
//! the host cannot serve with dedicated threads) produce logged advisories,
//! never fatal errors; the topology degrades instead.

/// Default depth of a worker task queue.
pub const TASK_WORKER_QUEUE_SIZE: usize = 2048;

/// Depth of the PDSCH codeblock pool queue: two full slots of codeblocks.
pub const PDSCH_POOL_QUEUE_SIZE: usize = 256;

/// Threads a fronthaul cell needs for full performance (receive, transmit,
/// timing).
pub const FRONTHAUL_THREADS_PER_CELL: usize = 3;

/// Thread topology profile for the lower physical layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyThreadProfile {
    /// Single worker shared with the upper PHY; executors block so simulated
    /// time advances in lock-step with processing.
    Blocking,
    /// One dedicated worker for all lower-PHY stages.
    Single,
    /// Split downlink/uplink workers.
    Dual,
    /// Fully split per-stage workers (TX, RX, DL, UL).
    Quad,
}

/// SDR radio configuration.
#[derive(Debug, Clone)]
pub struct SdrConfig {
    /// Radio driver name; `"zmq"` selects the simulated loopback driver.
    pub device_driver: String,
    /// Lower-PHY thread profile. Forced to [`PhyThreadProfile::Blocking`]
    /// when the loopback driver is active.
    pub profile: PhyThreadProfile,
}

impl SdrConfig {
    /// True when the loopback driver is selected and slot executors must
    /// block to keep simulated time honest.
    pub fn is_simulated(&self) -> bool {
        self.device_driver == "zmq"
    }
}

/// Radio front-end kind.
#[derive(Debug, Clone)]
pub enum RadioConfig {
    /// Open Fronthaul: hardware-attached, per-cell pinned worker triads.
    Fronthaul,
    /// SDR driver (real hardware or simulated loopback).
    Sdr(SdrConfig),
}

impl RadioConfig {
    /// True when downlink/uplink/slot executors must be synchronous.
    pub fn is_blocking_mode(&self) -> bool {
        match self {
            RadioConfig::Fronthaul => false,
            RadioConfig::Sdr(sdr) => sdr.is_simulated(),
        }
    }
}

/// Per-stage thread counts for the upper physical layer.
#[derive(Debug, Clone)]
pub struct UpperPhyConfig {
    pub nof_ul_threads: usize,
    pub nof_dl_threads: usize,
    /// PDSCH pool threads; a pool is only created for counts above one.
    pub nof_pdsch_threads: usize,
}

impl Default for UpperPhyConfig {
    fn default() -> Self {
        Self {
            nof_ul_threads: 1,
            nof_dl_threads: 1,
            nof_pdsch_threads: 1,
        }
    }
}

/// Full deployment configuration for one process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub radio: RadioConfig,
    pub upper_phy: UpperPhyConfig,
    pub nof_cells: usize,
    /// Cores available to the affinity manager; host parallelism when unset.
    pub cpu_core_budget: Option<usize>,
}

impl AppConfig {
    /// Check the configuration for values the host cannot serve well.
    ///
    /// Returns the advisories (also logged); the configuration stays usable
    /// either way.
    pub fn validate(&self) -> Vec<String> {
        let mut advisories = Vec::new();

        if self.nof_cells == 0 {
            advisories.push("configuration has no cells; radio executors will be idle".into());
        }

        if matches!(self.radio, RadioConfig::Fronthaul) {
            let host = host_thread_budget();
            let needed = self.nof_cells * FRONTHAUL_THREADS_PER_CELL + 1;
            if host < needed {
                advisories.push(format!(
                    "detected {} threads for Open Fronthaul, but a minimum of {} are needed \
                     to achieve good performance",
                    host, needed
                ));
            }
        }

        if self.upper_phy.nof_ul_threads == 0 || self.upper_phy.nof_dl_threads == 0 {
            advisories.push(
                "upper PHY thread counts of zero are clamped to one worker per stage".into(),
            );
        }

        for advisory in &advisories {
            log::warn!("[ranex] {}", advisory);
        }
        advisories
    }
}

/// Threads the host can dedicate to fronthaul work after reserving a few for
/// the rest of the stack.
pub(crate) fn host_thread_budget() -> usize {
    let hw = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4);
    hw.max(4).saturating_sub(3).max(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zmq_driver_selects_blocking_mode() {
        let cfg = RadioConfig::Sdr(SdrConfig {
            device_driver: "zmq".into(),
            profile: PhyThreadProfile::Single,
        });
        assert!(cfg.is_blocking_mode());

        let cfg = RadioConfig::Sdr(SdrConfig {
            device_driver: "uhd".into(),
            profile: PhyThreadProfile::Single,
        });
        assert!(!cfg.is_blocking_mode());

        assert!(!RadioConfig::Fronthaul.is_blocking_mode());
    }

    #[test]
    fn test_validate_flags_zero_cells() {
        let cfg = AppConfig {
            radio: RadioConfig::Fronthaul,
            upper_phy: UpperPhyConfig::default(),
            nof_cells: 0,
            cpu_core_budget: Some(4),
        };
        assert!(!cfg.validate().is_empty());
    }

    #[test]
    fn test_validate_accepts_nominal_sdr_config() {
        let cfg = AppConfig {
            radio: RadioConfig::Sdr(SdrConfig {
                device_driver: "uhd".into(),
                profile: PhyThreadProfile::Quad,
            }),
            upper_phy: UpperPhyConfig::default(),
            nof_cells: 1,
            cpu_core_budget: None,
        };
        assert!(cfg.validate().is_empty());
    }
}
