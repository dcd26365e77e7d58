//! # ems-types::config
//!
//! Strongly-typed configuration, deserialized by `ems-cli` from YAML or TOML and
//! threaded through to `ems-engine::bootstrap`: the simulation window, the
//! per-triage call-handling delay rates, the dispatch thresholds, and the RNG
//! seed.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A wrapper for the RNG seed to make its purpose clear at call sites.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RngSeed(pub u64);

/// Per-triage rate parameter (`λ`, in calls/second) for the exponential
/// call-handling delay drawn in `Dispatcher::new_emergency`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CallDelayRates {
    pub red: f64,
    pub yellow: f64,
    pub green: f64,
    pub white: f64,
}

impl Default for CallDelayRates {
    fn default() -> Self {
        // Conservative defaults; real scenarios should supply calibrated rates.
        Self {
            red: 1.0 / 60.0,
            yellow: 1.0 / 90.0,
            green: 1.0 / 120.0,
            white: 1.0 / 150.0,
        }
    }
}

/// The full set of configuration consumed by the core simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    #[serde(default = "default_preemptable")]
    pub preemptable: bool,
    #[serde(default)]
    pub call_delay_rates: CallDelayRates,
    /// Distance threshold (km) used throughout candidate filtering.
    pub distance_threshold_km: f64,
    /// Travel-time threshold (minutes) used throughout candidate filtering.
    pub time_threshold_min: f64,
    pub seed: RngSeed,
}

fn default_preemptable() -> bool {
    true
}

/// Fixed constants the core consumes; not configurable.
pub mod constants {
    use crate::time::SimTime;

    /// Informational SLA used for a warning log and the RED-pairing heuristic.
    pub const SERVICE_TIME_THRESHOLD: SimTime = 1_080;
    /// Wait after arriving at a hospital before notifying the dispatcher and
    /// entering cleaning (non-MV only).
    pub const DISCHARGING_TIME: SimTime = 180;
    /// Wait in the `CLEANING` state before departing for base.
    pub const CLEANING_TIME: SimTime = 600;
    /// Interval at which the dispatcher's cleanup loop sweeps the waiting queues.
    pub const CLEANUP_INTERVAL: SimTime = 43_200;
    /// Fixed floor of the sampled treatment duration.
    pub const TREATMENT_DURATION_FLOOR: SimTime = 200;
    /// Mean of the exponential component of the sampled treatment duration.
    pub const TREATMENT_DURATION_MEAN: f64 = 300.0;
    /// Fixed floor of the per-call call-handling delay, before the triage-specific
    /// exponential component is added.
    pub const CALL_DELAY_FLOOR: SimTime = 30;
}
