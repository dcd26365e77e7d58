//! # ems-engine::world
//!
//! The process-wide arenas and the shared context threaded through every
//! ambulance, emergency, and dispatcher constructor. The rosters are
//! read-mostly after bootstrap, so rather than reach for ambient statics we
//! carry them inside an explicit [`SimulationContext`] that every long-lived
//! process clones a handle to.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::NaiveDateTime;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Exp};

use ems_types::config::SimulationConfig;
use ems_types::time::SimTime;

use crate::entities::{Ambulance, AmbulanceHandle, Emergency, EmergencyHandle, Hospital};
use crate::kernel::KernelHandle;
use crate::persistence::PersistenceSink;
use crate::rng::{Recorder, RngDiscipline};
use crate::routing::RoadRouter;

/// The parsed, validated input to a simulation run, handed from the roster
/// parsers to [`crate::bootstrap::run`] as a single value.
pub struct RosterSet {
    pub ambulances: Vec<Ambulance>,
    pub emergencies: Vec<Emergency>,
    pub hospitals: Vec<Hospital>,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

/// Everything an ambulance, emergency, or dispatcher process needs besides its
/// own state: the kernel handle, the external collaborators, the read-only
/// hospital roster, and the resolved configuration. Cheap to clone — every
/// field is either `Copy`, an `Rc`, or a `KernelHandle` (itself an `Rc`
/// wrapper) — so each process clones its own `SimulationContext` rather than
/// sharing a single mutable one.
#[derive(Clone)]
pub struct SimulationContext {
    pub kernel: KernelHandle,
    pub router: Rc<dyn RoadRouter>,
    pub persistence: Rc<dyn PersistenceSink>,
    pub hospitals: Rc<Vec<Hospital>>,
    pub config: Rc<SimulationConfig>,
    /// Wall-clock origin (`conf.start_time`) used only to format persistence
    /// timestamps; the kernel clock itself is relative seconds.
    pub start_time: NaiveDateTime,
    /// Simulation horizon in seconds from `start_time`, i.e. `end_time - start_time`.
    pub horizon: SimTime,
    /// The master RNG driving every sampled delay, shared with the roster parser so
    /// a given seed produces a single continuous draw sequence across roster
    /// construction and dispatch.
    pub rng: Rc<RefCell<ChaCha20Rng>>,
    pub recorder: Rc<RefCell<Recorder>>,
}

impl SimulationContext {
    /// Draws from an exponential distribution with the given rate, recording the
    /// draw under `site` via the shared [`RngDiscipline`].
    pub fn sample_exp(&self, site: &'static str, rate: f64) -> f64 {
        let mut rng = self.rng.borrow_mut();
        let mut recorder = self.recorder.borrow_mut();
        let mut discipline = RngDiscipline::new(&mut rng, &mut recorder, site);
        Exp::new(rate)
            .expect("call delay rate must be positive")
            .sample(&mut discipline)
    }
}

/// The process-wide, arena-backed state of a simulation run: the ambulance and
/// emergency handles (owned by `Rc<RefCell<_>>`, shared non-owning among the
/// dispatcher and their own processes) and the immutable hospital sequence.
pub struct World {
    pub ambulances: Vec<AmbulanceHandle>,
    pub emergencies: Vec<EmergencyHandle>,
    pub hospitals: Rc<Vec<Hospital>>,
}

impl World {
    /// Moves a parsed [`RosterSet`] into arena handles, returning the world
    /// plus the derived simulation horizon in seconds.
    pub fn from_roster(roster: RosterSet) -> (Self, SimTime) {
        let horizon = (roster.end_time - roster.start_time).num_seconds().max(0) as SimTime;

        let ambulances = roster
            .ambulances
            .into_iter()
            .map(|a| Rc::new(RefCell::new(a)))
            .collect();
        let emergencies = roster
            .emergencies
            .into_iter()
            .map(|e| Rc::new(RefCell::new(e)))
            .collect();
        let hospitals = Rc::new(roster.hospitals);

        (
            World {
                ambulances,
                emergencies,
                hospitals,
            },
            horizon,
        )
    }
}
