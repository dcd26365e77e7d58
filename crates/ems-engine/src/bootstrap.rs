//! # ems-engine::bootstrap
//!
//! Wires a parsed [`RosterSet`] into a runnable simulation: builds the world
//! arenas, constructs the shared [`SimulationContext`], spawns every
//! ambulance's `shift` process, every emergency's `generate` process, and the
//! dispatcher's `cleanup` sweep, then drains the kernel.

use std::cell::RefCell;
use std::rc::Rc;

use rand_chacha::ChaCha20Rng;
use rand::SeedableRng;

use ems_types::config::SimulationConfig;

use crate::ambulance;
use crate::dispatcher::{self, Dispatcher};
use crate::emergency;
use crate::kernel::Kernel;
use crate::persistence::PersistenceSink;
use crate::rng::Recorder;
use crate::routing::RoadRouter;
use crate::world::{RosterSet, SimulationContext, World};

/// Everything [`run`] needs beyond the roster: the collaborators a production
/// caller wires up (a real router, a real persistence sink) versus what a test
/// or `validate` run can default to ([`crate::routing::HaversineRouter`],
/// [`crate::persistence::NullPersistence`]).
pub struct Collaborators {
    pub router: Rc<dyn RoadRouter>,
    pub persistence: Rc<dyn PersistenceSink>,
}

/// Builds the world, spawns every process, and runs the kernel to completion.
/// Returns the constructed [`World`] so a caller can inspect final ambulance
/// positions or emergency outcomes after the run drains.
pub fn run(roster: RosterSet, config: SimulationConfig, collaborators: Collaborators) -> World {
    let seed = config.seed.0;
    let start_time = roster.start_time;
    let (world, horizon) = World::from_roster(roster);

    let kernel = Kernel::new();
    let ctx = SimulationContext {
        kernel: kernel.handle(),
        router: collaborators.router,
        persistence: collaborators.persistence,
        hospitals: world.hospitals.clone(),
        config: Rc::new(config),
        start_time,
        horizon,
        rng: Rc::new(RefCell::new(ChaCha20Rng::seed_from_u64(seed))),
        recorder: Rc::new(RefCell::new(Recorder::new(seed))),
    };

    let dispatcher = Rc::new(RefCell::new(Dispatcher::new()));

    tracing::info!(
        ambulances = world.ambulances.len(),
        emergencies = world.emergencies.len(),
        hospitals = world.hospitals.len(),
        horizon,
        "bootstrap: spawning simulation processes"
    );

    kernel.spawn({
        let ctx = ctx.clone();
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher::cleanup(ctx, dispatcher).await;
        }
    });

    for amb in &world.ambulances {
        let ctx = ctx.clone();
        let dispatcher = dispatcher.clone();
        let amb = amb.clone();
        kernel.spawn(async move {
            ambulance::shift(ctx, dispatcher, amb).await;
        });
    }

    for e in &world.emergencies {
        let ctx = ctx.clone();
        let dispatcher = dispatcher.clone();
        let e = e.clone();
        kernel.spawn(async move {
            emergency::generate(ctx, dispatcher, e).await;
        });
    }

    let mut kernel = kernel;
    kernel.run();

    tracing::info!(
        final_waiting = dispatcher.borrow().waiting_count(),
        final_serving = dispatcher.borrow().serving_count(),
        "bootstrap: simulation drained"
    );

    world
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Ambulance, AmbulanceKind, Emergency, Triage};
    use crate::persistence::NullPersistence;
    use crate::routing::HaversineRouter;
    use ems_types::config::{CallDelayRates, RngSeed};
    use ems_types::geo::Coordinate;

    fn test_config() -> SimulationConfig {
        SimulationConfig {
            start_time: chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            end_time: chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            preemptable: true,
            call_delay_rates: CallDelayRates::default(),
            distance_threshold_km: 15.0,
            time_threshold_min: 20.0,
            seed: RngSeed(11),
        }
    }

    #[test]
    fn a_lone_ambulance_serves_a_lone_emergency_and_drains() {
        let config = test_config();
        let ambulance = Ambulance::new(
            1,
            "unit-1".into(),
            AmbulanceKind::Bls,
            Coordinate::new(45.0, 7.0),
            0,
            86_400,
            0,
        );
        let emergency = Emergency::new(
            1,
            "Udine".into(),
            Triage::White,
            Coordinate::new(45.01, 7.01),
            200,
            false,
            None,
            200,
            0,
        );
        let roster = RosterSet {
            ambulances: vec![ambulance],
            emergencies: vec![emergency],
            hospitals: Vec::new(),
            start_time: config.start_time,
            end_time: config.end_time,
        };

        let collaborators = Collaborators {
            router: Rc::new(HaversineRouter::default()),
            persistence: Rc::new(NullPersistence),
        };

        let world = run(roster, config, collaborators);
        assert_eq!(world.emergencies.len(), 1);
        assert_eq!(
            world.emergencies[0].borrow().state,
            crate::entities::EmergencyState::Ended
        );
    }
}
