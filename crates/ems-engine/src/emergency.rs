//! # ems-engine::emergency
//!
//! The emergency lifecycle's only process: wait until the call occurs, then
//! hand it to the dispatcher. The roster loader that spawns one of these per
//! accepted call lives in `ems-cli`'s roster parser, not here.

use std::cell::RefCell;
use std::rc::Rc;

use crate::dispatcher::Dispatcher;
use crate::entities::{EmergencyHandle, EmergencyState};
use crate::world::SimulationContext;

/// `Emergency::generate`: waits until the call's scheduled instant, stamps the
/// actual occurring time, then awaits the dispatcher's matching decision.
/// Unlike a preempted rescue's handoff, this is awaited directly by whoever
/// spawns it (bootstrap).
pub async fn generate(ctx: SimulationContext, dispatcher: Rc<RefCell<Dispatcher>>, e: EmergencyHandle) {
    let delay = {
        let mut em = e.borrow_mut();
        em.state = EmergencyState::Scheduled;
        let delay = em.timestamp.saturating_sub(ctx.kernel.now());
        em.start_serving_time = ems_types::time::TIME_INFINITY;
        em.reaching_time = ems_types::time::TIME_INFINITY;
        em.at_hospital_time = ems_types::time::TIME_INFINITY;
        delay
    };

    ctx.kernel.timeout(delay).await;

    {
        let mut em = e.borrow_mut();
        em.occurring_time = ctx.kernel.now();
        em.state = EmergencyState::WaitingAmbulance;
    }
    tracing::info!(emergency = e.borrow().id, triage = %e.borrow().triage, "emergency call received");

    crate::dispatcher::new_emergency(ctx, dispatcher, e).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Emergency, Triage};
    use crate::kernel::Kernel;
    use crate::persistence::NullPersistence;
    use crate::routing::HaversineRouter;
    use ems_types::config::{CallDelayRates, RngSeed, SimulationConfig};
    use ems_types::geo::Coordinate;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn test_context(kernel: &Kernel) -> SimulationContext {
        let config = SimulationConfig {
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
            seed: RngSeed(7),
        };
        SimulationContext {
            kernel: kernel.handle(),
            router: Rc::new(HaversineRouter::default()),
            persistence: Rc::new(NullPersistence),
            hospitals: Rc::new(Vec::new()),
            start_time: config.start_time,
            horizon: 86_400,
            config: Rc::new(config),
            rng: Rc::new(RefCell::new(ChaCha20Rng::seed_from_u64(7))),
            recorder: Rc::new(RefCell::new(crate::rng::Recorder::new(7))),
        }
    }

    #[test]
    fn generate_waits_until_timestamp_then_hands_off_to_dispatcher() {
        let mut kernel = Kernel::new();
        let ctx = test_context(&kernel);
        let dispatcher = Rc::new(RefCell::new(Dispatcher::new()));
        let e = Rc::new(RefCell::new(Emergency::new(
            1,
            "Udine".into(),
            Triage::Black,
            Coordinate::new(45.0, 7.0),
            500,
            false,
            None,
            200,
            0,
        )));

        let ctx2 = ctx.clone();
        let dispatcher2 = dispatcher.clone();
        let e2 = e.clone();
        kernel.spawn(async move {
            generate(ctx2, dispatcher2, e2).await;
        });
        kernel.run();

        assert_eq!(kernel.now(), 500);
        assert_eq!(e.borrow().occurring_time, 500);
        // BLACK is never dispatched, so it stays off both of the dispatcher's queues.
        assert_eq!(dispatcher.borrow().waiting_count(), 0);
        assert_eq!(dispatcher.borrow().serving_count(), 0);
    }
}
