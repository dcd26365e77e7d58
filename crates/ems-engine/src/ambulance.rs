//! # ems-engine::ambulance
//!
//! The ambulance lifecycle: a shift calendar wrapping a rescue state machine,
//! expressed as `async fn` coroutines over the kernel's [`Timeout`]/[`Latch`]
//! primitives.
//!
//! `to_emergency`/`to_base` race a latch (`preempt_signal`) against travel
//! completion to model preemption. Both races collapse into a single
//! [`TravelOutcome`] returned by `travel_to`, which callers match on
//! directly.

use std::cell::RefCell;
use std::rc::Rc;

use futures::FutureExt;

use ems_types::geo::Coordinate;
use ems_types::time::{SimTime, TIME_INFINITY};

use crate::dispatcher::Dispatcher;
use crate::entities::{Ambulance, AmbulanceHandle, AmbulanceKind, AmbulanceState, EmergencyHandle, EmergencyState, HospitalKind};
use crate::routing::Segment;
use crate::world::SimulationContext;

/// Outcome of racing a single travel leg against preemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TravelOutcome {
    Completed,
    Preempted,
}

pub(crate) fn waiting(a: &Ambulance) -> bool {
    matches!(a.state, AmbulanceState::WaitingAtBase)
}

pub(crate) fn assigned(a: &Ambulance) -> bool {
    matches!(
        a.state,
        AmbulanceState::Assigned
            | AmbulanceState::ToEmergency
            | AmbulanceState::OnTreatment
            | AmbulanceState::ToHospital
            | AmbulanceState::Cleaning
    )
}

/// Whether `amb` can be preempted in favor of `incoming`, per the conditions
/// in `Ambulance::preemptable`.
pub fn preemptable(ctx: &SimulationContext, amb: &Ambulance, incoming: &EmergencyHandle) -> bool {
    if !ctx.config.preemptable {
        return false;
    }
    match amb.state {
        AmbulanceState::ToBase => true,
        AmbulanceState::ToEmergency => {
            let incoming = incoming.borrow();
            let current = match &amb.current_emergency {
                Some(e) => e.borrow(),
                None => return false,
            };
            let incoming_urgent =
                matches!(incoming.triage, crate::entities::Triage::Red | crate::entities::Triage::Yellow);
            let current_deferrable =
                matches!(current.triage, crate::entities::Triage::Green | crate::entities::Triage::White);
            let still_en_route = amb.travel_start + amb.travel_time > ctx.kernel.now();
            incoming_urgent && current_deferrable && still_en_route
        }
        _ => false,
    }
}

/// Triggers the ambulance's preempt latch, waking whichever of
/// `to_emergency`/`to_base` is currently racing it.
pub fn preempt(amb: &AmbulanceHandle) {
    amb.borrow_mut().preempt_signal.trigger_and_rearm();
}

/// The full shift calendar for one ambulance: off-duty, a timeout to the next
/// shift start, on-duty (announced to the dispatcher), repeat until the
/// simulation horizon. A 24h ambulance (`shift_start + 86400 == shift_end`)
/// just starts the service once and waits for the end.
pub async fn shift(ctx: SimulationContext, dispatcher: Rc<RefCell<Dispatcher>>, amb: AmbulanceHandle) {
    debug_assert_eq!(ctx.kernel.now(), 0, "shift() assumes it is spawned at t=0");

    use chrono::Timelike;
    let offset = ctx.start_time.time().num_seconds_from_midnight() as SimTime;

    let limit = ctx.horizon;
    let (shift_start, shift_end, is_24h) = {
        let a = amb.borrow();
        (a.shift_start, a.shift_end, a.is_24h())
    };

    let current_daytime = ctx.kernel.now() % ems_types::time::SECONDS_PER_DAY + offset;
    let current_daystart = (ctx.kernel.now() / ems_types::time::SECONDS_PER_DAY) * ems_types::time::SECONDS_PER_DAY;

    let (mut start_duty, mut end_duty) = if shift_start > shift_end {
        (
            current_daystart.saturating_sub(current_daytime).saturating_sub(shift_start).max(0),
            current_daystart.saturating_sub(current_daytime) + shift_end,
        )
    } else {
        (
            current_daystart.saturating_sub(current_daytime) + shift_start,
            current_daystart.saturating_sub(current_daytime) + shift_end,
        )
    };

    if is_24h {
        tracing::info!(ambulance = amb.borrow().id, "ambulance starts 24h service");
        start_duty = current_daystart.saturating_sub(current_daytime);
        end_duty = limit;
        {
            let mut a = amb.borrow_mut();
            a.state = AmbulanceState::WaitingAtBase;
            a.start_duty = start_duty;
            a.end_duty = end_duty;
            a.current_position = a.base;
        }
        ctx.persistence.log_ambulance(&amb.borrow(), ctx.kernel.now(), ctx.start_time);
        crate::dispatcher::ambulance_available(ctx.clone(), dispatcher, amb.clone());
        return;
    }

    while start_duty <= limit {
        if start_duty >= ctx.kernel.now() {
            tracing::debug!(ambulance = amb.borrow().id, start_duty, "ambulance scheduled for service");
            amb.borrow_mut().state = AmbulanceState::Unavailable;
            ctx.kernel.timeout(start_duty - ctx.kernel.now()).await;
        }
        tracing::info!(ambulance = amb.borrow().id, end_duty, "ambulance starts service");
        {
            let mut a = amb.borrow_mut();
            a.state = AmbulanceState::WaitingAtBase;
            a.start_duty = start_duty;
            a.end_duty = end_duty;
            a.current_position = a.base;
        }
        ctx.persistence.log_ambulance(&amb.borrow(), ctx.kernel.now(), ctx.start_time);
        crate::dispatcher::ambulance_available(ctx.clone(), dispatcher.clone(), amb.clone());

        ctx.kernel.timeout(end_duty - ctx.kernel.now()).await;
        crate::dispatcher::ambulance_unavailable(ctx.clone(), dispatcher.clone(), amb.clone()).await;
        amb.borrow_mut().state = AmbulanceState::Unavailable;
        ctx.persistence.log_ambulance(&amb.borrow(), ctx.kernel.now(), ctx.start_time);
        tracing::info!(ambulance = amb.borrow().id, "ambulance ends service");

        if start_duty == 0 && shift_start > 0 {
            start_duty = current_daystart.saturating_sub(current_daytime) + shift_start;
        } else {
            start_duty += ems_types::time::SECONDS_PER_DAY;
        }
        end_duty += ems_types::time::SECONDS_PER_DAY;
    }
}

/// `Ambulance::assign`: marks the ambulance `ASSIGNED` and spawns the rescue.
/// Never called for an `MV` (medical vehicles only ride along a pair).
pub fn assign(
    ctx: SimulationContext,
    dispatcher: Rc<RefCell<Dispatcher>>,
    amb: AmbulanceHandle,
    e: EmergencyHandle,
    initial_segment: Segment,
) {
    debug_assert_ne!(amb.borrow().kind, AmbulanceKind::Mv);
    amb.borrow_mut().state = AmbulanceState::Assigned;
    tracing::info!(ambulance = amb.borrow().id, emergency = e.borrow().id, "emergency assigned to ambulance");
    let ctx2 = ctx.clone();
    ctx.kernel.spawn(async move {
        rescue_started(ctx2, dispatcher, amb, e, initial_segment).await;
    });
}

/// `Ambulance::rescue_started`: a zero-delay barrier (so preemption of the
/// prior occupant resolves before this handoff runs), then drives the
/// emergency end-to-end.
pub async fn rescue_started(
    ctx: SimulationContext,
    dispatcher: Rc<RefCell<Dispatcher>>,
    amb: AmbulanceHandle,
    e: EmergencyHandle,
    initial_segment: Segment,
) {
    ctx.kernel.timeout(0).await;
    debug_assert!(amb.borrow().current_emergency.is_none());
    {
        let mut a = amb.borrow_mut();
        a.current_segment = Some(initial_segment);
        a.current_emergency = Some(e.clone());
    }
    {
        let mut em = e.borrow_mut();
        em.start_serving_time = ctx.kernel.now();
        em.state = EmergencyState::AmbulanceAssigned;
    }
    to_emergency(ctx, dispatcher, amb, false).await;
}

/// `Ambulance::assign_pair`: marks both vehicles `ASSIGNED` and spawns the
/// paired rescue.
pub fn assign_pair(
    ctx: SimulationContext,
    dispatcher: Rc<RefCell<Dispatcher>>,
    amb: AmbulanceHandle,
    e: EmergencyHandle,
    initial_segment: Segment,
    mv: AmbulanceHandle,
    mv_segment: Segment,
) {
    debug_assert_ne!(amb.borrow().kind, AmbulanceKind::Mv);
    debug_assert_eq!(mv.borrow().kind, AmbulanceKind::Mv);
    amb.borrow_mut().state = AmbulanceState::Assigned;
    mv.borrow_mut().state = AmbulanceState::Assigned;
    tracing::info!(
        ambulance = amb.borrow().id,
        medical_vehicle = mv.borrow().id,
        emergency = e.borrow().id,
        "emergency assigned to ambulance and medical vehicle"
    );
    let ctx2 = ctx.clone();
    ctx.kernel.spawn(async move {
        pair_rescue_started(ctx2, dispatcher, amb, e, initial_segment, mv, mv_segment).await;
    });
}

/// `Ambulance::pair_rescue_started`: both vehicles travel, and both treat,
/// concurrently — `futures::join!` stands in for `sim.all_of`.
pub async fn pair_rescue_started(
    ctx: SimulationContext,
    dispatcher: Rc<RefCell<Dispatcher>>,
    amb: AmbulanceHandle,
    e: EmergencyHandle,
    initial_segment: Segment,
    mv: AmbulanceHandle,
    mv_segment: Segment,
) {
    ctx.kernel.timeout(0).await;
    debug_assert!(amb.borrow().current_emergency.is_none());
    debug_assert!(mv.borrow().current_emergency.is_none());
    {
        let mut a = amb.borrow_mut();
        a.current_segment = Some(initial_segment);
        a.current_emergency = Some(e.clone());
    }
    {
        let mut m = mv.borrow_mut();
        m.current_segment = Some(mv_segment);
        m.current_emergency = Some(e.clone());
    }
    {
        let mut em = e.borrow_mut();
        em.start_serving_time = ctx.kernel.now();
        em.state = EmergencyState::AmbulanceAssigned;
    }

    futures::join!(
        to_emergency(ctx.clone(), dispatcher.clone(), amb.clone(), true),
        to_emergency(ctx.clone(), dispatcher.clone(), mv.clone(), true)
    );
    futures::join!(
        treatment(ctx.clone(), dispatcher.clone(), amb),
        treatment(ctx, dispatcher, mv)
    );
}

/// `Ambulance::to_emergency`: travels to the scene. A solo leg races
/// preemption; a paired leg (the `MV` partner of an ALS/BLS dispatch) never
/// does, since it is escorting rather than leading the response.
pub async fn to_emergency(
    ctx: SimulationContext,
    dispatcher: Rc<RefCell<Dispatcher>>,
    amb: AmbulanceHandle,
    pair: bool,
) {
    amb.borrow_mut().state = AmbulanceState::ToEmergency;
    let e = amb.borrow().current_emergency.clone().expect("to_emergency requires an assigned emergency");
    let s = amb.borrow().current_segment.expect("to_emergency requires a current segment");
    ctx.persistence.log_ambulance_rescue(&amb.borrow(), &e.borrow(), ctx.kernel.now(), ctx.start_time);
    tracing::info!(
        ambulance = amb.borrow().id,
        emergency = e.borrow().id,
        duration = s.duration,
        distance = s.distance,
        "ambulance going to emergency"
    );

    if !pair {
        match travel_to(ctx.clone(), amb.clone(), s).await {
            TravelOutcome::Preempted => {
                tracing::info!(ambulance = amb.borrow().id, emergency = e.borrow().id, "ambulance preempted, discarding emergency");
                e.borrow_mut().start_serving_time = TIME_INFINITY;
                amb.borrow_mut().rescue_finished_signal.trigger_and_rearm();
                {
                    let mut a = amb.borrow_mut();
                    a.state = AmbulanceState::Preempted;
                }
                ctx.persistence.log_ambulance_rescue(&amb.borrow(), &e.borrow(), ctx.kernel.now(), ctx.start_time);
                {
                    let mut em = e.borrow_mut();
                    em.state = EmergencyState::WaitingAmbulance;
                }
                amb.borrow_mut().current_emergency = None;
                crate::dispatcher::preempted_emergency(ctx.clone(), dispatcher, e);
                return;
            }
            TravelOutcome::Completed => {}
        }
    } else {
        travel_to(ctx.clone(), amb.clone(), s).await;
    }

    {
        let mut em = e.borrow_mut();
        em.reaching_time = em.reaching_time.min(ctx.kernel.now());
    }
    {
        let em = e.borrow();
        if !matches!(em.triage, crate::entities::Triage::Green | crate::entities::Triage::White)
            && em.reaching_time.saturating_sub(em.occurring_time)
                > ems_types::config::constants::SERVICE_TIME_THRESHOLD
        {
            tracing::warn!(emergency = em.id, "emergency service time not met");
        }
    }
    debug_assert!(
        crate::routing::haversine(amb.borrow().current_position, e.borrow().place) < 0.1,
        "ambulance should be at the emergency scene after travel completes"
    );

    if !pair {
        treatment(ctx, dispatcher, amb).await;
    }
}

/// `Ambulance::treatment`: a fixed dwell for the emergency's sampled
/// `treatment_duration`, then either a hospital transfer or a direct return
/// to base. Never preempted once treatment has started.
pub async fn treatment(ctx: SimulationContext, dispatcher: Rc<RefCell<Dispatcher>>, amb: AmbulanceHandle) {
    amb.borrow_mut().state = AmbulanceState::OnTreatment;
    let e = amb.borrow().current_emergency.clone().expect("treatment requires an assigned emergency");
    e.borrow_mut().state = EmergencyState::OnTreatment;
    ctx.persistence.log_ambulance_rescue(&amb.borrow(), &e.borrow(), ctx.kernel.now(), ctx.start_time);
    let duration = e.borrow().treatment_duration;
    tracing::info!(ambulance = amb.borrow().id, emergency = e.borrow().id, duration, "ambulance treating emergency");

    ctx.kernel.timeout(duration).await;

    if e.borrow().needs_hospital {
        to_hospital(ctx, dispatcher, amb).await;
    } else {
        ctx.persistence.log_rescue(&e.borrow(), &amb.borrow(), ctx.start_time);
        e.borrow_mut().state = EmergencyState::Ended;
        amb.borrow_mut().current_emergency = None;
        to_base(ctx, dispatcher, amb).await;
    }
}

/// `Ambulance::to_hospital`: picks the nearest compatible hospital by travel
/// duration, then (ALS/BLS only) discharges, logs the completed rescue, and
/// cleans; an `MV` partner skips discharge/cleaning entirely and heads
/// straight back to base.
pub async fn to_hospital(ctx: SimulationContext, dispatcher: Rc<RefCell<Dispatcher>>, amb: AmbulanceHandle) {
    amb.borrow_mut().state = AmbulanceState::ToHospital;
    let e = amb.borrow().current_emergency.clone().expect("to_hospital requires an assigned emergency");
    e.borrow_mut().state = EmergencyState::ToHospital;
    ctx.persistence.log_ambulance_rescue(&amb.borrow(), &e.borrow(), ctx.kernel.now(), ctx.start_time);
    tracing::info!(ambulance = amb.borrow().id, emergency = e.borrow().id, "ambulance finished treating emergency");

    let (place, needed_kind) = {
        let em = e.borrow();
        (em.place, em.needed_hospital_type)
    };
    let compatible: Vec<_> = ctx
        .hospitals
        .iter()
        .filter(|h| match needed_kind {
            Some(HospitalKind::Spoke) => h.kind != HospitalKind::Pediatric,
            Some(k) => h.kind == k,
            None => true,
        })
        .collect();
    debug_assert!(!compatible.is_empty(), "no compatible hospital for this emergency's needed type");

    let destinations: Vec<Coordinate> = compatible.iter().map(|h| h.place).collect();
    let segments = ctx.router.compute_distances(&[place], &destinations);
    let (hospital, segment) = compatible
        .iter()
        .zip(segments.iter())
        .min_by(|a, b| a.1.duration.total_cmp(&b.1.duration))
        .map(|(h, s)| ((*h).clone(), *s))
        .expect("compatible hospital list is non-empty");

    tracing::info!(
        ambulance = amb.borrow().id,
        hospital = hospital.id,
        emergency = e.borrow().id,
        duration = segment.duration,
        "ambulance going to hospital"
    );
    e.borrow_mut().assigned_hospital = Some(hospital.id);

    travel_to(ctx.clone(), amb.clone(), segment).await;
    tracing::info!(ambulance = amb.borrow().id, hospital = hospital.id, emergency = e.borrow().id, "ambulance reached hospital");
    e.borrow_mut().at_hospital_time = ctx.kernel.now();

    if amb.borrow().kind != AmbulanceKind::Mv {
        ctx.persistence.log_rescue(&e.borrow(), &amb.borrow(), ctx.start_time);
        tracing::info!(ambulance = amb.borrow().id, emergency = e.borrow().id, hospital = hospital.id, "ambulance discharging emergency at hospital");
        ctx.kernel
            .timeout(ems_types::config::constants::DISCHARGING_TIME)
            .await;
        e.borrow_mut().state = EmergencyState::Ended;
        crate::dispatcher::emergency_served(ctx.clone(), dispatcher.clone(), e);
        amb.borrow_mut().current_emergency = None;
        cleaning(ctx, dispatcher, amb).await;
    } else {
        amb.borrow_mut().current_emergency = None;
        to_base(ctx, dispatcher, amb).await;
    }
}

/// `Ambulance::cleaning`: a fixed dwell before the final leg back to base.
pub async fn cleaning(ctx: SimulationContext, dispatcher: Rc<RefCell<Dispatcher>>, amb: AmbulanceHandle) {
    amb.borrow_mut().state = AmbulanceState::Cleaning;
    ctx.persistence.log_ambulance(&amb.borrow(), ctx.kernel.now(), ctx.start_time);
    tracing::info!(ambulance = amb.borrow().id, "ambulance cleaning");
    ctx.kernel
        .timeout(ems_types::config::constants::CLEANING_TIME)
        .await;
    to_base(ctx, dispatcher, amb).await;
}

/// `Ambulance::to_base`: the final, always-preemptable leg. If the return
/// would finish before `end_duty` and within the distance threshold it is
/// announced to the dispatcher as re-assignable immediately (`TO_BASE`);
/// otherwise the ambulance goes dark (`UNAVAILABLE`) until it physically
/// arrives. Either way, `rescue_finished_signal` fires once travel settles,
/// releasing anyone awaiting `Dispatcher::ambulance_unavailable`.
pub async fn to_base(ctx: SimulationContext, dispatcher: Rc<RefCell<Dispatcher>>, amb: AmbulanceHandle) {
    let (current_position, base, end_duty) = {
        let a = amb.borrow();
        (current_position(&ctx, &a), a.base, a.end_duty)
    };
    let segment = ctx.router.compute_distances(&[current_position], &[base])[0];
    let end_travel = ctx.kernel.now() + segment.duration.round() as SimTime;

    if end_travel < end_duty && segment.distance < ctx.config.distance_threshold_km {
        amb.borrow_mut().state = AmbulanceState::ToBase;
        ctx.persistence.log_ambulance(&amb.borrow(), ctx.kernel.now(), ctx.start_time);
        tracing::info!(ambulance = amb.borrow().id, duration = segment.duration, distance = segment.distance, "ambulance going to base");
        crate::dispatcher::assignable_ambulance(ctx.clone(), dispatcher.clone(), amb.clone());
    } else {
        if end_travel > end_duty {
            tracing::info!(ambulance = amb.borrow().id, end_duty, "ambulance ends shift, going to base");
        } else {
            tracing::info!(ambulance = amb.borrow().id, "ambulance going to base (not preemptable)");
        }
        amb.borrow_mut().state = AmbulanceState::Unavailable;
        ctx.persistence.log_ambulance(&amb.borrow(), ctx.kernel.now(), ctx.start_time);
    }

    let outcome = travel_to(ctx.clone(), amb.clone(), segment).await;
    match outcome {
        TravelOutcome::Completed => {
            if end_duty > ctx.kernel.now() {
                tracing::info!(ambulance = amb.borrow().id, "ambulance back to base and waiting");
                amb.borrow_mut().state = AmbulanceState::WaitingAtBase;
                crate::dispatcher::assignable_ambulance(ctx.clone(), dispatcher.clone(), amb.clone());
            } else {
                tracing::info!(ambulance = amb.borrow().id, end_duty, "ambulance back to base, finished shift");
                amb.borrow_mut().state = AmbulanceState::Unavailable;
            }
            ctx.persistence.log_ambulance(&amb.borrow(), ctx.kernel.now(), ctx.start_time);
        }
        TravelOutcome::Preempted => {
            amb.borrow_mut().state = AmbulanceState::Preempted;
            ctx.persistence.log_ambulance(&amb.borrow(), ctx.kernel.now(), ctx.start_time);
            tracing::info!(ambulance = amb.borrow().id, "ambulance preempted while going back to base");
        }
    }
    amb.borrow_mut().rescue_finished_signal.trigger_and_rearm();
}

/// `Ambulance::travel_to`: races a single timeout against the ambulance's
/// preempt latch. On completion the position snaps to the segment's endpoint;
/// on preemption it is frozen wherever [`current_position`] interpolates it to
/// be right now.
pub async fn travel_to(ctx: SimulationContext, amb: AmbulanceHandle, s: Segment) -> TravelOutcome {
    let preempt_latch = {
        let mut a = amb.borrow_mut();
        a.current_segment = Some(s);
        a.current_route = None;
        a.moving = true;
        a.travel_start = ctx.kernel.now();
        a.travel_time = s.duration.round() as SimTime;
        a.preempt_signal.latch()
    };

    let travel_time = amb.borrow().travel_time;
    let timeout = ctx.kernel.timeout(travel_time);

    futures::select_biased! {
        _ = Box::pin(timeout).fuse() => {
            let mut a = amb.borrow_mut();
            a.current_position = s.end_point;
            a.moving = false;
            TravelOutcome::Completed
        }
        _ = Box::pin(preempt_latch.latch()).fuse() => {
            let pos = current_position(&ctx, &amb.borrow());
            let mut a = amb.borrow_mut();
            a.current_position = pos;
            TravelOutcome::Preempted
        }
    }
}

/// `Ambulance::current_position`: while stationary, the last snapped
/// position; while moving, interpolates along the decomposed route by
/// accumulated leg duration. Falls back to the segment's endpoint once the
/// whole route has elapsed. Highway status on a segment is carried as
/// informational-only and never affects this calculation — see DESIGN.md.
fn current_position(ctx: &SimulationContext, amb: &Ambulance) -> Coordinate {
    if !amb.moving {
        return amb.current_position;
    }
    let segment = amb
        .current_segment
        .expect("moving ambulance must have a current segment");
    let route = amb
        .current_route
        .clone()
        .unwrap_or_else(|| ctx.router.compute_route(segment.start_point, segment.end_point));

    let now = ctx.kernel.now();
    let finish_time = amb.travel_start + amb.travel_time;
    if finish_time > now {
        let mut accumulated = amb.travel_start;
        let mut position = segment.start_point;
        for leg in &route {
            position = leg.start_point;
            if accumulated > now {
                return position;
            }
            accumulated += leg.duration.round() as SimTime;
        }
    }
    segment.end_point
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Emergency, Triage};
    use crate::kernel::Kernel;
    use crate::persistence::NullPersistence;
    use crate::routing::HaversineRouter;
    use ems_types::config::{CallDelayRates, RngSeed, SimulationConfig};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::cell::RefCell;
    use std::rc::Rc;

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

    fn test_ambulance() -> AmbulanceHandle {
        Rc::new(RefCell::new(Ambulance::new(
            1,
            "unit".into(),
            AmbulanceKind::Als,
            Coordinate::new(45.0, 7.0),
            0,
            0,
            0,
        )))
    }

    #[test]
    fn travel_to_completes_and_snaps_position_to_endpoint() {
        let mut kernel = Kernel::new();
        let ctx = test_context(&kernel);
        let amb = test_ambulance();
        let dest = Coordinate::new(45.1, 7.1);
        let segment = ctx.router.compute_distances(&[amb.borrow().base], &[dest])[0];

        let outcome = Rc::new(RefCell::new(None));
        let outcome2 = outcome.clone();
        let ctx2 = ctx.clone();
        let amb2 = amb.clone();
        kernel.spawn(async move {
            let result = travel_to(ctx2, amb2, segment).await;
            *outcome2.borrow_mut() = Some(result);
        });
        kernel.run();

        assert_eq!(*outcome.borrow(), Some(TravelOutcome::Completed));
        assert_eq!(amb.borrow().current_position, dest);
    }

    #[test]
    fn travel_to_preempted_mid_flight_leaves_moving_flag_set() {
        let mut kernel = Kernel::new();
        let ctx = test_context(&kernel);
        let amb = test_ambulance();
        let dest = Coordinate::new(46.0, 8.0);
        let segment = ctx.router.compute_distances(&[amb.borrow().base], &[dest])[0];

        let outcome = Rc::new(RefCell::new(None));
        let outcome2 = outcome.clone();
        let ctx2 = ctx.clone();
        let amb2 = amb.clone();
        kernel.spawn(async move {
            let result = travel_to(ctx2, amb2, segment).await;
            *outcome2.borrow_mut() = Some(result);
        });

        let amb3 = amb.clone();
        kernel.spawn(async move {
            amb3.borrow_mut().preempt_signal.trigger_and_rearm();
        });
        kernel.run();

        assert_eq!(*outcome.borrow(), Some(TravelOutcome::Preempted));
        // `travel_to` only clears `moving` on the completed-travel branch; a
        // preempted leg leaves it set, matching the original's `ambulance.cpp`.
        assert!(amb.borrow().moving);
    }

    #[test]
    fn preemptable_is_false_when_config_disallows_it() {
        let kernel = Kernel::new();
        let mut ctx = test_context(&kernel);
        Rc::get_mut(&mut ctx.config).unwrap().preemptable = false;
        let mut a = Ambulance::new(1, "x".into(), AmbulanceKind::Als, Coordinate::new(0.0, 0.0), 0, 0, 0);
        a.state = AmbulanceState::ToBase;
        let e = Rc::new(RefCell::new(Emergency::new(
            2,
            "Udine".into(),
            Triage::Red,
            Coordinate::new(0.0, 0.0),
            0,
            false,
            None,
            200,
            0,
        )));
        assert!(!preemptable(&ctx, &a, &e));
    }

    #[test]
    fn preemptable_to_base_is_always_preemptable() {
        let kernel = Kernel::new();
        let ctx = test_context(&kernel);
        let mut a = Ambulance::new(1, "x".into(), AmbulanceKind::Als, Coordinate::new(0.0, 0.0), 0, 0, 0);
        a.state = AmbulanceState::ToBase;
        let e = Rc::new(RefCell::new(Emergency::new(
            2,
            "Udine".into(),
            Triage::Red,
            Coordinate::new(0.0, 0.0),
            0,
            false,
            None,
            200,
            0,
        )));
        assert!(preemptable(&ctx, &a, &e));
    }

    #[test]
    fn overnight_shift_calendar_advances_start_duty_with_one_time_correction() {
        // shift_start=22:00, shift_end=06:00, origin at midnight. Mirrors the
        // arithmetic of the original `Ambulance::shift()`: the first duty
        // period is already open at t=0, the second opens at 22:00 of day 1
        // (a 16h off-duty gap since the roster day starts mid-duty), not at
        // the naive "previous end_duty + 86400".
        let mut kernel = Kernel::new();
        let mut ctx = test_context(&kernel);
        ctx.horizon = 200_000;
        let amb = Rc::new(RefCell::new(Ambulance::new(
            1,
            "overnight".into(),
            AmbulanceKind::Als,
            Coordinate::new(45.0, 7.0),
            79_200, // 22:00
            21_600, // 06:00
            0,
        )));
        let dispatcher = Rc::new(RefCell::new(Dispatcher::new()));

        let ctx2 = ctx.clone();
        let dispatcher2 = dispatcher.clone();
        let amb2 = amb.clone();
        kernel.spawn(async move {
            shift(ctx2, dispatcher2, amb2).await;
        });
        kernel.run();

        assert_eq!(kernel.now(), 194_400);
        assert_eq!(amb.borrow().start_duty, 165_600);
        assert_eq!(amb.borrow().end_duty, 194_400);
        assert_eq!(amb.borrow().state, AmbulanceState::Unavailable);
    }

    #[test]
    fn preemptable_to_emergency_requires_urgent_incoming_and_deferrable_current() {
        let kernel = Kernel::new();
        let ctx = test_context(&kernel);
        let mut a = Ambulance::new(1, "x".into(), AmbulanceKind::Als, Coordinate::new(0.0, 0.0), 0, 0, 0);
        a.state = AmbulanceState::ToEmergency;
        a.travel_start = 0;
        a.travel_time = 1_000;
        a.current_emergency = Some(Rc::new(RefCell::new(Emergency::new(
            10,
            "Udine".into(),
            Triage::Green,
            Coordinate::new(0.0, 0.0),
            0,
            false,
            None,
            200,
            0,
        ))));
        let incoming = Rc::new(RefCell::new(Emergency::new(
            11,
            "Udine".into(),
            Triage::Red,
            Coordinate::new(0.0, 0.0),
            0,
            false,
            None,
            200,
            0,
        )));
        assert!(preemptable(&ctx, &a, &incoming));

        // Current is also RED: not deferrable, so not preemptable.
        a.current_emergency.as_ref().unwrap().borrow_mut().triage = Triage::Red;
        assert!(!preemptable(&ctx, &a, &incoming));
    }
}
