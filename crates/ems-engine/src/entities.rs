//! # ems-engine::entities
//!
//! Value types for the entity model: hospitals, ambulances, emergencies, and the
//! triage/type/state enumerations. Ambulances and emergencies are held by
//! `Rc<RefCell<_>>` handle in process-wide arenas (see [`crate::world`]) and shared,
//! non-owning, among the dispatcher and their own process.

use std::cell::RefCell;
use std::rc::Rc;

use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Exp};

use ems_types::config::constants::{TREATMENT_DURATION_FLOOR, TREATMENT_DURATION_MEAN};
use ems_types::geo::Coordinate;
use ems_types::id::{AmbulanceId, EmergencyId, HospitalId};
use ems_types::time::{SimTime, TIME_INFINITY};

use crate::kernel::LatchHandle;
use crate::rng::{Recorder, RngDiscipline};
use crate::routing::Segment;

/// Urgency code. BLACK marks the deceased and is never dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Triage {
    Red,
    Yellow,
    Green,
    White,
    Black,
}

impl Triage {
    pub const ALL: [Triage; 5] = [
        Triage::Red,
        Triage::Yellow,
        Triage::Green,
        Triage::White,
        Triage::Black,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Triage::Red => "RED",
            Triage::Yellow => "YELLOW",
            Triage::Green => "GREEN",
            Triage::White => "WHITE",
            Triage::Black => "BLACK",
        }
    }
}

impl std::fmt::Display for Triage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Triage {
    type Err = ems_types::errors::EmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RED" => Ok(Triage::Red),
            "YELLOW" => Ok(Triage::Yellow),
            "GREEN" => Ok(Triage::Green),
            "WHITE" => Ok(Triage::White),
            "BLACK" => Ok(Triage::Black),
            other => Err(ems_types::errors::EmsError::UnknownToken {
                kind: "triage",
                token: other.to_string(),
            }),
        }
    }
}

/// Ambulance vehicle type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbulanceKind {
    Als,
    Bls,
    Mv,
}

impl AmbulanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AmbulanceKind::Als => "ALS",
            AmbulanceKind::Bls => "BLS",
            AmbulanceKind::Mv => "MV",
        }
    }
}

impl std::fmt::Display for AmbulanceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AmbulanceKind {
    type Err = ems_types::errors::EmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALS" => Ok(AmbulanceKind::Als),
            "BLS" => Ok(AmbulanceKind::Bls),
            "MV" => Ok(AmbulanceKind::Mv),
            other => Err(ems_types::errors::EmsError::UnknownToken {
                kind: "ambulance type",
                token: other.to_string(),
            }),
        }
    }
}

/// Hospital category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HospitalKind {
    Hub,
    Spoke,
    Fip,
    Pediatric,
}

impl HospitalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HospitalKind::Hub => "HUB",
            HospitalKind::Spoke => "SPOKE",
            HospitalKind::Fip => "FIP",
            HospitalKind::Pediatric => "PEDIATRIC",
        }
    }

    /// The short token used in the hospital roster format (`H`/`S`/`PPI`/`K`).
    pub fn to_roster_token(self) -> &'static str {
        match self {
            HospitalKind::Hub => "H",
            HospitalKind::Spoke => "S",
            HospitalKind::Fip => "PPI",
            HospitalKind::Pediatric => "K",
        }
    }

    pub fn from_roster_token(s: &str) -> Result<Self, ems_types::errors::EmsError> {
        match s {
            "H" => Ok(HospitalKind::Hub),
            "S" => Ok(HospitalKind::Spoke),
            "PPI" => Ok(HospitalKind::Fip),
            "K" => Ok(HospitalKind::Pediatric),
            other => Err(ems_types::errors::EmsError::UnknownToken {
                kind: "hospital type",
                token: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for HospitalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ambulance lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbulanceState {
    Unavailable,
    WaitingAtBase,
    Assigned,
    ToEmergency,
    OnTreatment,
    ToHospital,
    Cleaning,
    ToBase,
    Preempted,
}

impl AmbulanceState {
    /// Ordinal used by the dispatcher's candidate sort, mirroring `int(current_state)`
    /// over the enum's declaration order (`ambulance.hpp`): `WAITING_AT_BASE` sorts
    /// before every in-motion state, and among preemptable movers `TO_EMERGENCY`
    /// sorts before `TO_BASE`.
    pub fn sort_ordinal(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for AmbulanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AmbulanceState::Unavailable => "UNAVAILABLE",
            AmbulanceState::WaitingAtBase => "WAITING_AT_BASE",
            AmbulanceState::Assigned => "ASSIGNED",
            AmbulanceState::ToEmergency => "TO_EMERGENCY",
            AmbulanceState::OnTreatment => "ON_TREATMENT",
            AmbulanceState::ToHospital => "TO_HOSPITAL",
            AmbulanceState::Cleaning => "CLEANING",
            AmbulanceState::ToBase => "TO_BASE",
            AmbulanceState::Preempted => "PREEMPTED",
        };
        f.write_str(s)
    }
}

/// Emergency lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyState {
    Unscheduled,
    Scheduled,
    WaitingAmbulance,
    AmbulanceAssigned,
    OnTreatment,
    ToHospital,
    Ended,
}

pub type AmbulanceHandle = Rc<RefCell<Ambulance>>;
pub type EmergencyHandle = Rc<RefCell<Emergency>>;

/// An immutable hospital entry, held in a process-wide ordered sequence.
#[derive(Debug, Clone)]
pub struct Hospital {
    pub id: HospitalId,
    pub description: String,
    pub place: Coordinate,
    pub kind: HospitalKind,
    pub index: usize,
}

/// One ambulance in the fleet, including its live lifecycle state. Shared by
/// `Rc<RefCell<_>>` between the dispatcher and its own process.
pub struct Ambulance {
    pub id: AmbulanceId,
    pub description: String,
    pub kind: AmbulanceKind,
    pub base: Coordinate,
    /// Daytime offset from midnight, in seconds.
    pub shift_start: SimTime,
    /// Daytime offset from midnight, in seconds.
    pub shift_end: SimTime,
    pub index: usize,

    pub state: AmbulanceState,
    pub current_position: Coordinate,
    pub current_segment: Option<Segment>,
    pub current_route: Option<Vec<Segment>>,
    pub moving: bool,
    pub travel_start: SimTime,
    pub travel_time: SimTime,
    pub start_duty: SimTime,
    pub end_duty: SimTime,
    pub current_emergency: Option<EmergencyHandle>,

    pub rescue_finished_signal: LatchHandle,
    pub preempt_signal: LatchHandle,
}

impl Ambulance {
    pub fn new(
        id: AmbulanceId,
        description: String,
        kind: AmbulanceKind,
        base: Coordinate,
        shift_start: SimTime,
        shift_end: SimTime,
        index: usize,
    ) -> Self {
        Self {
            id,
            description,
            kind,
            base,
            shift_start,
            shift_end,
            index,
            state: AmbulanceState::Unavailable,
            current_position: base,
            current_segment: None,
            current_route: None,
            moving: false,
            travel_start: 0,
            travel_time: 0,
            start_duty: 0,
            end_duty: 0,
            current_emergency: None,
            rescue_finished_signal: LatchHandle::default(),
            preempt_signal: LatchHandle::default(),
        }
    }

    /// Whether this ambulance spans midnight (`shift_end < shift_start`).
    pub fn is_overnight(&self) -> bool {
        self.shift_end < self.shift_start
    }

    /// Whether this ambulance is on a 24-hour shift (never goes off duty):
    /// `shift_end - shift_start == 86400`, regardless of where in the day
    /// `shift_start` itself falls.
    pub fn is_24h(&self) -> bool {
        self.shift_end
            .checked_sub(self.shift_start)
            .map(|d| d == ems_types::time::SECONDS_PER_DAY)
            .unwrap_or(false)
    }
}

/// An incoming emergency call.
pub struct Emergency {
    pub id: EmergencyId,
    pub municipality: String,
    pub triage: Triage,
    pub place: Coordinate,
    /// The roster timestamp, in seconds since the simulation's `start_time`.
    pub timestamp: SimTime,
    pub needs_hospital: bool,
    pub needed_hospital_type: Option<HospitalKind>,
    pub treatment_duration: SimTime,

    pub occurring_time: SimTime,
    pub start_serving_time: SimTime,
    pub reaching_time: SimTime,
    pub at_hospital_time: SimTime,

    pub state: EmergencyState,
    pub assigned_hospital: Option<HospitalId>,
    pub index: usize,
}

impl Emergency {
    pub fn new(
        id: EmergencyId,
        municipality: String,
        triage: Triage,
        place: Coordinate,
        timestamp: SimTime,
        needs_hospital: bool,
        needed_hospital_type: Option<HospitalKind>,
        treatment_duration: SimTime,
        index: usize,
    ) -> Self {
        Self {
            id,
            municipality,
            triage,
            place,
            timestamp,
            needs_hospital,
            needed_hospital_type,
            treatment_duration,
            occurring_time: TIME_INFINITY,
            start_serving_time: TIME_INFINITY,
            reaching_time: TIME_INFINITY,
            at_hospital_time: TIME_INFINITY,
            state: EmergencyState::Unscheduled,
            assigned_hospital: None,
            index,
        }
    }

    /// Draws a treatment duration: a fixed floor plus an exponential component,
    /// matching `conf.treatment_duration_dist` in the roster constructor.
    pub fn sample_treatment_duration(rng: &mut ChaCha20Rng, recorder: &mut Recorder) -> SimTime {
        let mut discipline = RngDiscipline::new(rng, recorder, "emergency::treatment_duration");
        let draw = Exp::new(1.0 / TREATMENT_DURATION_MEAN)
            .expect("treatment duration mean must be positive")
            .sample(&mut discipline);
        TREATMENT_DURATION_FLOOR + draw.round() as SimTime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn triage_token_round_trips() {
        for t in Triage::ALL {
            assert_eq!(Triage::from_str(t.as_str()).unwrap(), t);
        }
    }

    #[test]
    fn ambulance_kind_token_round_trips() {
        for k in [AmbulanceKind::Als, AmbulanceKind::Bls, AmbulanceKind::Mv] {
            assert_eq!(AmbulanceKind::from_str(k.as_str()).unwrap(), k);
        }
    }

    #[test]
    fn hospital_kind_roster_token_round_trips() {
        for k in [
            HospitalKind::Hub,
            HospitalKind::Spoke,
            HospitalKind::Fip,
            HospitalKind::Pediatric,
        ] {
            assert_eq!(
                HospitalKind::from_roster_token(k.to_roster_token()).unwrap(),
                k
            );
        }
    }

    #[test]
    fn a_day_offset_start_with_exactly_86400s_duration_is_still_24h() {
        // shift_end - shift_start == 86400 is the whole rule, independent of
        // where shift_start itself falls in the day.
        let a = Ambulance::new(
            0,
            "test".into(),
            AmbulanceKind::Als,
            Coordinate::new(0.0, 0.0),
            8 * 3600,
            8 * 3600 + 86_400,
            0,
        );
        assert!(a.is_24h());
    }

    #[test]
    fn a_twelve_hour_dayshift_is_not_24h() {
        let a = Ambulance::new(
            0,
            "test".into(),
            AmbulanceKind::Als,
            Coordinate::new(0.0, 0.0),
            7 * 3600,
            19 * 3600,
            0,
        );
        assert!(!a.is_24h());
    }
}
