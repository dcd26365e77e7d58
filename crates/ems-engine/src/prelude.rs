//! # ems-engine::prelude
//!
//! A convenience module re-exporting the most commonly used types from the
//! engine and its dependencies, for downstream crates that wire a simulation
//! together.

pub use crate::bootstrap::{self, Collaborators};
pub use crate::dispatcher::Dispatcher;
pub use crate::entities::{
    Ambulance, AmbulanceHandle, AmbulanceKind, AmbulanceState, Emergency, EmergencyHandle,
    EmergencyState, Hospital, HospitalKind, Triage,
};
pub use crate::kernel::{Kernel, KernelHandle};
pub use crate::persistence::{NullPersistence, PersistenceSink, SqlitePersistence};
pub use crate::routing::{HaversineRouter, RoadRouter, Segment};
pub use crate::world::{RosterSet, SimulationContext, World};

pub use ems_types::config::{CallDelayRates, RngSeed, SimulationConfig};
pub use ems_types::errors::{ConfigError, EmsError};
pub use ems_types::geo::Coordinate;
pub use ems_types::id::{AmbulanceId, EmergencyId, EventId, HospitalId};
pub use ems_types::time::{SimTime, SIM_EPOCH, TIME_INFINITY};
