//! # ems-types::time
//!
//! Defines the representation of time within the simulation. Simulation time is a
//! monotonic integer clock in seconds — there is no sub-second resolution anywhere
//! in the domain (shifts, travel durations, treatment times are all whole seconds).

use serde::Deserializer;

/// The fundamental unit of time in the simulation, measured in seconds.
pub type SimTime = u64;

/// The start of simulation time.
pub const SIM_EPOCH: SimTime = 0;

/// Sentinel "infinity" used for emergency timestamp fields that have not yet been
/// reached (`start_serving_time`, `reaching_time`, `at_hospital_time` before they are
/// set).
pub const TIME_INFINITY: SimTime = SimTime::MAX;

/// One day, in seconds. Used by the ambulance shift calendar to advance `start_duty`
/// / `end_duty` day over day.
pub const SECONDS_PER_DAY: SimTime = 86_400;

/// Performs a checked addition on `SimTime`, returning an error on overflow.
pub fn checked_add(base: SimTime, offset: SimTime) -> Option<SimTime> {
    base.checked_add(offset)
}

/// Custom deserializer for `SimTime` that accepts any non-negative integer,
/// including the (more tightly size-limited, but frequently encountered in hand
/// written TOML/YAML fixtures) signed integer representations.
pub fn deserialize_sim_time<'de, D>(deserializer: D) -> Result<SimTime, D::Error>
where
    D: Deserializer<'de>,
{
    struct SimTimeVisitor;

    impl<'de> serde::de::Visitor<'de> for SimTimeVisitor {
        type Value = SimTime;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a non-negative integer number of seconds")
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value)
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(E::custom("SimTime cannot be negative"));
            }
            Ok(value as u64)
        }
    }

    deserializer.deserialize_any(SimTimeVisitor)
}
