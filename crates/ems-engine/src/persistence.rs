//! # ems-engine::persistence
//!
//! Façade over the tabular event-log sink consumed by the core. The
//! persistence layer is a SQLite database, so [`SqlitePersistence`]
//! implements a concrete schema rather than some more generic storage
//! abstraction.
//!
//! All four operations are non-blocking and best-effort: a write failure is
//! logged once via `tracing::warn!` and dropped rather than propagated, so a
//! flaky database never stalls the simulation clock.

use std::cell::RefCell;
use std::path::Path;

use chrono::NaiveDateTime;

use ems_types::time::SimTime;

use crate::entities::{Ambulance, AmbulanceState, Emergency};

/// Sink for rescue and ambulance-state-transition records. Every method is
/// fire-and-forget: implementations swallow their own errors.
pub trait PersistenceSink {
    /// Records a completed rescue.
    fn log_rescue(&self, emergency: &Emergency, ambulance: &Ambulance, start_time: NaiveDateTime);

    /// Records a state transition that occurs during an active rescue.
    fn log_ambulance_rescue(
        &self,
        ambulance: &Ambulance,
        emergency: &Emergency,
        now: SimTime,
        start_time: NaiveDateTime,
    );

    /// Records a state transition outside any rescue (no associated emergency).
    fn log_ambulance(&self, ambulance: &Ambulance, now: SimTime, start_time: NaiveDateTime);
}

fn format_instant(start_time: NaiveDateTime, offset: SimTime) -> String {
    if offset == ems_types::time::TIME_INFINITY {
        return String::new();
    }
    (start_time + chrono::Duration::seconds(offset as i64))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn ambulance_state_label(state: AmbulanceState) -> &'static str {
    // `Display` already renders the exact original token; re-derived here so
    // callers that only need the label don't have to format! a Display impl.
    match state {
        AmbulanceState::Unavailable => "UNAVAILABLE",
        AmbulanceState::WaitingAtBase => "WAITING_AT_BASE",
        AmbulanceState::Assigned => "ASSIGNED",
        AmbulanceState::ToEmergency => "TO_EMERGENCY",
        AmbulanceState::OnTreatment => "ON_TREATMENT",
        AmbulanceState::ToHospital => "TO_HOSPITAL",
        AmbulanceState::Cleaning => "CLEANING",
        AmbulanceState::ToBase => "TO_BASE",
        AmbulanceState::Preempted => "PREEMPTED",
    }
}

/// No-op sink for tests and `validate` runs that don't need a database file.
#[derive(Debug, Default)]
pub struct NullPersistence;

impl PersistenceSink for NullPersistence {
    fn log_rescue(&self, _emergency: &Emergency, _ambulance: &Ambulance, _start_time: NaiveDateTime) {}

    fn log_ambulance_rescue(
        &self,
        _ambulance: &Ambulance,
        _emergency: &Emergency,
        _now: SimTime,
        _start_time: NaiveDateTime,
    ) {
    }

    fn log_ambulance(&self, _ambulance: &Ambulance, _now: SimTime, _start_time: NaiveDateTime) {}
}

/// Default persistence sink, backed by `rusqlite`. [`SqlitePersistence::open`]
/// truncates and recreates the `rescue`/`ambulance_event` tables.
pub struct SqlitePersistence {
    conn: RefCell<rusqlite::Connection>,
}

impl SqlitePersistence {
    /// Opens (creating if needed) the database at `path` and recreates the
    /// `rescue`/`ambulance_event` tables.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, crate::EngineError> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "DROP TABLE IF EXISTS rescue;
             CREATE TABLE rescue (
                 emergency VARCHAR(255) NOT NULL,
                 ambulance VARCHAR(255) NOT NULL,
                 hospital VARCHAR(32),
                 triage VARCHAR(10) NOT NULL,
                 call DATETIME NOT NULL,
                 start DATETIME NOT NULL,
                 at_emergency DATETIME NOT NULL,
                 at_hospital DATETIME,
                 PRIMARY KEY (emergency, ambulance)
             );
             DROP TABLE IF EXISTS ambulance_event;
             CREATE TABLE ambulance_event (
                 ambulance VARCHAR(255) NOT NULL,
                 emergency VARCHAR(255),
                 state VARCHAR(255) NOT NULL,
                 time DATETIME NOT NULL
             );",
        )?;
        Ok(Self {
            conn: RefCell::new(conn),
        })
    }
}

impl PersistenceSink for SqlitePersistence {
    fn log_rescue(&self, emergency: &Emergency, ambulance: &Ambulance, start_time: NaiveDateTime) {
        let hospital = emergency
            .needs_hospital
            .then(|| emergency.assigned_hospital.map(|h| h.to_string()))
            .flatten();
        let at_hospital = emergency
            .needs_hospital
            .then(|| format_instant(start_time, emergency.at_hospital_time));

        let result = self.conn.borrow().execute(
            "INSERT INTO rescue VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                emergency.id,
                ambulance.id,
                hospital,
                emergency.triage.as_str(),
                format_instant(start_time, emergency.occurring_time),
                format_instant(start_time, emergency.start_serving_time),
                format_instant(start_time, emergency.reaching_time),
                at_hospital,
            ],
        );
        if let Err(err) = result {
            tracing::warn!(
                emergency = emergency.id,
                ambulance = ambulance.id,
                error = %err,
                "persistence: failed to log rescue"
            );
        }
    }

    fn log_ambulance_rescue(
        &self,
        ambulance: &Ambulance,
        emergency: &Emergency,
        now: SimTime,
        start_time: NaiveDateTime,
    ) {
        let result = self.conn.borrow().execute(
            "INSERT INTO ambulance_event VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                ambulance.id,
                emergency.id,
                ambulance_state_label(ambulance.state),
                format_instant(start_time, now),
            ],
        );
        if let Err(err) = result {
            tracing::warn!(ambulance = ambulance.id, error = %err, "persistence: failed to log ambulance event");
        }
    }

    fn log_ambulance(&self, ambulance: &Ambulance, now: SimTime, start_time: NaiveDateTime) {
        let result = self.conn.borrow().execute(
            "INSERT INTO ambulance_event VALUES (?1, NULL, ?2, ?3)",
            rusqlite::params![
                ambulance.id,
                ambulance_state_label(ambulance.state),
                format_instant(start_time, now),
            ],
        );
        if let Err(err) = result {
            tracing::warn!(ambulance = ambulance.id, error = %err, "persistence: failed to log ambulance event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{AmbulanceKind, Triage};
    use ems_types::geo::Coordinate;

    fn sample_ambulance() -> Ambulance {
        Ambulance::new(
            1,
            "test".into(),
            AmbulanceKind::Als,
            Coordinate::new(0.0, 0.0),
            0,
            0,
            0,
        )
    }

    fn sample_emergency() -> Emergency {
        Emergency::new(
            2,
            "Udine".into(),
            Triage::Red,
            Coordinate::new(0.0, 0.0),
            100,
            true,
            None,
            400,
            0,
        )
    }

    #[test]
    fn null_persistence_accepts_every_call_without_panicking() {
        let sink = NullPersistence;
        let amb = sample_ambulance();
        let em = sample_emergency();
        let start = NaiveDateTime::parse_from_str("2024-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        sink.log_rescue(&em, &amb, start);
        sink.log_ambulance_rescue(&amb, &em, 10, start);
        sink.log_ambulance(&amb, 20, start);
    }

    #[test]
    fn sqlite_persistence_round_trips_a_rescue_record() {
        let sink = SqlitePersistence::open(":memory:").unwrap();
        let amb = sample_ambulance();
        let mut em = sample_emergency();
        em.start_serving_time = 130;
        em.reaching_time = 430;
        em.at_hospital_time = 900;
        let start = NaiveDateTime::parse_from_str("2024-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        sink.log_rescue(&em, &amb, start);

        let count: i64 = sink
            .conn
            .borrow()
            .query_row("SELECT COUNT(*) FROM rescue", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
