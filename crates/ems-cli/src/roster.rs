//! # ems-cli::roster
//!
//! Line-based parsers for the three text roster formats, plus the
//! configuration-file shape they're combined with. Every parser reads
//! whitespace-separated fields by position.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use chrono::{NaiveDate, NaiveDateTime};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::Deserialize;

use ems_engine::entities::{Ambulance, AmbulanceKind, Emergency, HospitalKind, Triage};
use ems_engine::rng::Recorder;
use ems_engine::world::RosterSet;
use ems_types::config::{CallDelayRates, RngSeed, SimulationConfig};
use ems_types::errors::EmsError;
use ems_types::geo::Coordinate;

/// The on-disk scenario config: everything in [`SimulationConfig`] except
/// `start_time`/`end_time`, which are optional here and derived from the
/// roster's min/max timestamp when absent.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    #[serde(default = "default_preemptable")]
    pub preemptable: bool,
    #[serde(default)]
    pub call_delay_rates: CallDelayRates,
    pub distance_threshold_km: f64,
    pub time_threshold_min: f64,
    pub seed: Option<u64>,
    /// Average road speed (km/h) used by the default [`ems_engine::routing::HaversineRouter`].
    #[serde(default = "default_average_speed_kph")]
    pub average_speed_kph: f64,
}

fn default_preemptable() -> bool {
    true
}

fn default_average_speed_kph() -> f64 {
    50.0
}

/// Loads a [`ScenarioConfig`] from a YAML or TOML file, dispatching on extension.
pub fn load_config(path: impl AsRef<Path>) -> Result<ScenarioConfig, ems_types::errors::ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
        Some("toml") => Ok(toml::from_str(&content)?),
        other => Err(ems_types::errors::ConfigError::UnknownExtension(
            other.map(str::to_string),
        )),
    }
}

/// Splits a whitespace-separated line into tokens, dropping empty pieces from
/// repeated separators (roster fixtures use inconsistent spacing).
fn tokens(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

fn parse_coordinate(line_no: usize, token: &str) -> Result<Coordinate, EmsError> {
    let (lat, lon) = token.split_once(',').ok_or_else(|| EmsError::RosterParse {
        line: line_no,
        reason: format!("expected `lat,lon`, got {token:?}"),
    })?;
    let lat: f64 = lat.trim().parse().map_err(|_| EmsError::RosterParse {
        line: line_no,
        reason: format!("invalid latitude {lat:?}"),
    })?;
    let lon: f64 = lon.trim().parse().map_err(|_| EmsError::RosterParse {
        line: line_no,
        reason: format!("invalid longitude {lon:?}"),
    })?;
    Ok(Coordinate::new(lat, lon))
}

fn parse_hhmm(line_no: usize, token: &str) -> Result<u64, EmsError> {
    let (h, m) = token.split_once(':').ok_or_else(|| EmsError::RosterParse {
        line: line_no,
        reason: format!("expected `HH:MM`, got {token:?}"),
    })?;
    let h: u64 = h.parse().map_err(|_| EmsError::RosterParse {
        line: line_no,
        reason: format!("invalid hour {h:?}"),
    })?;
    let m: u64 = m.parse().map_err(|_| EmsError::RosterParse {
        line: line_no,
        reason: format!("invalid minute {m:?}"),
    })?;
    Ok(h * 3_600 + m * 60)
}

/// Parses the ambulance roster: `id description type base shift_start shift_end`,
/// one vehicle per line. `description` may itself contain whitespace, so the
/// last four tokens are taken positionally from the end of the line and
/// everything between `id` and them is re-joined as the description — the same
/// token-positional approach as `Ambulance::source()`. Any malformed line
/// aborts the whole load.
pub fn parse_ambulances(text: &str) -> Result<Vec<Ambulance>, EmsError> {
    let mut ambulances = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = tokens(line);
        if fields.len() < 5 {
            return Err(EmsError::RosterParse {
                line: line_no,
                reason: "expected at least 5 fields: id description... type base shift_start shift_end".into(),
            });
        }
        let n = fields.len();
        let shift_end = parse_hhmm(line_no, fields[n - 1])?;
        let shift_start = parse_hhmm(line_no, fields[n - 2])?;
        let base = parse_coordinate(line_no, fields[n - 3])?;
        let kind: AmbulanceKind = fields[n - 4].parse().map_err(|_| EmsError::RosterParse {
            line: line_no,
            reason: format!("unrecognized ambulance type {:?}", fields[n - 4]),
        })?;
        let id: u32 = fields[0].parse().map_err(|_| EmsError::RosterParse {
            line: line_no,
            reason: format!("invalid ambulance id {:?}", fields[0]),
        })?;
        let description = fields[1..n - 4].join(" ");

        ambulances.push(Ambulance::new(
            id,
            description,
            kind,
            base,
            shift_start,
            shift_end,
            ambulances.len(),
        ));
    }
    Ok(ambulances)
}

/// Parses the hospital roster: `id description type lat,lon`. Same
/// token-positional shape as ambulances, minus the shift columns. A malformed
/// line aborts the whole load.
pub fn parse_hospitals(text: &str) -> Result<Vec<ems_engine::entities::Hospital>, EmsError> {
    let mut hospitals = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = tokens(line);
        if fields.len() < 4 {
            return Err(EmsError::RosterParse {
                line: line_no,
                reason: "expected at least 4 fields: id description... type lat,lon".into(),
            });
        }
        let n = fields.len();
        let place = parse_coordinate(line_no, fields[n - 1])?;
        let kind = HospitalKind::from_roster_token(fields[n - 2]).map_err(|_| EmsError::RosterParse {
            line: line_no,
            reason: format!("unrecognized hospital type {:?}", fields[n - 2]),
        })?;
        let id: u32 = fields[0].parse().map_err(|_| EmsError::RosterParse {
            line: line_no,
            reason: format!("invalid hospital id {:?}", fields[0]),
        })?;
        let description = fields[1..n - 2].join(" ");

        hospitals.push(ems_engine::entities::Hospital {
            id,
            description,
            place,
            kind,
            index: hospitals.len(),
        });
    }
    Ok(hospitals)
}

/// Parses the emergency roster: `id municipality triage lat,lon ? date time
/// [needed_hospital actual_hospital]`. The `?` column is an unused placeholder
/// field kept for positional compatibility with existing fixtures. Lines
/// outside `[start_time, end_time]` are skipped with a warning (not fatal);
/// `start_time`/`end_time` are derived from the min/max timestamp seen when
/// `config` leaves them unset, with `end_time` rounded up to `23:59:59` of
/// its day.
pub fn parse_emergencies(
    text: &str,
    config: &ScenarioConfig,
    rng: &mut ChaCha20Rng,
    recorder: &mut Recorder,
) -> Result<(Vec<Emergency>, NaiveDateTime, NaiveDateTime), EmsError> {
    struct Raw {
        line_no: usize,
        id: u32,
        municipality: String,
        triage: Triage,
        place: Coordinate,
        timestamp: NaiveDateTime,
        needed_hospital_type: Option<HospitalKind>,
    }

    let mut raw_rows = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = tokens(line);
        if fields.len() < 6 {
            tracing::warn!(line = line_no, "skipping malformed emergency line");
            continue;
        }
        let id: u32 = fields[0].parse().map_err(|_| EmsError::RosterParse {
            line: line_no,
            reason: format!("invalid emergency id {:?}", fields[0]),
        })?;
        let municipality = fields[1].to_string();
        let triage: Triage = fields[2].parse().map_err(|_| EmsError::RosterParse {
            line: line_no,
            reason: format!("unrecognized triage {:?}", fields[2]),
        })?;
        let place = parse_coordinate(line_no, fields[3])?;
        // fields[4] is the unused `?` placeholder column.
        let date = fields[5];
        let time = fields.get(6).copied().unwrap_or("00:00:00");
        let timestamp = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S")
            .or_else(|_| {
                NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .map(|d| d.and_hms_opt(0, 0, 0).unwrap())
            })
            .map_err(|_| EmsError::RosterParse {
                line: line_no,
                reason: format!("invalid date/time {date:?} {time:?}"),
            })?;
        let needed_hospital_type = fields
            .get(7)
            .and_then(|t| HospitalKind::from_roster_token(t).ok());

        raw_rows.push(Raw {
            line_no,
            id,
            municipality,
            triage,
            place,
            timestamp,
            needed_hospital_type,
        });
    }

    let start_time = config.start_time.unwrap_or_else(|| {
        raw_rows
            .iter()
            .map(|r| r.timestamp)
            .min()
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap())
    });
    let end_time = config.end_time.unwrap_or_else(|| {
        let max = raw_rows
            .iter()
            .map(|r| r.timestamp)
            .max()
            .unwrap_or(start_time);
        max.date().and_hms_opt(23, 59, 59).unwrap()
    });

    let mut emergencies = Vec::new();
    for r in raw_rows {
        if r.timestamp < start_time || r.timestamp > end_time {
            tracing::warn!(line = r.line_no, "skipping emergency outside the simulation window");
            continue;
        }
        let offset = (r.timestamp - start_time).num_seconds().max(0) as u64;
        let treatment_duration = Emergency::sample_treatment_duration(rng, recorder);
        let needs_hospital = r.needed_hospital_type.is_some() || !matches!(r.triage, Triage::White | Triage::Black);

        emergencies.push(Emergency::new(
            r.id,
            r.municipality,
            r.triage,
            r.place,
            offset,
            needs_hospital,
            r.needed_hospital_type,
            treatment_duration,
            emergencies.len(),
        ));
    }

    Ok((emergencies, start_time, end_time))
}

/// Loads all three rosters and the scenario config from disk, deriving the
/// simulation window and building the final [`SimulationConfig`] and
/// [`RosterSet`] the engine consumes. Shares one RNG/recorder pair across
/// treatment-duration sampling here and call-delay sampling in
/// `ems_engine::world::SimulationContext`, per the byte-identical-replay
/// property: both draw from the continuation of the same seeded stream.
pub fn load_roster_set(
    ambulances_path: impl AsRef<Path>,
    emergencies_path: impl AsRef<Path>,
    hospitals_path: impl AsRef<Path>,
    config: &ScenarioConfig,
) -> Result<(RosterSet, SimulationConfig, Rc<RefCell<ChaCha20Rng>>, Rc<RefCell<Recorder>>), anyhow::Error> {
    let seed = config.seed.unwrap_or_else(|| rand::random());
    let rng = Rc::new(RefCell::new(ChaCha20Rng::seed_from_u64(seed)));
    let recorder = Rc::new(RefCell::new(Recorder::new(seed)));

    let ambulances_text = std::fs::read_to_string(ambulances_path.as_ref())?;
    let emergencies_text = std::fs::read_to_string(emergencies_path.as_ref())?;
    let hospitals_text = std::fs::read_to_string(hospitals_path.as_ref())?;

    let ambulances = parse_ambulances(&ambulances_text)?;
    let hospitals = parse_hospitals(&hospitals_text)?;
    let (emergencies, start_time, end_time) = {
        let mut rng_mut = rng.borrow_mut();
        let mut recorder_mut = recorder.borrow_mut();
        parse_emergencies(&emergencies_text, config, &mut rng_mut, &mut recorder_mut)?
    };

    tracing::info!(
        ambulances = ambulances.len(),
        emergencies = emergencies.len(),
        hospitals = hospitals.len(),
        %start_time,
        %end_time,
        seed,
        "roster loaded"
    );

    let roster = RosterSet {
        ambulances,
        emergencies,
        hospitals,
        start_time,
        end_time,
    };
    let simulation_config = SimulationConfig {
        start_time,
        end_time,
        preemptable: config.preemptable,
        call_delay_rates: config.call_delay_rates,
        distance_threshold_km: config.distance_threshold_km,
        time_threshold_min: config.time_threshold_min,
        seed: RngSeed(seed),
    };

    Ok((roster, simulation_config, rng, recorder))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_an_ambulance_line_with_a_multi_word_description() {
        let text = "1 Ambulanza Udine Centro ALS 45.0,7.0 07:00 19:00\n";
        let ambulances = parse_ambulances(text).unwrap();
        assert_eq!(ambulances.len(), 1);
        assert_eq!(ambulances[0].description, "Ambulanza Udine Centro");
        assert_eq!(ambulances[0].kind, AmbulanceKind::Als);
        assert_eq!(ambulances[0].shift_start, 7 * 3600);
        assert_eq!(ambulances[0].shift_end, 19 * 3600);
    }

    #[test]
    fn malformed_ambulance_line_is_a_fatal_parse_error() {
        let text = "1 ALS not-a-coordinate 07:00 19:00\n";
        assert!(parse_ambulances(text).is_err());
    }

    #[test]
    fn parses_a_hospital_line() {
        let text = "1 Ospedale Civile H 46.06,13.23\n";
        let hospitals = parse_hospitals(text).unwrap();
        assert_eq!(hospitals.len(), 1);
        assert_eq!(hospitals[0].kind, HospitalKind::Hub);
        assert_eq!(hospitals[0].description, "Ospedale Civile");
    }

    #[test]
    fn emergency_outside_derived_window_is_skipped_not_fatal() {
        let text = "1 Udine RED 46.0,13.0 ? 2024-01-01 10:00:00\n\
                    2 Udine RED 46.0,13.0 ? 2024-01-05 10:00:00\n";
        let config = ScenarioConfig {
            start_time: Some(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            ),
            end_time: Some(
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            ),
            preemptable: true,
            call_delay_rates: CallDelayRates::default(),
            distance_threshold_km: 15.0,
            time_threshold_min: 20.0,
            seed: Some(1),
            average_speed_kph: 50.0,
        };
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let mut recorder = Recorder::new(1);
        let (emergencies, _, _) = parse_emergencies(text, &config, &mut rng, &mut recorder).unwrap();
        assert_eq!(emergencies.len(), 1);
    }
}
