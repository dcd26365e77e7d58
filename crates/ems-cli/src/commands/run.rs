//! # ems-cli::commands::run
//!
//! Implements the `run` subcommand: parse rosters and config, build the
//! simulation's collaborators, hand off to `ems_engine::bootstrap::run`, then
//! print a summary.

use std::rc::Rc;

use anyhow::Result;

use ems_engine::bootstrap::{self, Collaborators};
use ems_engine::entities::EmergencyState;
use ems_engine::persistence::{NullPersistence, PersistenceSink, SqlitePersistence};
use ems_engine::routing::HaversineRouter;

use crate::args::RosterOpts;
use crate::roster::{load_config, load_roster_set};

pub fn exec(opts: RosterOpts) -> Result<()> {
    let mut config = load_config(&opts.config)?;
    if let Some(seed) = opts.seed {
        config.seed = Some(seed);
    }
    let (roster, simulation_config, _rng, _recorder) = load_roster_set(
        &opts.ambulances,
        &opts.emergencies,
        &opts.hospitals,
        &config,
    )?;

    let ambulances = roster.ambulances.len();
    let emergencies = roster.emergencies.len();

    let persistence: Rc<dyn PersistenceSink> = match &opts.db {
        Some(path) => Rc::new(SqlitePersistence::open(path)?),
        None => Rc::new(NullPersistence),
    };
    let collaborators = Collaborators {
        router: Rc::new(HaversineRouter {
            average_speed_kph: config.average_speed_kph,
        }),
        persistence,
    };

    tracing::info!(
        ambulances,
        emergencies,
        seed = simulation_config.seed.0,
        "starting simulation run"
    );

    let world = bootstrap::run(roster, simulation_config, collaborators);

    let served = world
        .emergencies
        .iter()
        .filter(|e| e.borrow().state == EmergencyState::Ended)
        .count();
    println!("ambulances: {ambulances}");
    println!("emergencies: {emergencies} ({served} served)");

    Ok(())
}
