//! # ems-cli::commands::validate
//!
//! Implements the `validate` subcommand: parses all three rosters plus the
//! config and reports the derived simulation window and entity counts,
//! without spawning or running any simulation process.

use anyhow::Result;

use ems_engine::world::World;

use crate::args::RosterOpts;
use crate::roster::{load_config, load_roster_set};

pub fn exec(opts: RosterOpts) -> Result<()> {
    let mut config = load_config(&opts.config)?;
    if let Some(seed) = opts.seed {
        config.seed = Some(seed);
    }
    let (roster, simulation_config, ..) = load_roster_set(
        &opts.ambulances,
        &opts.emergencies,
        &opts.hospitals,
        &config,
    )?;

    println!("start_time: {}", simulation_config.start_time);
    println!("end_time:   {}", simulation_config.end_time);
    println!("ambulances: {}", roster.ambulances.len());
    println!("emergencies: {}", roster.emergencies.len());
    println!("hospitals:  {}", roster.hospitals.len());

    let (world, horizon) = World::from_roster(roster);
    println!("horizon: {horizon}s");
    println!(
        "roster is valid: {} ambulances, {} emergencies, {} hospitals",
        world.ambulances.len(),
        world.emergencies.len(),
        world.hospitals.len()
    );

    Ok(())
}
