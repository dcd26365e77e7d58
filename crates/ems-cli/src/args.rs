//! # ems-cli::args
//!
//! Defines the command-line argument structure using `clap`.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(long, global = true, default_value = "human")]
    pub log: LogFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a simulation from a set of roster files and a config.
    Run(RosterOpts),
    /// Parse and validate a set of roster files without running the simulation.
    Validate(RosterOpts),
}

#[derive(Args, Debug)]
pub struct RosterOpts {
    /// Path to the ambulance roster file.
    #[arg(long)]
    pub ambulances: PathBuf,

    /// Path to the emergency roster file.
    #[arg(long)]
    pub emergencies: PathBuf,

    /// Path to the hospital roster file.
    #[arg(long)]
    pub hospitals: PathBuf,

    /// Path to the scenario config file (YAML or TOML).
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override the RNG seed from the config file.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Path to a SQLite database to persist rescue/ambulance events into.
    /// Defaults to an in-memory no-op sink when omitted.
    #[arg(long)]
    pub db: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}
