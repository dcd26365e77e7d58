//! # ems-cli
//!
//! The main entry point for the EMS fleet simulator binary. Parses
//! command-line arguments and dispatches to the appropriate subcommand
//! handler.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;

use crate::args::{Cli, Command};

mod args;
mod commands;
mod logging;
mod roster;

fn main() -> Result<()> {
    let args = Cli::parse();

    logging::init(args.log);

    match args.command {
        Command::Run(opts) => commands::run::exec(opts),
        Command::Validate(opts) => commands::validate::exec(opts),
    }
}
