//! # ems-cli::commands
//!
//! Subcommand implementations.

pub mod run;
pub mod validate;
