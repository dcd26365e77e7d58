//! # ems-types::errors
//!
//! Defines the common error types used throughout the EMS workspace. Using
//! `thiserror` provides clean, descriptive error handling without hand-rolled
//! `Display` impls.

use thiserror::Error;

/// The error type returned by roster parsing and the triage/ambulance-type/
/// hospital-type `FromStr` impls.
#[derive(Error, Debug, Clone)]
pub enum EmsError {
    #[error("roster parse error at line {line}: {reason}")]
    RosterParse { line: usize, reason: String },
    #[error("unrecognized token {token:?} for {kind}")]
    UnknownToken { kind: &'static str, token: String },
}

/// An error related to parsing or validating configuration files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unrecognized config file extension: {0:?}")]
    UnknownExtension(Option<String>),
}
