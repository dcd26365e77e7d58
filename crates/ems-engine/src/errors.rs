//! # ems-engine::errors
//!
//! Internal error types for the engine. Most of the core's error handling is
//! non-fatal and local (router/persistence failures are logged and swallowed at
//! their call sites); this enum only covers the one fallible entry point that
//! must surface a typed error to its caller — opening the persistence sink's
//! backing database.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to open persistence database: {0}")]
    PersistenceOpen(#[from] rusqlite::Error),
}
