//! # ems-types::geo
//!
//! Geographic primitives shared between the roster parsers and the routing
//! gateway.

use serde::{Deserialize, Serialize};

/// A point in decimal-degree latitude/longitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}
