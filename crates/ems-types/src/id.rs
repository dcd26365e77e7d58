//! # ems-types::id
//!
//! Defines the core identifier types used throughout the simulation. Distinct
//! aliases help prevent mixing up, say, a hospital index with an ambulance index.

/// Index of an ambulance in the process-wide ambulance roster.
pub type AmbulanceId = u32;

/// Index of an emergency in the process-wide emergency roster.
pub type EmergencyId = u32;

/// Index of a hospital in the process-wide hospital roster.
pub type HospitalId = u32;

/// A unique identifier for a scheduled event in the kernel's timer heap.
pub type EventId = u64;
