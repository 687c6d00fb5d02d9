//! Circuit geometry and track queries for the Slipstream race simulation.
//!
//! The [`Circuit`] data itself lives in `slipstream-types`; this crate
//! owns everything computed *from* it: validation, nearest-waypoint
//! search, the next-waypoint summary handed to decision providers, and
//! circuit construction helpers.
//!
//! [`Circuit`]: slipstream_types::Circuit

mod error;
mod geometry;

pub use error::TrackError;
pub use geometry::{
    DEFAULT_TRACK_LENGTH, default_circuit, nearest_waypoint_idx, next_waypoint_summary,
    oval_circuit, remaining_lap_distance, validate,
};
