//! Errors for circuit validation.

/// Errors that can occur when validating a circuit.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    /// The lap length is zero, negative, or not finite.
    #[error("track length must be positive and finite, got {length}")]
    InvalidTrackLength {
        /// The offending value.
        length: f64,
    },

    /// A waypoint has a non-finite coordinate.
    #[error("waypoint {index} has a non-finite coordinate")]
    InvalidWaypoint {
        /// Index of the offending waypoint.
        index: usize,
    },
}
