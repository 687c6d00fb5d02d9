//! Errors for the physics step.

/// Errors that can occur while applying a decision to a car.
///
/// The tick loop maps any of these to `CarStatus::Crashed` for the
/// affected car; they are never surfaced to API callers.
#[derive(Debug, thiserror::Error)]
pub enum PhysicsError {
    /// The timestep is zero, negative, or not finite.
    #[error("invalid timestep: {dt}")]
    InvalidTimestep {
        /// The offending timestep value.
        dt: f64,
    },

    /// Integration produced a non-finite value.
    #[error("non-finite {field} after integration")]
    NonFiniteState {
        /// Which state field went non-finite.
        field: &'static str,
    },
}
