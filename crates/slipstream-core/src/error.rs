//! User-visible errors for the lifecycle API.

use slipstream_types::{RaceId, RaceStatus};

/// Errors surfaced to lifecycle API callers.
///
/// These are the only errors that cross the engine boundary. Every
/// per-tick failure (decision timeouts, physics errors, persistence and
/// connection failures) is absorbed inside the loop so that one car or
/// one subscriber never takes down a race.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The race id is unknown.
    #[error("race {race_id} not found")]
    NotFound {
        /// The unknown race id.
        race_id: RaceId,
    },

    /// The requested lifecycle operation is illegal in the race's
    /// current state.
    #[error("cannot {action} race {race_id} in {status:?} state")]
    InvalidTransition {
        /// The race.
        race_id: RaceId,
        /// The race's current status.
        status: RaceStatus,
        /// The rejected operation, for the error message.
        action: &'static str,
    },
}
