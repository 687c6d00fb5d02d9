//! Status and role enumerations shared across the workspace.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a race.
///
/// Transitions are forward-only: `Pending -> Active -> Finished` or any
/// state `-> Cancelled`. The lifecycle manager is the only component
/// permitted to change this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaceStatus {
    /// Created, accepting entries, not yet running.
    Pending,
    /// The tick loop is running.
    Active,
    /// All cars completed or crashed; history is read-only.
    Finished,
    /// Stopped by an operator or by an unrecoverable loop error.
    Cancelled,
}

impl RaceStatus {
    /// Whether the race has reached a terminal state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

/// State of one car within a race.
///
/// A car never re-enters `Running` automatically once it has left it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CarStatus {
    /// On track, receiving decisions each tick.
    Running,
    /// Parked in the pit lane; not advanced by the tick loop.
    Pit,
    /// Retired after a physics failure; terminal.
    Crashed,
    /// Completed all laps; terminal.
    Finished,
}

/// Role attached to a subscriber connection.
///
/// Used only for diagnostics and read-time filtering; never consulted by
/// the simulation itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRole {
    /// Read-only viewer; receives public payloads only.
    Spectator,
    /// Team member; may receive private payloads for owned entries.
    Team,
    /// Operator connection.
    Admin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn race_status_wire_names() {
        let json = serde_json::to_string(&RaceStatus::Pending).unwrap_or_default();
        assert_eq!(json, "\"PENDING\"");
        let json = serde_json::to_string(&RaceStatus::Cancelled).unwrap_or_default();
        assert_eq!(json, "\"CANCELLED\"");
    }

    #[test]
    fn car_status_wire_names() {
        let json = serde_json::to_string(&CarStatus::Running).unwrap_or_default();
        assert_eq!(json, "\"RUNNING\"");
    }

    #[test]
    fn terminal_states() {
        assert!(RaceStatus::Finished.is_terminal());
        assert!(RaceStatus::Cancelled.is_terminal());
        assert!(!RaceStatus::Pending.is_terminal());
        assert!(!RaceStatus::Active.is_terminal());
    }
}
