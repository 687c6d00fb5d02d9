//! Broadcast event schema consumed by the transport layer.
//!
//! Events are tagged with an `event` discriminant in kebab-case so the
//! wire shape matches what spectator clients expect, e.g.
//! `{"event":"telemetry-update", ...}`. The public and private telemetry
//! tiers differ only in the resource fields the private tier adds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, CarId, RaceId};
use crate::structs::{Decision, Position};

/// A message fanned out to subscriber connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BroadcastEvent {
    /// Per-tick car state visible to every subscriber of the race.
    TelemetryUpdate {
        /// The race.
        race_id: RaceId,
        /// The car this update describes.
        car_id: CarId,
        /// The driving agent, if linked.
        agent_id: Option<AgentId>,
        /// Track position.
        position: Position,
        /// Speed in m/s.
        speed: f64,
        /// Current lap.
        lap: u32,
        /// Wall-clock time of the tick.
        timestamp: DateTime<Utc>,
    },
    /// Per-tick car state for subscribers with ownership rights over the
    /// car: everything in the public tier plus resources and the applied
    /// decision.
    TelemetryUpdatePrivate {
        /// The race.
        race_id: RaceId,
        /// The car this update describes.
        car_id: CarId,
        /// The driving agent, if linked.
        agent_id: Option<AgentId>,
        /// Track position.
        position: Position,
        /// Speed in m/s.
        speed: f64,
        /// Current lap.
        lap: u32,
        /// Wall-clock time of the tick.
        timestamp: DateTime<Utc>,
        /// Remaining fuel percent.
        fuel: f64,
        /// Tire wear percent.
        tire_wear: f64,
        /// The decision applied this tick (post-clamp).
        decision: Decision,
    },
    /// A car crossed the start-finish line.
    LapComplete {
        /// The race.
        race_id: RaceId,
        /// The car that completed a lap.
        car_id: CarId,
        /// The lap the car is now on.
        lap: u32,
        /// Wall-clock time of the crossing.
        timestamp: DateTime<Utc>,
    },
    /// The race reached its natural end.
    RaceFinished {
        /// The race.
        race_id: RaceId,
        /// Wall-clock time of the finish.
        timestamp: DateTime<Utc>,
    },
    /// The race was stopped before finishing.
    RaceCancelled {
        /// The race.
        race_id: RaceId,
        /// Wall-clock time of the cancellation.
        timestamp: DateTime<Utc>,
    },
}

impl BroadcastEvent {
    /// The race this event belongs to.
    pub const fn race_id(&self) -> RaceId {
        match self {
            Self::TelemetryUpdate { race_id, .. }
            | Self::TelemetryUpdatePrivate { race_id, .. }
            | Self::LapComplete { race_id, .. }
            | Self::RaceFinished { race_id, .. }
            | Self::RaceCancelled { race_id, .. } => *race_id,
        }
    }
}
