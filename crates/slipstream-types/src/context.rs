//! The decision-context payload presented to a decision provider.
//!
//! Built fresh for each running car on each tick by the engine. The
//! payload is deliberately bounded in size: the nearby-vehicle list is
//! radius-filtered, distance-sorted, and capped, so provider payloads
//! stay small and predictable regardless of field size.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::CarStatus;
use crate::ids::{AgentId, CarId, RaceId};
use crate::structs::{Car, PitBox, Position};

/// Race-level summary included in every decision context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceSummary {
    /// The race identity.
    pub id: RaceId,
    /// Race display name.
    pub name: String,
    /// The lap the subject car is on.
    pub lap: u32,
    /// Laps required to finish.
    pub max_laps: u32,
    /// Leading lap across all cars.
    pub current_lap: u32,
    /// Number of cars entered in the race.
    pub total_cars: u32,
}

/// A reduced view of the next waypoint ahead of the car.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointSummary {
    /// Index into the circuit's waypoint sequence.
    pub index: u32,
    /// X coordinate in meters.
    pub x: f64,
    /// Y coordinate in meters.
    pub y: f64,
    /// Advisory speed at the waypoint, if set.
    pub speed_limit: Option<f64>,
}

/// Track-level summary included in every decision context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSummary {
    /// Lap length in meters.
    pub track_length: f64,
    /// The next waypoint ahead, when the circuit defines waypoints.
    pub next_waypoint: Option<WaypointSummary>,
    /// Straight-line distance to the next waypoint, when one exists.
    pub distance_to_next_waypoint: Option<f64>,
    /// Distance left on the current lap, meters.
    pub remaining_lap_distance: f64,
    /// Pit stalls on this circuit.
    pub pit_boxes: Vec<PitBox>,
}

/// Another car within the nearby-scan radius of the subject car.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyCar {
    /// The other car's identity.
    pub car_id: CarId,
    /// The other car's agent, if linked.
    pub agent_id: Option<AgentId>,
    /// The other car's position.
    pub position: Position,
    /// Distance from the subject car, meters.
    pub distance: f64,
    /// Other car's speed minus the subject car's speed, m/s.
    pub relative_speed: f64,
    /// The other car's status.
    pub status: CarStatus,
}

/// Everything a decision provider sees for one car on one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionContext {
    /// Wall-clock time the context was assembled.
    pub timestamp: DateTime<Utc>,
    /// Race summary.
    pub race: RaceSummary,
    /// Full snapshot of the subject car.
    pub car: Car,
    /// Track summary.
    pub track: TrackSummary,
    /// Other cars within the scan radius, closest first, capped.
    pub nearby: Vec<NearbyCar>,
}
