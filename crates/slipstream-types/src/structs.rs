//! Core data structures: positions, decisions, cars, circuits,
//! telemetry samples, and connection metadata.
//!
//! These are plain serializable values. The physics that mutates a
//! [`Car`] lives in `slipstream-car`; circuit geometry queries live in
//! `slipstream-track`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{CarStatus, ConnectionRole};
use crate::ids::{AgentId, CarId, CircuitId, EntryId, RaceId, TeamId};

/// A point in the track coordinate space.
///
/// Serialized as a two-element array `[x, y]` to match the wire format
/// consumed by spectator clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Position {
    /// X coordinate in meters.
    pub x: f64,
    /// Y coordinate in meters.
    pub y: f64,
}

impl Position {
    /// Create a position from coordinates.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another position.
    pub fn distance_to(&self, other: &Self) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        dx.hypot(dy)
    }
}

impl From<[f64; 2]> for Position {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Position> for [f64; 2] {
    fn from(p: Position) -> Self {
        [p.x, p.y]
    }
}

/// A driving control decision for one car for one tick.
///
/// Values from any provider are untrusted until passed through
/// [`Decision::clamped`], which maps non-finite components to `0.0` and
/// clamps each component to its legal range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Forward drive input, `[0, 1]`.
    #[serde(default)]
    pub throttle: f64,
    /// Steering input, `[-1, 1]` (negative = left).
    #[serde(default)]
    pub steer: f64,
    /// Brake input, `[0, 1]`.
    #[serde(default)]
    pub brake: f64,
}

impl Decision {
    /// A neutral decision: no throttle, no steer, no brake.
    pub const fn coast() -> Self {
        Self {
            throttle: 0.0,
            steer: 0.0,
            brake: 0.0,
        }
    }

    /// Return a copy with every component sanitized to its legal range.
    ///
    /// Non-finite values (NaN, infinities) become `0.0` before clamping.
    pub fn clamped(&self) -> Self {
        Self {
            throttle: clamp_component(self.throttle, 0.0, 1.0),
            steer: clamp_component(self.steer, -1.0, 1.0),
            brake: clamp_component(self.brake, 0.0, 1.0),
        }
    }
}

/// Clamp a single control component, treating non-finite input as zero.
fn clamp_component(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_finite() {
        value.clamp(lo, hi)
    } else {
        0.0
    }
}

/// Physics constants for one car. Tweakable per entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarProfile {
    /// Vehicle mass in kilograms.
    pub mass: f64,
    /// Top speed in meters per second.
    pub max_speed: f64,
    /// Peak engine acceleration in m/s^2.
    pub max_accel: f64,
    /// Brake deceleration multiplier relative to `max_accel`.
    pub braking_factor: f64,
    /// Orientation change per full steer input at top speed (radians).
    pub steering_sensitivity: f64,
    /// Fuel percent consumed per meter, scaled by throttle.
    pub fuel_rate: f64,
    /// Tire wear percent accrued per meter, scaled by steering.
    pub wear_rate: f64,
}

impl Default for CarProfile {
    fn default() -> Self {
        Self {
            mass: 800.0,
            max_speed: 95.0,
            max_accel: 20.0,
            braking_factor: 2.0,
            steering_sensitivity: 0.05,
            fuel_rate: 0.0005,
            wear_rate: 0.000_1,
        }
    }
}

/// One competing vehicle: kinematics, resources, progress, and links to
/// the agent / team / persisted entry that own it.
///
/// Mutated only by the tick loop while its race is active. `speed` stays
/// within `[0, profile.max_speed]`; `fuel` only decreases and
/// `tire_wear` / `damage` only increase while the car is `Running`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Car {
    /// Car identity.
    pub id: CarId,
    /// Driving agent controlling this car, if linked.
    pub agent_id: Option<AgentId>,
    /// Owning team, if linked.
    pub team_id: Option<TeamId>,
    /// Persisted race-entry row, if linked.
    pub entry_id: Option<EntryId>,
    /// Location in track coordinate space.
    pub position: Position,
    /// Current speed in m/s (never negative).
    pub speed: f64,
    /// Net acceleration applied on the last tick, m/s^2.
    pub acceleration: f64,
    /// Heading in radians.
    pub orientation: f64,
    /// Remaining fuel, percent `[0, 100]`.
    pub fuel: f64,
    /// Tire wear, percent `[0, 100]` (0 fresh, 100 worn).
    pub tire_wear: f64,
    /// Accumulated damage, percent `[0, 100]`.
    pub damage: f64,
    /// Current lap, starting at 1.
    pub lap: u32,
    /// Distance progressed along the current lap, meters.
    pub lap_distance: f64,
    /// Total distance covered, meters.
    pub total_distance: f64,
    /// Car lifecycle state.
    pub status: CarStatus,
    /// Physics constants.
    pub profile: CarProfile,
    /// Wall-clock time of the last state change.
    pub updated_at: DateTime<Utc>,
}

impl Car {
    /// Create a new car at the given grid position with default
    /// kinematic and resource state, in `Running` status.
    pub fn new(start: Position, profile: CarProfile) -> Self {
        Self {
            id: CarId::new(),
            agent_id: None,
            team_id: None,
            entry_id: None,
            position: start,
            speed: 0.0,
            acceleration: 0.0,
            orientation: 0.0,
            fuel: 100.0,
            tire_wear: 0.0,
            damage: 0.0,
            lap: 1,
            lap_distance: 0.0,
            total_distance: 0.0,
            status: CarStatus::Running,
            profile,
            updated_at: Utc::now(),
        }
    }
}

/// A single ordered point along a circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// X coordinate in meters.
    pub x: f64,
    /// Y coordinate in meters.
    pub y: f64,
    /// Optional advisory speed at this waypoint, m/s.
    pub speed_limit: Option<f64>,
    /// Optional display name (e.g. a corner name).
    pub name: Option<String>,
}

/// A pit stall along the pit lane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitBox {
    /// X coordinate in meters.
    pub x: f64,
    /// Y coordinate in meters.
    pub y: f64,
    /// Stall length in meters.
    pub length: f64,
}

/// Static track geometry. Immutable after creation and shared by
/// reference across every car in a race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    /// Circuit identity.
    pub id: CircuitId,
    /// Display name.
    pub name: String,
    /// Lap length in meters; must be positive.
    pub track_length: f64,
    /// Ordered waypoint sequence (may be empty).
    pub waypoints: Vec<Waypoint>,
    /// Pit stalls (may be empty).
    pub pit_boxes: Vec<PitBox>,
    /// Grid / start-finish coordinate.
    pub start: Position,
    /// Optional free-form description.
    pub description: Option<String>,
}

/// One immutable snapshot of a car's state at a tick.
///
/// Owned first by the in-memory telemetry buffer, then by the persistent
/// sink. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// The race that produced this sample.
    pub race_id: RaceId,
    /// Persisted entry row for the car, if linked.
    pub entry_id: Option<EntryId>,
    /// The car this sample describes.
    pub car_id: CarId,
    /// The driving agent, if linked.
    pub agent_id: Option<AgentId>,
    /// Wall-clock time the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Simulation timestep (seconds) that produced this sample.
    pub tick_interval: f64,
    /// Lap the car was on.
    pub lap: u32,
    /// Speed in m/s.
    pub speed: f64,
    /// Track position.
    pub position: Position,
    /// Heading in radians.
    pub orientation: f64,
    /// Remaining fuel percent, if reported.
    pub fuel: Option<f64>,
    /// Tire wear percent, if reported.
    pub tire_wear: Option<f64>,
    /// The decision that was applied this tick (post-clamp).
    pub decision: Decision,
}

/// Visibility metadata attached to a live subscriber connection.
///
/// Computed by the (out-of-scope) transport layer at connect time and
/// only ever read by the broadcast fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    /// External identity of the subscriber.
    pub user_id: String,
    /// Subscriber role.
    pub role: ConnectionRole,
    /// Team the subscriber belongs to, if any.
    pub team_id: Option<TeamId>,
    /// Entries the subscriber is explicitly allowed to see privately.
    pub allowed_entries: BTreeSet<EntryId>,
}

impl ConnectionMetadata {
    /// Metadata for an anonymous spectator with no private access.
    pub fn spectator(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: ConnectionRole::Spectator,
            team_id: None,
            allowed_entries: BTreeSet::new(),
        }
    }
}
