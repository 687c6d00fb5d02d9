//! Shared type definitions for the Slipstream race simulation.
//!
//! This crate holds the data model used across the workspace: strongly
//! typed identifiers, race and car state, the driving [`Decision`],
//! telemetry samples, decision-context payloads, and the broadcast
//! event schema. It contains no behavior beyond construction, clamping,
//! and serialization -- physics, buffering, and orchestration live in
//! the crates that consume these types.

pub mod context;
pub mod enums;
pub mod events;
pub mod ids;
pub mod structs;

pub use context::{DecisionContext, NearbyCar, RaceSummary, TrackSummary, WaypointSummary};
pub use enums::{CarStatus, ConnectionRole, RaceStatus};
pub use events::BroadcastEvent;
pub use ids::{AgentId, CarId, CircuitId, ConnectionId, EntryId, RaceId, TeamId};
pub use structs::{
    Car, CarProfile, Circuit, ConnectionMetadata, Decision, PitBox, Position, TelemetrySample,
    Waypoint,
};
