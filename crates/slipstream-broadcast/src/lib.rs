//! Subscriber connection registry and telemetry fan-out.
//!
//! Connections are keyed by an explicit [`ConnectionId`] issued at
//! connect time -- never by object identity -- with per-connection
//! visibility metadata held in the registry. Each tick-car-event fans
//! out in two tiers: a public payload for everyone watching the race,
//! and a private payload (fuel, tire wear, the applied decision) only
//! for connections owning the car's team or allow-listed for its entry.
//!
//! Sends are isolated per connection: a closed channel removes that
//! connection alone, a full channel skips that message alone, and
//! neither ever aborts the broadcast to the rest of the room.
//!
//! [`ConnectionId`]: slipstream_types::ConnectionId

mod registry;

pub use registry::{CarUpdate, ConnectionRegistry, DEFAULT_CHANNEL_CAPACITY};
