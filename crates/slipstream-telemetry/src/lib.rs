//! Telemetry buffering and batched persistence.
//!
//! Each race owns an in-memory [`RaceBuffer`]: a capped recent-sample
//! ring that serves read APIs, plus a pending queue feeding the
//! persistent sink. Flushes happen when the pending queue reaches the
//! batch size, on a background interval, and once more when a race
//! ends. A failed flush pushes the batch back to the front of the queue
//! -- delivery to the sink is at-least-once, and sink writes are
//! idempotent on the sample's natural key.
//!
//! The per-race buffer locks are independent of the engine's race
//! registry lock, so persistence stalls never block unrelated races.

mod buffer;
mod config;
mod error;
mod sink;
mod store;

pub use buffer::RaceBuffer;
pub use config::TelemetryConfig;
pub use error::SinkError;
pub use sink::{MemorySink, PostgresSink, TelemetrySink};
pub use store::TelemetryStore;
