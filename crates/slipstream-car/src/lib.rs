//! Per-tick car physics and lap progression.
//!
//! The functions here are pure with respect to the outside world: they
//! read and mutate a single [`Car`] and touch nothing else. The tick
//! loop owns the ordering (decision, then physics, then lap check) and
//! the failure policy (any physics error marks the car crashed without
//! aborting the race).
//!
//! [`Car`]: slipstream_types::Car

mod error;
mod physics;

pub use error::PhysicsError;
pub use physics::{LapOutcome, StepDelta, advance_lap, apply_decision};
