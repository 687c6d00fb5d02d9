//! Race lifecycle management and the simulation tick loop.
//!
//! This crate is the engine's core: [`RaceEngine`] owns the race
//! registry and validates lifecycle transitions; each active race is
//! supervised by exactly one tick-loop task that drives physics,
//! decision collection, telemetry, and broadcast for its cars until the
//! race reaches a terminal state. The loop never exits leaving a race
//! active: natural completion finishes it, a stop request or an
//! unrecovered error cancels it.
//!
//! [`RaceEngine`]: engine::RaceEngine

pub mod config;
pub mod context;
pub mod control;
pub mod engine;
pub mod error;
pub mod race;
pub mod tick;

pub use config::EngineConfig;
pub use engine::RaceEngine;
pub use error::EngineError;
pub use race::{EntrySpec, Race, RaceSnapshot, RaceSpec};
