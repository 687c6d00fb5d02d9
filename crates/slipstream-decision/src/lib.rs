//! Decision providers for the Slipstream race simulation.
//!
//! A provider turns a [`DecisionContext`] into a driving [`Decision`].
//! The tick loop is backend-agnostic: it calls
//! [`DecisionProvider::decide`] under its own timeout and falls back to
//! the deterministic [`fallback_controller`] on any failure, so nothing
//! in this crate is allowed to take a race down.
//!
//! Backends use enum dispatch rather than trait objects because async
//! methods are not dyn-compatible.
//!
//! [`DecisionContext`]: slipstream_types::DecisionContext
//! [`Decision`]: slipstream_types::Decision

mod config;
mod error;
mod fallback;
mod parse;
mod provider;
mod remote;

pub use config::ProviderConfig;
pub use error::ProviderError;
pub use fallback::{BRAKE_SPEED_THRESHOLD, fallback_controller};
pub use parse::parse_decision;
pub use provider::{DecisionProvider, FixedProvider, HeuristicProvider};
pub use remote::RemoteProvider;
