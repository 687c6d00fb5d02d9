//! The unified provider enum and the local backends.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng as _, SeedableRng as _};
use slipstream_types::{Decision, DecisionContext};
use tracing::warn;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::fallback::fallback_controller;
use crate::remote::RemoteProvider;

/// A source of per-tick driving decisions.
///
/// Uses enum dispatch instead of trait objects because async methods
/// are not dyn-compatible. The variant is selected by configuration;
/// the tick loop never needs to know which backend is active.
pub enum DecisionProvider {
    /// OpenAI-compatible chat completions API.
    Remote(RemoteProvider),
    /// Local rule-based driver with seeded jitter.
    Heuristic(HeuristicProvider),
    /// Scripted driver returning a fixed decision, optionally delayed.
    Fixed(FixedProvider),
}

impl DecisionProvider {
    /// Build a provider from configuration.
    ///
    /// A `remote` backend without an API key, or an unknown backend
    /// name, degrades to the heuristic with a warning -- a misconfigured
    /// provider must not prevent races from running.
    pub fn from_config(config: &ProviderConfig) -> Self {
        match config.backend.as_str() {
            "remote" => {
                if config.api_key.is_empty() {
                    warn!("remote decision backend selected but no API key configured, using heuristic");
                    Self::Heuristic(HeuristicProvider::new(config.heuristic_seed))
                } else {
                    Self::Remote(RemoteProvider::new(config))
                }
            }
            "heuristic" => Self::Heuristic(HeuristicProvider::new(config.heuristic_seed)),
            other => {
                warn!(backend = other, "unknown decision backend, using heuristic");
                Self::Heuristic(HeuristicProvider::new(config.heuristic_seed))
            }
        }
    }

    /// Obtain a decision for the given context.
    ///
    /// The caller is expected to bound this call with a timeout and to
    /// re-clamp the result; both local backends return clamped values
    /// already.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the backend cannot produce a
    /// usable decision (remote failures after retries). Local backends
    /// are infallible.
    pub async fn decide(&self, ctx: &DecisionContext) -> Result<Decision, ProviderError> {
        match self {
            Self::Remote(backend) => backend.decide(ctx).await,
            Self::Heuristic(backend) => Ok(backend.decide(ctx)),
            Self::Fixed(backend) => Ok(backend.decide().await),
        }
    }

    /// Human-readable backend name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Remote(_) => "remote",
            Self::Heuristic(_) => "heuristic",
            Self::Fixed(_) => "fixed",
        }
    }
}

impl std::fmt::Debug for DecisionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DecisionProvider").field(&self.name()).finish()
    }
}

/// A local driver: the fallback controller plus small seeded jitter so
/// cars on the same strategy don't move in lockstep.
pub struct HeuristicProvider {
    rng: Mutex<SmallRng>,
}

impl HeuristicProvider {
    /// Create a heuristic driver with the given jitter seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }

    /// Produce a decision: the deterministic base with jitter applied.
    pub fn decide(&self, ctx: &DecisionContext) -> Decision {
        let base = fallback_controller(ctx);
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Decision {
            throttle: base.throttle + rng.random_range(-0.05..=0.05),
            steer: base.steer + rng.random_range(-0.1..=0.1),
            brake: base.brake,
        }
        .clamped()
    }
}

/// A scripted driver that always returns the same decision, optionally
/// after a fixed delay.
///
/// Lets the tick cycle be exercised end-to-end without a model backend,
/// and (with a delay above the engine's decision timeout) drives the
/// timeout-fallback path in tests.
#[derive(Debug, Clone)]
pub struct FixedProvider {
    decision: Decision,
    delay: Duration,
}

impl FixedProvider {
    /// A provider that immediately returns `decision`.
    pub const fn new(decision: Decision) -> Self {
        Self {
            decision,
            delay: Duration::ZERO,
        }
    }

    /// A provider that waits `delay` before answering.
    pub const fn with_delay(decision: Decision, delay: Duration) -> Self {
        Self { decision, delay }
    }

    /// Return the scripted decision.
    pub async fn decide(&self) -> Decision {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.decision.clamped()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use slipstream_types::{Car, CarProfile, Position, RaceId, RaceSummary, TrackSummary};

    use super::*;

    fn make_context() -> DecisionContext {
        DecisionContext {
            timestamp: Utc::now(),
            race: RaceSummary {
                id: RaceId::new(),
                name: String::from("Test"),
                lap: 1,
                max_laps: 3,
                current_lap: 1,
                total_cars: 2,
            },
            car: Car::new(Position::new(0.0, 0.0), CarProfile::default()),
            track: TrackSummary {
                track_length: 5000.0,
                next_waypoint: None,
                distance_to_next_waypoint: None,
                remaining_lap_distance: 5000.0,
                pit_boxes: Vec::new(),
            },
            nearby: Vec::new(),
        }
    }

    #[test]
    fn heuristic_output_is_always_legal() {
        let provider = HeuristicProvider::new(7);
        let ctx = make_context();
        for _ in 0..100 {
            let d = provider.decide(&ctx);
            assert!((0.0..=1.0).contains(&d.throttle));
            assert!((-1.0..=1.0).contains(&d.steer));
            assert!((0.0..=1.0).contains(&d.brake));
        }
    }

    #[test]
    fn heuristic_is_reproducible_per_seed() {
        let ctx = make_context();
        let a: Vec<Decision> = {
            let p = HeuristicProvider::new(99);
            (0..10).map(|_| p.decide(&ctx)).collect()
        };
        let b: Vec<Decision> = {
            let p = HeuristicProvider::new(99);
            (0..10).map(|_| p.decide(&ctx)).collect()
        };
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn fixed_returns_scripted_decision() {
        let decision = Decision {
            throttle: 1.0,
            steer: 0.0,
            brake: 0.0,
        };
        let provider = DecisionProvider::Fixed(FixedProvider::new(decision));
        let d = provider.decide(&make_context()).await.unwrap();
        assert!((d.throttle - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_backend_degrades_to_heuristic() {
        let config = ProviderConfig {
            backend: String::from("carrier-pigeon"),
            ..ProviderConfig::default()
        };
        let provider = DecisionProvider::from_config(&config);
        assert_eq!(provider.name(), "heuristic");
    }

    #[test]
    fn remote_without_key_degrades_to_heuristic() {
        let config = ProviderConfig {
            backend: String::from("remote"),
            ..ProviderConfig::default()
        };
        let provider = DecisionProvider::from_config(&config);
        assert_eq!(provider.name(), "heuristic");
    }

    #[test]
    fn remote_with_key_selected() {
        let config = ProviderConfig {
            backend: String::from("remote"),
            api_key: String::from("sk-test"),
            ..ProviderConfig::default()
        };
        let provider = DecisionProvider::from_config(&config);
        assert_eq!(provider.name(), "remote");
    }
}
