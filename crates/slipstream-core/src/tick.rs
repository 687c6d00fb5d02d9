//! The simulation tick loop.
//!
//! One loop instance supervises exactly one race for its entire active
//! lifetime. Each tick it snapshots the car set, then for every running
//! car: builds a decision context, obtains a decision under a bounded
//! timeout (falling back to the deterministic controller on timeout or
//! provider error), applies physics, checks lap completion, and emits
//! the sample to the telemetry buffer and the broadcast fan-out.
//!
//! The loop never exits leaving the race in a non-terminal state: all
//! cars done finishes it; a stop request or an unrecovered error
//! cancels it, with the error recorded in race metadata. Every exit
//! path performs a final telemetry flush, closes the race's subscriber
//! connections, and acknowledges through [`RaceControl`].
//!
//! [`RaceControl`]: crate::control::RaceControl

use std::sync::Arc;

use chrono::Utc;
use slipstream_broadcast::{CarUpdate, ConnectionRegistry};
use slipstream_car::LapOutcome;
use slipstream_decision::{DecisionProvider, fallback_controller};
use slipstream_telemetry::TelemetryStore;
use slipstream_types::{
    BroadcastEvent, CarId, CarStatus, Circuit, Decision, RaceId, RaceStatus, TelemetrySample,
};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::{ContextSettings, SimulationSettings};
use crate::context;
use crate::control::RaceControl;
use crate::race::Race;

/// Everything one race's tick loop needs, cloned out of the engine at
/// start time so the loop never touches the race registry.
pub struct RaceRuntime {
    /// The supervised race.
    pub race: Arc<RwLock<Race>>,
    /// Cancellation handle shared with the lifecycle manager.
    pub control: Arc<RaceControl>,
    /// The configured decision provider.
    pub provider: Arc<DecisionProvider>,
    /// Shared telemetry store.
    pub telemetry: Arc<TelemetryStore>,
    /// Shared connection registry.
    pub connections: Arc<ConnectionRegistry>,
    /// Tick timing.
    pub simulation: SimulationSettings,
    /// Decision-context bounds.
    pub context: ContextSettings,
}

/// Errors that abort the whole loop.
///
/// This is the designed fatal boundary: anything here forces the race
/// to `Cancelled` with the error recorded in metadata. Per-car and
/// per-subscriber failures never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// The race was started without a circuit to measure laps against.
    #[error("race has no circuit")]
    MissingCircuit,
}

/// Why the loop stopped ticking.
enum LoopEnd {
    /// No car is running anymore.
    Finished,
    /// A stop request was observed.
    Stopped,
}

/// Supervise one race from `Active` to a terminal state.
pub async fn run_race(rt: RaceRuntime) {
    let race_id = { rt.race.read().await.id };
    info!(race_id = %race_id, provider = rt.provider.name(), "race loop starting");

    match run_loop(&rt, race_id).await {
        Ok(LoopEnd::Finished) => finalize_finished(&rt, race_id).await,
        Ok(LoopEnd::Stopped) => finalize_cancelled(&rt, race_id, None).await,
        Err(e) => {
            error!(race_id = %race_id, error = %e, "race loop failed");
            finalize_cancelled(&rt, race_id, Some(e.to_string())).await;
        }
    }

    let _ = rt.telemetry.flush_race(race_id).await;
    rt.connections.close_race(race_id);
    rt.control.acknowledge_exit();

    let status = { rt.race.read().await.status };
    info!(race_id = %race_id, status = ?status, "race loop ended");
}

/// The tick cycle proper. Returns how the race ended, or the fatal
/// error that aborted it.
async fn run_loop(rt: &RaceRuntime, race_id: RaceId) -> Result<LoopEnd, TickError> {
    let dt = rt.simulation.timestep_secs();
    let tick_interval = rt.simulation.tick_interval();
    let mut tick: u64 = 0;

    loop {
        if rt.control.is_stop_requested() {
            return Ok(LoopEnd::Stopped);
        }
        tick = tick.saturating_add(1);

        // Point-in-time snapshot of the race: the loop never iterates
        // the live car map, and every context this tick is built from
        // the same pre-tick state.
        let (snapshot, circuit) = {
            let race = rt.race.read().await;
            let circuit = race.circuit.clone().ok_or(TickError::MissingCircuit)?;
            (race.clone(), circuit)
        };

        let running: Vec<CarId> = snapshot
            .cars
            .values()
            .filter(|c| c.status == CarStatus::Running)
            .map(|c| c.id)
            .collect();
        debug!(race_id = %race_id, tick, cars = running.len(), "tick started");

        for car_id in running {
            if rt.control.is_stop_requested() {
                return Ok(LoopEnd::Stopped);
            }
            let Some(car_snapshot) = snapshot.cars.get(&car_id) else {
                continue;
            };
            let ctx =
                context::build_decision_context(&snapshot, car_snapshot, &circuit, &rt.context);

            let decision = match tokio::time::timeout(
                rt.simulation.decision_timeout(),
                rt.provider.decide(&ctx),
            )
            .await
            {
                Ok(Ok(decision)) => decision.clamped(),
                Ok(Err(e)) => {
                    warn!(race_id = %race_id, car_id = %car_id, error = %e, "decision provider failed, using fallback");
                    fallback_controller(&ctx)
                }
                Err(_) => {
                    warn!(race_id = %race_id, car_id = %car_id, "decision provider timed out, using fallback");
                    fallback_controller(&ctx)
                }
            };

            step_car(rt, race_id, car_id, &decision, dt, &circuit, snapshot.max_laps).await;
        }

        // Termination check over the live state: physics this tick may
        // have finished or crashed cars.
        let any_running = {
            let mut race = rt.race.write().await;
            race.recompute_current_lap();
            race.running_car_count() > 0
        };
        if !any_running {
            return Ok(LoopEnd::Finished);
        }

        if tick_interval.is_zero() {
            // Unpaced mode (tests); still yield so cancellation and
            // subscribers get scheduled.
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                () = tokio::time::sleep(tick_interval) => {}
                () = rt.control.stopped() => return Ok(LoopEnd::Stopped),
            }
        }
    }
}

/// Apply one decision to one car and emit its telemetry and broadcast
/// events. A physics failure retires the car as `Crashed` and emits
/// nothing; the race continues.
#[allow(clippy::too_many_arguments)]
async fn step_car(
    rt: &RaceRuntime,
    race_id: RaceId,
    car_id: CarId,
    decision: &Decision,
    dt: f64,
    circuit: &Circuit,
    max_laps: u32,
) {
    // Mutate under the write lock, but emit (telemetry, broadcast)
    // after dropping it so I/O never stalls readers.
    let stepped = {
        let mut race = rt.race.write().await;
        let Some(car) = race.cars.get_mut(&car_id) else {
            return;
        };
        if car.status != CarStatus::Running {
            return;
        }
        match slipstream_car::apply_decision(car, decision, dt) {
            Ok(_) => {
                let outcome = slipstream_car::advance_lap(car, circuit.track_length, max_laps);
                Some((car.clone(), outcome))
            }
            Err(e) => {
                warn!(race_id = %race_id, car_id = %car_id, error = %e, "physics step failed, car crashed");
                car.status = CarStatus::Crashed;
                car.updated_at = Utc::now();
                None
            }
        }
    };

    let Some((car, outcome)) = stepped else {
        return;
    };
    let now = car.updated_at;

    rt.telemetry
        .record(TelemetrySample {
            race_id,
            entry_id: car.entry_id,
            car_id,
            agent_id: car.agent_id,
            timestamp: now,
            tick_interval: dt,
            lap: car.lap,
            speed: car.speed,
            position: car.position,
            orientation: car.orientation,
            fuel: Some(car.fuel),
            tire_wear: Some(car.tire_wear),
            decision: *decision,
        })
        .await;

    rt.connections.publish_car_update(&CarUpdate {
        race_id,
        car_id,
        agent_id: car.agent_id,
        entry_id: car.entry_id,
        team_id: car.team_id,
        position: car.position,
        speed: car.speed,
        lap: car.lap,
        fuel: car.fuel,
        tire_wear: car.tire_wear,
        decision: *decision,
        timestamp: now,
    });

    if let LapOutcome::Completed { lap, race_complete } = outcome {
        info!(race_id = %race_id, car_id = %car_id, lap, "lap complete");
        rt.connections.publish_event(&BroadcastEvent::LapComplete {
            race_id,
            car_id,
            lap,
            timestamp: now,
        });
        if race_complete {
            info!(race_id = %race_id, car_id = %car_id, "car finished the race");
        }
    }
}

/// Transition the race to `Finished` and announce it.
async fn finalize_finished(rt: &RaceRuntime, race_id: RaceId) {
    let now = Utc::now();
    let transitioned = {
        let mut race = rt.race.write().await;
        if race.status.is_terminal() {
            false
        } else {
            race.status = RaceStatus::Finished;
            race.ended_at = Some(now);
            true
        }
    };
    if transitioned {
        info!(race_id = %race_id, "race finished");
        rt.connections.publish_event(&BroadcastEvent::RaceFinished {
            race_id,
            timestamp: now,
        });
    }
}

/// Transition the race to `Cancelled`, recording the cancellation time
/// and (when present) the fatal error, and announce it.
async fn finalize_cancelled(rt: &RaceRuntime, race_id: RaceId, fatal: Option<String>) {
    let now = Utc::now();
    let transitioned = {
        let mut race = rt.race.write().await;
        if race.status.is_terminal() {
            false
        } else {
            race.status = RaceStatus::Cancelled;
            race.ended_at = Some(now);
            race.metadata
                .insert(String::from("cancelled_at"), now.to_rfc3339());
            if let Some(message) = fatal {
                race.metadata.insert(String::from("error"), message);
            }
            true
        }
    };
    if transitioned {
        info!(race_id = %race_id, "race cancelled");
        rt.connections.publish_event(&BroadcastEvent::RaceCancelled {
            race_id,
            timestamp: now,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use slipstream_decision::FixedProvider;
    use slipstream_telemetry::{MemorySink, TelemetryConfig, TelemetrySink};
    use slipstream_types::{Car, CarProfile, Position};

    use super::*;
    use crate::race::RaceSpec;

    fn make_runtime(race: Race, provider: DecisionProvider) -> RaceRuntime {
        RaceRuntime {
            race: Arc::new(RwLock::new(race)),
            control: Arc::new(RaceControl::new()),
            provider: Arc::new(provider),
            telemetry: Arc::new(TelemetryStore::new(
                TelemetryConfig::default(),
                TelemetrySink::Memory(MemorySink::new()),
            )),
            connections: Arc::new(ConnectionRegistry::default()),
            simulation: SimulationSettings {
                tick_interval_secs: 0.0,
                decision_timeout_secs: 1.0,
                stop_ack_timeout_secs: 1.0,
            },
            context: ContextSettings::default(),
        }
    }

    fn full_throttle_provider() -> DecisionProvider {
        DecisionProvider::Fixed(FixedProvider::new(Decision {
            throttle: 1.0,
            steer: 0.0,
            brake: 0.0,
        }))
    }

    #[tokio::test]
    async fn missing_circuit_is_fatal_and_cancels() {
        let mut race = Race::new(
            &RaceSpec::default(),
            Arc::new(slipstream_track::default_circuit()),
        );
        race.circuit = None;
        race.status = RaceStatus::Active;
        let _ = race.add_car(Car::new(Position::new(0.0, 0.0), CarProfile::default()));

        let rt = make_runtime(race, full_throttle_provider());
        let race_handle = Arc::clone(&rt.race);
        let control = Arc::clone(&rt.control);

        run_race(rt).await;

        let race = race_handle.read().await;
        assert_eq!(race.status, RaceStatus::Cancelled);
        assert!(race.metadata.contains_key("error"));
        assert!(race.metadata.contains_key("cancelled_at"));
        assert!(control.has_exited());
    }

    #[tokio::test]
    async fn race_with_no_cars_finishes_immediately() {
        let mut race = Race::new(
            &RaceSpec::default(),
            Arc::new(slipstream_track::default_circuit()),
        );
        race.status = RaceStatus::Active;

        let rt = make_runtime(race, full_throttle_provider());
        let race_handle = Arc::clone(&rt.race);

        run_race(rt).await;

        assert_eq!(race_handle.read().await.status, RaceStatus::Finished);
    }

    #[tokio::test]
    async fn full_throttle_sprint_reaches_finished() {
        // One lap of a tiny track at full throttle takes a handful of
        // ticks; the loop must reach Finished without pacing sleeps.
        let circuit = slipstream_types::Circuit {
            track_length: 100.0,
            ..slipstream_track::default_circuit()
        };
        let spec = RaceSpec {
            max_laps: 1,
            ..RaceSpec::default()
        };
        let mut race = Race::new(&spec, Arc::new(circuit));
        race.status = RaceStatus::Active;
        let _ = race.add_car(Car::new(Position::new(0.0, 0.0), CarProfile::default()));

        let rt = make_runtime(race, full_throttle_provider());
        let race_handle = Arc::clone(&rt.race);

        run_race(rt).await;

        let race = race_handle.read().await;
        assert_eq!(race.status, RaceStatus::Finished);
        let car = race.cars.values().next().unwrap();
        assert_eq!(car.status, CarStatus::Finished);
        assert!(car.lap > 1);
    }
}
