//! The race lifecycle manager.
//!
//! [`RaceEngine`] is an explicit instance -- no global singletons --
//! holding the race registry, the shared telemetry store, the shared
//! connection registry, and the configured decision provider. It is
//! constructed once at process start and passed to whatever API layer
//! fronts it; independent instances are fully isolated, which is what
//! makes engine-level tests cheap.
//!
//! Every operation returns a `Result` rather than panicking across the
//! boundary, and only [`EngineError`] variants are ever surfaced.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use slipstream_broadcast::ConnectionRegistry;
use slipstream_decision::DecisionProvider;
use slipstream_telemetry::{TelemetrySink, TelemetryStore};
use slipstream_types::{
    BroadcastEvent, Car, CarId, ConnectionId, ConnectionMetadata, RaceId, RaceStatus,
};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{ContextSettings, EngineConfig, SimulationSettings};
use crate::control::RaceControl;
use crate::error::EngineError;
use crate::race::{EntrySpec, Race, RaceSnapshot, RaceSpec};
use crate::tick::{self, RaceRuntime};

/// Registry entry for one race: its state, its control handle, and the
/// tick-loop task while one is running.
struct RaceHandle {
    race: Arc<RwLock<Race>>,
    control: Arc<RaceControl>,
    task: Option<JoinHandle<()>>,
}

/// The central orchestrator for running races.
pub struct RaceEngine {
    simulation: SimulationSettings,
    context: ContextSettings,
    provider: Arc<DecisionProvider>,
    telemetry: Arc<TelemetryStore>,
    connections: Arc<ConnectionRegistry>,
    races: Mutex<BTreeMap<RaceId, RaceHandle>>,
}

impl RaceEngine {
    /// Build an engine from configuration and a telemetry sink, with
    /// the decision provider selected by the config.
    pub fn new(config: &EngineConfig, sink: TelemetrySink) -> Self {
        let provider = DecisionProvider::from_config(&config.provider);
        Self::with_provider(config, sink, provider)
    }

    /// Build an engine with an explicitly chosen provider.
    pub fn with_provider(
        config: &EngineConfig,
        sink: TelemetrySink,
        provider: DecisionProvider,
    ) -> Self {
        Self {
            simulation: config.simulation.clone(),
            context: config.context.clone(),
            provider: Arc::new(provider),
            telemetry: Arc::new(TelemetryStore::new(config.telemetry.clone(), sink)),
            connections: Arc::new(ConnectionRegistry::new(config.broadcast.channel_capacity)),
            races: Mutex::new(BTreeMap::new()),
        }
    }

    /// Create a race in `Pending` state. No cars are required yet.
    ///
    /// An absent or invalid circuit is replaced by the default circuit
    /// (logged), so creation itself cannot fail.
    pub async fn create_race(&self, spec: RaceSpec) -> RaceId {
        let circuit = match spec.circuit.clone() {
            Some(circuit) => match slipstream_track::validate(&circuit) {
                Ok(()) => circuit,
                Err(e) => {
                    warn!(error = %e, "invalid circuit in race spec, using default circuit");
                    slipstream_track::default_circuit()
                }
            },
            None => slipstream_track::default_circuit(),
        };

        let race = Race::new(&spec, Arc::new(circuit));
        let race_id = race.id;
        let mut races = self.races.lock().await;
        races.insert(
            race_id,
            RaceHandle {
                race: Arc::new(RwLock::new(race)),
                control: Arc::new(RaceControl::new()),
                task: None,
            },
        );
        info!(race_id = %race_id, name = spec.name, max_laps = spec.max_laps, "race created");
        race_id
    }

    /// Register one entry (car) in a pending race.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown race and
    /// [`EngineError::InvalidTransition`] once the race has left
    /// `Pending` -- the tick loop iterates a frozen car keyset.
    pub async fn register_entry(
        &self,
        race_id: RaceId,
        entry: EntrySpec,
    ) -> Result<CarId, EngineError> {
        let races = self.races.lock().await;
        let handle = races
            .get(&race_id)
            .ok_or(EngineError::NotFound { race_id })?;
        let mut race = handle.race.write().await;

        if race.status != RaceStatus::Pending {
            return Err(EngineError::InvalidTransition {
                race_id,
                status: race.status,
                action: "register an entry for",
            });
        }

        let start = race
            .circuit
            .as_ref()
            .map(|c| c.start)
            .unwrap_or_default();
        let mut car = Car::new(start, entry.profile.unwrap_or_default());
        car.agent_id = entry.agent_id;
        car.team_id = entry.team_id;
        car.entry_id = entry.entry_id;
        let car_id = race.add_car(car);

        info!(race_id = %race_id, car_id = %car_id, cars = race.cars.len(), "entry registered");
        Ok(car_id)
    }

    /// Start a pending race: transition to `Active`, record the start
    /// time, and spawn its tick-loop task.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown race and
    /// [`EngineError::InvalidTransition`] unless the race is `Pending`.
    pub async fn start_race(&self, race_id: RaceId) -> Result<(), EngineError> {
        let mut races = self.races.lock().await;
        let handle = races
            .get_mut(&race_id)
            .ok_or(EngineError::NotFound { race_id })?;

        let car_count = {
            let mut race = handle.race.write().await;
            if race.status != RaceStatus::Pending {
                return Err(EngineError::InvalidTransition {
                    race_id,
                    status: race.status,
                    action: "start",
                });
            }
            race.status = RaceStatus::Active;
            race.started_at = Some(Utc::now());
            race.cars.len()
        };

        let runtime = RaceRuntime {
            race: Arc::clone(&handle.race),
            control: Arc::clone(&handle.control),
            provider: Arc::clone(&self.provider),
            telemetry: Arc::clone(&self.telemetry),
            connections: Arc::clone(&self.connections),
            simulation: self.simulation.clone(),
            context: self.context.clone(),
        };
        handle.task = Some(tokio::spawn(tick::run_race(runtime)));

        info!(race_id = %race_id, cars = car_count, "race started");
        Ok(())
    }

    /// Stop a race.
    ///
    /// Requests cooperative cancellation of the tick loop if one is
    /// running and waits (bounded) for it to acknowledge; then the race
    /// is unconditionally left terminal. Idempotent: stopping a race
    /// that already finished or was already cancelled succeeds as a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown race.
    pub async fn stop_race(&self, race_id: RaceId) -> Result<(), EngineError> {
        let (race, control, task) = {
            let mut races = self.races.lock().await;
            let handle = races
                .get_mut(&race_id)
                .ok_or(EngineError::NotFound { race_id })?;
            (
                Arc::clone(&handle.race),
                Arc::clone(&handle.control),
                handle.task.take(),
            )
        };

        control.request_stop();
        if let Some(task) = task {
            if control.wait_for_exit(self.simulation.stop_ack_timeout()).await {
                let _ = task.await;
            } else {
                warn!(race_id = %race_id, "race loop did not acknowledge stop in time, aborting task");
                task.abort();
            }
        }

        // Finalize unconditionally: even if the loop already exited (or
        // never ran), the race must not be left non-terminal.
        let now = Utc::now();
        let newly_cancelled = {
            let mut race = race.write().await;
            if race.status.is_terminal() {
                false
            } else {
                race.status = RaceStatus::Cancelled;
                race.ended_at = Some(now);
                race.metadata
                    .insert(String::from("cancelled_at"), now.to_rfc3339());
                true
            }
        };

        if newly_cancelled {
            info!(race_id = %race_id, "race cancelled by stop request");
            self.connections.publish_event(&BroadcastEvent::RaceCancelled {
                race_id,
                timestamp: now,
            });
        }
        self.connections.close_race(race_id);
        let _ = self.telemetry.flush_race(race_id).await;
        Ok(())
    }

    /// Read-only projection of a race's current state.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown race.
    pub async fn get_race(&self, race_id: RaceId) -> Result<RaceSnapshot, EngineError> {
        let race = {
            let races = self.races.lock().await;
            let handle = races
                .get(&race_id)
                .ok_or(EngineError::NotFound { race_id })?;
            Arc::clone(&handle.race)
        };
        let race = race.read().await;
        Ok(race.snapshot())
    }

    /// Snapshots of every race in the registry, creation order.
    pub async fn list_races(&self) -> Vec<RaceSnapshot> {
        let handles: Vec<Arc<RwLock<Race>>> = {
            let races = self.races.lock().await;
            races.values().map(|h| Arc::clone(&h.race)).collect()
        };
        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            snapshots.push(handle.read().await.snapshot());
        }
        snapshots
    }

    /// Register a subscriber connection for a race.
    ///
    /// Returns the issued connection id and the receiving half of the
    /// connection's event channel for the transport layer to drain.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown race.
    pub async fn subscribe(
        &self,
        race_id: RaceId,
        metadata: ConnectionMetadata,
    ) -> Result<(ConnectionId, mpsc::Receiver<BroadcastEvent>), EngineError> {
        {
            let races = self.races.lock().await;
            if !races.contains_key(&race_id) {
                return Err(EngineError::NotFound { race_id });
            }
        }
        Ok(self.connections.connect(race_id, metadata))
    }

    /// The shared telemetry store (read APIs, flusher spawning).
    pub fn telemetry(&self) -> &Arc<TelemetryStore> {
        &self.telemetry
    }

    /// The shared connection registry.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use slipstream_decision::FixedProvider;
    use slipstream_telemetry::MemorySink;
    use slipstream_types::{CarProfile, CarStatus, Decision, TeamId};

    use super::*;

    fn fast_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.simulation.tick_interval_secs = 0.0;
        config.simulation.decision_timeout_secs = 0.2;
        config.simulation.stop_ack_timeout_secs = 2.0;
        config
    }

    fn full_throttle() -> DecisionProvider {
        DecisionProvider::Fixed(FixedProvider::new(Decision {
            throttle: 1.0,
            steer: 0.0,
            brake: 0.0,
        }))
    }

    fn sprint_spec(track_length: f64, max_laps: u32) -> RaceSpec {
        RaceSpec {
            name: String::from("Sprint"),
            max_laps,
            circuit: Some(slipstream_types::Circuit {
                track_length,
                ..slipstream_track::default_circuit()
            }),
        }
    }

    async fn wait_for_terminal(engine: &RaceEngine, race_id: RaceId) -> RaceSnapshot {
        for _ in 0..2000 {
            let snapshot = engine.get_race(race_id).await.unwrap();
            if snapshot.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        engine.get_race(race_id).await.unwrap()
    }

    #[tokio::test]
    async fn unknown_race_is_not_found() {
        let engine = RaceEngine::with_provider(
            &fast_config(),
            TelemetrySink::Memory(MemorySink::new()),
            full_throttle(),
        );
        let ghost = RaceId::new();
        assert!(matches!(
            engine.get_race(ghost).await,
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            engine.start_race(ghost).await,
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            engine.register_entry(ghost, EntrySpec::default()).await,
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            engine.stop_race(ghost).await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn created_race_is_pending_with_circuit() {
        let engine = RaceEngine::with_provider(
            &fast_config(),
            TelemetrySink::Memory(MemorySink::new()),
            full_throttle(),
        );
        let race_id = engine.create_race(RaceSpec::default()).await;
        let snapshot = engine.get_race(race_id).await.unwrap();
        assert_eq!(snapshot.status, RaceStatus::Pending);
        assert!(snapshot.circuit.is_some());
        assert!(snapshot.cars.is_empty());
    }

    #[tokio::test]
    async fn register_after_start_is_rejected() {
        let engine = RaceEngine::with_provider(
            &fast_config(),
            TelemetrySink::Memory(MemorySink::new()),
            full_throttle(),
        );
        let race_id = engine.create_race(sprint_spec(1_000_000.0, 100)).await;
        let _ = engine
            .register_entry(race_id, EntrySpec::default())
            .await
            .unwrap();
        engine.start_race(race_id).await.unwrap();

        assert!(matches!(
            engine.register_entry(race_id, EntrySpec::default()).await,
            Err(EngineError::InvalidTransition { .. })
        ));

        engine.stop_race(race_id).await.unwrap();
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let engine = RaceEngine::with_provider(
            &fast_config(),
            TelemetrySink::Memory(MemorySink::new()),
            full_throttle(),
        );
        let race_id = engine.create_race(sprint_spec(1_000_000.0, 100)).await;
        engine.start_race(race_id).await.unwrap();

        assert!(matches!(
            engine.start_race(race_id).await,
            Err(EngineError::InvalidTransition { .. })
        ));

        engine.stop_race(race_id).await.unwrap();
        // And a terminal race cannot be restarted either.
        assert!(matches!(
            engine.start_race(race_id).await,
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn full_throttle_race_reaches_finished() {
        let sink = MemorySink::new();
        let engine = RaceEngine::with_provider(
            &fast_config(),
            TelemetrySink::Memory(sink.clone()),
            full_throttle(),
        );
        let race_id = engine.create_race(sprint_spec(200.0, 3)).await;
        let car_id = engine
            .register_entry(race_id, EntrySpec::default())
            .await
            .unwrap();
        engine.start_race(race_id).await.unwrap();

        let snapshot = wait_for_terminal(&engine, race_id).await;
        assert_eq!(snapshot.status, RaceStatus::Finished);
        let car = snapshot.cars.get(&car_id).unwrap();
        assert_eq!(car.status, CarStatus::Finished);
        assert!(car.lap > 3);
        assert!(snapshot.ended_at.is_some());

        // Speed stayed inside the envelope on every recorded sample.
        let samples = engine.telemetry().latest(race_id, 10_000);
        assert!(!samples.is_empty());
        assert!(
            samples
                .iter()
                .all(|s| s.speed >= 0.0 && s.speed <= car.profile.max_speed)
        );
        // The final flush on loop exit persisted everything pending.
        assert_eq!(engine.telemetry().pending_len(race_id), 0);
        assert!(sink.persisted_len() > 0);
    }

    #[tokio::test]
    async fn stop_race_cancels_and_is_idempotent() {
        let engine = RaceEngine::with_provider(
            &fast_config(),
            TelemetrySink::Memory(MemorySink::new()),
            full_throttle(),
        );
        let race_id = engine.create_race(sprint_spec(1_000_000.0, 100)).await;
        let _ = engine
            .register_entry(race_id, EntrySpec::default())
            .await
            .unwrap();
        engine.start_race(race_id).await.unwrap();

        engine.stop_race(race_id).await.unwrap();
        let snapshot = engine.get_race(race_id).await.unwrap();
        assert_eq!(snapshot.status, RaceStatus::Cancelled);
        assert!(snapshot.metadata.contains_key("cancelled_at"));

        // Second stop is a no-op success; the race stays cancelled.
        engine.stop_race(race_id).await.unwrap();
        let snapshot = engine.get_race(race_id).await.unwrap();
        assert_eq!(snapshot.status, RaceStatus::Cancelled);
    }

    #[tokio::test]
    async fn stop_pending_race_cancels_without_a_task() {
        let engine = RaceEngine::with_provider(
            &fast_config(),
            TelemetrySink::Memory(MemorySink::new()),
            full_throttle(),
        );
        let race_id = engine.create_race(RaceSpec::default()).await;
        engine.stop_race(race_id).await.unwrap();
        let snapshot = engine.get_race(race_id).await.unwrap();
        assert_eq!(snapshot.status, RaceStatus::Cancelled);
    }

    #[tokio::test]
    async fn stop_after_natural_finish_is_a_noop() {
        let engine = RaceEngine::with_provider(
            &fast_config(),
            TelemetrySink::Memory(MemorySink::new()),
            full_throttle(),
        );
        let race_id = engine.create_race(sprint_spec(100.0, 1)).await;
        let _ = engine
            .register_entry(race_id, EntrySpec::default())
            .await
            .unwrap();
        engine.start_race(race_id).await.unwrap();
        let snapshot = wait_for_terminal(&engine, race_id).await;
        assert_eq!(snapshot.status, RaceStatus::Finished);

        engine.stop_race(race_id).await.unwrap();
        let snapshot = engine.get_race(race_id).await.unwrap();
        // Finished is terminal; stop does not rewrite it to Cancelled.
        assert_eq!(snapshot.status, RaceStatus::Finished);
    }

    #[tokio::test]
    async fn hung_provider_falls_back_every_tick() {
        // A provider that never answers inside the timeout still yields
        // one fallback decision per car per tick.
        let provider = DecisionProvider::Fixed(FixedProvider::with_delay(
            Decision::coast(),
            Duration::from_secs(3600),
        ));
        let sink = MemorySink::new();
        let engine = RaceEngine::with_provider(
            &fast_config(),
            TelemetrySink::Memory(sink.clone()),
            provider,
        );
        let race_id = engine.create_race(sprint_spec(150.0, 1)).await;
        let _ = engine
            .register_entry(race_id, EntrySpec::default())
            .await
            .unwrap();
        engine.start_race(race_id).await.unwrap();

        let snapshot = wait_for_terminal(&engine, race_id).await;
        // The fallback keeps the car moving, so the race still finishes.
        assert_eq!(snapshot.status, RaceStatus::Finished);
        let samples = engine.telemetry().latest(race_id, 10_000);
        assert!(!samples.is_empty());
        // Every applied decision came from the fallback (moderate
        // throttle or the high-speed brake rule), never the hung
        // provider's coast.
        assert!(
            samples
                .iter()
                .all(|s| s.decision.throttle > 0.0 || s.decision.brake > 0.0)
        );
    }

    #[tokio::test]
    async fn crashing_car_does_not_abort_the_race() {
        // A NaN max_accel poisons the first physics step for one car;
        // the other car races on and finishes.
        let engine = RaceEngine::with_provider(
            &fast_config(),
            TelemetrySink::Memory(MemorySink::new()),
            full_throttle(),
        );
        let race_id = engine.create_race(sprint_spec(150.0, 1)).await;
        let doomed = engine
            .register_entry(
                race_id,
                EntrySpec {
                    profile: Some(CarProfile {
                        max_accel: f64::NAN,
                        ..CarProfile::default()
                    }),
                    ..EntrySpec::default()
                },
            )
            .await
            .unwrap();
        let healthy = engine
            .register_entry(race_id, EntrySpec::default())
            .await
            .unwrap();
        engine.start_race(race_id).await.unwrap();

        let snapshot = wait_for_terminal(&engine, race_id).await;
        assert_eq!(snapshot.status, RaceStatus::Finished);
        assert_eq!(snapshot.cars.get(&doomed).unwrap().status, CarStatus::Crashed);
        assert_eq!(
            snapshot.cars.get(&healthy).unwrap().status,
            CarStatus::Finished
        );
    }

    #[tokio::test]
    async fn subscribers_receive_public_and_private_tiers() {
        let engine = RaceEngine::with_provider(
            &fast_config(),
            TelemetrySink::Memory(MemorySink::new()),
            full_throttle(),
        );
        let race_id = engine.create_race(sprint_spec(150.0, 1)).await;
        let team = TeamId::new();
        let _ = engine
            .register_entry(
                race_id,
                EntrySpec {
                    team_id: Some(team),
                    ..EntrySpec::default()
                },
            )
            .await
            .unwrap();

        let (_, mut spectator_rx) = engine
            .subscribe(race_id, ConnectionMetadata::spectator("viewer"))
            .await
            .unwrap();
        let owner_metadata = ConnectionMetadata {
            user_id: String::from("owner"),
            role: slipstream_types::ConnectionRole::Team,
            team_id: Some(team),
            allowed_entries: std::collections::BTreeSet::new(),
        };
        let (_, mut owner_rx) = engine.subscribe(race_id, owner_metadata).await.unwrap();

        engine.start_race(race_id).await.unwrap();
        let _ = wait_for_terminal(&engine, race_id).await;

        let mut spectator_saw_private = false;
        let mut spectator_saw_public = false;
        while let Ok(event) = spectator_rx.try_recv() {
            match event {
                BroadcastEvent::TelemetryUpdatePrivate { .. } => spectator_saw_private = true,
                BroadcastEvent::TelemetryUpdate { .. } => spectator_saw_public = true,
                _ => {}
            }
        }
        assert!(spectator_saw_public);
        assert!(!spectator_saw_private);

        let mut owner_saw_private = false;
        let mut owner_saw_finish = false;
        while let Ok(event) = owner_rx.try_recv() {
            match event {
                BroadcastEvent::TelemetryUpdatePrivate { .. } => owner_saw_private = true,
                BroadcastEvent::RaceFinished { .. } => owner_saw_finish = true,
                _ => {}
            }
        }
        assert!(owner_saw_private);
        assert!(owner_saw_finish);

        // Loop exit purged the race's connections.
        assert_eq!(engine.connections().connection_count(race_id), 0);
    }

    #[tokio::test]
    async fn subscribe_to_unknown_race_is_not_found() {
        let engine = RaceEngine::with_provider(
            &fast_config(),
            TelemetrySink::Memory(MemorySink::new()),
            full_throttle(),
        );
        assert!(matches!(
            engine
                .subscribe(RaceId::new(), ConnectionMetadata::spectator("x"))
                .await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn isolated_engines_do_not_share_races() {
        let engine_a = RaceEngine::with_provider(
            &fast_config(),
            TelemetrySink::Memory(MemorySink::new()),
            full_throttle(),
        );
        let engine_b = RaceEngine::with_provider(
            &fast_config(),
            TelemetrySink::Memory(MemorySink::new()),
            full_throttle(),
        );
        let race_id = engine_a.create_race(RaceSpec::default()).await;
        assert!(engine_a.get_race(race_id).await.is_ok());
        assert!(matches!(
            engine_b.get_race(race_id).await,
            Err(EngineError::NotFound { .. })
        ));
        assert_eq!(engine_a.list_races().await.len(), 1);
        assert!(engine_b.list_races().await.is_empty());
    }
}
