//! Race engine binary for the Slipstream race simulation.
//!
//! Wires the engine together the way a deployment would: configuration,
//! telemetry sink, the engine instance, the background telemetry
//! flusher, and one demo race seeded from the config file.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `slipstream-config.yaml`
//! 3. Select the telemetry sink (Postgres when configured, else memory)
//! 4. Construct the engine and spawn the telemetry flusher
//! 5. Seed the demo race (circuit, grid of entries) and subscribe a
//!    spectator connection
//! 6. Start the race and wait for a terminal state (Ctrl-C stops it)
//! 7. Log the final standings

mod bootstrap;
mod error;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use slipstream_core::{EngineConfig, EntrySpec, RaceEngine, RaceSnapshot, RaceSpec};
use slipstream_telemetry::{MemorySink, PostgresSink, TelemetrySink, TelemetryStore};
use slipstream_types::{ConnectionMetadata, RaceId, TeamId};
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::bootstrap::RaceBootstrap;
use crate::error::BootError;

/// Path of the engine configuration file, relative to the working
/// directory.
const CONFIG_PATH: &str = "slipstream-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step fails or a lifecycle
/// call on the demo race is rejected.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("slipstream-engine starting");

    // 2. Load configuration.
    let config = load_config()?;
    info!(
        tick_interval_secs = config.simulation.tick_interval_secs,
        decision_timeout_secs = config.simulation.decision_timeout_secs,
        provider = config.provider.backend,
        "configuration loaded"
    );

    // 3. Select the telemetry sink.
    let sink = make_sink(&config).await?;

    // 4. Construct the engine and spawn the telemetry flusher.
    let engine = Arc::new(RaceEngine::new(&config, sink));
    let flusher = TelemetryStore::spawn_flusher(Arc::clone(engine.telemetry()));
    info!("engine constructed, telemetry flusher running");

    // 5. Seed the demo race.
    let bootstrap = RaceBootstrap::from_file(Path::new(CONFIG_PATH))?;
    let race_id = seed_race(&engine, &bootstrap).await?;

    let (connection_id, mut events) = engine
        .subscribe(race_id, ConnectionMetadata::spectator("console"))
        .await?;
    let event_logger = tokio::spawn(async move {
        let mut count: u64 = 0;
        while let Some(event) = events.recv().await {
            count = count.saturating_add(1);
            debug!(?event, "broadcast event");
        }
        count
    });
    info!(race_id = %race_id, connection_id = %connection_id, "spectator connection attached");

    // 6. Run the race; Ctrl-C cancels it.
    engine.start_race(race_id).await.map_err(BootError::from)?;
    let snapshot = tokio::select! {
        snapshot = wait_for_terminal(&engine, race_id) => snapshot,
        _ = tokio::signal::ctrl_c() => {
            info!(race_id = %race_id, "interrupt received, stopping race");
            engine.stop_race(race_id).await.map_err(BootError::from)?;
            engine.get_race(race_id).await.map_err(BootError::from)?
        }
    };

    // 7. Final flush and standings.
    flusher.abort();
    engine.telemetry().flush_all().await;
    let events_delivered = event_logger.await.unwrap_or(0);
    log_standings(&snapshot, events_delivered);

    info!(race_id = %race_id, status = ?snapshot.status, "slipstream-engine shutdown complete");
    Ok(())
}

/// Load the engine configuration, falling back to defaults when the
/// file is absent.
fn load_config() -> Result<EngineConfig, BootError> {
    let path = Path::new(CONFIG_PATH);
    if path.exists() {
        Ok(EngineConfig::from_file(path)?)
    } else {
        info!("config file not found, using defaults");
        let mut config = EngineConfig::default();
        config.apply_env_overrides();
        Ok(config)
    }
}

/// Build the telemetry sink: Postgres when a database URL is
/// configured, the in-memory sink otherwise.
async fn make_sink(config: &EngineConfig) -> Result<TelemetrySink, BootError> {
    match &config.database.url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .map_err(|e| BootError::Database {
                    message: format!("failed to connect to postgres: {e}"),
                })?;
            info!("telemetry sink: postgres");
            Ok(TelemetrySink::Postgres(PostgresSink::new(pool)))
        }
        None => {
            info!("telemetry sink: in-memory (no database configured)");
            Ok(TelemetrySink::Memory(MemorySink::new()))
        }
    }
}

/// Create the demo race and register its grid.
async fn seed_race(engine: &RaceEngine, bootstrap: &RaceBootstrap) -> Result<RaceId, BootError> {
    let circuit =
        slipstream_track::oval_circuit(&bootstrap.name, bootstrap.track_length, bootstrap.waypoints);
    let race_id = engine
        .create_race(RaceSpec {
            name: bootstrap.name.clone(),
            max_laps: bootstrap.laps,
            circuit: Some(circuit),
        })
        .await;

    for slot in 0..bootstrap.grid {
        let car_id = engine
            .register_entry(
                race_id,
                EntrySpec {
                    team_id: Some(TeamId::new()),
                    ..EntrySpec::default()
                },
            )
            .await?;
        debug!(race_id = %race_id, car_id = %car_id, slot, "grid entry registered");
    }

    info!(
        race_id = %race_id,
        laps = bootstrap.laps,
        grid = bootstrap.grid,
        track_length = bootstrap.track_length,
        "demo race seeded"
    );
    Ok(race_id)
}

/// Poll until the race reaches a terminal state.
async fn wait_for_terminal(engine: &RaceEngine, race_id: RaceId) -> RaceSnapshot {
    loop {
        if let Ok(snapshot) = engine.get_race(race_id).await
            && snapshot.status.is_terminal()
        {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

/// Log the final classification, leaders first.
fn log_standings(snapshot: &RaceSnapshot, events_delivered: u64) {
    let mut cars: Vec<_> = snapshot.cars.values().collect();
    cars.sort_by(|a, b| {
        b.lap
            .cmp(&a.lap)
            .then_with(|| {
                b.total_distance
                    .partial_cmp(&a.total_distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });
    for (place, car) in cars.iter().enumerate() {
        info!(
            place = place.saturating_add(1),
            car_id = %car.id,
            status = ?car.status,
            lap = car.lap,
            total_distance = format!("{:.0}", car.total_distance),
            fuel = format!("{:.1}", car.fuel),
            "final classification"
        );
    }
    info!(
        status = ?snapshot.status,
        events_delivered,
        "race complete"
    );
}
