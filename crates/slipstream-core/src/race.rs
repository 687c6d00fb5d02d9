//! The race aggregate: cars, circuit, status, and timestamps.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use slipstream_types::{
    AgentId, Car, CarId, CarProfile, CarStatus, Circuit, EntryId, RaceId, RaceStatus, TeamId,
};

/// Parameters for creating a race.
#[derive(Debug, Clone)]
pub struct RaceSpec {
    /// Display name.
    pub name: String,
    /// Laps required to finish; must be positive.
    pub max_laps: u32,
    /// Circuit to race on; the engine substitutes a default when absent.
    pub circuit: Option<Circuit>,
}

impl Default for RaceSpec {
    fn default() -> Self {
        Self {
            name: String::from("Unnamed Race"),
            max_laps: 3,
            circuit: None,
        }
    }
}

/// Parameters for registering one entry (car) in a race.
#[derive(Debug, Clone, Default)]
pub struct EntrySpec {
    /// Driving agent to link, if any.
    pub agent_id: Option<AgentId>,
    /// Owning team to link, if any.
    pub team_id: Option<TeamId>,
    /// Persisted entry row to link, if any.
    pub entry_id: Option<EntryId>,
    /// Physics constants; defaults apply when absent.
    pub profile: Option<CarProfile>,
}

/// One race and everything it owns.
///
/// Owned by the lifecycle manager behind a lock; mutated by the tick
/// loop while `Active` and read-only once terminal. The car *keyset* is
/// frozen the moment the race leaves `Pending` -- only car values
/// change after that.
#[derive(Debug, Clone)]
pub struct Race {
    /// Race identity.
    pub id: RaceId,
    /// Display name.
    pub name: String,
    /// The circuit raced on, shared across all cars.
    pub circuit: Option<Arc<Circuit>>,
    /// Laps required to finish.
    pub max_laps: u32,
    /// Leading lap across all cars (derived).
    pub current_lap: u32,
    /// Cars keyed by id.
    pub cars: BTreeMap<CarId, Car>,
    /// Lifecycle state.
    pub status: RaceStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time the race went `Active`, if it has.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the race reached a terminal state, if it has.
    pub ended_at: Option<DateTime<Utc>>,
    /// Free-form diagnostics (error text, cancellation time).
    pub metadata: BTreeMap<String, String>,
}

impl Race {
    /// Create a pending race from a spec and its resolved circuit.
    ///
    /// `max_laps` is floored at 1.
    pub fn new(spec: &RaceSpec, circuit: Arc<Circuit>) -> Self {
        Self {
            id: RaceId::new(),
            name: spec.name.clone(),
            circuit: Some(circuit),
            max_laps: spec.max_laps.max(1),
            current_lap: 0,
            cars: BTreeMap::new(),
            status: RaceStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Add a car. Caller enforces the `Pending`-only rule.
    pub fn add_car(&mut self, car: Car) -> CarId {
        let id = car.id;
        self.cars.insert(id, car);
        id
    }

    /// Recompute `current_lap` as the maximum lap across cars.
    pub fn recompute_current_lap(&mut self) {
        self.current_lap = self
            .cars
            .values()
            .map(|c| c.lap)
            .max()
            .unwrap_or(self.current_lap);
    }

    /// Number of cars still in `Running` status.
    pub fn running_car_count(&self) -> usize {
        self.cars
            .values()
            .filter(|c| c.status == CarStatus::Running)
            .count()
    }

    /// A read-only projection of the current race state.
    pub fn snapshot(&self) -> RaceSnapshot {
        RaceSnapshot {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            max_laps: self.max_laps,
            current_lap: self.current_lap,
            circuit: self.circuit.as_deref().cloned(),
            cars: self.cars.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            metadata: self.metadata.clone(),
        }
    }
}

/// Point-in-time projection of a race, served to API callers.
#[derive(Debug, Clone, Serialize)]
pub struct RaceSnapshot {
    /// Race identity.
    pub id: RaceId,
    /// Display name.
    pub name: String,
    /// Lifecycle state at snapshot time.
    pub status: RaceStatus,
    /// Laps required to finish.
    pub max_laps: u32,
    /// Leading lap across all cars.
    pub current_lap: u32,
    /// The circuit raced on.
    pub circuit: Option<Circuit>,
    /// Car states at snapshot time.
    pub cars: BTreeMap<CarId, Car>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Start time, if started.
    pub started_at: Option<DateTime<Utc>>,
    /// End time, if terminal.
    pub ended_at: Option<DateTime<Utc>>,
    /// Diagnostics map.
    pub metadata: BTreeMap<String, String>,
}
