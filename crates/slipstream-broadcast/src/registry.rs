//! The per-race connection registry.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use slipstream_types::{
    AgentId, BroadcastEvent, CarId, ConnectionId, ConnectionMetadata, Decision, EntryId, Position,
    RaceId, TeamId,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default per-connection channel capacity.
///
/// A subscriber that falls behind by more than this many events starts
/// missing messages (lag-skip) until it drains its channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Everything the fan-out needs to build both payload tiers for one
/// car on one tick.
#[derive(Debug, Clone)]
pub struct CarUpdate {
    /// The race.
    pub race_id: RaceId,
    /// The car this update describes.
    pub car_id: CarId,
    /// The driving agent, if linked.
    pub agent_id: Option<AgentId>,
    /// The persisted entry row, if linked (drives allow-list checks).
    pub entry_id: Option<EntryId>,
    /// The owning team, if linked (drives team-ownership checks).
    pub team_id: Option<TeamId>,
    /// Track position.
    pub position: Position,
    /// Speed in m/s.
    pub speed: f64,
    /// Current lap.
    pub lap: u32,
    /// Remaining fuel percent (private tier only).
    pub fuel: f64,
    /// Tire wear percent (private tier only).
    pub tire_wear: f64,
    /// The decision applied this tick (private tier only).
    pub decision: Decision,
    /// Wall-clock time of the tick.
    pub timestamp: DateTime<Utc>,
}

/// A registered subscriber: its outbound channel plus visibility
/// metadata.
#[derive(Debug)]
struct Connection {
    sender: mpsc::Sender<BroadcastEvent>,
    metadata: ConnectionMetadata,
}

/// Live subscriber connections grouped by race.
#[derive(Debug)]
pub struct ConnectionRegistry {
    capacity: usize,
    inner: Mutex<BTreeMap<RaceId, BTreeMap<ConnectionId, Connection>>>,
}

impl ConnectionRegistry {
    /// Create a registry with the given per-connection channel capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register a subscriber for a race.
    ///
    /// Issues a fresh [`ConnectionId`] and returns it with the receiving
    /// half of the connection's channel; the transport layer owns the
    /// receiver and forwards events to the wire.
    pub fn connect(
        &self,
        race_id: RaceId,
        metadata: ConnectionMetadata,
    ) -> (ConnectionId, mpsc::Receiver<BroadcastEvent>) {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let connection_id = ConnectionId::new();
        let mut inner = self.lock();
        let room = inner.entry(race_id).or_default();
        room.insert(connection_id, Connection { sender, metadata });
        debug!(race_id = %race_id, connection_id = %connection_id, total = room.len(), "subscriber connected");
        (connection_id, receiver)
    }

    /// Remove one subscriber and its metadata. Returns whether it was
    /// registered.
    pub fn disconnect(&self, race_id: RaceId, connection_id: ConnectionId) -> bool {
        let mut inner = self.lock();
        let Some(room) = inner.get_mut(&race_id) else {
            return false;
        };
        let removed = room.remove(&connection_id).is_some();
        if room.is_empty() {
            inner.remove(&race_id);
        }
        if removed {
            debug!(race_id = %race_id, connection_id = %connection_id, "subscriber disconnected");
        }
        removed
    }

    /// Number of live connections for a race.
    pub fn connection_count(&self, race_id: RaceId) -> usize {
        self.lock().get(&race_id).map_or(0, BTreeMap::len)
    }

    /// Fan out one car's tick update in two tiers.
    ///
    /// Every connection in the race receives the public payload; only
    /// connections whose team owns the car or whose allow-list contains
    /// the car's entry receive the private payload instead.
    pub fn publish_car_update(&self, update: &CarUpdate) {
        let public = BroadcastEvent::TelemetryUpdate {
            race_id: update.race_id,
            car_id: update.car_id,
            agent_id: update.agent_id,
            position: update.position,
            speed: update.speed,
            lap: update.lap,
            timestamp: update.timestamp,
        };
        let private = BroadcastEvent::TelemetryUpdatePrivate {
            race_id: update.race_id,
            car_id: update.car_id,
            agent_id: update.agent_id,
            position: update.position,
            speed: update.speed,
            lap: update.lap,
            timestamp: update.timestamp,
            fuel: update.fuel,
            tire_wear: update.tire_wear,
            decision: update.decision,
        };

        let mut dead = Vec::new();
        {
            let inner = self.lock();
            let Some(room) = inner.get(&update.race_id) else {
                return;
            };
            for (&connection_id, connection) in room {
                let event = if can_view_private(&connection.metadata, update.team_id, update.entry_id)
                {
                    private.clone()
                } else {
                    public.clone()
                };
                if let Some(id) = deliver(connection, connection_id, event) {
                    dead.push(id);
                }
            }
        }
        self.remove_dead(update.race_id, &dead);
    }

    /// Send a race-level event (lap complete, finish, cancel) to every
    /// connection in the race.
    pub fn publish_event(&self, event: &BroadcastEvent) {
        let race_id = event.race_id();
        let mut dead = Vec::new();
        {
            let inner = self.lock();
            let Some(room) = inner.get(&race_id) else {
                return;
            };
            for (&connection_id, connection) in room {
                if let Some(id) = deliver(connection, connection_id, event.clone()) {
                    dead.push(id);
                }
            }
        }
        self.remove_dead(race_id, &dead);
    }

    /// Force-close and purge every connection for a race.
    ///
    /// Dropping the senders closes each subscriber's channel; the
    /// transport layer observes the close and tears down its socket.
    pub fn close_race(&self, race_id: RaceId) {
        let removed = self.lock().remove(&race_id);
        if let Some(room) = removed {
            info!(race_id = %race_id, connections = room.len(), "closed race connections");
        }
    }

    fn remove_dead(&self, race_id: RaceId, dead: &[ConnectionId]) {
        for &connection_id in dead {
            if self.disconnect(race_id, connection_id) {
                warn!(race_id = %race_id, connection_id = %connection_id, "removed dead subscriber");
            }
        }
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, BTreeMap<RaceId, BTreeMap<ConnectionId, Connection>>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// Attempt delivery to one connection. Returns the connection id if the
/// channel is closed and the connection should be removed. A full
/// channel only skips this message for this subscriber.
fn deliver(
    connection: &Connection,
    connection_id: ConnectionId,
    event: BroadcastEvent,
) -> Option<ConnectionId> {
    match connection.sender.try_send(event) {
        Ok(()) => None,
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!(connection_id = %connection_id, "subscriber lagging, skipping event");
            None
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Some(connection_id),
    }
}

/// Whether a connection may see the private payload for a car.
fn can_view_private(
    metadata: &ConnectionMetadata,
    team_id: Option<TeamId>,
    entry_id: Option<EntryId>,
) -> bool {
    if let (Some(team), Some(own_team)) = (team_id, metadata.team_id)
        && team == own_team
    {
        return true;
    }
    if let Some(entry) = entry_id
        && metadata.allowed_entries.contains(&entry)
    {
        return true;
    }
    false
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use slipstream_types::ConnectionRole;

    use super::*;

    fn make_update(race_id: RaceId, team_id: Option<TeamId>, entry_id: Option<EntryId>) -> CarUpdate {
        CarUpdate {
            race_id,
            car_id: CarId::new(),
            agent_id: None,
            entry_id,
            team_id,
            position: Position::new(10.0, 5.0),
            speed: 42.0,
            lap: 2,
            fuel: 88.0,
            tire_wear: 6.0,
            decision: Decision::coast(),
            timestamp: Utc::now(),
        }
    }

    fn team_metadata(team_id: TeamId) -> ConnectionMetadata {
        ConnectionMetadata {
            user_id: String::from("team-user"),
            role: ConnectionRole::Team,
            team_id: Some(team_id),
            allowed_entries: BTreeSet::new(),
        }
    }

    #[test]
    fn public_payload_reaches_every_connection() {
        let registry = ConnectionRegistry::default();
        let race = RaceId::new();
        let (_, mut rx_a) = registry.connect(race, ConnectionMetadata::spectator("a"));
        let (_, mut rx_b) = registry.connect(race, ConnectionMetadata::spectator("b"));

        registry.publish_car_update(&make_update(race, Some(TeamId::new()), None));

        for rx in [&mut rx_a, &mut rx_b] {
            let event = rx.try_recv().unwrap();
            assert!(matches!(event, BroadcastEvent::TelemetryUpdate { .. }));
        }
    }

    #[test]
    fn team_owner_gets_private_tier() {
        let registry = ConnectionRegistry::default();
        let race = RaceId::new();
        let team = TeamId::new();
        let (_, mut rx_owner) = registry.connect(race, team_metadata(team));
        let (_, mut rx_rival) = registry.connect(race, team_metadata(TeamId::new()));
        let (_, mut rx_spectator) = registry.connect(race, ConnectionMetadata::spectator("s"));

        registry.publish_car_update(&make_update(race, Some(team), None));

        assert!(matches!(
            rx_owner.try_recv().unwrap(),
            BroadcastEvent::TelemetryUpdatePrivate { .. }
        ));
        assert!(matches!(
            rx_rival.try_recv().unwrap(),
            BroadcastEvent::TelemetryUpdate { .. }
        ));
        assert!(matches!(
            rx_spectator.try_recv().unwrap(),
            BroadcastEvent::TelemetryUpdate { .. }
        ));
    }

    #[test]
    fn allow_listed_entry_gets_private_tier() {
        let registry = ConnectionRegistry::default();
        let race = RaceId::new();
        let entry = EntryId::new();
        let metadata = ConnectionMetadata {
            user_id: String::from("scout"),
            role: ConnectionRole::Spectator,
            team_id: None,
            allowed_entries: BTreeSet::from([entry]),
        };
        let (_, mut rx) = registry.connect(race, metadata);

        registry.publish_car_update(&make_update(race, None, Some(entry)));

        assert!(matches!(
            rx.try_recv().unwrap(),
            BroadcastEvent::TelemetryUpdatePrivate { .. }
        ));
    }

    #[test]
    fn closed_connection_is_removed_others_still_served() {
        let registry = ConnectionRegistry::default();
        let race = RaceId::new();
        let (_, rx_dead) = registry.connect(race, ConnectionMetadata::spectator("dead"));
        let (_, mut rx_live) = registry.connect(race, ConnectionMetadata::spectator("live"));
        drop(rx_dead);

        registry.publish_car_update(&make_update(race, None, None));

        assert_eq!(registry.connection_count(race), 1);
        assert!(rx_live.try_recv().is_ok());
    }

    #[test]
    fn lagging_connection_skips_but_stays() {
        let registry = ConnectionRegistry::new(1);
        let race = RaceId::new();
        let (_, mut rx) = registry.connect(race, ConnectionMetadata::spectator("slow"));

        // Fill the single-slot channel, then publish again.
        registry.publish_car_update(&make_update(race, None, None));
        registry.publish_car_update(&make_update(race, None, None));

        assert_eq!(registry.connection_count(race), 1);
        // Only the first event made it through.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn close_race_purges_everything() {
        let registry = ConnectionRegistry::default();
        let race = RaceId::new();
        let (_, mut rx) = registry.connect(race, ConnectionMetadata::spectator("a"));
        let _ = registry.connect(race, ConnectionMetadata::spectator("b"));

        registry.close_race(race);

        assert_eq!(registry.connection_count(race), 0);
        // The subscriber observes its channel closing.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn race_events_reach_the_room() {
        let registry = ConnectionRegistry::default();
        let race = RaceId::new();
        let (_, mut rx) = registry.connect(race, ConnectionMetadata::spectator("a"));

        registry.publish_event(&BroadcastEvent::RaceFinished {
            race_id: race,
            timestamp: Utc::now(),
        });

        assert!(matches!(
            rx.try_recv().unwrap(),
            BroadcastEvent::RaceFinished { .. }
        ));
    }

    #[test]
    fn disconnect_is_idempotent() {
        let registry = ConnectionRegistry::default();
        let race = RaceId::new();
        let (id, _rx) = registry.connect(race, ConnectionMetadata::spectator("a"));
        assert!(registry.disconnect(race, id));
        assert!(!registry.disconnect(race, id));
    }
}
