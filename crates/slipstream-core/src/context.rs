//! Decision-context assembly.
//!
//! Built per running car per tick from the tick-start race snapshot, so
//! a provider never observes another car's mid-tick intermediate state.
//! The nearby scan is O(n) per car; the list is sorted by distance and
//! capped, keeping provider payloads bounded regardless of field size.

use std::cmp::Ordering;

use chrono::Utc;
use slipstream_types::{Car, Circuit, DecisionContext, NearbyCar, RaceSummary, TrackSummary};

use crate::config::ContextSettings;
use crate::race::Race;

/// Assemble the context presented to the decision provider for one car.
pub fn build_decision_context(
    race: &Race,
    car: &Car,
    circuit: &Circuit,
    settings: &ContextSettings,
) -> DecisionContext {
    let (next_waypoint, distance_to_next_waypoint) =
        slipstream_track::next_waypoint_summary(circuit, car.position);

    let track = TrackSummary {
        track_length: circuit.track_length,
        next_waypoint,
        distance_to_next_waypoint,
        remaining_lap_distance: slipstream_track::remaining_lap_distance(
            circuit,
            car.lap_distance,
        ),
        pit_boxes: circuit.pit_boxes.clone(),
    };

    let mut nearby: Vec<NearbyCar> = race
        .cars
        .values()
        .filter(|other| other.id != car.id)
        .filter_map(|other| {
            let distance = car.position.distance_to(&other.position);
            (distance <= settings.nearby_radius).then(|| NearbyCar {
                car_id: other.id,
                agent_id: other.agent_id,
                position: other.position,
                distance,
                relative_speed: other.speed - car.speed,
                status: other.status,
            })
        })
        .collect();
    nearby.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
    nearby.truncate(settings.nearby_cap);

    DecisionContext {
        timestamp: Utc::now(),
        race: RaceSummary {
            id: race.id,
            name: race.name.clone(),
            lap: car.lap,
            max_laps: race.max_laps,
            current_lap: race.current_lap,
            total_cars: u32::try_from(race.cars.len()).unwrap_or(u32::MAX),
        },
        car: car.clone(),
        track,
        nearby,
    }
}
