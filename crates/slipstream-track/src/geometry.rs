//! Geometric queries over a circuit.

use slipstream_types::{Circuit, CircuitId, Position, WaypointSummary};

use crate::error::TrackError;

/// Default lap length in meters (a 5 km circuit).
pub const DEFAULT_TRACK_LENGTH: f64 = 5000.0;

/// Validate a circuit's geometry.
///
/// # Errors
///
/// Returns [`TrackError::InvalidTrackLength`] unless the lap length is
/// positive and finite, and [`TrackError::InvalidWaypoint`] if any
/// waypoint coordinate is non-finite.
pub fn validate(circuit: &Circuit) -> Result<(), TrackError> {
    if !(circuit.track_length.is_finite() && circuit.track_length > 0.0) {
        return Err(TrackError::InvalidTrackLength {
            length: circuit.track_length,
        });
    }
    for (index, wp) in circuit.waypoints.iter().enumerate() {
        if !(wp.x.is_finite() && wp.y.is_finite()) {
            return Err(TrackError::InvalidWaypoint { index });
        }
    }
    Ok(())
}

/// Index of the waypoint closest to `position`, or `None` for a circuit
/// without waypoints. Linear scan; waypoint lists are small.
pub fn nearest_waypoint_idx(circuit: &Circuit, position: Position) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, wp) in circuit.waypoints.iter().enumerate() {
        let dx = wp.x - position.x;
        let dy = wp.y - position.y;
        let d2 = dx.mul_add(dx, dy * dy);
        let closer = best.is_none_or(|(_, best_d2)| d2 < best_d2);
        if closer {
            best = Some((index, d2));
        }
    }
    best.map(|(index, _)| index)
}

/// Summary of the waypoint *after* the one nearest to `position`, plus
/// the straight-line distance to it.
///
/// Returns `(None, None)` for a circuit without waypoints; callers fall
/// back to the remaining lap distance in that case.
pub fn next_waypoint_summary(
    circuit: &Circuit,
    position: Position,
) -> (Option<WaypointSummary>, Option<f64>) {
    let Some(nearest) = nearest_waypoint_idx(circuit, position) else {
        return (None, None);
    };
    let count = circuit.waypoints.len();
    let next_idx = nearest
        .checked_add(1)
        .and_then(|n| n.checked_rem(count))
        .unwrap_or(0);
    let Some(wp) = circuit.waypoints.get(next_idx) else {
        return (None, None);
    };
    let distance = Position::new(wp.x, wp.y).distance_to(&position);
    let summary = WaypointSummary {
        index: u32::try_from(next_idx).unwrap_or(u32::MAX),
        x: wp.x,
        y: wp.y,
        speed_limit: wp.speed_limit,
    };
    (Some(summary), Some(distance))
}

/// Distance left on the current lap, given how far the car has
/// progressed. Never negative.
pub fn remaining_lap_distance(circuit: &Circuit, lap_distance: f64) -> f64 {
    (circuit.track_length - lap_distance).max(0.0)
}

/// A featureless default circuit: 5 km lap, no waypoints, start at the
/// origin.
pub fn default_circuit() -> Circuit {
    Circuit {
        id: CircuitId::new(),
        name: String::from("Default Circuit"),
        track_length: DEFAULT_TRACK_LENGTH,
        waypoints: Vec::new(),
        pit_boxes: Vec::new(),
        start: Position::new(0.0, 0.0),
        description: None,
    }
}

/// Generate a circular circuit with evenly spaced waypoints.
///
/// The waypoints sit on a circle whose circumference equals
/// `track_length`; `waypoint_count` of 0 yields a waypoint-free circuit.
pub fn oval_circuit(name: &str, track_length: f64, waypoint_count: u32) -> Circuit {
    let radius = track_length / (2.0 * std::f64::consts::PI);
    let mut waypoints = Vec::with_capacity(usize::try_from(waypoint_count).unwrap_or(0));
    for i in 0..waypoint_count {
        let angle = 2.0 * std::f64::consts::PI * f64::from(i) / f64::from(waypoint_count.max(1));
        waypoints.push(slipstream_types::Waypoint {
            x: radius * angle.cos(),
            y: radius * angle.sin(),
            speed_limit: None,
            name: None,
        });
    }
    Circuit {
        id: CircuitId::new(),
        name: name.to_owned(),
        track_length,
        waypoints,
        pit_boxes: Vec::new(),
        start: Position::new(radius, 0.0),
        description: None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use slipstream_types::Waypoint;

    use super::*;

    fn circuit_with_waypoints() -> Circuit {
        let mut circuit = default_circuit();
        circuit.waypoints = vec![
            Waypoint {
                x: 0.0,
                y: 0.0,
                speed_limit: None,
                name: None,
            },
            Waypoint {
                x: 100.0,
                y: 0.0,
                speed_limit: Some(60.0),
                name: Some(String::from("Turn 1")),
            },
            Waypoint {
                x: 100.0,
                y: 100.0,
                speed_limit: None,
                name: None,
            },
        ];
        circuit
    }

    #[test]
    fn default_circuit_is_valid() {
        assert!(validate(&default_circuit()).is_ok());
    }

    #[test]
    fn zero_length_track_rejected() {
        let mut circuit = default_circuit();
        circuit.track_length = 0.0;
        assert!(matches!(
            validate(&circuit),
            Err(TrackError::InvalidTrackLength { .. })
        ));
    }

    #[test]
    fn nan_waypoint_rejected() {
        let mut circuit = circuit_with_waypoints();
        if let Some(wp) = circuit.waypoints.get_mut(1) {
            wp.x = f64::NAN;
        }
        assert!(matches!(
            validate(&circuit),
            Err(TrackError::InvalidWaypoint { index: 1 })
        ));
    }

    #[test]
    fn nearest_waypoint_found() {
        let circuit = circuit_with_waypoints();
        let idx = nearest_waypoint_idx(&circuit, Position::new(90.0, 5.0));
        assert_eq!(idx, Some(1));
    }

    #[test]
    fn nearest_waypoint_none_without_waypoints() {
        let circuit = default_circuit();
        assert_eq!(nearest_waypoint_idx(&circuit, Position::new(0.0, 0.0)), None);
    }

    #[test]
    fn next_waypoint_wraps_around() {
        let circuit = circuit_with_waypoints();
        // Nearest to (100, 100) is index 2; next wraps to index 0.
        let (summary, distance) = next_waypoint_summary(&circuit, Position::new(100.0, 100.0));
        let summary = summary.unwrap();
        assert_eq!(summary.index, 0);
        let expected = Position::new(0.0, 0.0).distance_to(&Position::new(100.0, 100.0));
        assert!((distance.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn remaining_distance_never_negative() {
        let circuit = default_circuit();
        assert!((remaining_lap_distance(&circuit, 4900.0) - 100.0).abs() < 1e-9);
        assert!(remaining_lap_distance(&circuit, 6000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn oval_waypoints_sit_on_circumference() {
        let circuit = oval_circuit("Test Oval", 5000.0, 12);
        assert_eq!(circuit.waypoints.len(), 12);
        assert!(validate(&circuit).is_ok());
        let radius = 5000.0 / (2.0 * std::f64::consts::PI);
        for wp in &circuit.waypoints {
            let r = wp.x.hypot(wp.y);
            assert!((r - radius).abs() < 1e-6);
        }
    }
}
