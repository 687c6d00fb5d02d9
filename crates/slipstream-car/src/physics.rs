//! The kinematic update applied to one car each tick.

use chrono::Utc;
use slipstream_types::{Car, CarStatus, Decision};
use tracing::debug;

use crate::error::PhysicsError;

/// Combined wear-and-damage level at which net acceleration reaches zero.
const PENALTY_SCALE: f64 = 200.0;

/// Fuel percent below which the low-fuel penalty ramps in.
const LOW_FUEL_THRESHOLD: f64 = 10.0;

/// Movement produced by one physics step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepDelta {
    /// Ground distance covered this step, meters.
    pub distance: f64,
    /// X displacement, meters.
    pub dx: f64,
    /// Y displacement, meters.
    pub dy: f64,
}

/// Result of checking lap progression after a physics step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LapOutcome {
    /// Still on the same lap.
    Continuing,
    /// Crossed the start-finish line at least once this step.
    Completed {
        /// The lap the car is now on.
        lap: u32,
        /// Whether the car has now completed all its laps.
        race_complete: bool,
    },
}

/// Apply one decision to a car over a timestep of `dt` seconds.
///
/// The decision is re-clamped before use regardless of source. The new
/// state is computed in full and validated before any field of `car` is
/// written, so a failing step leaves the car untouched for the caller
/// to retire.
///
/// # Update order
///
/// 1. Net acceleration from throttle and brake
/// 2. Wear/damage/fuel penalty scaling
/// 3. Speed integration, clamped to `[0, max_speed]`
/// 4. Heading change, scaled by speed fraction
/// 5. Position advance along the new heading
/// 6. Lap/total distance, fuel consumption, tire wear
///
/// # Errors
///
/// Returns [`PhysicsError::InvalidTimestep`] for a non-positive or
/// non-finite `dt`, and [`PhysicsError::NonFiniteState`] if integration
/// produces a non-finite value (e.g. the car state was already corrupt).
pub fn apply_decision(
    car: &mut Car,
    decision: &Decision,
    dt: f64,
) -> Result<StepDelta, PhysicsError> {
    if !(dt.is_finite() && dt > 0.0) {
        return Err(PhysicsError::InvalidTimestep { dt });
    }
    let decision = decision.clamped();

    // 1. Throttle accelerates, brake decelerates (scaled by braking_factor).
    let engine_accel = decision.throttle * car.profile.max_accel;
    let brake_accel = decision.brake * car.profile.max_accel * car.profile.braking_factor;
    let mut net_accel = engine_accel - brake_accel;

    // 2. Worn tires, damage, and an empty tank all sap acceleration.
    let mut penalty = ((car.tire_wear + car.damage) / PENALTY_SCALE).clamp(0.0, 1.0);
    if car.fuel < LOW_FUEL_THRESHOLD {
        penalty += 1.0 - car.fuel / LOW_FUEL_THRESHOLD;
    }
    net_accel *= (1.0 - penalty).max(0.0);

    // 3. Integrate speed, clamped to the car's envelope.
    let new_speed = (car.speed + net_accel * dt).clamp(0.0, car.profile.max_speed);

    // 4. Turning authority scales with speed fraction.
    let speed_fraction = new_speed / car.profile.max_speed.max(1.0);
    let new_orientation =
        car.orientation + decision.steer * car.profile.steering_sensitivity * speed_fraction;

    // 5. Advance along the new heading.
    let dx = new_orientation.cos() * new_speed * dt;
    let dy = new_orientation.sin() * new_speed * dt;
    let distance = dx.hypot(dy);

    let new_x = car.position.x + dx;
    let new_y = car.position.y + dy;

    // 6. Consumption scales with how hard the car is being driven.
    let new_fuel =
        (car.fuel - car.profile.fuel_rate * (1.0 + decision.throttle) * distance).max(0.0);
    let new_wear =
        (car.tire_wear + car.profile.wear_rate * (1.0 + decision.steer.abs()) * distance).min(100.0);

    validate_finite(new_speed, "speed")?;
    validate_finite(new_orientation, "orientation")?;
    validate_finite(new_x, "position.x")?;
    validate_finite(new_y, "position.y")?;

    car.acceleration = net_accel;
    car.speed = new_speed;
    car.orientation = new_orientation;
    car.position.x = new_x;
    car.position.y = new_y;
    car.lap_distance += distance;
    car.total_distance += distance;
    car.fuel = new_fuel;
    car.tire_wear = new_wear;
    car.updated_at = Utc::now();

    Ok(StepDelta { distance, dx, dy })
}

/// Check lap progression after a physics step.
///
/// When the car's lap distance reaches the lap length, the lap counter
/// increments and the *remainder* carries forward -- it is never reset
/// to zero. A car that passes `max_laps` is marked `Finished` and stops
/// receiving decisions.
pub fn advance_lap(car: &mut Car, track_length: f64, max_laps: u32) -> LapOutcome {
    if !(track_length.is_finite() && track_length > 0.0) {
        return LapOutcome::Continuing;
    }

    let mut completed = false;
    while car.lap_distance >= track_length {
        car.lap_distance -= track_length;
        car.lap = car.lap.saturating_add(1);
        completed = true;
    }

    if !completed {
        return LapOutcome::Continuing;
    }

    let race_complete = car.lap > max_laps;
    if race_complete {
        car.status = CarStatus::Finished;
        debug!(car_id = %car.id, lap = car.lap, "car completed final lap");
    }
    LapOutcome::Completed {
        lap: car.lap,
        race_complete,
    }
}

/// Reject a non-finite intermediate value before it reaches car state.
fn validate_finite(value: f64, field: &'static str) -> Result<(), PhysicsError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PhysicsError::NonFiniteState { field })
    }
}
