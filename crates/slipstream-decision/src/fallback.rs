//! The deterministic fallback controller.
//!
//! Used by the tick loop whenever the configured provider times out,
//! errors, or returns garbage. It must be cheap, deterministic, and
//! always legal: moderate throttle scaled by remaining fuel, no steering,
//! and braking once speed gets high.

use slipstream_types::{Decision, DecisionContext};

/// Speed (m/s) above which the fallback brakes instead of accelerating.
pub const BRAKE_SPEED_THRESHOLD: f64 = 50.0;

/// Fuel percent below which the fallback eases off the throttle.
const FUEL_CONSERVE_THRESHOLD: f64 = 30.0;

/// Produce a safe deterministic decision from the car's current state.
pub fn fallback_controller(ctx: &DecisionContext) -> Decision {
    if ctx.car.speed > BRAKE_SPEED_THRESHOLD {
        return Decision {
            throttle: 0.2,
            steer: 0.0,
            brake: 0.6,
        };
    }
    let throttle = if ctx.car.fuel > FUEL_CONSERVE_THRESHOLD {
        0.7
    } else {
        0.4
    };
    Decision {
        throttle,
        steer: 0.0,
        brake: 0.0,
    }
}
