// Per-wheel setpoints and the post-processing applied to them each tick:
// angle optimization (shortest steering travel) and speed desaturation.

use std::f64::consts::{FRAC_PI_2, PI};

use serde::{Deserialize, Serialize};

use crate::geometry::{angle_difference, wrap_angle};

/// Target speed and steering angle for one module
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelState {
    /// Signed drive speed in m/s
    pub speed: f64,
    /// Steering angle in the body frame, wrapped into (-pi, pi]
    pub angle: f64,
}

impl WheelState {
    pub fn new(speed: f64, angle: f64) -> Self {
        Self {
            speed,
            angle: wrap_angle(angle),
        }
    }

    /// Choose the equivalent state that needs the least steering travel
    ///
    /// If the wheel would have to turn more than a quarter turn from
    /// `current_angle`, drive it backwards and point it the other way instead.
    /// A quarter turn exactly is left alone.
    pub fn optimize(self, current_angle: f64) -> Self {
        let delta = angle_difference(self.angle, current_angle);
        if delta.abs() > FRAC_PI_2 {
            Self::new(-self.speed, self.angle + PI)
        } else {
            self
        }
    }
}

/// Scale every wheel down by the same factor so none exceeds `max_speed`
///
/// Never scales up, so the ratio between any two wheel speeds (and hence the
/// commanded direction of travel) is preserved.
pub fn desaturate(states: &mut [WheelState], max_speed: f64) {
    let max_computed = states.iter().map(|s| s.speed.abs()).fold(0.0f64, f64::max);

    if max_computed > max_speed {
        let scale = max_speed / max_computed;
        for state in states.iter_mut() {
            state.speed *= scale;
        }
    }
}

/// Final per-module output handed to the motor bindings
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WheelCommand {
    /// Signed drive speed in m/s
    pub speed: f64,
    /// Drive voltage proportional to speed
    pub voltage: f64,
    /// Steering angle in radians
    pub angle: f64,
}

impl WheelCommand {
    /// Map a wheel state onto the drive voltage range
    pub fn from_state(state: WheelState, max_speed: f64, max_voltage: f64) -> Self {
        let voltage = if max_speed > 0.0 {
            state.speed / max_speed * max_voltage
        } else {
            0.0
        };
        Self {
            speed: state.speed,
            voltage,
            angle: state.angle,
        }
    }
}
