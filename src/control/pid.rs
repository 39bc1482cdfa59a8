// PID controller with explicit timestep

use serde::{Deserialize, Serialize};

/// Proportional, integral and derivative gains
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub k_p: f64,
    pub k_i: f64,
    pub k_d: f64,
}

impl PidGains {
    pub fn new(k_p: f64, k_i: f64, k_d: f64) -> Self {
        Self { k_p, k_i, k_d }
    }
}

/// A PID controller
#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,

    /// Symmetric output limit, `None` for unbounded
    output_limit: Option<f64>,

    /// Previous error, `None` until the first update
    prev_error: Option<f64>,

    /// The integral accumulation
    integral: f64,
}

impl PidController {
    /// Create a new controller with the given gains.
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            output_limit: None,
            prev_error: None,
            integral: 0.0,
        }
    }

    /// Clamp the output to `[-limit, limit]`
    pub fn with_output_limit(mut self, limit: f64) -> Self {
        self.output_limit = Some(limit.abs());
        self
    }

    /// Get the controller output for `error` after `dt` seconds.
    ///
    /// The derivative term is zero on the first call after a reset.
    pub fn calculate(&mut self, error: f64, dt: f64) -> f64 {
        if !error.is_finite() {
            return 0.0;
        }

        let mut derivative = 0.0;
        if dt > 0.0 {
            self.integral += error * dt;
            if let Some(prev) = self.prev_error {
                derivative = (error - prev) / dt;
            }
        }
        self.prev_error = Some(error);

        let output =
            self.gains.k_p * error + self.gains.k_i * self.integral + self.gains.k_d * derivative;

        match self.output_limit {
            Some(limit) => output.clamp(-limit, limit),
            None => output,
        }
    }

    /// Clear the integrator and derivative history
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
    }
}
