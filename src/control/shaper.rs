// Joystick input shaping: deadband then a squared response curve

/// Deadband and sensitivity curve for raw stick axes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputShaper {
    deadband: f64,
}

impl InputShaper {
    /// `deadband` is clamped into [0, 1)
    pub fn new(deadband: f64) -> Self {
        let deadband = if deadband.is_finite() {
            deadband.clamp(0.0, 0.99)
        } else {
            0.0
        };
        Self { deadband }
    }

    pub fn deadband(&self) -> f64 {
        self.deadband
    }

    /// Shape one raw axis in [-1, 1]
    ///
    /// Values inside the deadband read as zero, the rest is rescaled so the
    /// deadband edge maps to 0 and full deflection to 1, then squared with
    /// the sign kept for finer control near zero.
    pub fn shape(&self, raw: f64) -> f64 {
        let raw = sanitize(raw);
        let value = apply_deadband(raw, self.deadband);
        (value * value).copysign(value)
    }

    /// Shape a translation stick by its polar magnitude
    ///
    /// Direction is kept as given; only the magnitude goes through the
    /// deadband and curve, so diagonals are not attenuated twice.
    pub fn shape_translation(&self, x: f64, y: f64) -> (f64, f64) {
        let (x, y) = (sanitize(x), sanitize(y));
        let magnitude = x.hypot(y).min(1.0);
        if magnitude == 0.0 {
            return (0.0, 0.0);
        }
        let shaped = self.shape(magnitude);
        let theta = y.atan2(x);
        (shaped * theta.cos(), shaped * theta.sin())
    }
}

fn sanitize(raw: f64) -> f64 {
    if raw.is_finite() { raw.clamp(-1.0, 1.0) } else { 0.0 }
}

fn apply_deadband(value: f64, deadband: f64) -> f64 {
    if value.abs() > deadband {
        if value > 0.0 {
            (value - deadband) / (1.0 - deadband)
        } else {
            (value + deadband) / (1.0 - deadband)
        }
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn test_zero_and_deadband() {
        let shaper = InputShaper::new(0.15);
        assert_eq!(shaper.shape(0.0), 0.0);
        for raw in [0.01, 0.1, 0.15, -0.05, -0.15] {
            assert_eq!(shaper.shape(raw), 0.0, "raw {} should be in deadband", raw);
        }
    }

    #[test]
    fn test_full_deflection() {
        let shaper = InputShaper::new(0.15);
        assert!((shaper.shape(1.0) - 1.0).abs() < EPS);
        assert!((shaper.shape(-1.0) + 1.0).abs() < EPS);
    }

    #[test]
    fn test_odd_symmetry() {
        let shaper = InputShaper::new(0.15);
        let mut v = -1.0;
        while v <= 1.0 {
            assert!((shaper.shape(-v) + shaper.shape(v)).abs() < EPS);
            v += 0.013;
        }
    }

    #[test]
    fn test_squared_curve() {
        let shaper = InputShaper::new(0.15);
        // Halfway through the live range squares to a quarter
        let raw = 0.15 + 0.85 / 2.0;
        assert!((shaper.shape(raw) - 0.25).abs() < 1e-9);
        assert!((shaper.shape(-raw) + 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_and_nan() {
        let shaper = InputShaper::new(0.15);
        assert!((shaper.shape(3.0) - 1.0).abs() < EPS);
        assert_eq!(shaper.shape(f64::NAN), 0.0);
    }

    #[test]
    fn test_translation_keeps_direction() {
        let shaper = InputShaper::new(0.15);
        let (x, y) = shaper.shape_translation(1.0, 1.0);
        // Magnitude clamps to 1, direction stays at 45 degrees
        assert!((x.hypot(y) - 1.0).abs() < 1e-9);
        assert!((x - y).abs() < 1e-9);

        assert_eq!(shaper.shape_translation(0.1, -0.1), (0.0, 0.0));
    }
}
