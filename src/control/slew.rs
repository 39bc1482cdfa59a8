// Slew rate limiting for velocity commands (acceleration limit per axis)

/// Limits how fast a value may change, in units per second
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlewRateLimiter {
    max_rate: f64,
    prev: f64,
}

impl SlewRateLimiter {
    pub fn new(max_rate: f64) -> Self {
        Self::with_initial(max_rate, 0.0)
    }

    pub fn with_initial(max_rate: f64, initial: f64) -> Self {
        Self {
            max_rate: max_rate.abs(),
            prev: initial,
        }
    }

    /// Step toward `target`, moving at most `max_rate * dt`
    pub fn calculate(&mut self, target: f64, dt: f64) -> f64 {
        if !target.is_finite() || !dt.is_finite() || dt <= 0.0 {
            return self.prev;
        }
        let max_step = self.max_rate * dt;
        let error = target - self.prev;
        if error.abs() <= max_step {
            self.prev = target;
        } else {
            self.prev += max_step.copysign(error);
        }
        self.prev
    }

    /// Forget the ramp and restart from `value`
    pub fn reset(&mut self, value: f64) {
        self.prev = value;
    }

    pub fn last(&self) -> f64 {
        self.prev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_bound_holds() {
        let mut limiter = SlewRateLimiter::new(2.0);
        let dt = 0.02;
        let targets = [1.0, -3.0, 0.5, 0.5, 10.0, -10.0, 0.0, 0.04, -0.04];
        let mut prev = limiter.last();
        for _ in 0..20 {
            for &t in &targets {
                let out = limiter.calculate(t, dt);
                assert!((out - prev).abs() <= 2.0 * dt + 1e-12);
                prev = out;
            }
        }
    }

    #[test]
    fn test_tracks_constant_target_exactly() {
        let mut limiter = SlewRateLimiter::new(5.0);
        let mut out = 0.0;
        for _ in 0..100 {
            out = limiter.calculate(1.3, 0.02);
        }
        assert_eq!(out, 1.3);
        assert_eq!(limiter.calculate(1.3, 0.02), 1.3);
    }

    #[test]
    fn test_reset_clears_ramp() {
        let mut limiter = SlewRateLimiter::new(1.0);
        for _ in 0..50 {
            limiter.calculate(1.0, 0.02);
        }
        assert!(limiter.last() > 0.9);
        limiter.reset(0.0);
        assert_eq!(limiter.last(), 0.0);
        assert!((limiter.calculate(1.0, 0.02) - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_bad_input_holds_output() {
        let mut limiter = SlewRateLimiter::with_initial(1.0, 0.5);
        assert_eq!(limiter.calculate(f64::NAN, 0.02), 0.5);
        assert_eq!(limiter.calculate(1.0, 0.0), 0.5);
    }
}
