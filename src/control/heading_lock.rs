// Heading lock: hold a fixed field heading while translation stays free
//
// The lock is an explicit state machine polled by the drive loop each tick.
// Manual rotation input interrupts it at once; cancel() ends it on the next
// tick. There is no convergence exit, an unsettled lock keeps running.

use tracing::{debug, info};

use super::pid::{PidController, PidGains};
use crate::geometry::{ChassisVelocity, angle_difference, wrap_angle};
use crate::tick::Tickable;

/// Lifecycle of a heading lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Active,
    /// Operator rotation input took over
    Interrupted,
    /// Explicitly cancelled
    Terminated,
}

/// Inputs for one heading lock cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadingLockInput {
    /// Translational intent, passed through unchanged (omega is ignored)
    pub translation: ChassisVelocity,
    /// Shaped manual rotation axis
    pub manual_rotation: f64,
    /// Current estimated field heading in radians
    pub heading: f64,
    /// Cycle period in seconds
    pub dt: f64,
}

/// Closed-loop heading hold around a captured target
#[derive(Debug, Clone)]
pub struct HeadingLock {
    target: f64,
    state: LockState,
    pid: PidController,
    override_threshold: f64,
    last_error: Option<f64>,
}

impl HeadingLock {
    /// Activate a lock on `target` (field frame, radians)
    ///
    /// # Arguments
    /// * `gains` - Heading PID gains, error in radians to rad/s
    /// * `max_omega` - Output clamp in rad/s
    /// * `override_threshold` - Manual rotation magnitude that interrupts the lock
    pub fn new(target: f64, gains: PidGains, max_omega: f64, override_threshold: f64) -> Self {
        info!("Heading lock active, target {:.1} deg", target.to_degrees());
        Self {
            target: wrap_angle(target),
            state: LockState::Active,
            pid: PidController::new(gains).with_output_limit(max_omega),
            override_threshold: override_threshold.abs(),
            last_error: None,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == LockState::Active
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// Heading error from the most recent active cycle
    pub fn last_error(&self) -> Option<f64> {
        self.last_error
    }

    /// Shortest signed error from `heading` to the target
    ///
    /// A half-turn error always resolves to `+pi`.
    pub fn error_from(&self, heading: f64) -> f64 {
        angle_difference(self.target, heading)
    }

    /// End the lock; takes effect on the next tick
    pub fn cancel(&mut self) {
        if self.state == LockState::Active {
            info!("Heading lock cancelled");
        }
        self.state = LockState::Terminated;
    }

    /// Preempt the lock for another velocity source
    pub fn interrupt(&mut self) {
        if self.state == LockState::Active {
            info!("Heading lock interrupted");
            self.state = LockState::Interrupted;
        }
    }

    /// Run one cycle, returning the command to drive or `None` once the lock has ended
    pub fn update(&mut self, input: &HeadingLockInput) -> Option<ChassisVelocity> {
        if self.state != LockState::Active {
            return None;
        }

        if input.manual_rotation.abs() > self.override_threshold {
            debug!("Manual rotation {:.3} overrides heading lock", input.manual_rotation);
            self.interrupt();
            return None;
        }

        let error = self.error_from(input.heading);
        self.last_error = Some(error);
        let omega = self.pid.calculate(error, input.dt);

        Some(ChassisVelocity::new(input.translation.vx, input.translation.vy, omega))
    }
}

impl Tickable for HeadingLock {
    type Input = HeadingLockInput;
    type Output = Option<ChassisVelocity>;

    fn tick(&mut self, input: &HeadingLockInput) -> Option<ChassisVelocity> {
        self.update(input)
    }
}
