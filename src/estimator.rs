// Pose estimation: wheel odometry every tick, vision corrections when they arrive
//
// Heading comes from the gyro (plus an offset set on reset); wheels only
// contribute translation. Vision observations are compared against the
// estimate interpolated at their timestamp from a short history window and
// blended in with an explicit per-axis gain. A run of observations that all
// disagree with odometry by more than the jump limit, but agree with each
// other, re-anchors the translation to vision.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::drive::{NUM_MODULES, SwerveKinematics, WheelPositionSample};
use crate::geometry::{Pose, Translation2, angle_difference, wrap_angle};
use crate::tick::Tickable;

/// How much a vision observation is trusted relative to odometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum VisionWeighting {
    /// Take the vision pose as-is
    Replace,
    /// Fixed blend gains in [0, 1]
    Fixed { translation: f64, heading: f64 },
    /// Per-axis (x, y, heading) standard deviations of the odometry state and
    /// of the vision measurement; gain is `q / (q + sqrt(q * r))` with
    /// `q = state^2`, `r = vision^2`
    StdDevs { state: [f64; 3], vision: [f64; 3] },
}

impl Default for VisionWeighting {
    fn default() -> Self {
        VisionWeighting::StdDevs {
            state: [0.1, 0.1, 0.1],
            vision: [0.9, 0.9, 0.9],
        }
    }
}

impl VisionWeighting {
    /// Blend gains for (x, y, heading), each in [0, 1]
    pub fn gains(&self) -> [f64; 3] {
        match *self {
            VisionWeighting::Replace => [1.0; 3],
            VisionWeighting::Fixed { translation, heading } => {
                [translation, translation, heading].map(clamp_gain)
            }
            VisionWeighting::StdDevs { state, vision } => {
                let mut gains = [0.0; 3];
                for i in 0..3 {
                    let q = state[i] * state[i];
                    let r = vision[i] * vision[i];
                    gains[i] = if q == 0.0 {
                        0.0
                    } else if r == 0.0 {
                        1.0
                    } else {
                        q / (q + (q * r).sqrt())
                    };
                }
                gains.map(clamp_gain)
            }
        }
    }
}

fn clamp_gain(gain: f64) -> f64 {
    if gain.is_finite() { gain.clamp(0.0, 1.0) } else { 0.0 }
}

/// Estimator tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub weighting: VisionWeighting,
    /// How far back vision observations can be applied, in seconds
    pub history_window: f64,
    /// Observations farther than this from the estimate are rejected, in meters
    pub max_vision_jump: f64,
    /// Consecutive jump rejections, each within `max_vision_jump` of the one
    /// before, after which vision replaces the estimated translation. 0 never
    /// re-anchors.
    pub reanchor_after: u32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            weighting: VisionWeighting::default(),
            history_window: 1.5,
            max_vision_jump: 1.0,
            reanchor_after: 5,
        }
    }
}

/// A time-stamped field pose reported by the vision pipeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisionObservation {
    pub pose: Pose,
    /// Capture time in seconds on the runtime clock
    pub timestamp: f64,
}

/// Reasons a vision observation is dropped
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VisionRejection {
    #[error("Vision observation has non-finite values")]
    NonFinite,

    #[error("Vision observation at {timestamp:.3}s is older than retained history ({oldest:.3}s)")]
    Stale { timestamp: f64, oldest: f64 },

    #[error("Vision observation is {distance:.2}m from the estimate (limit {limit:.2}m)")]
    Jump { distance: f64, limit: f64 },
}

/// Sensor readings for one prediction step
#[derive(Debug, Clone, Copy)]
pub struct OdometryInput {
    /// Seconds on the runtime clock
    pub timestamp: f64,
    /// Raw gyro heading in radians
    pub gyro_heading: f64,
    pub positions: [WheelPositionSample; NUM_MODULES],
}

/// Running field pose estimate
#[derive(Debug, Clone)]
pub struct PoseEstimator {
    kinematics: SwerveKinematics,
    config: EstimatorConfig,
    gains: [f64; 3],

    pose: Pose,
    /// Added to the raw gyro reading to get field heading
    gyro_offset: f64,
    prev_gyro: f64,
    prev_positions: [WheelPositionSample; NUM_MODULES],

    /// (timestamp, estimate) after each prediction, oldest first
    history: VecDeque<(f64, Pose)>,

    /// Run of consistent jump rejections and the latest one's position
    jump_streak: u32,
    last_jump: Option<Translation2>,
}

impl PoseEstimator {
    pub fn new(
        kinematics: SwerveKinematics,
        config: EstimatorConfig,
        gyro_heading: f64,
        positions: [WheelPositionSample; NUM_MODULES],
        initial_pose: Pose,
    ) -> Self {
        Self {
            kinematics,
            gains: config.weighting.gains(),
            config,
            pose: initial_pose,
            gyro_offset: wrap_angle(initial_pose.heading - gyro_heading),
            prev_gyro: gyro_heading,
            prev_positions: positions,
            history: VecDeque::new(),
            jump_streak: 0,
            last_jump: None,
        }
    }

    /// Latest estimate
    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Blend gains (x, y, heading) in use
    pub fn gains(&self) -> [f64; 3] {
        self.gains
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Prediction step: integrate this tick's wheel motion
    pub fn update(
        &mut self,
        timestamp: f64,
        gyro_heading: f64,
        positions: [WheelPositionSample; NUM_MODULES],
    ) -> Pose {
        let mut deltas = [WheelPositionSample::default(); NUM_MODULES];
        for (i, delta) in deltas.iter_mut().enumerate() {
            *delta = WheelPositionSample::new(
                positions[i].distance - self.prev_positions[i].distance,
                positions[i].angle,
            );
        }

        // Gyro wins over the wheels for rotation
        let mut twist = self.kinematics.to_twist(&deltas);
        twist.dtheta = angle_difference(gyro_heading, self.prev_gyro);

        let mut next = self.pose.exp(twist);
        next.heading = wrap_angle(gyro_heading + self.gyro_offset);

        self.pose = next;
        self.prev_gyro = gyro_heading;
        self.prev_positions = positions;
        self.record(timestamp);

        trace!("Odometry twist {:?} -> pose {:?}", twist, self.pose);
        self.pose
    }

    fn record(&mut self, timestamp: f64) {
        let pose = self.pose;
        match self.history.back_mut() {
            // Non-increasing clock: keep one entry per instant
            Some(last) if timestamp <= last.0 => last.1 = pose,
            _ => self.history.push_back((timestamp, pose)),
        }

        let horizon = timestamp - self.config.history_window;
        while self.history.len() > 1 && self.history.front().is_some_and(|(t, _)| *t < horizon) {
            self.history.pop_front();
        }
    }

    /// Estimate at `timestamp`, interpolated from history
    ///
    /// Returns `None` when `timestamp` predates the retained window. Times
    /// past the newest entry use the latest estimate.
    pub fn sample_at(&self, timestamp: f64) -> Option<Pose> {
        let oldest_t = match self.history.front() {
            Some((t, _)) => *t,
            None => return Some(self.pose),
        };
        if timestamp < oldest_t {
            return None;
        }

        let idx = self.history.partition_point(|(t, _)| *t < timestamp);
        if let Some((t, pose)) = self.history.get(idx) {
            if *t == timestamp {
                return Some(*pose);
            }
        }
        match (idx.checked_sub(1).and_then(|i| self.history.get(i)), self.history.get(idx)) {
            (Some((t0, p0)), Some((t1, p1))) => {
                let span = t1 - t0;
                let frac = if span > 0.0 { (timestamp - t0) / span } else { 1.0 };
                Some(p0.interpolate(p1, frac))
            }
            (_, Some((_, p))) => Some(*p),
            (Some(_), None) | (None, None) => Some(self.pose),
        }
    }

    /// Correction step: blend in a vision observation
    ///
    /// Rejected observations leave the estimate untouched. Jump rejections are
    /// counted, and the observation completing a consistent run of
    /// `reanchor_after` is applied with full translation gain.
    pub fn add_vision(&mut self, observation: &VisionObservation) -> Result<Pose, VisionRejection> {
        if !observation.pose.is_finite() || !observation.timestamp.is_finite() {
            return Err(VisionRejection::NonFinite);
        }

        let reference = self.sample_at(observation.timestamp).ok_or_else(|| VisionRejection::Stale {
            timestamp: observation.timestamp,
            oldest: self.history.front().map(|(t, _)| *t).unwrap_or(f64::NAN),
        })?;

        let seen = observation.pose.translation();
        let offset = seen - reference.translation();
        let distance = offset.norm();
        let limit = self.config.max_vision_jump;
        let reanchor = distance > limit;
        if reanchor {
            let consistent = self.last_jump.is_some_and(|prev| (seen - prev).norm() <= limit);
            self.jump_streak = if consistent { self.jump_streak + 1 } else { 1 };
            self.last_jump = Some(seen);
            if self.config.reanchor_after == 0 || self.jump_streak < self.config.reanchor_after {
                return Err(VisionRejection::Jump { distance, limit });
            }
            warn!(
                "{} consistent vision observations {:.2}m from odometry, re-anchoring",
                self.jump_streak, distance
            );
        }
        self.jump_streak = 0;
        self.last_jump = None;

        let [gx, gy, gh] = self.gains;
        let (gx, gy) = if reanchor { (1.0, 1.0) } else { (gx, gy) };
        let dx = gx * offset.x;
        let dy = gy * offset.y;
        let dh = gh * angle_difference(observation.pose.heading, reference.heading);

        self.pose = shift(self.pose, dx, dy, dh);
        for (_, pose) in self.history.iter_mut() {
            *pose = shift(*pose, dx, dy, dh);
        }
        self.gyro_offset = wrap_angle(self.gyro_offset + dh);

        debug!(
            "Vision correction ({:.3}, {:.3}, {:.2} deg) -> {:?}",
            dx,
            dy,
            dh.to_degrees(),
            self.pose
        );
        Ok(self.pose)
    }

    /// Re-anchor the estimate to `pose`, dropping history
    pub fn reset_pose(
        &mut self,
        gyro_heading: f64,
        positions: [WheelPositionSample; NUM_MODULES],
        pose: Pose,
    ) {
        info!(
            "Pose reset to ({:.2}, {:.2}) {:.1} deg",
            pose.x,
            pose.y,
            pose.heading.to_degrees()
        );
        self.pose = pose;
        self.gyro_offset = wrap_angle(pose.heading - gyro_heading);
        self.prev_gyro = gyro_heading;
        self.prev_positions = positions;
        self.history.clear();
        self.jump_streak = 0;
        self.last_jump = None;
    }

    /// Take `sample` as wheel `index`'s reference reading without integrating
    /// any motion, for a wheel reporting for the first time
    pub fn rebase_wheel(&mut self, index: usize, sample: WheelPositionSample) {
        if let Some(prev) = self.prev_positions.get_mut(index) {
            *prev = sample;
        }
    }

    /// Make the current direction the new zero heading, keeping position
    pub fn zero_heading(&mut self, gyro_heading: f64, positions: [WheelPositionSample; NUM_MODULES]) {
        let Pose { x, y, .. } = self.pose;
        self.reset_pose(gyro_heading, positions, Pose::new(x, y, 0.0));
    }
}

fn shift(pose: Pose, dx: f64, dy: f64, dh: f64) -> Pose {
    Pose::new(pose.x + dx, pose.y + dy, pose.heading + dh)
}

impl Tickable for PoseEstimator {
    type Input = OdometryInput;
    type Output = Pose;

    fn tick(&mut self, input: &OdometryInput) -> Pose {
        self.update(input.timestamp, input.gyro_heading, input.positions)
    }
}
