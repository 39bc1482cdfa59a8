// Fixed-period drive orchestration
//
// Each tick runs to completion in a fixed order:
//   sensors -> requests -> mode -> vision -> odometry -> velocity source
//   -> shape/limit -> heading lock -> kinematics -> optimize -> desaturate
// Exactly one velocity source produces the chassis command per tick.

use tracing::{debug, info, trace, warn};

use crate::config::DriveConfig;
use crate::control::{HeadingLock, HeadingLockInput, InputShaper, LockState, SlewRateLimiter};
use crate::drive::{
    KinematicsError, MODULE_NAMES, NUM_MODULES, SwerveKinematics, WheelCommand, WheelPositionSample,
    desaturate,
};
use crate::estimator::{OdometryInput, PoseEstimator, VisionObservation};
use crate::geometry::{ChassisVelocity, Pose};
use crate::messages::{DriveRequest, JoystickInput, NudgeDirection, SensorMessage, WheelSetpoints};
use crate::tick::Tickable;

/// Which producer owned the chassis command this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VelocitySource {
    Disabled,
    Teleop,
    Nudge(NudgeDirection),
    HeadingLock,
}

/// Everything the loop consumes in one cycle
#[derive(Debug, Clone, Default)]
pub struct TickInput {
    /// Seconds on the runtime clock
    pub timestamp: f64,
    pub enabled: bool,
    /// Latest operator input, `None` when stale
    pub joystick: Option<JoystickInput>,
    pub sensors: SensorMessage,
    /// Vision observations received since the last tick
    pub vision: Vec<VisionObservation>,
    /// One-shot requests received since the last tick
    pub requests: Vec<DriveRequest>,
}

/// Everything the loop produces in one cycle
#[derive(Debug, Clone, Copy)]
pub struct TickOutput {
    pub setpoints: WheelSetpoints,
    pub pose: Pose,
    /// Chassis command after limiting and the hold policy
    pub command: ChassisVelocity,
    pub source: VelocitySource,
    /// Heading lock state at the end of this tick, if one was running
    pub lock_state: Option<LockState>,
    /// At least one sensor reading was substituted this tick
    pub sensors_stale: bool,
}

/// Owns every drive component and runs them once per period
pub struct DriveLoop {
    config: DriveConfig,
    period: f64,
    max_velocity: f64,
    max_angular_velocity: f64,

    shaper: InputShaper,
    limit_vx: SlewRateLimiter,
    limit_vy: SlewRateLimiter,
    limit_omega: SlewRateLimiter,

    kinematics: SwerveKinematics,
    estimator: PoseEstimator,
    heading_lock: Option<HeadingLock>,

    /// Last finite reading per channel, `None` until the channel first reports
    last_good_positions: [Option<WheelPositionSample>; NUM_MODULES],
    last_good_gyro: Option<f64>,
    sensors_stale: bool,
    /// Odometry baseline taken once the gyro has reported
    primed: bool,

    enabled: bool,
    last_command: ChassisVelocity,
}

impl DriveLoop {
    pub fn new(config: DriveConfig, initial_pose: Pose) -> Result<Self, KinematicsError> {
        let kinematics = SwerveKinematics::new(config.geometry())?;
        let estimator = PoseEstimator::new(
            kinematics.clone(),
            config.estimator,
            0.0,
            [WheelPositionSample::default(); NUM_MODULES],
            initial_pose,
        );
        let max_velocity = config.max_velocity();
        let max_angular_velocity = config.max_angular_velocity();

        info!(
            "Drive loop: {:.0}Hz, max {:.2} m/s, {:.2} rad/s",
            config.loop_hz, max_velocity, max_angular_velocity
        );

        Ok(Self {
            period: config.period(),
            max_velocity,
            max_angular_velocity,
            shaper: InputShaper::new(config.deadband),
            limit_vx: SlewRateLimiter::new(config.translation_slew_rate()),
            limit_vy: SlewRateLimiter::new(config.translation_slew_rate()),
            limit_omega: SlewRateLimiter::new(config.rotation_slew_rate()),
            kinematics,
            estimator,
            heading_lock: None,
            last_good_positions: [None; NUM_MODULES],
            last_good_gyro: None,
            sensors_stale: false,
            primed: false,
            enabled: false,
            last_command: ChassisVelocity::zero(),
            config,
        })
    }

    /// Latest pose estimate
    pub fn pose(&self) -> Pose {
        self.estimator.pose()
    }

    pub fn estimator(&self) -> &PoseEstimator {
        &self.estimator
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn last_command(&self) -> ChassisVelocity {
        self.last_command
    }

    pub fn heading_lock_state(&self) -> Option<LockState> {
        self.heading_lock.as_ref().map(HeadingLock::state)
    }

    pub fn max_velocity(&self) -> f64 {
        self.max_velocity
    }

    pub fn max_angular_velocity(&self) -> f64 {
        self.max_angular_velocity
    }

    /// Wheel readings for odometry; a wheel that never reported reads as parked
    fn positions(&self) -> [WheelPositionSample; NUM_MODULES] {
        self.last_good_positions.map(Option::unwrap_or_default)
    }

    fn gyro(&self) -> f64 {
        self.last_good_gyro.unwrap_or(0.0)
    }

    /// Run one cycle
    pub fn step(&mut self, input: &TickInput) -> TickOutput {
        let all_fresh = self.read_sensors(&input.sensors);
        if !self.primed && self.last_good_gyro.is_some() {
            // First gyro reading anchors odometry; wheels join as they report
            let pose = self.estimator.pose();
            self.estimator.reset_pose(self.gyro(), self.positions(), pose);
            self.primed = true;
        }

        for request in &input.requests {
            self.apply_request(request);
        }

        self.set_enabled(input.enabled);

        for observation in &input.vision {
            if let Err(e) = self.estimator.add_vision(observation) {
                debug!("Vision observation rejected: {}", e);
            }
        }

        if self.primed {
            self.estimator.tick(&OdometryInput {
                timestamp: input.timestamp,
                gyro_heading: self.gyro(),
                positions: self.positions(),
            });
        }

        let (command, source) = if self.enabled {
            self.select_command(&input.joystick.unwrap_or_default())
        } else {
            (ChassisVelocity::zero(), VelocitySource::Disabled)
        };
        let lock_state = self.heading_lock_state();
        if lock_state.is_some_and(|s| s != LockState::Active) {
            self.heading_lock = None;
        }

        let command = if self.enabled { self.apply_hold(command) } else { command };
        self.last_command = command;

        let setpoints = self.solve_setpoints(command);
        trace!("{:?} command {:?} -> {:?}", source, command, setpoints);

        TickOutput {
            setpoints,
            pose: self.estimator.pose(),
            command,
            source,
            lock_state,
            sensors_stale: !all_fresh,
        }
    }

    /// Take fresh readings, keeping the last good value for anything missing
    fn read_sensors(&mut self, msg: &SensorMessage) -> bool {
        let mut missing = Vec::new();
        for (i, reading) in msg.wheels.iter().enumerate() {
            match reading {
                Some(sample) if sample.is_finite() => {
                    if self.primed && self.last_good_positions[i].is_none() {
                        debug!(
                            "{} wheel reporting, taking {:?} as its baseline",
                            MODULE_NAMES[i], sample
                        );
                        self.estimator.rebase_wheel(i, *sample);
                    }
                    self.last_good_positions[i] = Some(*sample);
                }
                _ => missing.push(MODULE_NAMES[i]),
            }
        }
        match msg.gyro_heading {
            Some(heading) if heading.is_finite() => self.last_good_gyro = Some(heading),
            _ => missing.push("gyro"),
        }

        let all_fresh = missing.is_empty();
        if !all_fresh && !self.sensors_stale {
            warn!("Sensor readings missing ({}), holding last known values", missing.join(", "));
        } else if all_fresh && self.sensors_stale {
            info!("Sensor readings recovered");
        }
        self.sensors_stale = !all_fresh;
        all_fresh
    }

    fn apply_request(&mut self, request: &DriveRequest) {
        match *request {
            DriveRequest::ZeroHeading => {
                self.estimator.zero_heading(self.gyro(), self.positions());
            }
            DriveRequest::ResetPose { x, y, heading_deg } => {
                self.estimator.reset_pose(
                    self.gyro(),
                    self.positions(),
                    Pose::new(x, y, heading_deg.to_radians()),
                );
            }
            DriveRequest::LockHeading { target_deg } => {
                if let Some(old) = self.heading_lock.as_ref().filter(|lock| lock.is_active()) {
                    info!("Replacing heading lock on {:.1} deg", old.target().to_degrees());
                }
                self.heading_lock = Some(HeadingLock::new(
                    target_deg.to_radians(),
                    self.config.heading_gains,
                    self.max_angular_velocity,
                    self.config.heading_override_threshold,
                ));
            }
            DriveRequest::CancelHeadingLock => {
                if let Some(lock) = self.heading_lock.as_mut() {
                    lock.cancel();
                }
            }
        }
    }

    /// Handle disabled/enabled transitions
    ///
    /// Either edge clears the ramps and the last command so nothing stale
    /// carries over into the next enabled period.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled == self.enabled {
            return;
        }
        info!("Drive {}", if enabled { "enabled" } else { "disabled" });
        self.enabled = enabled;
        self.limit_vx.reset(0.0);
        self.limit_vy.reset(0.0);
        self.limit_omega.reset(0.0);
        self.last_command = ChassisVelocity::zero();

        if !enabled {
            if let Some(lock) = self.heading_lock.as_mut() {
                lock.cancel();
            }
        }
    }

    /// Pick the single velocity source for this tick and produce its command
    ///
    /// Priority: D-pad nudge, then an active heading lock, then teleop.
    fn select_command(&mut self, joystick: &JoystickInput) -> (ChassisVelocity, VelocitySource) {
        let dt = self.period;
        let heading = self.estimator.pose().heading;

        // Stick forward reads negative, stick left reads negative
        let manual_rotation = self.shaper.shape(-joystick.right_x);

        let (target, source) = match joystick.pov {
            Some(direction) => {
                if let Some(lock) = self.heading_lock.as_mut() {
                    lock.interrupt();
                }
                let (ux, uy) = direction.unit();
                let speed = self.max_velocity * self.config.nudge_fraction;
                (
                    ChassisVelocity::new(ux * speed, uy * speed, 0.0),
                    VelocitySource::Nudge(direction),
                )
            }
            None => {
                let (ix, iy) = self.shaper.shape_translation(-joystick.left_y, -joystick.left_x);
                let vx = ix * self.max_velocity;
                let vy = iy * self.max_velocity;
                let omega = manual_rotation * self.max_angular_velocity;
                let target = if self.config.field_relative {
                    ChassisVelocity::from_field_relative(vx, vy, omega, heading)
                } else {
                    ChassisVelocity::new(vx, vy, omega)
                };
                (target, VelocitySource::Teleop)
            }
        };

        let limited = ChassisVelocity::new(
            self.limit_vx.calculate(target.vx, dt),
            self.limit_vy.calculate(target.vy, dt),
            self.limit_omega.calculate(target.omega, dt),
        );

        if source == VelocitySource::Teleop {
            if let Some(lock) = self.heading_lock.as_mut() {
                let lock_input = HeadingLockInput {
                    translation: limited,
                    manual_rotation,
                    heading,
                    dt,
                };
                if let Some(command) = lock.tick(&lock_input) {
                    return (command, VelocitySource::HeadingLock);
                }
            }
        }

        (limited, source)
    }

    /// Stationary policy: snap tiny translation to zero and, when fully
    /// stopped, command a tiny rotation so the wheels turn inward and hold
    /// the robot in place instead of drifting.
    fn apply_hold(&self, mut command: ChassisVelocity) -> ChassisVelocity {
        let deadzone = self.config.zero_deadzone;
        if command.vx.abs() < deadzone {
            command.vx = 0.0;
        }
        if command.vy.abs() < deadzone {
            command.vy = 0.0;
        }
        if command.vx == 0.0 && command.vy == 0.0 && command.omega.abs() < deadzone {
            command.omega = self.config.hold_omega;
        }
        command
    }

    fn solve_setpoints(&mut self, command: ChassisVelocity) -> WheelSetpoints {
        let mut states = self.kinematics.to_wheel_states(command);
        for (state, position) in states.iter_mut().zip(self.positions()) {
            *state = state.optimize(position.angle);
        }
        desaturate(&mut states, self.max_velocity);

        WheelSetpoints {
            modules: states.map(|s| {
                WheelCommand::from_state(s, self.max_velocity, self.config.max_voltage)
            }),
        }
    }
}

impl Tickable for DriveLoop {
    type Input = TickInput;
    type Output = TickOutput;

    fn tick(&mut self, input: &TickInput) -> TickOutput {
        self.step(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::wrap_angle;
    use std::f64::consts::FRAC_PI_2;

    fn sensors(distance: f64, angle: f64, gyro: f64) -> SensorMessage {
        SensorMessage {
            wheels: [Some(WheelPositionSample::new(distance, angle)); NUM_MODULES],
            gyro_heading: Some(gyro),
        }
    }

    fn tick_input(t: f64, enabled: bool, joystick: Option<JoystickInput>) -> TickInput {
        TickInput {
            timestamp: t,
            enabled,
            joystick,
            sensors: sensors(0.0, 0.0, 0.0),
            ..Default::default()
        }
    }

    fn drive_loop() -> DriveLoop {
        DriveLoop::new(DriveConfig::default(), Pose::default()).unwrap()
    }

    #[test]
    fn test_disabled_outputs_zero() {
        let mut dl = drive_loop();
        let out = dl.tick(&tick_input(0.0, false, Some(JoystickInput { left_y: -1.0, ..Default::default() })));
        assert_eq!(out.source, VelocitySource::Disabled);
        assert!(out.setpoints.modules.iter().all(|m| m.speed == 0.0 && m.voltage == 0.0));
        assert_eq!(out.command, ChassisVelocity::zero());
    }

    #[test]
    fn test_stationary_hold_bias() {
        let mut dl = drive_loop();
        let out = dl.tick(&tick_input(0.0, true, None));
        assert_eq!(out.source, VelocitySource::Teleop);
        assert_eq!(out.command.vx, 0.0);
        assert_eq!(out.command.vy, 0.0);
        assert_eq!(out.command.omega, 0.00001);
        // Wheels turned tangentially, speeds negligible
        for m in &out.setpoints.modules {
            assert!(m.speed.abs() < 1e-5);
        }
        let geometry = DriveConfig::default().geometry();
        for (m, offset) in out.setpoints.modules.iter().zip(geometry.offsets()) {
            let diff = wrap_angle(m.angle - offset.angle());
            assert!((diff.abs() - FRAC_PI_2).abs() < 1e-6, "diff {}", diff);
        }
    }

    #[test]
    fn test_teleop_ramps_within_slew_limit() {
        let mut dl = drive_loop();
        let full_forward = JoystickInput {
            left_y: -1.0,
            ..Default::default()
        };
        let rate = DriveConfig::default().translation_slew_rate();
        let dt = DriveConfig::default().period();

        let mut prev = 0.0;
        for i in 0..40 {
            let out = dl.tick(&tick_input(i as f64 * dt, true, Some(full_forward)));
            assert!(out.command.vx - prev <= rate * dt + 1e-9);
            prev = out.command.vx;
        }
        assert!((prev - dl.max_velocity()).abs() < 1e-9);
    }

    #[test]
    fn test_enable_edge_resets_ramp() {
        let mut dl = drive_loop();
        let full_forward = Some(JoystickInput {
            left_y: -1.0,
            ..Default::default()
        });
        for i in 0..40 {
            dl.tick(&tick_input(i as f64 * 0.02, true, full_forward));
        }
        assert!(dl.last_command().vx > 4.0);

        dl.tick(&tick_input(0.82, false, full_forward));
        assert_eq!(dl.last_command(), ChassisVelocity::zero());

        let out = dl.tick(&tick_input(0.84, true, full_forward));
        let step = DriveConfig::default().translation_slew_rate() * 0.02;
        assert!((out.command.vx - step).abs() < 1e-9, "vx {}", out.command.vx);
    }

    #[test]
    fn test_nudge_is_slow_body_frame() {
        let mut dl = drive_loop();
        let left = Some(JoystickInput {
            pov: Some(NudgeDirection::Left),
            ..Default::default()
        });
        let mut out = dl.tick(&tick_input(0.0, true, left));
        for i in 1..20 {
            out = dl.tick(&tick_input(i as f64 * 0.02, true, left));
        }
        assert_eq!(out.source, VelocitySource::Nudge(NudgeDirection::Left));
        assert!((out.command.vy - 0.15 * dl.max_velocity()).abs() < 1e-9);
        assert_eq!(out.command.vx, 0.0);
    }

    #[test]
    fn test_heading_lock_then_manual_override() {
        let mut dl = drive_loop();
        let mut input = tick_input(0.0, true, None);
        input.requests.push(DriveRequest::LockHeading { target_deg: 90.0 });
        let out = dl.tick(&input);
        assert_eq!(out.source, VelocitySource::HeadingLock);
        assert!(out.command.omega > 0.0);

        // Twist the rotation stick: lock ends on this very tick
        let twist = Some(JoystickInput {
            right_x: -0.8,
            ..Default::default()
        });
        let out = dl.tick(&tick_input(0.02, true, twist));
        assert_eq!(out.source, VelocitySource::Teleop);
        assert_eq!(out.lock_state, Some(LockState::Interrupted));
        assert_eq!(dl.heading_lock_state(), None);
    }

    #[test]
    fn test_cancel_heading_lock_next_tick() {
        let mut dl = drive_loop();
        let mut input = tick_input(0.0, true, None);
        input.requests.push(DriveRequest::LockHeading { target_deg: 45.0 });
        assert_eq!(dl.tick(&input).source, VelocitySource::HeadingLock);

        let mut input = tick_input(0.02, true, None);
        input.requests.push(DriveRequest::CancelHeadingLock);
        let out = dl.tick(&input);
        assert_eq!(out.source, VelocitySource::Teleop);
        assert_eq!(out.lock_state, Some(LockState::Terminated));
    }

    #[test]
    fn test_sensor_dropout_holds_last_good() {
        let mut dl = drive_loop();
        dl.tick(&TickInput {
            timestamp: 0.0,
            sensors: sensors(1.0, 0.0, 0.0),
            ..Default::default()
        });
        dl.tick(&TickInput {
            timestamp: 0.02,
            sensors: sensors(1.5, 0.0, 0.0),
            ..Default::default()
        });
        let before = dl.pose();
        assert!((before.x - 0.5).abs() < 1e-9);

        let out = dl.tick(&TickInput {
            timestamp: 0.04,
            sensors: SensorMessage::default(),
            ..Default::default()
        });
        assert!(out.sensors_stale);
        assert_eq!(out.pose, before);
    }

    #[test]
    fn test_single_wheel_dropout_keeps_odometry_running() {
        let mut dl = drive_loop();
        let mut prev_x = 0.0;
        for i in 0..=10 {
            let mut frame = sensors(i as f64 * 0.01, 0.0, 0.0);
            let dropped = (3..=7).contains(&i);
            if dropped {
                frame.wheels[1] = None;
            }
            let out = dl.tick(&TickInput {
                timestamp: i as f64 * 0.02,
                sensors: frame,
                ..Default::default()
            });
            assert_eq!(out.sensors_stale, dropped);
            if i > 0 {
                assert!(out.pose.x > prev_x, "pose froze at tick {i}");
            }
            prev_x = out.pose.x;
        }
        // The held wheel's distance is caught up once on recovery, not lost or doubled
        let pose = dl.pose();
        assert!((pose.x - 0.1).abs() < 1e-9, "x {}", pose.x);
        assert!(pose.y.abs() < 1e-9);
        assert!(pose.heading.abs() < 1e-12);
    }

    #[test]
    fn test_gyro_dropout_and_recovery() {
        let mut dl = drive_loop();
        for i in 0..=10 {
            let gyro = i as f64 * 0.05;
            let dropped = (4..=6).contains(&i);
            let mut frame = sensors(0.0, 0.0, gyro);
            if dropped {
                frame.gyro_heading = None;
            }
            let out = dl.tick(&TickInput {
                timestamp: i as f64 * 0.02,
                sensors: frame,
                ..Default::default()
            });
            assert_eq!(out.sensors_stale, dropped);
            let expected = if dropped { 0.15 } else { gyro };
            assert!((out.pose.heading - expected).abs() < 1e-12, "tick {i}: {}", out.pose.heading);
            assert!(out.pose.x.abs() < 1e-12 && out.pose.y.abs() < 1e-12);
        }
    }

    #[test]
    fn test_missing_wheel_from_boot_still_tracks_heading() {
        let config = DriveConfig::default();
        let dt = config.period();
        let mut dl = DriveLoop::new(config, Pose::default()).unwrap();

        // Ideal gyro integrating the commanded rotation; back-right never reports
        let mut gyro = 0.0;
        let mut requests = vec![DriveRequest::LockHeading { target_deg: 90.0 }];
        for i in 0..250 {
            let mut frame = sensors(0.0, 0.0, gyro);
            frame.wheels[3] = None;
            let out = dl.tick(&TickInput {
                timestamp: i as f64 * dt,
                enabled: true,
                joystick: Some(JoystickInput::default()),
                sensors: frame,
                vision: Vec::new(),
                requests: std::mem::take(&mut requests),
            });
            assert!(out.sensors_stale);
            gyro += out.command.omega * dt;
        }
        assert!((gyro - FRAC_PI_2).abs() < 1e-3, "gyro {}", gyro);
        assert!((dl.pose().heading - FRAC_PI_2).abs() < 1e-3, "heading {}", dl.pose().heading);
    }

    #[test]
    fn test_late_wheel_joins_without_jump() {
        let mut dl = drive_loop();
        let mut frame = sensors(0.0, 0.0, 0.0);
        frame.wheels[2] = None;
        dl.tick(&TickInput {
            timestamp: 0.0,
            sensors: frame,
            ..Default::default()
        });
        // Wheel 2 comes up already reading 7m
        let mut frame = sensors(0.0, 0.0, 0.0);
        frame.wheels[2] = Some(WheelPositionSample::new(7.0, 0.0));
        let out = dl.tick(&TickInput {
            timestamp: 0.02,
            sensors: frame,
            ..Default::default()
        });
        assert!(!out.sensors_stale);
        assert_eq!(out.pose, Pose::default());
    }

    #[test]
    fn test_first_frame_sets_odometry_baseline() {
        let mut dl = drive_loop();
        // Encoders already read 12m at startup; that is not motion
        let out = dl.tick(&TickInput {
            timestamp: 0.0,
            sensors: sensors(12.0, 0.3, 1.0),
            ..Default::default()
        });
        assert_eq!(out.pose, Pose::default());
    }

    #[test]
    fn test_reset_pose_request() {
        let mut dl = drive_loop();
        let mut input = tick_input(0.0, false, None);
        input.requests.push(DriveRequest::ResetPose {
            x: 1.0,
            y: 2.0,
            heading_deg: 90.0,
        });
        let out = dl.tick(&input);
        assert!((out.pose.x - 1.0).abs() < 1e-12);
        assert!((out.pose.y - 2.0).abs() < 1e-12);
        assert!((out.pose.heading - FRAC_PI_2).abs() < 1e-12);
    }
}
