// Loop timing, topics, and drivebase configuration
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::control::PidGains;
use crate::drive::WheelGeometry;
use crate::estimator::EstimatorConfig;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Joystick timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_JOYSTICK: &str = "swerve/cmd/joystick"; // raw operator axes
pub const TOPIC_CMD_DRIVE: &str = "swerve/cmd/drive"; // one-shot drive requests
pub const TOPIC_CMD_MODE: &str = "swerve/cmd/mode"; // enable / disable
pub const TOPIC_SENSOR_MODULES: &str = "swerve/sensor/modules"; // wheel positions + gyro
pub const TOPIC_VISION_POSE: &str = "swerve/vision/pose"; // vision pose observations
pub const TOPIC_RT_MODULES: &str = "swerve/rt/modules"; // wheel setpoints
pub const TOPIC_STATE_POSE: &str = "swerve/state/pose"; // pose estimate
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

// Falcon 500 free speed
const MOTOR_FREE_SPEED_RPM: f64 = 6380.0;
// SDS MK4 L2 drive reduction and wheel diameter
const MK4_L2_DRIVE_REDUCTION: f64 = (14.0 / 50.0) * (27.0 / 17.0) * (15.0 / 45.0);
const MK4_WHEEL_DIAMETER_M: f64 = 0.10033;

/// Error types for loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Drivebase measurements and tuning
///
/// Every field has a default, so a config file only needs the values it changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriveConfig {
    /// Cycle rate of the drive loop
    pub loop_hz: f64,

    /// Wheel spacing along body x (front pair to back pair), center to center, meters
    pub track_width: f64,
    /// Wheel spacing along body y (left pair to right pair), center to center, meters
    pub wheelbase: f64,

    pub motor_free_speed_rpm: f64,
    pub drive_reduction: f64,
    pub wheel_diameter: f64,
    /// Drive voltage at full speed
    pub max_voltage: f64,

    /// Stick deadband, fraction of full deflection
    pub deadband: f64,
    /// Interpret translation sticks in the field frame
    pub field_relative: bool,
    /// D-pad drive speed as a fraction of max speed
    pub nudge_fraction: f64,

    /// Translation acceleration limit as a multiple of max speed per second
    pub translation_slew_factor: f64,
    /// Rotation acceleration limit as a multiple of max angular speed per second
    pub rotation_slew_factor: f64,

    pub heading_gains: PidGains,
    /// Shaped rotation input above this interrupts a heading lock
    pub heading_override_threshold: f64,

    /// Translation below this reads as stopped, m/s
    pub zero_deadzone: f64,
    /// Rotation commanded while stopped to keep the wheels turned in, rad/s
    pub hold_omega: f64,

    pub estimator: EstimatorConfig,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            loop_hz: LOOP_HZ as f64,
            track_width: 0.546,
            wheelbase: 0.648,
            motor_free_speed_rpm: MOTOR_FREE_SPEED_RPM,
            drive_reduction: MK4_L2_DRIVE_REDUCTION,
            wheel_diameter: MK4_WHEEL_DIAMETER_M,
            max_voltage: 12.0,
            deadband: 0.15,
            field_relative: true,
            nudge_fraction: 0.15,
            translation_slew_factor: 2.0,
            rotation_slew_factor: 10.0,
            heading_gains: PidGains::new(2.5, 0.0, 0.0),
            heading_override_threshold: 0.01,
            zero_deadzone: 0.001,
            hold_omega: 0.00001,
            estimator: EstimatorConfig::default(),
        }
    }
}

impl DriveConfig {
    /// Load a JSON config file, falling back to defaults for missing fields
    ///
    /// Not validated here; command-line overrides go on top first, see
    /// [`DriveConfig::with_overrides`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Apply command-line overrides, then validate the result
    pub fn with_overrides(mut self, loop_hz: Option<f64>, robot_relative: bool) -> Result<Self, ConfigError> {
        if let Some(hz) = loop_hz {
            self.loop_hz = hz;
        }
        if robot_relative {
            self.field_relative = false;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("loop_hz", self.loop_hz),
            ("track_width", self.track_width),
            ("wheelbase", self.wheelbase),
            ("motor_free_speed_rpm", self.motor_free_speed_rpm),
            ("drive_reduction", self.drive_reduction),
            ("wheel_diameter", self.wheel_diameter),
            ("max_voltage", self.max_voltage),
            ("translation_slew_factor", self.translation_slew_factor),
            ("rotation_slew_factor", self.rotation_slew_factor),
            ("estimator.history_window", self.estimator.history_window),
            ("estimator.max_vision_jump", self.estimator.max_vision_jump),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must be positive, got {value}")));
            }
        }
        if !(0.0..1.0).contains(&self.deadband) {
            return Err(ConfigError::Invalid(format!(
                "deadband must be in [0, 1), got {}",
                self.deadband
            )));
        }
        if !(0.0..=1.0).contains(&self.nudge_fraction) {
            return Err(ConfigError::Invalid(format!(
                "nudge_fraction must be in [0, 1], got {}",
                self.nudge_fraction
            )));
        }
        if !(self.heading_override_threshold > 0.0) {
            return Err(ConfigError::Invalid(
                "heading_override_threshold must be nonzero".to_string(),
            ));
        }
        Ok(())
    }

    /// Cycle period in seconds
    pub fn period(&self) -> f64 {
        1.0 / self.loop_hz
    }

    pub fn geometry(&self) -> WheelGeometry {
        WheelGeometry::rectangular(self.track_width, self.wheelbase)
    }

    /// Free-speed wheel surface velocity, m/s
    pub fn max_velocity(&self) -> f64 {
        self.motor_free_speed_rpm / 60.0
            * self.drive_reduction
            * self.wheel_diameter
            * std::f64::consts::PI
    }

    /// Spin rate that puts the corner wheels at max velocity, rad/s
    pub fn max_angular_velocity(&self) -> f64 {
        self.max_velocity() / self.geometry().max_radius()
    }

    pub fn translation_slew_rate(&self) -> f64 {
        self.max_velocity() * self.translation_slew_factor
    }

    pub fn rotation_slew_rate(&self) -> f64 {
        self.max_angular_velocity() * self.rotation_slew_factor
    }
}
