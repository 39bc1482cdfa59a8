// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::drive::{NUM_MODULES, WheelCommand, WheelPositionSample};
use crate::estimator::VisionObservation;
use crate::geometry::Pose;

/// D-pad directions, each a slow body-frame drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeDirection {
    Forward,
    Backward,
    Left,
    Right,
}

impl NudgeDirection {
    /// Unit body-frame direction (x forward, y left)
    pub fn unit(self) -> (f64, f64) {
        match self {
            NudgeDirection::Forward => (1.0, 0.0),
            NudgeDirection::Backward => (-1.0, 0.0),
            NudgeDirection::Left => (0.0, 1.0),
            NudgeDirection::Right => (0.0, -1.0),
        }
    }
}

// Raw controller state from the driver station -> runtime
// Axes use the controller convention: pushing a stick forward reads negative Y
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoystickInput {
    pub left_x: f64,
    pub left_y: f64,
    pub right_x: f64,
    /// D-pad held this cycle
    pub pov: Option<NudgeDirection>,
}

/// One-shot operator requests
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriveRequest {
    /// Current facing becomes heading zero
    ZeroHeading,
    /// Re-anchor odometry to a known pose (heading in degrees)
    ResetPose { x: f64, y: f64, heading_deg: f64 },
    /// Start holding a field heading (degrees)
    LockHeading { target_deg: f64 },
    CancelHeadingLock,
}

/// Operating mode from the driver station
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeCommand {
    pub enabled: bool,
}

// Sensor readings from the motor bindings -> runtime
// Missing entries mean the reading was unavailable this cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorMessage {
    pub wheels: [Option<WheelPositionSample>; NUM_MODULES],
    /// Gyro yaw in radians, counter-clockwise positive
    pub gyro_heading: Option<f64>,
}

/// Vision pose observation as published by the camera pipeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisionMessage {
    pub x: f64,
    pub y: f64,
    /// Radians
    pub heading: f64,
    /// Seconds on the runtime clock
    pub timestamp: f64,
}

// Defines how to create a VisionObservation from a borrowed VisionMessage
impl From<&VisionMessage> for VisionObservation {
    fn from(msg: &VisionMessage) -> Self {
        Self {
            pose: Pose::new(msg.x, msg.y, msg.heading),
            timestamp: msg.timestamp,
        }
    }
}

// Actuation output from runtime -> motor bindings
// Has default values because we don't always have an actuation to send
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WheelSetpoints {
    /// front-left, front-right, back-left, back-right
    pub modules: [WheelCommand; NUM_MODULES],
}

/// Pose estimate published for telemetry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseReport {
    pub x: f64,
    pub y: f64,
    pub heading_deg: f64,
    /// Seconds on the runtime clock
    pub timestamp: f64,
}

impl PoseReport {
    pub fn new(pose: Pose, timestamp: f64) -> Self {
        Self {
            x: pose.x,
            y: pose.y,
            heading_deg: pose.heading.to_degrees(),
            timestamp,
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    Disabled,
    JoystickStale,
    SensorsStale,
}
