// Drive module for the four-wheel swerve base
//
// Provides:
// - Swerve kinematics (chassis velocity <-> wheel states, wheel deltas -> twist)
// - Per-wheel angle optimization and speed desaturation
// - Final wheel command scaling for the motor bindings

pub mod kinematics;
pub mod module_state;

pub use kinematics::{
    KinematicsError, MODULE_NAMES, NUM_MODULES, SwerveKinematics, WheelGeometry, WheelPositionSample,
};
pub use module_state::{WheelCommand, WheelState, desaturate};
