// Motion-control core for a four-wheel swerve base
//
// Provides:
// - Swerve kinematics, wheel angle optimization and desaturation
// - Joystick shaping, slew limiting and heading lock control
// - Odometry + vision pose estimation
// - The fixed-period drive loop and its zenoh runtime shell

pub mod config;
pub mod control;
pub mod drive;
pub mod drive_loop;
pub mod estimator;
pub mod geometry;
pub mod messages;
pub mod runtime;
pub mod tick;
