// Swerve inverse/forward kinematics for a four-module base
// Converts body-frame velocities (vx, vy, omega) to per-wheel speed and angle,
// and wheel displacements back to a body-frame twist for odometry.

use nalgebra::{Matrix3, SMatrix, SVector};

use super::module_state::WheelState;
use crate::geometry::{ChassisVelocity, Translation2, Twist2, wrap_angle};

/// Number of swerve modules on the base
pub const NUM_MODULES: usize = 4;

/// Module order used everywhere in the crate
pub const MODULE_NAMES: [&str; NUM_MODULES] = ["front_left", "front_right", "back_left", "back_right"];

/// Rows of the stacked wheel velocity system, two per module
const NUM_ROWS: usize = 2 * NUM_MODULES;

/// Normal-equation matrix with a determinant below this is treated as singular
const SINGULAR_EPSILON: f64 = 1e-9;

/// Error types for kinematics construction
#[derive(Debug, thiserror::Error)]
pub enum KinematicsError {
    #[error("Wheel geometry is degenerate, chassis motion is not observable from the wheels")]
    DegenerateGeometry,

    #[error("Wheel offset {index} is not finite: ({x}, {y})")]
    NonFiniteOffset { index: usize, x: f64, y: f64 },
}

/// Contact point offsets of each wheel from the rotation center
///
/// Order is front-left, front-right, back-left, back-right. Fixed once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelGeometry {
    offsets: [Translation2; NUM_MODULES],
}

impl WheelGeometry {
    pub fn new(offsets: [Translation2; NUM_MODULES]) -> Self {
        Self { offsets }
    }

    /// Rectangular base from center-to-center measurements
    ///
    /// Follows the drivetrain constants these bases are measured with:
    /// `track_width` spans the body x (forward) axis and `wheelbase` the body
    /// y (left) axis.
    ///
    /// # Arguments
    /// * `track_width` - Spacing between the front and back wheel pairs in meters
    /// * `wheelbase` - Spacing between the left and right wheel pairs in meters
    pub fn rectangular(track_width: f64, wheelbase: f64) -> Self {
        let hx = track_width / 2.0;
        let hy = wheelbase / 2.0;
        Self::new([
            Translation2::new(hx, hy),   // front left
            Translation2::new(hx, -hy),  // front right
            Translation2::new(-hx, hy),  // back left
            Translation2::new(-hx, -hy), // back right
        ])
    }

    pub fn offsets(&self) -> &[Translation2; NUM_MODULES] {
        &self.offsets
    }

    /// Distance from the rotation center to the farthest wheel
    pub fn max_radius(&self) -> f64 {
        self.offsets.iter().map(Translation2::norm).fold(0.0, f64::max)
    }
}

/// Cumulative distance and steering angle read from one module
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WheelPositionSample {
    /// Distance driven since power-on in meters
    pub distance: f64,
    /// Current steering angle in radians
    pub angle: f64,
}

impl WheelPositionSample {
    pub fn new(distance: f64, angle: f64) -> Self {
        Self { distance, angle }
    }

    pub fn is_finite(&self) -> bool {
        self.distance.is_finite() && self.angle.is_finite()
    }
}

/// Kinematics solver for a fixed wheel geometry
#[derive(Debug, Clone)]
pub struct SwerveKinematics {
    geometry: WheelGeometry,
    /// Least-squares inverse of the chassis -> wheel velocity map
    pseudo_inverse: SMatrix<f64, 3, NUM_ROWS>,
    /// Last commanded wheel angles, held when the chassis is stopped
    held_angles: [f64; NUM_MODULES],
}

impl SwerveKinematics {
    pub fn new(geometry: WheelGeometry) -> Result<Self, KinematicsError> {
        // Each wheel contributes two rows: [1, 0, -y] and [0, 1, x]
        let mut forward = SMatrix::<f64, NUM_ROWS, 3>::zeros();
        for (i, offset) in geometry.offsets.iter().enumerate() {
            if !offset.is_finite() {
                return Err(KinematicsError::NonFiniteOffset {
                    index: i,
                    x: offset.x,
                    y: offset.y,
                });
            }
            forward[(2 * i, 0)] = 1.0;
            forward[(2 * i, 2)] = -offset.y;
            forward[(2 * i + 1, 1)] = 1.0;
            forward[(2 * i + 1, 2)] = offset.x;
        }

        let normal: Matrix3<f64> = forward.transpose() * forward;
        if normal.determinant().abs() < SINGULAR_EPSILON {
            return Err(KinematicsError::DegenerateGeometry);
        }
        let normal_inv = normal
            .try_inverse()
            .ok_or(KinematicsError::DegenerateGeometry)?;

        Ok(Self {
            geometry,
            pseudo_inverse: normal_inv * forward.transpose(),
            held_angles: [0.0; NUM_MODULES],
        })
    }

    pub fn geometry(&self) -> &WheelGeometry {
        &self.geometry
    }

    /// Convert a chassis velocity to one state per wheel
    ///
    /// A fully zero command keeps every wheel at its last commanded angle
    /// with zero speed, so the modules do not snap back to zero.
    pub fn to_wheel_states(&mut self, velocity: ChassisVelocity) -> [WheelState; NUM_MODULES] {
        if velocity.is_zero() {
            return self.held_angles.map(|angle| WheelState::new(0.0, angle));
        }

        let mut states = [WheelState::default(); NUM_MODULES];
        for (i, offset) in self.geometry.offsets.iter().enumerate() {
            // Wheel velocity = chassis translation + omega x r
            let wheel = Translation2::new(
                velocity.vx - velocity.omega * offset.y,
                velocity.vy + velocity.omega * offset.x,
            );
            states[i] = WheelState::new(wheel.norm(), wrap_angle(wheel.angle()));
            self.held_angles[i] = states[i].angle;
        }
        states
    }

    /// Least-squares chassis velocity from four wheel velocity vectors
    pub fn to_chassis_velocity(&self, states: &[WheelState; NUM_MODULES]) -> ChassisVelocity {
        let solved = self.solve(states.map(|s| Translation2::from_polar(s.speed, s.angle)));
        ChassisVelocity::new(solved[0], solved[1], solved[2])
    }

    /// Least-squares body-frame displacement from per-wheel displacements
    ///
    /// # Arguments
    /// * `deltas` - Distance driven by each wheel this tick and the wheel angle
    pub fn to_twist(&self, deltas: &[WheelPositionSample; NUM_MODULES]) -> Twist2 {
        let solved = self.solve(deltas.map(|d| Translation2::from_polar(d.distance, d.angle)));
        Twist2::new(solved[0], solved[1], solved[2])
    }

    fn solve(&self, wheel_vectors: [Translation2; NUM_MODULES]) -> SVector<f64, 3> {
        let mut stacked = SVector::<f64, NUM_ROWS>::zeros();
        for (i, v) in wheel_vectors.iter().enumerate() {
            stacked[2 * i] = v.x;
            stacked[2 * i + 1] = v.y;
        }
        self.pseudo_inverse * stacked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    const EPS: f64 = 1e-9;

    fn square_base() -> SwerveKinematics {
        SwerveKinematics::new(WheelGeometry::rectangular(0.6, 0.6)).unwrap()
    }

    #[test]
    fn test_straight_forward() {
        let mut kin = square_base();
        let states = kin.to_wheel_states(ChassisVelocity::new(1.0, 0.0, 0.0));
        for s in &states {
            assert!((s.speed - 1.0).abs() < EPS);
            assert!(s.angle.abs() < EPS);
        }
    }

    #[test]
    fn test_pure_rotation_is_tangential() {
        let mut kin = square_base();
        let states = kin.to_wheel_states(ChassisVelocity::new(0.0, 0.0, 1.0));
        let r = 0.3f64.hypot(0.3);
        for (s, offset) in states.iter().zip(kin.geometry().offsets()) {
            assert!((s.speed - r).abs() < EPS, "speed {} != {}", s.speed, r);
            // Wheel heading is perpendicular to its radius vector
            let radial = offset.angle();
            let diff = wrap_angle(s.angle - radial);
            assert!((diff - FRAC_PI_2).abs() < EPS, "diff was {}", diff);
        }
        // Front-left wheel at (+x, +y) points back-left
        assert!((states[0].angle - (FRAC_PI_4 + FRAC_PI_2)).abs() < EPS);
    }

    #[test]
    fn test_zero_command_holds_angles() {
        let mut kin = square_base();
        let moving = kin.to_wheel_states(ChassisVelocity::new(0.0, 1.0, 0.0));
        let stopped = kin.to_wheel_states(ChassisVelocity::zero());
        for (m, s) in moving.iter().zip(&stopped) {
            assert_eq!(s.speed, 0.0);
            assert!((s.angle - m.angle).abs() < EPS);
            assert!((s.angle - FRAC_PI_2).abs() < EPS);
        }
    }

    #[test]
    fn test_forward_then_inverse_round_trip() {
        let mut kin = SwerveKinematics::new(WheelGeometry::rectangular(0.546, 0.648)).unwrap();
        let commands = [
            ChassisVelocity::new(1.0, 0.0, 0.0),
            ChassisVelocity::new(-0.7, 2.3, 0.0),
            ChassisVelocity::new(0.4, -1.1, 3.0),
            ChassisVelocity::new(0.0, 0.0, -PI),
            ChassisVelocity::new(4.2, 1.3, -0.25),
        ];
        for cmd in commands {
            let states = kin.to_wheel_states(cmd);
            let back = kin.to_chassis_velocity(&states);
            assert!((back.vx - cmd.vx).abs() < 1e-9, "{:?} vs {:?}", back, cmd);
            assert!((back.vy - cmd.vy).abs() < 1e-9, "{:?} vs {:?}", back, cmd);
            assert!((back.omega - cmd.omega).abs() < 1e-9, "{:?} vs {:?}", back, cmd);
        }
    }

    #[test]
    fn test_twist_from_equal_deltas() {
        let kin = square_base();
        let deltas = [WheelPositionSample::new(0.1, FRAC_PI_2); NUM_MODULES];
        let twist = kin.to_twist(&deltas);
        assert!(twist.dx.abs() < EPS);
        assert!((twist.dy - 0.1).abs() < EPS);
        assert!(twist.dtheta.abs() < EPS);
    }

    #[test]
    fn test_rectangular_layout_axes() {
        let geometry = WheelGeometry::rectangular(0.6, 0.4);
        let offsets = geometry.offsets();
        assert_eq!(offsets[0], Translation2::new(0.3, 0.2)); // front left
        assert_eq!(offsets[1], Translation2::new(0.3, -0.2));
        assert_eq!(offsets[2], Translation2::new(-0.3, 0.2));
        assert_eq!(offsets[3], Translation2::new(-0.3, -0.2));
        assert!((geometry.max_radius() - 0.3f64.hypot(0.2)).abs() < EPS);
    }

    #[test]
    fn test_degenerate_geometry_rejected() {
        let geometry = WheelGeometry::new([Translation2::ZERO; NUM_MODULES]);
        assert!(matches!(
            SwerveKinematics::new(geometry),
            Err(KinematicsError::DegenerateGeometry)
        ));
    }

    #[test]
    fn test_non_finite_offset_rejected() {
        let mut offsets = *WheelGeometry::rectangular(0.5, 0.5).offsets();
        offsets[2].x = f64::NAN;
        assert!(matches!(
            SwerveKinematics::new(WheelGeometry::new(offsets)),
            Err(KinematicsError::NonFiniteOffset { index: 2, .. })
        ));
    }
}
