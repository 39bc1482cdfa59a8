// Planar geometry shared by the drive, estimator and controllers
//
// Conventions: x forward, y left, counter-clockwise positive angles.
// All angles are radians and wrapped into (-pi, pi].

use std::f64::consts::{PI, TAU};
use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Wrap an angle into (-pi, pi]
///
/// A half turn always comes out as `+pi`, so the shortest-path error between
/// two opposite headings resolves the same way every time.
pub fn wrap_angle(angle: f64) -> f64 {
    if !angle.is_finite() || (angle > -PI && angle <= PI) {
        return angle;
    }
    let wrapped = angle.rem_euclid(TAU);
    if wrapped > PI { wrapped - TAU } else { wrapped }
}

/// Shortest signed rotation taking `from` onto `to`
pub fn angle_difference(to: f64, from: f64) -> f64 {
    wrap_angle(to - from)
}

/// 2D vector in metres
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Translation2 {
    pub x: f64,
    pub y: f64,
}

impl Translation2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Unit vector scaled by `norm`, pointing along `angle`
    pub fn from_polar(norm: f64, angle: f64) -> Self {
        Self::new(norm * angle.cos(), norm * angle.sin())
    }

    pub fn norm(&self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn angle(&self) -> f64 {
        self.y.atan2(self.x)
    }

    /// Rotate counter-clockwise by `angle`
    pub fn rotate(&self, angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Translation2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Translation2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Neg for Translation2 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

impl Mul<f64> for Translation2 {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// Body-frame velocity command for the whole chassis
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChassisVelocity {
    /// Forward velocity in m/s
    pub vx: f64,
    /// Leftward velocity in m/s
    pub vy: f64,
    /// Counter-clockwise angular velocity in rad/s
    pub omega: f64,
}

impl ChassisVelocity {
    pub fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self { vx, vy, omega }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Convert a field-relative command into the body frame of a robot facing `heading`
    pub fn from_field_relative(vx: f64, vy: f64, omega: f64, heading: f64) -> Self {
        let body = Translation2::new(vx, vy).rotate(-heading);
        Self::new(body.x, body.y, omega)
    }

    pub fn is_zero(&self) -> bool {
        self.vx == 0.0 && self.vy == 0.0 && self.omega == 0.0
    }
}

/// Incremental body-frame displacement over one tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Twist2 {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
}

impl Twist2 {
    pub fn new(dx: f64, dy: f64, dtheta: f64) -> Self {
        Self { dx, dy, dtheta }
    }
}

/// Robot pose in the field frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Heading in radians, wrapped into (-pi, pi]
    pub heading: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self {
            x,
            y,
            heading: wrap_angle(heading),
        }
    }

    pub fn translation(&self) -> Translation2 {
        Translation2::new(self.x, self.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.heading.is_finite()
    }

    /// Integrate a body-frame twist along a constant-curvature arc
    ///
    /// With no rotation this is exactly "rotate the displacement by the
    /// current heading and add it".
    pub fn exp(&self, twist: Twist2) -> Self {
        let Twist2 { dx, dy, dtheta } = twist;
        let (s, c) = if dtheta.abs() < 1e-9 {
            (1.0 - dtheta * dtheta / 6.0, 0.5 * dtheta)
        } else {
            (dtheta.sin() / dtheta, (1.0 - dtheta.cos()) / dtheta)
        };
        let body = Translation2::new(dx * s - dy * c, dx * c + dy * s);
        let field = body.rotate(self.heading);
        Self::new(self.x + field.x, self.y + field.y, self.heading + dtheta)
    }

    /// Linear interpolation between two poses, heading along the short way round
    pub fn interpolate(&self, other: &Pose, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
            self.heading + angle_difference(other.heading, self.heading) * t,
        )
    }
}
