//! Kinematic state carried by presences and visible objects

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const UNIT_Y: Vector3 = Vector3 {
        x: 0.0,
        y: 1.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn plus(&self, other: &Vector3) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Position and orientation plus their rates of change
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub position: Vector3,
    pub velocity: Vector3,
    pub orientation: Quaternion,
    pub angular_axis: Vector3,
    pub angular_speed: f32,
}

impl Location {
    /// A motionless location facing the identity orientation
    pub fn at_rest(position: Vector3) -> Self {
        Self {
            position,
            velocity: Vector3::ZERO,
            orientation: Quaternion::IDENTITY,
            angular_axis: Vector3::UNIT_Y,
            angular_speed: 0.0,
        }
    }

    /// Linear extrapolation of the position `seconds` into the future
    pub fn extrapolate(&self, seconds: f32) -> Vector3 {
        self.position.plus(&self.velocity.scaled(seconds))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingSphere {
    pub center: Vector3,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn new(center: Vector3, radius: f32) -> Self {
        Self { center, radius }
    }

    pub fn with_radius(&self, radius: f32) -> Self {
        Self::new(self.center, radius)
    }
}

impl Default for BoundingSphere {
    fn default() -> Self {
        Self::new(Vector3::ZERO, 1.0)
    }
}

/// Solid angle of a proximity query, in steradians
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SolidAngle(f32);

impl SolidAngle {
    pub const MIN: SolidAngle = SolidAngle(0.0);
    pub const MAX: SolidAngle = SolidAngle(4.0 * PI);

    /// Clamps into `[MIN, MAX]`; NaN maps to `MAX`.
    pub fn new(steradians: f32) -> Self {
        if steradians.is_nan() {
            return Self::MAX;
        }
        Self(steradians.clamp(Self::MIN.0, Self::MAX.0))
    }

    pub fn as_f32(&self) -> f32 {
        self.0
    }
}

impl Default for SolidAngle {
    fn default() -> Self {
        Self::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extrapolate() {
        let mut loc = Location::at_rest(Vector3::new(1.0, 2.0, 3.0));
        loc.velocity = Vector3::new(1.0, 0.0, -1.0);
        assert_eq!(loc.extrapolate(2.0), Vector3::new(3.0, 2.0, 1.0));
    }

    #[test]
    fn test_solid_angle_clamps() {
        assert_eq!(SolidAngle::new(-1.0), SolidAngle::MIN);
        assert_eq!(SolidAngle::new(100.0), SolidAngle::MAX);
        assert_eq!(SolidAngle::new(f32::NAN), SolidAngle::MAX);
        assert_eq!(SolidAngle::new(0.5).as_f32(), 0.5);
    }
}
