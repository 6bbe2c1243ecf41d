//! # Localisation module
//!
//! The controller does not localise the base itself, it reads the current
//! pose from an external `PoseSource` once per cycle.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use util::maths::norm;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The pose (position and heading in the world frame) of the base at one
/// instant.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    /// Position along the world X axis
    ///
    /// Units: meters
    pub x_m: f64,

    /// Position along the world Y axis
    ///
    /// Units: meters
    pub y_m: f64,

    /// Angle of the body X axis from the world X axis, anticlockwise positive.
    ///
    /// Units: radians
    pub heading_rad: f64,
}

/// The goal position of one planning episode.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Target {
    /// Units: meters
    pub x_m: f64,

    /// Units: meters
    pub y_m: f64,
}

/// The pose source could not provide a pose this cycle.
#[derive(Debug, thiserror::Error)]
#[error("Pose source unavailable: {0}")]
pub struct PoseUnavailable(pub String);

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Something which can provide the current pose of the base.
pub trait PoseSource {
    /// Read the current pose. Blocks until the pose is available or the read
    /// has failed.
    fn read(&mut self) -> Result<Pose, PoseUnavailable>;
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Pose {
    pub fn new(x_m: f64, y_m: f64, heading_rad: f64) -> Self {
        Self {
            x_m,
            y_m,
            heading_rad,
        }
    }

    /// The pose as a state vector `[x, y, heading]`.
    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.x_m, self.y_m, self.heading_rad)
    }

    /// The position part of the pose.
    pub fn position_m(&self) -> Vector2<f64> {
        Vector2::new(self.x_m, self.y_m)
    }

    /// Euclidean distance from this pose's position to the target.
    pub fn distance_to(&self, target: &Target) -> f64 {
        // Both slices have two elements so this can't fail
        norm(&[self.x_m, self.y_m], &[target.x_m, target.y_m]).unwrap_or(std::f64::NAN)
    }
}

impl From<Vector3<f64>> for Pose {
    fn from(v: Vector3<f64>) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl Target {
    pub fn new(x_m: f64, y_m: f64) -> Self {
        Self { x_m, y_m }
    }

    pub fn to_vector(&self) -> Vector2<f64> {
        Vector2::new(self.x_m, self.y_m)
    }
}

impl From<[f64; 2]> for Target {
    fn from(a: [f64; 2]) -> Self {
        Self::new(a[0], a[1])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_distance_to() {
        let pose = Pose::new(1.0, 1.0, 2.0);
        assert!((pose.distance_to(&Target::new(4.0, 5.0)) - 5.0).abs() < 1e-12);
        assert_eq!(pose.distance_to(&Target::new(1.0, 1.0)), 0.0);
    }

    #[test]
    fn test_vector_conversion() {
        let pose = Pose::new(0.5, -0.25, 1.0);
        assert_eq!(Pose::from(pose.to_vector()), pose);
        assert_eq!(pose.position_m(), Vector2::new(0.5, -0.25));
    }
}
