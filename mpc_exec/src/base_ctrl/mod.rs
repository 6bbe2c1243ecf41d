//! # Base control module
//!
//! Defines the velocity command given to the omnidirectional base and the
//! interface through which commands are dispatched.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A velocity command for the base, expressed in the body frame.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Control {
    /// Speed along the body X axis (forwards)
    ///
    /// Units: meters/second
    pub vx_ms: f64,

    /// Speed along the body Y axis (left)
    ///
    /// Units: meters/second
    pub vy_ms: f64,

    /// Turn rate about the body Z axis, anticlockwise positive
    ///
    /// Units: radians/second
    pub omega_rads: f64,
}

/// The actuation sink could not accept a command.
#[derive(Debug, thiserror::Error)]
#[error("Actuation unavailable: {0}")]
pub struct ActuationUnavailable(pub String);

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Something which accepts velocity commands for the base.
pub trait ActuationSink {
    /// Send the command to the base. A failed dispatch is not retried, the
    /// next cycle computes a fresh command.
    fn dispatch(&mut self, cmd: Control) -> Result<(), ActuationUnavailable>;
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Control {
    pub fn new(vx_ms: f64, vy_ms: f64, omega_rads: f64) -> Self {
        Self {
            vx_ms,
            vy_ms,
            omega_rads,
        }
    }

    /// The zero velocity command.
    pub fn stop() -> Self {
        Self::default()
    }

    /// The command as a control vector `[vx, vy, omega]`.
    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.vx_ms, self.vy_ms, self.omega_rads)
    }

    pub fn is_finite(&self) -> bool {
        self.vx_ms.is_finite() && self.vy_ms.is_finite() && self.omega_rads.is_finite()
    }
}

impl From<Vector3<f64>> for Control {
    fn from(v: Vector3<f64>) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}
