//! # Trajectory model module
//!
//! Kinematic model of the omnidirectional base and its discretisation.
//!
//! The state is `x = [px, py, phi]` (world position and heading), the
//! control is `u = [vx, vy, omega]` (body velocities). Body velocities are
//! rotated into the world frame by the heading:
//!
//! ```text
//! dpx/dt  = vx cos(phi) - vy sin(phi)
//! dpy/dt  = vx sin(phi) + vy cos(phi)
//! dphi/dt = omega
//! ```
//!
//! Each control interval is integrated with a single fourth order
//! Runge-Kutta step holding the control constant over the interval.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod rk4;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

pub use rk4::*;

use nalgebra::{Matrix3, Vector3};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of elements in the state vector.
pub const NUM_STATES: usize = 3;

/// Number of elements in the control vector.
pub const NUM_CONTROLS: usize = 3;

// ---------------------------------------------------------------------------
// TYPES
// ---------------------------------------------------------------------------

/// State vector `[px, py, phi]`.
pub type StateVec = Vector3<f64>;

/// Control vector `[vx, vy, omega]`.
pub type ControlVec = Vector3<f64>;

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// The body to world rotation for heading `phi`, extended with an identity
/// row and column for the heading rate.
#[rustfmt::skip]
pub fn rotation(phi: f64) -> Matrix3<f64> {
    let (s, c) = phi.sin_cos();

    Matrix3::new(
        c, -s, 0.0,
        s, c, 0.0,
        0.0, 0.0, 1.0,
    )
}

/// Continuous time dynamics, `dx/dt = R(phi) u`.
pub fn dynamics(x: &StateVec, u: &ControlVec) -> StateVec {
    rotation(x[2]) * u
}

/// Jacobian of `dynamics` with respect to the state. Only the heading
/// column is non-zero.
#[rustfmt::skip]
pub(crate) fn dynamics_jac_state(x: &StateVec, u: &ControlVec) -> Matrix3<f64> {
    let (s, c) = x[2].sin_cos();

    Matrix3::new(
        0.0, 0.0, -s * u[0] - c * u[1],
        0.0, 0.0, c * u[0] - s * u[1],
        0.0, 0.0, 0.0,
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_dynamics_rotates_body_velocity() {
        // Facing along world Y, forward motion is along world Y and left
        // motion is along world -X
        let x = StateVec::new(1.0, 2.0, FRAC_PI_2);

        let dx = dynamics(&x, &ControlVec::new(1.0, 0.0, 0.0));
        assert!((dx - StateVec::new(0.0, 1.0, 0.0)).norm() < 1e-12);

        let dx = dynamics(&x, &ControlVec::new(0.0, 1.0, 0.5));
        assert!((dx - StateVec::new(-1.0, 0.0, 0.5)).norm() < 1e-12);
    }

    #[test]
    fn test_dynamics_jac_state_matches_finite_difference() {
        let x = StateVec::new(0.3, -0.2, 0.7);
        let u = ControlVec::new(0.25, -0.1, 0.4);
        let jac = dynamics_jac_state(&x, &u);

        let h = 1e-7;
        for j in 0..NUM_STATES {
            let mut xp = x;
            xp[j] += h;
            let col = (dynamics(&xp, &u) - dynamics(&x, &u)) / h;
            for i in 0..NUM_STATES {
                assert!((col[i] - jac[(i, j)]).abs() < 1e-6);
            }
        }
    }
}
