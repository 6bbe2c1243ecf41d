//! Runge-Kutta discretisation of the base dynamics

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Matrix3, RowSVector, SMatrix};

use super::{dynamics, dynamics_jac_state, rotation, ControlVec, StateVec};

// ---------------------------------------------------------------------------
// TYPES
// ---------------------------------------------------------------------------

/// Sensitivity of a stage quantity to the step inputs `[x, u, dt]`.
type Sens = SMatrix<f64, 3, 7>;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Jacobian of one RK4 step with respect to its inputs.
#[derive(Debug, Clone, Copy)]
pub struct StepJacobian {
    /// Derivative of the end state with respect to the start state.
    pub d_state: Matrix3<f64>,

    /// Derivative of the end state with respect to the control.
    pub d_control: Matrix3<f64>,

    /// Derivative of the end state with respect to the step length.
    pub d_dt: StateVec,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Integrate the dynamics over one step of length `dt` with the control held
/// constant.
pub fn rk4_step(x: &StateVec, u: &ControlVec, dt: f64) -> StateVec {
    let k1 = dynamics(x, u);
    let k2 = dynamics(&(x + k1 * (dt / 2.0)), u);
    let k3 = dynamics(&(x + k2 * (dt / 2.0)), u);
    let k4 = dynamics(&(x + k3 * dt), u);

    x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)
}

/// Integrate one step and return the end state along with its Jacobian.
///
/// The derivatives are propagated forward through each of the four stages,
/// so they are exact for the discrete step rather than for the continuous
/// dynamics.
pub fn rk4_step_jacobian(x: &StateVec, u: &ControlVec, dt: f64) -> (StateVec, StepJacobian) {
    // Seed sensitivities of x, u and dt to the inputs [x, u, dt]
    let mut d_x = Sens::zeros();
    let mut d_u = Sens::zeros();
    for i in 0..3 {
        d_x[(i, i)] = 1.0;
        d_u[(i, i + 3)] = 1.0;
    }
    let mut d_dt = RowSVector::<f64, 7>::zeros();
    d_dt[6] = 1.0;

    // Each stage is k = f(xs, u), with dk = A(xs) dxs + R(xs) du
    let stage = |xs: &StateVec, d_xs: &Sens| -> (StateVec, Sens) {
        let k = dynamics(xs, u);
        let d_k = dynamics_jac_state(xs, u) * d_xs + rotation(xs[2]) * d_u;
        (k, d_k)
    };

    let (k1, d_k1) = stage(x, &d_x);

    let x2 = x + k1 * (dt / 2.0);
    let d_x2 = d_x + d_k1 * (dt / 2.0) + k1 * d_dt * 0.5;
    let (k2, d_k2) = stage(&x2, &d_x2);

    let x3 = x + k2 * (dt / 2.0);
    let d_x3 = d_x + d_k2 * (dt / 2.0) + k2 * d_dt * 0.5;
    let (k3, d_k3) = stage(&x3, &d_x3);

    let x4 = x + k3 * dt;
    let d_x4 = d_x + d_k3 * dt + k3 * d_dt;
    let (k4, d_k4) = stage(&x4, &d_x4);

    let k_sum = k1 + k2 * 2.0 + k3 * 2.0 + k4;
    let x_next = x + k_sum * (dt / 6.0);
    let d_next = d_x + (d_k1 + d_k2 * 2.0 + d_k3 * 2.0 + d_k4) * (dt / 6.0) + k_sum * d_dt / 6.0;

    let jac = StepJacobian {
        d_state: Matrix3::from_fn(|r, c| d_next[(r, c)]),
        d_control: Matrix3::from_fn(|r, c| d_next[(r, c + 3)]),
        d_dt: StateVec::new(d_next[(0, 6)], d_next[(1, 6)], d_next[(2, 6)]),
    };

    (x_next, jac)
}

/// Multiple-shooting defect of one interval: the difference between the
/// next knot and the integrated end of the current interval.
pub fn gap(x: &StateVec, u: &ControlVec, x_next: &StateVec, dt: f64) -> StateVec {
    x_next - rk4_step(x, u, dt)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rk4_straight_line() {
        // With no rotation the model is linear and RK4 is exact
        let x = StateVec::new(1.0, -1.0, 0.0);
        let u = ControlVec::new(0.2, 0.1, 0.0);

        let x_next = rk4_step(&x, &u, 2.0);
        assert!((x_next - StateVec::new(1.4, -0.8, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_rk4_arc_matches_closed_form() {
        // Driving forward at v while turning at w traces an arc of radius v/w
        let (v, w, dt) = (0.3, 0.5, 0.2);
        let x = StateVec::zeros();
        let u = ControlVec::new(v, 0.0, w);

        let x_next = rk4_step(&x, &u, dt);
        let exact = StateVec::new(
            v / w * (w * dt).sin(),
            v / w * (1.0 - (w * dt).cos()),
            w * dt,
        );

        assert!((x_next - exact).norm() < 1e-8);
    }

    #[test]
    fn test_rk4_jacobian_matches_finite_difference() {
        let x = StateVec::new(0.1, 0.2, 0.8);
        let u = ControlVec::new(0.25, -0.15, 1.2);
        let dt = 0.4;

        let (x_next, jac) = rk4_step_jacobian(&x, &u, dt);
        assert!((x_next - rk4_step(&x, &u, dt)).norm() < 1e-14);

        let h = 1e-6;
        let central = |f: &dyn Fn(f64) -> StateVec| (f(h) - f(-h)) / (2.0 * h);

        for j in 0..3 {
            let col = central(&|e| {
                let mut xp = x;
                xp[j] += e;
                rk4_step(&xp, &u, dt)
            });
            assert!((col - jac.d_state.column(j)).norm() < 1e-7);

            let col = central(&|e| {
                let mut up = u;
                up[j] += e;
                rk4_step(&x, &up, dt)
            });
            assert!((col - jac.d_control.column(j)).norm() < 1e-7);
        }

        let col = central(&|e| rk4_step(&x, &u, dt + e));
        assert!((col - jac.d_dt).norm() < 1e-7);
    }

    #[test]
    fn test_gap_closes_on_integrated_state() {
        let x = StateVec::new(0.0, 0.0, 0.3);
        let u = ControlVec::new(0.1, 0.2, -0.4);
        let x_next = rk4_step(&x, &u, 0.5);

        assert!(gap(&x, &u, &x_next, 0.5).norm() < 1e-15);
        assert!((gap(&x, &u, &(x_next + StateVec::new(0.1, 0.0, 0.0)), 0.5)[0] - 0.1).abs() < 1e-12);
    }
}
