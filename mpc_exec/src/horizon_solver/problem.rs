//! Multiple shooting transcription of the horizon problem
//!
//! The decision vector is laid out as
//!
//! ```text
//! z = [x_0, ..., x_N, u_0, ..., u_{N-1}, T]
//! ```
//!
//! with each interval lasting `T/N`. The equality constraints are the
//! shooting gaps `x_{k+1} - rk4(x_k, u_k, T/N) = 0`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{DMatrix, DVector, Vector2};

use super::{Nlp, Params};
use crate::loc::{Pose, Target};
use crate::traj_model::{
    gap, rk4_step_jacobian, ControlVec, StateVec, NUM_CONTROLS, NUM_STATES,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Indexes of the states, controls and duration in the decision vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableLayout {
    num_intervals: usize,
}

/// The parts of the problem which don't change between solves: the layout,
/// bounds and cost weights.
#[derive(Debug, Clone)]
pub struct HorizonProblem {
    layout: VariableLayout,

    lower: DVector<f64>,
    upper: DVector<f64>,

    control_weights: ControlVec,
    terminal_weight: f64,
    initial_state_weight: f64,

    hessian_diag: DVector<f64>,
}

/// One instance of the horizon problem, anchored at a pose and aimed at a
/// target.
pub struct HorizonNlp<'a> {
    problem: &'a HorizonProblem,
    initial_state: StateVec,
    target: Vector2<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl VariableLayout {
    pub fn new(num_intervals: usize) -> Self {
        Self { num_intervals }
    }

    pub fn num_intervals(&self) -> usize {
        self.num_intervals
    }

    pub fn num_knots(&self) -> usize {
        self.num_intervals + 1
    }

    /// Index of the first element of state knot `k`.
    pub fn state(&self, k: usize) -> usize {
        k * NUM_STATES
    }

    /// Index of the first element of control `k`.
    pub fn control(&self, k: usize) -> usize {
        self.num_knots() * NUM_STATES + k * NUM_CONTROLS
    }

    /// Index of the horizon duration.
    pub fn duration(&self) -> usize {
        self.num_knots() * NUM_STATES + self.num_intervals * NUM_CONTROLS
    }

    pub fn num_variables(&self) -> usize {
        self.duration() + 1
    }

    pub fn num_constraints(&self) -> usize {
        self.num_intervals * NUM_STATES
    }

    pub fn state_vec(&self, z: &DVector<f64>, k: usize) -> StateVec {
        let i = self.state(k);
        StateVec::new(z[i], z[i + 1], z[i + 2])
    }

    pub fn control_vec(&self, z: &DVector<f64>, k: usize) -> ControlVec {
        let i = self.control(k);
        ControlVec::new(z[i], z[i + 1], z[i + 2])
    }

    /// Length of one interval for the decision vector `z`.
    pub fn interval_s(&self, z: &DVector<f64>) -> f64 {
        z[self.duration()] / self.num_intervals as f64
    }
}

impl HorizonProblem {
    /// Build the problem structure from (validated) parameters.
    pub fn new(params: &Params) -> Self {
        let layout = VariableLayout::new(params.num_intervals);
        let n = layout.num_variables();

        // States are free, controls and duration are boxed
        let mut lower = DVector::from_element(n, f64::NEG_INFINITY);
        let mut upper = DVector::from_element(n, f64::INFINITY);

        let u_lower = params.control_lower();
        let u_upper = params.control_upper();
        for k in 0..layout.num_intervals() {
            let i = layout.control(k);
            for j in 0..NUM_CONTROLS {
                lower[i + j] = u_lower[j];
                upper[i + j] = u_upper[j];
            }
        }
        lower[layout.duration()] = params.min_duration_s;
        upper[layout.duration()] = params.max_duration_s;

        let control_weights =
            ControlVec::new(params.vx_weight, params.vy_weight, params.omega_weight);

        // The objective is a weighted sum of squares so its Hessian is a
        // constant diagonal
        let mut hessian_diag = DVector::zeros(n);
        for j in 0..NUM_STATES {
            hessian_diag[layout.state(0) + j] += 2.0 * params.initial_state_weight;
        }
        for j in 0..2 {
            hessian_diag[layout.state(layout.num_intervals()) + j] +=
                2.0 * params.terminal_weight;
        }
        for k in 0..layout.num_intervals() {
            for j in 0..NUM_CONTROLS {
                hessian_diag[layout.control(k) + j] = 2.0 * control_weights[j];
            }
        }

        Self {
            layout,
            lower,
            upper,
            control_weights,
            terminal_weight: params.terminal_weight,
            initial_state_weight: params.initial_state_weight,
            hessian_diag,
        }
    }

    pub fn layout(&self) -> &VariableLayout {
        &self.layout
    }

    /// Instantiate the problem for a given pose and target.
    pub fn with_parameters(&self, pose: &Pose, target: &Target) -> HorizonNlp<'_> {
        HorizonNlp {
            problem: self,
            initial_state: pose.to_vector(),
            target: target.to_vector(),
        }
    }
}

impl<'a> HorizonNlp<'a> {
    fn terminal_error(&self, z: &DVector<f64>) -> Vector2<f64> {
        let x_n = self
            .problem
            .layout
            .state_vec(z, self.problem.layout.num_intervals());
        Vector2::new(x_n[0], x_n[1]) - self.target
    }

    fn initial_error(&self, z: &DVector<f64>) -> StateVec {
        self.problem.layout.state_vec(z, 0) - self.initial_state
    }
}

impl<'a> Nlp for HorizonNlp<'a> {
    fn num_variables(&self) -> usize {
        self.problem.layout.num_variables()
    }

    fn num_constraints(&self) -> usize {
        self.problem.layout.num_constraints()
    }

    fn bounds(&self) -> (&DVector<f64>, &DVector<f64>) {
        (&self.problem.lower, &self.problem.upper)
    }

    fn objective(&self, z: &DVector<f64>) -> f64 {
        let layout = &self.problem.layout;

        let mut effort = 0.0;
        for k in 0..layout.num_intervals() {
            let u = layout.control_vec(z, k);
            effort += self.problem.control_weights.dot(&u.component_mul(&u));
        }

        effort
            + self.problem.terminal_weight * self.terminal_error(z).norm_squared()
            + self.problem.initial_state_weight * self.initial_error(z).norm_squared()
    }

    fn objective_gradient(&self, z: &DVector<f64>) -> DVector<f64> {
        let layout = &self.problem.layout;
        let mut grad = DVector::zeros(layout.num_variables());

        for k in 0..layout.num_intervals() {
            let i = layout.control(k);
            for j in 0..NUM_CONTROLS {
                grad[i + j] = 2.0 * self.problem.control_weights[j] * z[i + j];
            }
        }

        let e_n = self.terminal_error(z);
        let i_n = layout.state(layout.num_intervals());
        for j in 0..2 {
            grad[i_n + j] += 2.0 * self.problem.terminal_weight * e_n[j];
        }

        let e_0 = self.initial_error(z);
        let i_0 = layout.state(0);
        for j in 0..NUM_STATES {
            grad[i_0 + j] += 2.0 * self.problem.initial_state_weight * e_0[j];
        }

        grad
    }

    fn hessian_diagonal(&self, _z: &DVector<f64>) -> DVector<f64> {
        self.problem.hessian_diag.clone()
    }

    fn constraints(&self, z: &DVector<f64>) -> DVector<f64> {
        let layout = &self.problem.layout;
        let dt = layout.interval_s(z);
        let mut c = DVector::zeros(layout.num_constraints());

        for k in 0..layout.num_intervals() {
            let g = gap(
                &layout.state_vec(z, k),
                &layout.control_vec(z, k),
                &layout.state_vec(z, k + 1),
                dt,
            );
            for j in 0..NUM_STATES {
                c[k * NUM_STATES + j] = g[j];
            }
        }

        c
    }

    fn constraint_jacobian(&self, z: &DVector<f64>) -> DMatrix<f64> {
        let layout = &self.problem.layout;
        let n_int = layout.num_intervals();
        let dt = layout.interval_s(z);
        let mut jac = DMatrix::zeros(layout.num_constraints(), layout.num_variables());

        for k in 0..n_int {
            let (_, step_jac) =
                rk4_step_jacobian(&layout.state_vec(z, k), &layout.control_vec(z, k), dt);

            let row = k * NUM_STATES;
            let x_k = layout.state(k);
            let x_next = layout.state(k + 1);
            let u_k = layout.control(k);

            for r in 0..NUM_STATES {
                jac[(row + r, x_next + r)] = 1.0;
                for c in 0..NUM_STATES {
                    jac[(row + r, x_k + c)] = -step_jac.d_state[(r, c)];
                }
                for c in 0..NUM_CONTROLS {
                    jac[(row + r, u_k + c)] = -step_jac.d_control[(r, c)];
                }
                // dt = T/N
                jac[(row + r, layout.duration())] = -step_jac.d_dt[r] / n_int as f64;
            }
        }

        jac
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_problem() -> HorizonProblem {
        let mut params = Params::default();
        params.num_intervals = 4;
        HorizonProblem::new(&params)
    }

    fn test_point(layout: &VariableLayout) -> DVector<f64> {
        let mut z = DVector::from_fn(layout.num_variables(), |i, _| {
            0.1 * ((i as f64) * 0.7).sin()
        });
        z[layout.duration()] = 3.0;
        z
    }

    #[test]
    fn test_layout() {
        let layout = VariableLayout::new(50);
        assert_eq!(layout.num_knots(), 51);
        assert_eq!(layout.control(0), 153);
        assert_eq!(layout.duration(), 303);
        assert_eq!(layout.num_variables(), 304);
        assert_eq!(layout.num_constraints(), 150);
    }

    #[test]
    fn test_bounds() {
        let problem = test_problem();
        let nlp = problem.with_parameters(&Pose::default(), &Target::new(1.0, 1.0));
        let (lower, upper) = nlp.bounds();
        let layout = problem.layout();

        assert!(lower[layout.state(2)].is_infinite());
        assert_eq!(lower[layout.control(1)], -0.3);
        assert_eq!(upper[layout.control(1) + 2], 1.5);
        assert_eq!(lower[layout.duration()], 0.1);
        assert_eq!(upper[layout.duration()], 60.0);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let problem = test_problem();
        let nlp = problem.with_parameters(&Pose::new(0.1, -0.2, 0.3), &Target::new(1.0, 1.0));
        let z = test_point(problem.layout());
        let grad = nlp.objective_gradient(&z);

        let h = 1e-6;
        for i in 0..z.len() {
            let mut zp = z.clone();
            let mut zm = z.clone();
            zp[i] += h;
            zm[i] -= h;
            let fd = (nlp.objective(&zp) - nlp.objective(&zm)) / (2.0 * h);
            assert!((fd - grad[i]).abs() < 1e-4 * (1.0 + fd.abs()), "element {}", i);
        }
    }

    #[test]
    fn test_jacobian_matches_finite_difference() {
        let problem = test_problem();
        let nlp = problem.with_parameters(&Pose::default(), &Target::new(1.0, 1.0));
        let z = test_point(problem.layout());
        let jac = nlp.constraint_jacobian(&z);

        let h = 1e-6;
        for i in 0..z.len() {
            let mut zp = z.clone();
            let mut zm = z.clone();
            zp[i] += h;
            zm[i] -= h;
            let fd = (nlp.constraints(&zp) - nlp.constraints(&zm)) / (2.0 * h);
            for r in 0..fd.len() {
                assert!((fd[r] - jac[(r, i)]).abs() < 1e-7, "row {} col {}", r, i);
            }
        }
    }

    #[test]
    fn test_target_only_enters_cost() {
        let problem = test_problem();
        let z = test_point(problem.layout());
        let a = problem.with_parameters(&Pose::default(), &Target::new(1.0, 1.0));
        let b = problem.with_parameters(&Pose::default(), &Target::new(-3.0, 2.0));

        assert_eq!(a.constraints(&z), b.constraints(&z));
        assert!(a.objective(&z) != b.objective(&z));
    }
}
