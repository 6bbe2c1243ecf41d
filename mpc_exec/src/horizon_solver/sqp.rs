//! Sequential quadratic programming backend
//!
//! Each iteration linearises the constraints about the current point and
//! solves the quadratic subproblem
//!
//! ```text
//! min   1/2 d^T (H + reg I) d + grad_f^T d
//! s.t.  J d = -c
//!       lower - z <= d <= upper - z
//! ```
//!
//! with Clarabel, using the diagonal Hessian approximation provided by the
//! `Nlp`. The step is then backtracked on the l1 exact penalty merit
//! function `f + rho |c|_1`. Iterates always satisfy the variable bounds.
//!
//! Convergence is declared when the constraint violation and the scaled
//! Lagrangian gradient, evaluated with the subproblem's multipliers, are both
//! below the tolerance.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettings, DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{self, NonnegativeConeT, ZeroConeT},
};
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use util::maths::{inf_norm, one_norm};

use super::{Nlp, NlpBackend, NlpSolution, SolveFailure};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Threshold above which the Lagrangian gradient is scaled by the size of
/// the multipliers.
const S_MAX: f64 = 100.0;

/// Sufficient decrease coefficient of the Armijo condition.
const ARMIJO_ETA: f64 = 1e-4;

/// Margin kept between the merit penalty and the largest multiplier.
const PENALTY_MARGIN: f64 = 1.0;

/// Relative increase in the merit function accepted as round-off.
const MERIT_NOISE: f64 = 1e-14;

/// Tolerance Clarabel solves each subproblem to.
const QP_TOL: f64 = 1e-9;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Settings of the SQP method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqpSettings {
    /// Maximum number of SQP iterations
    pub max_iters: usize,

    /// Tolerance on the constraint violation and the scaled Lagrangian
    /// gradient
    pub tol: f64,

    /// Maximum number of step halvings in one line search
    pub max_backtracks: usize,

    /// Proximal regularisation added to the Hessian diagonal, keeps the
    /// subproblem strictly convex in directions the cost doesn't weight
    pub hessian_reg: f64,

    /// Maximum number of Clarabel iterations per subproblem
    pub qp_max_iters: u32,
}

/// The SQP solver.
#[derive(Debug, Clone, Default)]
pub struct Sqp {
    settings: SqpSettings,
}

/// Solution of one quadratic subproblem.
struct QpStep {
    /// Primal step
    step: DVector<f64>,

    /// Multipliers of the linearised equality constraints
    multipliers: DVector<f64>,

    /// Gradient of the Lagrangian at the current point, bound multipliers
    /// included
    lagrangian_grad: DVector<f64>,

    /// Sum of the absolute values of all multipliers
    multiplier_sum: f64,
}

/// A finite variable bound, turned into one inequality row of the
/// subproblem.
#[derive(Debug, Clone, Copy)]
enum BoundRow {
    Upper(usize),
    Lower(usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for SqpSettings {
    fn default() -> Self {
        Self {
            max_iters: 1000,
            tol: 1e-6,
            max_backtracks: 40,
            hessian_reg: 1e-8,
            qp_max_iters: 200,
        }
    }
}

impl Sqp {
    pub fn new(settings: SqpSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SqpSettings {
        &self.settings
    }

    fn qp_settings(&self) -> Option<DefaultSettings<f64>> {
        DefaultSettingsBuilder::default()
            .max_iter(self.settings.qp_max_iters)
            .verbose(false)
            .tol_gap_abs(QP_TOL)
            .tol_gap_rel(QP_TOL)
            .tol_feas(QP_TOL)
            .build()
            .ok()
    }

    /// Build and solve the quadratic subproblem about `z`, `None` if
    /// Clarabel doesn't reach a solution.
    #[allow(clippy::too_many_arguments)]
    fn solve_subproblem(
        &self,
        qp_settings: &DefaultSettings<f64>,
        z: &DVector<f64>,
        bounds: (&DVector<f64>, &DVector<f64>),
        bound_rows: &[BoundRow],
        hess_diag: &DVector<f64>,
        grad: &DVector<f64>,
        c: &DVector<f64>,
        jac: &DMatrix<f64>,
    ) -> Option<QpStep> {
        let n = z.len();
        let m = c.len();
        let (lower, upper) = bounds;

        // ---- COST ----

        let p = diagonal_csc(
            &DVector::from_fn(n, |i, _| hess_diag[i] + self.settings.hessian_reg),
        );
        let q: Vec<f64> = grad.iter().copied().collect();

        // ---- CONSTRAINTS ----

        // Equality rows first, then one row per finite bound
        let a = constraint_csc(jac, bound_rows);

        let mut b: Vec<f64> = c.iter().map(|v| -v).collect();
        b.extend(bound_rows.iter().map(|row| match *row {
            BoundRow::Upper(i) => upper[i] - z[i],
            BoundRow::Lower(i) => z[i] - lower[i],
        }));

        let mut cones: Vec<SupportedConeT<f64>> = Vec::with_capacity(2);
        if m > 0 {
            cones.push(ZeroConeT(m));
        }
        if !bound_rows.is_empty() {
            cones.push(NonnegativeConeT(bound_rows.len()));
        }

        // ---- SOLVE ----

        let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, qp_settings.clone()).ok()?;
        solver.solve();

        let sol = &solver.solution;
        if !matches!(sol.status, SolverStatus::Solved | SolverStatus::AlmostSolved) {
            trace!("Subproblem not solved: {:?}", sol.status);
            return None;
        }

        let step = DVector::from_column_slice(&sol.x[..n]);
        let multipliers = DVector::from_column_slice(&sol.z[..m]);

        let mut lagrangian_grad = grad + jac.tr_mul(&multipliers);
        for (row, dual) in bound_rows.iter().zip(sol.z[m..].iter()) {
            match *row {
                BoundRow::Upper(i) => lagrangian_grad[i] += dual,
                BoundRow::Lower(i) => lagrangian_grad[i] -= dual,
            }
        }

        if !all_finite(&step) || !all_finite(&lagrangian_grad) {
            return None;
        }

        Some(QpStep {
            step,
            multipliers,
            lagrangian_grad,
            multiplier_sum: one_norm(&sol.z),
        })
    }
}

impl NlpBackend for Sqp {
    fn solve(
        &mut self,
        nlp: &dyn Nlp,
        warm_start: &DVector<f64>,
    ) -> Result<NlpSolution, SolveFailure> {
        let n = nlp.num_variables();
        let m = nlp.num_constraints();

        if warm_start.len() != n {
            return Err(SolveFailure::WarmStartMismatch {
                expected: n,
                got: warm_start.len(),
            });
        }
        if !all_finite(warm_start) {
            return Err(SolveFailure::NonFiniteIterate(0));
        }

        let (lower, upper) = nlp.bounds();
        let bound_rows = bound_rows(lower, upper);
        let qp_settings = self.qp_settings().ok_or(SolveFailure::QpFailed(0))?;
        let s = &self.settings;

        // ---- INITIALISATION ----

        let mut z = DVector::from_fn(n, |i, _| warm_start[i].max(lower[i]).min(upper[i]));
        let mut penalty = 1.0;

        trace!("iter   objective      inf_pr    inf_du    alpha");

        for iter in 0..=s.max_iters {
            // ---- EVALUATE ----

            let f = nlp.objective(&z);
            let grad = nlp.objective_gradient(&z);
            let c = nlp.constraints(&z);
            let jac = nlp.constraint_jacobian(&z);

            let jac_finite = jac.iter().all(|v| v.is_finite());
            if !f.is_finite() || !all_finite(&grad) || !all_finite(&c) || !jac_finite {
                return Err(SolveFailure::NonFiniteIterate(iter));
            }

            // ---- SUBPROBLEM ----

            let hess_diag = nlp.hessian_diagonal(&z);
            let qp = self
                .solve_subproblem(
                    &qp_settings,
                    &z,
                    (lower, upper),
                    &bound_rows,
                    &hess_diag,
                    &grad,
                    &c,
                    &jac,
                )
                .ok_or(SolveFailure::QpFailed(iter))?;

            // ---- OPTIMALITY ERROR ----

            let num_mults = (m + bound_rows.len()).max(1) as f64;
            let s_d = (qp.multiplier_sum / num_mults).max(S_MAX) / S_MAX;

            let primal_inf = inf_norm(c.as_slice());
            let dual_inf = inf_norm(qp.lagrangian_grad.as_slice()) / s_d;

            if primal_inf <= s.tol && dual_inf <= s.tol {
                debug!(
                    "SQP converged in {} iterations, objective {:.6e}",
                    iter, f
                );
                return Ok(NlpSolution {
                    variables: z,
                    multipliers: qp.multipliers,
                    iterations: iter,
                    objective: f,
                    constraint_violation: primal_inf,
                    dual_infeasibility: dual_inf,
                });
            }

            if iter == s.max_iters {
                break;
            }

            // ---- LINE SEARCH ----

            penalty = f64::max(penalty, inf_norm(qp.multipliers.as_slice()) + PENALTY_MARGIN);

            let c_norm = one_norm(c.as_slice());
            let merit_0 = f + penalty * c_norm;
            let slope = (grad.dot(&qp.step) - penalty * c_norm).min(0.0);
            let noise = MERIT_NOISE * merit_0.abs().max(1.0);

            // The bounds are convex so every step length up to one stays
            // inside them
            let mut alpha = 1.0;
            let mut accepted = None;
            for _ in 0..s.max_backtracks {
                let z_trial = &z + &qp.step * alpha;
                let c_trial = nlp.constraints(&z_trial);
                let m_trial = nlp.objective(&z_trial) + penalty * one_norm(c_trial.as_slice());

                if m_trial.is_finite() && m_trial <= merit_0 + ARMIJO_ETA * alpha * slope + noise {
                    accepted = Some(z_trial);
                    break;
                }
                alpha *= 0.5;
            }
            let z_next = accepted.ok_or(SolveFailure::LineSearchFailed(iter))?;

            trace!(
                "{:4}  {:+.7e}  {:.2e}  {:.2e}  {:.2e}",
                iter,
                f,
                primal_inf,
                dual_inf,
                alpha
            );

            // ---- UPDATE ----

            // Round-off must not carry an iterate across a bound
            z = DVector::from_fn(n, |i, _| z_next[i].max(lower[i]).min(upper[i]));
        }

        Err(SolveFailure::MaxIterationsReached(s.max_iters))
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// One inequality row for each finite bound, upper before lower for each
/// variable.
fn bound_rows(lower: &DVector<f64>, upper: &DVector<f64>) -> Vec<BoundRow> {
    let mut rows = Vec::new();
    for i in 0..lower.len() {
        if upper[i].is_finite() {
            rows.push(BoundRow::Upper(i));
        }
        if lower[i].is_finite() {
            rows.push(BoundRow::Lower(i));
        }
    }
    rows
}

/// Upper triangular CSC form of a diagonal matrix, zeros dropped.
fn diagonal_csc(diag: &DVector<f64>) -> CscMatrix<f64> {
    let n = diag.len();
    let mut colptr = vec![0usize; n + 1];
    let mut rowval = Vec::with_capacity(n);
    let mut nzval = Vec::with_capacity(n);

    for j in 0..n {
        if diag[j] != 0.0 {
            rowval.push(j);
            nzval.push(diag[j]);
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(n, n, colptr, rowval, nzval)
}

/// CSC form of the stacked subproblem constraint matrix `[J; B]`, where each
/// row of `B` is `+e_i` for an upper bound or `-e_i` for a lower bound.
fn constraint_csc(jac: &DMatrix<f64>, bound_rows: &[BoundRow]) -> CscMatrix<f64> {
    let (m, n) = jac.shape();

    // Bound rows touching each column, already in ascending row order
    let mut col_bounds: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for (k, row) in bound_rows.iter().enumerate() {
        match *row {
            BoundRow::Upper(i) => col_bounds[i].push((m + k, 1.0)),
            BoundRow::Lower(i) => col_bounds[i].push((m + k, -1.0)),
        }
    }

    let mut colptr = vec![0usize; n + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..n {
        for i in 0..m {
            let v = jac[(i, j)];
            if v != 0.0 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        for &(r, v) in col_bounds[j].iter() {
            rowval.push(r);
            nzval.push(v);
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(m + bound_rows.len(), n, colptr, rowval, nzval)
}

fn all_finite(v: &DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

#[cfg(test)]
mod test {
    use super::*;

    /// min (z0 + 1)^2 + (z1 - 2)^2  s.t.  z0 + z1 = 1,  0 <= z0 <= 10
    ///
    /// The lower bound on z0 is active at the solution (0, 1).
    struct BoundedQp {
        lower: DVector<f64>,
        upper: DVector<f64>,
    }

    impl BoundedQp {
        fn new() -> Self {
            Self {
                lower: DVector::from_vec(vec![0.0, f64::NEG_INFINITY]),
                upper: DVector::from_vec(vec![10.0, f64::INFINITY]),
            }
        }
    }

    impl Nlp for BoundedQp {
        fn num_variables(&self) -> usize {
            2
        }

        fn num_constraints(&self) -> usize {
            1
        }

        fn bounds(&self) -> (&DVector<f64>, &DVector<f64>) {
            (&self.lower, &self.upper)
        }

        fn objective(&self, z: &DVector<f64>) -> f64 {
            (z[0] + 1.0).powi(2) + (z[1] - 2.0).powi(2)
        }

        fn objective_gradient(&self, z: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![2.0 * (z[0] + 1.0), 2.0 * (z[1] - 2.0)])
        }

        fn hessian_diagonal(&self, _z: &DVector<f64>) -> DVector<f64> {
            DVector::from_element(2, 2.0)
        }

        fn constraints(&self, z: &DVector<f64>) -> DVector<f64> {
            DVector::from_element(1, z[0] + z[1] - 1.0)
        }

        fn constraint_jacobian(&self, _z: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_element(1, 2, 1.0)
        }
    }

    /// min (z - 0.5)^2 with 0 <= z <= 1 and no constraints
    struct Box1d {
        lower: DVector<f64>,
        upper: DVector<f64>,
    }

    impl Nlp for Box1d {
        fn num_variables(&self) -> usize {
            1
        }

        fn num_constraints(&self) -> usize {
            0
        }

        fn bounds(&self) -> (&DVector<f64>, &DVector<f64>) {
            (&self.lower, &self.upper)
        }

        fn objective(&self, z: &DVector<f64>) -> f64 {
            (z[0] - 0.5).powi(2)
        }

        fn objective_gradient(&self, z: &DVector<f64>) -> DVector<f64> {
            DVector::from_element(1, 2.0 * (z[0] - 0.5))
        }

        fn hessian_diagonal(&self, _z: &DVector<f64>) -> DVector<f64> {
            DVector::from_element(1, 2.0)
        }

        fn constraints(&self, _z: &DVector<f64>) -> DVector<f64> {
            DVector::zeros(0)
        }

        fn constraint_jacobian(&self, _z: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::zeros(0, 1)
        }
    }

    /// min (z0 - 3)^2 + (z1 + 1)^2  s.t.  z1 = z0^2 - 1
    ///
    /// The only stationary point of the reduced cost is z0 = 1, so the
    /// solution is (1, 0). Reaching it takes several linearisations.
    struct Parabola {
        lower: DVector<f64>,
        upper: DVector<f64>,
    }

    impl Parabola {
        fn new() -> Self {
            Self {
                lower: DVector::from_element(2, f64::NEG_INFINITY),
                upper: DVector::from_element(2, f64::INFINITY),
            }
        }
    }

    impl Nlp for Parabola {
        fn num_variables(&self) -> usize {
            2
        }

        fn num_constraints(&self) -> usize {
            1
        }

        fn bounds(&self) -> (&DVector<f64>, &DVector<f64>) {
            (&self.lower, &self.upper)
        }

        fn objective(&self, z: &DVector<f64>) -> f64 {
            (z[0] - 3.0).powi(2) + (z[1] + 1.0).powi(2)
        }

        fn objective_gradient(&self, z: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![2.0 * (z[0] - 3.0), 2.0 * (z[1] + 1.0)])
        }

        fn hessian_diagonal(&self, _z: &DVector<f64>) -> DVector<f64> {
            DVector::from_element(2, 2.0)
        }

        fn constraints(&self, z: &DVector<f64>) -> DVector<f64> {
            DVector::from_element(1, z[1] - z[0].powi(2) + 1.0)
        }

        fn constraint_jacobian(&self, z: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_row_slice(1, 2, &[-2.0 * z[0], 1.0])
        }
    }

    #[test]
    fn test_active_bound() {
        let mut sqp = Sqp::default();
        let sol = sqp
            .solve(&BoundedQp::new(), &DVector::from_vec(vec![5.0, 5.0]))
            .unwrap();

        assert!(sol.variables[0].abs() < 1e-5);
        assert!((sol.variables[1] - 1.0).abs() < 1e-5);
        assert!((sol.multipliers[0] - 2.0).abs() < 1e-4);
        assert!(sol.constraint_violation <= 1e-6);
    }

    #[test]
    fn test_unconstrained_box() {
        let nlp = Box1d {
            lower: DVector::from_element(1, 0.0),
            upper: DVector::from_element(1, 1.0),
        };
        let mut sqp = Sqp::default();

        // A start outside the box is moved back inside
        let sol = sqp.solve(&nlp, &DVector::from_element(1, 3.0)).unwrap();
        assert!((sol.variables[0] - 0.5).abs() < 1e-6);
        assert!(sol.multipliers.is_empty());
    }

    #[test]
    fn test_nonlinear_constraint() {
        let mut sqp = Sqp::default();
        let sol = sqp
            .solve(&Parabola::new(), &DVector::from_vec(vec![2.0, 0.0]))
            .unwrap();

        assert!((sol.variables[0] - 1.0).abs() < 1e-4);
        assert!(sol.variables[1].abs() < 1e-4);
        assert!((sol.multipliers[0] + 2.0).abs() < 1e-3);
        assert!(sol.constraint_violation <= 1e-6);
        assert!(sol.iterations > 1);
    }

    #[test]
    fn test_iteration_limit() {
        let mut sqp = Sqp::new(SqpSettings {
            max_iters: 1,
            ..Default::default()
        });

        assert_eq!(
            sqp.solve(&Parabola::new(), &DVector::from_vec(vec![2.0, 0.0])),
            Err(SolveFailure::MaxIterationsReached(1))
        );
    }

    #[test]
    fn test_bad_warm_start() {
        let mut sqp = Sqp::default();

        assert_eq!(
            sqp.solve(&BoundedQp::new(), &DVector::from_element(3, 0.0)),
            Err(SolveFailure::WarmStartMismatch {
                expected: 2,
                got: 3
            })
        );
        assert_eq!(
            sqp.solve(&BoundedQp::new(), &DVector::from_vec(vec![f64::NAN, 0.0])),
            Err(SolveFailure::NonFiniteIterate(0))
        );
    }

    #[test]
    fn test_constraint_csc_layout() {
        let jac = DMatrix::from_row_slice(1, 3, &[1.0, 0.0, 2.0]);
        let lower = DVector::from_vec(vec![0.0, f64::NEG_INFINITY, -1.0]);
        let upper = DVector::from_vec(vec![f64::INFINITY, f64::INFINITY, 1.0]);

        let rows = bound_rows(&lower, &upper);
        assert_eq!(rows.len(), 3);

        let a = constraint_csc(&jac, &rows);
        assert_eq!(a.m, 4);
        assert_eq!(a.n, 3);
        assert_eq!(a.colptr, vec![0, 2, 2, 5]);
        assert_eq!(a.rowval, vec![0, 1, 0, 2, 3]);
        assert_eq!(a.nzval, vec![1.0, -1.0, 2.0, 1.0, -1.0]);
    }
}
