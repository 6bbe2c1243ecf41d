//! Generic nonlinear program interface
//!
//! The horizon problem is posed as
//!
//! ```text
//! min f(z)  s.t.  c(z) = 0,  lower <= z <= upper
//! ```
//!
//! and handed to an `NlpBackend`. Any backend which can solve this class of
//! problem can be swapped in behind the trait.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{DMatrix, DVector};

use super::SolveFailure;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The solution found by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct NlpSolution {
    /// Primal variables
    pub variables: DVector<f64>,

    /// Multipliers of the equality constraints
    pub multipliers: DVector<f64>,

    /// Number of iterations the backend took
    pub iterations: usize,

    /// Objective value at the solution
    pub objective: f64,

    /// Infinity norm of the constraints at the solution
    pub constraint_violation: f64,

    /// Scaled infinity norm of the Lagrangian gradient at the solution
    pub dual_infeasibility: f64,
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A smooth equality and bound constrained nonlinear program.
pub trait Nlp {
    fn num_variables(&self) -> usize;

    fn num_constraints(&self) -> usize;

    /// Lower and upper bounds on the variables. Unbounded variables use
    /// infinite bounds.
    fn bounds(&self) -> (&DVector<f64>, &DVector<f64>);

    fn objective(&self, z: &DVector<f64>) -> f64;

    fn objective_gradient(&self, z: &DVector<f64>) -> DVector<f64>;

    /// Diagonal of a positive semi-definite approximation of the Hessian of
    /// the Lagrangian.
    fn hessian_diagonal(&self, z: &DVector<f64>) -> DVector<f64>;

    fn constraints(&self, z: &DVector<f64>) -> DVector<f64>;

    fn constraint_jacobian(&self, z: &DVector<f64>) -> DMatrix<f64>;
}

/// A solver for an `Nlp`.
pub trait NlpBackend: Send {
    /// Solve the program starting from `warm_start`.
    ///
    /// The backend must either converge to its tolerance or return a
    /// failure, it must never return a partially converged iterate as a
    /// solution.
    fn solve(&mut self, nlp: &dyn Nlp, warm_start: &DVector<f64>)
        -> Result<NlpSolution, SolveFailure>;
}
