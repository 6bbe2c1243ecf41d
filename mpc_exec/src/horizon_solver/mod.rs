//! # Horizon solver module
//!
//! The horizon solver plans how to drive the base from its current pose to
//! the target. The plan is found by solving a nonlinear program over a
//! horizon of `N` intervals:
//!
//! ```text
//! min   sum_k (w_vx vx_k^2 + w_vy vy_k^2 + w_w omega_k^2)
//!     + w_t |p_N - target|^2
//!     + w_0 |x_0 - pose|^2
//!
//! s.t.  x_{k+1} = rk4(x_k, u_k, T/N)      k = 0..N-1
//!       u_min <= u_k <= u_max
//!       T_min <= T <= T_max
//! ```
//!
//! The duration `T` of the horizon is a decision variable. The first knot is
//! tied to the current pose by a heavy penalty rather than a hard
//! constraint, and the target only enters through the terminal cost.
//!
//! The problem is solved by an `NlpBackend`, by default the `Sqp` method
//! implemented here, which hands its quadratic subproblems to Clarabel.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod nlp;
mod params;
mod plan;
mod problem;
mod sqp;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use nlp::*;
pub use params::*;
pub use plan::*;
pub use problem::*;
pub use sqp::*;
pub use state::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Reasons a horizon solve can fail.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolveFailure {
    #[error("Maximum number of iterations ({0}) reached without converging")]
    MaxIterationsReached(usize),

    #[error("Could not solve the quadratic subproblem at iteration {0}")]
    QpFailed(usize),

    #[error("Line search could not find an acceptable step at iteration {0}")]
    LineSearchFailed(usize),

    #[error("Encountered a non-finite value at iteration {0}")]
    NonFiniteIterate(usize),

    #[error("The warm start has {got} variables but the problem has {expected}")]
    WarmStartMismatch { expected: usize, got: usize },

    #[error("The solver returned a plan which violates the bounds or is not finite")]
    InvalidPlan,
}
