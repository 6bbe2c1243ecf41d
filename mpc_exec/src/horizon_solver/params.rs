//! Parameters structure for the HorizonSolver

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::SqpSettings;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the horizon solver.
///
/// Missing fields take their default value, which reproduces the reference
/// controller: 50 intervals, `|vx|, |vy| <= 0.3 m/s`, `|omega| <= 1.5 rad/s`
/// and unit cost weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    // ---- HORIZON ----
    /// Number of control intervals in the horizon. There are one more state
    /// knots than intervals.
    pub num_intervals: usize,

    /// Lower bound on the total duration of the horizon.
    ///
    /// Units: seconds
    pub min_duration_s: f64,

    /// Upper bound on the total duration of the horizon.
    ///
    /// Units: seconds
    pub max_duration_s: f64,

    // ---- CONTROL LIMITS ----
    /// Units: meters/second
    pub min_vx_ms: f64,

    /// Units: meters/second
    pub max_vx_ms: f64,

    /// Units: meters/second
    pub min_vy_ms: f64,

    /// Units: meters/second
    pub max_vy_ms: f64,

    /// Units: radians/second
    pub min_omega_rads: f64,

    /// Units: radians/second
    pub max_omega_rads: f64,

    // ---- COST WEIGHTS ----
    /// Weight on the sum of squared forward speeds.
    pub vx_weight: f64,

    /// Weight on the sum of squared lateral speeds.
    pub vy_weight: f64,

    /// Weight on the sum of squared turn rates.
    pub omega_weight: f64,

    /// Weight on the squared distance between the final knot and the target.
    pub terminal_weight: f64,

    /// Weight on the squared difference between the first knot and the
    /// current pose. This should be large so the plan starts where the base
    /// actually is.
    pub initial_state_weight: f64,

    // ---- SOLVER ----
    /// How the solver's initial guess is built.
    pub warm_start: WarmStartStrategy,

    /// Settings for the SQP backend.
    pub sqp: SqpSettings,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Strategies for building the initial guess given to the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmStartStrategy {
    /// Interpolate the states on a straight line from the pose to the target
    /// and seed all controls with zero.
    StraightLine,

    /// Shift the previous plan forward by one interval if there is one,
    /// otherwise use a straight line.
    ShiftPrevious,
}

/// Errors in the solver parameters.
#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("The horizon must contain at least one interval")]
    NoIntervals,

    #[error("Invalid bounds on {0}: the lower bound must be below the upper bound")]
    InvalidBounds(&'static str),

    #[error("The minimum horizon duration must be positive, found {0} s")]
    NonPositiveDuration(f64),

    #[error("Cost weight {0} must be finite and non-negative")]
    InvalidWeight(&'static str),

    #[error("Solver setting {0} is out of range")]
    InvalidSolverSetting(&'static str),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            num_intervals: 50,
            min_duration_s: 0.1,
            max_duration_s: 60.0,
            min_vx_ms: -0.3,
            max_vx_ms: 0.3,
            min_vy_ms: -0.3,
            max_vy_ms: 0.3,
            min_omega_rads: -1.5,
            max_omega_rads: 1.5,
            vx_weight: 1.0,
            vy_weight: 1.0,
            omega_weight: 1.0,
            terminal_weight: 1.0,
            initial_state_weight: 1e4,
            warm_start: WarmStartStrategy::ShiftPrevious,
            sqp: SqpSettings::default(),
        }
    }
}

impl Params {
    /// Check the parameters describe a well formed problem.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.num_intervals == 0 {
            return Err(ParamsError::NoIntervals);
        }

        let bounds = [
            ("vx", self.min_vx_ms, self.max_vx_ms),
            ("vy", self.min_vy_ms, self.max_vy_ms),
            ("omega", self.min_omega_rads, self.max_omega_rads),
            ("duration", self.min_duration_s, self.max_duration_s),
        ];
        for (name, min, max) in bounds.iter() {
            // Also catches NaNs
            if !(min < max) {
                return Err(ParamsError::InvalidBounds(name));
            }
        }

        if !(self.min_duration_s > 0.0) {
            return Err(ParamsError::NonPositiveDuration(self.min_duration_s));
        }

        let weights = [
            ("vx_weight", self.vx_weight),
            ("vy_weight", self.vy_weight),
            ("omega_weight", self.omega_weight),
            ("terminal_weight", self.terminal_weight),
            ("initial_state_weight", self.initial_state_weight),
        ];
        for (name, w) in weights.iter() {
            if !w.is_finite() || *w < 0.0 {
                return Err(ParamsError::InvalidWeight(name));
            }
        }

        let sqp = &self.sqp;
        if sqp.max_iters == 0 {
            return Err(ParamsError::InvalidSolverSetting("max_iters"));
        }
        if !(sqp.tol > 0.0) || !sqp.tol.is_finite() {
            return Err(ParamsError::InvalidSolverSetting("tol"));
        }
        if sqp.max_backtracks == 0 {
            return Err(ParamsError::InvalidSolverSetting("max_backtracks"));
        }
        if !(sqp.hessian_reg >= 0.0) || !sqp.hessian_reg.is_finite() {
            return Err(ParamsError::InvalidSolverSetting("hessian_reg"));
        }
        if sqp.qp_max_iters == 0 {
            return Err(ParamsError::InvalidSolverSetting("qp_max_iters"));
        }

        Ok(())
    }

    /// Lower bounds on the control vector `[vx, vy, omega]`.
    pub fn control_lower(&self) -> [f64; 3] {
        [self.min_vx_ms, self.min_vy_ms, self.min_omega_rads]
    }

    /// Upper bounds on the control vector `[vx, vy, omega]`.
    pub fn control_upper(&self) -> [f64; 3] {
        [self.max_vx_ms, self.max_vy_ms, self.max_omega_rads]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        assert!(Params::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_params() {
        let mut p = Params::default();
        p.num_intervals = 0;
        assert!(matches!(p.validate(), Err(ParamsError::NoIntervals)));

        let mut p = Params::default();
        p.min_vy_ms = 0.5;
        assert!(matches!(p.validate(), Err(ParamsError::InvalidBounds("vy"))));

        let mut p = Params::default();
        p.min_duration_s = 0.0;
        assert!(matches!(
            p.validate(),
            Err(ParamsError::NonPositiveDuration(_))
        ));

        let mut p = Params::default();
        p.terminal_weight = -1.0;
        assert!(matches!(
            p.validate(),
            Err(ParamsError::InvalidWeight("terminal_weight"))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_solver_settings() {
        let cases: [(&str, fn(&mut SqpSettings)); 6] = [
            ("max_iters", |s| s.max_iters = 0),
            ("tol", |s| s.tol = 0.0),
            ("tol", |s| s.tol = f64::NAN),
            ("max_backtracks", |s| s.max_backtracks = 0),
            ("hessian_reg", |s| s.hessian_reg = -1e-8),
            ("qp_max_iters", |s| s.qp_max_iters = 0),
        ];

        for (name, apply) in cases.iter() {
            let mut p = Params::default();
            apply(&mut p.sqp);
            match p.validate() {
                Err(ParamsError::InvalidSolverSetting(n)) => assert_eq!(n, *name),
                other => panic!("Expected {} to be rejected, got {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_partial_params_file() {
        let p: Params = util::params::from_str(
            "num_intervals = 20\n\
             max_vx_ms = 0.5\n\
             warm_start = \"straight_line\"\n\
             [sqp]\n\
             max_iters = 50\n",
        )
        .unwrap();

        assert_eq!(p.num_intervals, 20);
        assert_eq!(p.max_vx_ms, 0.5);
        assert_eq!(p.min_vx_ms, -0.3);
        assert_eq!(p.warm_start, WarmStartStrategy::StraightLine);
        assert_eq!(p.sqp.max_iters, 50);
        assert_eq!(p.sqp.tol, SqpSettings::default().tol);
    }

    #[test]
    fn test_shipped_params_file() {
        let p: Params =
            util::params::from_str(include_str!("../../../params/horizon_solver.toml")).unwrap();

        assert!(p.validate().is_ok());
        assert_eq!(p.num_intervals, 50);
        assert_eq!(p.max_duration_s, 60.0);
        assert_eq!(p.sqp.max_iters, SqpSettings::default().max_iters);
    }
}
