//! Control loop parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};

// Internal
use crate::loc::{Pose, Target};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the control loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Period between ticks of the loop. A solve which takes longer than this
    /// overruns the tick, which the executable warns about and accepts.
    ///
    /// Units: seconds
    pub tick_period_s: f64,

    /// The target counts as reached once the goal distance is below this.
    ///
    /// Units: meters
    pub goal_tolerance_m: f64,

    /// How the distance to the target is measured
    pub goal_metric: GoalMetric,

    /// Number of consecutive failed solves tolerated before giving up
    pub max_solve_retries: u32,

    /// Send a stop command when the loop converges or fails
    pub stop_on_exit: bool,

    /// Save every plan as JSON in the session directory
    pub save_plans: bool,

    /// Target used when none is given on the command line
    ///
    /// Units: meters
    pub target_m: [f64; 2],
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Ways of measuring the distance between the base and the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalMetric {
    /// Straight line distance in the plane
    Euclidean,

    /// Distance along the world X axis only
    XAxis,

    /// Distance along the world Y axis only
    YAxis,
}

#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("The tick period must be positive, found {0} s")]
    NonPositiveTickPeriod(f64),

    #[error("The goal tolerance must be non-negative, found {0} m")]
    NegativeGoalTolerance(f64),

    #[error("The default target must be finite")]
    NonFiniteTarget,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            tick_period_s: 1.0,
            goal_tolerance_m: 0.01,
            goal_metric: GoalMetric::Euclidean,
            max_solve_retries: 3,
            stop_on_exit: true,
            save_plans: false,
            target_m: [1.0, 1.0],
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if !(self.tick_period_s > 0.0) {
            return Err(ParamsError::NonPositiveTickPeriod(self.tick_period_s));
        }
        if !(self.goal_tolerance_m >= 0.0) {
            return Err(ParamsError::NegativeGoalTolerance(self.goal_tolerance_m));
        }
        if !self.target_m.iter().all(|v| v.is_finite()) {
            return Err(ParamsError::NonFiniteTarget);
        }

        Ok(())
    }
}

impl GoalMetric {
    /// Distance from the pose to the target under this metric.
    ///
    /// Units: meters
    pub fn distance(&self, pose: &Pose, target: &Target) -> f64 {
        match self {
            GoalMetric::Euclidean => pose.distance_to(target),
            GoalMetric::XAxis => (target.x_m - pose.x_m).abs(),
            GoalMetric::YAxis => (target.y_m - pose.y_m).abs(),
        }
    }
}
