//! Solved plans and solver initial guesses

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::DVector;
use serde::Serialize;

use super::{NlpSolution, VariableLayout};
use crate::base_ctrl::Control;
use crate::loc::{Pose, Target};
use crate::traj_model::{gap, NUM_CONTROLS, NUM_STATES};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Statistics describing how a plan was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SolveStats {
    /// Number of backend iterations
    pub iterations: usize,

    /// Objective value of the plan
    pub objective: f64,

    /// Largest shooting gap in the plan
    ///
    /// Units: meters or radians
    pub constraint_violation: f64,

    pub dual_infeasibility: f64,

    /// Wall clock time taken by the solve
    ///
    /// Units: seconds
    pub solve_time_s: f64,
}

/// A solved horizon: `N + 1` state knots, `N` controls and the total
/// duration.
///
/// A plan always contains at least one interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub states: Vec<Pose>,

    pub controls: Vec<Control>,

    /// Units: seconds
    pub duration_s: f64,

    pub stats: SolveStats,
}

/// An initial guess for the solver, in the same shape as a `Plan`.
#[derive(Debug, Clone, PartialEq)]
pub struct WarmStart {
    pub states: Vec<Pose>,

    pub controls: Vec<Control>,

    /// Units: seconds
    pub duration_s: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Plan {
    /// Unpack a backend solution into a plan.
    pub fn from_solution(layout: &VariableLayout, solution: &NlpSolution) -> Self {
        let z = &solution.variables;

        let states = (0..layout.num_knots())
            .map(|k| Pose::from(layout.state_vec(z, k)))
            .collect();
        let controls = (0..layout.num_intervals())
            .map(|k| Control::from(layout.control_vec(z, k)))
            .collect();

        Self {
            states,
            controls,
            duration_s: z[layout.duration()],
            stats: SolveStats {
                iterations: solution.iterations,
                objective: solution.objective,
                constraint_violation: solution.constraint_violation,
                dual_infeasibility: solution.dual_infeasibility,
                solve_time_s: 0.0,
            },
        }
    }

    /// The command to apply now.
    pub fn first_control(&self) -> Control {
        self.controls[0]
    }

    /// The pose the plan ends at.
    pub fn terminal_pose(&self) -> Pose {
        self.states[self.states.len() - 1]
    }

    pub fn num_intervals(&self) -> usize {
        self.controls.len()
    }

    /// Units: seconds
    pub fn interval_s(&self) -> f64 {
        self.duration_s / self.num_intervals() as f64
    }

    /// Largest absolute element of any shooting gap in the plan.
    pub fn max_gap(&self) -> f64 {
        let dt = self.interval_s();
        self.controls
            .iter()
            .enumerate()
            .map(|(k, u)| {
                gap(
                    &self.states[k].to_vector(),
                    &u.to_vector(),
                    &self.states[k + 1].to_vector(),
                    dt,
                )
                .amax()
            })
            .fold(0.0, f64::max)
    }

    /// True if every number in the plan is finite.
    pub fn is_finite(&self) -> bool {
        self.duration_s.is_finite()
            && self.controls.iter().all(|u| u.is_finite())
            && self
                .states
                .iter()
                .all(|s| s.x_m.is_finite() && s.y_m.is_finite() && s.heading_rad.is_finite())
    }
}

impl WarmStart {
    /// States interpolated on the straight line from the pose to the target,
    /// heading held constant, all controls zero.
    ///
    /// Knot `k` sits at fraction `k/N` along the line so the first knot is
    /// the pose and the last is the target.
    pub fn straight_line(num_intervals: usize, pose: &Pose, target: &Target, duration_s: f64) -> Self {
        let n = num_intervals as f64;
        let states = (0..=num_intervals)
            .map(|k| {
                let frac = k as f64 / n;
                Pose::new(
                    util::maths::lin_interp(pose.x_m, target.x_m, frac),
                    util::maths::lin_interp(pose.y_m, target.y_m, frac),
                    pose.heading_rad,
                )
            })
            .collect();

        Self {
            states,
            controls: vec![Control::stop(); num_intervals],
            duration_s,
        }
    }

    /// The previous plan advanced by one interval.
    ///
    /// Every knot and control moves one place towards the start, the last of
    /// each is repeated to fill the end, and the first knot is replaced by
    /// the current pose.
    pub fn shifted(plan: &Plan, pose: &Pose) -> Self {
        let mut states: Vec<Pose> = plan.states.iter().skip(1).copied().collect();
        states.push(plan.terminal_pose());
        states[0] = *pose;

        let mut controls: Vec<Control> = plan.controls.iter().skip(1).copied().collect();
        controls.push(plan.controls[plan.controls.len() - 1]);

        Self {
            states,
            controls,
            duration_s: plan.duration_s,
        }
    }

    pub fn num_intervals(&self) -> usize {
        self.controls.len()
    }

    /// Number of decision variables the guess would fill.
    pub fn num_variables(&self) -> usize {
        self.states.len() * NUM_STATES + self.controls.len() * NUM_CONTROLS + 1
    }

    /// Pack the guess into a decision vector. Returns `None` if the guess
    /// doesn't have the shape of the layout.
    pub fn to_variables(&self, layout: &VariableLayout) -> Option<DVector<f64>> {
        if self.states.len() != layout.num_knots() || self.controls.len() != layout.num_intervals()
        {
            return None;
        }

        let mut z = DVector::zeros(layout.num_variables());
        for (k, s) in self.states.iter().enumerate() {
            let i = layout.state(k);
            let v = s.to_vector();
            for j in 0..NUM_STATES {
                z[i + j] = v[j];
            }
        }
        for (k, u) in self.controls.iter().enumerate() {
            let i = layout.control(k);
            let v = u.to_vector();
            for j in 0..NUM_CONTROLS {
                z[i + j] = v[j];
            }
        }
        z[layout.duration()] = self.duration_s;

        Some(z)
    }
}
