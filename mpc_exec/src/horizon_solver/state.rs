//! Horizon solver state

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, trace, warn};
use std::time::Instant;

use super::{
    HorizonProblem, Sqp, NlpBackend, Params, ParamsError, Plan, SolveFailure,
    WarmStart, WarmStartStrategy,
};
use crate::loc::{Pose, Target};
use util::maths::wrap_pi;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Plans trajectories to the target by solving the horizon problem.
pub struct HorizonSolver {
    params: Params,

    problem: HorizonProblem,

    backend: Box<dyn NlpBackend>,

    /// The most recent successful plan, used to warm start the next solve.
    last_plan: Option<Plan>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl HorizonSolver {
    /// Create a new solver using the SQP backend.
    pub fn new(params: Params) -> Result<Self, ParamsError> {
        let backend = Box::new(Sqp::new(params.sqp.clone()));
        Self::with_backend(params, backend)
    }

    /// Create a new solver using the given backend.
    pub fn with_backend(params: Params, backend: Box<dyn NlpBackend>) -> Result<Self, ParamsError> {
        params.validate()?;

        let problem = HorizonProblem::new(&params);

        Ok(Self {
            params,
            problem,
            backend,
            last_plan: None,
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn last_plan(&self) -> Option<&Plan> {
        self.last_plan.as_ref()
    }

    /// Forget the retained plan, so the next solve starts from a straight
    /// line.
    pub fn reset(&mut self) {
        self.last_plan = None;
    }

    /// Build the initial guess for a solve according to the warm start
    /// strategy.
    pub fn build_warm_start(&self, pose: &Pose, target: &Target) -> WarmStart {
        match (self.params.warm_start, &self.last_plan) {
            (WarmStartStrategy::ShiftPrevious, Some(plan))
                if plan.num_intervals() == self.params.num_intervals =>
            {
                WarmStart::shifted(plan, pose)
            }
            _ => WarmStart::straight_line(
                self.params.num_intervals,
                pose,
                target,
                self.seed_duration_s(pose, target),
            ),
        }
    }

    /// Plan from the pose to the target, warm starting from the retained
    /// plan where possible.
    ///
    /// On success the new plan is retained and a copy returned. On failure
    /// the retained plan is dropped so the next attempt starts afresh.
    pub fn solve(&mut self, pose: &Pose, target: &Target) -> Result<Plan, SolveFailure> {
        // Keep the heading continuous with the previous plan so a wrap in the
        // pose source doesn't appear as a full turn
        let pose = match &self.last_plan {
            Some(plan) if plan.states.len() > 1 => Pose {
                heading_rad: unwrap_heading(pose.heading_rad, plan.states[1].heading_rad),
                ..*pose
            },
            _ => *pose,
        };

        let warm_start = self.build_warm_start(&pose, target);

        match self.solve_with_warm_start(&pose, target, &warm_start) {
            Ok(plan) => {
                self.last_plan = Some(plan.clone());
                Ok(plan)
            }
            Err(e) => {
                self.last_plan = None;
                Err(e)
            }
        }
    }

    /// Solve from an explicit warm start. The retained plan is not changed.
    pub fn solve_with_warm_start(
        &mut self,
        pose: &Pose,
        target: &Target,
        warm_start: &WarmStart,
    ) -> Result<Plan, SolveFailure> {
        let layout = *self.problem.layout();
        let z0 = warm_start
            .to_variables(&layout)
            .ok_or(SolveFailure::WarmStartMismatch {
                expected: layout.num_variables(),
                got: warm_start.num_variables(),
            })?;

        let nlp = self.problem.with_parameters(pose, target);

        let start = Instant::now();
        let solution = self.backend.solve(&nlp, &z0)?;
        let solve_time_s = start.elapsed().as_secs_f64();

        let mut plan = Plan::from_solution(&layout, &solution);
        plan.stats.solve_time_s = solve_time_s;

        if !self.plan_is_valid(&plan) {
            warn!("Backend returned an invalid plan: {:?}", plan.stats);
            return Err(SolveFailure::InvalidPlan);
        }

        debug!(
            "Solved horizon in {} iterations ({:.3} s): T = {:.3} s, first control = {:?}",
            plan.stats.iterations,
            solve_time_s,
            plan.duration_s,
            plan.first_control()
        );
        trace!("Terminal pose: {:?}", plan.terminal_pose());

        Ok(plan)
    }

    /// Duration seed for the straight line warm start: the time to cover
    /// the distance at half the maximum linear speed.
    fn seed_duration_s(&self, pose: &Pose, target: &Target) -> f64 {
        let p = &self.params;
        let speed_ms = 0.5 * p.max_vx_ms.abs().max(p.max_vy_ms.abs());

        let duration_s = if speed_ms > 0.0 {
            pose.distance_to(target) / speed_ms
        } else {
            p.max_duration_s
        };

        duration_s.max(p.min_duration_s).min(p.max_duration_s)
    }

    fn plan_is_valid(&self, plan: &Plan) -> bool {
        let p = &self.params;

        plan.is_finite()
            && plan.duration_s >= p.min_duration_s
            && plan.duration_s <= p.max_duration_s
            && plan.controls.iter().all(|u| {
                u.vx_ms >= p.min_vx_ms
                    && u.vx_ms <= p.max_vx_ms
                    && u.vy_ms >= p.min_vy_ms
                    && u.vy_ms <= p.max_vy_ms
                    && u.omega_rads >= p.min_omega_rads
                    && u.omega_rads <= p.max_omega_rads
            })
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// The angle equivalent to `heading` which is closest to `reference`.
fn unwrap_heading(heading: f64, reference: f64) -> f64 {
    reference + wrap_pi(heading - reference)
}
