//! Control loop state

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, error, info, warn};
use serde::Serialize;

// Internal
use super::{Params, ParamsError};
use crate::base_ctrl::{ActuationSink, Control};
use crate::horizon_solver::{HorizonSolver, Plan};
use crate::loc::{Pose, PoseSource, Target};
use util::{
    archive::{ArchiveError, Archiver},
    session::{self, Session},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The receding horizon control loop.
pub struct CtrlLoop {
    params: Params,

    /// Executing mode
    mode: Mode,

    solver: HorizonSolver,

    /// Target of the current episode
    target: Option<Target>,

    /// Number of ticks processed since the loop was created
    num_ticks: u64,

    /// Number of solves in a row which have failed
    num_consec_solve_failures: u32,

    report: StatusReport,

    arch_status: Option<Archiver>,
}

/// The status of one tick of the loop, archived every tick.
#[derive(Debug, Default, Copy, Clone, Serialize)]
pub struct StatusReport {
    /// Units: seconds since the session started
    pub time_s: f64,

    pub tick: u64,

    /// Mode at the end of the tick
    pub mode: Mode,

    /// Goal distance measured this tick
    ///
    /// Units: meters
    pub dist_to_target_m: Option<f64>,

    /// Command sent this tick
    pub cmd_vx_ms: Option<f64>,
    pub cmd_vy_ms: Option<f64>,
    pub cmd_omega_rads: Option<f64>,

    /// Solver iterations used this tick
    pub solve_iters: Option<usize>,

    /// Duration of the plan solved this tick
    ///
    /// Units: seconds
    pub plan_duration_s: Option<f64>,

    pub pose_unavailable: bool,
    pub solve_failed: bool,
    pub actuation_failed: bool,

    pub num_consec_solve_failures: u32,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The possible modes of the control loop. Each non-terminal mode is handled
/// by a `mode_xyz` function.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum Mode {
    /// Waiting for a target and a pose
    Idle,

    /// Re-planning every tick
    Planning,

    /// The target has been reached
    Converged,

    /// Too many solves failed in a row
    Failed,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CtrlLoop {
    pub fn new(params: Params, solver: HorizonSolver) -> Result<Self, ParamsError> {
        params.validate()?;

        Ok(Self {
            params,
            mode: Mode::Idle,
            solver,
            target: None,
            num_ticks: 0,
            num_consec_solve_failures: 0,
            report: StatusReport::default(),
            arch_status: None,
        })
    }

    /// Start archiving status reports into the session.
    pub fn init_archives(&mut self, session: &Session) -> Result<(), ArchiveError> {
        self.arch_status = Some(Archiver::from_path(session, "ctrl_loop/status_report.csv")?);
        Ok(())
    }

    /// Begin a new episode towards `target`.
    ///
    /// The retained plan and failure count are cleared and the loop returns
    /// to `Idle`, planning starts on the next tick with a valid pose.
    pub fn set_target(&mut self, target: Target) {
        info!("New target: ({:.3}, {:.3}) m", target.x_m, target.y_m);

        self.target = Some(target);
        self.mode = Mode::Idle;
        self.num_consec_solve_failures = 0;
        self.solver.reset();
    }

    pub fn target(&self) -> Option<Target> {
        self.target
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The plan from the most recent successful solve of this episode.
    pub fn last_plan(&self) -> Option<&Plan> {
        self.solver.last_plan()
    }

    /// Process one tick of the loop.
    pub fn tick(
        &mut self,
        pose_source: &mut dyn PoseSource,
        actuation: &mut dyn ActuationSink,
    ) -> StatusReport {
        // Setup cycle data
        self.report = StatusReport {
            time_s: session::get_elapsed_seconds(),
            tick: self.num_ticks,
            ..Default::default()
        };

        // Mode execution. Each mode function returns the mode to switch to.
        self.mode = match self.mode {
            Mode::Idle => self.mode_idle(pose_source, actuation),
            Mode::Planning => self.mode_planning(pose_source, actuation),
            Mode::Converged | Mode::Failed => self.mode,
        };

        self.report.mode = self.mode;
        self.report.num_consec_solve_failures = self.num_consec_solve_failures;

        if let Some(ref mut arch) = self.arch_status {
            if let Err(e) = arch.serialise(&self.report) {
                warn!("Could not archive CtrlLoop status report: {}", e);
            }
        }

        self.num_ticks += 1;

        self.report
    }

    /// Mode waiting for a target and a pose.
    ///
    /// Once both are available the tick is processed as a planning tick.
    fn mode_idle(
        &mut self,
        pose_source: &mut dyn PoseSource,
        actuation: &mut dyn ActuationSink,
    ) -> Mode {
        let target = match self.target {
            Some(t) => t,
            None => return Mode::Idle,
        };

        let pose = match self.read_pose(pose_source) {
            Some(p) => p,
            None => return Mode::Idle,
        };

        info!("Pose acquired at ({:.3}, {:.3}) m, planning", pose.x_m, pose.y_m);

        self.plan(&pose, &target, actuation)
    }

    /// Mode re-planning every tick.
    fn mode_planning(
        &mut self,
        pose_source: &mut dyn PoseSource,
        actuation: &mut dyn ActuationSink,
    ) -> Mode {
        let target = match self.target {
            Some(t) => t,
            None => {
                warn!("In Planning mode with no target, returning to Idle");
                return Mode::Idle;
            }
        };

        match self.read_pose(pose_source) {
            Some(pose) => self.plan(&pose, &target, actuation),
            None => Mode::Planning,
        }
    }

    /// Check for arrival, then solve and dispatch the first control.
    fn plan(&mut self, pose: &Pose, target: &Target, actuation: &mut dyn ActuationSink) -> Mode {
        // ---- GOAL CHECK ----

        let dist_m = self.params.goal_metric.distance(pose, target);
        self.report.dist_to_target_m = Some(dist_m);

        if dist_m < self.params.goal_tolerance_m {
            info!(
                "Target reached, {:.4} m from target after {} ticks",
                dist_m, self.num_ticks
            );
            self.stop(actuation);
            return Mode::Converged;
        }

        // ---- SOLVE ----

        let plan = match self.solver.solve(pose, target) {
            Ok(p) => p,
            Err(e) => {
                self.num_consec_solve_failures += 1;
                self.report.solve_failed = true;

                if self.num_consec_solve_failures > self.params.max_solve_retries {
                    error!(
                        "Horizon solve failed {} times in a row, giving up: {}",
                        self.num_consec_solve_failures, e
                    );
                    self.stop(actuation);
                    return Mode::Failed;
                }

                warn!(
                    "Horizon solve failed ({} in a row), retrying next tick: {}",
                    self.num_consec_solve_failures, e
                );
                return Mode::Planning;
            }
        };

        self.num_consec_solve_failures = 0;
        self.report.solve_iters = Some(plan.stats.iterations);
        self.report.plan_duration_s = Some(plan.duration_s);

        // ---- DISPATCH ----

        let cmd = plan.first_control();
        debug!("Dispatching {:?}, {:.4} m to target", cmd, dist_m);

        self.report.cmd_vx_ms = Some(cmd.vx_ms);
        self.report.cmd_vy_ms = Some(cmd.vy_ms);
        self.report.cmd_omega_rads = Some(cmd.omega_rads);

        if let Err(e) = actuation.dispatch(cmd) {
            warn!("Could not dispatch command: {}", e);
            self.report.actuation_failed = true;
        }

        if self.params.save_plans {
            session::save(format!("ctrl_loop/plans/plan_{:06}.json", self.num_ticks), plan);
        }

        Mode::Planning
    }

    fn read_pose(&mut self, pose_source: &mut dyn PoseSource) -> Option<Pose> {
        match pose_source.read() {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("Skipping tick: {}", e);
                self.report.pose_unavailable = true;
                None
            }
        }
    }

    /// Send a single stop command if configured to.
    fn stop(&mut self, actuation: &mut dyn ActuationSink) {
        if !self.params.stop_on_exit {
            return;
        }

        if let Err(e) = actuation.dispatch(Control::stop()) {
            warn!("Could not dispatch stop command: {}", e);
            self.report.actuation_failed = true;
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Idle
    }
}

impl Mode {
    /// True if no further ticks will change the mode.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Mode::Converged | Mode::Failed)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::horizon_solver::{self, Nlp, NlpBackend, NlpSolution, SolveFailure, Sqp};
    use crate::sim_base::{self, SimBase};
    use nalgebra::DVector;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// Wraps the SQP backend, counting calls and optionally
    /// failing every one.
    struct CountingBackend {
        inner: Sqp,
        calls: Arc<AtomicUsize>,
        always_fail: bool,
    }

    impl NlpBackend for CountingBackend {
        fn solve(
            &mut self,
            nlp: &dyn Nlp,
            warm_start: &DVector<f64>,
        ) -> Result<NlpSolution, SolveFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.always_fail {
                return Err(SolveFailure::MaxIterationsReached(0));
            }
            self.inner.solve(nlp, warm_start)
        }
    }

    fn solver_params() -> horizon_solver::Params {
        horizon_solver::Params {
            num_intervals: 10,
            max_duration_s: 5.0,
            ..Default::default()
        }
    }

    fn make_loop(params: Params, always_fail: bool) -> (CtrlLoop, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let solver_params = solver_params();
        let backend = CountingBackend {
            inner: Sqp::new(solver_params.sqp.clone()),
            calls: calls.clone(),
            always_fail,
        };
        let solver = HorizonSolver::with_backend(solver_params, Box::new(backend)).unwrap();

        (CtrlLoop::new(params, solver).unwrap(), calls)
    }

    fn make_base(initial_pose: [f64; 3]) -> (SimBase, SimBase) {
        let base = SimBase::new(&sim_base::Params {
            initial_pose,
            ..Default::default()
        });
        let dems = base.clone();
        (base, dems)
    }

    #[test]
    fn test_idle_without_target() {
        let (mut ctrl, calls) = make_loop(Params::default(), false);
        let (mut base, mut dems) = make_base([0.0, 0.0, 0.0]);

        let report = ctrl.tick(&mut base, &mut dems);
        assert_eq!(report.mode, Mode::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(base.num_reads().unwrap(), 0);
    }

    #[test]
    fn test_target_at_pose_converges_without_solving() {
        let (mut ctrl, calls) = make_loop(Params::default(), false);
        let (mut base, mut dems) = make_base([0.5, 0.5, 1.0]);

        ctrl.set_target(Target::new(0.5, 0.5));
        let report = ctrl.tick(&mut base, &mut dems);

        assert_eq!(report.mode, Mode::Converged);
        assert_eq!(report.dist_to_target_m, Some(0.0));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Exactly one stop command
        assert_eq!(base.num_dispatches().unwrap(), 1);
        assert_eq!(base.current_cmd().unwrap(), Control::stop());

        // Terminal modes do nothing
        let report = ctrl.tick(&mut base, &mut dems);
        assert_eq!(report.mode, Mode::Converged);
        assert_eq!(base.num_dispatches().unwrap(), 1);
        assert_eq!(base.num_reads().unwrap(), 1);
    }

    #[test]
    fn test_pose_failures_skip_ticks() {
        let (mut ctrl, calls) = make_loop(Params::default(), false);
        let (mut base, mut dems) = make_base([0.0, 0.0, 0.0]);
        ctrl.set_target(Target::new(1.0, 0.0));

        let report = ctrl.tick(&mut base, &mut dems);
        assert_eq!(report.mode, Mode::Planning);
        assert!(report.cmd_vx_ms.is_some());
        base.advance(1.0).unwrap();

        base.inject_read_faults(3).unwrap();
        for _ in 0..3 {
            let report = ctrl.tick(&mut base, &mut dems);
            assert_eq!(report.mode, Mode::Planning);
            assert!(report.pose_unavailable);
            assert!(report.cmd_vx_ms.is_none());
            assert_eq!(report.num_consec_solve_failures, 0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(base.num_dispatches().unwrap(), 1);

        let report = ctrl.tick(&mut base, &mut dems);
        assert_eq!(report.mode, Mode::Planning);
        assert!(!report.pose_unavailable);
        assert!(report.cmd_vx_ms.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_repeated_solve_failures_fail_the_loop() {
        let params = Params {
            max_solve_retries: 2,
            ..Default::default()
        };
        let (mut ctrl, calls) = make_loop(params, true);
        let (mut base, mut dems) = make_base([0.0, 0.0, 0.0]);
        ctrl.set_target(Target::new(1.0, 1.0));

        for i in 1..=2 {
            let report = ctrl.tick(&mut base, &mut dems);
            assert_eq!(report.mode, Mode::Planning);
            assert!(report.solve_failed);
            assert_eq!(report.num_consec_solve_failures, i);
            assert!(report.cmd_vx_ms.is_none());
        }
        assert_eq!(base.num_dispatches().unwrap(), 0);

        let report = ctrl.tick(&mut base, &mut dems);
        assert_eq!(report.mode, Mode::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Only the stop command was ever sent
        assert_eq!(base.num_dispatches().unwrap(), 1);
        assert_eq!(base.current_cmd().unwrap(), Control::stop());

        // A new target starts a fresh episode
        ctrl.set_target(Target::new(2.0, 0.0));
        assert_eq!(ctrl.mode(), Mode::Idle);
    }

    #[test]
    fn test_iteration_cap_dispatches_nothing() {
        let mut solver_params = solver_params();
        solver_params.sqp.max_iters = 1;
        let solver = HorizonSolver::new(solver_params).unwrap();
        let params = Params {
            stop_on_exit: false,
            max_solve_retries: 0,
            ..Default::default()
        };
        let mut ctrl = CtrlLoop::new(params, solver).unwrap();
        let (mut base, mut dems) = make_base([0.0, 0.0, 0.0]);
        ctrl.set_target(Target::new(1.0, 1.0));

        let report = ctrl.tick(&mut base, &mut dems);
        assert!(report.solve_failed);
        assert_eq!(report.mode, Mode::Failed);
        assert_eq!(base.num_dispatches().unwrap(), 0);
        assert!(ctrl.last_plan().is_none());
    }

    #[test]
    fn test_actuation_failure_is_not_fatal() {
        let (mut ctrl, _) = make_loop(Params::default(), false);
        let (mut base, mut dems) = make_base([0.0, 0.0, 0.0]);
        ctrl.set_target(Target::new(0.0, 1.0));

        base.inject_dispatch_faults(1).unwrap();
        let report = ctrl.tick(&mut base, &mut dems);
        assert_eq!(report.mode, Mode::Planning);
        assert!(report.actuation_failed);
        assert!(ctrl.last_plan().is_some());
        assert_eq!(base.current_cmd().unwrap(), Control::stop());

        let report = ctrl.tick(&mut base, &mut dems);
        assert!(!report.actuation_failed);
        assert!(base.current_cmd().unwrap().vy_ms > 0.0);
    }

    #[test]
    fn test_closed_loop_converges() {
        let params = Params {
            goal_tolerance_m: 0.02,
            ..Default::default()
        };
        let tick_period_s = params.tick_period_s;
        let (mut ctrl, _) = make_loop(params, false);
        let (mut base, mut dems) = make_base([0.0, 0.0, 0.0]);
        ctrl.set_target(Target::new(1.0, 0.0));

        let mut dists = Vec::new();
        for _ in 0..100 {
            let report = ctrl.tick(&mut base, &mut dems);
            if let Some(d) = report.dist_to_target_m {
                dists.push(d);
            }
            if ctrl.mode().is_terminal() {
                break;
            }
            base.advance(tick_period_s).unwrap();
        }

        assert_eq!(ctrl.mode(), Mode::Converged);

        // Heading straight for the target the distance never grows
        for w in dists.windows(2) {
            assert!(w[1] <= w[0] + 1e-6, "distance grew from {} to {}", w[0], w[1]);
        }

        let pose = base.true_pose().unwrap();
        assert!(pose.y_m.abs() < 1e-3);
        assert_eq!(base.current_cmd().unwrap(), Control::stop());
    }
}
