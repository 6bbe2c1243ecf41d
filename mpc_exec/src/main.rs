//! Main MPC executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise the session, logger and parameters
//!     - Initialise the horizon solver, control loop and simulated base
//!     - Main loop:
//!         - Control loop tick (pose read, re-plan, command dispatch)
//!         - Simulated base advanced by one tick period
//!         - Cycle management
//!     - Exit once the control loop reaches a terminal mode
//!
//! # Usage
//!
//! ```text
//! mpc_exec [TARGET_X_M TARGET_Y_M]
//! ```
//!
//! If no target is given the one in `ctrl_loop.toml` is used.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{debug, error, info, warn};
use std::env;
use std::thread;
use std::time::{Duration, Instant};

// Internal
use mpc_lib::{
    ctrl_loop::{self, CtrlLoop, Mode},
    horizon_solver::{self, HorizonSolver},
    loc::Target,
    params::MpcExecParams,
    sim_base::{self, SimBase},
};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("mpc_exec", "sessions").wrap_err("Failed to create the session")?;

    let exec_params: MpcExecParams =
        util::params::load("mpc_exec.toml").wrap_err("Could not load exec params")?;

    let log_level: LevelFilter = exec_params
        .log_level
        .parse()
        .wrap_err("Invalid log level in exec params")?;

    // Initialise logger
    logger_init(log_level, &exec_params.quiet_log_targets, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("MPC Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let solver_params: horizon_solver::Params =
        util::params::load("horizon_solver.toml").wrap_err("Could not load solver params")?;
    let ctrl_params: ctrl_loop::Params =
        util::params::load("ctrl_loop.toml").wrap_err("Could not load control loop params")?;
    let sim_params: sim_base::Params =
        util::params::load("sim_base.toml").wrap_err("Could not load sim base params")?;

    info!("Parameters loaded");

    // ---- TARGET ----

    // Collect all arguments
    let args: Vec<String> = env::args().collect();

    debug!("CLI arguments: {:?}", args);

    let target = match args.len() {
        1 => Target::from(ctrl_params.target_m),
        3 => Target::new(
            args[1].parse().wrap_err("Could not parse the target X position")?,
            args[2].parse().wrap_err("Could not parse the target Y position")?,
        ),
        _ => {
            return Err(eyre!(
                "Expected either zero or two arguments (target X and Y in meters), found {}",
                args.len() - 1
            ))
        }
    };

    // ---- INITIALISE MODULES ----

    let tick_period_s = ctrl_params.tick_period_s;

    let solver = HorizonSolver::new(solver_params).wrap_err("Failed to initialise HorizonSolver")?;
    info!("HorizonSolver init complete");

    let mut ctrl_loop =
        CtrlLoop::new(ctrl_params, solver).wrap_err("Failed to initialise CtrlLoop")?;
    ctrl_loop
        .init_archives(&session)
        .wrap_err("Failed to initialise CtrlLoop archives")?;
    info!("CtrlLoop init complete");

    // One handle reads the pose, the other takes the demands
    let mut base = SimBase::new(&sim_params);
    let mut base_dems = base.clone();
    info!("SimBase init complete");

    ctrl_loop.set_target(target);

    info!("Module initialisation complete\n");

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let cycle_period = Duration::from_secs_f64(tick_period_s);
    let mut num_cycles: u64 = 0;
    let mut num_consec_cycle_overruns: u64 = 0;

    loop {
        // Get cycle start time
        let cycle_start_instant = Instant::now();

        // ---- CONTROL ----

        let report = ctrl_loop.tick(&mut base, &mut base_dems);
        debug!("{:?}", report);

        if ctrl_loop.mode().is_terminal() {
            info!("Control loop finished in {:?} mode", ctrl_loop.mode());
            break;
        }

        // ---- SIMULATION ----

        base.advance(tick_period_s)
            .wrap_err("Failed to advance the simulated base")?;

        // Increment cycle counter
        num_cycles += 1;

        if exec_params.max_ticks > 0 && num_cycles >= exec_params.max_ticks {
            warn!("Tick limit of {} reached, stopping", exec_params.max_ticks);
            break;
        }

        // ---- CYCLE MANAGEMENT ----

        if !exec_params.realtime {
            continue;
        }

        let cycle_dur = Instant::now() - cycle_start_instant;

        // Get sleep duration
        match cycle_period.checked_sub(cycle_dur) {
            Some(d) => {
                num_consec_cycle_overruns = 0;
                thread::sleep(d);
            }
            None => {
                num_consec_cycle_overruns += 1;
                warn!(
                    "Cycle overran by {:.06} s ({} in a row)",
                    cycle_dur.as_secs_f64() - cycle_period.as_secs_f64(),
                    num_consec_cycle_overruns
                );
            }
        }
    }

    // ---- SHUTDOWN ----

    let final_mode = ctrl_loop.mode();
    match base.true_pose() {
        Ok(p) => info!(
            "Final pose: ({:.4}, {:.4}) m, heading {:.4} rad",
            p.x_m, p.y_m, p.heading_rad
        ),
        Err(e) => warn!("Could not read the final pose: {}", e),
    }

    if let Some(plan) = ctrl_loop.last_plan() {
        session.save("final_plan.json", plan.clone());
    }

    if final_mode == Mode::Failed {
        error!("The control loop failed to reach the target");
    }

    info!("End of execution");

    session.exit();

    match final_mode {
        Mode::Failed => Err(eyre!("The control loop failed to reach the target")),
        _ => Ok(()),
    }
}
