//! # Simulated base
//!
//! A kinematic simulation of the omnidirectional base. Like the real base it
//! reports its state and accepts speeds in base units (millimetres by
//! default), which are converted to and from meters at the interface.
//!
//! The simulation only moves when it is advanced, so the caller decides how
//! time passes. The base holds the last commanded speed until the next
//! command arrives.
//!
//! `SimBase` is a cheap handle onto shared state, clone it to use one handle
//! as the `PoseSource` and another as the `ActuationSink`.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::{Arc, Mutex, MutexGuard};

use log::trace;
use serde::Serialize;

pub use params::*;

use crate::base_ctrl::{ActuationSink, ActuationUnavailable, Control};
use crate::loc::{Pose, PoseSource, PoseUnavailable};
use crate::traj_model::rk4_step;
use util::maths::wrap_pi;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The state of the base as reported by the base itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BaseState {
    /// Units: base units
    pub x: f64,

    /// Units: base units
    pub y: f64,

    /// Units: radians
    pub heading_rad: f64,
}

/// Handle onto a simulated base.
#[derive(Debug, Clone)]
pub struct SimBase {
    units_per_m: f64,
    max_step_s: f64,
    state: Arc<Mutex<SimState>>,
}

#[derive(Debug, Default)]
struct SimState {
    /// True pose of the base
    pose: Pose,

    /// Speed the base is currently driving at
    cmd: Control,

    /// Number of upcoming reads or dispatches which will fail
    read_faults: u32,
    dispatch_faults: u32,

    num_reads: u64,
    num_dispatches: u64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SimBaseError {
    #[error("The simulation state mutex is poisoned")]
    Poisoned,

    #[error("Injected fault")]
    InjectedFault,

    #[error("Commanded speed is not finite")]
    NonFiniteSpeed,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimBase {
    pub fn new(params: &Params) -> Self {
        let [x_m, y_m, heading_rad] = params.initial_pose;

        Self {
            units_per_m: params.units_per_m,
            max_step_s: params.max_step_s,
            state: Arc::new(Mutex::new(SimState {
                pose: Pose::new(x_m, y_m, heading_rad),
                ..Default::default()
            })),
        }
    }

    /// Read the state of the base in base units.
    pub fn get_base_state(&self) -> Result<BaseState, SimBaseError> {
        let mut state = self.lock()?;
        state.num_reads += 1;

        if state.read_faults > 0 {
            state.read_faults -= 1;
            return Err(SimBaseError::InjectedFault);
        }

        Ok(BaseState {
            x: state.pose.x_m * self.units_per_m,
            y: state.pose.y_m * self.units_per_m,
            heading_rad: wrap_pi(state.pose.heading_rad),
        })
    }

    /// Set the speed of the base in base units per second (advance, side)
    /// and radians per second (rotation).
    pub fn set_speed_base(&self, adv: f64, side: f64, rot: f64) -> Result<(), SimBaseError> {
        let mut state = self.lock()?;
        state.num_dispatches += 1;

        if state.dispatch_faults > 0 {
            state.dispatch_faults -= 1;
            return Err(SimBaseError::InjectedFault);
        }

        let cmd = Control::new(adv / self.units_per_m, side / self.units_per_m, rot);
        if !cmd.is_finite() {
            return Err(SimBaseError::NonFiniteSpeed);
        }
        state.cmd = cmd;

        Ok(())
    }

    /// Move the simulation forward in time, driving at the current speed.
    pub fn advance(&self, dt_s: f64) -> Result<(), SimBaseError> {
        if !(dt_s > 0.0) {
            return Ok(());
        }

        let mut state = self.lock()?;

        let num_steps = (dt_s / self.max_step_s).ceil().max(1.0) as usize;
        let step_s = dt_s / num_steps as f64;
        let u = state.cmd.to_vector();

        let mut x = state.pose.to_vector();
        for _ in 0..num_steps {
            x = rk4_step(&x, &u, step_s);
        }
        state.pose = Pose::from(x);

        trace!("Sim base advanced {:.3} s to {:?}", dt_s, state.pose);

        Ok(())
    }

    /// The true pose of the base in meters, without fault injection.
    pub fn true_pose(&self) -> Result<Pose, SimBaseError> {
        Ok(self.lock()?.pose)
    }

    /// The speed the base is currently driving at.
    pub fn current_cmd(&self) -> Result<Control, SimBaseError> {
        Ok(self.lock()?.cmd)
    }

    /// Make the next `n` reads fail.
    pub fn inject_read_faults(&self, n: u32) -> Result<(), SimBaseError> {
        self.lock()?.read_faults = n;
        Ok(())
    }

    /// Make the next `n` dispatches fail.
    pub fn inject_dispatch_faults(&self, n: u32) -> Result<(), SimBaseError> {
        self.lock()?.dispatch_faults = n;
        Ok(())
    }

    /// Number of reads attempted, including failed ones.
    pub fn num_reads(&self) -> Result<u64, SimBaseError> {
        Ok(self.lock()?.num_reads)
    }

    /// Number of dispatches attempted, including failed ones.
    pub fn num_dispatches(&self) -> Result<u64, SimBaseError> {
        Ok(self.lock()?.num_dispatches)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimState>, SimBaseError> {
        self.state.lock().map_err(|_| SimBaseError::Poisoned)
    }
}

impl PoseSource for SimBase {
    fn read(&mut self) -> Result<Pose, PoseUnavailable> {
        let base = self
            .get_base_state()
            .map_err(|e| PoseUnavailable(e.to_string()))?;

        Ok(Pose::new(
            base.x / self.units_per_m,
            base.y / self.units_per_m,
            base.heading_rad,
        ))
    }
}

impl ActuationSink for SimBase {
    fn dispatch(&mut self, cmd: Control) -> Result<(), ActuationUnavailable> {
        self.set_speed_base(
            cmd.vx_ms * self.units_per_m,
            cmd.vy_ms * self.units_per_m,
            cmd.omega_rads,
        )
        .map_err(|e| ActuationUnavailable(e.to_string()))
    }
}
