//! # MPC Executable Parameters
//!
//! This module provides parameters for the MPC executable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MpcExecParams {
    /// Minimum level of log messages, one of `info`, `debug` or `trace`
    pub log_level: String,

    /// Log targets limited to `info`, for example the solver iteration output
    /// in `mpc_lib::horizon_solver::sqp`
    pub quiet_log_targets: Vec<String>,

    /// If true each tick is paced to the tick period in wall clock time,
    /// otherwise ticks run back to back in simulated time
    pub realtime: bool,

    /// Stop after this many ticks even if the loop hasn't finished, zero for
    /// no limit
    pub max_ticks: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for MpcExecParams {
    fn default() -> Self {
        Self {
            log_level: String::from("debug"),
            quiet_log_targets: vec![String::from("mpc_lib::horizon_solver::sqp")],
            realtime: false,
            max_ticks: 1000,
        }
    }
}
