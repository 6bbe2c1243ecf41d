//! Parameters structure for the simulated base

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Number of base units in one meter. The base reports its position and
    /// accepts speeds in these units.
    pub units_per_m: f64,

    /// Pose of the base when the simulation starts, `[x, y, heading]`.
    ///
    /// Units: meters, meters, radians
    pub initial_pose: [f64; 3],

    /// Longest step used when integrating the base motion.
    ///
    /// Units: seconds
    pub max_step_s: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            units_per_m: 1000.0,
            initial_pose: [0.0, 0.0, 0.0],
            max_step_s: 0.05,
        }
    }
}
