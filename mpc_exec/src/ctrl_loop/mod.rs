//! # Control loop module
//!
//! The control loop drives the base to the target by re-planning every tick.
//! Each tick it reads the pose, checks whether the target has been reached,
//! solves the horizon problem and dispatches the first control of the plan.
//! The rest of the plan is kept only to warm start the next solve.
//!
//! The loop is a state machine:
//!
//! ```text
//! Idle --(target and pose)--> Planning --(within tolerance)--> Converged
//!                                |
//!                                +--(too many failed solves)--> Failed
//! ```
//!
//! Pose and actuation failures never end the episode, the tick is skipped
//! and the next one tries again.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use params::*;
pub use state::*;
