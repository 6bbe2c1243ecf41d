//! # MPC library.
//!
//! This library contains the receding-horizon controller which drives an
//! omnidirectional base to a target position, along with the interfaces it
//! uses to talk to the base.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Base control interface - the velocity command type and the sink commands are dispatched to
pub mod base_ctrl;

/// Control loop - periodic re-planning until the target is reached
pub mod ctrl_loop;

/// Horizon solver - builds and solves the trajectory optimisation problem
pub mod horizon_solver;

/// Localisation interface - the pose type and the source poses are read from
pub mod loc;

/// Parameters of the executable
pub mod params;

/// Simulated omnidirectional base - stands in for the real base during development and testing
pub mod sim_base;

/// Trajectory model - kinematics and discretisation of the base
pub mod traj_model;
