//! Iteration controller.
//!
//! The top-level control loop: selects the next story, opens a workspace
//! session, drives one execution attempt, interprets its outcome, updates
//! the plan store, and decides whether to continue or halt.

mod engine;
mod signal;

pub use engine::{IterationController, LoopSignal};
pub use signal::KillSwitch;
