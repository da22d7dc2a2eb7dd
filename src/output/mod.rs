//! Structured CLI output.
//!
//! Handles output generation in both human and machine formats:
//! - `OutputWriter`: Text or JSON emission per the `--output` flag
//! - `RunOutput`, `PlanStatusOutput`: Structured result shapes

mod writer;

pub use writer::{OutputWriter, PlanStatusOutput, RunOutput, SessionInfo, StoryInfo};
