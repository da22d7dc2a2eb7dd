pub mod agent;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod gate;
pub mod git;
pub mod output;
pub mod plan;
pub mod protocol;
pub mod session;

pub use agent::{AgentOutcome, AttemptContext, GateReport, QualityGate, StoryAgent};
pub use config::{LoopConfig, ProjectPaths};
pub use controller::{IterationController, KillSwitch, LoopSignal};
pub use error::{LoopError, Result};
pub use gate::{CheckpointGate, FlagGate};
pub use plan::{ClaimedStory, Plan, PlanStore, Story};
pub use protocol::{CloseStrategy, QueryService};
pub use session::{
    ExecutionStatus, Resolution, SessionManager, Transcript, WorkspaceSession,
};
