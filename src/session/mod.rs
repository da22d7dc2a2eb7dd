//! Workspace session lifecycle.
//!
//! One session is one isolated, disposable execution sandbox bound to a base
//! revision of the repository:
//! - `WorkspaceSession`: Session record with execution and resolution state
//! - `SessionStore`: Durable per-session record persistence
//! - `SessionManager`: Open/inspect/resolve/reclaim operations

mod manager;
mod store;
mod types;

pub use manager::{ReclaimReport, ResolveOutcome, SessionManager};
pub use store::SessionStore;
pub use types::{
    DiffStats, ExecutionStatus, FileDiff, Resolution, Transcript, WorkspaceSession,
};
