use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoopError {
    #[error("Plan not found at {}", .0.display())]
    PlanNotFound(PathBuf),

    #[error("Plan already exists at {}", .0.display())]
    PlanAlreadyExists(PathBuf),

    #[error("Story not found: {0}")]
    StoryNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Workspace allocation failed: {0}")]
    ResourceExhausted(String),

    #[error("Merge conflicts on '{target}': {}", paths.join(", "))]
    MergeConflicts { target: String, paths: Vec<String> },

    #[error("Session {session_id} already resolved ({resolution})")]
    AlreadyResolved {
        session_id: String,
        resolution: String,
    },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Worktree error: {message}")]
    Worktree { message: String, path: PathBuf },

    #[error("Plan is locked by another process (PID: {pid})")]
    PlanLocked { pid: u32 },

    #[error("Failed to acquire plan lock at {}", .0.display())]
    LockAcquisitionFailed(PathBuf),

    #[error("Maximum controller iterations exceeded ({0})")]
    MaxIterationsExceeded(u32),

    #[error("Agent execution failed: {0}")]
    AgentExecution(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not in a git repository")]
    NotInGitRepo,

    #[error("Project not initialized. Run 'storyloop init' first.")]
    NotInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, LoopError>;
