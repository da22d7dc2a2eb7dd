use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LoopError, Result};

/// Execution state of the attempt running inside a session.
///
/// `Running` is the only non-terminal state. Terminal states are final: a
/// session is never resumed once terminal — retries open a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Killed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Killed => "killed",
        };
        write!(f, "{}", s)
    }
}

/// How a session ended: its changes were merged onto the target, or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    #[default]
    Unresolved,
    Merged,
    Discarded,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unresolved => "unresolved",
            Self::Merged => "merged",
            Self::Discarded => "discarded",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSession {
    pub id: String,
    pub story_id: String,

    /// Branch the session merges onto when resolved with `Merged`.
    pub base_branch: String,
    /// Commit the worktree started from; diffs are computed against this.
    pub base_commit: String,
    pub branch: String,
    pub worktree_path: PathBuf,

    #[serde(default)]
    pub status: ExecutionStatus,

    #[serde(default)]
    pub resolution: Resolution,

    pub instructions: String,

    #[serde(default)]
    pub latest_summary: Option<String>,

    /// Pid of the process that opened (or adopted) the session; used for
    /// orphan detection during reclamation.
    pub owner_pid: u32,

    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,

    /// Opt-out of orphan/expired reclamation.
    #[serde(default)]
    pub keep_alive: bool,
}

impl WorkspaceSession {
    pub fn new(
        id: impl Into<String>,
        story_id: impl Into<String>,
        base_branch: impl Into<String>,
        base_commit: impl Into<String>,
        branch: impl Into<String>,
        worktree_path: PathBuf,
        instructions: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            story_id: story_id.into(),
            base_branch: base_branch.into(),
            base_commit: base_commit.into(),
            branch: branch.into(),
            worktree_path,
            status: ExecutionStatus::Running,
            resolution: Resolution::Unresolved,
            instructions: instructions.into(),
            latest_summary: None,
            owner_pid: std::process::id(),
            created_at: now,
            last_activity_at: now,
            keep_alive: false,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution != Resolution::Unresolved
    }

    /// Apply a `running -> terminal` transition.
    pub fn transition(&mut self, to: ExecutionStatus) -> Result<()> {
        if self.status != ExecutionStatus::Running {
            return Err(LoopError::Invariant(format!(
                "session {} is already terminal ({}), cannot transition to {}",
                self.id, self.status, to
            )));
        }
        if to == ExecutionStatus::Running {
            return Err(LoopError::Invariant(format!(
                "session {} cannot transition back to running",
                self.id
            )));
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    pub fn transcript(&self) -> Transcript {
        Transcript {
            instructions: self.instructions.clone(),
            latest_summary: self.latest_summary.clone(),
        }
    }

    pub fn idle_for(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.last_activity_at)
    }
}

/// Accumulated output log of a session: the initial instruction plus the
/// latest agent summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub instructions: String,
    pub latest_summary: Option<String>,
}

/// Aggregate diff statistics for a session's working changes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiffStats {
    pub files_changed: usize,
    pub added: usize,
    pub removed: usize,
}

/// A single file's diff information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDiff {
    pub path: String,
    pub added: usize,
    pub removed: usize,
    pub unified_diff: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> WorkspaceSession {
        WorkspaceSession::new(
            "ws-test0001",
            "US-001",
            "main",
            "deadbeef",
            "loop/US-001",
            PathBuf::from("/tmp/wt"),
            "do the thing",
        )
    }

    #[test]
    fn test_running_to_terminal_transitions() {
        for to in [
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Killed,
        ] {
            let mut s = session();
            assert!(s.transition(to).is_ok());
            assert_eq!(s.status, to);
        }
    }

    #[test]
    fn test_terminal_is_final() {
        let mut s = session();
        s.transition(ExecutionStatus::Completed).unwrap();
        assert!(s.transition(ExecutionStatus::Failed).is_err());
        assert!(s.transition(ExecutionStatus::Killed).is_err());
    }

    #[test]
    fn test_cannot_transition_to_running() {
        let mut s = session();
        assert!(s.transition(ExecutionStatus::Running).is_err());
    }

    #[test]
    fn test_transcript_fields() {
        let mut s = session();
        s.latest_summary = Some("implemented login".to_string());

        let t = s.transcript();
        assert_eq!(t.instructions, "do the thing");
        assert_eq!(t.latest_summary.as_deref(), Some("implemented login"));
    }
}
