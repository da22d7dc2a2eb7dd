//! Session status query protocol.
//!
//! The surface a running agent uses to introspect its own attempt: status,
//! transcript, per-file diffs, close (merge/discard), and the context query
//! for self-identification. The CLI exposes each call with `--output json`.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::plan::PlanStore;
use crate::session::{FileDiff, Resolution, SessionManager};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: String,
    pub execution_status: String,
    pub files_changed: usize,
    pub added: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTranscript {
    pub session_id: String,
    pub instructions: String,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDiff {
    pub session_id: String,
    pub files: Vec<FileDiff>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseOutcome {
    pub session_id: String,
    pub resolution: String,
    pub merge_commit: Option<String>,
    pub message: String,
}

/// Coordinates of the currently running attempt, so an agent can identify
/// itself without externally supplied ids.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    pub plan_id: String,
    pub story_id: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseStrategy {
    Merge,
    Discard,
}

impl From<CloseStrategy> for Resolution {
    fn from(strategy: CloseStrategy) -> Self {
        match strategy {
            CloseStrategy::Merge => Resolution::Merged,
            CloseStrategy::Discard => Resolution::Discarded,
        }
    }
}

/// Read/resolve facade over the plan store and session manager.
pub struct QueryService<'a> {
    plan_id: String,
    store: &'a PlanStore,
    sessions: &'a SessionManager,
}

impl<'a> QueryService<'a> {
    pub fn new(plan_id: impl Into<String>, store: &'a PlanStore, sessions: &'a SessionManager) -> Self {
        Self {
            plan_id: plan_id.into(),
            store,
            sessions,
        }
    }

    pub async fn get_status(&self, session_id: &str) -> Result<SessionStatus> {
        let (status, stats) = self.sessions.status(session_id).await?;
        Ok(SessionStatus {
            session_id: session_id.to_string(),
            execution_status: status.to_string(),
            files_changed: stats.files_changed,
            added: stats.added,
            removed: stats.removed,
        })
    }

    pub async fn get_transcript(&self, session_id: &str) -> Result<SessionTranscript> {
        let transcript = self.sessions.transcript(session_id).await?;
        Ok(SessionTranscript {
            session_id: session_id.to_string(),
            instructions: transcript.instructions,
            summary: transcript.latest_summary,
        })
    }

    pub async fn get_diff(&self, session_id: &str) -> Result<SessionDiff> {
        let files = self.sessions.diff(session_id).await?;
        Ok(SessionDiff {
            session_id: session_id.to_string(),
            files,
        })
    }

    pub async fn close_session(
        &self,
        session_id: &str,
        strategy: CloseStrategy,
    ) -> Result<CloseOutcome> {
        let outcome = self.sessions.resolve(session_id, strategy.into()).await?;
        Ok(CloseOutcome {
            session_id: outcome.session_id,
            resolution: outcome.resolution.to_string(),
            merge_commit: outcome.merge_commit,
            message: outcome.message,
        })
    }

    pub async fn get_context(&self) -> Result<RunContext> {
        let plan = self.store.load().await?;
        let story_id = plan.in_progress_story().map(|s| s.id.clone());

        let session_id = match &story_id {
            Some(id) => self
                .sessions
                .list()
                .await?
                .into_iter()
                .find(|s| &s.story_id == id && !s.is_resolved())
                .map(|s| s.id),
            None => None,
        };

        Ok(RunContext {
            plan_id: self.plan_id.clone(),
            story_id,
            session_id,
        })
    }
}
