//! Scripted collaborator doubles for controller tests: agents that write
//! predictable files into the session worktree, and quality gates with
//! fixed verdicts.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use storyloop::agent::{AgentOutcome, AttemptContext, GateReport, QualityGate, StoryAgent};
use storyloop::error::Result;

/// Writes `<story-id>.txt` into the worktree and reports success.
pub struct ScriptedAgent {
    pub summary: String,
}

impl ScriptedAgent {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
        }
    }
}

#[async_trait]
impl StoryAgent for ScriptedAgent {
    async fn execute(&self, ctx: &AttemptContext) -> Result<AgentOutcome> {
        let file = ctx.worktree_path.join(format!("{}.txt", ctx.story.id));
        std::fs::write(&file, format!("work for {}\n", ctx.story.id))?;
        Ok(AgentOutcome::Completed {
            summary: self.summary.clone(),
        })
    }
}

/// Always reports failure without touching the worktree.
pub struct FailingAgent {
    pub reason: String,
}

impl FailingAgent {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl StoryAgent for FailingAgent {
    async fn execute(&self, _ctx: &AttemptContext) -> Result<AgentOutcome> {
        Ok(AgentOutcome::Failed {
            reason: self.reason.clone(),
        })
    }
}

/// Never finishes; used to exercise the kill path.
pub struct BlockingAgent;

#[async_trait]
impl StoryAgent for BlockingAgent {
    async fn execute(&self, _ctx: &AttemptContext) -> Result<AgentOutcome> {
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }
}

/// Records the instructions it was given, then succeeds. Lets tests assert
/// on resume-awareness of the rendered prompt.
pub struct RecordingAgent {
    pub seen_instructions: Mutex<Vec<String>>,
}

impl RecordingAgent {
    pub fn new() -> Self {
        Self {
            seen_instructions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl StoryAgent for RecordingAgent {
    async fn execute(&self, ctx: &AttemptContext) -> Result<AgentOutcome> {
        self.seen_instructions
            .lock()
            .unwrap()
            .push(ctx.instructions.clone());
        let file = ctx.worktree_path.join(format!("{}.txt", ctx.story.id));
        std::fs::write(&file, "recorded\n")?;
        Ok(AgentOutcome::Completed {
            summary: format!("finished {}", ctx.story.id),
        })
    }
}

pub struct PassGate;

#[async_trait]
impl QualityGate for PassGate {
    async fn check(&self, _worktree: &Path) -> Result<GateReport> {
        Ok(GateReport::pass())
    }
}

pub struct FailGate;

#[async_trait]
impl QualityGate for FailGate {
    async fn check(&self, _worktree: &Path) -> Result<GateReport> {
        Ok(GateReport {
            passed: false,
            failures: vec!["tests failed: 1 assertion".into()],
        })
    }
}
