//! External collaborator boundary.
//!
//! The coding agent and the quality gate are out of scope for this crate;
//! they are consumed through the traits here. The subprocess-backed
//! adapters make the binary runnable end-to-end: the agent is any command
//! that works inside the session worktree, the gate is any command list
//! whose exit codes become the pass/fail signal.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, GateConfig};
use crate::error::{LoopError, Result};
use crate::plan::Story;

/// Everything an agent needs to run one attempt inside a session.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub plan_id: String,
    pub story: Story,
    pub session_id: String,
    pub worktree_path: PathBuf,
    pub instructions: String,
}

/// Outcome of one execution attempt, as reported by the agent itself.
/// Quality gating happens afterwards and separately.
#[derive(Debug, Clone)]
pub enum AgentOutcome {
    Completed { summary: String },
    Failed { reason: String },
}

#[async_trait]
pub trait StoryAgent: Send + Sync {
    async fn execute(&self, ctx: &AttemptContext) -> Result<AgentOutcome>;
}

/// Pass/fail signal from the build/lint/test pipeline.
#[derive(Debug, Clone, Default)]
pub struct GateReport {
    pub passed: bool,
    pub failures: Vec<String>,
}

impl GateReport {
    pub fn pass() -> Self {
        Self {
            passed: true,
            failures: Vec::new(),
        }
    }
}

#[async_trait]
pub trait QualityGate: Send + Sync {
    async fn check(&self, worktree: &Path) -> Result<GateReport>;
}

/// Subprocess adapter for the coding agent. Spawns the configured command
/// in the session worktree with the session context in the environment.
pub struct CommandAgent {
    config: AgentConfig,
}

impl CommandAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StoryAgent for CommandAgent {
    async fn execute(&self, ctx: &AttemptContext) -> Result<AgentOutcome> {
        let Some((program, args)) = self.config.command.split_first() else {
            return Err(LoopError::AgentExecution(
                "no agent command configured (set [agent].command in config.toml)".into(),
            ));
        };

        info!(
            session_id = %ctx.session_id,
            story_id = %ctx.story.id,
            program = %program,
            "Launching agent"
        );

        let run = Command::new(program)
            .args(args)
            .current_dir(&ctx.worktree_path)
            .env("STORYLOOP_PLAN_ID", &ctx.plan_id)
            .env("STORYLOOP_STORY_ID", &ctx.story.id)
            .env("STORYLOOP_SESSION_ID", &ctx.session_id)
            .env("STORYLOOP_INSTRUCTIONS", &ctx.instructions)
            .output();

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = match tokio::time::timeout(timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(session_id = %ctx.session_id, "Agent timed out");
                return Ok(AgentOutcome::Failed {
                    reason: format!("agent timed out after {}s", self.config.timeout_secs),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() {
            Ok(AgentOutcome::Completed {
                summary: tail_lines(&stdout, 20),
            })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Ok(AgentOutcome::Failed {
                reason: if stderr.trim().is_empty() {
                    format!("agent exited with {}", output.status)
                } else {
                    tail_lines(&stderr, 20)
                },
            })
        }
    }
}

/// Subprocess adapter for the quality gate: each configured shell command
/// must exit zero. An empty command list passes vacuously.
pub struct CommandGate {
    config: GateConfig,
}

impl CommandGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    fn shell_command(command: &str) -> Command {
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        }

        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        }
    }
}

#[async_trait]
impl QualityGate for CommandGate {
    async fn check(&self, worktree: &Path) -> Result<GateReport> {
        let mut failures = Vec::new();
        let timeout = Duration::from_secs(self.config.timeout_secs);

        for command in &self.config.commands {
            debug!(command = %command, dir = %worktree.display(), "Running gate command");

            let run = Self::shell_command(command).current_dir(worktree).output();
            match tokio::time::timeout(timeout, run).await {
                Ok(Ok(output)) if output.status.success() => {}
                Ok(Ok(output)) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    failures.push(format!(
                        "'{}' exited with {}: {}",
                        command,
                        output.status,
                        tail_lines(&stderr, 5)
                    ));
                }
                Ok(Err(e)) => {
                    failures.push(format!("'{}' failed to start: {}", command, e));
                }
                Err(_) => {
                    failures.push(format!(
                        "'{}' timed out after {}s",
                        command, self.config.timeout_secs
                    ));
                }
            }
        }

        Ok(GateReport {
            passed: failures.is_empty(),
            failures,
        })
    }
}

fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n").trim().to_string()
}
