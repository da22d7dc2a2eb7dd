use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::signal::KillSwitch;
use crate::agent::{
    AgentOutcome, AttemptContext, CommandAgent, CommandGate, QualityGate, StoryAgent,
};
use crate::config::{LoopConfig, ProjectPaths};
use crate::error::{LoopError, Result};
use crate::gate::{CheckpointGate, FlagGate};
use crate::plan::{ClaimedStory, PlanStore, Story};
use crate::session::{ExecutionStatus, Resolution, SessionManager, WorkspaceSession};

/// Terminal signal of one controller invocation, reported to the external
/// runner so it knows whether to re-invoke, alert a human, or stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopSignal {
    /// Every story has passed.
    HaltedSuccess,
    /// Execution or quality gate failure; the story stays in progress for a
    /// later run (or a human) to pick up.
    HaltedFailure { story_id: String, reason: String },
    /// A checkpoint story completed; awaiting external continuation.
    Paused { story_id: String },
}

impl LoopSignal {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::HaltedSuccess)
    }
}

impl std::fmt::Display for LoopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HaltedSuccess => write!(f, "halted (plan complete)"),
            Self::HaltedFailure { story_id, reason } => {
                write!(f, "halted (story {} failed: {})", story_id, reason)
            }
            Self::Paused { story_id } => write!(f, "paused (checkpoint after {})", story_id),
        }
    }
}

enum StoryVerdict {
    Continue,
    Signal(LoopSignal),
}

enum KillCause {
    /// In-process kill switch (ctrl-c, test harness).
    Switch,
    /// The session record was driven to killed externally (`storyloop kill`).
    External,
}

/// The top-level control loop.
///
/// One active story per plan, fixed order, no reordering and no automatic
/// retries: failure halts the loop with resumable state and leaves the
/// retry decision to whoever invoked it.
pub struct IterationController {
    config: LoopConfig,
    plan_id: String,
    store: PlanStore,
    sessions: Arc<SessionManager>,
    agent: Arc<dyn StoryAgent>,
    quality: Arc<dyn QualityGate>,
    gate: Arc<dyn CheckpointGate>,
    kill: KillSwitch,
}

impl IterationController {
    pub fn new(config: LoopConfig, paths: &ProjectPaths) -> Self {
        let agent = Arc::new(CommandAgent::new(config.agent.clone()));
        let quality = Arc::new(CommandGate::new(config.gate.clone()));
        Self::with_collaborators(config, paths, agent, quality, Arc::new(FlagGate))
    }

    pub fn with_collaborators(
        config: LoopConfig,
        paths: &ProjectPaths,
        agent: Arc<dyn StoryAgent>,
        quality: Arc<dyn QualityGate>,
        gate: Arc<dyn CheckpointGate>,
    ) -> Self {
        let store = PlanStore::new(&paths.plan_path, &paths.locks_dir, &config.controller);
        let sessions = Arc::new(SessionManager::new(
            paths,
            config.git.clone(),
            config.session.clone(),
        ));

        Self {
            config,
            plan_id: paths.plan_id(),
            store,
            sessions,
            agent,
            quality,
            gate,
            kill: KillSwitch::new(),
        }
    }

    /// Handle used to cancel the loop from outside (ctrl-c handler, tests).
    pub fn kill_switch(&self) -> KillSwitch {
        self.kill.clone()
    }

    pub fn session_manager(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    /// Run the loop until the plan completes, a checkpoint pauses it, or a
    /// failure halts it.
    pub async fn run(&self) -> Result<LoopSignal> {
        self.store.init().await?;
        self.sessions.init().await?;

        let reclaimer = self.spawn_periodic_reclaim();
        let result = self.drive_loop().await;
        if let Some(handle) = reclaimer {
            handle.abort();
        }
        result
    }

    /// Background sweep for orphaned and expired sessions while the loop
    /// runs; `SessionManager::init` already did one pass at startup.
    fn spawn_periodic_reclaim(&self) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.session.reclaim_enabled {
            return None;
        }

        let sessions = Arc::clone(&self.sessions);
        let interval = Duration::from_secs(self.config.session.reclaim_interval_secs);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = sessions.reclaim().await {
                    warn!(error = %e, "Periodic reclamation failed");
                }
            }
        }))
    }

    async fn drive_loop(&self) -> Result<LoopSignal> {
        let plan = self.store.load().await?;
        if !plan.started {
            self.store.mark_started().await?;
            info!(plan_id = %self.plan_id, "Plan started");
        }
        let iteration_prompt = plan.iteration_prompt;

        let mut iteration: u32 = 0;
        loop {
            iteration += 1;
            if iteration > self.config.controller.max_iterations {
                return Err(LoopError::MaxIterationsExceeded(
                    self.config.controller.max_iterations,
                ));
            }

            let Some(claimed) = self.store.claim_next_story().await? else {
                info!(plan_id = %self.plan_id, "All stories pass");
                return Ok(LoopSignal::HaltedSuccess);
            };

            match self.run_story(&iteration_prompt, claimed).await? {
                StoryVerdict::Continue => continue,
                StoryVerdict::Signal(signal) => {
                    info!(plan_id = %self.plan_id, signal = %signal, "Loop finished");
                    return Ok(signal);
                }
            }
        }
    }

    /// Drive one execution attempt for a claimed story through
    /// `AwaitingAgent` and `EvaluatingOutcome`.
    async fn run_story(
        &self,
        iteration_prompt: &str,
        claimed: ClaimedStory,
    ) -> Result<StoryVerdict> {
        let story = claimed.story;

        let (session, instructions) = self.acquire_session(iteration_prompt, &story, claimed.resumed).await?;

        let ctx = AttemptContext {
            plan_id: self.plan_id.clone(),
            story: story.clone(),
            session_id: session.id.clone(),
            worktree_path: session.worktree_path.clone(),
            instructions,
        };

        info!(
            story_id = %story.id,
            session_id = %session.id,
            resumed = claimed.resumed,
            "Awaiting agent"
        );

        // The sole suspension point of the loop. The agent future races
        // against the kill watcher so cancellation is observable without
        // unbounded delay.
        let outcome = tokio::select! {
            result = self.agent.execute(&ctx) => Some(result),
            cause = self.watch_for_kill(&session.id) => {
                if matches!(cause, KillCause::Switch) {
                    self.sessions.kill(&session.id).await?;
                }
                None
            }
        };

        let Some(outcome) = outcome else {
            warn!(story_id = %story.id, session_id = %session.id, "Attempt killed");
            return Ok(StoryVerdict::Signal(LoopSignal::HaltedFailure {
                story_id: story.id,
                reason: "killed by operator".into(),
            }));
        };

        match outcome {
            Err(e) => {
                // Infrastructure failure (not an agent-reported one): record
                // it, then surface the error itself
                error!(story_id = %story.id, error = %e, "Agent execution errored");
                self.sessions.mark_failed(&session.id).await?;
                Err(e)
            }
            Ok(AgentOutcome::Failed { reason }) => {
                self.sessions.record_summary(&session.id, &reason).await?;
                self.sessions.mark_failed(&session.id).await?;
                warn!(story_id = %story.id, reason = %reason, "Attempt failed");
                Ok(StoryVerdict::Signal(LoopSignal::HaltedFailure {
                    story_id: story.id,
                    reason,
                }))
            }
            Ok(AgentOutcome::Completed { summary }) => {
                self.sessions.record_summary(&session.id, &summary).await?;
                self.sessions.mark_completed(&session.id).await?;
                self.evaluate_outcome(&story, &session).await
            }
        }
    }

    async fn acquire_session(
        &self,
        iteration_prompt: &str,
        story: &Story,
        resumed: bool,
    ) -> Result<(WorkspaceSession, String)> {
        if resumed {
            if let Some(session) = self.sessions.adopt_for_story(&story.id).await? {
                // Recovery-aware instructions: carry the prior transcript
                // into the resumed attempt
                let mut instructions = session.instructions.clone();
                if let Some(summary) = &session.latest_summary {
                    instructions.push_str("\n\nPrevious attempt summary:\n");
                    instructions.push_str(summary);
                }
                return Ok((session, instructions));
            }
            debug!(story_id = %story.id, "No adoptable session, opening a fresh one");
        }

        let mut instructions = render_instructions(iteration_prompt, story, resumed);
        if resumed {
            // The prior session is gone (retired or reclaimed) but its
            // transcript survives in the records
            if let Some(prior) = self.sessions.latest_transcript_for_story(&story.id).await? {
                if let Some(summary) = prior.latest_summary {
                    instructions.push_str("\n\nPrevious attempt summary:\n");
                    instructions.push_str(&summary);
                }
            }
        }

        let session = self.sessions.open(&story.id, &instructions).await?;
        Ok((session, instructions))
    }

    async fn evaluate_outcome(
        &self,
        story: &Story,
        session: &WorkspaceSession,
    ) -> Result<StoryVerdict> {
        let report = self.quality.check(&session.worktree_path).await?;

        if !report.passed {
            let reason = format!("quality gate failed: {}", report.failures.join("; "));
            warn!(story_id = %story.id, reason = %reason, "Gate rejected attempt");
            // Story stays in progress and the session stays unresolved so
            // the failure can be inspected before retry or discard
            return Ok(StoryVerdict::Signal(LoopSignal::HaltedFailure {
                story_id: story.id.clone(),
                reason,
            }));
        }

        self.sessions
            .resolve(&session.id, Resolution::Merged)
            .await?;
        self.store.complete_story(&story.id, true).await?;

        info!(story_id = %story.id, "Story passed and merged");

        if self.gate.should_pause(story) {
            info!(story_id = %story.id, "Checkpoint reached, pausing");
            return Ok(StoryVerdict::Signal(LoopSignal::Paused {
                story_id: story.id.clone(),
            }));
        }

        Ok(StoryVerdict::Continue)
    }

    /// Resolves when a kill is requested: either the in-process switch, or
    /// the session record driven to `killed` by another process.
    async fn watch_for_kill(&self, session_id: &str) -> KillCause {
        let interval = Duration::from_millis(self.config.controller.kill_poll_interval_ms);

        loop {
            if self.kill.is_triggered() {
                return KillCause::Switch;
            }

            if let Ok(session) = self.sessions.get(session_id).await {
                if session.status == ExecutionStatus::Killed {
                    return KillCause::External;
                }
            }

            tokio::time::sleep(interval).await;
        }
    }
}

fn render_instructions(iteration_prompt: &str, story: &Story, resumed: bool) -> String {
    let mut instructions = format!(
        "{}\n\nStory {}: {}",
        iteration_prompt.trim(),
        story.id,
        story.title
    );
    if resumed {
        instructions.push_str(
            "\n\nThis story was interrupted mid-attempt; inspect the workspace for prior progress before starting over.",
        );
    }
    instructions
}
