use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::SessionStore;
use super::types::{
    DiffStats, ExecutionStatus, FileDiff, Resolution, Transcript, WorkspaceSession,
};
use crate::config::{GitConfig, ProjectPaths, SessionConfig};
use crate::error::{LoopError, Result};
use crate::git::GitRunner;
use crate::plan::lock::is_process_running;

/// Owns every workspace session exclusively.
///
/// Callers hold session ids and go through the manager for every operation;
/// session internals are never handed out mutably. `resolve` and
/// reclamation share a per-session mutex, and merges onto the same target
/// branch serialize through a per-target mutex.
pub struct SessionManager {
    repo_path: PathBuf,
    worktrees_dir: PathBuf,
    store: SessionStore,
    git_config: GitConfig,
    session_config: SessionConfig,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    merge_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(paths: &ProjectPaths, git_config: GitConfig, session_config: SessionConfig) -> Self {
        Self {
            repo_path: paths.root.clone(),
            worktrees_dir: paths.worktrees_dir.clone(),
            store: SessionStore::new(&paths.sessions_dir),
            git_config,
            session_config,
            session_locks: Mutex::new(HashMap::new()),
            merge_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn init(&self) -> Result<()> {
        self.store.init().await?;
        if self.session_config.reclaim_enabled {
            let report = self.reclaim().await?;
            if !report.is_empty() {
                info!(
                    orphans = report.orphans.len(),
                    expired = report.expired.len(),
                    "Reclaimed stale sessions on startup"
                );
            }
        }
        Ok(())
    }

    fn git(&self) -> GitRunner {
        GitRunner::new(&self.repo_path)
    }

    fn branch_name(&self, story_id: &str) -> String {
        format!("{}/{}", self.git_config.branch_prefix, story_id)
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn merge_lock(&self, target: &str) -> Arc<Mutex<()>> {
        let mut locks = self.merge_locks.lock().await;
        locks
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Allocate an isolated mutable copy of the repository for one attempt.
    ///
    /// The session branch is per-story (`<prefix>/<story-id>`); if it exists
    /// from an earlier attempt, the new worktree starts from its tip so
    /// committed prior work carries over.
    pub async fn open(&self, story_id: &str, instructions: &str) -> Result<WorkspaceSession> {
        if let Some(existing) = self.store.find_active_for_story(story_id).await? {
            return Err(LoopError::Invariant(format!(
                "story '{}' already has an active session ({})",
                story_id, existing.id
            )));
        }

        // A prior attempt's session may still hold the story branch checked
        // out; retire it first. Its work is checkpointed onto the branch so
        // the new session starts from the resulting revision.
        for prior in self
            .store
            .find_unresolved_terminal_for_story(story_id)
            .await?
        {
            let lock = self.session_lock(&prior.id).await;
            let _guard = lock.lock().await;

            let mut prior = self.store.load(&prior.id).await?;
            if !prior.is_resolved() {
                debug!(session_id = %prior.id, "Retiring previous attempt's session");
                self.discard_inner(&mut prior, true).await?;
            }
        }

        let id = format!("ws-{}", &Uuid::new_v4().to_string()[..8]);
        let branch = self.branch_name(story_id);
        let git = self.git();

        let base_commit = if git.branch_exists(&branch).await? {
            git.rev_parse(&branch).await?
        } else {
            git.rev_parse(&self.git_config.base_branch).await?
        };

        fs::create_dir_all(&self.worktrees_dir).await?;
        let worktree_path = self.worktrees_dir.join(&id);

        git.worktree_add(&worktree_path, &branch, &self.git_config.base_branch)
            .await?;

        let session = WorkspaceSession::new(
            &id,
            story_id,
            &self.git_config.base_branch,
            &base_commit,
            &branch,
            worktree_path.clone(),
            instructions,
        )
        .with_keep_alive(self.session_config.keep_alive);

        self.store.save(&session).await?;

        info!(
            session_id = %session.id,
            story_id = %story_id,
            branch = %branch,
            worktree = %worktree_path.display(),
            "Opened workspace session"
        );

        Ok(session)
    }

    /// Take over the live session for a story after a restart, if its
    /// sandbox is still intact. Returns `None` when there is nothing to
    /// adopt and a fresh session should be opened instead.
    pub async fn adopt_for_story(&self, story_id: &str) -> Result<Option<WorkspaceSession>> {
        let Some(mut session) = self.store.find_active_for_story(story_id).await? else {
            return Ok(None);
        };

        if !session.worktree_path.exists() {
            warn!(
                session_id = %session.id,
                "Adoptable session lost its worktree; retiring it"
            );
            let lock = self.session_lock(&session.id).await;
            let _guard = lock.lock().await;
            session.transition(ExecutionStatus::Killed)?;
            session.resolution = Resolution::Discarded;
            self.store.save(&session).await?;
            return Ok(None);
        }

        session.owner_pid = std::process::id();
        session.touch();
        self.store.save(&session).await?;

        info!(session_id = %session.id, story_id = %story_id, "Adopted existing session");
        Ok(Some(session))
    }

    pub async fn get(&self, session_id: &str) -> Result<WorkspaceSession> {
        self.store.load(session_id).await
    }

    pub async fn list(&self) -> Result<Vec<WorkspaceSession>> {
        self.store.list().await
    }

    /// Live execution status and diff statistics. Non-blocking: a running
    /// session's working changes are inspected in place, uncommitted edits
    /// included.
    pub async fn status(&self, session_id: &str) -> Result<(ExecutionStatus, DiffStats)> {
        let session = self.store.load(session_id).await?;
        let stats = self.diff_stats(&session).await;
        Ok((session.status, stats))
    }

    async fn diff_stats(&self, session: &WorkspaceSession) -> DiffStats {
        if session.is_resolved() || !session.worktree_path.exists() {
            return DiffStats::default();
        }

        let git = GitRunner::new(&session.worktree_path);
        // Untracked files only show in diffs once registered intent-to-add
        if let Err(e) = git.add_all_intent().await {
            debug!(session_id = %session.id, error = %e, "intent-to-add failed");
        }
        match git.diff_numstat(&session.base_commit).await {
            Ok(entries) => DiffStats {
                files_changed: entries.len(),
                added: entries.iter().map(|e| e.added).sum(),
                removed: entries.iter().map(|e| e.removed).sum(),
            },
            Err(e) => {
                debug!(session_id = %session.id, error = %e, "Diff stats unavailable");
                DiffStats::default()
            }
        }
    }

    /// Per-file diffs with unified diff bodies.
    pub async fn diff(&self, session_id: &str) -> Result<Vec<FileDiff>> {
        let session = self.store.load(session_id).await?;

        if session.is_resolved() || !session.worktree_path.exists() {
            return Ok(Vec::new());
        }

        let git = GitRunner::new(&session.worktree_path);
        if let Err(e) = git.add_all_intent().await {
            debug!(session_id = %session.id, error = %e, "intent-to-add failed");
        }
        let entries = git.diff_numstat(&session.base_commit).await?;

        let mut files = Vec::with_capacity(entries.len());
        for entry in entries {
            let unified_diff = git.diff_file(&session.base_commit, &entry.path).await?;
            files.push(FileDiff {
                path: entry.path,
                added: entry.added,
                removed: entry.removed,
                unified_diff,
            });
        }

        Ok(files)
    }

    pub async fn transcript(&self, session_id: &str) -> Result<Transcript> {
        let session = self.store.load(session_id).await?;
        Ok(session.transcript())
    }

    /// Latest transcript recorded for a story across all its sessions, for
    /// carry-over into a resumed attempt.
    pub async fn latest_transcript_for_story(
        &self,
        story_id: &str,
    ) -> Result<Option<Transcript>> {
        Ok(self
            .store
            .find_latest_for_story(story_id)
            .await?
            .map(|s| s.transcript()))
    }

    pub async fn record_summary(&self, session_id: &str, summary: &str) -> Result<()> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.store.load(session_id).await?;
        session.latest_summary = Some(summary.to_string());
        session.touch();
        self.store.save(&session).await
    }

    pub async fn mark_completed(&self, session_id: &str) -> Result<()> {
        self.transition(session_id, ExecutionStatus::Completed).await
    }

    pub async fn mark_failed(&self, session_id: &str) -> Result<()> {
        self.transition(session_id, ExecutionStatus::Failed).await
    }

    /// Operator-triggered kill. Drives the session to `killed`
    /// deterministically; the awaiting controller observes the record.
    pub async fn kill(&self, session_id: &str) -> Result<()> {
        self.transition(session_id, ExecutionStatus::Killed).await
    }

    async fn transition(&self, session_id: &str, to: ExecutionStatus) -> Result<()> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.store.load(session_id).await?;
        session.transition(to)?;
        self.store.save(&session).await?;

        info!(session_id = %session_id, status = %to, "Session status changed");
        Ok(())
    }

    /// Resolve a session: integrate its changes onto the target branch, or
    /// drop them. Terminal either way; a resolved session only accepts a
    /// repeated discard (no-op).
    pub async fn resolve(
        &self,
        session_id: &str,
        strategy: Resolution,
    ) -> Result<ResolveOutcome> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.store.load(session_id).await?;

        match strategy {
            Resolution::Unresolved => Err(LoopError::Invariant(
                "resolve strategy must be merge or discard".into(),
            )),
            Resolution::Discarded => {
                if session.is_resolved() {
                    // Idempotent: discarding an already-resolved session is a no-op
                    return Ok(ResolveOutcome {
                        session_id: session.id.clone(),
                        resolution: session.resolution,
                        merge_commit: None,
                        message: format!("session already {}", session.resolution),
                    });
                }
                if session.status == ExecutionStatus::Running {
                    return Err(LoopError::Invariant(format!(
                        "session {} is still running; kill it before discarding",
                        session.id
                    )));
                }

                self.discard_inner(&mut session, false).await?;
                Ok(ResolveOutcome {
                    session_id: session.id.clone(),
                    resolution: Resolution::Discarded,
                    merge_commit: None,
                    message: "session discarded".into(),
                })
            }
            Resolution::Merged => {
                if session.is_resolved() {
                    return Err(LoopError::AlreadyResolved {
                        session_id: session.id.clone(),
                        resolution: session.resolution.to_string(),
                    });
                }
                if session.status == ExecutionStatus::Running {
                    return Err(LoopError::Invariant(format!(
                        "session {} is still running; cannot merge",
                        session.id
                    )));
                }

                let merge_commit = self.merge_inner(&session).await?;

                session.resolution = Resolution::Merged;
                session.touch();
                self.store.save(&session).await?;

                info!(
                    session_id = %session.id,
                    target = %session.base_branch,
                    merge_commit = %merge_commit,
                    "Session merged"
                );

                Ok(ResolveOutcome {
                    session_id: session.id.clone(),
                    resolution: Resolution::Merged,
                    merge_commit: Some(merge_commit),
                    message: format!("merged onto {}", session.base_branch),
                })
            }
        }
    }

    /// All-or-nothing integration onto the target branch. Serialized per
    /// target; a conflicting merge aborts, leaving the target byte-identical
    /// to its pre-merge state, and reports every conflicting path.
    async fn merge_inner(&self, session: &WorkspaceSession) -> Result<String> {
        let target_lock = self.merge_lock(&session.base_branch).await;
        let _target_guard = target_lock.lock().await;

        // Capture any uncommitted agent work on the session branch first
        let worktree_git = GitRunner::new(&session.worktree_path);
        worktree_git.add_all().await?;
        worktree_git
            .commit(&format!("{}: session {}", session.story_id, session.id))
            .await?;

        let git = self.git();
        git.checkout(&session.base_branch).await?;

        let message = format!(
            "Merge session {} (story {})",
            session.id, session.story_id
        );
        if let Err(merge_err) = git.merge(&session.branch, &message).await {
            let paths = git.conflicted_paths().await.unwrap_or_default();
            git.merge_abort().await?;

            warn!(
                session_id = %session.id,
                target = %session.base_branch,
                conflicts = ?paths,
                "Merge aborted due to conflicts"
            );

            if paths.is_empty() {
                // Not a content conflict; surface the underlying git failure
                return Err(merge_err);
            }
            return Err(LoopError::MergeConflicts {
                target: session.base_branch.clone(),
                paths,
            });
        }

        let merge_commit = git.rev_parse("HEAD").await?;

        // Post-merge cleanup: the sandbox and its branch are spent
        if let Err(e) = git.worktree_remove(&session.worktree_path).await {
            warn!(session_id = %session.id, error = %e, "Worktree cleanup after merge failed");
        }
        if !git.delete_branch(&session.branch).await.unwrap_or(false) {
            debug!(branch = %session.branch, "Branch already gone after merge");
        }

        Ok(merge_commit)
    }

    /// Remove a session's sandbox and mark it discarded.
    ///
    /// With `preserve_work` the sandbox's uncommitted changes are first
    /// checkpointed onto the story branch and the branch survives, so a
    /// later attempt can start from the resulting revision. Without it the
    /// branch is deleted too (explicit "drop the changes entirely").
    async fn discard_inner(
        &self,
        session: &mut WorkspaceSession,
        preserve_work: bool,
    ) -> Result<()> {
        let git = self.git();

        if session.worktree_path.exists() {
            if preserve_work {
                let worktree_git = GitRunner::new(&session.worktree_path);
                let _ = worktree_git.add_all().await;
                if let Ok(true) = worktree_git
                    .commit(&format!("wip: {} session {}", session.story_id, session.id))
                    .await
                {
                    debug!(session_id = %session.id, "Checkpointed uncommitted work");
                }
            }

            if let Err(e) = git.worktree_remove(&session.worktree_path).await {
                warn!(session_id = %session.id, error = %e, "Worktree remove failed, using force remove");
                if let Err(e) = fs::remove_dir_all(&session.worktree_path).await {
                    warn!(session_id = %session.id, error = %e, "Force remove failed");
                }
            }
        }

        if !preserve_work && git.delete_branch(&session.branch).await.unwrap_or(false) {
            debug!(branch = %session.branch, "Deleted session branch");
        }

        session.resolution = Resolution::Discarded;
        session.touch();
        self.store.save(session).await?;

        info!(session_id = %session.id, preserved = preserve_work, "Session discarded");
        Ok(())
    }

    /// Reclaim orphaned and expired sessions.
    ///
    /// Orphan: still `running` but its owning process is dead. Expired: idle
    /// past the configured TTL. Keep-alive sessions are exempt, and the
    /// per-session lock guarantees a session mid-`resolve` is never touched.
    pub async fn reclaim(&self) -> Result<ReclaimReport> {
        let mut report = ReclaimReport::default();
        let ttl = chrono::Duration::seconds(self.session_config.ttl_secs as i64);

        for candidate in self.store.list().await? {
            if candidate.is_resolved() || candidate.keep_alive {
                continue;
            }

            let owner_alive = is_process_running(candidate.owner_pid);
            let orphan = candidate.status == ExecutionStatus::Running && !owner_alive;
            // A live owner keeps a running session safe from TTL expiry
            let expired = candidate.idle_for() > ttl
                && !(candidate.status == ExecutionStatus::Running && owner_alive);

            if !orphan && !expired {
                continue;
            }

            let lock = self.session_lock(&candidate.id).await;
            let _guard = lock.lock().await;

            // Re-check under the lock: resolve may have won the race
            let mut session = match self.store.load(&candidate.id).await {
                Ok(s) => s,
                Err(_) => continue,
            };
            if session.is_resolved() {
                continue;
            }

            if session.status == ExecutionStatus::Running {
                session.transition(ExecutionStatus::Killed)?;
            }
            // Preserve the branch: an interrupted story resumes from it
            self.discard_inner(&mut session, true).await?;

            warn!(
                session_id = %session.id,
                story_id = %session.story_id,
                orphan,
                expired,
                "Reclaimed session"
            );

            if orphan {
                report.orphans.push(session.id.clone());
            } else {
                report.expired.push(session.id.clone());
            }
        }

        Ok(report)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
    pub session_id: String,
    pub resolution: Resolution,
    pub merge_commit: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReclaimReport {
    pub orphans: Vec<String>,
    pub expired: Vec<String>,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty() && self.expired.is_empty()
    }
}
