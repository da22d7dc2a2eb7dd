use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use super::lock::PlanLock;
use super::types::{ClaimedStory, Plan};
use crate::config::ControllerConfig;
use crate::error::{LoopError, Result};

/// Durable, exclusive-access store for the plan document.
///
/// Callers never mutate plan fields directly; every mutation goes through
/// `atomic_update`, which holds the plan lock for the whole
/// read-modify-write cycle and persists before returning.
pub struct PlanStore {
    plan_path: PathBuf,
    lock: PlanLock,
}

impl PlanStore {
    pub fn new(plan_path: &Path, locks_dir: &Path, config: &ControllerConfig) -> Self {
        Self {
            plan_path: plan_path.to_path_buf(),
            lock: PlanLock::new(locks_dir, config),
        }
    }

    pub async fn init(&self) -> Result<()> {
        if let Some(parent) = self.plan_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        self.recover_interrupted_writes().await;
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.plan_path.exists()
    }

    pub async fn load(&self) -> Result<Plan> {
        if !self.plan_path.exists() {
            return Err(LoopError::PlanNotFound(self.plan_path.clone()));
        }
        let content = fs::read_to_string(&self.plan_path).await?;
        let plan: Plan = serde_json::from_str(&content)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Write a brand-new plan document. Fails if one already exists.
    pub async fn create(&self, plan: &Plan) -> Result<()> {
        if self.plan_path.exists() {
            return Err(LoopError::PlanAlreadyExists(self.plan_path.clone()));
        }
        plan.validate()?;
        let _guard = self.lock.acquire().await?;
        self.save(plan).await
    }

    /// Exclusive read-modify-write. The closure's mutation is validated and
    /// persisted (fsync + atomic rename) before this returns, so a crash
    /// immediately afterwards observes the post-state on reload.
    pub async fn atomic_update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Plan) -> Result<T>,
    {
        let _guard = self.lock.acquire().await?;
        let mut plan = self.load().await?;
        let value = f(&mut plan)?;
        plan.validate()?;
        self.save(&plan).await?;
        Ok(value)
    }

    pub async fn mark_started(&self) -> Result<()> {
        self.atomic_update(|plan| {
            plan.started = true;
            Ok(())
        })
        .await
    }

    /// Claim the next story to execute.
    ///
    /// Returns the story already in progress if one exists (recovery path,
    /// idempotent: the flag is not re-set), else the first story in order
    /// that has not passed, with `in_progress` set before returning.
    /// `None` means every story has passed.
    pub async fn claim_next_story(&self) -> Result<Option<ClaimedStory>> {
        self.atomic_update(|plan| {
            if let Some(story) = plan.in_progress_story() {
                debug!(story_id = %story.id, "Resuming interrupted story");
                return Ok(Some(ClaimedStory {
                    story: story.clone(),
                    resumed: true,
                }));
            }

            let Some(story_id) = plan.next_unfinished().map(|s| s.id.clone()) else {
                return Ok(None);
            };

            let story = plan
                .story_mut(&story_id)
                .ok_or_else(|| LoopError::StoryNotFound(story_id.clone()))?;
            story.in_progress = true;
            info!(story_id = %story.id, "Claimed story");

            Ok(Some(ClaimedStory {
                story: story.clone(),
                resumed: false,
            }))
        })
        .await
    }

    /// Conclude the current attempt for `story_id`: record the outcome and
    /// clear the in-progress flag.
    pub async fn complete_story(&self, story_id: &str, passes: bool) -> Result<()> {
        let story_id = story_id.to_string();
        self.atomic_update(move |plan| {
            let story = plan
                .story_mut(&story_id)
                .ok_or_else(|| LoopError::StoryNotFound(story_id.clone()))?;

            if !story.in_progress {
                return Err(LoopError::Invariant(format!(
                    "story '{}' is not in progress",
                    story_id
                )));
            }

            story.passes = passes;
            story.in_progress = false;
            info!(story_id = %story_id, passes, "Story attempt concluded");
            Ok(())
        })
        .await
    }

    async fn save(&self, plan: &Plan) -> Result<()> {
        let content = serde_json::to_string_pretty(plan)?;
        self.write_atomic(&content).await
    }

    async fn write_atomic(&self, content: &str) -> Result<()> {
        let tmp_path = self.plan_path.with_extension("json.tmp");

        // 1. Write to temp file
        fs::write(&tmp_path, content).await?;

        // 2. Sync to disk using spawn_blocking to avoid blocking async runtime
        let tmp_path_clone = tmp_path.clone();
        let sync_result = tokio::task::spawn_blocking(move || {
            std::fs::File::open(&tmp_path_clone).and_then(|file| file.sync_all())
        })
        .await;

        match sync_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to sync temp plan file to disk"),
            Err(e) => warn!(error = %e, "Failed to sync temp plan file to disk"),
        }

        // 3. Atomic rename (POSIX guarantees atomicity)
        fs::rename(&tmp_path, &self.plan_path).await?;

        debug!(path = %self.plan_path.display(), "Atomic plan write completed");
        Ok(())
    }

    async fn recover_interrupted_writes(&self) {
        let tmp_path = self.plan_path.with_extension("json.tmp");
        if tmp_path.exists() {
            debug!(path = %tmp_path.display(), "Removing interrupted plan write");
            let _ = fs::remove_file(&tmp_path).await;
        }
    }
}
