use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use super::types::WorkspaceSession;
use crate::error::{LoopError, Result};

/// Durable per-session records under `.storyloop/sessions/`.
///
/// One YAML file per session so records survive process death and a
/// restarted controller can adopt or reclaim what it finds.
pub struct SessionStore {
    sessions_dir: PathBuf,
}

impl SessionStore {
    pub fn new(sessions_dir: &Path) -> Self {
        Self {
            sessions_dir: sessions_dir.to_path_buf(),
        }
    }

    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.sessions_dir).await?;
        self.recover_interrupted_writes().await;
        Ok(())
    }

    pub async fn save(&self, session: &WorkspaceSession) -> Result<()> {
        let path = self.session_path(&session.id);
        let content = serde_yaml_bw::to_string(session)?;
        self.write_atomic(&path, &content).await
    }

    pub async fn load(&self, session_id: &str) -> Result<WorkspaceSession> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Err(LoopError::SessionNotFound(session_id.to_string()));
        }
        let content = fs::read_to_string(&path).await?;
        let session: WorkspaceSession = serde_yaml_bw::from_str(&content)?;
        Ok(session)
    }

    pub async fn list(&self) -> Result<Vec<WorkspaceSession>> {
        let mut sessions = Vec::new();

        if !self.sessions_dir.exists() {
            return Ok(sessions);
        }

        let mut entries = fs::read_dir(&self.sessions_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "yaml") {
                if let Ok(content) = fs::read_to_string(&path).await {
                    if let Ok(session) = serde_yaml_bw::from_str::<WorkspaceSession>(&content) {
                        sessions.push(session);
                    }
                }
            }
        }

        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    /// The live (running, unresolved) session for a story, if any.
    pub async fn find_active_for_story(
        &self,
        story_id: &str,
    ) -> Result<Option<WorkspaceSession>> {
        let sessions = self.list().await?;
        Ok(sessions
            .into_iter()
            .find(|s| s.story_id == story_id && !s.status.is_terminal() && !s.is_resolved()))
    }

    /// Unresolved sessions for a story whose attempt already ended; these
    /// hold the story branch hostage until retired.
    pub async fn find_unresolved_terminal_for_story(
        &self,
        story_id: &str,
    ) -> Result<Vec<WorkspaceSession>> {
        let sessions = self.list().await?;
        Ok(sessions
            .into_iter()
            .filter(|s| s.story_id == story_id && s.status.is_terminal() && !s.is_resolved())
            .collect())
    }

    /// Most recent session for a story regardless of state, for transcript
    /// carry-over into a resumed attempt.
    pub async fn find_latest_for_story(
        &self,
        story_id: &str,
    ) -> Result<Option<WorkspaceSession>> {
        let sessions = self.list().await?;
        Ok(sessions.into_iter().find(|s| s.story_id == story_id))
    }

    pub async fn delete(&self, session_id: &str) -> Result<()> {
        let path = self.session_path(session_id);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        let tmp_path = path.with_extension("yaml.tmp");

        fs::write(&tmp_path, content).await?;

        let tmp_path_clone = tmp_path.clone();
        let sync_result = tokio::task::spawn_blocking(move || {
            std::fs::File::open(&tmp_path_clone).and_then(|file| file.sync_all())
        })
        .await;

        match sync_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to sync session record to disk"),
            Err(e) => tracing::warn!(error = %e, "Failed to sync session record to disk"),
        }

        fs::rename(&tmp_path, path).await?;

        debug!(path = %path.display(), "Session record written");
        Ok(())
    }

    async fn recover_interrupted_writes(&self) {
        if let Ok(mut entries) = fs::read_dir(&self.sessions_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "tmp") {
                    debug!(path = %path.display(), "Removing interrupted session write");
                    let _ = fs::remove_file(&path).await;
                }
            }
        }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.yaml", session_id))
    }
}
