//! Exclusive plan lock for atomic read-modify-write cycles.
//!
//! A lock file created with `O_EXCL` provides the single-writer discipline
//! for the plan document. Lock holders record their pid and hostname so a
//! crashed holder's lock can be detected and broken.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::{LoopError, Result};

fn get_hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "localhost".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub hostname: String,
}

impl Default for LockInfo {
    fn default() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now(),
            hostname: get_hostname(),
        }
    }
}

impl LockInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_process_alive(&self) -> bool {
        if self.hostname != get_hostname() {
            return false;
        }
        is_process_running(self.pid)
    }

    pub fn is_stale(&self, threshold: Duration) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.acquired_at);
        // Handle clock skew: if elapsed is negative, treat as potentially stale
        // (better to allow recovery than to block indefinitely)
        elapsed.to_std().map(|d| d > threshold).unwrap_or(true)
    }
}

#[cfg(unix)]
pub(crate) fn is_process_running(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(windows)]
pub(crate) fn is_process_running(pid: u32) -> bool {
    use std::process::Command;
    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH"])
        .output()
        .map(|o| {
            let out = String::from_utf8_lossy(&o.stdout);
            o.status.success() && !out.contains("INFO:") && out.contains(&pid.to_string())
        })
        .unwrap_or(false)
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn is_process_running(_pid: u32) -> bool {
    false
}

pub struct PlanLock {
    lock_path: PathBuf,
    stale_threshold: Duration,
    retry_attempts: u32,
    retry_delay_ms: u64,
}

impl PlanLock {
    pub fn new(locks_dir: &Path, config: &ControllerConfig) -> Self {
        Self {
            lock_path: locks_dir.join("plan.lock"),
            stale_threshold: Duration::from_secs(config.lock_stale_threshold_secs),
            retry_attempts: config.lock_retry_attempts,
            retry_delay_ms: config.lock_retry_delay_ms,
        }
    }

    pub async fn acquire(&self) -> Result<PlanLockGuard> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        for attempt in 0..self.retry_attempts {
            match self.try_acquire().await {
                Ok(guard) => return Ok(guard),
                Err(LoopError::PlanLocked { .. }) if attempt < self.retry_attempts - 1 => {
                    tokio::time::sleep(Duration::from_millis(
                        self.retry_delay_ms * (attempt as u64 + 1),
                    ))
                    .await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(LoopError::LockAcquisitionFailed(self.lock_path.clone()))
    }

    async fn try_acquire(&self) -> Result<PlanLockGuard> {
        let info = LockInfo::new();
        let content = serde_json::to_string(&info)?;

        // O_EXCL create is the atomic claim; rename-based schemes can
        // silently replace a live holder's lock.
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(content.as_bytes()).await?;
                file.sync_all().await?;
                debug!(pid = info.pid, path = %self.lock_path.display(), "Plan lock acquired");
                Ok(PlanLockGuard {
                    path: self.lock_path.clone(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = self.read_holder().await?;
                match existing {
                    Some(holder)
                        if holder.is_process_alive() && !holder.is_stale(self.stale_threshold) =>
                    {
                        Err(LoopError::PlanLocked { pid: holder.pid })
                    }
                    Some(holder) => {
                        info!(old_pid = holder.pid, "Removing stale plan lock");
                        let _ = fs::remove_file(&self.lock_path).await;
                        Err(LoopError::PlanLocked { pid: holder.pid })
                    }
                    None => {
                        // Unreadable lock file: may be a holder mid-write, so
                        // only break it once its mtime is past the threshold
                        if self.lock_file_older_than(self.stale_threshold).await {
                            warn!(path = %self.lock_path.display(), "Removing unreadable plan lock");
                            let _ = fs::remove_file(&self.lock_path).await;
                        }
                        Err(LoopError::PlanLocked { pid: 0 })
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn lock_file_older_than(&self, threshold: Duration) -> bool {
        match fs::metadata(&self.lock_path).await {
            Ok(meta) => meta
                .modified()
                .ok()
                .and_then(|t| t.elapsed().ok())
                .map(|age| age > threshold)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn read_holder(&self) -> Result<Option<LockInfo>> {
        match fs::read_to_string(&self.lock_path).await {
            Ok(content) => Ok(serde_json::from_str(&content).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct PlanLockGuard {
    path: PathBuf,
}

impl Drop for PlanLockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound && !std::thread::panicking() {
                warn!(path = %self.path.display(), error = %e, "Failed to release plan lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        let info = LockInfo::new();
        assert!(info.is_process_alive());
    }

    #[test]
    fn test_fresh_lock_is_not_stale() {
        let info = LockInfo::new();
        assert!(!info.is_stale(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PlanLock::new(dir.path(), &ControllerConfig::default());

        let guard = lock.acquire().await.unwrap();
        assert!(dir.path().join("plan.lock").exists());

        drop(guard);
        assert!(!dir.path().join("plan.lock").exists());
    }

    #[tokio::test]
    async fn test_second_acquire_blocks_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let config = ControllerConfig {
            lock_retry_attempts: 2,
            lock_retry_delay_ms: 10,
            ..Default::default()
        };
        let lock = PlanLock::new(dir.path(), &config);

        let _guard = lock.acquire().await.unwrap();
        let second = PlanLock::new(dir.path(), &config);
        assert!(second.acquire().await.is_err());
    }
}
