use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{LoopError, Result};

pub struct GitRunner {
    working_dir: PathBuf,
}

impl GitRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(args = ?args, dir = %self.working_dir.display(), "Running git command");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(args = ?args, stderr = %stderr, "Git command failed");
        }

        Ok(output)
    }

    pub async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LoopError::Git(git2::Error::from_str(&stderr)));
        }

        Ok(output)
    }

    pub async fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"]).await?;
        Ok(())
    }

    /// Register untracked files with intent-to-add so they appear in
    /// `git diff` output without staging their content.
    pub async fn add_all_intent(&self) -> Result<()> {
        self.run_checked(&["add", "-A", "--intent-to-add"]).await?;
        Ok(())
    }

    pub async fn commit(&self, message: &str) -> Result<bool> {
        let output = self.run(&["commit", "-m", message]).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            if stderr.contains("nothing to commit") || stdout.contains("nothing to commit") {
                return Ok(false);
            }
            return Err(LoopError::Git(git2::Error::from_str(&stderr)));
        }

        Ok(true)
    }

    pub async fn checkout(&self, branch: &str) -> Result<()> {
        self.run_checked(&["checkout", branch]).await?;
        Ok(())
    }

    pub async fn rev_parse(&self, refspec: &str) -> Result<String> {
        let output = self.run_checked(&["rev-parse", refspec]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Attempt a no-fast-forward merge. Returns Err without touching the
    /// working tree state beyond what `merge_abort` undoes; callers decide
    /// whether a failure means conflicts (see `conflicted_paths`).
    pub async fn merge(&self, branch: &str, message: &str) -> Result<()> {
        self.run_checked(&["merge", "--no-ff", branch, "-m", message])
            .await?;
        Ok(())
    }

    /// Paths left in conflicted (unmerged) state after a failed merge.
    pub async fn conflicted_paths(&self) -> Result<Vec<String>> {
        let output = self
            .run(&["diff", "--name-only", "--diff-filter=U"])
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Abort an in-progress merge, restoring the pre-merge tree.
    pub async fn merge_abort(&self) -> Result<()> {
        let output = self.run(&["merge", "--abort"]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(stderr = %stderr, "git merge --abort failed");
        }
        Ok(())
    }

    /// Per-file added/removed line counts against `base`, including
    /// uncommitted working-tree changes.
    pub async fn diff_numstat(&self, base: &str) -> Result<Vec<NumstatEntry>> {
        let output = self.run_checked(&["diff", "--numstat", base]).await?;
        Ok(parse_numstat(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Unified diff for a single file against `base`.
    pub async fn diff_file(&self, base: &str, path: &str) -> Result<String> {
        let output = self.run(&["diff", base, "--", path]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub async fn branch_exists(&self, branch: &str) -> Result<bool> {
        let output = self
            .run(&["rev-parse", "--verify", &format!("refs/heads/{}", branch)])
            .await?;
        Ok(output.status.success())
    }

    pub async fn delete_branch(&self, branch: &str) -> Result<bool> {
        let output = self.run(&["branch", "-D", branch]).await?;
        Ok(output.status.success())
    }

    pub async fn worktree_add(&self, path: &Path, branch: &str, base: &str) -> Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| LoopError::Worktree {
                message: "Invalid path encoding".into(),
                path: path.to_path_buf(),
            })?;

        let output = if self.branch_exists(branch).await? {
            self.run(&["worktree", "add", path_str, branch]).await?
        } else {
            self.run(&["worktree", "add", "-b", branch, path_str, base])
                .await?
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if is_disk_exhaustion(&stderr) {
                return Err(LoopError::ResourceExhausted(stderr));
            }
            return Err(LoopError::Worktree {
                message: stderr,
                path: path.to_path_buf(),
            });
        }

        Ok(())
    }

    pub async fn worktree_remove(&self, path: &Path) -> Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| LoopError::Worktree {
                message: "Invalid path encoding".into(),
                path: path.to_path_buf(),
            })?;

        let output = self
            .run(&["worktree", "remove", "--force", path_str])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LoopError::Worktree {
                message: stderr.to_string(),
                path: path.to_path_buf(),
            });
        }

        Ok(())
    }
}

fn is_disk_exhaustion(stderr: &str) -> bool {
    stderr.contains("No space left on device")
        || stderr.contains("Disk quota exceeded")
        || stderr.contains("Too many open files")
}

/// One line of `git diff --numstat` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumstatEntry {
    pub path: String,
    pub added: usize,
    pub removed: usize,
}

/// Parse `git diff --numstat` output. Binary files report `-` for both
/// counts and are kept with zero lines so they still count as changed.
pub fn parse_numstat(stdout: &str) -> Vec<NumstatEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let added = parts.next()?.trim();
            let removed = parts.next()?.trim();
            let path = parts.next()?.trim();
            if path.is_empty() {
                return None;
            }
            Some(NumstatEntry {
                path: path.to_string(),
                added: added.parse().unwrap_or(0),
                removed: removed.parse().unwrap_or(0),
            })
        })
        .collect()
}
