//! Configuration types and loading.
//!
//! Provides all configuration structures for storyloop:
//! - `LoopConfig`: Top-level configuration with validation
//! - Domain configs: controller, session, git, agent, gate
//! - `ProjectPaths`: Canonical on-disk layout under `.storyloop/`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{LoopError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub controller: ControllerConfig,
    pub session: SessionConfig,
    pub git: GitConfig,
    pub agent: AgentConfig,
    pub gate: GateConfig,
}

impl LoopConfig {
    pub async fn load(loop_dir: &Path) -> Result<Self> {
        let config_path = loop_dir.join("config.toml");
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, loop_dir: &Path) -> Result<()> {
        self.validate()?;
        let config_path = loop_dir.join("config.toml");
        let content =
            toml::to_string_pretty(self).map_err(|e| LoopError::Config(e.to_string()))?;
        fs::write(&config_path, content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency and safety.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.controller.max_iterations == 0 {
            errors.push("controller.max_iterations must be greater than 0");
        }
        if self.controller.kill_poll_interval_ms == 0 {
            errors.push("controller.kill_poll_interval_ms must be greater than 0");
        }

        if self.session.ttl_secs == 0 {
            errors.push("session.ttl_secs must be greater than 0");
        }
        if self.session.reclaim_enabled && self.session.reclaim_interval_secs == 0 {
            errors.push("session.reclaim_interval_secs must be greater than 0");
        }

        if self.git.base_branch.is_empty() {
            errors.push("git.base_branch must not be empty");
        }
        if self.git.branch_prefix.is_empty() {
            errors.push("git.branch_prefix must not be empty");
        }
        if self.git.branch_prefix.contains('/') {
            errors.push("git.branch_prefix must not contain '/'");
        }

        if self.agent.timeout_secs == 0 {
            errors.push("agent.timeout_secs must be greater than 0");
        }
        if self.gate.timeout_secs == 0 {
            errors.push("gate.timeout_secs must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LoopError::Config(errors.join("; ")))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Upper bound on loop iterations per invocation (safety net, not a scheduler).
    pub max_iterations: u32,
    /// How often the awaiting controller checks for a kill request.
    pub kill_poll_interval_ms: u64,
    /// Plan lock staleness threshold before a dead holder's lock is broken.
    pub lock_stale_threshold_secs: u64,
    pub lock_retry_attempts: u32,
    pub lock_retry_delay_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            kill_poll_interval_ms: 200,
            lock_stale_threshold_secs: 60,
            lock_retry_attempts: 10,
            lock_retry_delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which an unresolved session becomes eligible for reclamation.
    pub ttl_secs: u64,
    /// Master switch for orphan/expired reclamation.
    pub reclaim_enabled: bool,
    /// How often the running controller sweeps for orphans and expired sessions.
    pub reclaim_interval_secs: u64,
    /// Default keep-alive for newly opened sessions (opt-out of reclamation).
    pub keep_alive: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 86_400,
            reclaim_enabled: true,
            reclaim_interval_secs: 3_600,
            keep_alive: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Target branch sessions are opened from and merged onto.
    pub base_branch: String,
    /// Prefix for per-story session branches, e.g. `loop/US-001`.
    pub branch_prefix: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            branch_prefix: "loop".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent command invoked once per story attempt, argv style.
    /// The session context is passed through STORYLOOP_* environment variables.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Quality gate shell commands, all of which must exit zero.
    /// Empty means the gate passes vacuously.
    pub commands: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            timeout_secs: 1_800,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub loop_dir: PathBuf,
    pub plan_path: PathBuf,
    pub sessions_dir: PathBuf,
    pub worktrees_dir: PathBuf,
    pub locks_dir: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: PathBuf) -> Self {
        let loop_dir = root.join(".storyloop");

        Self {
            plan_path: loop_dir.join("plan.json"),
            sessions_dir: loop_dir.join("sessions"),
            worktrees_dir: loop_dir.join("worktrees"),
            locks_dir: loop_dir.join("locks"),
            root,
            loop_dir,
        }
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        let dirs = [
            &self.loop_dir,
            &self.sessions_dir,
            &self.worktrees_dir,
            &self.locks_dir,
        ];

        for dir in dirs {
            fs::create_dir_all(dir).await?;
        }

        Ok(())
    }

    /// Plan identity for the context query: the plan file's stem.
    pub fn plan_id(&self) -> String {
        self.plan_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plan".to_string())
    }
}
