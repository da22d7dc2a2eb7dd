//! Test project fixtures backed by real temporary git repositories.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use storyloop::config::{LoopConfig, ProjectPaths};
use storyloop::plan::{Plan, PlanStore};
use storyloop::session::SessionManager;

pub struct TestProject {
    // Held for its Drop; the repo lives inside
    _temp: TempDir,
    pub root: PathBuf,
}

impl TestProject {
    /// A fresh git repository on branch `main` with one initial commit.
    pub fn new() -> Self {
        let temp = TempDir::new().expect("create temp dir");
        let root = temp.path().to_path_buf();

        run_git(&root, &["init", "--initial-branch", "main"]);
        run_git(&root, &["config", "user.email", "tests@example.com"]);
        run_git(&root, &["config", "user.name", "Test User"]);
        std::fs::write(root.join("README.md"), "# fixture\n").expect("write README");
        run_git(&root, &["add", "-A"]);
        run_git(&root, &["commit", "-m", "initial commit"]);

        Self { _temp: temp, root }
    }

    pub fn paths(&self) -> ProjectPaths {
        ProjectPaths::new(self.root.clone())
    }

    /// Create the `.storyloop` layout and persist the given plan.
    pub async fn init_with_plan(&self, config: &LoopConfig, plan: &Plan) -> ProjectPaths {
        let paths = self.paths();
        paths.ensure_dirs().await.expect("ensure dirs");
        config.save(&paths.loop_dir).await.expect("save config");

        let store = self.plan_store(config);
        store.init().await.expect("init store");
        store.create(plan).await.expect("create plan");

        paths
    }

    pub fn plan_store(&self, config: &LoopConfig) -> PlanStore {
        let paths = self.paths();
        PlanStore::new(&paths.plan_path, &paths.locks_dir, &config.controller)
    }

    pub fn session_manager(&self, config: &LoopConfig) -> SessionManager {
        SessionManager::new(&self.paths(), config.git.clone(), config.session.clone())
    }

    /// Commit a file on the currently checked-out branch of the root repo.
    pub fn commit_file(&self, rel_path: &str, content: &str, message: &str) {
        let path = self.root.join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&path, content).expect("write file");
        run_git(&self.root, &["add", "-A"]);
        run_git(&self.root, &["commit", "-m", message]);
    }

    pub fn head_commit(&self, branch: &str) -> String {
        run_git_stdout(&self.root, &["rev-parse", branch])
    }

    /// File content at a branch tip, via `git show`.
    pub fn file_at(&self, branch: &str, rel_path: &str) -> Option<String> {
        let output = Command::new("git")
            .args(["show", &format!("{}:{}", branch, rel_path)])
            .current_dir(&self.root)
            .output()
            .expect("run git show");
        if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            None
        }
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        Command::new("git")
            .args(["rev-parse", "--verify", &format!("refs/heads/{}", branch)])
            .current_dir(&self.root)
            .output()
            .expect("run git rev-parse")
            .status
            .success()
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn run_git_stdout(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}
