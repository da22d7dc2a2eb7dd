//! Git operations.
//!
//! Provides the command execution wrapper used by the session manager:
//! - `GitRunner`: git operations (commit, branch, worktree, merge, diff)

mod runner;

pub use runner::{GitRunner, NumstatEntry, parse_numstat};
