use clap::{Parser, Subcommand, ValueEnum};

use crate::protocol::CloseStrategy;

#[derive(Parser)]
#[command(name = "storyloop")]
#[command(author, version, about = "Durable story-by-story plan execution loop", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Output format for CLI results.
/// - Text: Human-readable text output (default)
/// - Json: Single JSON object per emission, for agent/runner consumption
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize storyloop in the current repository
    Init,

    /// Run the iteration loop until the plan completes, pauses, or halts
    Run,

    /// Show plan status (stories and their flags)
    Status,

    /// List workspace sessions
    Sessions,

    /// Show execution status and diff stats for one session
    Session {
        /// Session ID
        session_id: String,
    },

    /// Show a session's transcript (instructions + latest summary)
    Transcript {
        /// Session ID
        session_id: String,
    },

    /// Show a session's per-file diff
    Diff {
        /// Session ID
        session_id: String,
    },

    /// Close a session by merging its changes or discarding them
    Close {
        /// Session ID
        session_id: String,

        /// Resolution strategy
        #[arg(long, value_enum)]
        strategy: StrategyArg,
    },

    /// Drive a running session to killed (the awaiting loop observes it)
    Kill {
        /// Session ID
        session_id: String,
    },

    /// Print the coordinates of the current attempt (plan, story, session)
    Context,

    /// Reclaim orphaned and expired sessions now
    Reclaim,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Reset to defaults
    Reset,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    Merge,
    Discard,
}

impl From<StrategyArg> for CloseStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Merge => Self::Merge,
            StrategyArg::Discard => Self::Discard,
        }
    }
}
