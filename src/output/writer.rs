use std::io::{self, Write};

use serde::Serialize;

use crate::cli::OutputFormat;
use crate::controller::LoopSignal;
use crate::plan::Plan;
use crate::session::WorkspaceSession;

/// Output writer that handles the different output formats.
///
/// Two modes:
/// - Text: Human-readable formatted output (default)
/// - Json: Single JSON object per emission, for agent/runner consumption
pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn emit_result(&self, result: &RunOutput) {
        match self.format {
            OutputFormat::Text => self.print_text_result(result),
            OutputFormat::Json => self.write_json(result),
        }
    }

    pub fn emit_json<T: Serialize>(&self, value: &T) {
        self.write_json(value);
    }

    pub fn emit_message(&self, message: &str) {
        match self.format {
            OutputFormat::Text => println!("{}", message),
            OutputFormat::Json => self.write_json(&MessageOutput {
                message: message.to_string(),
            }),
        }
    }

    fn write_json<T: Serialize>(&self, value: &T) {
        if let Ok(json) = serde_json::to_string(value) {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{}", json);
            let _ = stdout.flush();
        }
    }

    fn print_text_result(&self, result: &RunOutput) {
        println!();
        println!("Loop finished: {}", result.signal);
        if let Some(story_id) = &result.story_id {
            println!("Story: {}", story_id);
        }
        if let Some(reason) = &result.reason {
            println!("Reason: {}", reason);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub signal: String,
    pub success: bool,
    pub story_id: Option<String>,
    pub reason: Option<String>,
}

impl From<&LoopSignal> for RunOutput {
    fn from(signal: &LoopSignal) -> Self {
        match signal {
            LoopSignal::HaltedSuccess => Self {
                signal: "halted_success".into(),
                success: true,
                story_id: None,
                reason: None,
            },
            LoopSignal::HaltedFailure { story_id, reason } => Self {
                signal: "halted_failure".into(),
                success: false,
                story_id: Some(story_id.clone()),
                reason: Some(reason.clone()),
            },
            LoopSignal::Paused { story_id } => Self {
                signal: "paused".into(),
                success: true,
                story_id: Some(story_id.clone()),
                reason: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatusOutput {
    pub plan_id: String,
    pub started: bool,
    pub completed: usize,
    pub total: usize,
    pub stories: Vec<StoryInfo>,
}

impl PlanStatusOutput {
    pub fn from_plan(plan_id: &str, plan: &Plan) -> Self {
        let progress = plan.progress();
        Self {
            plan_id: plan_id.to_string(),
            started: plan.started,
            completed: progress.completed,
            total: progress.total,
            stories: plan
                .stories
                .iter()
                .map(|s| StoryInfo {
                    id: s.id.clone(),
                    title: s.title.clone(),
                    passes: s.passes,
                    in_progress: s.in_progress,
                    checkpoint: s.checkpoint,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryInfo {
    pub id: String,
    pub title: String,
    pub passes: bool,
    pub in_progress: bool,
    pub checkpoint: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub story_id: String,
    pub status: String,
    pub resolution: String,
    pub branch: String,
}

impl From<&WorkspaceSession> for SessionInfo {
    fn from(session: &WorkspaceSession) -> Self {
        Self {
            id: session.id.clone(),
            story_id: session.story_id.clone(),
            status: session.status.to_string(),
            resolution: session.resolution.to_string(),
            branch: session.branch.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct MessageOutput {
    message: String,
}
