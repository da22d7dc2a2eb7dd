use console::{Style, style};
use indicatif::{ProgressBar, ProgressStyle};

use crate::plan::Plan;
use crate::session::{ExecutionStatus, Resolution, WorkspaceSession};

pub struct Display;

impl Display {
    pub fn new() -> Self {
        Self
    }

    pub fn print_header(&self, text: &str) {
        println!();
        println!("{}", style(text).bold().cyan());
        println!("{}", style("═".repeat(60)).dim());
        println!();
    }

    pub fn print_plan_status(&self, plan_id: &str, plan: &Plan) {
        self.print_header(&format!("Plan: {}", plan_id));

        let progress = plan.progress();
        println!(
            "Started:  {}",
            if plan.started { "yes" } else { "no" }
        );
        println!(
            "Progress: {} {}% ({}/{})",
            self.progress_bar(progress.percentage, 30),
            progress.percentage,
            progress.completed,
            progress.total
        );
        println!();

        println!("{}", style("Stories:").bold());
        for story in &plan.stories {
            let marker = if story.passes {
                style("[x]").green()
            } else if story.in_progress {
                style("[>]").yellow().bold()
            } else {
                style("[ ]").dim()
            };
            let checkpoint = if story.checkpoint {
                style(" (checkpoint)").magenta().to_string()
            } else {
                String::new()
            };
            println!("  {} {} - {}{}", marker, story.id, story.title, checkpoint);
        }
        println!();
    }

    pub fn print_sessions_table(&self, sessions: &[WorkspaceSession]) {
        if sessions.is_empty() {
            println!("No sessions found.");
            return;
        }

        println!();
        println!(
            "{:<14} {:<12} {:<12} {:<12} {}",
            "ID", "Story", "Status", "Resolution", "Branch"
        );
        println!("{}", "-".repeat(70));

        for session in sessions {
            println!(
                "{:<14} {:<12} {:<12} {:<12} {}",
                session.id,
                session.story_id,
                self.status_style(session.status)
                    .apply_to(session.status.to_string()),
                self.resolution_style(session.resolution)
                    .apply_to(session.resolution.to_string()),
                style(&session.branch).dim()
            );
        }
    }

    pub fn print_success(&self, message: &str) {
        println!("{} {}", style("✓").green().bold(), message);
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red().bold(), message);
    }

    pub fn print_warning(&self, message: &str) {
        println!("{} {}", style("!").yellow().bold(), message);
    }

    pub fn print_info(&self, message: &str) {
        println!("{} {}", style("→").cyan(), message);
    }

    pub fn create_spinner(&self, message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("static template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(80));
        pb
    }

    fn status_style(&self, status: ExecutionStatus) -> Style {
        match status {
            ExecutionStatus::Running => Style::new().yellow().bold(),
            ExecutionStatus::Completed => Style::new().green(),
            ExecutionStatus::Failed => Style::new().red().bold(),
            ExecutionStatus::Killed => Style::new().red().dim(),
        }
    }

    fn resolution_style(&self, resolution: Resolution) -> Style {
        match resolution {
            Resolution::Unresolved => Style::new().dim(),
            Resolution::Merged => Style::new().green(),
            Resolution::Discarded => Style::new().dim().strikethrough(),
        }
    }

    fn progress_bar(&self, percentage: u8, width: usize) -> String {
        let filled = (width as f64 * percentage as f64 / 100.0) as usize;
        let empty = width - filled;

        format!(
            "{}{}",
            style("█".repeat(filled)).green(),
            style("░".repeat(empty)).dim()
        )
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}
