use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use storyloop::cli::{Cli, Commands, ConfigAction, Display, OutputFormat};
use storyloop::config::{LoopConfig, ProjectPaths};
use storyloop::controller::{IterationController, LoopSignal};
use storyloop::error::{LoopError, Result};
use storyloop::output::{OutputWriter, PlanStatusOutput, RunOutput, SessionInfo};
use storyloop::plan::{Plan, PlanStore};
use storyloop::protocol::QueryService;
use storyloop::session::SessionManager;

/// Context for command output handling.
struct OutputContext<'a> {
    display: &'a Display,
    writer: &'a OutputWriter,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            Display::new().print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("storyloop=debug")
    } else {
        EnvFilter::new("storyloop=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let display = Display::new();
    let writer = OutputWriter::new(cli.output);
    let out = OutputContext {
        display: &display,
        writer: &writer,
    };

    match cli.command {
        Commands::Init => cmd_init(&out).await?,
        Commands::Run => return cmd_run(&out).await,
        Commands::Status => cmd_status(&out).await?,
        Commands::Sessions => cmd_sessions(&out).await?,
        Commands::Session { session_id } => cmd_session(&out, &session_id).await?,
        Commands::Transcript { session_id } => cmd_transcript(&out, &session_id).await?,
        Commands::Diff { session_id } => cmd_diff(&out, &session_id).await?,
        Commands::Close {
            session_id,
            strategy,
        } => cmd_close(&out, &session_id, strategy.into()).await?,
        Commands::Kill { session_id } => cmd_kill(&out, &session_id).await?,
        Commands::Context => cmd_context(&out).await?,
        Commands::Reclaim => cmd_reclaim(&out).await?,
        Commands::Config { action } => cmd_config(&out, action).await?,
    }

    Ok(ExitCode::SUCCESS)
}

fn find_project_root() -> Result<PathBuf> {
    let current = std::env::current_dir()?;

    let mut path = current.as_path();
    loop {
        if path.join(".git").exists() {
            return Ok(path.to_path_buf());
        }
        path = path.parent().ok_or(LoopError::NotInGitRepo)?;
    }
}

fn ensure_initialized(paths: &ProjectPaths) -> Result<()> {
    if !paths.loop_dir.exists() {
        return Err(LoopError::NotInitialized);
    }
    Ok(())
}

async fn load_env() -> Result<(LoopConfig, ProjectPaths)> {
    let root = find_project_root()?;
    let paths = ProjectPaths::new(root);
    ensure_initialized(&paths)?;
    let config = LoopConfig::load(&paths.loop_dir).await?;
    Ok((config, paths))
}

fn build_stores(config: &LoopConfig, paths: &ProjectPaths) -> (PlanStore, SessionManager) {
    let store = PlanStore::new(&paths.plan_path, &paths.locks_dir, &config.controller);
    let sessions = SessionManager::new(paths, config.git.clone(), config.session.clone());
    (store, sessions)
}

async fn cmd_init(out: &OutputContext<'_>) -> Result<()> {
    let root = find_project_root()?;
    let paths = ProjectPaths::new(root);
    let config = LoopConfig::default();

    if paths.loop_dir.exists() {
        if out.writer.format() == OutputFormat::Text {
            out.display
                .print_warning("storyloop is already initialized in this repository.");
        }
        return Ok(());
    }

    paths.ensure_dirs().await?;
    config.save(&paths.loop_dir).await?;

    if !paths.plan_path.exists() {
        let (store, _) = build_stores(&config, &paths);
        store
            .create(&Plan::new("Implement the next story from the plan."))
            .await?;
    }

    if out.writer.format() == OutputFormat::Text {
        out.display.print_success("Initialized storyloop.");
        out.display.print_info(&format!(
            "Configuration: {}",
            paths.loop_dir.join("config.toml").display()
        ));
        out.display
            .print_info(&format!("Plan: {}", paths.plan_path.display()));
    } else {
        out.writer.emit_message("Initialized storyloop");
    }

    Ok(())
}

async fn cmd_run(out: &OutputContext<'_>) -> Result<ExitCode> {
    let (config, paths) = load_env().await?;
    let controller = IterationController::new(config, &paths);

    // Ctrl-c drives the kill switch; the awaiting loop observes it and
    // marks the session killed before halting
    let kill = controller.kill_switch();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            kill.trigger();
        }
    });

    let spinner = if out.writer.format() == OutputFormat::Text {
        Some(out.display.create_spinner("Running iteration loop..."))
    } else {
        None
    };

    let signal = controller.run().await;

    if let Some(s) = spinner {
        s.finish_and_clear();
    }

    let signal = signal?;
    out.writer.emit_result(&RunOutput::from(&signal));

    // Distinct exit codes so an external runner can tell the three terminal
    // signals apart without parsing output
    Ok(match signal {
        LoopSignal::HaltedSuccess => ExitCode::SUCCESS,
        LoopSignal::HaltedFailure { .. } => ExitCode::from(2),
        LoopSignal::Paused { .. } => ExitCode::from(3),
    })
}

async fn cmd_status(out: &OutputContext<'_>) -> Result<()> {
    let (config, paths) = load_env().await?;
    let (store, _) = build_stores(&config, &paths);
    let plan = store.load().await?;

    match out.writer.format() {
        OutputFormat::Text => out.display.print_plan_status(&paths.plan_id(), &plan),
        OutputFormat::Json => out
            .writer
            .emit_json(&PlanStatusOutput::from_plan(&paths.plan_id(), &plan)),
    }

    Ok(())
}

async fn cmd_sessions(out: &OutputContext<'_>) -> Result<()> {
    let (config, paths) = load_env().await?;
    let (_, sessions) = build_stores(&config, &paths);
    let list = sessions.list().await?;

    match out.writer.format() {
        OutputFormat::Text => {
            out.display.print_header("Workspace Sessions");
            out.display.print_sessions_table(&list);
        }
        OutputFormat::Json => {
            let infos: Vec<SessionInfo> = list.iter().map(SessionInfo::from).collect();
            out.writer.emit_json(&infos);
        }
    }

    Ok(())
}

async fn cmd_session(out: &OutputContext<'_>, session_id: &str) -> Result<()> {
    let (config, paths) = load_env().await?;
    let (store, sessions) = build_stores(&config, &paths);
    let query = QueryService::new(paths.plan_id(), &store, &sessions);

    let status = query.get_status(session_id).await?;
    match out.writer.format() {
        OutputFormat::Text => {
            out.display.print_info(&format!(
                "{}: {} ({} files, +{} -{})",
                status.session_id,
                status.execution_status,
                status.files_changed,
                status.added,
                status.removed
            ));
        }
        OutputFormat::Json => out.writer.emit_json(&status),
    }

    Ok(())
}

async fn cmd_transcript(out: &OutputContext<'_>, session_id: &str) -> Result<()> {
    let (config, paths) = load_env().await?;
    let (store, sessions) = build_stores(&config, &paths);
    let query = QueryService::new(paths.plan_id(), &store, &sessions);

    let transcript = query.get_transcript(session_id).await?;
    match out.writer.format() {
        OutputFormat::Text => {
            out.display.print_header(&format!("Session {}", session_id));
            println!("{}", transcript.instructions);
            if let Some(summary) = &transcript.summary {
                println!();
                println!("{}", "-".repeat(40));
                println!("{}", summary);
            }
        }
        OutputFormat::Json => out.writer.emit_json(&transcript),
    }

    Ok(())
}

async fn cmd_diff(out: &OutputContext<'_>, session_id: &str) -> Result<()> {
    let (config, paths) = load_env().await?;
    let (store, sessions) = build_stores(&config, &paths);
    let query = QueryService::new(paths.plan_id(), &store, &sessions);

    let diff = query.get_diff(session_id).await?;
    match out.writer.format() {
        OutputFormat::Text => {
            for file in &diff.files {
                out.display.print_info(&format!(
                    "{} (+{} -{})",
                    file.path, file.added, file.removed
                ));
                println!("{}", file.unified_diff);
            }
            if diff.files.is_empty() {
                out.display.print_info("No changes.");
            }
        }
        OutputFormat::Json => out.writer.emit_json(&diff),
    }

    Ok(())
}

async fn cmd_close(
    out: &OutputContext<'_>,
    session_id: &str,
    strategy: storyloop::protocol::CloseStrategy,
) -> Result<()> {
    let (config, paths) = load_env().await?;
    let (store, sessions) = build_stores(&config, &paths);
    let query = QueryService::new(paths.plan_id(), &store, &sessions);

    let outcome = query.close_session(session_id, strategy).await?;
    match out.writer.format() {
        OutputFormat::Text => out.display.print_success(&format!(
            "Session {} {}: {}",
            outcome.session_id, outcome.resolution, outcome.message
        )),
        OutputFormat::Json => out.writer.emit_json(&outcome),
    }

    Ok(())
}

async fn cmd_kill(out: &OutputContext<'_>, session_id: &str) -> Result<()> {
    let (config, paths) = load_env().await?;
    let (_, sessions) = build_stores(&config, &paths);

    sessions.kill(session_id).await?;
    match out.writer.format() {
        OutputFormat::Text => out
            .display
            .print_success(&format!("Killed session: {}", session_id)),
        OutputFormat::Json => out
            .writer
            .emit_message(&format!("Killed session: {}", session_id)),
    }

    Ok(())
}

async fn cmd_context(out: &OutputContext<'_>) -> Result<()> {
    let (config, paths) = load_env().await?;
    let (store, sessions) = build_stores(&config, &paths);
    let query = QueryService::new(paths.plan_id(), &store, &sessions);

    let context = query.get_context().await?;
    match out.writer.format() {
        OutputFormat::Text => {
            out.display.print_info(&format!("Plan: {}", context.plan_id));
            out.display.print_info(&format!(
                "Story: {}",
                context.story_id.as_deref().unwrap_or("-")
            ));
            out.display.print_info(&format!(
                "Session: {}",
                context.session_id.as_deref().unwrap_or("-")
            ));
        }
        OutputFormat::Json => out.writer.emit_json(&context),
    }

    Ok(())
}

async fn cmd_reclaim(out: &OutputContext<'_>) -> Result<()> {
    let (config, paths) = load_env().await?;
    let (_, sessions) = build_stores(&config, &paths);

    let report = sessions.reclaim().await?;
    match out.writer.format() {
        OutputFormat::Text => {
            if report.is_empty() {
                out.display.print_info("Nothing to reclaim.");
            } else {
                for id in &report.orphans {
                    out.display
                        .print_warning(&format!("Reclaimed orphaned session: {}", id));
                }
                for id in &report.expired {
                    out.display
                        .print_warning(&format!("Reclaimed expired session: {}", id));
                }
            }
        }
        OutputFormat::Json => out.writer.emit_json(&report),
    }

    Ok(())
}

async fn cmd_config(out: &OutputContext<'_>, action: ConfigAction) -> Result<()> {
    let root = find_project_root()?;
    let paths = ProjectPaths::new(root);

    match action {
        ConfigAction::Show => {
            let config = LoopConfig::load(&paths.loop_dir).await?;
            match out.writer.format() {
                OutputFormat::Text => {
                    let toml = toml::to_string_pretty(&config)
                        .map_err(|e| LoopError::Config(e.to_string()))?;
                    println!("{}", toml);
                }
                OutputFormat::Json => {
                    out.writer.emit_json(&config);
                }
            }
        }
        ConfigAction::Reset => {
            ensure_initialized(&paths)?;
            let config = LoopConfig::default();
            config.save(&paths.loop_dir).await?;
            if out.writer.format() == OutputFormat::Text {
                out.display
                    .print_success("Configuration reset to defaults.");
            }
        }
    }

    Ok(())
}
