//! `pipeline` CLI: run the delivery pipeline or inspect its sessions.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::warn;

use pipeline::agents::codex::CodexAgent;
use pipeline::backlog::Status;
use pipeline::core::invariants::orphaned_ids;
use pipeline::core::progress::ProgressTracker;
use pipeline::exit_codes;
use pipeline::io::config::{default_config_path, load_config};
use pipeline::io::executor::CodexExecutor;
use pipeline::io::gates::CommandGateRunner;
use pipeline::io::git::Git;
use pipeline::io::session::{SessionState, latest_session_dir, load_session};
use pipeline::io::tools::ToolRegistry;
use pipeline::logging;
use pipeline::pipeline::{PipelineController, PipelineOptions, PipelineResult};
use pipeline::shutdown::ShutdownController;
use pipeline::validation::{ImplementationRunner, RetryPolicy, ThreadSleeper, ValidationGateExecutor};

#[derive(Parser)]
#[command(
    name = "pipeline",
    version,
    about = "Requirements-to-code delivery pipeline driven by an agent"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decompose, implement, validate, and bug-hunt a requirements document.
    Run {
        /// Requirements document (markdown).
        #[arg(long)]
        prd: PathBuf,
        #[arg(long, default_value = "plan")]
        plan_dir: PathBuf,
        /// Defaults to `<plan-dir>/pipeline.toml`.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Repository the agent works in.
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
        #[arg(long)]
        skip_qa: bool,
    },
    /// Print the current session id, item counts, and progress.
    Status {
        #[arg(long, default_value = "plan")]
        plan_dir: PathBuf,
    },
    /// Load the latest session and check schema and backlog invariants.
    Validate {
        #[arg(long, default_value = "plan")]
        plan_dir: PathBuf,
    },
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            prd,
            plan_dir,
            config,
            workdir,
            skip_qa,
        } => {
            logging::init("info");
            cmd_run(prd, plan_dir, config, workdir, skip_qa)
        }
        Command::Status { plan_dir } => {
            logging::init("warn");
            cmd_status(&plan_dir)
        }
        Command::Validate { plan_dir } => {
            logging::init("warn");
            cmd_validate(&plan_dir)
        }
    }
}

fn cmd_run(
    prd: PathBuf,
    plan_dir: PathBuf,
    config_path: Option<PathBuf>,
    workdir: PathBuf,
    skip_qa: bool,
) -> Result<i32> {
    let config_path = config_path.unwrap_or_else(|| default_config_path(&plan_dir));
    let config = load_config(&config_path)?;
    if config.commit_after_subtask && !Git::new(&workdir).is_repo() {
        warn!(workdir = %workdir.display(), "commit_after_subtask is set but workdir is not a git repository");
    }

    let shutdown = ShutdownController::new();
    shutdown.install_signal_handler()?;

    let agent = CodexAgent::new(
        CodexExecutor::default(),
        &workdir,
        plan_dir.join("agent"),
        config.agent.limits(),
        config.agent.prompt_budget_bytes,
    )?;
    let runner = ImplementationRunner::new(
        &agent,
        ValidationGateExecutor::new(CommandGateRunner, config.validation.gate_limits()),
        ThreadSleeper,
        RetryPolicy {
            max_fix_attempts: config.validation.max_fix_attempts,
            backoff: config.validation.backoff(),
        },
        &workdir,
    );
    let tools = ToolRegistry::new(&workdir, config.validation.gate_limits());

    let result = PipelineController::new(
        &agent,
        &runner,
        &config,
        PipelineOptions {
            plan_dir,
            requirements_path: prd,
            skip_qa,
        },
        shutdown.subscribe(),
    )
    .with_tools(&tools)
    .run();

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("serialize pipeline result")?
    );
    Ok(result_exit_code(&result))
}

fn result_exit_code(result: &PipelineResult) -> i32 {
    if result.shutdown_interrupted {
        return exit_codes::INTERRUPTED;
    }
    if result.error.is_some() {
        return exit_codes::FAILED;
    }
    let qa_open = result.bug_hunt.as_ref().is_some_and(|qa| !qa.complete);
    if !result.success || qa_open {
        return exit_codes::INCOMPLETE;
    }
    exit_codes::OK
}

fn load_latest(plan_dir: &Path) -> Result<SessionState> {
    let dir = latest_session_dir(plan_dir)?
        .ok_or_else(|| anyhow!("no session found under {}", plan_dir.display()))?;
    load_session(&dir)
}

fn cmd_status(plan_dir: &Path) -> Result<i32> {
    let state = load_latest(plan_dir)?;
    let backlog = &state.backlog;
    let count = |status: Status| backlog.subtasks_with_status(status).len();
    let live = backlog
        .subtasks()
        .filter(|s| s.status != Status::Obsolete)
        .count();

    println!("session {}", state.metadata.id);
    if let Some(parent) = &state.metadata.parent_session_id {
        println!("parent  {parent}");
    }
    println!(
        "items   {} planned, {} complete, {} failed, {} obsolete",
        count(Status::Planned),
        count(Status::Complete),
        count(Status::Failed),
        count(Status::Obsolete)
    );
    if let Some(current) = &state.current_item_id {
        println!("current {current}");
    }
    println!(
        "progress {}",
        ProgressTracker::new(live, count(Status::Complete)).render()
    );
    Ok(exit_codes::OK)
}

fn cmd_validate(plan_dir: &Path) -> Result<i32> {
    let state = load_latest(plan_dir)?;
    let orphans = orphaned_ids(&state.backlog);
    if !orphans.is_empty() {
        eprintln!("orphaned items: {}", orphans.join(", "));
        return Ok(exit_codes::FAILED);
    }
    println!("ok {}", state.metadata.id);
    Ok(exit_codes::OK)
}
