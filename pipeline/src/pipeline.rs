//! Top-level phase machine: session → (delta) → decompose → orchestrate → QA.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::agents::Agent;
use crate::backlog::{Backlog, Status};
use crate::bug_hunt::{BugHuntWorkflow, FixCycleSummary, FixCycleWorkflow, open_bugfix_session};
use crate::core::aggregate::all_leaves_complete;
use crate::core::invariants::validate_backlog;
use crate::core::progress::ProgressTracker;
use crate::core::types::PipelinePhase;
use crate::delta::DeltaEngine;
use crate::error::{PipelineError, error_code};
use crate::io::config::PipelineConfig;
use crate::io::report::{read_test_results, report_path};
use crate::io::session::SessionStore;
use crate::io::tools::ToolRegistry;
use crate::orchestrator::{OrchestratorOptions, OrchestratorOutcome, TaskOrchestrator};
use crate::shutdown::ShutdownToken;
use crate::validation::SubtaskRunner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub plan_dir: PathBuf,
    pub requirements_path: PathBuf,
    pub skip_qa: bool,
}

/// Structured outcome of one pipeline run. Always produced, even on error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    pub phase: PipelinePhase,
    pub session_id: Option<String>,
    pub session_path: Option<PathBuf>,
    pub total_items: usize,
    pub completed_items: usize,
    pub failed_items: usize,
    pub bug_hunt: Option<FixCycleSummary>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub shutdown_interrupted: bool,
    pub shutdown_reason: Option<String>,
}

#[derive(Debug)]
struct RunState {
    phase: PipelinePhase,
    interrupted: Option<String>,
    bug_hunt: Option<FixCycleSummary>,
}

impl RunState {
    fn enter(&mut self, phase: PipelinePhase) {
        info!(from = self.phase.as_str(), to = phase.as_str(), "phase transition");
        self.phase = phase;
    }
}

pub struct PipelineController<'a, A: Agent + ?Sized, R: SubtaskRunner + ?Sized> {
    agent: &'a A,
    runner: &'a R,
    config: &'a PipelineConfig,
    options: PipelineOptions,
    shutdown: ShutdownToken,
    tools: Option<&'a ToolRegistry>,
}

impl<'a, A: Agent + ?Sized, R: SubtaskRunner + ?Sized> PipelineController<'a, A, R> {
    pub fn new(
        agent: &'a A,
        runner: &'a R,
        config: &'a PipelineConfig,
        options: PipelineOptions,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            agent,
            runner,
            config,
            options,
            shutdown,
            tools: None,
        }
    }

    /// Tools used for per-subtask commits when `commit_after_subtask` is set.
    pub fn with_tools(mut self, tools: &'a ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Run every phase. Errors are captured in the result; the session is
    /// persisted whether or not a phase failed.
    #[instrument(skip_all, fields(plan_dir = %self.options.plan_dir.display()))]
    pub fn run(&self) -> PipelineResult {
        let mut store = SessionStore::new(&self.options.plan_dir);
        let mut state = RunState {
            phase: PipelinePhase::Init,
            interrupted: None,
            bug_hunt: None,
        };

        let mut outcome = self.execute(&mut store, &mut state);
        if store.current().is_ok() {
            if let Err(err) = store.save() {
                warn!(err = %format!("{err:#}"), "final session save failed");
                if outcome.is_ok() {
                    outcome = Err(err.context("persist session during cleanup"));
                }
            }
        }
        self.finish(&store, state, outcome)
    }

    fn execute(&self, store: &mut SessionStore, state: &mut RunState) -> Result<()> {
        let requirements_path = &self.options.requirements_path;
        let requirements = fs::read_to_string(requirements_path)
            .with_context(|| format!("read requirements {}", requirements_path.display()))?;

        store.initialize(&requirements)?;
        state.enter(PipelinePhase::SessionInitialized);

        if store.has_changed(&requirements)? {
            if self.check_interrupt(state) {
                return Ok(());
            }
            info!("requirements changed since the last session");
            DeltaEngine::new(self.agent).run(store, &requirements)?;
        }

        if store.backlog()?.is_empty() {
            if self.check_interrupt(state) {
                return Ok(());
            }
            let backlog = self
                .agent
                .decompose(&requirements)
                .context("decompose requirements")?;
            let mut violations = validate_backlog(&backlog);
            if backlog.is_empty() {
                violations.push("decomposition produced no phases".to_string());
            }
            if !violations.is_empty() {
                return Err(PipelineError::InvalidBacklog(violations).into());
            }
            info!(items = backlog.item_count(), leaves = backlog.leaf_count(), "backlog decomposed");
            store.save_backlog(backlog)?;
        }
        state.enter(PipelinePhase::PrdDecomposed);

        let tracker = {
            let backlog = store.backlog()?;
            ProgressTracker::new(live_leaf_count(backlog), count_status(backlog, Status::Complete))
        };
        let outcome = {
            let mut orchestrator = TaskOrchestrator::new(
                store,
                self.runner,
                self.shutdown.clone(),
                self.orchestrator_options(),
            )
            .with_progress(tracker);
            if self.config.commit_after_subtask {
                if let Some(tools) = self.tools {
                    orchestrator = orchestrator.with_commits(tools);
                }
            }
            orchestrator.run()?
        };
        match outcome {
            OrchestratorOutcome::Interrupted { reason } => {
                state.interrupted = Some(reason);
                return Ok(());
            }
            OrchestratorOutcome::Drained {
                completed,
                failed,
                blocked,
            } => info!(completed, failed, blocked = blocked.len(), "backlog drained"),
        }
        state.enter(PipelinePhase::BacklogComplete);

        if self.check_interrupt(state) {
            return Ok(());
        }
        if self.options.skip_qa || !self.config.bug_hunt.enabled {
            info!("QA disabled");
            state.enter(PipelinePhase::QaSkipped);
            return Ok(());
        }
        if !all_leaves_complete(store.backlog()?) {
            info!("skipping QA, not every subtask is complete");
            state.enter(PipelinePhase::QaSkipped);
            return Ok(());
        }
        let summary = self.quality_assurance(store, &requirements, state)?;
        state.bug_hunt = Some(summary);
        state.enter(PipelinePhase::QaComplete);
        Ok(())
    }

    #[instrument(skip_all)]
    fn quality_assurance(
        &self,
        store: &SessionStore,
        requirements: &str,
        state: &mut RunState,
    ) -> Result<FixCycleSummary> {
        let session = store.current()?;
        let results = BugHuntWorkflow::new(self.agent, requirements).run(&session.metadata.path)?;
        if !results.has_blocking_bugs() {
            return Ok(FixCycleSummary::from_results(&results, 0));
        }

        let initial_report = report_path(&session.metadata.path);
        let initial = read_test_results(&initial_report)?;
        let mut bugfix = open_bugfix_session(session)?;
        let outcome = FixCycleWorkflow::new(
            BugHuntWorkflow::new(self.agent, requirements),
            self.runner,
            &mut bugfix,
            self.shutdown.clone(),
            self.config.bug_hunt.max_iterations,
            self.orchestrator_options(),
        )
        .run(initial)?;
        if let Some(reason) = outcome.interrupted.clone() {
            state.interrupted = Some(reason);
        }

        let bugfix_session = bugfix.current()?;
        let mut summary = FixCycleSummary::from_results(&outcome.results, outcome.iterations);
        summary.bugfix_session_id = Some(bugfix_session.metadata.id.clone());
        if !outcome.complete {
            let latest = report_path(&bugfix_session.metadata.path);
            summary.report_path = Some(if latest.exists() { latest } else { initial_report });
        }
        Ok(summary)
    }

    fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            max_iterations: self.config.orchestrator.max_iterations,
            continue_on_error: false,
            log_interval: self.config.progress.log_interval,
        }
    }

    fn check_interrupt(&self, state: &mut RunState) -> bool {
        match self.shutdown.reason() {
            Some(reason) => {
                state.interrupted = Some(reason);
                true
            }
            None => false,
        }
    }

    fn finish(&self, store: &SessionStore, state: RunState, outcome: Result<()>) -> PipelineResult {
        let (error, code) = match &outcome {
            Ok(()) => (None, None),
            Err(err) => {
                error!(phase = state.phase.as_str(), err = %format!("{err:#}"), "pipeline failed");
                (Some(format!("{err:#}")), error_code(err).map(str::to_string))
            }
        };
        let session = store.current().ok();
        let (total, completed, failed) = session
            .map(|s| {
                (
                    live_leaf_count(&s.backlog),
                    count_status(&s.backlog, Status::Complete),
                    count_status(&s.backlog, Status::Failed),
                )
            })
            .unwrap_or_default();

        let interrupted = state.interrupted.is_some();
        let phase = if interrupted {
            PipelinePhase::ShutdownInterrupted
        } else if error.is_none() {
            PipelinePhase::ShutdownComplete
        } else {
            state.phase
        };
        let result = PipelineResult {
            success: error.is_none() && !interrupted && failed == 0,
            phase,
            session_id: session.map(|s| s.metadata.id.clone()),
            session_path: session.map(|s| s.metadata.path.clone()),
            total_items: total,
            completed_items: completed,
            failed_items: failed,
            bug_hunt: state.bug_hunt,
            error,
            error_code: code,
            shutdown_interrupted: interrupted,
            shutdown_reason: state.interrupted,
        };
        info!(
            success = result.success,
            phase = result.phase.as_str(),
            completed = result.completed_items,
            failed = result.failed_items,
            "pipeline finished"
        );
        result
    }
}

fn live_leaf_count(backlog: &Backlog) -> usize {
    backlog
        .subtasks()
        .filter(|s| s.status != Status::Obsolete)
        .count()
}

fn count_status(backlog: &Backlog, status: Status) -> usize {
    backlog.subtasks_with_status(status).len()
}
