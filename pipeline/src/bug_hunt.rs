//! QA: staged bug hunting and the fix → retest convergence loop.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::agents::{Agent, ExploreRequest, ReportRequest};
use crate::core::fix_tasks::{check_complete, synthesize_fix_backlog};
use crate::core::types::{HuntStage, Severity, StageFindings, TestResults};
use crate::error::PipelineError;
use crate::io::report::{report_path, write_test_results};
use crate::io::session::{SessionState, SessionStore};
use crate::orchestrator::{OrchestratorOptions, OrchestratorOutcome, TaskOrchestrator};
use crate::shutdown::ShutdownToken;
use crate::validation::SubtaskRunner;

pub const BUGFIX_DIR_NAME: &str = "bugfix";
pub const DEFAULT_FIX_ITERATIONS: u32 = 3;

/// Bugfix sessions live under a `bugfix` directory of their parent session.
pub fn is_bugfix_session(path: &Path) -> bool {
    path.components()
        .any(|c| c == Component::Normal(BUGFIX_DIR_NAME.as_ref()))
}

/// Open a new bugfix session under `parent`, recording the parent id.
pub fn open_bugfix_session(parent: &SessionState) -> Result<SessionStore> {
    let mut store = SessionStore::new(parent.metadata.path.join(BUGFIX_DIR_NAME));
    store.create_session(
        &parent.requirements_snapshot,
        Some(parent.metadata.id.clone()),
    )?;
    Ok(store)
}

pub struct BugHuntWorkflow<'a, A: Agent + ?Sized> {
    agent: &'a A,
    requirements: &'a str,
}

impl<'a, A: Agent + ?Sized> BugHuntWorkflow<'a, A> {
    pub fn new(agent: &'a A, requirements: &'a str) -> Self {
        Self {
            agent,
            requirements,
        }
    }

    /// Run each exploration stage in order, then ask for the structured report.
    ///
    /// `TEST_RESULTS.md` is written to `session_dir` only when a critical or
    /// major bug was found; an older report there is removed otherwise.
    #[instrument(skip_all, fields(session_dir = %session_dir.display()))]
    pub fn run(&self, session_dir: &Path) -> Result<TestResults> {
        let mut findings: Vec<StageFindings> = Vec::with_capacity(HuntStage::ALL.len());
        for stage in HuntStage::ALL {
            info!(stage = stage.as_str(), "bug hunt stage");
            let text = self
                .agent
                .explore(&ExploreRequest {
                    stage,
                    requirements: self.requirements,
                    previous: &findings,
                })
                .with_context(|| format!("bug hunt stage {}", stage.as_str()))?;
            findings.push(StageFindings {
                stage,
                findings: text,
            });
        }

        let mut results = self
            .agent
            .report(&ReportRequest {
                requirements: self.requirements,
                findings: &findings,
            })
            .context("bug hunt report")?;
        if results.has_bugs != !results.bugs.is_empty() {
            warn!(
                has_bugs = results.has_bugs,
                bugs = results.bugs.len(),
                "report has_bugs disagrees with bug list"
            );
            results.has_bugs = !results.bugs.is_empty();
        }
        info!(
            bug_count = results.bugs.len(),
            critical_count = results.count(Severity::Critical),
            major_count = results.count(Severity::Major),
            "bug hunt complete"
        );

        if results.has_blocking_bugs() {
            write_test_results(session_dir, &results)?;
        } else {
            let stale = report_path(session_dir);
            if stale.exists() {
                debug!(path = %stale.display(), "removing stale test results");
                fs::remove_file(&stale)
                    .with_context(|| format!("remove {}", stale.display()))?;
            }
        }
        Ok(results)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixCycleOutcome {
    pub results: TestResults,
    pub iterations: u32,
    pub complete: bool,
    pub interrupted: Option<String>,
}

/// Compact QA summary carried in the pipeline result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixCycleSummary {
    pub iterations: u32,
    pub complete: bool,
    pub bug_count: usize,
    pub blocking_bug_count: usize,
    pub bugfix_session_id: Option<String>,
    pub report_path: Option<PathBuf>,
}

impl FixCycleSummary {
    pub fn from_results(results: &TestResults, iterations: u32) -> Self {
        Self {
            iterations,
            complete: check_complete(Some(results)),
            bug_count: results.bugs.len(),
            blocking_bug_count: results.bugs.iter().filter(|b| b.severity.is_blocking()).count(),
            bugfix_session_id: None,
            report_path: None,
        }
    }
}

pub struct FixCycleWorkflow<'a, A: Agent + ?Sized, R: SubtaskRunner + ?Sized> {
    hunt: BugHuntWorkflow<'a, A>,
    runner: &'a R,
    store: &'a mut SessionStore,
    shutdown: ShutdownToken,
    max_iterations: u32,
    options: OrchestratorOptions,
}

impl<'a, A: Agent + ?Sized, R: SubtaskRunner + ?Sized> FixCycleWorkflow<'a, A, R> {
    /// `store` must hold a bugfix session (see [`open_bugfix_session`]).
    pub fn new(
        hunt: BugHuntWorkflow<'a, A>,
        runner: &'a R,
        store: &'a mut SessionStore,
        shutdown: ShutdownToken,
        max_iterations: u32,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            hunt,
            runner,
            store,
            shutdown,
            max_iterations,
            options: OrchestratorOptions {
                continue_on_error: true,
                ..options
            },
        }
    }

    /// Fix, then retest, until no blocking bug remains or the iteration
    /// budget is spent.
    #[instrument(skip_all, fields(max_iterations = self.max_iterations))]
    pub fn run(&mut self, initial: TestResults) -> Result<FixCycleOutcome> {
        let session_dir = self.store.current()?.metadata.path.clone();
        if !is_bugfix_session(&session_dir) {
            return Err(PipelineError::NotBugfixSession { path: session_dir }.into());
        }

        let mut results = initial;
        let mut iterations = 0;
        let mut interrupted = None;
        while !check_complete(Some(&results)) && iterations < self.max_iterations {
            if let Some(reason) = self.shutdown.reason() {
                interrupted = Some(reason);
                break;
            }
            iterations += 1;
            let fix_backlog = synthesize_fix_backlog(&results);
            info!(
                iteration = iterations,
                fixes = fix_backlog.leaf_count(),
                "starting fix iteration"
            );
            self.store.save_backlog(fix_backlog)?;

            let outcome = TaskOrchestrator::new(
                self.store,
                self.runner,
                self.shutdown.clone(),
                self.options,
            )
            .run()
            .with_context(|| format!("fix iteration {iterations}"))?;
            if let OrchestratorOutcome::Interrupted { reason } = outcome {
                interrupted = Some(reason);
                break;
            }

            results = self
                .hunt
                .run(&session_dir)
                .with_context(|| format!("retest after fix iteration {iterations}"))?;
        }

        let complete = check_complete(Some(&results));
        if !complete && interrupted.is_none() {
            warn!(
                iterations,
                remaining = results.bugs.len(),
                "fix cycle stopped with blocking bugs remaining"
            );
        }
        Ok(FixCycleOutcome {
            results,
            iterations,
            complete,
            interrupted,
        })
    }
}
