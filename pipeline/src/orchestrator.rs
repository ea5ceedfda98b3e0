//! Sequential, dependency-ordered execution of backlog subtasks.
//!
//! Every status transition is persisted before the next step, so a crash
//! leaves at most one item in flight (reset to `Planned` on resume).

use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::backlog::Status;
use crate::core::aggregate::derive_container_statuses;
use crate::core::progress::ProgressTracker;
use crate::core::selector::{blocked_subtasks, next_ready_subtask};
use crate::error::PipelineError;
use crate::io::session::SessionStore;
use crate::io::tools::ToolRegistry;
use crate::shutdown::ShutdownToken;
use crate::validation::SubtaskRunner;

pub const DEFAULT_MAX_ITERATIONS: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorOutcome {
    /// No eligible subtask remains.
    Drained {
        completed: usize,
        failed: usize,
        /// Planned subtasks whose dependencies can no longer complete.
        blocked: Vec<String>,
    },
    Interrupted {
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub max_iterations: u32,
    /// Mark the item failed and keep going when the runner errors.
    pub continue_on_error: bool,
    pub log_interval: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            continue_on_error: false,
            log_interval: 5,
        }
    }
}

pub struct TaskOrchestrator<'a, R: SubtaskRunner + ?Sized> {
    store: &'a mut SessionStore,
    runner: &'a R,
    shutdown: ShutdownToken,
    options: OrchestratorOptions,
    progress: Option<ProgressTracker>,
    commits: Option<&'a ToolRegistry>,
}

impl<'a, R: SubtaskRunner + ?Sized> TaskOrchestrator<'a, R> {
    pub fn new(
        store: &'a mut SessionStore,
        runner: &'a R,
        shutdown: ShutdownToken,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            runner,
            shutdown,
            options,
            progress: None,
            commits: None,
        }
    }

    pub fn with_progress(mut self, tracker: ProgressTracker) -> Self {
        self.progress = Some(tracker);
        self
    }

    /// Commit the workspace through `tools` after each completed subtask.
    pub fn with_commits(mut self, tools: &'a ToolRegistry) -> Self {
        self.commits = Some(tools);
        self
    }

    pub fn progress(&self) -> Option<&ProgressTracker> {
        self.progress.as_ref()
    }

    #[instrument(skip_all, fields(max_iterations = self.options.max_iterations))]
    pub fn run(&mut self) -> Result<OrchestratorOutcome> {
        let mut iterations = 0u32;
        let mut completed = 0usize;
        let mut failed = 0usize;

        loop {
            if let Some(reason) = self.shutdown.reason() {
                info!(%reason, completed, failed, "orchestrator interrupted");
                return Ok(OrchestratorOutcome::Interrupted { reason });
            }
            let Some(subtask) = next_ready_subtask(self.store.backlog()?).cloned() else {
                break;
            };
            if iterations >= self.options.max_iterations {
                return Err(PipelineError::SafetyCapExceeded {
                    cap: self.options.max_iterations,
                }
                .into());
            }
            iterations += 1;

            info!(item = %subtask.id, title = %subtask.title, "starting subtask");
            self.transition(&subtask.id, Status::Implementing, Some(&subtask.id))?;

            let started = Instant::now();
            let status = match self.runner.run_subtask(&subtask, self.store.backlog()?) {
                Ok(result) if result.success => Status::Complete,
                Ok(result) => {
                    warn!(item = %subtask.id, error = ?result.error, "subtask failed");
                    Status::Failed
                }
                Err(err) => {
                    self.transition(&subtask.id, Status::Failed, None)?;
                    if !self.options.continue_on_error {
                        return Err(err).with_context(|| format!("execute {}", subtask.id));
                    }
                    warn!(item = %subtask.id, err = %format!("{err:#}"), "subtask errored, continuing");
                    failed += 1;
                    continue;
                }
            };
            self.transition(&subtask.id, status, None)?;

            if status == Status::Complete {
                completed += 1;
                self.commit(&subtask.id, &subtask.title);
                self.record_progress(started);
            } else {
                failed += 1;
            }
        }

        let blocked = blocked_subtasks(self.store.backlog()?);
        if !blocked.is_empty() {
            warn!(items = ?blocked, "subtasks blocked by unfinished dependencies");
        }
        if let Some(progress) = &self.progress {
            info!(summary = %progress.summary(), "orchestrator drained");
        }
        Ok(OrchestratorOutcome::Drained {
            completed,
            failed,
            blocked,
        })
    }

    fn transition(&mut self, id: &str, status: Status, current: Option<&str>) -> Result<()> {
        let backlog = self.store.backlog_mut()?;
        backlog.set_subtask_status(id, status);
        derive_container_statuses(backlog);
        self.store.set_current_item(current)
    }

    fn record_progress(&mut self, started: Instant) {
        let Some(progress) = self.progress.as_mut() else {
            return;
        };
        progress.record(started.elapsed());
        if progress.should_log(self.options.log_interval) {
            info!(progress = %progress.render(), "progress");
        }
    }

    fn commit(&self, id: &str, title: &str) {
        let Some(tools) = self.commits else {
            return;
        };
        let message = format!("{id}: {title}");
        let result = tools
            .execute_tool("git_add", &json!({}))
            .and_then(|_| tools.execute_tool("git_commit", &json!({ "message": message })));
        if let Err(err) = result {
            warn!(item = id, err = %format!("{err:#}"), "auto-commit failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::error_code;
    use crate::shutdown::ShutdownController;
    use crate::test_support::{ScriptedRunner, sample_backlog};

    fn store_with_sample(dir: &std::path::Path) -> SessionStore {
        let mut store = SessionStore::new(dir);
        store.initialize("req").expect("init");
        store.save_backlog(sample_backlog()).expect("save");
        store
    }

    #[test]
    fn executes_in_dependency_order_and_persists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = store_with_sample(temp.path());
        let runner = ScriptedRunner::succeeding();
        let shutdown = ShutdownController::new();

        let outcome = TaskOrchestrator::new(
            &mut store,
            &runner,
            shutdown.subscribe(),
            OrchestratorOptions::default(),
        )
        .with_progress(ProgressTracker::new(3, 0))
        .run()
        .expect("run");

        assert_eq!(
            outcome,
            OrchestratorOutcome::Drained {
                completed: 3,
                failed: 0,
                blocked: vec![]
            }
        );
        assert_eq!(
            runner.executed(),
            vec!["P1.M1.T1.S1", "P1.M1.T1.S2", "P1.M1.T2.S1"]
        );
        let mut reloaded = SessionStore::new(temp.path());
        let state = reloaded.initialize("req").expect("reload");
        assert_eq!(state.backlog.status_of("P1"), Some(Status::Complete));
        assert_eq!(state.current_item_id, None);
    }

    /// Each dispatched subtask is already `Implementing` on disk.
    #[test]
    fn item_is_persisted_in_flight_before_dispatch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = store_with_sample(temp.path());
        let runner = ScriptedRunner::succeeding().observing_disk(temp.path());

        TaskOrchestrator::new(
            &mut store,
            &runner,
            ShutdownController::new().subscribe(),
            OrchestratorOptions::default(),
        )
        .run()
        .expect("run");

        for (id, status, current) in runner.observed() {
            assert_eq!(status, Some(Status::Implementing), "{id}");
            assert_eq!(current.as_deref(), Some(id.as_str()));
        }
    }

    #[test]
    fn validation_failure_blocks_dependents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = store_with_sample(temp.path());
        let runner = ScriptedRunner::succeeding().failing("P1.M1.T1.S1");

        let outcome = TaskOrchestrator::new(
            &mut store,
            &runner,
            ShutdownController::new().subscribe(),
            OrchestratorOptions::default(),
        )
        .run()
        .expect("run");

        assert_eq!(
            outcome,
            OrchestratorOutcome::Drained {
                completed: 0,
                failed: 1,
                blocked: vec!["P1.M1.T1.S2".to_string(), "P1.M1.T2.S1".to_string()]
            }
        );
        assert_eq!(
            store.backlog().expect("backlog").status_of("P1.M1.T1"),
            Some(Status::Failed)
        );
    }

    #[test]
    fn runner_error_marks_failed_then_propagates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = store_with_sample(temp.path());
        let runner = ScriptedRunner::succeeding().erroring("P1.M1.T1.S1");

        let err = TaskOrchestrator::new(
            &mut store,
            &runner,
            ShutdownController::new().subscribe(),
            OrchestratorOptions::default(),
        )
        .run()
        .unwrap_err();

        assert!(format!("{err:#}").contains("execute P1.M1.T1.S1"));
        let mut reloaded = SessionStore::new(temp.path());
        let state = reloaded.initialize("req").expect("reload");
        assert_eq!(state.backlog.status_of("P1.M1.T1.S1"), Some(Status::Failed));
    }

    #[test]
    fn continue_on_error_keeps_draining() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = store_with_sample(temp.path());
        let runner = ScriptedRunner::succeeding().erroring("P1.M1.T1.S1");
        let options = OrchestratorOptions {
            continue_on_error: true,
            ..OrchestratorOptions::default()
        };

        let outcome = TaskOrchestrator::new(
            &mut store,
            &runner,
            ShutdownController::new().subscribe(),
            options,
        )
        .run()
        .expect("run");
        assert!(matches!(outcome, OrchestratorOutcome::Drained { failed: 1, .. }));
    }

    #[test]
    fn exceeding_safety_cap_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = store_with_sample(temp.path());
        let runner = ScriptedRunner::succeeding();
        let options = OrchestratorOptions {
            max_iterations: 2,
            ..OrchestratorOptions::default()
        };

        let err = TaskOrchestrator::new(
            &mut store,
            &runner,
            ShutdownController::new().subscribe(),
            options,
        )
        .run()
        .unwrap_err();
        assert_eq!(error_code(&err), Some("SAFETY_CAP_EXCEEDED"));
        assert_eq!(runner.executed().len(), 2);
    }

    /// A shutdown requested mid-item lets that item finish, then stops.
    #[test]
    fn shutdown_stops_before_next_selection() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = store_with_sample(temp.path());
        let shutdown = ShutdownController::new();
        let runner = ScriptedRunner::succeeding().requesting_shutdown(shutdown.clone());

        let outcome = TaskOrchestrator::new(
            &mut store,
            &runner,
            shutdown.subscribe(),
            OrchestratorOptions::default(),
        )
        .run()
        .expect("run");

        assert_eq!(
            outcome,
            OrchestratorOutcome::Interrupted {
                reason: "SIGINT".to_string()
            }
        );
        assert_eq!(runner.executed(), vec!["P1.M1.T1.S1"]);
        assert_eq!(
            store.backlog().expect("backlog").status_of("P1.M1.T1.S1"),
            Some(Status::Complete)
        );
    }
}
