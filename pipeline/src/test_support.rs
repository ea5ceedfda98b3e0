//! Test-only builders and scripted collaborators.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};

use crate::agents::{
    Agent, DeltaRequest, ExploreRequest, FixRequest, ImplementRequest, Implementation, ReportRequest,
};
use crate::backlog::{Backlog, Milestone, Phase, Status, Subtask, Task};
use crate::core::types::{
    Bug, DeltaAnalysis, ExecutionResult, HuntStage, Severity, TestResults, ValidationGate,
};
use crate::io::gates::{GateOutput, GateRunner};
use crate::io::process::RunLimits;
use crate::io::session::{latest_session_dir, load_session};
use crate::shutdown::ShutdownController;
use crate::validation::{Sleeper, SubtaskRunner};

/// A planned subtask with deterministic title and scope.
pub fn subtask(id: &str, dependencies: &[&str]) -> Subtask {
    Subtask {
        id: id.to_string(),
        title: format!("Subtask {id}"),
        status: Status::Planned,
        story_points: 1,
        dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        context_scope: format!("Implement {id}."),
    }
}

/// A planned phase built from `(milestone_id, [(task_id, subtasks)])`.
pub fn phase(id: &str, milestones: Vec<(&str, Vec<(&str, Vec<Subtask>)>)>) -> Phase {
    Phase {
        id: id.to_string(),
        title: format!("Phase {id}"),
        status: Status::Planned,
        description: String::new(),
        milestones: milestones
            .into_iter()
            .map(|(milestone_id, tasks)| Milestone {
                id: milestone_id.to_string(),
                title: format!("Milestone {milestone_id}"),
                status: Status::Planned,
                description: String::new(),
                tasks: tasks
                    .into_iter()
                    .map(|(task_id, subtasks)| Task {
                        id: task_id.to_string(),
                        title: format!("Task {task_id}"),
                        status: Status::Planned,
                        description: String::new(),
                        subtasks,
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// `P1.M1` with `T1 { S1, S2 -> S1 }` and `T2 { S1 -> T1 }`.
pub fn sample_backlog() -> Backlog {
    Backlog::new(vec![phase(
        "P1",
        vec![(
            "P1.M1",
            vec![
                (
                    "P1.M1.T1",
                    vec![
                        subtask("P1.M1.T1.S1", &[]),
                        subtask("P1.M1.T1.S2", &["P1.M1.T1.S1"]),
                    ],
                ),
                ("P1.M1.T2", vec![subtask("P1.M1.T2.S1", &["P1.M1.T1"])]),
            ],
        )],
    )])
}

pub fn bug(id: &str, severity: Severity) -> Bug {
    Bug {
        id: id.to_string(),
        severity,
        title: format!("{id} title"),
        description: format!("{id} description"),
        reproduction: format!("1. run the {id} scenario\n2. observe the failure"),
        location: None,
    }
}

/// Results with one bug per severity, ids `BUG-001`, `BUG-002`, ...
pub fn test_results(severities: &[Severity]) -> TestResults {
    TestResults {
        has_bugs: !severities.is_empty(),
        bugs: severities
            .iter()
            .enumerate()
            .map(|(idx, severity)| bug(&format!("BUG-{:03}", idx + 1), *severity))
            .collect(),
        summary: format!("{} bug(s) found", severities.len()),
        recommendations: Vec::new(),
    }
}

pub fn gate(level: u8, command: Option<&str>) -> ValidationGate {
    ValidationGate {
        level,
        description: format!("level {level} check"),
        command: command.map(str::to_string),
        manual: false,
    }
}

pub fn implementation(gates: Vec<ValidationGate>) -> Implementation {
    Implementation {
        summary: "done".to_string(),
        validation_gates: gates,
        artifacts: Vec::new(),
    }
}

/// Agent that replays queued responses and records what it was asked.
///
/// An empty queue is an `Err`, except for `explore` (canned findings) and
/// `implement` when a default implementation is set.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    decompositions: RefCell<VecDeque<Backlog>>,
    implementations: RefCell<VecDeque<Implementation>>,
    default_implementation: Option<Implementation>,
    fixes: RefCell<VecDeque<Implementation>>,
    deltas: RefCell<VecDeque<DeltaAnalysis>>,
    findings: RefCell<VecDeque<String>>,
    reports: RefCell<VecDeque<TestResults>>,
    implement_dependencies: RefCell<Vec<Vec<String>>>,
    fix_requests: RefCell<Vec<(String, u32)>>,
    delta_completed_ids: RefCell<Vec<Vec<String>>>,
    explore_calls: RefCell<Vec<(HuntStage, usize)>>,
}

impl ScriptedAgent {
    pub fn with_default_implementation(mut self, implementation: Implementation) -> Self {
        self.default_implementation = Some(implementation);
        self
    }

    pub fn push_decomposition(&self, backlog: Backlog) {
        self.decompositions.borrow_mut().push_back(backlog);
    }

    pub fn push_implementation(&self, implementation: Implementation) {
        self.implementations.borrow_mut().push_back(implementation);
    }

    pub fn push_fix(&self, implementation: Implementation) {
        self.fixes.borrow_mut().push_back(implementation);
    }

    pub fn push_delta(&self, analysis: DeltaAnalysis) {
        self.deltas.borrow_mut().push_back(analysis);
    }

    pub fn push_findings(&self, findings: &str) {
        self.findings.borrow_mut().push_back(findings.to_string());
    }

    pub fn push_report(&self, results: TestResults) {
        self.reports.borrow_mut().push_back(results);
    }

    pub fn implement_dependencies(&self) -> Vec<Vec<String>> {
        self.implement_dependencies.borrow().clone()
    }

    pub fn fix_requests(&self) -> Vec<(String, u32)> {
        self.fix_requests.borrow().clone()
    }

    pub fn delta_completed_ids(&self) -> Vec<Vec<String>> {
        self.delta_completed_ids.borrow().clone()
    }

    /// `(stage, number of earlier findings it received)` per exploration stage.
    pub fn explore_calls(&self) -> Vec<(HuntStage, usize)> {
        self.explore_calls.borrow().clone()
    }
}

fn pop<T>(queue: &RefCell<VecDeque<T>>, what: &str) -> Result<T> {
    queue
        .borrow_mut()
        .pop_front()
        .ok_or_else(|| anyhow!("scripted agent has no {what} queued"))
}

impl Agent for ScriptedAgent {
    fn decompose(&self, _requirements: &str) -> Result<Backlog> {
        pop(&self.decompositions, "decomposition")
    }

    fn implement(&self, request: &ImplementRequest<'_>) -> Result<Implementation> {
        self.implement_dependencies
            .borrow_mut()
            .push(request.completed_dependencies.to_vec());
        match self.implementations.borrow_mut().pop_front() {
            Some(implementation) => Ok(implementation),
            None => self
                .default_implementation
                .clone()
                .ok_or_else(|| anyhow!("scripted agent has no implementation queued")),
        }
    }

    fn fix(&self, request: &FixRequest<'_>) -> Result<Implementation> {
        self.fix_requests
            .borrow_mut()
            .push((request.subtask.id.clone(), request.attempt));
        pop(&self.fixes, "fix")
    }

    fn analyze_delta(&self, request: &DeltaRequest<'_>) -> Result<DeltaAnalysis> {
        self.delta_completed_ids
            .borrow_mut()
            .push(request.completed_ids.to_vec());
        pop(&self.deltas, "delta analysis")
    }

    fn explore(&self, request: &ExploreRequest<'_>) -> Result<String> {
        self.explore_calls
            .borrow_mut()
            .push((request.stage, request.previous.len()));
        Ok(self
            .findings
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| format!("{} findings", request.stage.as_str())))
    }

    fn report(&self, _request: &ReportRequest<'_>) -> Result<TestResults> {
        pop(&self.reports, "report")
    }
}

/// Gate runner that replays `(command, exit_code)` pairs in order.
///
/// Running past the end of the script fails as if the program were missing.
#[derive(Debug, Clone)]
pub struct ScriptedGateRunner {
    script: Rc<RefCell<VecDeque<(String, i32)>>>,
    invocations: Rc<RefCell<Vec<String>>>,
}

impl ScriptedGateRunner {
    pub fn new(script: Vec<(&str, i32)>) -> Self {
        Self {
            script: Rc::new(RefCell::new(
                script
                    .into_iter()
                    .map(|(command, code)| (command.to_string(), code))
                    .collect(),
            )),
            invocations: Rc::default(),
        }
    }

    pub fn invocations(&self) -> Vec<String> {
        self.invocations.borrow().clone()
    }
}

impl GateRunner for ScriptedGateRunner {
    fn run(&self, argv: &[String], _workdir: &Path, _limits: RunLimits) -> Result<GateOutput> {
        let command = argv.join(" ");
        let Some((expected, exit_code)) = self.script.borrow_mut().pop_front() else {
            bail!("program not found: {command}");
        };
        if expected != command {
            bail!("expected gate command '{expected}', got '{command}'");
        }
        self.invocations.borrow_mut().push(command);
        Ok(GateOutput {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                format!("{expected} failed")
            },
            timed_out: false,
        })
    }
}

/// Sleeper that records requested delays instead of sleeping.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    delays: Rc<RefCell<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.borrow_mut().push(duration);
    }
}

/// Subtask runner with scripted per-id outcomes.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    failing: Vec<String>,
    erroring: Vec<String>,
    shutdown: Option<ShutdownController>,
    observe_dir: Option<PathBuf>,
    runs: Cell<usize>,
    executed: RefCell<Vec<String>>,
    observed: RefCell<Vec<(String, Option<Status>, Option<String>)>>,
}

impl ScriptedRunner {
    /// Every subtask validates.
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// `id` runs but fails validation.
    pub fn failing(mut self, id: &str) -> Self {
        self.failing.push(id.to_string());
        self
    }

    /// Running `id` is an execution error.
    pub fn erroring(mut self, id: &str) -> Self {
        self.erroring.push(id.to_string());
        self
    }

    /// Request a `SIGINT` shutdown while the first subtask runs.
    pub fn requesting_shutdown(mut self, controller: ShutdownController) -> Self {
        self.shutdown = Some(controller);
        self
    }

    /// Record the on-disk status of each subtask as it is dispatched.
    pub fn observing_disk(mut self, plan_dir: &Path) -> Self {
        self.observe_dir = Some(plan_dir.to_path_buf());
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.borrow().clone()
    }

    pub fn observed(&self) -> Vec<(String, Option<Status>, Option<String>)> {
        self.observed.borrow().clone()
    }
}

impl SubtaskRunner for ScriptedRunner {
    fn run_subtask(&self, subtask: &Subtask, _backlog: &Backlog) -> Result<ExecutionResult> {
        let run = self.runs.get();
        self.runs.set(run + 1);
        self.executed.borrow_mut().push(subtask.id.clone());

        if let Some(dir) = &self.observe_dir {
            let session_dir = latest_session_dir(dir)?
                .ok_or_else(|| anyhow!("no session under {}", dir.display()))?;
            let state = load_session(&session_dir)?;
            self.observed.borrow_mut().push((
                subtask.id.clone(),
                state.backlog.status_of(&subtask.id),
                state.current_item_id,
            ));
        }
        if let (Some(controller), 0) = (&self.shutdown, run) {
            controller.request("SIGINT");
        }
        if self.erroring.contains(&subtask.id) {
            bail!("scripted execution error for {}", subtask.id);
        }

        let success = !self.failing.contains(&subtask.id);
        Ok(ExecutionResult {
            success,
            validation_results: Vec::new(),
            artifacts: Vec::new(),
            error: (!success).then(|| format!("gate 1 failed for {}", subtask.id)),
            fix_attempts: 0,
        })
    }
}

/// In-memory writer for [`capture_logs`].
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("log buffer poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` under a thread-local fmt subscriber and returns its output as text.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let value = tracing::subscriber::with_default(subscriber, f);
    let bytes = buffer.0.lock().map(|b| b.clone()).unwrap_or_default();
    (value, String::from_utf8_lossy(&bytes).into_owned())
}
