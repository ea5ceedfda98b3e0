//! Progressive validation gates and the implement → validate → fix loop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::agents::{Agent, FixRequest, ImplementRequest, Implementation};
use crate::backlog::{Backlog, Subtask};
use crate::core::backoff::Backoff;
use crate::core::types::{ExecutionResult, ValidationGate, ValidationGateResult};
use crate::error::PipelineError;
use crate::io::gates::{GateRunner, split_command};
use crate::io::process::RunLimits;

pub const MIN_GATE_LEVEL: u8 = 1;
pub const MAX_GATE_LEVEL: u8 = 4;

/// Gates sorted by level; duplicate or out-of-range levels are rejected.
pub fn ordered_gates(gates: &[ValidationGate]) -> Result<Vec<ValidationGate>, PipelineError> {
    let mut ordered = gates.to_vec();
    ordered.sort_by_key(|g| g.level);
    for gate in &ordered {
        if !(MIN_GATE_LEVEL..=MAX_GATE_LEVEL).contains(&gate.level) {
            return Err(PipelineError::InvalidGates(format!(
                "level {} is outside {MIN_GATE_LEVEL}..={MAX_GATE_LEVEL}",
                gate.level
            )));
        }
    }
    if let Some(pair) = ordered.windows(2).find(|w| w[0].level == w[1].level) {
        return Err(PipelineError::InvalidGates(format!(
            "level {} is declared more than once",
            pair[0].level
        )));
    }
    Ok(ordered)
}

/// Runs gate lists in ascending level order, stopping at the first failure.
pub struct ValidationGateExecutor<G: GateRunner> {
    runner: G,
    limits: RunLimits,
}

impl<G: GateRunner> ValidationGateExecutor<G> {
    pub fn new(runner: G, limits: RunLimits) -> Self {
        Self { runner, limits }
    }

    /// Results for every gate up to and including the first failure.
    ///
    /// `Err` only for an invalid gate set, before anything runs.
    #[instrument(skip_all, fields(gates = gates.len()))]
    pub fn run_gates(
        &self,
        gates: &[ValidationGate],
        workdir: &Path,
    ) -> Result<Vec<ValidationGateResult>, PipelineError> {
        let ordered = ordered_gates(gates)?;
        let mut results = Vec::with_capacity(ordered.len());
        for gate in &ordered {
            let result = self.run_gate(gate, workdir);
            let failed = !result.success;
            results.push(result);
            if failed {
                warn!(level = gate.level, description = %gate.description, "validation gate failed");
                break;
            }
        }
        Ok(results)
    }

    fn run_gate(&self, gate: &ValidationGate, workdir: &Path) -> ValidationGateResult {
        if !gate.is_runnable() {
            debug!(level = gate.level, manual = gate.manual, "skipping gate");
            return ValidationGateResult::skipped(gate);
        }
        let command = gate.command.clone().unwrap_or_default();
        let failure = |stderr: String| ValidationGateResult {
            level: gate.level,
            description: gate.description.clone(),
            success: false,
            command: gate.command.clone(),
            stdout: String::new(),
            stderr,
            exit_code: None,
            skipped: false,
        };

        let argv = match split_command(&command) {
            Ok(argv) => argv,
            Err(err) => return failure(format!("invalid command: {err:#}")),
        };
        debug!(level = gate.level, command = %command, "running gate");
        match self.runner.run(&argv, workdir, self.limits) {
            Ok(out) => {
                let mut stderr = out.stderr.clone();
                if out.timed_out {
                    stderr.push_str(&format!(
                        "\n[gate timed out after {}s]\n",
                        self.limits.timeout.as_secs()
                    ));
                }
                ValidationGateResult {
                    level: gate.level,
                    description: gate.description.clone(),
                    success: out.succeeded(),
                    command: gate.command.clone(),
                    stdout: out.stdout,
                    stderr,
                    exit_code: out.exit_code,
                    skipped: false,
                }
            }
            Err(err) => failure(format!("failed to start: {err:#}")),
        }
    }
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Executes one subtask for the orchestrator.
pub trait SubtaskRunner {
    /// `Err` is an execution error (the agent call itself failed); a subtask
    /// that ran but did not validate is `Ok` with `success == false`.
    fn run_subtask(&self, subtask: &Subtask, backlog: &Backlog) -> Result<ExecutionResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_fix_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_fix_attempts: 2,
            backoff: Backoff::default(),
        }
    }
}

/// Agent implementation followed by gates, with bounded fix-and-retry.
pub struct ImplementationRunner<'a, A: Agent + ?Sized, G: GateRunner, S: Sleeper> {
    agent: &'a A,
    gates: ValidationGateExecutor<G>,
    sleeper: S,
    policy: RetryPolicy,
    workdir: PathBuf,
}

impl<'a, A: Agent + ?Sized, G: GateRunner, S: Sleeper> ImplementationRunner<'a, A, G, S> {
    pub fn new(
        agent: &'a A,
        gates: ValidationGateExecutor<G>,
        sleeper: S,
        policy: RetryPolicy,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            agent,
            gates,
            sleeper,
            policy,
            workdir: workdir.into(),
        }
    }

    fn validate(&self, gates: &[ValidationGate]) -> (Vec<ValidationGateResult>, Option<String>) {
        match self.gates.run_gates(gates, &self.workdir) {
            Ok(results) => {
                let error = results
                    .iter()
                    .find(|r| !r.success)
                    .map(|r| format!("gate {} failed: {}", r.level, r.description));
                (results, error)
            }
            Err(err) => (Vec::new(), Some(err.to_string())),
        }
    }
}

impl<A: Agent + ?Sized, G: GateRunner, S: Sleeper> SubtaskRunner
    for ImplementationRunner<'_, A, G, S>
{
    #[instrument(skip_all, fields(subtask = %subtask.id))]
    fn run_subtask(&self, subtask: &Subtask, backlog: &Backlog) -> Result<ExecutionResult> {
        let dependencies = dependency_labels(subtask, backlog);
        let Implementation {
            validation_gates: mut gates,
            mut artifacts,
            ..
        } = self.agent.implement(&ImplementRequest {
            subtask,
            completed_dependencies: &dependencies,
        })?;

        let (mut results, mut error) = self.validate(&gates);
        let mut fix_attempts = 0;
        while error.is_some() && fix_attempts < self.policy.max_fix_attempts {
            fix_attempts += 1;
            let delay = self.policy.backoff.delay(fix_attempts);
            info!(
                attempt = fix_attempts,
                delay_ms = delay.as_millis() as u64,
                "validation failed, scheduling fix"
            );
            self.sleeper.sleep(delay);

            let fix = self.agent.fix(&FixRequest {
                subtask,
                attempt: fix_attempts,
                failures: &results,
            })?;
            if !fix.validation_gates.is_empty() {
                gates = fix.validation_gates;
            }
            artifacts.extend(fix.artifacts);
            (results, error) = self.validate(&gates);
        }

        artifacts.sort();
        artifacts.dedup();
        let success = error.is_none();
        if success {
            info!(fix_attempts, "subtask validated");
        } else {
            warn!(fix_attempts, error = ?error, "subtask failed validation");
        }
        Ok(ExecutionResult {
            success,
            validation_results: results,
            artifacts,
            error,
            fix_attempts,
        })
    }
}

fn dependency_labels(subtask: &Subtask, backlog: &Backlog) -> Vec<String> {
    subtask
        .dependencies
        .iter()
        .map(|id| match backlog.find(id) {
            Some(item) => format!("{id}: {}", item.title()),
            None => id.clone(),
        })
        .collect()
}
