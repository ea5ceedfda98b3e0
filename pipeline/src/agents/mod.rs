//! The agent collaborator: everything that needs judgement goes through here.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::backlog::{Backlog, Subtask};
use crate::core::types::{
    DeltaAnalysis, HuntStage, StageFindings, TestResults, ValidationGate, ValidationGateResult,
};

pub mod codex;

/// What an implementation (or fix) attempt produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub summary: String,
    pub validation_gates: Vec<ValidationGate>,
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ImplementRequest<'a> {
    pub subtask: &'a Subtask,
    /// Titles of the completed items this subtask depends on.
    pub completed_dependencies: &'a [String],
}

#[derive(Debug, Clone, Copy)]
pub struct FixRequest<'a> {
    pub subtask: &'a Subtask,
    /// 1-based fix attempt number.
    pub attempt: u32,
    /// Gate results of the failed run, ending with the failing gate.
    pub failures: &'a [ValidationGateResult],
}

#[derive(Debug, Clone, Copy)]
pub struct DeltaRequest<'a> {
    pub old_requirements: &'a str,
    pub new_requirements: &'a str,
    pub completed_ids: &'a [String],
    /// Every item id in the current backlog, in document order.
    pub item_ids: &'a [String],
}

#[derive(Debug, Clone, Copy)]
pub struct ExploreRequest<'a> {
    pub stage: HuntStage,
    pub requirements: &'a str,
    pub previous: &'a [StageFindings],
}

#[derive(Debug, Clone, Copy)]
pub struct ReportRequest<'a> {
    pub requirements: &'a str,
    pub findings: &'a [StageFindings],
}

/// Blocking calls to an external reasoning agent.
///
/// `Err` means the call itself failed (process, timeout, malformed output),
/// never that the agent disliked the work.
pub trait Agent {
    fn decompose(&self, requirements: &str) -> Result<Backlog>;
    fn implement(&self, request: &ImplementRequest<'_>) -> Result<Implementation>;
    fn fix(&self, request: &FixRequest<'_>) -> Result<Implementation>;
    fn analyze_delta(&self, request: &DeltaRequest<'_>) -> Result<DeltaAnalysis>;
    /// Free-text findings of one exploratory hunt stage.
    fn explore(&self, request: &ExploreRequest<'_>) -> Result<String>;
    fn report(&self, request: &ReportRequest<'_>) -> Result<TestResults>;
}
