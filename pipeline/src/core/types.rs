//! Shared deterministic types for the pipeline core.
//!
//! These types define the contracts exchanged with the agent collaborator and
//! persisted in session artifacts. They carry no behavior that depends on I/O.

use serde::{Deserialize, Serialize};

use crate::backlog::Phase;

/// Bug severity reported by a bug hunt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
    Cosmetic,
}

impl Severity {
    /// Remediation weight used as the synthesized fix item's story points.
    pub fn story_points(self) -> u32 {
        match self {
            Severity::Critical => 13,
            Severity::Major => 8,
            Severity::Minor => 3,
            Severity::Cosmetic => 1,
        }
    }

    /// Critical and major bugs block completion of the fix cycle.
    pub fn is_blocking(self) -> bool {
        matches!(self, Severity::Critical | Severity::Major)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Minor => "minor",
            Severity::Cosmetic => "cosmetic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bug {
    pub id: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub reproduction: String,
    #[serde(default)]
    pub location: Option<String>,
}

/// Structured verdict of one bug hunt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResults {
    pub has_bugs: bool,
    pub bugs: Vec<Bug>,
    pub summary: String,
    pub recommendations: Vec<String>,
}

impl TestResults {
    pub fn count(&self, severity: Severity) -> usize {
        self.bugs.iter().filter(|b| b.severity == severity).count()
    }

    pub fn has_blocking_bugs(&self) -> bool {
        self.bugs.iter().any(|b| b.severity.is_blocking())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementChange {
    pub item_id: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub description: String,
    pub impact: String,
}

/// Agent-produced comparison of two requirements snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaAnalysis {
    pub changes: Vec<RequirementChange>,
    pub patch_instructions: String,
    /// Backlog items requiring re-execution.
    pub task_ids: Vec<String>,
    /// New work for added requirements, as a fragment rooted at phases.
    /// Containers that already exist are matched by id; everything else is
    /// appended.
    #[serde(default)]
    pub additions: Vec<Phase>,
}

/// One numbered check declared for a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationGate {
    pub level: u8,
    pub description: String,
    pub command: Option<String>,
    #[serde(default)]
    pub manual: bool,
}

impl ValidationGate {
    /// Manual gates and gates without a command never run.
    pub fn is_runnable(&self) -> bool {
        !self.manual && self.command.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationGateResult {
    pub level: u8,
    pub description: String,
    pub success: bool,
    pub command: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub skipped: bool,
}

impl ValidationGateResult {
    pub fn skipped(gate: &ValidationGate) -> Self {
        Self {
            level: gate.level,
            description: gate.description.clone(),
            success: true,
            command: gate.command.clone(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            skipped: true,
        }
    }
}

/// Outcome of executing one subtask through implementation and validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub validation_results: Vec<ValidationGateResult>,
    pub artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub fix_attempts: u32,
}

/// Exploratory stages of a bug hunt, run in this order before the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HuntStage {
    ScopeAnalysis,
    ScenarioTesting,
    AdversarialTesting,
}

impl HuntStage {
    pub const ALL: [HuntStage; 3] = [
        HuntStage::ScopeAnalysis,
        HuntStage::ScenarioTesting,
        HuntStage::AdversarialTesting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HuntStage::ScopeAnalysis => "scope_analysis",
            HuntStage::ScenarioTesting => "scenario_testing",
            HuntStage::AdversarialTesting => "adversarial_testing",
        }
    }
}

/// Free-text output of one hunt stage, fed into later stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFindings {
    pub stage: HuntStage,
    pub findings: String,
}

/// Top-level pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Init,
    SessionInitialized,
    PrdDecomposed,
    BacklogComplete,
    QaComplete,
    QaSkipped,
    ShutdownComplete,
    ShutdownInterrupted,
}

impl PipelinePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelinePhase::Init => "init",
            PipelinePhase::SessionInitialized => "session_initialized",
            PipelinePhase::PrdDecomposed => "prd_decomposed",
            PipelinePhase::BacklogComplete => "backlog_complete",
            PipelinePhase::QaComplete => "qa_complete",
            PipelinePhase::QaSkipped => "qa_skipped",
            PipelinePhase::ShutdownComplete => "shutdown_complete",
            PipelinePhase::ShutdownInterrupted => "shutdown_interrupted",
        }
    }
}
