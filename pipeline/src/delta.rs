//! Re-planning when the requirements document changes mid-flight.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::agents::{Agent, DeltaRequest};
use crate::backlog::{Backlog, Status};
use crate::core::aggregate::task_status;
use crate::core::invariants::validate_backlog;
use crate::core::patch::{PatchSummary, apply_delta};
use crate::core::types::DeltaAnalysis;
use crate::error::PipelineError;
use crate::io::session::SessionStore;

/// Ids of completed tasks (aggregate) and completed subtasks, in document
/// order. Phases and milestones are never listed.
pub fn completed_item_ids(backlog: &Backlog) -> Vec<String> {
    let mut ids = Vec::new();
    for task in backlog.tasks() {
        if task_status(task) == Status::Complete {
            ids.push(task.id.clone());
        }
        ids.extend(
            task.subtasks
                .iter()
                .filter(|s| s.status == Status::Complete)
                .map(|s| s.id.clone()),
        );
    }
    ids
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaOutcome {
    pub analysis: DeltaAnalysis,
    pub summary: PatchSummary,
    /// Id of the session created for the new requirements.
    pub session_id: String,
}

pub struct DeltaEngine<'a, A: Agent + ?Sized> {
    agent: &'a A,
}

impl<'a, A: Agent + ?Sized> DeltaEngine<'a, A> {
    pub fn new(agent: &'a A) -> Self {
        Self { agent }
    }

    /// Analyze the change, patch a copy of the backlog, and only when the
    /// patched backlog is valid open a delta session holding it.
    #[instrument(skip_all)]
    pub fn run(&self, store: &mut SessionStore, new_requirements: &str) -> Result<DeltaOutcome> {
        let current = store.current()?;
        let completed_ids = completed_item_ids(&current.backlog);
        let item_ids = current.backlog.item_ids();
        let analysis = self
            .agent
            .analyze_delta(&DeltaRequest {
                old_requirements: &current.requirements_snapshot,
                new_requirements,
                completed_ids: &completed_ids,
                item_ids: &item_ids,
            })
            .context("analyze requirements delta")?;
        info!(
            changes = analysis.changes.len(),
            task_ids = analysis.task_ids.len(),
            additions = analysis.additions.len(),
            "delta analysis complete"
        );

        let mut backlog = current.backlog.clone();
        let summary = apply_delta(&mut backlog, &analysis);
        if !summary.unresolved.is_empty() {
            warn!(ids = ?summary.unresolved, "delta names items missing from the backlog");
        }
        if !summary.conflicting.is_empty() {
            warn!(ids = ?summary.conflicting, "delta additions reuse existing subtask ids");
        }
        let violations = validate_backlog(&backlog);
        if !violations.is_empty() {
            return Err(PipelineError::InvalidBacklog(violations))
                .context("patched backlog failed validation");
        }

        let session_id = store
            .create_delta_session(new_requirements, backlog)?
            .metadata
            .id
            .clone();
        info!(
            session_id = %session_id,
            reset = summary.reset.len(),
            obsoleted = summary.obsoleted.len(),
            added = summary.added.len(),
            "backlog patched"
        );
        Ok(DeltaOutcome {
            analysis,
            summary,
            session_id,
        })
    }
}
