//! Deterministic selection of the next executable subtask.

use crate::backlog::{Backlog, Status, Subtask};
use crate::core::aggregate::aggregate_status;

/// First `Planned` subtask (document order) whose dependencies are all complete.
///
/// Returns `None` when nothing is eligible, which includes the case where the
/// remaining planned items are blocked on failed or missing dependencies.
pub fn next_ready_subtask(backlog: &Backlog) -> Option<&Subtask> {
    backlog
        .subtasks()
        .find(|s| s.status == Status::Planned && dependencies_complete(backlog, s))
}

/// True when every dependency of `subtask` resolves to a `Complete` or
/// `Obsolete` item.
///
/// Container dependencies use the aggregate of their subtasks, so a
/// dependency on a task is satisfied once all of its subtasks complete. An
/// obsolete dependency was removed from the requirements and gates nothing.
pub fn dependencies_complete(backlog: &Backlog, subtask: &Subtask) -> bool {
    subtask.dependencies.iter().all(|dep| {
        matches!(
            dependency_status(backlog, dep),
            Some(Status::Complete | Status::Obsolete)
        )
    })
}

fn dependency_status(backlog: &Backlog, id: &str) -> Option<Status> {
    if let Some(subtask) = backlog.find_subtask(id) {
        return Some(subtask.status);
    }
    backlog.find(id)?;
    let leaves = backlog.descendant_subtask_ids(id);
    Some(aggregate_status(
        leaves
            .iter()
            .filter_map(|leaf| backlog.find_subtask(leaf).map(|s| s.status)),
    ))
}

/// Planned subtasks that can never become eligible in this run.
pub fn blocked_subtasks(backlog: &Backlog) -> Vec<String> {
    backlog
        .subtasks()
        .filter(|s| s.status == Status::Planned && !dependencies_complete(backlog, s))
        .map(|s| s.id.clone())
        .collect()
}
