//! Apply a [`DeltaAnalysis`] to an existing backlog in place.
//!
//! Only items named by the analysis change; every other subtree keeps its
//! statuses and structure. Added work is spliced in under existing
//! containers and never replaces an item that already exists.

use crate::backlog::{Backlog, Milestone, Phase, Status, Subtask, Task};
use crate::core::aggregate::derive_container_statuses;
use crate::core::types::{ChangeType, DeltaAnalysis};

/// What the patch did, ids in deterministic (sorted) order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSummary {
    /// Subtasks reset to `Planned` for re-execution.
    pub reset: Vec<String>,
    /// Subtasks marked `Obsolete` because their requirement was removed.
    pub obsoleted: Vec<String>,
    /// Subtasks appended from `additions`, all `Planned`.
    pub added: Vec<String>,
    /// Addition subtasks whose id was already taken; the existing item is kept.
    pub conflicting: Vec<String>,
    /// Ids named by the analysis that do not exist in the backlog.
    pub unresolved: Vec<String>,
}

impl PatchSummary {
    pub fn is_noop(&self) -> bool {
        self.reset.is_empty() && self.obsoleted.is_empty() && self.added.is_empty()
    }
}

/// Patch `backlog` according to `analysis`.
///
/// - `additions` are merged first, so changes may name the new items
/// - ids in `task_ids`, and `added`/`modified` changes, reset the item and
///   its descendant subtasks to `Planned`
/// - `removed` changes mark the item and its descendants `Obsolete`
/// - removal wins over a reset of the same subtask
pub fn apply_delta(backlog: &mut Backlog, analysis: &DeltaAnalysis) -> PatchSummary {
    let mut summary = PatchSummary::default();
    splice_additions(backlog, &analysis.additions, &mut summary);
    summary.added.sort();
    summary.conflicting.sort();

    let mut to_reset = Vec::new();
    let mut to_obsolete = Vec::new();

    let resolve = |id: &str, target: &mut Vec<String>, unresolved: &mut Vec<String>| {
        if backlog.find(id).is_none() {
            unresolved.push(id.to_string());
            return;
        }
        target.extend(backlog.descendant_subtask_ids(id));
    };

    for id in &analysis.task_ids {
        resolve(id, &mut to_reset, &mut summary.unresolved);
    }
    for change in &analysis.changes {
        match change.change_type {
            ChangeType::Removed => {
                resolve(&change.item_id, &mut to_obsolete, &mut summary.unresolved);
            }
            ChangeType::Added | ChangeType::Modified => {
                resolve(&change.item_id, &mut to_reset, &mut summary.unresolved);
            }
        }
    }

    to_obsolete.sort();
    to_obsolete.dedup();
    to_reset.sort();
    to_reset.dedup();
    to_reset.retain(|id| to_obsolete.binary_search(id).is_err());

    for id in &to_obsolete {
        backlog.set_subtask_status(id, Status::Obsolete);
    }
    for id in &to_reset {
        backlog.set_subtask_status(id, Status::Planned);
    }
    derive_container_statuses(backlog);

    summary.unresolved.sort();
    summary.unresolved.dedup();
    summary.reset = to_reset;
    summary.obsoleted = to_obsolete;
    summary
}

fn splice_additions(backlog: &mut Backlog, additions: &[Phase], summary: &mut PatchSummary) {
    for phase in additions {
        match backlog.backlog.iter_mut().find(|p| p.id == phase.id) {
            Some(existing) => {
                for milestone in &phase.milestones {
                    splice_milestone(existing, milestone, summary);
                }
            }
            None => backlog.backlog.push(planned_phase(phase, summary)),
        }
    }
}

fn splice_milestone(phase: &mut Phase, milestone: &Milestone, summary: &mut PatchSummary) {
    match phase.milestones.iter_mut().find(|m| m.id == milestone.id) {
        Some(existing) => {
            for task in &milestone.tasks {
                splice_task(existing, task, summary);
            }
        }
        None => phase
            .milestones
            .push(planned_milestone(milestone, summary)),
    }
}

fn splice_task(milestone: &mut Milestone, task: &Task, summary: &mut PatchSummary) {
    match milestone.tasks.iter_mut().find(|t| t.id == task.id) {
        Some(existing) => {
            for subtask in &task.subtasks {
                if existing.subtasks.iter().any(|s| s.id == subtask.id) {
                    summary.conflicting.push(subtask.id.clone());
                } else {
                    existing.subtasks.push(planned_subtask(subtask, summary));
                }
            }
        }
        None => milestone.tasks.push(planned_task(task, summary)),
    }
}

fn planned_phase(phase: &Phase, summary: &mut PatchSummary) -> Phase {
    Phase {
        status: Status::Planned,
        milestones: phase
            .milestones
            .iter()
            .map(|m| planned_milestone(m, summary))
            .collect(),
        ..phase.clone()
    }
}

fn planned_milestone(milestone: &Milestone, summary: &mut PatchSummary) -> Milestone {
    Milestone {
        status: Status::Planned,
        tasks: milestone
            .tasks
            .iter()
            .map(|t| planned_task(t, summary))
            .collect(),
        ..milestone.clone()
    }
}

fn planned_task(task: &Task, summary: &mut PatchSummary) -> Task {
    Task {
        status: Status::Planned,
        subtasks: task
            .subtasks
            .iter()
            .map(|s| planned_subtask(s, summary))
            .collect(),
        ..task.clone()
    }
}

fn planned_subtask(subtask: &Subtask, summary: &mut PatchSummary) -> Subtask {
    summary.added.push(subtask.id.clone());
    Subtask {
        status: Status::Planned,
        ..subtask.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RequirementChange;
    use crate::core::invariants::validate_backlog;
    use crate::test_support::{phase, sample_backlog, subtask};

    fn change(item_id: &str, change_type: ChangeType) -> RequirementChange {
        RequirementChange {
            item_id: item_id.to_string(),
            change_type,
            description: format!("{item_id} changed"),
            impact: "re-run".to_string(),
        }
    }

    fn completed_sample() -> Backlog {
        let mut backlog = sample_backlog();
        for id in ["P1.M1.T1.S1", "P1.M1.T1.S2", "P1.M1.T2.S1"] {
            backlog.set_subtask_status(id, Status::Complete);
        }
        derive_container_statuses(&mut backlog);
        backlog
    }

    /// A task id in `task_ids` resets all its subtasks; siblings stay complete.
    #[test]
    fn resets_named_task_and_preserves_untouched_items() {
        let mut backlog = completed_sample();
        let analysis = DeltaAnalysis {
            changes: vec![change("P1.M1.T1", ChangeType::Modified)],
            patch_instructions: "redo T1".to_string(),
            task_ids: vec!["P1.M1.T1".to_string()],
            additions: Vec::new(),
        };

        let summary = apply_delta(&mut backlog, &analysis);
        assert_eq!(summary.reset, vec!["P1.M1.T1.S1", "P1.M1.T1.S2"]);
        assert_eq!(backlog.status_of("P1.M1.T1.S1"), Some(Status::Planned));
        assert_eq!(backlog.status_of("P1.M1.T2.S1"), Some(Status::Complete));
        assert_eq!(backlog.status_of("P1.M1.T2"), Some(Status::Complete));
        assert_eq!(backlog.status_of("P1.M1"), Some(Status::Planned));
        assert_eq!(backlog.item_count(), sample_backlog().item_count());
    }

    #[test]
    fn removed_requirements_become_obsolete() {
        let mut backlog = completed_sample();
        let analysis = DeltaAnalysis {
            changes: vec![change("P1.M1.T2", ChangeType::Removed)],
            patch_instructions: String::new(),
            task_ids: vec!["P1.M1.T2.S1".to_string()],
            additions: Vec::new(),
        };

        let summary = apply_delta(&mut backlog, &analysis);
        assert_eq!(summary.obsoleted, vec!["P1.M1.T2.S1"]);
        assert!(summary.reset.is_empty());
        assert_eq!(backlog.status_of("P1.M1.T2"), Some(Status::Obsolete));
        assert_eq!(backlog.status_of("P1.M1"), Some(Status::Complete));
    }

    #[test]
    fn unknown_ids_are_reported_not_invented() {
        let mut backlog = completed_sample();
        let before = backlog.clone();
        let analysis = DeltaAnalysis {
            changes: vec![change("P2.M1", ChangeType::Added)],
            patch_instructions: String::new(),
            task_ids: vec!["P2.M1".to_string()],
            additions: Vec::new(),
        };

        let summary = apply_delta(&mut backlog, &analysis);
        assert!(summary.is_noop());
        assert_eq!(summary.unresolved, vec!["P2.M1"]);
        assert_eq!(backlog, before);
    }

    /// New subtasks land under existing containers as `Planned`; completed
    /// siblings keep their status and an existing subtask is never replaced.
    #[test]
    fn added_work_is_spliced_under_existing_containers() {
        let mut backlog = completed_sample();
        let mut clash = subtask("P1.M1.T2.S1", &[]);
        clash.title = "replacement".to_string();
        let analysis = DeltaAnalysis {
            changes: vec![change("P1.M1.T3", ChangeType::Added)],
            patch_instructions: "add CSV export".to_string(),
            task_ids: Vec::new(),
            additions: vec![
                phase(
                    "P1",
                    vec![(
                        "P1.M1",
                        vec![
                            ("P1.M1.T2", vec![clash, subtask("P1.M1.T2.S2", &["P1.M1.T2.S1"])]),
                            ("P1.M1.T3", vec![subtask("P1.M1.T3.S1", &["P1.M1.T1"])]),
                        ],
                    )],
                ),
                phase("P2", vec![("P2.M1", vec![("P2.M1.T1", vec![subtask("P2.M1.T1.S1", &[])])])]),
            ],
        };

        let summary = apply_delta(&mut backlog, &analysis);

        assert_eq!(summary.added, vec!["P1.M1.T2.S2", "P1.M1.T3.S1", "P2.M1.T1.S1"]);
        assert_eq!(summary.conflicting, vec!["P1.M1.T2.S1"]);
        assert_eq!(summary.reset, vec!["P1.M1.T3.S1"]);
        assert!(summary.unresolved.is_empty());
        assert!(!summary.is_noop());

        assert_eq!(backlog.status_of("P1.M1.T1.S1"), Some(Status::Complete));
        assert_eq!(backlog.status_of("P1.M1.T1"), Some(Status::Complete));
        assert_eq!(backlog.status_of("P1.M1.T2.S1"), Some(Status::Complete));
        assert_eq!(
            backlog.find_subtask("P1.M1.T2.S1").map(|s| s.title.as_str()),
            Some("Subtask P1.M1.T2.S1")
        );
        assert_eq!(backlog.status_of("P1.M1.T2.S2"), Some(Status::Planned));
        assert_eq!(backlog.status_of("P1.M1.T2"), Some(Status::Planned));
        assert_eq!(backlog.status_of("P1.M1.T3.S1"), Some(Status::Planned));
        assert_eq!(backlog.status_of("P2"), Some(Status::Planned));
        assert_eq!(backlog.leaf_count(), 6);
        assert!(validate_backlog(&backlog).is_empty());
    }

    #[test]
    fn added_items_are_planned_whatever_status_they_arrive_with() {
        let mut backlog = completed_sample();
        let mut done = subtask("P1.M1.T3.S1", &[]);
        done.status = Status::Complete;
        let mut fragment = phase("P1", vec![("P1.M1", vec![("P1.M1.T3", vec![done])])]);
        fragment.milestones[0].tasks[0].status = Status::Complete;
        let analysis = DeltaAnalysis {
            changes: Vec::new(),
            patch_instructions: String::new(),
            task_ids: Vec::new(),
            additions: vec![fragment],
        };

        apply_delta(&mut backlog, &analysis);
        assert_eq!(backlog.status_of("P1.M1.T3.S1"), Some(Status::Planned));
        assert_eq!(backlog.status_of("P1.M1.T3"), Some(Status::Planned));
        assert_eq!(backlog.status_of("P1.M1"), Some(Status::Planned));
    }
}
