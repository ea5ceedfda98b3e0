//! Fix-cycle completion predicate and fix work-item synthesis.

use crate::backlog::{Backlog, Milestone, Phase, Status, Subtask, Task};
use crate::core::item_id::{FIX_PHASE_ID, fix_task_id};
use crate::core::types::{Bug, TestResults};

pub const FIX_MILESTONE_ID: &str = "PFIX.M1";
const LOCATION_PLACEHOLDER: &str = "Not specified";

/// Done when results exist and contain no critical or major bug.
pub fn check_complete(results: Option<&TestResults>) -> bool {
    match results {
        None => false,
        Some(results) => !results.has_blocking_bugs(),
    }
}

/// One `PFIX.M1.T{seq}.S1` subtask per bug, in report order.
pub fn synthesize_fix_backlog(results: &TestResults) -> Backlog {
    let tasks = results
        .bugs
        .iter()
        .enumerate()
        .map(|(idx, bug)| fix_task(idx + 1, bug))
        .collect();

    Backlog::new(vec![Phase {
        id: FIX_PHASE_ID.to_string(),
        title: "Bug fixes".to_string(),
        status: Status::Planned,
        description: results.summary.clone(),
        milestones: vec![Milestone {
            id: FIX_MILESTONE_ID.to_string(),
            title: "Resolve bug hunt findings".to_string(),
            status: Status::Planned,
            description: format!("{} reported bug(s)", results.bugs.len()),
            tasks,
        }],
    }])
}

fn fix_task(seq: usize, bug: &Bug) -> Task {
    let task_id = fix_task_id(seq);
    let title = format!("Fix {}: {}", bug.id, bug.title);
    Task {
        id: task_id.clone(),
        title: title.clone(),
        status: Status::Planned,
        description: bug.description.clone(),
        subtasks: vec![Subtask {
            id: format!("{task_id}.S1"),
            title,
            status: Status::Planned,
            story_points: bug.severity.story_points(),
            dependencies: Vec::new(),
            context_scope: fix_context_scope(bug),
        }],
    }
}

/// Context handed to the implementing agent for one bug.
pub fn fix_context_scope(bug: &Bug) -> String {
    let location = bug
        .location
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or(LOCATION_PLACEHOLDER);
    format!(
        "Bug ID: {}\nSeverity: {}\nDescription: {}\nReproduction:\n{}\nLocation: {}\n",
        bug.id,
        bug.severity.as_str(),
        bug.description,
        bug.reproduction,
        location
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::invariants::validate_backlog;
    use crate::core::types::Severity;
    use crate::test_support::{bug, test_results};

    #[test]
    fn absent_results_are_not_complete() {
        assert!(!check_complete(None));
    }

    #[test]
    fn blocking_severities_prevent_completion() {
        let critical = test_results(&[Severity::Critical]);
        let major = test_results(&[Severity::Minor, Severity::Major]);
        assert!(!check_complete(Some(&critical)));
        assert!(!check_complete(Some(&major)));
    }

    #[test]
    fn empty_or_minor_results_are_complete() {
        assert!(check_complete(Some(&test_results(&[]))));
        assert!(check_complete(Some(&test_results(&[
            Severity::Minor,
            Severity::Cosmetic
        ]))));
    }

    #[test]
    fn fix_items_follow_id_pattern_and_severity_points() {
        let results = test_results(&[Severity::Critical, Severity::Cosmetic]);
        let backlog = synthesize_fix_backlog(&results);

        let subtasks: Vec<(&str, u32)> = backlog
            .subtasks()
            .map(|s| (s.id.as_str(), s.story_points))
            .collect();
        assert_eq!(
            subtasks,
            vec![("PFIX.M1.T001.S1", 13), ("PFIX.M1.T002.S1", 1)]
        );
        assert!(validate_backlog(&backlog).is_empty());
    }

    #[test]
    fn context_scope_embeds_bug_details() {
        let mut with_location = bug("BUG-7", Severity::Major);
        with_location.location = Some("src/lib.rs:42".to_string());
        let scope = fix_context_scope(&with_location);
        assert!(scope.contains("Bug ID: BUG-7"));
        assert!(scope.contains(&with_location.reproduction));
        assert!(scope.contains("Location: src/lib.rs:42"));

        let scope = fix_context_scope(&bug("BUG-8", Severity::Minor));
        assert!(scope.contains("Location: Not specified"));
    }
}
