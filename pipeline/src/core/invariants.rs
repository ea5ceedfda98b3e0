//! Structural invariants of a backlog not expressible via JSON Schema.

use std::collections::{HashMap, HashSet};

use crate::backlog::{Backlog, ItemRef};
use crate::core::item_id::{kind_of, parent_id};

/// Check backlog invariants:
/// - ids unique and well-formed for their depth
/// - every child id extends its parent's id by one segment (no orphans)
/// - every dependency names an existing item and is not the item itself
/// - the subtask dependency graph is acyclic
///
/// Returns stable error messages (empty on success).
pub fn validate_backlog(backlog: &Backlog) -> Vec<String> {
    let mut errors = Vec::new();
    let items = backlog.items();
    let mut seen = HashSet::new();

    for item in &items {
        let id = item.id();
        if !seen.insert(id) {
            errors.push(format!("duplicate id '{id}'"));
        }
        match kind_of(id) {
            Some(kind) if kind == item.kind() => {}
            Some(kind) => errors.push(format!(
                "'{id}' has {} depth but is stored as a {}",
                kind.as_str(),
                item.kind().as_str()
            )),
            None => errors.push(format!("malformed id '{id}'")),
        }
    }

    check_lineage(backlog, &mut errors);

    for subtask in backlog.subtasks() {
        for dep in &subtask.dependencies {
            if dep == &subtask.id {
                errors.push(format!("'{}' depends on itself", subtask.id));
            } else if !seen.contains(dep.as_str()) {
                errors.push(format!("'{}' depends on unknown id '{dep}'", subtask.id));
            }
        }
    }

    if let Some(cycle) = find_dependency_cycle(backlog) {
        errors.push(format!("dependency cycle: {}", cycle.join(" -> ")));
    }

    errors
}

/// Every non-root id whose dot-prefix does not resolve to an existing item.
pub fn orphaned_ids(backlog: &Backlog) -> Vec<String> {
    let ids: HashSet<String> = backlog.item_ids().into_iter().collect();
    let mut orphans: Vec<String> = ids
        .iter()
        .filter(|id| parent_id(id).is_some_and(|parent| !ids.contains(parent)))
        .cloned()
        .collect();
    orphans.sort();
    orphans
}

fn check_lineage(backlog: &Backlog, errors: &mut Vec<String>) {
    for phase in &backlog.backlog {
        for milestone in &phase.milestones {
            expect_parent(&ItemRef::Milestone(milestone), &phase.id, errors);
            for task in &milestone.tasks {
                expect_parent(&ItemRef::Task(task), &milestone.id, errors);
                for subtask in &task.subtasks {
                    expect_parent(&ItemRef::Subtask(subtask), &task.id, errors);
                }
            }
        }
    }
}

fn expect_parent(item: &ItemRef<'_>, container_id: &str, errors: &mut Vec<String>) {
    let id = item.id();
    if parent_id(id) != Some(container_id) {
        errors.push(format!(
            "'{id}' is nested under '{container_id}' but its id does not extend it"
        ));
    }
}

/// Depth-first search over subtask dependency edges. Dependencies on
/// containers expand to the container's subtasks.
fn find_dependency_cycle(backlog: &Backlog) -> Option<Vec<String>> {
    let mut edges: HashMap<&str, Vec<String>> = HashMap::new();
    for subtask in backlog.subtasks() {
        let mut targets = Vec::new();
        for dep in &subtask.dependencies {
            targets.extend(backlog.descendant_subtask_ids(dep));
        }
        edges.insert(subtask.id.as_str(), targets);
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        id: &'a str,
        edges: &'a HashMap<&'a str, Vec<String>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(id) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|s| *s == id).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(id.to_string());
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        stack.push(id);
        if let Some(targets) = edges.get(id) {
            for target in targets {
                if let Some(cycle) = visit(target.as_str(), edges, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(id, Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    let mut stack = Vec::new();
    for subtask in backlog.subtasks() {
        if let Some(cycle) = visit(subtask.id.as_str(), &edges, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{phase, sample_backlog, subtask};

    #[test]
    fn sample_backlog_is_valid() {
        assert!(validate_backlog(&sample_backlog()).is_empty());
        assert!(orphaned_ids(&sample_backlog()).is_empty());
    }

    #[test]
    fn reports_duplicate_and_misnested_ids() {
        let backlog = Backlog::new(vec![phase(
            "P1",
            vec![(
                "P1.M1",
                vec![(
                    "P1.M1.T1",
                    vec![subtask("P1.M1.T1.S1", &[]), subtask("P1.M1.T1.S1", &[])],
                ), ("P1.M1.T2", vec![subtask("P1.M1.T9.S1", &[])])],
            )],
        )]);

        let errors = validate_backlog(&backlog);
        assert!(errors.iter().any(|e| e.contains("duplicate id 'P1.M1.T1.S1'")));
        assert!(errors.iter().any(|e| e.contains("'P1.M1.T9.S1' is nested under 'P1.M1.T2'")));
        assert_eq!(orphaned_ids(&backlog), vec!["P1.M1.T9.S1".to_string()]);
    }

    #[test]
    fn reports_unknown_dependencies() {
        let backlog = Backlog::new(vec![phase(
            "P1",
            vec![("P1.M1", vec![("P1.M1.T1", vec![subtask("P1.M1.T1.S1", &["P9.M1"])])])],
        )]);

        let errors = validate_backlog(&backlog);
        assert_eq!(errors, vec!["'P1.M1.T1.S1' depends on unknown id 'P9.M1'".to_string()]);
    }

    #[test]
    fn detects_cycles_through_container_dependencies() {
        let backlog = Backlog::new(vec![phase(
            "P1",
            vec![(
                "P1.M1",
                vec![
                    ("P1.M1.T1", vec![subtask("P1.M1.T1.S1", &["P1.M1.T2"])]),
                    ("P1.M1.T2", vec![subtask("P1.M1.T2.S1", &["P1.M1.T1.S1"])]),
                ],
            )],
        )]);

        let errors = validate_backlog(&backlog);
        assert!(
            errors.iter().any(|e| e.starts_with("dependency cycle: P1.M1.T1.S1 -> P1.M1.T2.S1")),
            "{errors:?}"
        );
    }
}
