//! Container status derived from leaf statuses.

use crate::backlog::{Backlog, Status, Task};

/// Aggregate a container status from its children's statuses.
///
/// Obsolete children are ignored unless every child is obsolete. An empty
/// container stays `Planned`.
pub fn aggregate_status<I>(children: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let mut any = false;
    let mut live = 0usize;
    let mut complete = 0usize;
    let mut failed = false;
    let mut in_flight = false;

    for status in children {
        any = true;
        match status {
            Status::Obsolete => continue,
            Status::Complete => complete += 1,
            Status::Failed => failed = true,
            Status::Researching | Status::Implementing => in_flight = true,
            Status::Planned => {}
        }
        live += 1;
    }

    if !any {
        return Status::Planned;
    }
    if live == 0 {
        return Status::Obsolete;
    }
    if failed {
        return Status::Failed;
    }
    if complete == live {
        return Status::Complete;
    }
    if in_flight {
        return Status::Implementing;
    }
    Status::Planned
}

pub fn task_status(task: &Task) -> Status {
    aggregate_status(task.subtasks.iter().map(|s| s.status))
}

/// Rewrite every container's stored status from its leaves.
///
/// Milestones and phases aggregate their descendant subtasks directly, so an
/// empty child container does not hold its parent back.
///
/// Returns the ids whose status changed, in document order.
pub fn derive_container_statuses(backlog: &mut Backlog) -> Vec<String> {
    let mut changed = Vec::new();
    for phase in &mut backlog.backlog {
        for milestone in &mut phase.milestones {
            for task in &mut milestone.tasks {
                let derived = task_status(task);
                if task.status != derived {
                    task.status = derived;
                    changed.push(task.id.clone());
                }
            }
            let derived = aggregate_status(
                milestone
                    .tasks
                    .iter()
                    .flat_map(|t| t.subtasks.iter().map(|s| s.status)),
            );
            if milestone.status != derived {
                milestone.status = derived;
                changed.push(milestone.id.clone());
            }
        }
        let derived = aggregate_status(phase.milestones.iter().flat_map(|m| {
            m.tasks
                .iter()
                .flat_map(|t| t.subtasks.iter().map(|s| s.status))
        }));
        if phase.status != derived {
            phase.status = derived;
            changed.push(phase.id.clone());
        }
    }
    changed
}

/// True when every non-obsolete leaf is complete (and at least one exists).
pub fn all_leaves_complete(backlog: &Backlog) -> bool {
    let mut live = backlog
        .subtasks()
        .filter(|s| s.status != Status::Obsolete)
        .peekable();
    live.peek().is_some() && live.all(|s| s.status == Status::Complete)
}
