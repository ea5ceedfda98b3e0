//! Hierarchical backlog: Phase → Milestone → Task → Subtask.
//!
//! Only subtasks are executed. Container statuses are aggregates of their
//! leaves (see [`crate::core::aggregate`]).

use serde::{Deserialize, Serialize};

use crate::core::item_id::ItemKind;

/// Status vocabulary shared by every backlog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Planned,
    Researching,
    Implementing,
    Complete,
    Failed,
    Obsolete,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Planned => "Planned",
            Status::Researching => "Researching",
            Status::Implementing => "Implementing",
            Status::Complete => "Complete",
            Status::Failed => "Failed",
            Status::Obsolete => "Obsolete",
        }
    }

    /// True for statuses that mark work started but not finished.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Status::Researching | Status::Implementing)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backlog {
    pub backlog: Vec<Phase>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Phase {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub description: String,
    pub milestones: Vec<Milestone>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Milestone {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub description: String,
    pub tasks: Vec<Task>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub description: String,
    pub subtasks: Vec<Subtask>,
}

/// The executable unit of work.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub story_points: u32,
    pub dependencies: Vec<String>,
    pub context_scope: String,
}

/// Borrowed view of any backlog item, used by traversal helpers.
#[derive(Debug, Clone, Copy)]
pub enum ItemRef<'a> {
    Phase(&'a Phase),
    Milestone(&'a Milestone),
    Task(&'a Task),
    Subtask(&'a Subtask),
}

impl<'a> ItemRef<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            ItemRef::Phase(p) => &p.id,
            ItemRef::Milestone(m) => &m.id,
            ItemRef::Task(t) => &t.id,
            ItemRef::Subtask(s) => &s.id,
        }
    }

    pub fn title(&self) -> &'a str {
        match self {
            ItemRef::Phase(p) => &p.title,
            ItemRef::Milestone(m) => &m.title,
            ItemRef::Task(t) => &t.title,
            ItemRef::Subtask(s) => &s.title,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            ItemRef::Phase(p) => p.status,
            ItemRef::Milestone(m) => m.status,
            ItemRef::Task(t) => t.status,
            ItemRef::Subtask(s) => s.status,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            ItemRef::Phase(_) => ItemKind::Phase,
            ItemRef::Milestone(_) => ItemKind::Milestone,
            ItemRef::Task(_) => ItemKind::Task,
            ItemRef::Subtask(_) => ItemKind::Subtask,
        }
    }
}

impl Backlog {
    pub fn new(phases: Vec<Phase>) -> Self {
        Self { backlog: phases }
    }

    pub fn is_empty(&self) -> bool {
        self.backlog.is_empty()
    }

    /// All items in document order (pre-order: container before children).
    pub fn items(&self) -> Vec<ItemRef<'_>> {
        let mut items = Vec::new();
        for phase in &self.backlog {
            items.push(ItemRef::Phase(phase));
            for milestone in &phase.milestones {
                items.push(ItemRef::Milestone(milestone));
                for task in &milestone.tasks {
                    items.push(ItemRef::Task(task));
                    for subtask in &task.subtasks {
                        items.push(ItemRef::Subtask(subtask));
                    }
                }
            }
        }
        items
    }

    /// All subtasks in document order.
    pub fn subtasks(&self) -> impl Iterator<Item = &Subtask> {
        self.backlog
            .iter()
            .flat_map(|p| &p.milestones)
            .flat_map(|m| &m.tasks)
            .flat_map(|t| &t.subtasks)
    }

    pub fn subtasks_mut(&mut self) -> impl Iterator<Item = &mut Subtask> {
        self.backlog
            .iter_mut()
            .flat_map(|p| &mut p.milestones)
            .flat_map(|m| &mut m.tasks)
            .flat_map(|t| &mut t.subtasks)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.backlog
            .iter()
            .flat_map(|p| &p.milestones)
            .flat_map(|m| &m.tasks)
    }

    pub fn subtasks_with_status(&self, status: Status) -> Vec<&Subtask> {
        self.subtasks().filter(|s| s.status == status).collect()
    }

    pub fn find(&self, id: &str) -> Option<ItemRef<'_>> {
        self.items().into_iter().find(|item| item.id() == id)
    }

    pub fn find_subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks().find(|s| s.id == id)
    }

    pub fn find_subtask_mut(&mut self, id: &str) -> Option<&mut Subtask> {
        self.subtasks_mut().find(|s| s.id == id)
    }

    pub fn status_of(&self, id: &str) -> Option<Status> {
        self.find(id).map(|item| item.status())
    }

    /// Set a leaf's status. Returns false if no subtask has `id`.
    pub fn set_subtask_status(&mut self, id: &str, status: Status) -> bool {
        match self.find_subtask_mut(id) {
            Some(subtask) => {
                subtask.status = status;
                true
            }
            None => false,
        }
    }

    pub fn item_ids(&self) -> Vec<String> {
        self.items()
            .iter()
            .map(|item| item.id().to_string())
            .collect()
    }

    pub fn item_count(&self) -> usize {
        self.items().len()
    }

    pub fn leaf_count(&self) -> usize {
        self.subtasks().count()
    }

    /// Subtasks at or below `id` (the item itself when it is a subtask).
    pub fn descendant_subtask_ids(&self, id: &str) -> Vec<String> {
        let prefix = format!("{id}.");
        self.subtasks()
            .filter(|s| s.id == id || s.id.starts_with(&prefix))
            .map(|s| s.id.clone())
            .collect()
    }
}
