//! Hierarchical item ids (`P1.M1.T1.S1`).
//!
//! An id's dot-prefix is always its parent's id, so lineage is recoverable
//! from the id alone.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Phase segment of synthesized bug-fix items; the only segment without digits.
pub const FIX_PHASE_ID: &str = "PFIX";

static SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]+[0-9]+$").expect("segment regex is valid"));

/// Backlog item kind, determined by id depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Phase,
    Milestone,
    Task,
    Subtask,
}

impl ItemKind {
    pub fn from_depth(depth: usize) -> Option<Self> {
        match depth {
            1 => Some(ItemKind::Phase),
            2 => Some(ItemKind::Milestone),
            3 => Some(ItemKind::Task),
            4 => Some(ItemKind::Subtask),
            _ => None,
        }
    }

    pub fn depth(self) -> usize {
        match self {
            ItemKind::Phase => 1,
            ItemKind::Milestone => 2,
            ItemKind::Task => 3,
            ItemKind::Subtask => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Phase => "phase",
            ItemKind::Milestone => "milestone",
            ItemKind::Task => "task",
            ItemKind::Subtask => "subtask",
        }
    }
}

/// Kind implied by the id's depth, if the id is well-formed.
pub fn kind_of(id: &str) -> Option<ItemKind> {
    if !is_well_formed(id) {
        return None;
    }
    ItemKind::from_depth(id.split('.').count())
}

/// Every segment matches `[A-Z]+[0-9]+` (the phase may also be `PFIX`) and
/// depth is 1..=4.
pub fn is_well_formed(id: &str) -> bool {
    let segments: Vec<&str> = id.split('.').collect();
    (1..=4).contains(&segments.len())
        && segments.iter().enumerate().all(|(idx, s)| {
            SEGMENT_RE.is_match(s) || (idx == 0 && *s == FIX_PHASE_ID)
        })
}

/// Parent id (dot-prefix), or `None` for a phase id.
pub fn parent_id(id: &str) -> Option<&str> {
    id.rfind('.').map(|idx| &id[..idx])
}

/// Fix-item task id for the `seq`-th bug (1-based): `PFIX.M1.T001`.
pub fn fix_task_id(seq: usize) -> String {
    format!("{FIX_PHASE_ID}.M1.T{seq:03}")
}
