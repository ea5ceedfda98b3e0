//! Session directories under a plan dir: `NNN_<hash12>/session.json`.
//!
//! A session pairs a requirements snapshot with the backlog derived from it.
//! Changing the requirements creates a new session (delta) that inherits the
//! previous backlog and records its parent.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::backlog::{Backlog, Status};
use crate::core::aggregate::derive_container_statuses;
use crate::core::invariants::validate_backlog;
use crate::error::PipelineError;
use crate::io::atomic::{to_pretty_json, write_atomic};
use crate::io::schema::{SchemaKind, schema_violations};

pub const SESSION_FILE_NAME: &str = "session.json";
const HASH_PREFIX_LEN: usize = 12;

static SESSION_DIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{3,})_([0-9a-f]{12})$").expect("session dir regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Directory name, e.g. `003_b3d3efdaf0ed`.
    pub id: String,
    /// Hex SHA-256 of `requirements_snapshot`.
    pub content_hash: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub parent_session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub metadata: SessionMetadata,
    pub requirements_snapshot: String,
    pub backlog: Backlog,
    pub current_item_id: Option<String>,
}

impl SessionState {
    pub fn file_path(&self) -> PathBuf {
        self.metadata.path.join(SESSION_FILE_NAME)
    }
}

/// Lowercase hex SHA-256 of the requirements text.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

fn session_dir_name(seq: u32, hash: &str) -> String {
    format!("{seq:03}_{}", &hash[..HASH_PREFIX_LEN])
}

/// Session directories in `plan_dir`, ascending by sequence number.
pub fn list_session_dirs(plan_dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    if !plan_dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(plan_dir).map_err(|source| PipelineError::SessionIo {
        action: "read",
        path: plan_dir.to_path_buf(),
        source,
    })?;
    let mut dirs = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(caps) = name.to_str().and_then(|n| SESSION_DIR_RE.captures(n)) else {
            continue;
        };
        let Ok(seq) = caps[1].parse::<u32>() else {
            continue;
        };
        let path = entry.path();
        if path.join(SESSION_FILE_NAME).is_file() {
            dirs.push((seq, path));
        }
    }
    dirs.sort_by_key(|(seq, _)| *seq);
    Ok(dirs)
}

pub fn latest_session_dir(plan_dir: &Path) -> Result<Option<PathBuf>> {
    Ok(list_session_dirs(plan_dir)?.pop().map(|(_, path)| path))
}

/// Read and validate one session (schema, then backlog invariants).
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn load_session(dir: &Path) -> Result<SessionState> {
    let file = dir.join(SESSION_FILE_NAME);
    let contents = fs::read_to_string(&file).map_err(|source| PipelineError::SessionIo {
        action: "read",
        path: file.clone(),
        source,
    })?;
    let corrupt = |reason: String| PipelineError::SessionCorrupt {
        path: file.clone(),
        reason,
    };

    let value: Value =
        serde_json::from_str(&contents).map_err(|err| corrupt(format!("parse: {err}")))?;
    let violations = schema_violations(SchemaKind::Session, &value)?;
    if !violations.is_empty() {
        return Err(corrupt(format!("schema: {}", violations.join("; "))).into());
    }
    let mut state: SessionState =
        serde_json::from_value(value).map_err(|err| corrupt(format!("deserialize: {err}")))?;
    let errors = validate_backlog(&state.backlog);
    if !errors.is_empty() {
        return Err(corrupt(format!("backlog: {}", errors.join("; "))).into());
    }
    state.metadata.path = dir.to_path_buf();
    debug!(session_id = %state.metadata.id, "loaded session");
    Ok(state)
}

fn persist(state: &SessionState) -> Result<()> {
    let path = state.file_path();
    let buf = to_pretty_json(state).map_err(|err| PipelineError::SessionCorrupt {
        path: path.clone(),
        reason: format!("serialize: {err}"),
    })?;
    write_atomic(&path, buf.as_bytes()).map_err(|source| PipelineError::SessionIo {
        action: "write",
        path,
        source,
    })?;
    Ok(())
}

/// Owns the current session of one plan directory.
#[derive(Debug)]
pub struct SessionStore {
    plan_dir: PathBuf,
    current: Option<SessionState>,
    fresh: bool,
}

impl SessionStore {
    pub fn new(plan_dir: impl Into<PathBuf>) -> Self {
        Self {
            plan_dir: plan_dir.into(),
            current: None,
            fresh: false,
        }
    }

    pub fn plan_dir(&self) -> &Path {
        &self.plan_dir
    }

    /// Load the latest session, or create `001_<hash>` with an empty backlog.
    ///
    /// Leaves left in flight by an interrupted run are reset to `Planned`.
    #[instrument(skip_all, fields(plan_dir = %self.plan_dir.display()))]
    pub fn initialize(&mut self, requirements: &str) -> Result<&SessionState> {
        match latest_session_dir(&self.plan_dir)? {
            Some(dir) => {
                let mut state = load_session(&dir)?;
                let reset = reset_in_flight(&mut state.backlog);
                if !reset.is_empty() {
                    warn!(items = ?reset, "resetting interrupted items to Planned");
                    state.current_item_id = None;
                    persist(&state)?;
                }
                info!(session_id = %state.metadata.id, "resumed session");
                self.fresh = false;
                self.current = Some(state);
            }
            None => {
                self.create_session(requirements, None)?;
                self.fresh = true;
            }
        }
        self.current()
    }

    /// True when `initialize` created the session instead of loading one.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn current(&self) -> Result<&SessionState> {
        Ok(self.current.as_ref().ok_or(PipelineError::NoActiveSession)?)
    }

    pub fn backlog(&self) -> Result<&Backlog> {
        Ok(&self.current()?.backlog)
    }

    /// Mutable backlog access; call [`SessionStore::save`] to persist.
    pub fn backlog_mut(&mut self) -> Result<&mut Backlog> {
        Ok(&mut self
            .current
            .as_mut()
            .ok_or(PipelineError::NoActiveSession)?
            .backlog)
    }

    pub fn has_changed(&self, requirements: &str) -> Result<bool> {
        Ok(self.current()?.metadata.content_hash != content_hash(requirements))
    }

    /// Create, persist, and switch to a new session in this plan dir.
    pub fn create_session(
        &mut self,
        requirements: &str,
        parent_session_id: Option<String>,
    ) -> Result<&SessionState> {
        self.create_with_backlog(requirements, parent_session_id, Backlog::default())
    }

    /// New session for changed requirements, child of the current one.
    ///
    /// `backlog` is the current backlog, already patched for the change.
    #[instrument(skip_all)]
    pub fn create_delta_session(
        &mut self,
        requirements: &str,
        backlog: Backlog,
    ) -> Result<&SessionState> {
        let parent_id = self.current()?.metadata.id.clone();
        self.create_with_backlog(requirements, Some(parent_id), backlog)
    }

    fn create_with_backlog(
        &mut self,
        requirements: &str,
        parent_session_id: Option<String>,
        backlog: Backlog,
    ) -> Result<&SessionState> {
        let seq = list_session_dirs(&self.plan_dir)?
            .last()
            .map_or(1, |(seq, _)| seq + 1);
        let hash = content_hash(requirements);
        let id = session_dir_name(seq, &hash);
        let state = SessionState {
            metadata: SessionMetadata {
                id: id.clone(),
                content_hash: hash,
                path: self.plan_dir.join(&id),
                created_at: Utc::now(),
                parent_session_id,
            },
            requirements_snapshot: requirements.to_string(),
            backlog,
            current_item_id: None,
        };
        persist(&state)?;
        info!(session_id = %id, parent = ?state.metadata.parent_session_id, "created session");
        Ok(&*self.current.insert(state))
    }

    /// Replace the backlog and persist.
    pub fn save_backlog(&mut self, backlog: Backlog) -> Result<()> {
        *self.backlog_mut()? = backlog;
        self.save()
    }

    pub fn set_current_item(&mut self, item_id: Option<&str>) -> Result<()> {
        let state = self.current.as_mut().ok_or(PipelineError::NoActiveSession)?;
        state.current_item_id = item_id.map(str::to_string);
        self.save()
    }

    /// Atomically persist the current session.
    pub fn save(&self) -> Result<()> {
        persist(self.current()?)
    }
}

fn reset_in_flight(backlog: &mut Backlog) -> Vec<String> {
    let mut reset = Vec::new();
    for subtask in backlog.subtasks_mut() {
        if subtask.status.is_in_flight() {
            subtask.status = Status::Planned;
            reset.push(subtask.id.clone());
        }
    }
    if !reset.is_empty() {
        derive_container_statuses(backlog);
    }
    reset
}
