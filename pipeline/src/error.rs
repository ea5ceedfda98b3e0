//! Typed failures that callers distinguish with `anyhow::Error::downcast_ref`.
//!
//! Everything else propagates as plain `anyhow` context chains.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("session load failed for {path}: {reason}")]
    SessionCorrupt { path: PathBuf, reason: String },

    #[error("session {action} failed for {path}")]
    SessionIo {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no active session (initialize the session store first)")]
    NoActiveSession,

    #[error("malformed test results report {path}: {reason}")]
    MalformedReport { path: PathBuf, reason: String },

    #[error("orchestrator exceeded its safety cap of {cap} iterations")]
    SafetyCapExceeded { cap: u32 },

    #[error("bug fix tasks can only run inside a bugfix session (got {path})")]
    NotBugfixSession { path: PathBuf },

    #[error("invalid backlog:\n- {}", .0.join("\n- "))]
    InvalidBacklog(Vec<String>),

    #[error("invalid validation gates: {0}")]
    InvalidGates(String),
}

impl PipelineError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::SessionCorrupt { .. } => "SESSION_LOAD_FAILED",
            PipelineError::SessionIo { action, .. } if *action == "read" => "SESSION_LOAD_FAILED",
            PipelineError::SessionIo { .. } => "SESSION_SAVE_FAILED",
            PipelineError::NoActiveSession => "SESSION_NOT_FOUND",
            PipelineError::MalformedReport { .. } => "REPORT_INVALID",
            PipelineError::SafetyCapExceeded { .. } => "SAFETY_CAP_EXCEEDED",
            PipelineError::NotBugfixSession { .. } => "BUGFIX_SESSION_INVALID",
            PipelineError::InvalidBacklog(_) => "BACKLOG_INVALID",
            PipelineError::InvalidGates(_) => "VALIDATION_INVALID_INPUT",
        }
    }
}

/// Code of the first [`PipelineError`] in an error chain, if any.
pub fn error_code(err: &anyhow::Error) -> Option<&'static str> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
        .map(PipelineError::code)
}
