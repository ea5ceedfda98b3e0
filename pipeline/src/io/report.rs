//! `TEST_RESULTS.md`: the bug hunt report handed to the fix cycle.
//!
//! Despite the extension the body is the pretty JSON encoding of
//! [`TestResults`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use crate::core::types::TestResults;
use crate::error::PipelineError;
use crate::io::atomic::{to_pretty_json, write_atomic};
use crate::io::schema::{SchemaKind, schema_violations};

pub const REPORT_FILE_NAME: &str = "TEST_RESULTS.md";

pub fn report_path(session_dir: &Path) -> PathBuf {
    session_dir.join(REPORT_FILE_NAME)
}

pub fn write_test_results(session_dir: &Path, results: &TestResults) -> Result<PathBuf> {
    let path = report_path(session_dir);
    let buf = to_pretty_json(results).context("serialize test results")?;
    write_atomic(&path, buf.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    info!(path = %path.display(), bug_count = results.bugs.len(), "wrote test results");
    Ok(path)
}

/// Missing, unparsable, or schema-invalid reports are all fatal.
pub fn read_test_results(path: &Path) -> Result<TestResults> {
    let malformed = |reason: String| PipelineError::MalformedReport {
        path: path.to_path_buf(),
        reason,
    };
    let contents = fs::read_to_string(path).map_err(|err| malformed(format!("read: {err}")))?;
    let value: Value =
        serde_json::from_str(&contents).map_err(|err| malformed(format!("parse: {err}")))?;
    let violations = schema_violations(SchemaKind::TestResults, &value)?;
    if !violations.is_empty() {
        return Err(malformed(violations.join("; ")).into());
    }
    let results =
        serde_json::from_value(value).map_err(|err| malformed(format!("deserialize: {err}")))?;
    Ok(results)
}
