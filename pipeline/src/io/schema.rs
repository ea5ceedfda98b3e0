//! JSON Schemas (Draft 2020-12) embedded at build time.
//!
//! The same files constrain agent output (`codex exec --output-schema`) and
//! validate artifacts read back from disk.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jsonschema::Draft;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Session,
    Backlog,
    TestResults,
    DeltaAnalysis,
    Implementation,
    Findings,
}

impl SchemaKind {
    pub fn file_name(self) -> &'static str {
        match self {
            SchemaKind::Session => "session.schema.json",
            SchemaKind::Backlog => "backlog.schema.json",
            SchemaKind::TestResults => "test_results.schema.json",
            SchemaKind::DeltaAnalysis => "delta_analysis.schema.json",
            SchemaKind::Implementation => "implementation.schema.json",
            SchemaKind::Findings => "findings.schema.json",
        }
    }

    pub fn source(self) -> &'static str {
        match self {
            SchemaKind::Session => include_str!("../../schemas/session.schema.json"),
            SchemaKind::Backlog => include_str!("../../schemas/backlog.schema.json"),
            SchemaKind::TestResults => include_str!("../../schemas/test_results.schema.json"),
            SchemaKind::DeltaAnalysis => include_str!("../../schemas/delta_analysis.schema.json"),
            SchemaKind::Implementation => {
                include_str!("../../schemas/implementation.schema.json")
            }
            SchemaKind::Findings => include_str!("../../schemas/findings.schema.json"),
        }
    }
}

/// Every violation of `kind` in `instance`; empty when valid.
///
/// `Err` only when the embedded schema itself does not compile.
pub fn schema_violations(kind: SchemaKind, instance: &Value) -> Result<Vec<String>> {
    let schema: Value = serde_json::from_str(kind.source())
        .with_context(|| format!("parse embedded schema {}", kind.file_name()))?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .with_context(|| format!("compile json schema {}", kind.file_name()))?;
    Ok(compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect())
}

/// Write the schema file into `dir` so an external agent can read it.
pub fn materialize(kind: SchemaKind, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create schema dir {}", dir.display()))?;
    let path = dir.join(kind.file_name());
    fs::write(&path, kind.source()).with_context(|| format!("write schema {}", path.display()))?;
    Ok(path)
}
