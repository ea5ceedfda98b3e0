//! Agent process backends.
//!
//! An [`Executor`] turns a prompt into a JSON document on disk. The default
//! backend spawns `codex exec`; tests script the output file directly.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow, bail};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::io::process::{CapturedOutput, RunLimits, run_command_with_timeout};
use crate::io::schema::{SchemaKind, schema_violations};

#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub workdir: PathBuf,
    pub prompt: String,
    /// JSON Schema the agent's final message must satisfy.
    pub output_schema_path: PathBuf,
    /// Where the agent writes its final JSON message.
    pub output_path: PathBuf,
    /// stdout/stderr transcript of the agent process.
    pub log_path: PathBuf,
    pub limits: RunLimits,
}

pub trait Executor {
    /// Run the agent to completion. Must leave output at `request.output_path`.
    fn exec(&self, request: &ExecRequest) -> Result<()>;
}

/// Spawns `codex exec` with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct CodexExecutor {
    program: String,
}

impl Default for CodexExecutor {
    fn default() -> Self {
        Self {
            program: "codex".to_string(),
        }
    }
}

impl Executor for CodexExecutor {
    #[instrument(skip_all, fields(timeout_secs = request.limits.timeout.as_secs()))]
    fn exec(&self, request: &ExecRequest) -> Result<()> {
        info!(workdir = %request.workdir.display(), "starting codex exec");
        if !request.output_schema_path.exists() {
            bail!(
                "missing output schema {}",
                request.output_schema_path.display()
            );
        }
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg("exec")
            .arg("--sandbox")
            .arg("workspace-write")
            .arg("--skip-git-repo-check")
            .arg("--output-schema")
            .arg(&request.output_schema_path)
            .arg("--output-last-message")
            .arg(&request.output_path)
            .arg("-")
            .current_dir(&request.workdir);

        let output = run_command_with_timeout(cmd, Some(request.prompt.as_bytes()), request.limits)
            .context("run codex exec")?;
        write_log(&request.log_path, &output)?;

        if output.timed_out {
            warn!(
                timeout_secs = request.limits.timeout.as_secs(),
                "codex exec timed out"
            );
            bail!("codex exec timed out after {:?}", request.limits.timeout);
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "codex exec failed");
            bail!("codex exec failed with status {:?}", output.status.code());
        }
        debug!("codex exec completed");
        Ok(())
    }
}

/// Run the executor, then parse and schema-check its output as `T`.
#[instrument(skip_all, fields(output_path = %request.output_path.display(), schema = schema.file_name()))]
pub fn execute_and_load_json<E: Executor + ?Sized, T: DeserializeOwned>(
    executor: &E,
    request: &ExecRequest,
    schema: SchemaKind,
) -> Result<T> {
    // Stale output from an earlier call must not be mistaken for this one.
    if request.output_path.exists() {
        fs::remove_file(&request.output_path).with_context(|| {
            format!("remove stale output {}", request.output_path.display())
        })?;
    }
    executor.exec(request)?;
    read_output_json(&request.output_path, schema)
}

fn read_output_json<T: DeserializeOwned>(path: &Path, schema: SchemaKind) -> Result<T> {
    if !path.exists() {
        return Err(anyhow!("missing executor output {}", path.display()));
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read agent output {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    let violations = schema_violations(schema, &value)?;
    if !violations.is_empty() {
        bail!(
            "agent output {} does not match {}: {}",
            path.display(),
            schema.file_name(),
            violations.join("; ")
        );
    }
    serde_json::from_value(value).with_context(|| format!("deserialize {}", path.display()))
}

fn write_log(path: &Path, output: &CapturedOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create executor log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&output.stdout_text());
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&output.stderr_text());
    if output.timed_out {
        buf.push_str("\n[executor timed out]\n");
    }
    fs::write(path, buf).with_context(|| format!("write executor log {}", path.display()))
}
