//! Thin wrapper around `git` subprocess calls in the target workspace.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, instrument};

/// Parsed `git status --porcelain=v1` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    /// Two-letter XY code, `??` for untracked.
    pub code: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn is_repo(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"])
            .is_ok_and(|out| out.status.success())
    }

    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        out.lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_status_line)
            .collect()
    }

    /// Unified diff of the worktree (or the index when `staged`), optionally
    /// limited to `paths`.
    pub fn diff(&self, staged: bool, paths: &[String]) -> Result<String> {
        let mut args = vec!["diff"];
        if staged {
            args.push("--cached");
        }
        if !paths.is_empty() {
            args.push("--");
            args.extend(paths.iter().map(String::as_str));
        }
        self.run_capture(&args)
    }

    /// Stage `paths`, or everything when `paths` is empty.
    pub fn add(&self, paths: &[String]) -> Result<()> {
        let mut args = vec!["add"];
        if paths.is_empty() {
            args.push("-A");
        } else {
            args.push("--");
            args.extend(paths.iter().map(String::as_str));
        }
        self.run_checked(&args)?;
        Ok(())
    }

    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run_capture(&["diff", "--cached", "--name-only"])?;
        Ok(!out.trim().is_empty())
    }

    /// Commit staged changes. Returns false (and does nothing) when nothing
    /// is staged.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        self.run_checked(&["commit", "-m", message])?;
        debug!("committed staged changes");
        Ok(true)
    }

    pub fn head_short_sha(&self) -> Result<String> {
        Ok(self
            .run_capture(&["rev-parse", "--short=12", "HEAD"])?
            .trim()
            .to_string())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 || !line.is_char_boundary(3) {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let path = line[3..].trim();
    let path = path.split_once(" -> ").map_or(path, |(_, new)| new.trim());
    Ok(StatusEntry {
        code: line[..2].to_string(),
        path: path.to_string(),
    })
}
