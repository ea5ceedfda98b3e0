//! Sandboxed workspace tools exposed to agents by name.
//!
//! Every tool takes a JSON object of arguments and answers with a JSON
//! document. Paths are relative to the registry root and may not leave it,
//! neither lexically nor through a symlink.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::io::gates::split_command;
use crate::io::git::Git;
use crate::io::process::{RunLimits, run_command_with_timeout};

pub const TOOL_NAMES: [&str; 9] = [
    "bash",
    "file_read",
    "file_write",
    "file_glob",
    "file_search",
    "git_status",
    "git_diff",
    "git_add",
    "git_commit",
];

const MAX_SEARCH_MATCHES: usize = 200;
const MAX_BASH_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// JSON-encoded result document.
    pub content: String,
}

impl ToolOutput {
    fn json(value: &Value) -> Result<Self> {
        Ok(Self {
            content: serde_json::to_string(value).context("encode tool output")?,
        })
    }

    pub fn value(&self) -> Result<Value> {
        serde_json::from_str(&self.content).context("decode tool output")
    }
}

#[derive(Debug, Serialize)]
struct SearchMatch {
    path: String,
    line: usize,
    text: String,
}

#[derive(Debug, Clone)]
pub struct ToolRegistry {
    root: PathBuf,
    limits: RunLimits,
}

impl ToolRegistry {
    /// `limits` bound `bash`; a call may ask for a shorter or longer timeout
    /// up to ten minutes.
    pub fn new(root: impl Into<PathBuf>, limits: RunLimits) -> Self {
        Self {
            root: root.into(),
            limits,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    #[instrument(skip(self, args), fields(root = %self.root.display()))]
    pub fn execute_tool(&self, name: &str, args: &Value) -> Result<ToolOutput> {
        debug!(tool = name, "executing tool");
        let value = match name {
            "bash" => self.bash(args)?,
            "file_read" => self.file_read(args)?,
            "file_write" => self.file_write(args)?,
            "file_glob" => self.file_glob(args)?,
            "file_search" => self.file_search(args)?,
            "git_status" => json!({ "entries": self.git().status_porcelain()? }),
            "git_diff" => json!({
                "diff": self.git().diff(opt_bool(args, "staged"), &self.paths_arg(args)?)?
            }),
            "git_add" => {
                let paths = self.paths_arg(args)?;
                self.git().add(&paths)?;
                json!({ "staged": paths })
            }
            "git_commit" => {
                let message = str_arg(args, "message")?;
                if message.trim().is_empty() {
                    bail!("git_commit: message must not be empty");
                }
                let committed = self.git().commit_staged(message)?;
                json!({ "committed": committed })
            }
            other => bail!("unknown tool `{other}` (available: {})", TOOL_NAMES.join(", ")),
        };
        ToolOutput::json(&value)
    }

    fn git(&self) -> Git {
        Git::new(&self.root)
    }

    /// Resolve `relative` inside the root.
    ///
    /// The deepest part of the result that exists on disk must canonicalize
    /// to a location under the canonical root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let resolved = self.resolve_lexically(relative)?;
        self.ensure_contained(&resolved, relative)?;
        Ok(resolved)
    }

    fn canonical_root(&self) -> Result<PathBuf> {
        fs::canonicalize(&self.root)
            .with_context(|| format!("resolve workspace root {}", self.root.display()))
    }

    fn ensure_contained(&self, path: &Path, relative: &str) -> Result<()> {
        let root = self.canonical_root()?;
        let mut existing = path;
        loop {
            // a dangling symlink has metadata but no canonical path
            if fs::symlink_metadata(existing).is_ok() {
                let real = fs::canonicalize(existing).with_context(|| {
                    format!("path `{relative}` does not resolve inside the workspace")
                })?;
                if !real.starts_with(&root) {
                    bail!("path `{relative}` resolves outside the workspace");
                }
                return Ok(());
            }
            match existing.parent() {
                Some(parent) => existing = parent,
                None => return Ok(()),
            }
        }
    }

    fn resolve_lexically(&self, relative: &str) -> Result<PathBuf> {
        let candidate = Path::new(relative);
        let stripped = if candidate.is_absolute() {
            candidate.strip_prefix(&self.root).map_err(|_| {
                anyhow!("path `{relative}` is outside {}", self.root.display())
            })?
        } else {
            candidate
        };
        let mut resolved = self.root.clone();
        let mut depth = 0usize;
        for component in stripped.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        bail!("path `{relative}` escapes the workspace");
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => {
                    bail!("path `{relative}` is not relative to the workspace")
                }
            }
        }
        Ok(resolved)
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    fn paths_arg(&self, args: &Value) -> Result<Vec<String>> {
        let Some(paths) = args.get("paths") else {
            return Ok(Vec::new());
        };
        let paths = paths
            .as_array()
            .ok_or_else(|| anyhow!("`paths` must be an array of strings"))?;
        paths
            .iter()
            .map(|p| {
                let p = p
                    .as_str()
                    .ok_or_else(|| anyhow!("`paths` must be an array of strings"))?;
                Ok(self.relative(&self.resolve(p)?))
            })
            .collect()
    }

    fn bash(&self, args: &Value) -> Result<Value> {
        let argv = match args.get("command") {
            Some(Value::String(line)) => split_command(line)?,
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| anyhow!("`command` array must contain strings"))
                })
                .collect::<Result<Vec<_>>>()?,
            _ => bail!("bash: `command` must be a string or an array of strings"),
        };
        let (program, rest) = argv
            .split_first()
            .ok_or_else(|| anyhow!("bash: empty command"))?;

        let mut limits = self.limits;
        if let Some(secs) = args.get("timeout_secs").and_then(Value::as_u64) {
            limits.timeout = Duration::from_secs(secs.clamp(1, MAX_BASH_TIMEOUT_SECS));
        }
        let mut cmd = Command::new(program);
        cmd.args(rest).current_dir(&self.root);
        let out = run_command_with_timeout(cmd, None, limits)?;
        Ok(json!({
            "exit_code": out.exit_code(),
            "stdout": out.stdout_text(),
            "stderr": out.stderr_text(),
            "timed_out": out.timed_out,
        }))
    }

    fn file_read(&self, args: &Value) -> Result<Value> {
        let rel = str_arg(args, "path")?;
        let path = self.resolve(rel)?;
        let content =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        Ok(json!({ "path": rel, "lines": content.lines().count(), "content": content }))
    }

    fn file_write(&self, args: &Value) -> Result<Value> {
        let rel = str_arg(args, "path")?;
        let content = str_arg(args, "content")?;
        let path = self.resolve(rel)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
        Ok(json!({ "path": rel, "bytes_written": content.len() }))
    }

    fn file_glob(&self, args: &Value) -> Result<Value> {
        let pattern = str_arg(args, "pattern")?;
        if Path::new(pattern).is_absolute()
            || Path::new(pattern)
                .components()
                .any(|c| c == Component::ParentDir)
        {
            bail!("file_glob: pattern must stay inside the workspace");
        }
        let full = self.root.join(pattern);
        let full = full
            .to_str()
            .ok_or_else(|| anyhow!("file_glob: workspace path is not valid UTF-8"))?;
        let root = self.canonical_root()?;
        let mut matches = Vec::new();
        for entry in glob::glob(full).with_context(|| format!("invalid glob `{pattern}`"))? {
            let path = entry.context("read glob match")?;
            let inside = fs::canonicalize(&path).is_ok_and(|real| real.starts_with(&root));
            if path.starts_with(&self.root) && inside {
                matches.push(self.relative(&path));
            }
        }
        matches.sort();
        Ok(json!({ "pattern": pattern, "matches": matches }))
    }

    fn file_search(&self, args: &Value) -> Result<Value> {
        let pattern = str_arg(args, "pattern")?;
        let re = Regex::new(pattern).with_context(|| format!("invalid regex `{pattern}`"))?;
        let start = match args.get("path").and_then(Value::as_str) {
            Some(rel) => self.resolve(rel)?,
            None => self.root.clone(),
        };

        let files = collect_files(&start);

        let mut matches = Vec::new();
        let mut truncated = false;
        'files: for file in files {
            let Ok(content) = fs::read_to_string(&file) else {
                continue;
            };
            for (idx, line) in content.lines().enumerate() {
                if !re.is_match(line) {
                    continue;
                }
                if matches.len() == MAX_SEARCH_MATCHES {
                    truncated = true;
                    break 'files;
                }
                matches.push(SearchMatch {
                    path: self.relative(&file),
                    line: idx + 1,
                    text: line.to_string(),
                });
            }
        }
        Ok(json!({ "pattern": pattern, "matches": matches, "truncated": truncated }))
    }
}

/// Regular files under `start` in name order. Symlinks are not followed and
/// `.git` is skipped.
fn collect_files(start: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let walker = WalkDir::new(start)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(err = %err, "skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing string argument `{key}`"))
}

fn opt_bool(args: &Value, key: &str) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(root: &Path) -> ToolRegistry {
        ToolRegistry::new(
            root,
            RunLimits {
                timeout: Duration::from_secs(5),
                output_limit_bytes: 10_000,
            },
        )
    }

    fn run(registry: &ToolRegistry, name: &str, args: Value) -> Value {
        registry
            .execute_tool(name, &args)
            .expect("tool succeeds")
            .value()
            .expect("json output")
    }

    #[test]
    fn write_then_read_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tools = registry(temp.path());
        let written = run(
            &tools,
            "file_write",
            json!({ "path": "src/new.txt", "content": "one\ntwo\n" }),
        );
        assert_eq!(written["bytes_written"], 8);

        let read = run(&tools, "file_read", json!({ "path": "src/new.txt" }));
        assert_eq!(read["content"], "one\ntwo\n");
        assert_eq!(read["lines"], 2);
    }

    #[test]
    fn paths_cannot_escape_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tools = registry(temp.path());
        for path in ["../outside.txt", "a/../../outside.txt", "/etc/passwd"] {
            let err = tools
                .execute_tool("file_read", &json!({ "path": path }))
                .unwrap_err();
            assert!(err.to_string().contains("workspace") || err.to_string().contains("outside"));
        }
        assert_eq!(
            tools.resolve("a/./b/../c").expect("resolve"),
            temp.path().join("a/c")
        );
    }

    #[test]
    fn glob_and_search_report_relative_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::write(temp.path().join("src/lib.rs"), "pub fn a() {}\nfn b() {}\n").expect("write");
        fs::write(temp.path().join("src/main.rs"), "fn main() {}\n").expect("write");
        let tools = registry(temp.path());

        let globbed = run(&tools, "file_glob", json!({ "pattern": "src/*.rs" }));
        assert_eq!(globbed["matches"], json!(["src/lib.rs", "src/main.rs"]));

        let found = run(&tools, "file_search", json!({ "pattern": r"^pub fn" }));
        assert_eq!(found["matches"][0]["path"], "src/lib.rs");
        assert_eq!(found["matches"][0]["line"], 1);
        assert_eq!(found["matches"].as_array().expect("array").len(), 1);
    }

    /// Workspace with `a.txt`, a `loop -> .` link and an `out` link to a
    /// directory outside the workspace holding `secret.txt`.
    #[cfg(unix)]
    fn linked_workspace() -> (tempfile::TempDir, tempfile::TempDir) {
        use std::os::unix::fs::symlink;

        let workspace = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("tempdir");
        fs::write(workspace.path().join("a.txt"), "TOKEN here\n").expect("write");
        fs::write(outside.path().join("secret.txt"), "TOKEN secret\n").expect("write");
        symlink(workspace.path(), workspace.path().join("loop")).expect("symlink loop");
        symlink(outside.path(), workspace.path().join("out")).expect("symlink out");
        (workspace, outside)
    }

    #[cfg(unix)]
    #[test]
    fn search_does_not_follow_symlinks() {
        let (workspace, _outside) = linked_workspace();
        let tools = registry(workspace.path());

        let found = run(&tools, "file_search", json!({ "pattern": "TOKEN" }));
        assert_eq!(
            found["matches"],
            json!([{ "path": "a.txt", "line": 1, "text": "TOKEN here" }])
        );
        assert_eq!(found["truncated"], false);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_cannot_escape_root() {
        let (workspace, outside) = linked_workspace();
        let tools = registry(workspace.path());

        let err = tools
            .execute_tool("file_read", &json!({ "path": "out/secret.txt" }))
            .unwrap_err();
        assert!(err.to_string().contains("outside the workspace"), "{err}");

        let err = tools
            .execute_tool(
                "file_write",
                &json!({ "path": "out/new/planted.txt", "content": "x" }),
            )
            .unwrap_err();
        assert!(err.to_string().contains("outside the workspace"), "{err}");
        assert!(!outside.path().join("new").exists());

        let globbed = run(&tools, "file_glob", json!({ "pattern": "out/*" }));
        assert_eq!(globbed["matches"], json!([]));

        let read = run(&tools, "file_read", json!({ "path": "loop/a.txt" }));
        assert_eq!(read["content"], "TOKEN here\n");
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlinks_are_rejected() {
        let workspace = tempfile::tempdir().expect("tempdir");
        std::os::unix::fs::symlink("/nonexistent/target", workspace.path().join("dangling"))
            .expect("symlink");
        let tools = registry(workspace.path());

        let err = tools
            .execute_tool("file_write", &json!({ "path": "dangling", "content": "x" }))
            .unwrap_err();
        assert!(err.to_string().contains("does not resolve"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn bash_runs_argv_in_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("marker"), "").expect("write");
        let tools = registry(temp.path());
        let out = run(&tools, "bash", json!({ "command": "ls marker" }));
        assert_eq!(out["exit_code"], 0);
        assert_eq!(out["stdout"], "marker\n");
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = registry(temp.path())
            .execute_tool("rm_rf", &json!({}))
            .unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }
}
