//! Running one validation gate command.
//!
//! Gate commands are declared as strings but never handed to a shell: they
//! are split into argv with POSIX-style quoting and spawned directly.

use std::path::Path;
use std::process::Command;

use anyhow::{Result, anyhow, bail};

use crate::io::process::{RunLimits, run_command_with_timeout};

/// What a gate command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl GateOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

pub trait GateRunner {
    /// `Err` means the command could not be started.
    fn run(&self, argv: &[String], workdir: &Path, limits: RunLimits) -> Result<GateOutput>;
}

/// Spawns the gate command as a child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandGateRunner;

impl GateRunner for CommandGateRunner {
    fn run(&self, argv: &[String], workdir: &Path, limits: RunLimits) -> Result<GateOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("empty gate command"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(workdir);
        let out = run_command_with_timeout(cmd, None, limits)?;
        Ok(GateOutput {
            exit_code: out.exit_code(),
            stdout: out.stdout_text(),
            stderr: out.stderr_text(),
            timed_out: out.timed_out,
        })
    }
}

/// Split a command line into argv.
///
/// Single quotes are literal, double quotes allow `\"` and `\\`, and a
/// backslash outside quotes escapes the next character.
pub fn split_command(line: &str) -> Result<Vec<String>> {
    let mut argv = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => bail!("unterminated single quote in `{line}`"),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => bail!("unterminated double quote in `{line}`"),
                        },
                        Some(ch) => current.push(ch),
                        None => bail!("unterminated double quote in `{line}`"),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(ch) => current.push(ch),
                    None => bail!("trailing backslash in `{line}`"),
                }
            }
            ch if ch.is_whitespace() => {
                if in_word {
                    argv.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            ch => {
                in_word = true;
                current.push(ch);
            }
        }
    }
    if in_word {
        argv.push(current);
    }
    if argv.is_empty() {
        bail!("empty command");
    }
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn argv(line: &str) -> Vec<String> {
        split_command(line).expect("split")
    }

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(argv("  cargo  test --lib "), vec!["cargo", "test", "--lib"]);
    }

    #[test]
    fn honours_quotes_and_escapes() {
        assert_eq!(
            argv(r#"grep -r "fn main" 'src dir' a\ b"#),
            vec!["grep", "-r", "fn main", "src dir", "a b"]
        );
        assert_eq!(argv(r#"echo "say \"hi\"" ''"#), vec!["echo", r#"say "hi""#, ""]);
    }

    #[test]
    fn shell_operators_stay_literal() {
        assert_eq!(argv("echo a | wc"), vec!["echo", "a", "|", "wc"]);
    }

    #[test]
    fn rejects_unbalanced_quotes_and_blank_lines() {
        assert!(split_command("echo 'oops").is_err());
        assert!(split_command("echo \"oops").is_err());
        assert!(split_command("   ").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_runner_reports_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let limits = RunLimits {
            timeout: Duration::from_secs(5),
            output_limit_bytes: 1024,
        };
        let out = CommandGateRunner
            .run(&argv("sh -c 'echo ok; exit 1'"), temp.path(), limits)
            .expect("run");
        assert_eq!(out.exit_code, Some(1));
        assert_eq!(out.stdout, "ok\n");
        assert!(!out.succeeded());
    }
}
