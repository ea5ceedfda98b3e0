//! Pipeline configuration, `<plan_dir>/pipeline.toml` by default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::backoff::Backoff;
use crate::io::atomic::write_atomic;
use crate::io::process::RunLimits;

pub const CONFIG_FILE_NAME: &str = "pipeline.toml";

/// Human-editable settings. Every field has a default so a partial (or
/// missing) file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Commit the working tree after every completed subtask.
    pub commit_after_subtask: bool,
    pub orchestrator: OrchestratorConfig,
    pub validation: ValidationConfig,
    pub bug_hunt: BugHuntConfig,
    pub agent: AgentConfig,
    pub progress: ProgressConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Safety cap on orchestrator loop iterations.
    pub max_iterations: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_fix_attempts: u32,
    pub gate_timeout_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub output_limit_bytes: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_fix_attempts: 2,
            gate_timeout_secs: 120,
            backoff_base_ms: 2_000,
            backoff_max_ms: 30_000,
            output_limit_bytes: 100_000,
        }
    }
}

impl ValidationConfig {
    pub fn gate_limits(&self) -> RunLimits {
        RunLimits {
            timeout: Duration::from_secs(self.gate_timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base_ms: self.backoff_base_ms,
            max_ms: self.backoff_max_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BugHuntConfig {
    pub enabled: bool,
    /// Maximum fix-then-retest iterations.
    pub max_iterations: u32,
}

impl Default for BugHuntConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Rendered prompts are trimmed to this many bytes.
    pub prompt_budget_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
            prompt_budget_bytes: 60_000,
        }
    }
}

impl AgentConfig {
    pub fn limits(&self) -> RunLimits {
        RunLimits {
            timeout: Duration::from_secs(self.timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProgressConfig {
    /// Log a progress line every N completions.
    pub log_interval: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self { log_interval: 5 }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            commit_after_subtask: false,
            orchestrator: OrchestratorConfig::default(),
            validation: ValidationConfig::default(),
            bug_hunt: BugHuntConfig::default(),
            agent: AgentConfig::default(),
            progress: ProgressConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.max_iterations == 0 {
            return Err(anyhow!("orchestrator.max_iterations must be > 0"));
        }
        if self.validation.gate_timeout_secs == 0 {
            return Err(anyhow!("validation.gate_timeout_secs must be > 0"));
        }
        if self.validation.output_limit_bytes == 0 {
            return Err(anyhow!("validation.output_limit_bytes must be > 0"));
        }
        if self.validation.backoff_max_ms < self.validation.backoff_base_ms {
            return Err(anyhow!(
                "validation.backoff_max_ms must be >= validation.backoff_base_ms"
            ));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.agent.prompt_budget_bytes == 0 {
            return Err(anyhow!("agent.prompt_budget_bytes must be > 0"));
        }
        Ok(())
    }
}

pub fn default_config_path(plan_dir: &Path) -> PathBuf {
    plan_dir.join(CONFIG_FILE_NAME)
}

/// Load and validate config; a missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        return Ok(PipelineConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes()).with_context(|| format!("write {}", path.display()))
}
