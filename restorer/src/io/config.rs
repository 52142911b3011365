//! Engine configuration stored in `restorer.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::{Severity, Subtask};

/// Engine configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Run-scoped RNG seed (agenda shuffle, toolbox order, retry jitter).
    pub seed: u64,

    /// Judge each tool result and gate acceptance on it. When false, the
    /// first tool's output is accepted unconditionally (single-shot mode).
    pub reflection: bool,

    /// Roll back and replan when a subtask fails its quality gate.
    pub rollback: bool,

    /// Schedule with distilled cross-run experience instead of asking the
    /// oracle to reason from scratch.
    pub retrieval: bool,

    /// Worst severity still counted as subtask success.
    pub success_threshold: Severity,

    /// Add super-resolution to the agenda when the image's shorter side is
    /// below this many pixels.
    pub min_short_side_px: u32,

    /// Distilled scheduling experience hub, required in retrieval mode.
    pub experience_path: PathBuf,

    pub oracle: OracleConfig,
    pub tool: ToolConfig,

    /// Toolboxes registered per subtask, in registration order.
    pub toolboxes: BTreeMap<Subtask, Vec<ToolSpec>>,
}

/// One registered restoration tool.
///
/// `command` is invoked with `{input}` replaced by the input image path and
/// `{output}` by the (empty) output directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Command for the severity/comparison judge. Receives a JSON request on
    /// stdin and must answer with JSON on stdout.
    pub judge_command: Vec<String>,

    /// Command for the plan-ordering oracle. Same request/response framing.
    pub scheduler_command: Vec<String>,

    /// Wall-clock budget per oracle call, in seconds.
    pub timeout_secs: u64,

    /// Truncate oracle stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Plain retries for malformed (schema-violating) responses.
    pub max_format_retries: u32,

    /// Backoff retries for transient call failures.
    pub max_transient_retries: u32,

    /// First backoff delay, in milliseconds.
    pub initial_backoff_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            judge_command: vec!["depictqa-cli".to_string()],
            scheduler_command: vec!["schedule-cli".to_string()],
            timeout_secs: 5 * 60,
            output_limit_bytes: 1_000_000,
            max_format_retries: 5,
            max_transient_retries: 5,
            initial_backoff_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolConfig {
    /// Wall-clock budget per tool invocation, in seconds. Restoration runs
    /// can be long and GPU-bound.
    pub timeout_secs: u64,

    /// Truncate tool stdout/stderr logs beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            reflection: true,
            rollback: true,
            retrieval: true,
            success_threshold: Severity::Low,
            min_short_side_px: 300,
            experience_path: PathBuf::from("memory/schedule_experience.json"),
            oracle: OracleConfig::default(),
            tool: ToolConfig::default(),
            toolboxes: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_short_side_px == 0 {
            return Err(anyhow!("min_short_side_px must be > 0"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        if self.oracle.output_limit_bytes == 0 {
            return Err(anyhow!("oracle.output_limit_bytes must be > 0"));
        }
        if command_is_empty(&self.oracle.judge_command) {
            return Err(anyhow!("oracle.judge_command must be a non-empty array"));
        }
        if command_is_empty(&self.oracle.scheduler_command) {
            return Err(anyhow!("oracle.scheduler_command must be a non-empty array"));
        }
        if self.tool.timeout_secs == 0 {
            return Err(anyhow!("tool.timeout_secs must be > 0"));
        }
        if self.tool.output_limit_bytes == 0 {
            return Err(anyhow!("tool.output_limit_bytes must be > 0"));
        }
        for (subtask, toolbox) in &self.toolboxes {
            if toolbox.is_empty() {
                return Err(anyhow!("toolboxes.{subtask} must register at least one tool"));
            }
            let mut seen = std::collections::BTreeSet::new();
            for spec in toolbox {
                if spec.name.trim().is_empty() {
                    return Err(anyhow!("toolboxes.{subtask} has a tool with an empty name"));
                }
                if command_is_empty(&spec.command) {
                    return Err(anyhow!(
                        "toolboxes.{subtask} tool '{}' has an empty command",
                        spec.name
                    ));
                }
                if !seen.insert(spec.name.as_str()) {
                    return Err(anyhow!(
                        "toolboxes.{subtask} registers tool '{}' twice",
                        spec.name
                    ));
                }
            }
        }
        Ok(())
    }
}

fn command_is_empty(command: &[String]) -> bool {
    command.is_empty() || command[0].trim().is_empty()
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
