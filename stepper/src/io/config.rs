//! Run configuration stored as TOML (default `stepper.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::policy::DEFAULT_MAX_PARSE_RETRIES;
use crate::core::task::SetupDirective;

pub const DEFAULT_CONFIG_PATH: &str = "stepper.toml";

/// Run configuration (TOML).
///
/// Edited by humans; missing fields default to the values the quickstart uses.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub agent: AgentSettings,
    pub environment: EnvironmentSettings,
    pub task: TaskSettings,
    pub driver: DriverSettings,
}

/// Supported agent models.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Model {
    #[default]
    #[serde(rename = "gemma-3-27b-it")]
    Gemma3_27bIt,
}

impl Model {
    pub fn as_str(self) -> &'static str {
        match self {
            Model::Gemma3_27bIt => "gemma-3-27b-it",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSettings {
    pub model: Model,
    /// Sampling temperature in `[0, 1]`.
    pub temperature: f64,
    /// Nucleus sampling mass in `[0, 1]`.
    pub top_p: f64,
    /// Completion budget in `[100, 4000]`.
    pub max_tokens: u32,
    /// Turns of history replayed to the agent, in `[1, 100]`.
    pub max_memory_length: u32,
    /// Step budget for the run, in `[1, 50]`.
    pub max_steps: u32,
    pub use_plan: bool,
    /// Agent program; receives a JSON request on stdin and answers on stdout.
    pub command: Vec<String>,
    /// Wall-clock budget for one agent call.
    pub timeout_secs: u64,
    /// Truncate agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: Model::default(),
            temperature: 0.5,
            top_p: 0.9,
            max_tokens: 1000,
            max_memory_length: 25,
            max_steps: 20,
            use_plan: false,
            command: vec!["stepper-agent".to_string()],
            timeout_secs: 5 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironmentSettings {
    /// Runtime identity recorded with the run.
    pub image_name: String,
    /// Working directory the agent is told it operates in.
    pub work_dir: String,
    /// Scratch space; workspaces live under `<cache_dir>/<instance_id>/`.
    pub cache_dir: PathBuf,
    /// Result files, step records and snapshots land under `<output_dir>/<instance_id>/`.
    pub output_dir: PathBuf,
    /// Wall-clock budget for a single action.
    pub action_timeout_secs: u64,
    /// Truncate action output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            image_name: "spider_agent-image".to_string(),
            work_dir: "/workspace".to_string(),
            cache_dir: PathBuf::from("./cache"),
            output_dir: PathBuf::from("./output"),
            action_timeout_secs: 120,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskSettings {
    pub setup: Vec<SetupDirective>,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            setup: vec![SetupDirective::CopyAllSubfiles {
                dirs: vec!["./local_db".to_string()],
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DriverSettings {
    /// Pause between ticks; a scheduling hint only.
    pub tick_interval_ms: u64,
    /// Parse failures tolerated per run before the next one is fatal.
    pub max_parse_retries: u32,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            max_parse_retries: DEFAULT_MAX_PARSE_RETRIES,
        }
    }
}

impl DriverSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        let agent = &self.agent;
        if !(0.0..=1.0).contains(&agent.temperature) {
            return Err(anyhow!("agent.temperature must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&agent.top_p) {
            return Err(anyhow!("agent.top_p must be within [0, 1]"));
        }
        if !(100..=4000).contains(&agent.max_tokens) {
            return Err(anyhow!("agent.max_tokens must be within [100, 4000]"));
        }
        if !(1..=100).contains(&agent.max_memory_length) {
            return Err(anyhow!("agent.max_memory_length must be within [1, 100]"));
        }
        if !(1..=50).contains(&agent.max_steps) {
            return Err(anyhow!("agent.max_steps must be within [1, 50]"));
        }
        if agent.command.is_empty() || agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }

        let env = &self.environment;
        if env.cache_dir.as_os_str().is_empty() {
            return Err(anyhow!("environment.cache_dir must not be empty"));
        }
        if env.output_dir.as_os_str().is_empty() {
            return Err(anyhow!("environment.output_dir must not be empty"));
        }
        if env.action_timeout_secs == 0 {
            return Err(anyhow!("environment.action_timeout_secs must be > 0"));
        }
        if env.output_limit_bytes == 0 {
            return Err(anyhow!("environment.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    if !path.exists() {
        let cfg = RunConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
