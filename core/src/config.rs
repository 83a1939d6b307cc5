//! Benchmark configuration. Built once at startup (see `ats_benchmark::cli`) and passed by
//! reference into every component.

use crate::llm::{ApiKey, LLMConfig};
use crate::tool::ToolKind;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Directory containing the code sample to compress and repair.
    pub target: PathBuf,

    /// Directory results are written into.
    pub output: PathBuf,

    /// Problem the repair pipeline should fix. Auto-detected from the target when unset.
    #[serde(default)]
    pub problem: Option<String>,

    /// `tracing` filter directive for the console and the log file.
    pub log_filter: String,

    pub llm: LLMConfig,
    pub context: ContextConfig,
    pub prompt: PromptConfig,
    pub repair: RepairConfig,

    // Fields that the config contains but we don't recognize.
    #[serde(flatten)]
    pub unknown: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ContextConfig {
    /// Hard cap on the size of a tool's output.
    pub max_output_bytes: usize,

    /// Timeout for a single external tool invocation, in seconds.
    pub timeout_secs: u64,

    /// Source file extensions (without the dot) that count as project source.
    pub extensions: Vec<String>,

    /// Directory names never descended into.
    pub skip_dirs: Vec<String>,

    /// Per-tool argv overrides. `{path}` is replaced by the target directory and `{files}` by the
    /// list of source files.
    #[serde(default)]
    pub commands: BTreeMap<String, Vec<String>>,

    #[serde(flatten)]
    pub unknown: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct PromptConfig {
    /// Token budget for the whole prompt (system, problem and context).
    pub max_prompt_tokens: usize,

    #[serde(flatten)]
    pub unknown: HashMap<String, Value>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceMode {
    /// Each tool patches its own copy of the target.
    Copy,
    /// Patches are applied to the target directly.
    InPlace,
}

#[derive(Debug, Deserialize)]
pub struct RepairConfig {
    /// Tools run by `repair` when no `--tool` is given.
    pub tools: Vec<ToolKind>,
    pub workspace: WorkspaceMode,
    /// Run tools concurrently instead of one after another.
    pub parallel: bool,

    #[serde(flatten)]
    pub unknown: HashMap<String, Value>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no API key configured; set OPENROUTER_API_KEY or --config llm.api_key=...")]
    MissingApiKey,
    #[error("failed to parse config value {0:?}; no '=' found")]
    BadOverride(String),
    #[error("failed to load configuration: {0}")]
    Load(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Prints out a warning message for every field in `unknown`.
///
/// `prefix` should be the path to this entry (e.g. `llm` for the `[llm]` table).
pub fn unknown_field_warning(prefix: &str, unknown: &HashMap<String, Value>) {
    let mut entries: Vec<_> = unknown.keys().collect();
    entries.sort_unstable();
    entries.into_iter().for_each(|name| match prefix {
        "" => eprintln!("Warning: unknown config key {name}"),
        p => eprintln!("Warning: unknown config key {p}.{name}"),
    });
}

impl Config {
    /// Checks values that deserialization alone cannot, and warns about unknown keys.
    pub fn validate(&self) -> Result<(), ConfigError> {
        unknown_field_warning("", &self.unknown);
        unknown_field_warning("llm", &self.llm.unknown);
        unknown_field_warning("context", &self.context.unknown);
        unknown_field_warning("prompt", &self.prompt.unknown);
        unknown_field_warning("repair", &self.repair.unknown);
        for name in self.context.commands.keys() {
            if name.parse::<ToolKind>().is_err() {
                eprintln!("Warning: unknown config key context.commands.{name}");
            }
        }
        for (name, argv) in &self.context.commands {
            if argv.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "context.commands.{name} is empty"
                )));
            }
        }
        if self.context.max_output_bytes == 0 {
            return Err(ConfigError::Invalid(
                "context.max_output_bytes must be positive".into(),
            ));
        }
        if self.prompt.max_prompt_tokens == 0 {
            return Err(ConfigError::Invalid(
                "prompt.max_prompt_tokens must be positive".into(),
            ));
        }
        if self.llm.timeout_secs == 0 || self.context.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Invalid(format!(
                "llm.temperature {} is outside 0.0..=2.0",
                self.llm.temperature
            )));
        }
        Ok(())
    }

    /// Fails unless an API key is configured. Only commands that talk to the LLM call this.
    pub fn require_api_key(&self) -> Result<&ApiKey, ConfigError> {
        match self.llm.api_key {
            Some(ref key) if !key.0.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey),
        }
    }

    /// The argv override for `tool`, if one is configured.
    pub fn command_override(&self, tool: ToolKind) -> Option<&[String]> {
        self.context
            .commands
            .iter()
            .find(|(name, _)| name.parse::<ToolKind>().ok() == Some(tool))
            .map(|(_, argv)| argv.as_slice())
    }

    /// Returns a mock config for testing.
    pub fn mock(target: PathBuf, output: PathBuf) -> Self {
        Self {
            target,
            output,
            problem: None,
            log_filter: "info".into(),
            llm: LLMConfig {
                address: "http://127.0.0.1:9".into(),
                api_key: Some(ApiKey("mock_key".into())),
                model: "mock_model".into(),
                max_tokens: 1000,
                temperature: 0.0,
                timeout_secs: 5,
                max_retries: 3,
                backoff_base_ms: 1,
                unknown: HashMap::new(),
            },
            context: ContextConfig {
                max_output_bytes: 50_000,
                timeout_secs: 10,
                extensions: vec!["py".into()],
                skip_dirs: ["__pycache__", ".git", "venv", ".venv", "target"]
                    .map(String::from)
                    .to_vec(),
                commands: BTreeMap::new(),
                unknown: HashMap::new(),
            },
            prompt: PromptConfig {
                max_prompt_tokens: 8000,
                unknown: HashMap::new(),
            },
            repair: RepairConfig {
                tools: ToolKind::ALL.to_vec(),
                workspace: WorkspaceMode::Copy,
                parallel: false,
                unknown: HashMap::new(),
            },
            unknown: HashMap::new(),
        }
    }
}
