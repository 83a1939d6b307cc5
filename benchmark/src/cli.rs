//! The command-line arguments and configuration system for the `benchmark` binary.

use ats_core::ToolKind;
use ats_core::config::{Config, ConfigError};
use clap::{Parser, Subcommand};
use config::FileFormat::Toml;
use config::builder::{ConfigBuilder, DefaultState};
use directories::ProjectDirs;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variables read at startup, and the config key each one sets.
const ENV_KEYS: [(&str, &str); 7] = [
    ("MODEL_ID", "llm.model"),
    ("OPENROUTER_API_KEY", "llm.api_key"),
    ("LLM_BASE_URL", "llm.address"),
    ("MAX_TOKENS", "llm.max_tokens"),
    ("TEMPERATURE", "llm.temperature"),
    ("TARGET_PROJECT", "target"),
    ("PROBLEM_DESCRIPTION", "problem"),
];

/// Keys whose values are always strings, even when they look like numbers.
const STRING_KEYS: [&str; 7] = [
    "target",
    "output",
    "problem",
    "log_filter",
    "llm.address",
    "llm.api_key",
    "llm.model",
];

/// Keys that take a comma-separated list.
const LIST_KEYS: [&str; 3] = ["repair.tools", "context.extensions", "context.skip_dirs"];

/// Command-line arguments for the `benchmark` binary.
#[derive(Debug, Parser)]
#[command(name = "benchmark", about = "Compare context compression tools by what they save an LLM")]
pub struct Args {
    /// Set a configuration value; format $NAME=$VALUE.
    #[arg(long, short, global = true)]
    pub config: Vec<String>,

    /// Directory containing the project to compress and repair.
    #[arg(long, short, global = true)]
    pub target: Option<PathBuf>,

    /// Directory results are written into.
    #[arg(long, short, global = true)]
    pub output: Option<PathBuf>,

    /// Prints out the location of the config file.
    #[arg(long)]
    pub print_config_path: bool,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    // Always present unless using a flag like --print-config-path
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Code-review benchmark: one LLM analysis per tool.
    Run {
        /// A tool name, or "all".
        #[arg(long, default_value = "all")]
        tool: ToolSelection,
    },
    /// Ask the LLM to fix a problem in the target, once per tool, and apply its patch.
    Repair {
        /// A tool name, or "all". Defaults to `repair.tools` from the config.
        #[arg(long)]
        tool: Option<ToolSelection>,

        /// The problem to fix. Auto-detected from the target when neither this nor the config
        /// sets one.
        #[arg(long)]
        problem: Option<String>,

        /// Run the tools concurrently.
        #[arg(long)]
        parallel: bool,
    },
    /// Print comparison tables for every recorded result.
    Summary,
    /// Send a tiny prompt to check the LLM endpoint, key and model.
    CheckLlm,
}

/// Which tools a command runs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ToolSelection {
    All,
    One(ToolKind),
}

impl ToolSelection {
    pub fn tools(self) -> Vec<ToolKind> {
        match self {
            ToolSelection::All => ToolKind::ALL.to_vec(),
            ToolSelection::One(tool) => vec![tool],
        }
    }
}

impl FromStr for ToolSelection {
    type Err = ats_core::tool::UnknownTool;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(ToolSelection::All),
            name => name.parse().map(ToolSelection::One),
        }
    }
}

/// Reads the environment variables the benchmark understands. Called once at startup; nothing
/// else reads the environment.
pub fn env_snapshot() -> HashMap<String, String> {
    ENV_KEYS
        .iter()
        .filter_map(|(var, _)| {
            let value = std::env::var(var).ok()?;
            (!value.trim().is_empty()).then(|| (var.to_string(), value))
        })
        .collect()
}

/// Performs parsing and validation of the config; to be called by main() before executing any code
/// that tries to retrieve the config.
///
/// Returns the config, or None if a command line flag that calls for an early exit (such as
/// --print-config-path) was provided.
pub fn initialize(args: &Args) -> Result<Option<Config>, ConfigError> {
    let dirs = ProjectDirs::from("", "", "ats");
    if args.print_config_path {
        match dirs {
            Some(dirs) => println!("Config file location: {:?}", config_file(dirs.config_dir())),
            None => println!("No home directory; only ./ats.toml is read"),
        }
        return Ok(None);
    }
    let config = load_config(
        args,
        dirs.as_ref().map(|d| d.config_dir()),
        &env_snapshot(),
    )?;
    config.validate()?;
    Ok(Some(config))
}

fn load_config(
    args: &Args,
    config_dir: Option<&Path>,
    env: &HashMap<String, String>,
) -> Result<Config, ConfigError> {
    let mut settings = config::Config::builder().add_source(config::File::from_str(
        include_str!("../default_config.toml"),
        Toml,
    ));
    if let Some(dir) = config_dir {
        settings = settings.add_source(config::File::from(config_file(dir)).required(false));
    }
    settings = settings.add_source(config::File::from(PathBuf::from("ats.toml")).required(false));

    for (var, key) in ENV_KEYS {
        if let Some(value) = env.get(var) {
            settings = set_value(settings, key, value)?;
        }
    }
    for config_arg in &args.config {
        let Some((name, value)) = config_arg.split_once('=') else {
            return Err(ConfigError::BadOverride(config_arg.clone()));
        };
        settings = set_value(settings, name.trim(), value)?;
    }
    if let Some(Command::Repair {
        problem: Some(problem),
        ..
    }) = &args.command
    {
        settings = set_value(settings, "problem", problem)?;
    }

    let mut config: Config = settings
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| ConfigError::Load(e.to_string()))?;
    // Paths are set after deserialization; the config crate only carries strings.
    if let Some(ref target) = args.target {
        config.target = target.clone();
    }
    if let Some(ref output) = args.output {
        config.output = output.clone();
    }
    if args.verbose {
        config.log_filter = "debug".into();
    }
    Ok(config)
}

/// Sets `key` with the type its text suggests, so numeric fields are not handed strings.
fn set_value(
    settings: ConfigBuilder<DefaultState>,
    key: &str,
    value: &str,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let value = value.trim();
    let result = if STRING_KEYS.contains(&key) {
        settings.set_override(key, value)
    } else if LIST_KEYS.contains(&key) {
        let items: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect();
        settings.set_override(key, items)
    } else if let Ok(number) = value.parse::<i64>() {
        settings.set_override(key, number)
    } else if let Ok(number) = value.parse::<f64>() {
        settings.set_override(key, number)
    } else if let Ok(flag) = value.parse::<bool>() {
        settings.set_override(key, flag)
    } else {
        settings.set_override(key, value)
    };
    result.map_err(|e| ConfigError::Load(format!("{key}: {e}")))
}

/// Returns the config file path, given the config directory.
fn config_file(config_dir: &Path) -> PathBuf {
    [config_dir, "benchmark.toml".as_ref()].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ats_core::config::WorkspaceMode;
    use ats_core::test_util::tempdir;
    use std::{fs, io::Write as _};

    fn load(argv: &[&str], dir: &Path, env: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        load_config(&Args::parse_from(argv), Some(dir), &env)
    }

    #[test]
    fn load_config_test() {
        let config_dir = tempdir().unwrap();
        let dir = config_dir.path();

        let defaults = load(&["", "summary"], dir, &[]).unwrap();
        assert_eq!(defaults.target, Path::new("sample-app"));
        assert_eq!(defaults.llm.max_tokens, 2048);
        assert_eq!(defaults.repair.workspace, WorkspaceMode::Copy);
        assert!(defaults.llm.api_key.is_none());
        assert!(defaults.unknown.is_empty());

        fs::File::create(config_file(dir))
            .unwrap()
            .write_all(
                br#"
                    target = "b"
                    [llm]
                    model = "user-model"
                "#,
            )
            .unwrap();
        let from_file = load(&["", "summary"], dir, &[]).unwrap();
        assert_eq!(from_file.target, Path::new("b"));
        assert_eq!(from_file.llm.model, "user-model");

        // The environment overrides the user's config file.
        let env = [
            ("TARGET_PROJECT", "e"),
            ("MAX_TOKENS", "64"),
            ("TEMPERATURE", "0.5"),
            ("OPENROUTER_API_KEY", "12345"),
        ];
        let from_env = load(&["", "summary"], dir, &env).unwrap();
        assert_eq!(from_env.target, Path::new("e"));
        assert_eq!(from_env.llm.max_tokens, 64);
        assert_eq!(from_env.llm.temperature, 0.5);
        assert_eq!(from_env.require_api_key().unwrap().0, "12345");

        // --config overrides the environment; --target overrides everything.
        let argv = ["", "--config", "target=c", "-c", "llm.max_tokens=512", "summary"];
        let from_flag = load(&argv, dir, &env).unwrap();
        assert_eq!(from_flag.target, Path::new("c"));
        assert_eq!(from_flag.llm.max_tokens, 512);
        let argv = ["", "--config", "target=c", "summary", "--target", "d"];
        assert_eq!(load(&argv, dir, &env).unwrap().target, Path::new("d"));
    }

    #[test]
    fn list_and_enum_overrides() {
        let config_dir = tempdir().unwrap();
        let argv = [
            "",
            "--config",
            "repair.tools=nfo, baseline",
            "--config",
            "repair.workspace=in_place",
            "--config",
            "repair.parallel=true",
            "repair",
            "--problem",
            "fix the loop",
        ];
        let config = load(&argv, config_dir.path(), &[]).unwrap();
        assert_eq!(config.repair.tools, [ToolKind::Nfo, ToolKind::Baseline]);
        assert_eq!(config.repair.workspace, WorkspaceMode::InPlace);
        assert!(config.repair.parallel);
        assert_eq!(config.problem.as_deref(), Some("fix the loop"));
    }

    #[test]
    fn malformed_overrides_are_errors() {
        let config_dir = tempdir().unwrap();
        assert!(matches!(
            load(&["", "--config", "nonsense", "summary"], config_dir.path(), &[]),
            Err(ConfigError::BadOverride(_))
        ));
        assert!(matches!(
            load(&["", "--config", "llm.max_tokens=lots", "summary"], config_dir.path(), &[]),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn unknown_keys_are_kept_for_warnings() {
        let config_dir = tempdir().unwrap();
        let config = load(&["", "-c", "colour=blue", "summary"], config_dir.path(), &[]).unwrap();
        assert!(config.unknown.contains_key("colour"));
    }

    #[test]
    fn unknown_section_keys_are_kept_per_section() {
        let config_dir = tempdir().unwrap();
        let argv = [
            "",
            "-c",
            "llm.modle=typo",
            "-c",
            "context.max_output=1",
            "-c",
            "prompt.budget=2",
            "-c",
            "repair.paralel=true",
            "summary",
        ];
        let config = load(&argv, config_dir.path(), &[]).unwrap();
        assert!(config.llm.unknown.contains_key("modle"));
        assert!(config.context.unknown.contains_key("max_output"));
        assert!(config.prompt.unknown.contains_key("budget"));
        assert!(config.repair.unknown.contains_key("paralel"));
        assert!(config.unknown.is_empty());
        // Known keys are not swept into the catch-all.
        assert!(!config.llm.unknown.contains_key("model"));
        assert!(config.context.commands.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tool_selection_parses() {
        assert_eq!("all".parse::<ToolSelection>().unwrap(), ToolSelection::All);
        assert_eq!(
            "tree-sitter".parse::<ToolSelection>().unwrap(),
            ToolSelection::One(ToolKind::Treesitter)
        );
        assert_eq!(ToolSelection::All.tools().len(), ToolKind::ALL.len());
        assert!("pyan".parse::<ToolSelection>().is_err());
    }
}
