//! Builds the compressed context for one tool: runs the tool against the target project (or a
//! built-in extractor when the tool has no binary or the binary is missing), renders its output
//! to text and applies the output cap.

pub mod extract;
mod invoke;
pub mod render;
pub mod source;

#[cfg(test)]
mod tests;

use ats_core::config::Config;
use ats_core::{CompressedContext, ToolKind};
use invoke::InvokeError;
use source::SourceFile;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How much of a crashed tool's stderr ends up in the error.
const STDERR_EXCERPT_CHARS: usize = 400;

#[derive(Debug, Error)]
pub enum ContextBuildError {
    #[error("{tool} exited with {status} on {}: {stderr}", .target.display())]
    ToolCrashed {
        tool: ToolKind,
        target: PathBuf,
        status: String,
        stderr: String,
    },
    #[error("{tool} timed out after {timeout:?} on {}", .target.display())]
    Timeout {
        tool: ToolKind,
        target: PathBuf,
        timeout: Duration,
    },
    #[error("{tool} failed on {}: {source}", .target.display())]
    Io {
        tool: ToolKind,
        target: PathBuf,
        source: io::Error,
    },
    #[error("{tool} interrupted")]
    Interrupted { tool: ToolKind },
}

/// Settings for `ContextBuilder`, normally taken from the `[context]` config section.
#[derive(Clone, Debug)]
pub struct ContextOptions {
    pub max_output_bytes: usize,
    pub timeout: Duration,
    pub extensions: Vec<String>,
    pub skip_dirs: Vec<String>,
    /// Never read as source; the benchmark output directory.
    pub exclude: Option<PathBuf>,
    /// argv overrides; tools not listed use `default_argv`.
    pub commands: BTreeMap<ToolKind, Vec<String>>,
}

impl ContextOptions {
    pub fn from_config(config: &Config) -> ContextOptions {
        let commands = ToolKind::ALL
            .into_iter()
            .filter_map(|tool| Some((tool, config.command_override(tool)?.to_vec())))
            .collect();
        ContextOptions {
            max_output_bytes: config.context.max_output_bytes,
            timeout: Duration::from_secs(config.context.timeout_secs),
            extensions: config.context.extensions.clone(),
            skip_dirs: config.context.skip_dirs.clone(),
            exclude: Some(config.output.clone()),
            commands,
        }
    }
}

/// The command line a tool is run with unless the config overrides it. `None` for tools that are
/// implemented in-process.
pub fn default_argv(tool: ToolKind) -> Option<&'static [&'static str]> {
    Some(match tool {
        ToolKind::Code2logic => &["code2logic", "{path}", "-f", "compact"],
        ToolKind::Callgraph => &["callgraph-cli", "{path}", "--format", "json"],
        ToolKind::Treesitter => &["tree-sitter", "parse", "--quiet", "--stat", "{files}"],
        ToolKind::Astgrep => &[
            "ast-grep",
            "run",
            "--pattern",
            "def $NAME($$$ARGS)",
            "--json=stream",
            "-l",
            "python",
            "{path}",
        ],
        ToolKind::Radon => &["radon", "cc", "{path}", "-s", "-j"],
        ToolKind::Bandit => &["bandit", "-r", "{path}", "-f", "json", "-ll"],
        ToolKind::Nfo | ToolKind::Baseline => return None,
    })
}

/// Exit codes that mean the tool ran. bandit and ast-grep exit with 1 when they found something
/// (or nothing, for ast-grep).
fn accepted(tool: ToolKind, status: ExitStatus) -> bool {
    match (tool, status.code()) {
        (_, Some(0)) => true,
        (ToolKind::Bandit | ToolKind::Astgrep, Some(1)) => true,
        _ => false,
    }
}

/// Keeps the trailing `cap` bytes of `text`, cut on a character boundary. Returns whether anything
/// was dropped.
pub fn truncate_head(text: String, cap: usize) -> (String, bool) {
    if text.len() <= cap {
        return (text, false);
    }
    let mut start = text.len() - cap;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    (text[start..].to_string(), true)
}

pub struct ContextBuilder {
    options: ContextOptions,
}

impl ContextBuilder {
    pub fn new(options: ContextOptions) -> ContextBuilder {
        ContextBuilder { options }
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// The argv `tool` will be run with, placeholders unexpanded.
    pub fn argv(&self, tool: ToolKind) -> Option<Vec<String>> {
        match self.options.commands.get(&tool) {
            Some(argv) => Some(argv.clone()),
            None => default_argv(tool).map(|argv| argv.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// Builds `tool`'s context for the project at `target`.
    pub async fn build(
        &self,
        tool: ToolKind,
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<CompressedContext, ContextBuildError> {
        if cancel.is_cancelled() {
            return Err(ContextBuildError::Interrupted { tool });
        }
        let started = Instant::now();
        let files = source::collect(
            target,
            &self.options.extensions,
            &self.options.skip_dirs,
            self.options.exclude.as_deref(),
        )
        .map_err(|e| ContextBuildError::Io {
            tool,
            target: target.into(),
            source: e,
        })?;
        let raw_size_bytes = source::raw_size(&files);

        let (text, degraded) = match self.argv(tool) {
            None => match tool {
                ToolKind::Nfo => (extract::data_flow_outline(&files), false),
                _ => (extract::raw_source(&files), false),
            },
            Some(argv) => self.run_external(tool, argv, target, &files, cancel).await?,
        };

        let tool_output_bytes = text.len();
        let (compressed_text, truncated) = truncate_head(text, self.options.max_output_bytes);
        if truncated {
            warn!(
                "{tool} output truncated from {tool_output_bytes} to {} bytes",
                compressed_text.len()
            );
        }
        let context = CompressedContext {
            tool,
            raw_size_bytes,
            compressed_size_bytes: compressed_text.len(),
            compressed_text,
            build_duration: started.elapsed(),
            degraded,
            truncated,
            tool_output_bytes,
        };
        info!(
            "{tool}: {} source files, {} -> {} bytes (ratio {:.2}){}",
            files.len(),
            context.raw_size_bytes,
            context.compressed_size_bytes,
            context.compression_ratio(),
            if degraded { ", degraded" } else { "" }
        );
        Ok(context)
    }

    async fn run_external(
        &self,
        tool: ToolKind,
        argv: Vec<String>,
        target: &Path,
        files: &[SourceFile],
        cancel: &CancellationToken,
    ) -> Result<(String, bool), ContextBuildError> {
        if argv.iter().any(|a| a == "{files}") && files.is_empty() {
            return Ok((String::new(), false));
        }
        let argv = expand(argv, target, files);
        match invoke::run(&argv, target, self.options.timeout, cancel).await {
            Ok(output) if accepted(tool, output.status) => {
                Ok((render(tool, &output.stdout), false))
            }
            Ok(output) => Err(ContextBuildError::ToolCrashed {
                tool,
                target: target.into(),
                status: output.status.to_string(),
                stderr: output
                    .stderr
                    .trim()
                    .chars()
                    .take(STDERR_EXCERPT_CHARS)
                    .collect(),
            }),
            Err(InvokeError::NotFound) => {
                warn!(
                    "{} not found; falling back to the built-in extractor for {tool}",
                    argv[0]
                );
                Ok((fallback(tool, files), true))
            }
            Err(InvokeError::Timeout) => Err(ContextBuildError::Timeout {
                tool,
                target: target.into(),
                timeout: self.options.timeout,
            }),
            Err(InvokeError::Interrupted) => Err(ContextBuildError::Interrupted { tool }),
            Err(InvokeError::Io(source)) => Err(ContextBuildError::Io {
                tool,
                target: target.into(),
                source,
            }),
        }
    }
}

/// Replaces `{path}` with the target directory and a `{files}` argument with one argument per
/// source file.
fn expand(argv: Vec<String>, target: &Path, files: &[SourceFile]) -> Vec<String> {
    let path = target.to_string_lossy();
    let mut expanded = Vec::with_capacity(argv.len() + files.len());
    for arg in argv {
        if arg == "{files}" {
            expanded.extend(files.iter().map(|f| f.absolute.to_string_lossy().into_owned()));
        } else {
            expanded.push(arg.replace("{path}", &path));
        }
    }
    expanded
}

fn render(tool: ToolKind, stdout: &str) -> String {
    let rendered = match tool {
        ToolKind::Callgraph => render::callgraph(stdout),
        ToolKind::Radon => render::radon(stdout),
        ToolKind::Bandit => render::bandit(stdout),
        ToolKind::Astgrep => render::astgrep(stdout),
        _ => None,
    };
    rendered.unwrap_or_else(|| stdout.to_string())
}

fn fallback(tool: ToolKind, files: &[SourceFile]) -> String {
    match tool {
        ToolKind::Callgraph => extract::call_edges(files),
        ToolKind::Radon => extract::complexity_estimate(files),
        ToolKind::Bandit => extract::risky_calls(files),
        _ => extract::signature_outline(files),
    }
}
