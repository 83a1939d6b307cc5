//! The closed set of context compression tools the benchmark knows how to drive.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A context compression tool. Every variant has exactly one handler in the context builder, so
/// adding a tool is a compile-checked change.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Code2logic,
    Nfo,
    Callgraph,
    #[serde(alias = "tree-sitter", alias = "tree_sitter")]
    Treesitter,
    #[serde(alias = "ast-grep", alias = "ast_grep")]
    Astgrep,
    Radon,
    Bandit,
    /// Raw source, no compression. Reference point for every ratio.
    Baseline,
}

impl ToolKind {
    /// Every tool, in the order they are benchmarked.
    pub const ALL: [ToolKind; 8] = [
        ToolKind::Code2logic,
        ToolKind::Nfo,
        ToolKind::Callgraph,
        ToolKind::Treesitter,
        ToolKind::Astgrep,
        ToolKind::Radon,
        ToolKind::Bandit,
        ToolKind::Baseline,
    ];

    /// This tool's name. Snake case, as it is used to create directory and file names.
    pub fn name(self) -> &'static str {
        match self {
            ToolKind::Code2logic => "code2logic",
            ToolKind::Nfo => "nfo",
            ToolKind::Callgraph => "callgraph",
            ToolKind::Treesitter => "treesitter",
            ToolKind::Astgrep => "astgrep",
            ToolKind::Radon => "radon",
            ToolKind::Bandit => "bandit",
            ToolKind::Baseline => "baseline",
        }
    }

    /// Human readable description used when labelling the context in a prompt.
    pub fn description(self) -> &'static str {
        match self {
            ToolKind::Code2logic => "code2logic (compact logic extraction)",
            ToolKind::Nfo => "nfo (data flow outline)",
            ToolKind::Callgraph => "callgraph (static call graph)",
            ToolKind::Treesitter => "tree-sitter (syntax tree summary)",
            ToolKind::Astgrep => "ast-grep (structural matches)",
            ToolKind::Radon => "radon (complexity metrics)",
            ToolKind::Bandit => "bandit (security findings)",
            ToolKind::Baseline => "raw source code (baseline, no compression)",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown tool {0:?}; expected one of code2logic, nfo, callgraph, treesitter, astgrep, radon, bandit, baseline")]
pub struct UnknownTool(pub String);

impl FromStr for ToolKind {
    type Err = UnknownTool;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        ToolKind::ALL
            .into_iter()
            .find(|tool| tool.name() == normalized)
            .ok_or_else(|| UnknownTool(s.to_string()))
    }
}
