use ats_core::{BenchmarkRecord, Failure, RunKind, RunState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// End state of every tool in one invocation. Written to `run_summary.json`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RunSummary {
    pub kind: RunKind,
    pub target_project: PathBuf,
    pub problem: String,
    pub model_id: String,
    /// Keyed by tool name.
    pub tools: BTreeMap<String, ToolSummary>,
    pub completed: usize,
    pub failed: usize,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ToolSummary {
    pub state: RunState,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub duration_sec: f64,
    pub compression_ratio: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl RunSummary {
    pub fn new(
        kind: RunKind,
        target: &Path,
        problem: &str,
        model_id: &str,
        records: &[BenchmarkRecord],
    ) -> RunSummary {
        let tools: BTreeMap<_, _> = records
            .iter()
            .map(|r| {
                let summary = ToolSummary {
                    state: r.state,
                    tokens_in: r.tokens_in,
                    tokens_out: r.tokens_out,
                    duration_sec: r.duration_sec,
                    compression_ratio: r.compression_ratio,
                    applied: r.patch.as_ref().map(|p| p.applied),
                    failure: r.failure.clone(),
                };
                (r.tool.name().to_string(), summary)
            })
            .collect();
        let failed = tools.values().filter(|t| t.state.is_failed()).count();
        RunSummary {
            kind,
            target_project: target.to_path_buf(),
            problem: problem.to_string(),
            model_id: model_id.to_string(),
            completed: tools.len() - failed,
            failed,
            tools,
            recorded_at: Utc::now(),
        }
    }

    pub fn any_failed(&self) -> bool {
        self.failed > 0
    }

    /// One line per tool: terminal state, tokens, timing and, for failures, stage and reason.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<12} {:<24} {:>10} {:>10} {:>9} {:>10}  detail",
            "tool", "state", "tokens in", "tokens out", "ratio", "time (s)"
        );
        for (name, tool) in &self.tools {
            let detail = match (&tool.failure, tool.applied) {
                (Some(failure), _) => format!("{:?}: {}", failure.kind, failure.reason),
                (None, Some(true)) => "patch applied".to_string(),
                _ => String::new(),
            };
            let _ = writeln!(
                out,
                "{:<12} {:<24} {:>10} {:>10} {:>8.1}% {:>10.2}  {}",
                name,
                tool.state.to_string(),
                tool.tokens_in,
                tool.tokens_out,
                tool.compression_ratio * 100.0,
                tool.duration_sec,
                detail
            );
        }
        let _ = write!(
            out,
            "{} completed, {} failed",
            self.completed, self.failed
        );
        out
    }
}
