//! Persists benchmark results under the output directory:
//!
//! ```text
//! <output>/<tool>/results.json                analysis runs
//! <output>/<tool>/artifacts/
//! <output>/repair/<tool>/results.json         repair runs
//! <output>/repair/<tool>/repair_result.json
//! <output>/repair/<tool>/artifacts/
//! <output>/repair/<tool>/workspace/           patched copy of the target
//! <output>/run_summary.json, <output>/repair/run_summary.json
//! ```
//!
//! Every file is written atomically and synced before the write returns.

use ats_core::{BenchmarkRecord, PatchOutcome, RepairNotes, RunKind, ToolKind};
use patch_apply::write_atomic;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const RESULTS_FILE: &str = "results.json";
pub const REPAIR_RESULT_FILE: &str = "repair_result.json";
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to write {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to serialize {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Files saved next to a run's record for later inspection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Artifact {
    SystemPrompt,
    UserPrompt,
    Context,
    Response,
}

impl Artifact {
    pub fn file_name(self) -> &'static str {
        match self {
            Artifact::SystemPrompt => "system_prompt.txt",
            Artifact::UserPrompt => "user_prompt.txt",
            Artifact::Context => "context.txt",
            Artifact::Response => "response.txt",
        }
    }
}

/// Content of `repair_result.json`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RepairResult {
    pub tool: ToolKind,
    #[serde(flatten)]
    pub patch: PatchOutcome,
    #[serde(flatten)]
    pub notes: RepairNotes,
}

pub struct Recorder {
    output: PathBuf,
}

impl Recorder {
    pub fn new(output: &Path) -> Recorder {
        Recorder {
            output: output.to_path_buf(),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Directory holding everything `tool` produced in a run of `kind`.
    pub fn tool_dir(&self, kind: RunKind, tool: ToolKind) -> PathBuf {
        match kind {
            RunKind::Analysis => self.output.join(tool.name()),
            RunKind::Repair => self.output.join("repair").join(tool.name()),
        }
    }

    /// Directory holding the per-run files of `kind` that are not tied to one tool.
    pub fn run_dir(&self, kind: RunKind) -> PathBuf {
        match kind {
            RunKind::Analysis => self.output.clone(),
            RunKind::Repair => self.output.join("repair"),
        }
    }

    /// The private copy of the target that `tool`'s patch is applied to.
    pub fn workspace_dir(&self, tool: ToolKind) -> PathBuf {
        self.tool_dir(RunKind::Repair, tool).join("workspace")
    }

    /// Removes everything an earlier run of `tool` left behind, so a re-run never sits next to
    /// stale artifacts.
    pub fn clear_tool_dir(&self, kind: RunKind, tool: ToolKind) -> Result<(), RecordError> {
        let dir = self.tool_dir(kind, tool);
        match std::fs::remove_dir_all(&dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(RecordError::Io {
                path: dir,
                source: e,
            }),
            _ => Ok(()),
        }
    }

    pub fn write_artifact(
        &self,
        kind: RunKind,
        tool: ToolKind,
        artifact: Artifact,
        content: &str,
    ) -> Result<(), RecordError> {
        let path = self
            .tool_dir(kind, tool)
            .join("artifacts")
            .join(artifact.file_name());
        write(&path, content)
    }

    /// Writes `record` as the tool's `results.json`, replacing any earlier one.
    pub fn write_record(&self, record: &BenchmarkRecord) -> Result<PathBuf, RecordError> {
        let path = self.tool_dir(record.kind, record.tool).join(RESULTS_FILE);
        write_json(&path, record)?;
        debug!("Saved {}", path.display());
        Ok(path)
    }

    pub fn write_repair_result(&self, result: &RepairResult) -> Result<PathBuf, RecordError> {
        let path = self
            .tool_dir(RunKind::Repair, result.tool)
            .join(REPAIR_RESULT_FILE);
        write_json(&path, result)?;
        Ok(path)
    }

    pub fn write_run_summary<T: Serialize>(
        &self,
        kind: RunKind,
        summary: &T,
    ) -> Result<PathBuf, RecordError> {
        let path = self.run_dir(kind).join(RUN_SUMMARY_FILE);
        write_json(&path, summary)?;
        Ok(path)
    }
}

/// Serializes `value` as pretty JSON and writes it to `path` atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), RecordError> {
    let mut json = serde_json::to_string_pretty(value).map_err(|source| RecordError::Json {
        path: path.into(),
        source,
    })?;
    json.push('\n');
    write(path, &json)
}

fn write(path: &Path, content: &str) -> Result<(), RecordError> {
    write_atomic(path, content).map_err(|source| RecordError::Io {
        path: path.into(),
        source,
    })
}
