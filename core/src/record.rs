//! The persisted outcome of one tool's run.

use crate::context::CompressedContext;
use crate::llm::{LlmResult, PromptPayload};
use crate::run::{RunKind, RunRequest, RunState, Stage};
use crate::tool::ToolKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// How many characters of the LLM response are copied into the record.
pub const RESPONSE_EXCERPT_CHARS: usize = 500;

/// Why a patch was not applied.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchFailure {
    /// Nothing in the response looked like a patch.
    NoPatchFound,
    /// A target path would leave the project root.
    UnsafePath,
    /// Hunk context did not match the file on disk.
    HunkMismatch,
    /// A write failed after earlier files were already written.
    PartialWrite,
    /// The project root itself could not be opened; nothing was written.
    InvalidRoot,
}

impl PatchFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            PatchFailure::NoPatchFound => "no_patch_found",
            PatchFailure::UnsafePath => "unsafe_path",
            PatchFailure::HunkMismatch => "hunk_mismatch",
            PatchFailure::PartialWrite => "partial_write",
            PatchFailure::InvalidRoot => "invalid_root",
        }
    }
}

impl fmt::Display for PatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of applying the LLM's patch to the target tree.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PatchOutcome {
    pub applied: bool,
    /// Paths relative to the project root, in the order they were written.
    pub files_changed: Vec<String>,
    pub failure_reason: Option<PatchFailure>,
    pub failed_file: Option<String>,
}

impl PatchOutcome {
    pub fn applied(files_changed: Vec<String>) -> PatchOutcome {
        PatchOutcome {
            applied: true,
            files_changed,
            failure_reason: None,
            failed_file: None,
        }
    }

    /// A failure with no files written.
    pub fn rejected(reason: PatchFailure, failed_file: Option<String>) -> PatchOutcome {
        PatchOutcome {
            applied: false,
            files_changed: vec![],
            failure_reason: Some(reason),
            failed_file,
        }
    }
}

/// The prose that comes with a JSON repair answer next to its `fixed_files`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RepairNotes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl RepairNotes {
    /// Whether the answer came with a regression test.
    pub fn has_test(&self) -> bool {
        self.test_code.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// The class of error that stopped a run.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ContextBuild,
    PromptAssembly,
    LlmRequest,
    PatchApply,
    Record,
    Interrupted,
    /// The pipeline itself misbehaved (illegal state transition, lost task).
    Internal,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Failure {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub reason: String,
}

/// One tool's row of benchmark data. Also the content of `results.json`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BenchmarkRecord {
    pub tool: ToolKind,
    pub kind: RunKind,
    pub state: RunState,
    pub target_project: PathBuf,
    pub problem: String,
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f32,

    pub tokens_in: u64,
    pub tokens_out: u64,
    /// Whole run, context building through patching.
    pub duration_sec: f64,
    pub duration_context_sec: f64,
    pub duration_llm_sec: f64,

    pub context_size: usize,
    pub raw_size: usize,
    pub compression_ratio: f64,
    pub degraded: bool,
    pub context_truncated: bool,
    pub prompt_truncated: bool,
    pub estimated_prompt_tokens: usize,
    pub llm_retries: u32,

    /// Number of review keywords found in the response (analysis runs only).
    pub quality_keywords: Option<u32>,
    pub response_excerpt: String,
    pub patch: Option<PatchOutcome>,
    /// Diagnosis, test and summary from a JSON repair answer (repair runs only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair_notes: Option<RepairNotes>,
    pub failure: Option<Failure>,
    pub recorded_at: DateTime<Utc>,
}

impl BenchmarkRecord {
    /// An empty record for `request`, in the `Pending` state.
    pub fn new(request: &RunRequest) -> BenchmarkRecord {
        BenchmarkRecord {
            tool: request.tool,
            kind: request.kind,
            state: RunState::Pending,
            target_project: request.target_project.clone(),
            problem: request.problem_description.clone(),
            model_id: request.model_id.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tokens_in: 0,
            tokens_out: 0,
            duration_sec: 0.0,
            duration_context_sec: 0.0,
            duration_llm_sec: 0.0,
            context_size: 0,
            raw_size: 0,
            compression_ratio: 0.0,
            degraded: false,
            context_truncated: false,
            prompt_truncated: false,
            estimated_prompt_tokens: 0,
            llm_retries: 0,
            quality_keywords: None,
            response_excerpt: String::new(),
            patch: None,
            repair_notes: None,
            failure: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn apply_context(&mut self, context: &CompressedContext) {
        self.context_size = context.compressed_size_bytes;
        self.raw_size = context.raw_size_bytes;
        self.compression_ratio = context.compression_ratio();
        self.degraded = context.degraded;
        self.context_truncated = context.truncated;
        self.duration_context_sec = context.build_duration.as_secs_f64();
    }

    pub fn apply_prompt(&mut self, payload: &PromptPayload) {
        self.prompt_truncated = payload.truncated;
        self.estimated_prompt_tokens = payload.estimated_tokens;
    }

    pub fn apply_llm(&mut self, result: &LlmResult) {
        self.tokens_in = result.tokens_in;
        self.tokens_out = result.tokens_out;
        self.duration_llm_sec = result.latency_seconds;
        self.llm_retries = result.retries;
        self.model_id = result.model_id.clone();
        self.response_excerpt = result
            .raw_response_text
            .chars()
            .take(RESPONSE_EXCERPT_CHARS)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> RunRequest {
        RunRequest {
            tool: ToolKind::Radon,
            kind: RunKind::Repair,
            target_project: "sample".into(),
            problem_description: "fix it".into(),
            model_id: "m".into(),
            max_tokens: 100,
            temperature: 0.2,
        }
    }

    #[test]
    fn metrics_are_copied_in() {
        let mut record = BenchmarkRecord::new(&request());
        record.apply_context(&CompressedContext {
            tool: ToolKind::Radon,
            raw_size_bytes: 1000,
            compressed_text: String::new(),
            compressed_size_bytes: 250,
            build_duration: Duration::from_millis(1500),
            degraded: true,
            truncated: false,
            tool_output_bytes: 250,
        });
        record.apply_llm(&LlmResult {
            raw_response_text: "é".repeat(800),
            tokens_in: 70,
            tokens_out: 9,
            latency_seconds: 2.0,
            model_id: "m2".into(),
            retries: 1,
        });
        assert_eq!(record.compression_ratio, 0.25);
        assert!(record.degraded);
        assert_eq!(record.duration_context_sec, 1.5);
        assert_eq!(record.response_excerpt.chars().count(), RESPONSE_EXCERPT_CHARS);
        assert_eq!(record.model_id, "m2");
        assert_eq!(record.llm_retries, 1);
    }

    #[test]
    fn json_has_summary_fields() {
        let mut record = BenchmarkRecord::new(&request());
        record.state = RunState::Failed(Stage::ApplyingPatch);
        record.patch = Some(PatchOutcome::rejected(PatchFailure::UnsafePath, None));
        let json = serde_json::to_value(&record).unwrap();
        for key in [
            "tool",
            "tokens_in",
            "tokens_out",
            "duration_sec",
            "context_size",
            "compression_ratio",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["tool"], "radon");
        assert_eq!(json["state"], "failed(applying_patch)");
        assert_eq!(json["patch"]["failure_reason"], "unsafe_path");
        let back: BenchmarkRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
