//! Drives each tool through context building, prompting, the LLM call and (for repair runs)
//! patching, then records the outcome. A failing tool gets a failed record; the batch goes on.

mod report;

pub use report::{RunSummary, ToolSummary};

use crate::problem;
use crate::prompt;
use crate::quality;
use crate::recorder::{Artifact, Recorder, RepairResult};
use ats_core::config::{Config, WorkspaceMode};
use ats_core::llm::LlmClient;
use ats_core::{
    BenchmarkRecord, ErrorKind, Failure, PatchOutcome, RunKind, RunRequest, RunState, Stage,
    ToolKind,
};
use chrono::Utc;
use context_builder::{ContextBuildError, ContextBuilder, ContextOptions};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Why a run stopped early.
#[derive(Debug)]
struct StageError {
    kind: ErrorKind,
    reason: String,
}

impl StageError {
    fn new(kind: ErrorKind, reason: impl Into<String>) -> StageError {
        StageError {
            kind,
            reason: reason.into(),
        }
    }

    fn interrupted() -> StageError {
        StageError::new(ErrorKind::Interrupted, "interrupted")
    }
}

/// One tool's run in progress.
struct ToolRun {
    kind: RunKind,
    state: RunState,
    record: BenchmarkRecord,
}

impl ToolRun {
    fn new(request: &RunRequest) -> ToolRun {
        ToolRun {
            kind: request.kind,
            state: RunState::Pending,
            record: BenchmarkRecord::new(request),
        }
    }

    fn advance(&mut self, next: RunState) -> Result<(), StageError> {
        self.state = self
            .state
            .advance(self.kind, next)
            .map_err(|e| StageError::new(ErrorKind::Internal, e.to_string()))?;
        self.record.state = self.state;
        debug!("{}: {}", self.record.tool, self.state);
        Ok(())
    }

    /// Moves to `Failed` at the current stage and stores the failure in the record.
    fn fail(&mut self, error: StageError) {
        let stage = self.state.stage().unwrap_or(Stage::Recording);
        self.state = RunState::Failed(stage);
        self.record.state = self.state;
        self.record.failure = Some(Failure {
            stage,
            kind: error.kind,
            reason: error.reason,
        });
    }
}

pub struct Pipeline {
    builder: ContextBuilder,
    client: LlmClient,
    recorder: Recorder,
    target: PathBuf,
    problem: String,
    prompt_budget: usize,
    workspace: WorkspaceMode,
    skip_dirs: Vec<String>,
    max_tokens: u32,
    temperature: f32,
}

impl Pipeline {
    /// `problem` is the instruction given to every tool's run, see `problem::resolve`.
    pub fn new(config: &Config, client: LlmClient, problem: String) -> Pipeline {
        Pipeline {
            builder: ContextBuilder::new(ContextOptions::from_config(config)),
            client,
            recorder: Recorder::new(&config.output),
            target: config.target.clone(),
            problem,
            prompt_budget: config.prompt.max_prompt_tokens,
            workspace: config.repair.workspace,
            skip_dirs: config.context.skip_dirs.clone(),
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
        }
    }

    /// Problem for an analysis run: the configured one, or a general review instruction.
    pub fn analysis_problem(config: &Config) -> String {
        config
            .problem
            .clone()
            .unwrap_or_else(|| problem::ANALYSIS_FOCUS.to_string())
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn request(&self, tool: ToolKind, kind: RunKind) -> RunRequest {
        RunRequest {
            tool,
            kind,
            target_project: self.target.clone(),
            problem_description: self.problem.clone(),
            model_id: self.client.model().to_string(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    /// Runs every tool in `tools` and writes the run summary. Tools run one after another unless
    /// `parallel` is set. Returns once every tool has a terminal record.
    pub async fn run_all(
        self: Arc<Self>,
        kind: RunKind,
        tools: &[ToolKind],
        parallel: bool,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let mut unique: Vec<ToolKind> = Vec::with_capacity(tools.len());
        for &tool in tools {
            if !unique.contains(&tool) {
                unique.push(tool);
            }
        }
        info!(
            "Running {} tool(s) against {}{}",
            unique.len(),
            self.target.display(),
            if parallel { " in parallel" } else { "" }
        );

        let mut records = Vec::with_capacity(unique.len());
        if parallel {
            let mut tasks = JoinSet::new();
            for &tool in &unique {
                let pipeline = Arc::clone(&self);
                let cancel = cancel.clone();
                tasks.spawn(async move {
                    let request = pipeline.request(tool, kind);
                    pipeline.run_tool(request, &cancel).await
                });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(record) => records.push(record),
                    Err(e) => error!("A tool task did not finish: {e}"),
                }
            }
            for &tool in &unique {
                if !records.iter().any(|r| r.tool == tool) {
                    records.push(self.lost_record(tool, kind));
                }
            }
            records.sort_by_key(|r| unique.iter().position(|&t| t == r.tool));
        } else {
            for &tool in &unique {
                records.push(self.run_tool(self.request(tool, kind), cancel).await);
            }
        }

        let summary = RunSummary::new(
            kind,
            &self.target,
            &self.problem,
            self.client.model(),
            &records,
        );
        match self.recorder.write_run_summary(kind, &summary) {
            Ok(path) => info!("Run summary saved to {}", path.display()),
            Err(e) => error!("{e}"),
        }
        summary
    }

    /// Runs one tool start to finish. Never fails: problems end up in the returned record, which
    /// has also been written to disk unless writing itself failed.
    pub async fn run_tool(
        &self,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> BenchmarkRecord {
        let tool = request.tool;
        let started = Instant::now();
        let mut run = ToolRun::new(&request);
        info!("{tool}: {:?} run starting", request.kind);

        let result = match self.drive(&request, &mut run, cancel).await {
            Ok(()) => run.advance(RunState::Recorded),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("{tool}: failed during {} ({})", run.state, e.reason);
            run.fail(e);
        }
        run.record.duration_sec = started.elapsed().as_secs_f64();
        run.record.recorded_at = Utc::now();

        if let Err(e) = self.recorder.write_record(&run.record) {
            error!("{tool}: {e}");
            if run.record.failure.is_none() {
                run.state = RunState::Failed(Stage::Recording);
                run.record.state = run.state;
                run.record.failure = Some(Failure {
                    stage: Stage::Recording,
                    kind: ErrorKind::Record,
                    reason: e.to_string(),
                });
            }
        } else {
            info!(
                "{tool}: {} ({} tokens in, {} out, {:.2}s)",
                run.record.state,
                run.record.tokens_in,
                run.record.tokens_out,
                run.record.duration_sec
            );
        }
        run.record
    }

    async fn drive(
        &self,
        request: &RunRequest,
        run: &mut ToolRun,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        let (tool, kind) = (request.tool, request.kind);
        self.recorder
            .clear_tool_dir(kind, tool)
            .map_err(|e| StageError::new(ErrorKind::Record, e.to_string()))?;
        if cancel.is_cancelled() {
            return Err(StageError::interrupted());
        }

        run.advance(RunState::BuildingContext)?;
        let context = self
            .builder
            .build(tool, &self.target, cancel)
            .await
            .map_err(|e| match e {
                ContextBuildError::Interrupted { .. } => StageError::interrupted(),
                e => StageError::new(ErrorKind::ContextBuild, e.to_string()),
            })?;
        run.record.apply_context(&context);
        self.save(kind, tool, Artifact::Context, &context.compressed_text)?;

        run.advance(RunState::Prompting)?;
        let payload = prompt::assemble(&context, request, self.prompt_budget)
            .map_err(|e| StageError::new(ErrorKind::PromptAssembly, e.to_string()))?;
        run.record.apply_prompt(&payload);
        self.save(kind, tool, Artifact::SystemPrompt, &payload.system_text)?;
        self.save(kind, tool, Artifact::UserPrompt, &payload.user_text)?;

        run.advance(RunState::AwaitingLlm)?;
        info!(
            "{tool}: sending ~{} tokens to {}{}",
            payload.estimated_tokens,
            self.client.model(),
            if payload.truncated { " (context truncated)" } else { "" }
        );
        let sent = tokio::select! {
            _ = cancel.cancelled() => return Err(StageError::interrupted()),
            sent = self.client.send(&payload) => sent,
        };
        let response = sent.map_err(|e| {
            run.record.llm_retries = e.retries();
            StageError::new(ErrorKind::LlmRequest, e.to_string())
        })?;
        run.record.apply_llm(&response);
        self.save(kind, tool, Artifact::Response, &response.raw_response_text)?;

        match kind {
            RunKind::Analysis => {
                run.record.quality_keywords =
                    Some(quality::keyword_score(&response.raw_response_text));
                Ok(())
            }
            RunKind::Repair => {
                run.advance(RunState::ApplyingPatch)?;
                if cancel.is_cancelled() {
                    return Err(StageError::interrupted());
                }
                let notes = patch_apply::parse_repair_notes(&response.raw_response_text);
                run.record.repair_notes = notes.clone();
                let outcome = self.apply_patch(tool, response.raw_response_text).await?;
                run.record.patch = Some(outcome.clone());
                self.recorder
                    .write_repair_result(&RepairResult {
                        tool,
                        patch: outcome.clone(),
                        notes: notes.unwrap_or_default(),
                    })
                    .map_err(|e| StageError::new(ErrorKind::Record, e.to_string()))?;
                if outcome.applied {
                    info!("{tool}: patched {}", outcome.files_changed.join(", "));
                    return Ok(());
                }
                let mut reason = outcome
                    .failure_reason
                    .map_or("patch not applied", |r| r.as_str())
                    .to_string();
                if let Some(file) = outcome.failed_file {
                    reason = format!("{reason}: {file}");
                }
                Err(StageError::new(ErrorKind::PatchApply, reason))
            }
        }
    }

    /// Applies `response` to the tool's workspace, copying the target into it first unless
    /// patching in place.
    async fn apply_patch(
        &self,
        tool: ToolKind,
        response: String,
    ) -> Result<PatchOutcome, StageError> {
        let (root, copy) = match self.workspace {
            WorkspaceMode::InPlace => (self.target.clone(), None),
            WorkspaceMode::Copy => (
                self.recorder.workspace_dir(tool),
                Some((
                    self.target.clone(),
                    self.skip_dirs.clone(),
                    self.recorder.output().to_path_buf(),
                )),
            ),
        };
        let task_root = root.clone();
        tokio::task::spawn_blocking(move || -> io::Result<PatchOutcome> {
            if let Some((target, skip_dirs, output)) = copy {
                copy_tree(&target, &task_root, &skip_dirs, &output)?;
            }
            Ok(patch_apply::apply_response(&task_root, &response))
        })
        .await
        .map_err(|e| StageError::new(ErrorKind::Internal, e.to_string()))?
        .map_err(|e| {
            StageError::new(
                ErrorKind::PatchApply,
                format!("cannot prepare workspace {}: {e}", root.display()),
            )
        })
    }

    fn save(
        &self,
        kind: RunKind,
        tool: ToolKind,
        artifact: Artifact,
        content: &str,
    ) -> Result<(), StageError> {
        self.recorder
            .write_artifact(kind, tool, artifact, content)
            .map_err(|e| StageError::new(ErrorKind::Record, e.to_string()))
    }

    /// Record for a tool whose task vanished (panicked or was aborted).
    fn lost_record(&self, tool: ToolKind, kind: RunKind) -> BenchmarkRecord {
        let mut run = ToolRun::new(&self.request(tool, kind));
        run.fail(StageError::new(ErrorKind::Internal, "tool task did not finish"));
        if let Err(e) = self.recorder.write_record(&run.record) {
            error!("{tool}: {e}");
        }
        run.record
    }
}

/// Replaces `dst` with a copy of the regular files and directories under `src`. Directories named
/// in `skip_dirs` and anything under `exclude` are left out.
fn copy_tree(src: &Path, dst: &Path, skip_dirs: &[String], exclude: &Path) -> io::Result<()> {
    if dst.exists() {
        fs::remove_dir_all(dst)?;
    }
    fs::create_dir_all(dst)?;
    let src = src.canonicalize()?;
    let exclude = exclude.canonicalize().ok();
    let walker = WalkDir::new(&src).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        if exclude.as_deref().is_some_and(|ex| entry.path().starts_with(ex)) {
            return false;
        }
        !entry.file_type().is_dir() || !skip_dirs.iter().any(|d| entry.file_name() == d.as_str())
    });
    let mut copied = 0;
    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry.path().strip_prefix(&src).map_err(io::Error::other)?;
        let to = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&to)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &to)?;
            copied += 1;
        }
    }
    debug!("Copied {copied} file(s) into {}", dst.display());
    Ok(())
}
