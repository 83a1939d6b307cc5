//! Per-tool run description and the state machine each run moves through.

use crate::tool::ToolKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// What a run asks the LLM to do with the compressed context.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Code review of the target (the per-tool benchmark).
    Analysis,
    /// Diagnose and patch a concrete problem in the target.
    Repair,
}

/// Everything needed to run one tool through the pipeline. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunRequest {
    pub tool: ToolKind,
    pub kind: RunKind,
    pub target_project: PathBuf,
    pub problem_description: String,
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A non-terminal point of a run; `RunState::Failed` records which one failed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    BuildingContext,
    Prompting,
    AwaitingLlm,
    ApplyingPatch,
    /// Writing the record itself.
    Recording,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::BuildingContext => "building_context",
            Stage::Prompting => "prompting",
            Stage::AwaitingLlm => "awaiting_llm",
            Stage::ApplyingPatch => "applying_patch",
            Stage::Recording => "recording",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Stage::Pending,
            Stage::BuildingContext,
            Stage::Prompting,
            Stage::AwaitingLlm,
            Stage::ApplyingPatch,
            Stage::Recording,
        ]
        .into_iter()
        .find(|stage| stage.as_str() == s)
        .ok_or_else(|| format!("unknown stage {s:?}"))
    }
}

/// Lifecycle of one tool's run:
///
/// ```text
/// Pending -> BuildingContext -> Prompting -> AwaitingLlm -> ApplyingPatch -> Recorded
///                                                     \-> Recorded (analysis runs)
/// ```
///
/// `Failed(stage)` is reachable from every non-terminal state.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(into = "String", try_from = "String")]
pub enum RunState {
    Pending,
    BuildingContext,
    Prompting,
    AwaitingLlm,
    ApplyingPatch,
    Recorded,
    Failed(Stage),
}

#[derive(Debug, PartialEq, thiserror::Error)]
#[error("illegal run state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}

impl RunState {
    /// The stage this state represents, or `None` for terminal states.
    pub fn stage(self) -> Option<Stage> {
        match self {
            RunState::Pending => Some(Stage::Pending),
            RunState::BuildingContext => Some(Stage::BuildingContext),
            RunState::Prompting => Some(Stage::Prompting),
            RunState::AwaitingLlm => Some(Stage::AwaitingLlm),
            RunState::ApplyingPatch => Some(Stage::ApplyingPatch),
            RunState::Recorded | RunState::Failed(_) => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.stage().is_none()
    }

    pub fn is_failed(self) -> bool {
        matches!(self, RunState::Failed(_))
    }

    /// Moves to `next` if the transition is legal for a run of `kind`.
    pub fn advance(self, kind: RunKind, next: RunState) -> Result<RunState, InvalidTransition> {
        use RunState::*;
        let legal = match (self, next) {
            (Pending, BuildingContext)
            | (BuildingContext, Prompting)
            | (Prompting, AwaitingLlm)
            | (ApplyingPatch, Recorded) => true,
            (AwaitingLlm, ApplyingPatch) => kind == RunKind::Repair,
            (AwaitingLlm, Recorded) => kind == RunKind::Analysis,
            (from, Failed(stage)) => {
                !from.is_terminal() && (from.stage() == Some(stage) || stage == Stage::Recording)
            }
            _ => false,
        };
        if legal {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Recorded => f.write_str("recorded"),
            RunState::Failed(stage) => write!(f, "failed({stage})"),
            other => match other.stage() {
                Some(stage) => f.write_str(stage.as_str()),
                None => unreachable!("terminal states handled above"),
            },
        }
    }
}

impl From<RunState> for String {
    fn from(state: RunState) -> String {
        state.to_string()
    }
}

impl TryFrom<String> for RunState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "recorded" {
            return Ok(RunState::Recorded);
        }
        if let Some(inner) = value
            .strip_prefix("failed(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return Ok(RunState::Failed(inner.parse()?));
        }
        Ok(match value.parse::<Stage>()? {
            Stage::Pending => RunState::Pending,
            Stage::BuildingContext => RunState::BuildingContext,
            Stage::Prompting => RunState::Prompting,
            Stage::AwaitingLlm => RunState::AwaitingLlm,
            Stage::ApplyingPatch => RunState::ApplyingPatch,
            Stage::Recording => return Err("recording is not a run state".into()),
        })
    }
}
