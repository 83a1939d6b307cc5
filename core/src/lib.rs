//! Types shared by every crate of the compression benchmark: the tool set, run state machine,
//! benchmark records, configuration and the LLM client.

pub mod config;
pub mod context;
pub mod llm;
pub mod record;
pub mod run;
pub mod test_util;
pub mod tool;

pub use context::CompressedContext;
pub use record::{BenchmarkRecord, ErrorKind, Failure, PatchFailure, PatchOutcome, RepairNotes};
pub use run::{RunKind, RunRequest, RunState, Stage};
pub use tool::ToolKind;
