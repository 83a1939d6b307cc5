//! Library interface for the context compression benchmark.
//!
//! Each compression tool turns the target project into a context, the context goes into an LLM
//! prompt, and the results are recorded per tool so the tools can be compared.

pub mod cli;
pub mod error;
pub mod logger;
pub mod pipeline;
pub mod problem;
pub mod prompt;
pub mod quality;
pub mod recorder;
pub mod summary;

// Re-export commonly used types
pub use error::BenchResult;
pub use pipeline::{Pipeline, RunSummary};
