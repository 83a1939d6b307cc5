//! Turns an LLM's repair response into file changes under a project root.

mod apply;
pub mod parse;
pub mod sandbox;

#[cfg(test)]
mod tests;

pub use apply::{apply, apply_hunks, write_atomic};
pub use parse::{FileChange, Hunk, HunkLine, PatchSet, parse_patch, parse_repair_notes};

use ats_core::{PatchFailure, PatchOutcome};
use std::path::Path;
use tracing::info;

/// Parses `response` and applies the patch it contains to the tree at `root`.
pub fn apply_response(root: &Path, response: &str) -> PatchOutcome {
    let Some(patch) = parse_patch(response) else {
        info!("No patch found in the response");
        return PatchOutcome::rejected(PatchFailure::NoPatchFound, None);
    };
    info!(
        "Applying patch touching {} file(s) under {}",
        patch.changes.len(),
        root.display()
    );
    apply(root, &patch)
}
