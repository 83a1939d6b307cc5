//! Works out which problem the repair pipeline should ask the LLM to fix.

use context_builder::source::{self, SourceFile};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Used when the target shows no sign of a concrete problem.
pub const GENERAL_REVIEW: &str = "General code review: find bugs, missing error handling, and \
     refactoring opportunities in this project.";

/// Instruction for analysis runs when no problem is configured.
pub const ANALYSIS_FOCUS: &str = "Find bugs, data flow issues, and refactoring opportunities.";

const MARKERS: [&str; 3] = ["# TODO", "# FIXME", "# HACK"];
const MAX_ISSUES: usize = 10;
const MAX_SCANNED_FILES: usize = 50;
const TODO_LINE_CHARS: usize = 200;

/// Returns `explicit` if set, otherwise a problem detected in the project at `target`. Nothing
/// under `output` is scanned.
pub fn resolve(
    explicit: Option<&str>,
    target: &Path,
    extensions: &[String],
    skip_dirs: &[String],
    output: &Path,
) -> String {
    if let Some(problem) = explicit.map(str::trim).filter(|p| !p.is_empty()) {
        return problem.to_string();
    }
    let files = match source::collect(target, extensions, skip_dirs, Some(output)) {
        Ok(files) => files,
        Err(e) => {
            warn!("Cannot scan {} for problems: {e}", target.display());
            vec![]
        }
    };
    let problem = auto_detect(target, &files);
    debug!("Auto-detected problem: {problem}");
    problem
}

/// Looks for, in order: an actionable line in `TODO.md`, then TODO/FIXME/HACK comments, stubs
/// raising `NotImplementedError` and bodies made of `pass` in the source files.
pub fn auto_detect(target: &Path, files: &[SourceFile]) -> String {
    if let Ok(todo) = fs::read_to_string(target.join("TODO.md")) {
        let actionable = todo
            .lines()
            .map(str::trim)
            .find(|line| !line.starts_with('#') && line.chars().count() > 20);
        if let Some(line) = actionable {
            let line: String = line.chars().take(TODO_LINE_CHARS).collect();
            return format!("From TODO.md: {line}");
        }
    }

    let mut issues = vec![];
    for file in files.iter().take(MAX_SCANNED_FILES) {
        for (number, line) in file.content.lines().enumerate() {
            if MARKERS.iter().any(|marker| line.contains(marker)) {
                issues.push(format!("{}:{}: {}", file.relative, number + 1, line.trim()));
            }
        }
        if file.content.contains("raise NotImplementedError") {
            issues.push(format!("{}: has NotImplementedError stubs", file.relative));
        }
        if file.content.contains("pass  #") || file.content.matches("pass\n").count() > 3 {
            issues.push(format!("{}: has empty pass stubs", file.relative));
        }
    }
    if issues.is_empty() {
        return GENERAL_REVIEW.to_string();
    }
    issues.truncate(MAX_ISSUES);
    format!("Auto-detected issues:\n{}", issues.join("\n"))
}
