//! Prompt assembly: a fixed system prompt, the problem and the compressed context, in that order,
//! fitted into a token budget.

use ats_core::llm::PromptPayload;
use ats_core::{CompressedContext, RunKind, RunRequest};
use thiserror::Error;

const ANALYSIS_SYSTEM: &str = include_str!("../prompts/analysis_system.txt");
const ANALYSIS_USER: &str = include_str!("../prompts/analysis_user.txt");
const REPAIR_SYSTEM: &str = include_str!("../prompts/repair_system.txt");
const REPAIR_USER: &str = include_str!("../prompts/repair_user.txt");

/// Appended to a context that was cut to fit the budget.
pub const TRUNCATION_MARKER: &str = "\n[... context truncated to fit the prompt budget ...]";

#[derive(Debug, Error, PartialEq)]
pub enum PromptAssemblyError {
    #[error("the prompt needs {required} tokens before any context, the budget is {budget}")]
    BudgetExceeded { required: usize, budget: usize },
}

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Builds the prompt for `request` around `context`.
///
/// When the whole prompt is over `budget` tokens, the context keeps only its beginning (cut at a
/// line break where possible) followed by `TRUNCATION_MARKER`. The same inputs always produce the
/// same payload.
pub fn assemble(
    context: &CompressedContext,
    request: &RunRequest,
    budget: usize,
) -> Result<PromptPayload, PromptAssemblyError> {
    let (system, template) = match request.kind {
        RunKind::Analysis => (ANALYSIS_SYSTEM, ANALYSIS_USER),
        RunKind::Repair => (REPAIR_SYSTEM, REPAIR_USER),
    };
    let project = request
        .target_project
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| request.target_project.display().to_string());
    let values = [
        ("{project}", project.as_str()),
        ("{problem}", request.problem_description.trim()),
        ("{tool}", request.tool.description()),
    ];
    let (before, after) = template.split_once("{context}").unwrap_or((template, ""));
    let before = fill(before, &values);
    let after = fill(after, &values);

    let system_text = system.trim_end().to_string();
    let system_tokens = estimate_tokens(&system_text);
    let fixed_chars = before.chars().count() + after.chars().count();
    // Characters the context may use without going over budget.
    let available = budget
        .checked_sub(system_tokens)
        .map(|tokens| tokens * 4)
        .and_then(|chars| chars.checked_sub(fixed_chars));

    let text = &context.compressed_text;
    let (context_text, truncated) = match available {
        Some(room) if text.chars().count() <= room => (text.clone(), false),
        Some(room) if room >= TRUNCATION_MARKER.chars().count() => {
            let mut kept = keep_prefix(text, room - TRUNCATION_MARKER.chars().count());
            kept.push_str(TRUNCATION_MARKER);
            (kept, true)
        }
        _ => {
            return Err(PromptAssemblyError::BudgetExceeded {
                required: system_tokens
                    + (fixed_chars + TRUNCATION_MARKER.chars().count()).div_ceil(4),
                budget,
            });
        }
    };

    let user_text = format!("{before}{context_text}{after}");
    let estimated_tokens = system_tokens + estimate_tokens(&user_text);
    Ok(PromptPayload {
        system_text,
        user_text,
        estimated_tokens,
        truncated,
    })
}

/// The first `max_chars` characters of `text`, shortened to the last complete line if there is
/// one.
fn keep_prefix(text: &str, max_chars: usize) -> String {
    let end = text
        .char_indices()
        .nth(max_chars)
        .map_or(text.len(), |(i, _)| i);
    let prefix = &text[..end];
    match prefix.rfind('\n') {
        Some(newline) if newline > 0 => prefix[..=newline].to_string(),
        _ => prefix.to_string(),
    }
}

/// Replaces each `{name}` placeholder in one pass, so placeholders inside substituted values
/// are left alone.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match values.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
