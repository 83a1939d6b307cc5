use crate::parse::{FileChange, Hunk, PatchSet};
use crate::sandbox::{SafePath, Sandbox};
use ats_core::{PatchFailure, PatchOutcome};
use std::collections::HashMap;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// What will happen to one file once every change has been checked.
enum Planned {
    Write(String),
    Delete,
}

/// Applies `patch` to the tree at `root`.
///
/// Every path is validated and every hunk is matched before anything is written, so unsafe paths
/// and mismatched hunks leave the tree untouched. Writes are atomic per file; if one fails, the
/// files written before it stay written and are reported in `files_changed`.
pub fn apply(root: &Path, patch: &PatchSet) -> PatchOutcome {
    let sandbox = match Sandbox::new(root) {
        Ok(sandbox) => sandbox,
        Err(e) => {
            warn!("Cannot open patch root {}: {e}", root.display());
            return PatchOutcome::rejected(PatchFailure::InvalidRoot, None);
        }
    };

    let mut targets = Vec::with_capacity(patch.changes.len());
    for change in &patch.changes {
        match sandbox.resolve(change.path()) {
            Some(safe) => targets.push(safe),
            None => {
                warn!("Rejecting patch: unsafe path {:?}", change.path());
                return PatchOutcome::rejected(
                    PatchFailure::UnsafePath,
                    Some(change.path().to_string()),
                );
            }
        }
    }

    // Staged content per file, so several changes to one file compose.
    let mut staged: HashMap<PathBuf, Option<String>> = HashMap::new();
    let mut order: Vec<SafePath> = vec![];
    for (change, target) in patch.changes.iter().zip(targets) {
        let planned = match change {
            FileChange::Write { content, .. } => Planned::Write(content.clone()),
            FileChange::Delete { .. } => Planned::Delete,
            FileChange::Edit { hunks, .. } => {
                let current = match staged.get(&target.absolute) {
                    Some(Some(content)) => Some(content.clone()),
                    Some(None) => None,
                    None => std::fs::read_to_string(&target.absolute).ok(),
                };
                let Some(updated) = current.and_then(|c| apply_hunks(&c, hunks)) else {
                    warn!("Rejecting patch: hunks do not match {}", target.relative);
                    return PatchOutcome::rejected(
                        PatchFailure::HunkMismatch,
                        Some(target.relative.clone()),
                    );
                };
                Planned::Write(updated)
            }
        };
        let content = match planned {
            Planned::Write(content) => Some(content),
            Planned::Delete => None,
        };
        if staged.insert(target.absolute.clone(), content).is_none() {
            order.push(target);
        }
    }

    let mut files_changed = vec![];
    for target in order {
        let result = match staged.remove(&target.absolute) {
            Some(Some(content)) => write_atomic(&target.absolute, &content),
            Some(None) => remove(&target.absolute),
            None => continue,
        };
        if let Err(e) = result {
            warn!("Failed to write {}: {e}", target.relative);
            return PatchOutcome {
                applied: false,
                files_changed,
                failure_reason: Some(PatchFailure::PartialWrite),
                failed_file: Some(target.relative),
            };
        }
        debug!("Patched {}", target.relative);
        files_changed.push(target.relative);
    }
    PatchOutcome::applied(files_changed)
}

/// Writes `content` to `path` through a temporary file in the same directory, synced before the
/// rename.
pub fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    let parent = path.parent().ok_or(io::ErrorKind::InvalidInput)?;
    std::fs::create_dir_all(parent)?;
    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(content.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn remove(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn same_line(a: &str, b: &str) -> bool {
    a.trim_end() == b.trim_end()
}

fn matches_at(lines: &[&str], at: usize, expected: &[&str]) -> bool {
    at + expected.len() <= lines.len()
        && lines[at..at + expected.len()]
            .iter()
            .zip(expected)
            .all(|(a, b)| same_line(a, b))
}

/// Applies `hunks` to `original`. Each hunk must match at its stated line or at exactly one other
/// place after the previous hunk. Returns `None` on any mismatch.
pub fn apply_hunks(original: &str, hunks: &[Hunk]) -> Option<String> {
    let trailing_newline = original.is_empty() || original.ends_with('\n');
    let mut lines: Vec<&str> = original.lines().collect();
    let mut delta: isize = 0;
    let mut floor = 0;
    for hunk in hunks {
        let old = hunk.old_lines();
        let new = hunk.new_lines();
        let stated = (hunk.old_start.saturating_sub(1) as isize + delta).max(0) as usize;
        let at = if old.is_empty() {
            // Pure insertion. `old_start` is the line after which to insert.
            (hunk.old_start as isize + delta).clamp(floor as isize, lines.len() as isize) as usize
        } else if hunk.old_start > 0 && stated >= floor && matches_at(&lines, stated, &old) {
            stated
        } else {
            let mut found = (floor..lines.len()).filter(|&i| matches_at(&lines, i, &old));
            let first = found.next()?;
            if found.next().is_some() {
                return None;
            }
            first
        };
        lines.splice(at..at + old.len(), new.iter().copied());
        delta += new.len() as isize - old.len() as isize;
        floor = at + new.len();
    }
    let mut out = lines.join("\n");
    if trailing_newline && !out.is_empty() {
        out.push('\n');
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::HunkLine;

    fn hunk(old_start: usize, lines: &[(&str, &str)]) -> Hunk {
        Hunk {
            old_start,
            lines: lines
                .iter()
                .map(|(kind, text)| match *kind {
                    " " => HunkLine::Context(text.to_string()),
                    "-" => HunkLine::Remove(text.to_string()),
                    _ => HunkLine::Add(text.to_string()),
                })
                .collect(),
        }
    }

    #[test]
    fn hunk_at_stated_line() {
        let original = "a\nb\nc\n";
        let patched = apply_hunks(original, &[hunk(2, &[(" ", "b"), ("-", "c"), ("+", "C")])]);
        assert_eq!(patched.as_deref(), Some("a\nb\nC\n"));
    }

    #[test]
    fn hunk_found_at_unique_offset() {
        let original = "x\ny\na\nb\nc\n";
        let patched = apply_hunks(original, &[hunk(1, &[(" ", "a"), ("-", "b"), ("+", "B")])]);
        assert_eq!(patched.as_deref(), Some("x\ny\na\nB\nc\n"));
    }

    #[test]
    fn ambiguous_or_missing_context_fails() {
        let original = "a\nb\na\nb\n";
        assert_eq!(
            apply_hunks(original, &[hunk(9, &[(" ", "a"), ("-", "b"), ("+", "B")])]),
            None
        );
        assert_eq!(apply_hunks(original, &[hunk(1, &[("-", "zzz")])]), None);
    }

    #[test]
    fn later_hunks_account_for_earlier_growth() {
        let original = "1\n2\n3\n4\n";
        let patched = apply_hunks(
            original,
            &[
                hunk(1, &[(" ", "1"), ("+", "1.5")]),
                hunk(3, &[("-", "3"), ("+", "three")]),
            ],
        );
        assert_eq!(patched.as_deref(), Some("1\n1.5\n2\nthree\n4\n"));
    }

    #[test]
    fn missing_trailing_newline_is_kept_missing() {
        let patched = apply_hunks("a\nb", &[hunk(2, &[("-", "b"), ("+", "c")])]);
        assert_eq!(patched.as_deref(), Some("a\nc"));
    }
}
