//! Extracts a patch from free-form LLM output.
//!
//! Three shapes are recognised, tried in this order:
//! 1. a JSON object with a `fixed_files` map from path to full file content;
//! 2. a unified diff;
//! 3. fenced code blocks labelled with a file path.

use ats_core::RepairNotes;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static HUNK_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap());
static FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*(`{3,}|~{3,})\s*(\S*)").unwrap());
static PATH_LABELS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^(?i:file|path|filename)\s*:\s*`?([^`\s]+)`?\s*$",
        r"^#{1,6}\s+`?([^`\s]+)`?\s*:?\s*$",
        r"^\*\*`?([^`*\s]+)`?\*\*\s*:?\s*$",
        r"^`([^`\s]+)`\s*:?\s*$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

/// Everything a response asks to change, in the order it was given.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchSet {
    pub changes: Vec<FileChange>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FileChange {
    /// Replace (or create) the file with `content`.
    Write { path: String, content: String },
    Delete { path: String },
    /// Apply unified diff hunks to an existing file.
    Edit { path: String, hunks: Vec<Hunk> },
}

impl FileChange {
    pub fn path(&self) -> &str {
        match self {
            FileChange::Write { path, .. }
            | FileChange::Delete { path }
            | FileChange::Edit { path, .. } => path,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Hunk {
    /// 1-based line the hunk claims to start at. 0 when the header carried no line numbers.
    pub old_start: usize,
    pub lines: Vec<HunkLine>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

impl Hunk {
    /// The lines the hunk expects to find.
    pub fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }

    /// The lines the hunk leaves behind.
    pub fn new_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Add(s) => Some(s.as_str()),
                HunkLine::Remove(_) => None,
            })
            .collect()
    }
}

/// Finds the patch in `text`, or `None` if nothing in it looks like one.
pub fn parse_patch(text: &str) -> Option<PatchSet> {
    let changes = parse_fixed_files(text)
        .or_else(|| parse_unified_diff(text))
        .or_else(|| parse_fenced_files(text))?;
    Some(PatchSet { changes })
}

#[derive(Deserialize)]
struct FileEntry {
    #[serde(alias = "file", alias = "filename")]
    path: String,
    #[serde(alias = "contents", alias = "code")]
    content: String,
}

fn fixed_files(value: &Value) -> Option<Vec<FileChange>> {
    let files = value.get("fixed_files")?;
    let changes: Vec<FileChange> = match files {
        Value::Object(map) => map
            .iter()
            .filter_map(|(path, content)| {
                Some(FileChange::Write {
                    path: path.clone(),
                    content: content.as_str()?.to_string(),
                })
            })
            .collect(),
        Value::Array(_) => serde_json::from_value::<Vec<FileEntry>>(files.clone())
            .ok()?
            .into_iter()
            .map(|e| FileChange::Write {
                path: e.path,
                content: e.content,
            })
            .collect(),
        _ => return None,
    };
    (!changes.is_empty()).then_some(changes)
}

/// The first `{...}` block of `text`, matching braces outside of JSON strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Texts that may hold the JSON answer: the whole response, unlabelled or json fences, and the
/// first balanced object.
fn json_candidates(text: &str) -> impl Iterator<Item = Value> + '_ {
    let mut candidates = vec![text.trim()];
    candidates.extend(
        fenced_blocks(text)
            .into_iter()
            .filter(|b| matches!(b.info, "" | "json" | "JSON"))
            .map(|b| b.body),
    );
    candidates.extend(first_balanced_object(text));
    candidates
        .into_iter()
        .filter_map(|c| serde_json::from_str::<Value>(c).ok())
}

fn parse_fixed_files(text: &str) -> Option<Vec<FileChange>> {
    json_candidates(text).find_map(|value| fixed_files(&value))
}

/// The `diagnosis`, `test_code` and `summary` of a JSON repair answer. Blank fields count as
/// missing; `None` when the response carries none of them.
pub fn parse_repair_notes(text: &str) -> Option<RepairNotes> {
    json_candidates(text).find_map(|value| {
        let field = |name: &str| {
            value
                .get(name)?
                .as_str()
                .filter(|s| !s.trim().is_empty())
                .map(String::from)
        };
        let notes = RepairNotes {
            diagnosis: field("diagnosis"),
            test_code: field("test_code"),
            summary: field("summary"),
        };
        (notes != RepairNotes::default()).then_some(notes)
    })
}

/// A path from a `---`/`+++` header; `None` for `/dev/null`.
fn header_path(header: &str) -> Option<String> {
    let path = header.split('\t').next().unwrap_or("").trim();
    if path == "/dev/null" || path.is_empty() {
        return None;
    }
    let path = path
        .strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path);
    Some(path.to_string())
}

fn is_file_header(lines: &[&str], i: usize) -> bool {
    lines[i].starts_with("--- ") && lines.get(i + 1).is_some_and(|l| l.starts_with("+++ "))
}

fn parse_unified_diff(text: &str) -> Option<Vec<FileChange>> {
    let lines: Vec<&str> = text.lines().collect();
    let mut changes = vec![];
    let mut i = 0;
    while i < lines.len() {
        if !is_file_header(&lines, i) {
            i += 1;
            continue;
        }
        let old = header_path(&lines[i][4..]);
        let new = header_path(&lines[i + 1][4..]);
        i += 2;
        let mut hunks = vec![];
        while i < lines.len() && lines[i].starts_with("@@") {
            let header = HUNK_HEADER.captures(lines[i]);
            let old_start = header
                .as_ref()
                .and_then(|c| c.get(1)?.as_str().parse().ok())
                .unwrap_or(0);
            let old_len: Option<usize> = header.as_ref().map(|c| {
                c.get(2)
                    .map_or(Some(1), |m| m.as_str().parse().ok())
                    .unwrap_or(1)
            });
            i += 1;
            let mut body = vec![];
            while i < lines.len() {
                let line = lines[i];
                if line.starts_with("@@")
                    || line.starts_with("```")
                    || line.starts_with("diff ")
                    || is_file_header(&lines, i)
                {
                    break;
                }
                match line.chars().next() {
                    Some(' ') => body.push(HunkLine::Context(line[1..].to_string())),
                    Some('-') => body.push(HunkLine::Remove(line[1..].to_string())),
                    Some('+') => body.push(HunkLine::Add(line[1..].to_string())),
                    Some('\\') => {}
                    // Blank context lines often lose their leading space.
                    None => body.push(HunkLine::Context(String::new())),
                    Some(_) => break,
                }
                i += 1;
            }
            // Trailing blank lines past the declared length belong to the surrounding prose.
            if let Some(old_len) = old_len {
                while body.last() == Some(&HunkLine::Context(String::new()))
                    && count_old(&body) > old_len
                {
                    body.pop();
                }
            }
            hunks.push(Hunk {
                old_start,
                lines: body,
            });
        }
        match (old, new) {
            (None, Some(path)) => {
                let mut content = hunks
                    .iter()
                    .flat_map(|h| h.new_lines())
                    .collect::<Vec<_>>()
                    .join("\n");
                if !content.is_empty() {
                    content.push('\n');
                }
                changes.push(FileChange::Write { path, content });
            }
            (Some(path), None) => changes.push(FileChange::Delete { path }),
            (Some(_), Some(path)) if !hunks.is_empty() => {
                changes.push(FileChange::Edit { path, hunks })
            }
            _ => {}
        }
    }
    (!changes.is_empty()).then_some(changes)
}

fn count_old(body: &[HunkLine]) -> usize {
    body.iter()
        .filter(|l| !matches!(l, HunkLine::Add(_)))
        .count()
}

struct FencedBlock<'a> {
    info: &'a str,
    /// The non-empty line directly above the opening fence, if any.
    label: Option<&'a str>,
    body: &'a str,
}

fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    let mut blocks = vec![];
    let mut offset = 0;
    let mut previous: Option<&str> = None;
    let mut open: Option<(&str, &str, Option<&str>, usize)> = None;
    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let trimmed = line.trim_end_matches(['\n', '\r']);
        match (open, FENCE.captures(trimmed)) {
            (None, Some(caps)) => {
                let fence = caps.get(1).map_or("", |m| m.as_str());
                let info = caps.get(2).map_or("", |m| m.as_str());
                open = Some((fence, info, previous, offset));
            }
            (Some((fence, info, label, body_start)), Some(caps))
                if caps.get(2).is_none_or(|m| m.as_str().is_empty())
                    && caps.get(1).is_some_and(|m| m.as_str().starts_with(fence)) =>
            {
                blocks.push(FencedBlock {
                    info,
                    label,
                    body: &text[body_start..line_start],
                });
                open = None;
            }
            _ => {}
        }
        if !trimmed.trim().is_empty() {
            previous = Some(trimmed.trim());
        }
    }
    blocks
}

fn looks_like_path(candidate: &str) -> bool {
    !candidate.is_empty()
        && !candidate.contains(char::is_whitespace)
        && candidate
            .rsplit('/')
            .next()
            .is_some_and(|name| {
                name.contains('.') && !name.starts_with('.') && !name.ends_with('.')
            })
}

fn block_path<'a>(block: &FencedBlock<'a>) -> Option<&'a str> {
    // ```python:app/x.py or ```app/x.py
    let from_info = block.info.split_once(':').map_or(block.info, |(_, p)| p);
    if looks_like_path(from_info) {
        return Some(from_info);
    }
    let label = block.label?;
    PATH_LABELS
        .iter()
        .find_map(|re| re.captures(label)?.get(1))
        .map(|m| m.as_str().trim_end_matches(':'))
        .filter(|p| looks_like_path(p))
}

fn parse_fenced_files(text: &str) -> Option<Vec<FileChange>> {
    // Later blocks for the same path win.
    let mut by_path: BTreeMap<&str, usize> = BTreeMap::new();
    let mut changes: Vec<FileChange> = vec![];
    for block in fenced_blocks(text) {
        if matches!(block.info, "diff" | "patch" | "json") {
            continue;
        }
        let Some(path) = block_path(&block) else {
            continue;
        };
        let change = FileChange::Write {
            path: path.to_string(),
            content: block.body.to_string(),
        };
        match by_path.get(path) {
            Some(&idx) => changes[idx] = change,
            None => {
                by_path.insert(path, changes.len());
                changes.push(change);
            }
        }
    }
    (!changes.is_empty()).then_some(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &str, content: &str) -> FileChange {
        FileChange::Write {
            path: path.into(),
            content: content.into(),
        }
    }

    #[test]
    fn fixed_files_json_variants() {
        let direct = r#"{"diagnosis":"x","fixed_files":{"app/a.py":"print(1)\n"}}"#;
        assert_eq!(
            parse_patch(direct).unwrap().changes,
            [write("app/a.py", "print(1)\n")]
        );

        let fenced = "Here is the fix:\n```json\n{\"fixed_files\": {\"b.py\": \"x = 2\\n\"}}\n```\nDone.";
        assert_eq!(parse_patch(fenced).unwrap().changes, [write("b.py", "x = 2\n")]);

        let inline = "Sure {\"fixed_files\": {\"c.py\": \"s = '}'\\n\"}} hope that helps";
        assert_eq!(parse_patch(inline).unwrap().changes, [write("c.py", "s = '}'\n")]);

        let list = r#"{"fixed_files":[{"path":"d.py","content":"d = 1\n"}]}"#;
        assert_eq!(parse_patch(list).unwrap().changes, [write("d.py", "d = 1\n")]);
    }

    #[test]
    fn repair_notes_come_with_the_files() {
        let text = "```json\n{\"diagnosis\": \"loop stops early\", \"fixed_files\": \
                    {\"a.py\": \"x\"}, \"test_code\": \"def test_total(): ...\", \
                    \"summary\": \"  \"}\n```";
        let notes = parse_repair_notes(text).unwrap();
        assert_eq!(notes.diagnosis.as_deref(), Some("loop stops early"));
        assert!(notes.has_test());
        assert_eq!(notes.summary, None);

        assert_eq!(parse_repair_notes("--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b\n"), None);
        assert_eq!(parse_repair_notes(r#"{"fixed_files": {"a.py": "x"}}"#), None);
    }

    #[test]
    fn empty_fixed_files_is_not_a_patch() {
        assert_eq!(parse_patch(r#"{"diagnosis":"none","fixed_files":{}}"#), None);
        assert_eq!(parse_patch("I could not find a bug."), None);
    }

    #[test]
    fn unified_diff_in_fence() {
        let text = "\
The loop stops early.

```diff
--- a/calc.py
+++ b/calc.py
@@ -1,3 +1,3 @@
 def total(items):
-    for i in range(len(items) - 1):
+    for i in range(len(items)):
         pass
```
";
        let changes = parse_patch(text).unwrap().changes;
        assert_eq!(changes.len(), 1);
        let FileChange::Edit { path, hunks } = &changes[0] else {
            panic!("expected an edit, got {changes:?}");
        };
        assert_eq!(path, "calc.py");
        assert_eq!(hunks[0].old_start, 1);
        assert_eq!(
            hunks[0].old_lines(),
            [
                "def total(items):",
                "    for i in range(len(items) - 1):",
                "        pass"
            ]
        );
        assert_eq!(hunks[0].new_lines()[1], "    for i in range(len(items)):");
    }

    #[test]
    fn dev_null_creates_and_deletes() {
        let text = "\
--- /dev/null
+++ b/new.py
@@ -0,0 +1,2 @@
+a = 1
+b = 2
--- a/old.py
+++ /dev/null
@@ -1 +0,0 @@
-gone = True
";
        assert_eq!(
            parse_patch(text).unwrap().changes,
            [
                write("new.py", "a = 1\nb = 2\n"),
                FileChange::Delete {
                    path: "old.py".into()
                }
            ]
        );
    }

    #[test]
    fn fenced_blocks_with_path_labels() {
        let text = "\
File: app/one.py
```python
one = 1
```

### app/two.py
```python
two = 2
```

**app/three.py**
```
three = 3
```

```python:app/four.py
four = 4
```

```python
print('unlabelled')
```
";
        assert_eq!(
            parse_patch(text).unwrap().changes,
            [
                write("app/one.py", "one = 1\n"),
                write("app/two.py", "two = 2\n"),
                write("app/three.py", "three = 3\n"),
                write("app/four.py", "four = 4\n"),
            ]
        );
    }

    #[test]
    fn prose_headings_are_not_paths() {
        let text = "### Fixed version\n```python\nx = 1\n```\n";
        assert_eq!(parse_patch(text), None);
    }
}
