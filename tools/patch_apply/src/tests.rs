use super::*;
use ats_core::test_util::tempdir;
use std::fs;

const CALC: &str = "\
def total(items):
    result = 0
    for i in range(len(items) - 1):
        result += items[i]
    return result
";

const FIX: &str = "\
The loop bound skips the last element.

```diff
--- a/calc.py
+++ b/calc.py
@@ -1,5 +1,5 @@
 def total(items):
     result = 0
-    for i in range(len(items) - 1):
+    for i in range(len(items)):
         result += items[i]
     return result
```
";

fn file_count(root: &Path) -> usize {
    fs::read_dir(root).unwrap().count()
}

#[test]
fn diff_is_applied() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("calc.py"), CALC).unwrap();
    let outcome = apply_response(dir.path(), FIX);
    assert_eq!(outcome, PatchOutcome::applied(vec!["calc.py".into()]));
    assert_eq!(
        fs::read_to_string(dir.path().join("calc.py")).unwrap(),
        CALC.replace("len(items) - 1", "len(items)")
    );
}

#[test]
fn unsafe_path_writes_nothing() {
    let dir = tempdir().unwrap();
    let response =
        r#"{"fixed_files": {"../../etc/passwd": "root::0:0::/:/bin/sh\n", "aaa.py": "x = 1\n"}}"#;
    let outcome = apply_response(dir.path(), response);
    assert!(!outcome.applied);
    assert_eq!(outcome.failure_reason, Some(PatchFailure::UnsafePath));
    assert_eq!(outcome.failed_file.as_deref(), Some("../../etc/passwd"));
    assert!(outcome.files_changed.is_empty());
    assert_eq!(file_count(dir.path()), 0);
}

#[test]
fn absolute_path_outside_root_is_unsafe() {
    let dir = tempdir().unwrap();
    let outcome = apply_response(dir.path(), "File: /tmp/evil.py\n```python\nx = 1\n```\n");
    assert_eq!(outcome.failure_reason, Some(PatchFailure::UnsafePath));
}

#[test]
fn prose_is_no_patch() {
    let dir = tempdir().unwrap();
    let outcome = apply_response(dir.path(), "The code looks fine to me.");
    assert_eq!(
        outcome,
        PatchOutcome::rejected(PatchFailure::NoPatchFound, None)
    );
}

#[test]
fn fixed_files_are_written() {
    let dir = tempdir().unwrap();
    let response = "```json\n{\"diagnosis\": \"missing check\", \"fixed_files\": {\"pkg/new.py\": \"ok = True\\n\"}}\n```";
    let outcome = apply_response(dir.path(), response);
    assert_eq!(outcome, PatchOutcome::applied(vec!["pkg/new.py".into()]));
    assert_eq!(
        fs::read_to_string(dir.path().join("pkg/new.py")).unwrap(),
        "ok = True\n"
    );
}

#[test]
fn fenced_files_are_written() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("calc.py"), CALC).unwrap();
    let response = "Updated file:\n\n`calc.py`\n```python\ndef total(items):\n    return sum(items)\n```\n";
    let outcome = apply_response(dir.path(), response);
    assert!(outcome.applied);
    assert_eq!(
        fs::read_to_string(dir.path().join("calc.py")).unwrap(),
        "def total(items):\n    return sum(items)\n"
    );
}

#[test]
fn hunk_mismatch_writes_nothing() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("calc.py"), "def other():\n    pass\n").unwrap();
    let response = format!(
        "{{\"fixed_files\": {{}}}}\n{}\n--- /dev/null\n+++ b/aaa.py\n@@ -0,0 +1 @@\n+created = True\n",
        FIX
    );
    let outcome = apply_response(dir.path(), &response);
    assert_eq!(outcome.failure_reason, Some(PatchFailure::HunkMismatch));
    assert_eq!(outcome.failed_file.as_deref(), Some("calc.py"));
    assert!(!dir.path().join("aaa.py").exists());
    assert_eq!(
        fs::read_to_string(dir.path().join("calc.py")).unwrap(),
        "def other():\n    pass\n"
    );
}

#[test]
fn failed_write_keeps_earlier_files() {
    let dir = tempdir().unwrap();
    // A regular file where the second target needs a directory.
    fs::write(dir.path().join("blocker"), "").unwrap();
    let response = r#"{"fixed_files": {"a.py": "a = 1\n", "blocker/b.py": "b = 2\n"}}"#;
    let outcome = apply_response(dir.path(), response);
    assert!(!outcome.applied);
    assert_eq!(outcome.failure_reason, Some(PatchFailure::PartialWrite));
    assert_eq!(outcome.files_changed, ["a.py"]);
    assert_eq!(outcome.failed_file.as_deref(), Some("blocker/b.py"));
    assert_eq!(
        fs::read_to_string(dir.path().join("a.py")).unwrap(),
        "a = 1\n"
    );
}

#[test]
fn deletion_removes_the_file() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("old.py"), "gone = True\n").unwrap();
    let response = "--- a/old.py\n+++ /dev/null\n@@ -1 +0,0 @@\n-gone = True\n";
    let outcome = apply_response(dir.path(), response);
    assert_eq!(outcome, PatchOutcome::applied(vec!["old.py".into()]));
    assert!(!dir.path().join("old.py").exists());
}

#[test]
fn missing_root_is_not_a_partial_write() {
    let dir = tempdir().unwrap();
    let outcome = apply_response(&dir.path().join("gone"), FIX);
    assert_eq!(
        outcome,
        PatchOutcome::rejected(PatchFailure::InvalidRoot, None)
    );
    assert!(!dir.path().join("gone").exists());
}
