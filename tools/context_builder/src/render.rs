//! Renders the JSON output of callgraph-cli, radon, bandit and ast-grep into compact text.
//!
//! Every renderer returns `None` when the output is not the JSON it expects, in which case the
//! caller passes the raw output through.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Findings listed per bandit severity before the rest are summarized.
const FINDINGS_PER_SEVERITY: usize = 10;

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

fn u64_field(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn display_node(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) => ["qualified_name", "name", "id"]
            .iter()
            .map(|k| str_field(value, k))
            .find(|s| !s.is_empty())
            .unwrap_or("?")
            .to_string(),
        other => other.to_string(),
    }
}

/// `callgraph-cli --format json`: `{functions, calls, entry_points}`.
pub fn callgraph(output: &str) -> Option<String> {
    let data: Value = serde_json::from_str(output).ok()?;
    let functions = data.get("functions").and_then(Value::as_array)?;
    let empty = vec![];
    let calls = data.get("calls").and_then(Value::as_array).unwrap_or(&empty);
    let entry_points = data
        .get("entry_points")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    let mut out = format!(
        "# Call Graph (callgraph-cli)\n## Summary\n  functions: {}\n  edges: {}\n",
        functions.len(),
        calls.len()
    );
    if !entry_points.is_empty() {
        out.push_str("\n## Entry Points\n");
        for entry in entry_points {
            let _ = writeln!(out, "  - {}", display_node(entry));
        }
    }
    out.push_str("\n## Edges\n");
    for call in calls {
        let (from, to) = match call {
            Value::Array(pair) if pair.len() >= 2 => {
                (display_node(&pair[0]), display_node(&pair[1]))
            }
            Value::Object(_) => {
                let from = call.get("from").or_else(|| call.get("caller"));
                let to = call.get("to").or_else(|| call.get("callee"));
                let (Some(from), Some(to)) = (from, to) else {
                    continue;
                };
                (display_node(from), display_node(to))
            }
            _ => continue,
        };
        let _ = writeln!(out, "  {from} -> {to}");
    }
    Some(out)
}

/// `radon cc -s -j`: `{file: [{name, classname, rank, complexity, lineno}]}`.
pub fn radon(output: &str) -> Option<String> {
    let data: Value = serde_json::from_str(output).ok()?;
    let files = data.as_object()?;
    let mut blocks = vec![];
    let mut errors = vec![];
    for (file, entries) in files {
        let Some(entries) = entries.as_array() else {
            errors.push(format!("  - {file}: {}", str_field(entries, "error")));
            continue;
        };
        for block in entries {
            let name = match str_field(block, "classname") {
                "" => str_field(block, "name").to_string(),
                class => format!("{class}.{}", str_field(block, "name")),
            };
            blocks.push((
                u64_field(block, "complexity"),
                file.as_str(),
                u64_field(block, "lineno"),
                name,
                str_field(block, "rank").to_string(),
            ));
        }
    }
    blocks.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)).then(a.2.cmp(&b.2)));

    let mut out = String::from("# Radon Complexity Analysis\n");
    if !blocks.is_empty() {
        let total: u64 = blocks.iter().map(|b| b.0).sum();
        let _ = writeln!(
            out,
            "  blocks: {}, average: {:.1}",
            blocks.len(),
            total as f64 / blocks.len() as f64
        );
        let hot: Vec<_> = blocks
            .iter()
            .filter(|b| matches!(b.4.as_str(), "C" | "D" | "E" | "F"))
            .collect();
        if !hot.is_empty() {
            let _ = writeln!(out, "\n## High Complexity ({})", hot.len());
            for (complexity, file, line, name, rank) in hot {
                let _ = writeln!(out, "  {file}:{line} {name} - {rank} ({complexity})");
            }
        }
    }
    out.push_str("\n## Blocks\n");
    for (complexity, file, line, name, rank) in &blocks {
        let _ = writeln!(out, "  {file}:{line} {name} - {rank} ({complexity})");
    }
    if !errors.is_empty() {
        out.push_str("\n## Errors\n");
        for error in errors {
            out.push_str(&error);
            out.push('\n');
        }
    }
    Some(out)
}

/// `bandit -f json`: `{results: [...], metrics: {_totals: {...}}}`.
pub fn bandit(output: &str) -> Option<String> {
    let data: Value = serde_json::from_str(output).ok()?;
    let results = data.get("results").and_then(Value::as_array)?;

    let mut by_severity: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
    let mut by_test: BTreeMap<&str, usize> = BTreeMap::new();
    for issue in results {
        let severity = match str_field(issue, "issue_severity") {
            "" => "LOW",
            s => s,
        };
        by_severity.entry(severity).or_default().push(issue);
        *by_test.entry(str_field(issue, "test_name")).or_default() += 1;
    }

    let mut out = format!("# Bandit Security Analysis\n  issues: {}\n", results.len());
    for severity in ["HIGH", "MEDIUM", "LOW"] {
        let Some(issues) = by_severity.get(severity) else {
            continue;
        };
        let _ = writeln!(out, "\n## {severity} Severity Issues ({})", issues.len());
        for issue in issues.iter().take(FINDINGS_PER_SEVERITY) {
            let text: String = str_field(issue, "issue_text").chars().take(80).collect();
            let _ = writeln!(
                out,
                "  - {}:{} [{}] {text}",
                str_field(issue, "filename"),
                u64_field(issue, "line_number"),
                str_field(issue, "test_name"),
            );
        }
        if issues.len() > FINDINGS_PER_SEVERITY {
            let _ = writeln!(out, "  ... and {} more", issues.len() - FINDINGS_PER_SEVERITY);
        }
    }
    if !by_test.is_empty() {
        let mut categories: Vec<_> = by_test.into_iter().collect();
        categories.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        out.push_str("\n## Issue Categories\n");
        for (test, count) in categories {
            let _ = writeln!(out, "  - {test}: {count} occurrences");
        }
    }
    if let Some(totals) = data.pointer("/metrics/_totals") {
        out.push_str("\n## Security Metrics\n");
        let _ = writeln!(out, "  Lines scanned: {}", u64_field(totals, "loc"));
        let _ = writeln!(out, "  High severity: {}", u64_field(totals, "SEVERITY.HIGH"));
        let _ = writeln!(out, "  High confidence: {}", u64_field(totals, "CONFIDENCE.HIGH"));
    }
    Some(out)
}

/// `ast-grep run --json=stream`: one match object per line. A single JSON array is accepted too.
pub fn astgrep(output: &str) -> Option<String> {
    let trimmed = output.trim();
    let matches: Vec<Value> = if trimmed.is_empty() {
        vec![]
    } else if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).ok()?
    } else {
        trimmed
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()
            .ok()?
    };

    let mut out = format!("# ast-grep Structural Matches ({})\n", matches.len());
    for m in &matches {
        let line = m
            .pointer("/range/start/line")
            .and_then(Value::as_u64)
            .map_or(0, |l| l + 1);
        let name = m
            .pointer("/metaVariables/single/NAME/text")
            .and_then(Value::as_str);
        let args: Vec<&str> = m
            .pointer("/metaVariables/multi/ARGS")
            .and_then(Value::as_array)
            .map(|args| {
                args.iter()
                    .filter_map(|a| a.get("text").and_then(Value::as_str))
                    .filter(|t| *t != ",")
                    .collect()
            })
            .unwrap_or_default();
        let text = match name {
            Some(name) => format!("def {name}({})", args.join(", ")),
            None => str_field(m, "lines")
                .lines()
                .next()
                .unwrap_or(str_field(m, "text"))
                .trim()
                .to_string(),
        };
        let _ = writeln!(out, "  {}:{line} {text}", str_field(m, "file"));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callgraph_renders_edges() {
        let text = callgraph(
            r#"{"functions":["a","b"],"calls":[{"from":"a","to":"b"},["b","c"]],"entry_points":["a"]}"#,
        )
        .unwrap();
        assert!(text.contains("functions: 2"));
        assert!(text.contains("  - a\n"));
        assert!(text.contains("  a -> b\n"));
        assert!(text.contains("  b -> c\n"));
        assert!(callgraph("not json").is_none());
    }

    #[test]
    fn radon_sorts_by_complexity() {
        let text = radon(
            r#"{"app/x.py":[
                {"name":"small","rank":"A","complexity":2,"lineno":3},
                {"name":"big","classname":"Svc","rank":"C","complexity":14,"lineno":10}
            ],
            "app/bad.py":{"error":"invalid syntax"}}"#,
        )
        .unwrap();
        let big = text.find("## Blocks\n  app/x.py:10 Svc.big - C (14)").unwrap();
        assert!(text[big..].contains("app/x.py:3 small - A (2)"));
        assert!(text.contains("## High Complexity (1)"));
        assert!(text.contains("app/bad.py: invalid syntax"));
    }

    #[test]
    fn bandit_groups_by_severity() {
        let text = bandit(
            r#"{"results":[
                {"filename":"a.py","line_number":4,"test_name":"exec_used","issue_text":"Use of exec","issue_severity":"MEDIUM"},
                {"filename":"b.py","line_number":9,"test_name":"hardcoded_password","issue_text":"Possible password","issue_severity":"LOW"}
            ],
            "metrics":{"_totals":{"loc":120,"SEVERITY.HIGH":0}}}"#,
        )
        .unwrap();
        assert!(text.contains("## MEDIUM Severity Issues (1)\n  - a.py:4 [exec_used] Use of exec"));
        assert!(text.contains("Lines scanned: 120"));
        assert!(!text.contains("HIGH Severity"));
    }

    #[test]
    fn astgrep_reads_stream() {
        let stream = concat!(
            r#"{"file":"app/x.py","range":{"start":{"line":4}},"metaVariables":{"single":{"NAME":{"text":"run"}},"multi":{"ARGS":[{"text":"self"},{"text":","},{"text":"n"}]}}}"#,
            "\n",
            r#"{"file":"app/y.py","range":{"start":{"line":0}},"lines":"def go():\n    pass"}"#,
        );
        let text = astgrep(stream).unwrap();
        assert!(text.contains("(2)"));
        assert!(text.contains("  app/x.py:5 def run(self, n)\n"));
        assert!(text.contains("  app/y.py:1 def go():\n"));
        assert_eq!(astgrep("").unwrap(), "# ast-grep Structural Matches (0)\n");
    }
}
