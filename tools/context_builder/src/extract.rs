//! Built-in extractors. `raw_source` and `data_flow_outline` are the primary output of the
//! baseline and nfo tools; the rest stand in for an external tool that is not installed.
//!
//! The extractors are line based and only understand the shape of Python definitions. Contexts
//! built by a fallback extractor are flagged as degraded.

use crate::source::SourceFile;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::LazyLock;

static DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)(?:async\s+)?def\s+(\w+)\s*\(([^)]*)\)?\s*(?:->\s*([^:]+))?").unwrap()
});
static CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)class\s+(\w+)\s*(\([^)]*\))?").unwrap());
static CALL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\.)?\b([A-Za-z_]\w*)\s*\(").unwrap());
static SELF_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bself\.([A-Za-z_]\w*)\b\s*([^\s(]|$)").unwrap());
static IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:from\s+\S+\s+import\s+.+|import\s+.+)$").unwrap());
static BRANCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:if|elif|for|while|except|case|async\s+for)\b|\b(?:and|or)\b|\bif\b.*\belse\b")
        .unwrap()
});

/// Words that look like calls but are statements or builtins nobody wants in a call graph.
const NOT_CALLS: &[&str] = &[
    "if", "elif", "while", "for", "return", "and", "or", "not", "in", "print", "len", "str", "int",
    "float", "bool", "list", "dict", "set", "tuple", "super", "isinstance", "range", "def",
    "class", "lambda", "assert", "with", "except", "yield", "await",
];

/// Calls that commonly show up in security findings, with the check name reported for each.
const RISKY_CALLS: &[(&str, &str)] = &[
    (r"\beval\s*\(", "eval_used"),
    (r"\bexec\s*\(", "exec_used"),
    (r"\bpickle\.loads?\s*\(", "pickle_load"),
    (r"\byaml\.load\s*\(", "yaml_load"),
    (r"\bos\.system\s*\(", "os_system"),
    (r"\bsubprocess\.\w+\(.*shell\s*=\s*True", "subprocess_shell"),
    (r"\bhashlib\.(?:md5|sha1)\s*\(", "weak_hash"),
    (r"\brandom\.(?:random|randint|choice)\s*\(", "insecure_random"),
    (r#"(?i)\b(?:password|secret|api_key|token)\s*=\s*["'][^"']+["']"#, "hardcoded_secret"),
    (r"^\s*assert\b", "assert_used"),
    (r"except\s*:\s*(?:pass)?\s*$", "bare_except"),
];

/// A `def` found in a source file.
struct Definition<'a> {
    /// `Class.method` for methods, the bare name otherwise.
    name: String,
    params: &'a str,
    returns: Option<&'a str>,
    /// 1-based.
    line: usize,
    body: Vec<&'a str>,
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn definitions(content: &str) -> Vec<Definition<'_>> {
    let lines: Vec<&str> = content.lines().collect();
    let mut classes: Vec<(usize, &str)> = vec![];
    let mut defs = vec![];
    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = indent_of(line);
        classes.retain(|(class_indent, _)| *class_indent < indent);
        if let Some(caps) = CLASS.captures(line) {
            classes.push((indent, caps.get(2).map_or("", |m| m.as_str())));
            continue;
        }
        let Some(caps) = DEF.captures(line) else {
            continue;
        };
        let name = caps.get(2).map_or("", |m| m.as_str());
        let name = match classes.last() {
            Some((_, class)) => format!("{class}.{name}"),
            None => name.to_string(),
        };
        let body = lines[idx + 1..]
            .iter()
            .take_while(|l| l.trim().is_empty() || indent_of(l) > indent)
            .copied()
            .collect();
        defs.push(Definition {
            name,
            params: caps.get(3).map_or("", |m| m.as_str().trim()),
            returns: caps.get(4).map(|m| m.as_str().trim()),
            line: idx + 1,
            body,
        });
    }
    defs
}

fn module_name(file: &SourceFile) -> String {
    let path = file.relative.as_str();
    let stem = path.rsplit_once('.').map_or(path, |(stem, _)| stem);
    stem.replace('/', ".")
}

/// Every source file, verbatim, under a `# === path ===` header.
pub fn raw_source(files: &[SourceFile]) -> String {
    files
        .iter()
        .map(|f| format!("# === {} ===\n{}", f.relative, f.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Classes and function signatures per file.
pub fn signature_outline(files: &[SourceFile]) -> String {
    let mut out = String::from("# Signature Outline\n");
    for file in files {
        let _ = writeln!(out, "\n# {} ({} lines)", file.relative, file.content.lines().count());
        for line in file.content.lines() {
            if let Some(caps) = CLASS.captures(line) {
                let indent = " ".repeat(indent_of(line) / 2 + 2);
                let bases = caps.get(3).map_or("", |m| m.as_str());
                let _ = writeln!(out, "{indent}class {}{bases}:", &caps[2]);
            } else if let Some(caps) = DEF.captures(line) {
                let indent = " ".repeat(indent_of(line) / 2 + 2);
                let params = caps.get(3).map_or("", |m| m.as_str().trim());
                let returns = caps.get(4).map_or("?", |m| m.as_str().trim());
                let _ = writeln!(out, "{indent}def {}({params}) -> {returns}", &caps[2]);
            }
        }
    }
    out
}

/// Module imports, definitions with return types and the instance attributes each method reads
/// or writes.
pub fn data_flow_outline(files: &[SourceFile]) -> String {
    let mut out = String::from("# Data Flow Analysis (nfo)\n## Modules\n");
    let mut imports = vec![];
    for file in files {
        let _ = writeln!(out, "\n### {}", file.relative);
        for def in definitions(&file.content) {
            let _ = writeln!(
                out,
                "  {}({}) -> {}",
                def.name,
                def.params,
                def.returns.unwrap_or("?")
            );
            let attrs: BTreeSet<&str> = def
                .body
                .iter()
                .flat_map(|line| SELF_ATTR.captures_iter(line))
                .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
                .collect();
            if !attrs.is_empty() {
                let attrs: Vec<_> = attrs.into_iter().take(8).collect();
                let _ = writeln!(out, "      data: {}", attrs.join(", "));
            }
        }
        let file_imports: Vec<&str> = file
            .content
            .lines()
            .filter(|l| IMPORT.is_match(l))
            .map(str::trim)
            .collect();
        if !file_imports.is_empty() {
            imports.push((&file.relative, file_imports));
        }
    }
    if !imports.is_empty() {
        out.push_str("\n## Import Graph\n");
        for (module, file_imports) in imports {
            let _ = writeln!(out, "  {module}:");
            for import in file_imports {
                let _ = writeln!(out, "    <- {import}");
            }
        }
    }
    out
}

/// Caller -> callee edges found by matching call syntax inside each function body.
pub fn call_edges(files: &[SourceFile]) -> String {
    let mut nodes = 0;
    let mut edges = BTreeSet::new();
    for file in files {
        let module = module_name(file);
        for def in definitions(&file.content) {
            nodes += 1;
            let caller = format!("{module}.{}", def.name);
            for line in &def.body {
                let code = line.split('#').next().unwrap_or("");
                for caps in CALL.captures_iter(code) {
                    let callee = &caps[2];
                    if NOT_CALLS.contains(&callee) {
                        continue;
                    }
                    let kind = if caps.get(1).is_some() { "method" } else { "call" };
                    edges.insert((caller.clone(), callee.to_string(), kind));
                }
            }
        }
    }
    let mut out = format!(
        "# Call Graph (regex)\n## Summary\n  functions: {nodes}\n  edges: {}\n\n## Edges\n",
        edges.len()
    );
    for (caller, callee, kind) in &edges {
        let _ = writeln!(out, "  {caller} -> {callee} [{kind}]");
    }
    out
}

fn rank(complexity: usize) -> char {
    match complexity {
        0..=5 => 'A',
        6..=10 => 'B',
        11..=20 => 'C',
        21..=30 => 'D',
        31..=40 => 'E',
        _ => 'F',
    }
}

/// Cyclomatic complexity approximated as one plus the number of branch points in each function.
pub fn complexity_estimate(files: &[SourceFile]) -> String {
    let mut blocks = vec![];
    for file in files {
        for def in definitions(&file.content) {
            let branches: usize = def
                .body
                .iter()
                .map(|line| BRANCH.find_iter(line.split('#').next().unwrap_or("")).count())
                .sum();
            blocks.push((1 + branches, file.relative.as_str(), def.name, def.line));
        }
    }
    blocks.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)).then(a.3.cmp(&b.3)));
    let mut out = String::from("# Complexity Estimate (branch count)\n");
    let total: usize = blocks.iter().map(|b| b.0).sum();
    if !blocks.is_empty() {
        let _ = writeln!(
            out,
            "  blocks: {}, average: {:.1}",
            blocks.len(),
            total as f64 / blocks.len() as f64
        );
    }
    out.push_str("\n## Blocks\n");
    for (complexity, file, name, line) in blocks {
        let _ = writeln!(out, "  {file}:{line} {name} - {} ({complexity})", rank(complexity));
    }
    out
}

/// Lines calling functions that commonly appear in security findings.
pub fn risky_calls(files: &[SourceFile]) -> String {
    let checks: Vec<(Regex, &str)> = RISKY_CALLS
        .iter()
        .filter_map(|(pattern, name)| Regex::new(pattern).ok().map(|re| (re, *name)))
        .collect();
    let mut findings = vec![];
    for file in files {
        for (idx, line) in file.content.lines().enumerate() {
            for (re, name) in &checks {
                if re.is_match(line) {
                    findings.push(format!(
                        "  - {}:{} [{name}] {}",
                        file.relative,
                        idx + 1,
                        line.trim()
                    ));
                }
            }
        }
    }
    let mut out = format!("# Risky Call Scan\n## Findings ({})\n", findings.len());
    for finding in findings {
        out.push_str(&finding);
        out.push('\n');
    }
    out
}
