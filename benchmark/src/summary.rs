//! The `summary` command: loads every recorded result and prints comparison tables for the
//! analysis and repair benchmarks.

use crate::recorder::{self, RESULTS_FILE, RecordError};
use ats_core::{BenchmarkRecord, RunKind, ToolKind};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const SUMMARY_FILE: &str = "benchmark_summary.json";

/// Every record found under an output directory.
#[derive(Debug, Default, Serialize)]
pub struct Comparison {
    pub results: Vec<BenchmarkRecord>,
    pub repairs: Vec<BenchmarkRecord>,
    pub tools_count: usize,
    pub errors_count: usize,
}

impl Comparison {
    /// Reads `<output>/<tool>/results.json` and `<output>/repair/<tool>/results.json` for every
    /// tool. Missing files are skipped; unreadable ones are skipped with a warning.
    pub fn load(output: &Path) -> Comparison {
        let recorder = recorder::Recorder::new(output);
        let load_kind = |kind| {
            ToolKind::ALL
                .into_iter()
                .filter_map(|tool| {
                    read_record(&recorder.tool_dir(kind, tool).join(RESULTS_FILE))
                })
                .collect::<Vec<_>>()
        };
        let results = load_kind(RunKind::Analysis);
        let repairs = load_kind(RunKind::Repair);
        let errors_count = results
            .iter()
            .chain(&repairs)
            .filter(|r| r.failure.is_some())
            .count();
        Comparison {
            tools_count: results.len(),
            errors_count,
            results,
            repairs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty() && self.repairs.is_empty()
    }

    /// Writes `benchmark_summary.json` into `output`.
    pub fn save(&self, output: &Path) -> Result<PathBuf, RecordError> {
        let path = output.join(SUMMARY_FILE);
        recorder::write_json(&path, self)?;
        Ok(path)
    }
}

fn read_record(path: &Path) -> Option<BenchmarkRecord> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            debug!("Skipping {}: {e}", path.display());
            return None;
        }
    };
    match serde_json::from_str(&text) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Failed to load {}: {e}", path.display());
            None
        }
    }
}

fn rule(width: usize) -> String {
    "=".repeat(width)
}

/// Analysis results, best compression first, then savings against the baseline and the best tool
/// per metric.
pub fn analysis_table(results: &[BenchmarkRecord]) -> String {
    let mut out = String::new();
    if results.is_empty() {
        out.push_str("No analysis results found. Run `benchmark run` first.\n");
        return out;
    }
    let _ = writeln!(out, "{}\nANALYSIS RESULTS\n{}\n", rule(96), rule(96));
    let header = format!(
        "{:<14} | {:>9} | {:>10} | {:>11} | {:>11} | {:>8} | {:>9} | {:>7}",
        "Tool",
        "Tokens In",
        "Tokens Out",
        "Context (B)",
        "Compression",
        "LLM (s)",
        "Total (s)",
        "Quality"
    );
    let _ = writeln!(out, "{header}\n{}", "-".repeat(header.len()));

    let mut sorted: Vec<&BenchmarkRecord> = results.iter().collect();
    sorted.sort_by(|a, b| a.compression_ratio.total_cmp(&b.compression_ratio));
    for r in &sorted {
        let mut tool = r.tool.to_string();
        if r.failure.is_some() {
            tool.push_str(" *");
        } else if r.degraded {
            tool.push_str(" ~");
        }
        let _ = writeln!(
            out,
            "{:<14} | {:>9} | {:>10} | {:>11} | {:>10.1}% | {:>8.2} | {:>9.2} | {:>7}",
            tool,
            r.tokens_in,
            r.tokens_out,
            r.context_size,
            r.compression_ratio * 100.0,
            r.duration_llm_sec,
            r.duration_sec,
            r.quality_keywords.unwrap_or(0)
        );
    }
    out.push_str("\n* failed   ~ degraded (built-in fallback extractor)\n");

    let failures: Vec<_> = sorted
        .iter()
        .filter_map(|r| Some((r.tool, r.failure.as_ref()?)))
        .collect();
    if !failures.is_empty() {
        out.push_str("\nERRORS:\n");
        for (tool, failure) in failures {
            let reason: String = failure.reason.chars().take(100).collect();
            let _ = writeln!(out, "  [{tool}] {}: {reason}", failure.stage);
        }
    }

    let valid: Vec<&BenchmarkRecord> = sorted
        .iter()
        .copied()
        .filter(|r| r.failure.is_none())
        .collect();
    out.push_str("\nSUMMARY:\n");
    if let Some(baseline) = valid.iter().find(|r| r.tool == ToolKind::Baseline) {
        let base = baseline.tokens_in.max(1);
        for r in valid.iter().filter(|r| r.tool != ToolKind::Baseline && r.tokens_in > 0) {
            let savings = (1.0 - r.tokens_in as f64 / base as f64) * 100.0;
            let _ = writeln!(
                out,
                "  {}: {savings:.0}% fewer tokens than baseline ({} vs {})",
                r.tool, r.tokens_in, baseline.tokens_in
            );
        }
    }
    let best_compression = valid.first();
    let best_quality = valid.iter().max_by_key(|r| r.quality_keywords.unwrap_or(0));
    let fastest = valid
        .iter()
        .min_by(|a, b| a.duration_sec.total_cmp(&b.duration_sec));
    if let (Some(c), Some(q), Some(f)) = (best_compression, best_quality, fastest) {
        let _ = writeln!(
            out,
            "\n  Best compression: {} ({:.1}%)",
            c.tool,
            c.compression_ratio * 100.0
        );
        let _ = writeln!(
            out,
            "  Best quality:     {} ({} keywords)",
            q.tool,
            q.quality_keywords.unwrap_or(0)
        );
        let _ = writeln!(out, "  Fastest:          {} ({:.2}s)", f.tool, f.duration_sec);
    }
    out
}

/// Repair results in tool order, with the patch outcome of each, then the LLM's diagnoses.
pub fn repair_table(repairs: &[BenchmarkRecord]) -> String {
    let mut out = String::new();
    let Some(first) = repairs.first() else {
        return out;
    };
    let _ = writeln!(out, "{}\nREPAIR RESULTS\n{}\n", rule(96), rule(96));
    let problem: String = first.problem.chars().take(120).collect();
    let _ = writeln!(out, "Target:  {}", first.target_project.display());
    let _ = writeln!(out, "Problem: {problem}\n");
    let header = format!(
        "{:<14} | {:>9} | {:>10} | {:>12} | {:>13} | {:^8} | {:<24}",
        "Tool",
        "Tokens In",
        "Tokens Out",
        "Duration (s)",
        "Files Changed",
        "Has Test",
        "Status"
    );
    let _ = writeln!(out, "{header}\n{}", "-".repeat(header.len()));
    for r in repairs {
        let files = r.patch.as_ref().map_or(0, |p| p.files_changed.len());
        let has_test = match r.repair_notes.as_ref().is_some_and(|n| n.has_test()) {
            true => "yes",
            false => "no",
        };
        let status = match (&r.failure, &r.patch) {
            (None, _) => "OK".to_string(),
            (Some(_), Some(patch)) => match patch.failure_reason {
                Some(reason) => format!("NO FIX ({reason})"),
                None => "NO FIX".to_string(),
            },
            (Some(failure), None) => format!("ERROR ({})", failure.stage),
        };
        let _ = writeln!(
            out,
            "{:<14} | {:>9} | {:>10} | {:>12.2} | {:>13} | {:^8} | {:<24}",
            r.tool.to_string(),
            r.tokens_in,
            r.tokens_out,
            r.duration_sec,
            files,
            has_test,
            status
        );
    }

    let diagnoses: Vec<_> = repairs
        .iter()
        .filter_map(|r| Some((r.tool, r.repair_notes.as_ref()?.diagnosis.as_deref()?)))
        .collect();
    if !diagnoses.is_empty() {
        out.push('\n');
        for (tool, diagnosis) in diagnoses {
            let diagnosis: String = diagnosis.chars().take(200).collect();
            let _ = writeln!(out, "[{tool}] Diagnosis: {diagnosis}");
        }
    }

    let failures: Vec<_> = repairs
        .iter()
        .filter_map(|r| Some((r.tool, r.failure.as_ref()?)))
        .collect();
    if !failures.is_empty() {
        out.push_str("\nERRORS:\n");
        for (tool, failure) in failures {
            let reason: String = failure.reason.chars().take(100).collect();
            let _ = writeln!(out, "  [{tool}] {reason}");
        }
    }
    out
}
