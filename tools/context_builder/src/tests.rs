use super::*;
use ats_core::test_util::tempdir;
use std::fs;

const APP: &str = "\
def total(items):
    result = 0
    for i in range(len(items) - 1):
        result += items[i]
    return result
";

fn options() -> ContextOptions {
    ContextOptions {
        max_output_bytes: 10_000,
        timeout: Duration::from_secs(10),
        extensions: vec!["py".into()],
        skip_dirs: vec!["__pycache__".into()],
        exclude: None,
        commands: BTreeMap::new(),
    }
}

fn project() -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("app.py"), APP).unwrap();
    dir
}

fn with_command(tool: ToolKind, argv: &[&str]) -> ContextBuilder {
    let mut options = options();
    options
        .commands
        .insert(tool, argv.iter().map(|s| s.to_string()).collect());
    ContextBuilder::new(options)
}

#[test]
fn cap_boundary() {
    let (text, truncated) = truncate_head("abcdef".into(), 6);
    assert_eq!((text.as_str(), truncated), ("abcdef", false));
    let (text, truncated) = truncate_head("abcdefg".into(), 6);
    assert_eq!((text.as_str(), truncated), ("bcdefg", true));
}

#[test]
fn cap_respects_char_boundaries() {
    // 'é' is two bytes; keeping the last 3 bytes would split it.
    let (text, truncated) = truncate_head("aébc".into(), 3);
    assert!(truncated);
    assert_eq!(text, "bc");
}

#[tokio::test]
async fn baseline_is_raw_source() {
    let dir = project();
    let ctx = ContextBuilder::new(options())
        .build(ToolKind::Baseline, dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ctx.raw_size_bytes, APP.len());
    assert!(ctx.compressed_text.contains("# === app.py ==="));
    assert!(ctx.compressed_text.ends_with(APP));
    assert!(!ctx.degraded);
    assert!(!ctx.truncated);
}

#[tokio::test]
async fn output_over_cap_keeps_the_tail() {
    let dir = project();
    let mut options = options();
    options.max_output_bytes = 20;
    let ctx = ContextBuilder::new(options)
        .build(ToolKind::Baseline, dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(ctx.truncated);
    assert_eq!(ctx.compressed_size_bytes, 20);
    assert!(APP.ends_with(&ctx.compressed_text));
    assert!(ctx.tool_output_bytes > 20);
}

#[tokio::test]
async fn nfo_is_built_in() {
    let dir = project();
    let ctx = ContextBuilder::new(options())
        .build(ToolKind::Nfo, dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(ctx.compressed_text.contains("total(items) -> ?"));
    assert!(!ctx.degraded);
}

#[cfg(unix)]
#[tokio::test]
async fn missing_binary_degrades() {
    let dir = project();
    let ctx = with_command(ToolKind::Callgraph, &["ats-missing-callgraph-4b1e", "{path}"])
        .build(ToolKind::Callgraph, dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(ctx.degraded);
    assert!(ctx.compressed_text.starts_with("# Call Graph (regex)"));
}

#[cfg(unix)]
#[tokio::test]
async fn crash_is_an_error() {
    let dir = project();
    let err = with_command(ToolKind::Radon, &["sh", "-c", "echo boom >&2; exit 3"])
        .build(ToolKind::Radon, dir.path(), &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        ContextBuildError::ToolCrashed { tool, stderr, .. } => {
            assert_eq!(tool, ToolKind::Radon);
            assert_eq!(stderr, "boom");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn bandit_exit_one_means_findings() {
    let dir = project();
    let ctx = with_command(
        ToolKind::Bandit,
        &["sh", "-c", r#"echo '{"results":[]}'; exit 1"#],
    )
    .build(ToolKind::Bandit, dir.path(), &CancellationToken::new())
    .await
    .unwrap();
    assert!(ctx.compressed_text.starts_with("# Bandit Security Analysis"));
}

#[cfg(unix)]
#[tokio::test]
async fn slow_tool_times_out() {
    let dir = project();
    let mut builder = with_command(ToolKind::Code2logic, &["sleep", "5"]);
    builder.options.timeout = Duration::from_millis(100);
    let err = builder
        .build(ToolKind::Code2logic, dir.path(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ContextBuildError::Timeout { .. }));
}

#[cfg(unix)]
#[tokio::test]
async fn files_placeholder_expands() {
    let dir = project();
    let ctx = with_command(ToolKind::Treesitter, &["echo", "{files}"])
        .build(ToolKind::Treesitter, dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(ctx.compressed_text.trim_end().ends_with("app.py"));
}

#[tokio::test]
async fn cancelled_before_start() {
    let dir = project();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = ContextBuilder::new(options())
        .build(ToolKind::Baseline, dir.path(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ContextBuildError::Interrupted { .. }));
}
