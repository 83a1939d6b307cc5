//! Running an external compression tool as a child process.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
}

#[derive(Debug)]
pub(crate) enum InvokeError {
    /// The program is not installed (or not on PATH).
    NotFound,
    Io(io::Error),
    Timeout,
    Interrupted,
}

/// Runs `argv` in `cwd`, capturing its output. The child is killed if `timeout` expires or
/// `cancel` fires.
pub(crate) async fn run(
    argv: &[String],
    cwd: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ToolOutput, InvokeError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(InvokeError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty command line",
        )));
    };
    debug!("Running {argv:?}");
    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => InvokeError::NotFound,
            _ => InvokeError::Io(e),
        })?;

    // Dropping the `wait_with_output` future drops the child, which kills it.
    let output = tokio::select! {
        result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
            Ok(output) => output.map_err(InvokeError::Io)?,
            Err(_) => return Err(InvokeError::Timeout),
        },
        _ = cancel.cancelled() => return Err(InvokeError::Interrupted),
    };
    Ok(ToolOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        status: output.status,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let result = run(
            &argv(&["ats-definitely-not-installed-7f3a"]),
            Path::new("."),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(InvokeError::NotFound)));
    }

    #[tokio::test]
    async fn captures_stdout_and_status() {
        let output = run(
            &argv(&["sh", "-c", "echo hello; exit 1"]),
            Path::new("."),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.status.code(), Some(1));
    }

    #[tokio::test]
    async fn cancellation_interrupts() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run(
            &argv(&["sleep", "10"]),
            Path::new("."),
            Duration::from_secs(30),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(InvokeError::Interrupted)));
    }
}
