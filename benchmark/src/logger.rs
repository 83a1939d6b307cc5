//! Console plus `output.log` logging for the benchmark binary.

use crate::error::BenchResult;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber: every event passing `filter` goes to stderr and to
/// `output.log` in `log_dir`.
pub fn init(filter: &str, log_dir: &Path) -> BenchResult<()> {
    fs::create_dir_all(log_dir)?;
    let log_file = File::create(log_dir.join("output.log"))?;
    let console = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let file = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(log_file));
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(filter)?)
        .with(console)
        .with(file)
        .try_init()?;
    Ok(())
}
