use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Path from $THREADLIST_LOG, if set.
pub fn log_path() -> Option<PathBuf> {
    std::env::var_os("THREADLIST_LOG").map(PathBuf::from)
}

/// Append tracing output to the file at $THREADLIST_LOG.
///
/// Stdout belongs to the list output, so without the variable nothing is
/// installed and every event is discarded. The level comes from
/// $THREADLIST_LOG_LEVEL (an `EnvFilter` directive), default `debug`.
pub fn init() -> Result<()> {
    let Some(path) = log_path() else {
        return Ok(());
    };
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let filter = EnvFilter::try_from_env("THREADLIST_LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}
