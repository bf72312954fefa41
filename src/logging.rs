//! Run-scoped logging.
//!
//! Operator-facing events (INFO and up, or whatever `RUST_LOG` asks for) go
//! to the console; the full DEBUG trail goes to `output.log` in the run
//! directory. The file writer is flushed when the [`LogContext`] is dropped,
//! so the context must live until the report is written.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub struct LogContext {
    log_file: PathBuf,
    _guard: WorkerGuard,
}

impl LogContext {
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Flush and close the log file.
    pub fn finish(self) {
        tracing::debug!(path = %self.log_file.display(), "closing run log");
    }
}

/// Install the console + file subscriber for this process.
pub fn init(log_file: &Path) -> Result<LogContext> {
    let dir = log_file
        .parent()
        .ok_or_else(|| anyhow!("log file {} has no parent directory", log_file.display()))?;
    let name = log_file
        .file_name()
        .ok_or_else(|| anyhow!("log file {} has no file name", log_file.display()))?;

    let appender = tracing_appender::rolling::never(dir, name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(EnvFilter::new("info,circuitcheck=debug"));

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_filter(console_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("failed to install log subscriber")?;

    Ok(LogContext {
        log_file: log_file.to_path_buf(),
        _guard: guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_events_reach_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("output.log");

        let ctx = init(&path).unwrap();
        tracing::debug!(marker = "file-only-detail", "diagnostic event");
        assert_eq!(ctx.log_file(), path.as_path());
        ctx.finish();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("file-only-detail"));
    }
}
