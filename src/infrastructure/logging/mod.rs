//! Logging setup: `tracing-subscriber` with an `EnvFilter` driven by the
//! config's `log_level`, and optional rotation to
//! `<project_path>/.aichestrator/logs/` via `tracing-appender`. Grounded on
//! the teacher's `infrastructure/logging.rs`.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber. Returns a `WorkerGuard` that
/// must be kept alive for the process's lifetime when file logging is
/// enabled — dropping it flushes and stops the background writer.
pub fn init(log_level: &str, project_path: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match project_path {
        Some(path) => {
            let log_dir = path.join(".aichestrator/logs");
            let _ = std::fs::create_dir_all(&log_dir);
            let file_appender = tracing_appender::rolling::daily(log_dir, "aichestrator.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            fmt()
                .with_env_filter(filter)
                .json()
                .with_writer(non_blocking)
                .init();
            Some(guard)
        }
        None => {
            fmt().with_env_filter(filter).init();
            None
        }
    }
}
