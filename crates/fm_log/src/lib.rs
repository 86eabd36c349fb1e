//! File manager logging
//!
//! Provides structured logging, log retention and crash reports.

mod panic_hook;
mod logging;

pub use panic_hook::init_panic_hook;
pub use logging::{init_logging, cleanup_old_logs, LOG_FILE_PREFIX};

use std::path::PathBuf;
use directories::ProjectDirs;
use tracing_appender::non_blocking::WorkerGuard;

/// Get the default log directory
pub fn log_dir() -> PathBuf {
    ProjectDirs::from("com", "FileManager", "FileManager")
        .map(|dirs| dirs.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("./logs"))
}

/// Initialize logging and the panic hook
///
/// The returned guard flushes the log file when dropped; keep it alive for the
/// lifetime of the process.
pub fn init(dir: Option<PathBuf>) -> anyhow::Result<WorkerGuard> {
    let guard = init_logging(&dir.unwrap_or_else(log_dir))?;
    init_panic_hook();
    Ok(guard)
}
