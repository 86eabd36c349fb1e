//! filemanager - sandboxed file manager engine
//!
//! Reads one JSON request per line on stdin and writes one JSON response per
//! line on stdout.

mod app;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// Sandboxed file manager over a JSON-lines stream
#[derive(Parser, Debug)]
#[command(name = "filemanager")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the per-user config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override a configuration value, e.g. `--set security.read_only=true`
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Where binary payloads (file reads, images, downloads) are written
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Log directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging and panic hook first
    let log_dir = cli.log_dir.clone().unwrap_or_else(fm_log::log_dir);
    let _guard = fm_log::init(Some(log_dir.clone()))?;

    // Clean up old logs (7 days)
    if let Err(e) = fm_log::cleanup_old_logs(&log_dir, 7) {
        tracing::warn!("Failed to cleanup old logs: {}", e);
    }

    tracing::info!("filemanager starting...");

    let manager = app::build_manager(&cli)?;
    app::run(&manager, cli.output_dir.as_deref())
}
