mod cli;
mod config;
mod logging;
mod timeline;

use crate::config::Config;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ling-timeline", version)]
#[command(about = "Linggen timeline: sync and group agent conversation feeds", long_about = None)]
struct Cli {
    /// Config file. If omitted, searches the usual locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (overrides config and RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a recorded JSONL session through the live timeline
    Replay {
        file: PathBuf,
        /// Print scroll requests and the final timeline as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Run one grouping pass over a saved session history
    Group {
        file: PathBuf,
        /// Group as if the agent were still generating
        #[arg(long, default_value_t = false)]
        streaming: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_path) = match &cli.config {
        // An explicit path must load; the search falls back to defaults.
        Some(path) => (Config::load_from(path)?, Some(path.clone())),
        None => Config::load_with_path().unwrap_or_else(|e| {
            eprintln!("Warning: failed to load config, using defaults: {e}");
            (Config::default(), None)
        }),
    };

    let level = cli.log_level.as_deref().or(config.logging.level.as_deref());
    let log_dir = logging::setup_tracing_with_settings(logging::LoggingSettings {
        level,
        directory: config.logging.directory.as_deref(),
        retention_days: config.logging.retention_days,
    });
    if log_dir.is_none() {
        eprintln!("Warning: file logging unavailable");
    }
    if let Some(path) = &config_path {
        tracing::debug!("Loaded config from {}", path.display());
    }

    match cli.cmd {
        Command::Replay { file, json } => cli::replay::run(&config.timeline, &file, json).await,
        Command::Group {
            file,
            streaming,
            json,
        } => cli::group::run(&file, streaming, json),
    }
}
