//! Headless host for the npc tunnel client
//!
//! Keeps the client running according to the stored preferences, resumes it
//! after boot, and stops it cleanly on SIGINT/SIGTERM.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "npc-host")]
#[command(about = "Supervise the npc tunnel client")]
#[command(version)]
struct Cli {
    /// Host configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for preferences and the client's working files
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the host and resume the client if it should be running
    Run,

    /// Handle a boot event: resume only when auto-start is enabled
    Boot,

    /// Change stored preferences
    Set {
        /// Resume the client after boot
        #[arg(long)]
        auto_start: Option<bool>,

        /// Whether the client should be running
        #[arg(long)]
        running: Option<bool>,

        /// Command string, e.g. "-server=1.2.3.4:8024 -vkey=key -type=tcp"
        #[arg(long)]
        cmd: Option<String>,

        /// Record client output in the log
        #[arg(long)]
        log: Option<bool>,
    },

    /// Show stored preferences and the resolved client invocation
    Show {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_file.as_deref())?;

    let paths = commands::HostPaths::resolve(cli.data_dir, cli.config)?;

    smol::block_on(async {
        match cli.command {
            Commands::Run => commands::run::run(&paths, false).await,
            Commands::Boot => commands::run::run(&paths, true).await,
            Commands::Set {
                auto_start,
                running,
                cmd,
                log,
            } => {
                let changes = commands::set::Changes {
                    auto_start,
                    running,
                    cmd,
                    log,
                };
                commands::set::run(&paths, changes).await
            }
            Commands::Show { json } => commands::show::run(&paths, json).await,
        }
    })
}
