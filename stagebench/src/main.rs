//! Stagebench - staged integration tests and query benchmarks
//!
//! Drives an external query engine binary as a black box: `test` checks each
//! stage of every integration test file against its declared expectations,
//! `bench` times benchmark queries and appends the samples to a CSV file.

#![forbid(unsafe_code)]

mod commands;
mod ui;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stagebench_common::{HarnessConfig, LogConfig, init_logging};
use tracing::debug;

use crate::commands::{BenchArgs, TestArgs};
use crate::ui::UiOptions;

#[derive(Parser)]
#[command(name = "stagebench")]
#[command(
    author,
    version,
    about = "Stagebench - staged integration tests and benchmarks for a query engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Report passing stages and benchmark commands too
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: stagebench.toml in the current directory)
    #[arg(long, global = true, env = "STAGEBENCH_CONFIG")]
    config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Also write JSON logs to this directory
    #[arg(long, global = true, env = "STAGEBENCH_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run integration test files stage by stage
    Test(TestArgs),

    /// Run benchmark files and record timings as CSV
    Bench(BenchArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let ui = UiOptions::detect(cli.verbose, cli.no_color);

    let mut log_config = LogConfig::from_env("warn").with_stderr().with_ansi(ui.color);
    if cli.verbose {
        log_config = log_config.with_level("info");
    }
    if let Some(dir) = &cli.log_dir {
        log_config = log_config.with_log_dir(dir);
    }
    let _logging_guards = init_logging(&log_config)?;

    let root = std::env::current_dir().context("Failed to determine current directory")?;
    let config = HarnessConfig::load(&root, cli.config.as_deref())
        .context("Failed to load configuration")?;
    debug!(root = %config.root.display(), "Configuration loaded");

    let succeeded = match cli.command {
        Commands::Test(args) => commands::test::run(config, args, ui).await?,
        Commands::Bench(args) => {
            tokio::task::spawn_blocking(move || commands::bench::run(config, args, ui))
                .await
                .context("Benchmark worker panicked")??
        }
    };

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
