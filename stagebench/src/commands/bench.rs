//! `stagebench bench`: run benchmark files and append samples to the CSV sink.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use stagebench_common::bench::{escape_query, normalize_query};
use stagebench_common::cases::{discover_benchmarks, load_benchmark_file};
use stagebench_common::report::render_case_failure;
use stagebench_common::{CsvSink, HarnessConfig, HarnessError, SubprocessRunner};
use tracing::{info, warn};

use crate::ui::{Progress, UiOptions, split_args};

#[derive(Debug, Args)]
pub struct BenchArgs {
    /// Extra arguments passed to the engine binary
    #[arg(long = "args", value_name = "ARGS", allow_hyphen_values = true)]
    pub extra_args: Option<String>,

    /// Executions of each query per engine invocation
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=1000))]
    pub repetitions: Option<u16>,

    /// Engine binary to benchmark
    #[arg(long)]
    pub binary: Option<PathBuf>,

    /// CSV file receiving the samples (truncated first)
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Benchmark suites to run (default: all)
    pub suites: Vec<String>,
}

pub fn run(mut config: HarnessConfig, args: BenchArgs, ui: UiOptions) -> Result<bool> {
    if let Some(binary) = &args.binary {
        config.bench_binary = binary.clone();
    }
    if let Some(repetitions) = args.repetitions {
        config.repetitions = usize::from(repetitions);
    }
    if let Some(csv) = &args.csv {
        config.csv_path = csv.clone();
    }
    if let Some(extra) = &args.extra_args {
        config.extra_args = split_args(extra);
    }
    super::warn_config(&config.validate(), &["bench_binary"]);

    let bench_root = config.bench_root();
    let files = discover_benchmarks(&bench_root, &args.suites).with_context(|| {
        format!("Failed to discover benchmark files under {}", bench_root.display())
    })?;
    let csv_path = config.csv_path();
    let mut sink = CsvSink::create(&csv_path)
        .with_context(|| format!("Failed to create {}", csv_path.display()))?;

    let date = chrono::Local::now().date_naive();
    let bench = config.benchmark_runner(Arc::new(SubprocessRunner::new(&config.root)));
    info!(
        files = files.len(),
        repetitions = config.repetitions,
        csv = %csv_path.display(),
        "Running benchmarks"
    );

    let started = Instant::now();
    let progress = Progress::new(files.len(), &ui);
    let mut performed = 0usize;

    for path in &files {
        let shown = path.strip_prefix(&config.root).unwrap_or(path);
        progress.set_status(format!("Running benchmark \"{}\"", shown.display()));

        let file = match load_benchmark_file(path) {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Skipping malformed benchmark file");
                let reason = match err {
                    HarnessError::MalformedInput { reason, .. } => reason,
                    other => other.to_string(),
                };
                progress.println(&format!(
                    "Benchmark file \"{}\" violates schema: {reason}",
                    shown.display()
                ));
                progress.inc();
                continue;
            }
        };

        if ui.verbose {
            let command = bench.invocation_for(&file.schema_path());
            for case in &file.cases {
                progress.println(&format!(
                    "$ echo -e \"{}\" | {command}",
                    escape_query(&normalize_query(&case.query))
                ));
            }
        }

        let run = bench.run_file(&file, date);
        for failure in &run.failures {
            progress.println(&render_case_failure(&file, failure));
        }
        sink.append_all(&run.records)
            .with_context(|| format!("Failed to write {}", csv_path.display()))?;

        performed += 1;
        progress.inc();
    }
    progress.finish();

    let rows = sink.rows();
    drop(sink.into_inner().with_context(|| format!("Failed to flush {}", csv_path.display()))?);

    println!(
        "{performed}/{} benchmark files performed, {rows} samples written to {} in {}",
        files.len(),
        csv_path.display(),
        humanize_duration(started.elapsed().as_secs())
    );
    info!(performed, total = files.len(), rows, "Benchmarks finished");

    Ok(performed == files.len())
}

/// Format a duration in seconds as a human-readable string.
fn humanize_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
