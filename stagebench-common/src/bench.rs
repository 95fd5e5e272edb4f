//! Benchmark Case Runner.
//!
//! A case is timed by starting the engine once and feeding it the same query
//! `repetitions` times, one per line. The engine prints a timing line per
//! executed query; [`crate::timing::extract`] turns those into samples.
//!
//! Any nonzero exit or stderr output invalidates the whole invocation: no
//! partial samples are kept, and the next case runs regardless.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info_span, warn};

use crate::cases::{BenchmarkCase, BenchmarkFile};
use crate::error::HarnessError;
use crate::process::{ProcessRunner, SutCommand};
use crate::timing::{DurationSample, extract};

/// Benchmark timeout used when nothing else is configured.
pub const DEFAULT_BENCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Repetitions per case used when nothing else is configured.
pub const DEFAULT_REPETITIONS: usize = 5;

/// Why a benchmark case produced no samples.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BenchmarkError {
    #[error("Benchmark timed out after {} seconds", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Benchmark failed with return code {exit_code}.")]
    UnexpectedFailure {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Benchmark could not be run: {0}")]
    Launch(String),
}

impl BenchmarkError {
    /// Reproduction recipe with both captured streams, for unexpected failures.
    pub fn diagnostic(&self, query: &str, command: &SutCommand) -> Option<String> {
        let Self::UnexpectedFailure {
            exit_code,
            stdout,
            stderr,
        } = self
        else {
            return None;
        };
        Some(format!(
            "Unexpected failure with return code {exit_code}:\n\
             $ echo -e \"{}\" | {command}\n\
             ===== stdout =====\n{stdout}\n\
             ===== stderr =====\n{stderr}\n\
             ==================",
            escape_query(query)
        ))
    }
}

/// Escape a query for an `echo -e "..."` recipe: backslash, tab, newline and
/// carriage return by name, other control and non-ASCII characters as
/// `\xNN`, `\uNNNN` or `\UNNNNNNNN`. Quotes are left alone.
pub fn escape_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for c in query.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ' '..='~' => out.push(c),
            c if u32::from(c) <= 0xff => out.push_str(&format!("\\x{:02x}", u32::from(c))),
            c if u32::from(c) <= 0xffff => out.push_str(&format!("\\u{:04x}", u32::from(c))),
            c => out.push_str(&format!("\\U{:08x}", u32::from(c))),
        }
    }
    out
}

/// One sample, ready for the CSV sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkRecord {
    pub date: NaiveDate,
    pub suite: String,
    pub benchmark: String,
    pub name: String,
    pub case: String,
    pub time: DurationSample,
}

/// A case that produced no samples, with what is needed to reproduce it.
#[derive(Debug, Clone)]
pub struct CaseFailure {
    pub case: BenchmarkCase,
    pub command: SutCommand,
    pub error: BenchmarkError,
}

/// Everything one benchmark file produced.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkFileRun {
    pub records: Vec<BenchmarkRecord>,
    pub failures: Vec<CaseFailure>,
}

/// Collapse a query onto one line so each repetition is one input line.
pub fn normalize_query(query: &str) -> String {
    query.trim().replace('\n', " ")
}

/// `repetitions` copies of the normalized query, each newline-terminated.
pub fn build_payload(query: &str, repetitions: usize) -> String {
    let line = normalize_query(query);
    let mut payload = String::with_capacity((line.len() + 1) * repetitions);
    for _ in 0..repetitions {
        payload.push_str(&line);
        payload.push('\n');
    }
    payload
}

/// Time one case. `command` is the engine invocation without the quiet/stdin
/// switches, which are appended here.
pub fn run_case(
    runner: &dyn ProcessRunner,
    command: &SutCommand,
    query: &str,
    pattern: &Regex,
    repetitions: usize,
    timeout: Duration,
) -> Result<Vec<DurationSample>, BenchmarkError> {
    let command = quiet_stdin(command);
    let payload = build_payload(query, repetitions);

    let result = runner
        .run(&command, &payload, timeout)
        .map_err(|err| match err {
            HarnessError::Timeout(limit) => BenchmarkError::Timeout(limit),
            other => BenchmarkError::Launch(other.to_string()),
        })?;

    if !result.is_clean() {
        return Err(BenchmarkError::UnexpectedFailure {
            exit_code: result.exit_code(),
            stdout: result.stdout_latin1(),
            stderr: result.stderr_latin1(),
        });
    }

    let stdout = result.stdout_latin1();
    Ok(extract(&stdout, pattern).collect())
}

fn quiet_stdin(command: &SutCommand) -> SutCommand {
    command.clone().with_args(["--quiet", "-"])
}

/// Runs whole benchmark files against the release engine binary.
#[derive(Clone)]
pub struct BenchmarkRunner {
    runner: Arc<dyn ProcessRunner>,
    binary: PathBuf,
    extra_args: Vec<String>,
    repetitions: usize,
    timeout: Duration,
}

impl BenchmarkRunner {
    pub fn new(runner: Arc<dyn ProcessRunner>, binary: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            binary: binary.into(),
            extra_args: Vec::new(),
            repetitions: DEFAULT_REPETITIONS,
            timeout: DEFAULT_BENCH_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    #[must_use]
    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `<binary> -t <schema> [extra args]`
    pub fn command_for(&self, schema: &Path) -> SutCommand {
        SutCommand::new(&self.binary, ["-t".to_string(), schema.display().to_string()])
            .with_args(self.extra_args.iter().cloned())
    }

    /// The exact command line a case of this schema is run with.
    pub fn invocation_for(&self, schema: &Path) -> SutCommand {
        quiet_stdin(&self.command_for(schema))
    }

    /// Run every case of `file`; a failing case never stops the others.
    pub fn run_file(&self, file: &BenchmarkFile, date: NaiveDate) -> BenchmarkFileRun {
        let _span = info_span!("bench_file", path = %file.path.display()).entered();
        let command = self.command_for(&file.schema_path());
        let mut run = BenchmarkFileRun::default();

        for case in &file.cases {
            debug!(case = %case.name, command = %command, "Running benchmark case");
            match run_case(
                self.runner.as_ref(),
                &command,
                &case.query,
                &file.pattern,
                self.repetitions,
                self.timeout,
            ) {
                Ok(samples) => {
                    debug!(case = %case.name, samples = samples.len(), "Benchmark case finished");
                    run.records.extend(samples.into_iter().map(|time| BenchmarkRecord {
                        date,
                        suite: file.suite.clone(),
                        benchmark: file.benchmark.clone(),
                        name: file.name.clone(),
                        case: case.name.clone(),
                        time,
                    }));
                }
                Err(error) => {
                    warn!(
                        suite = %file.suite,
                        benchmark = %file.benchmark,
                        case = %case.name,
                        %error,
                        "Benchmark case failed"
                    );
                    run.failures.push(CaseFailure {
                        case: case.clone(),
                        command: quiet_stdin(&command),
                        error,
                    });
                }
            }
        }

        run
    }
}
