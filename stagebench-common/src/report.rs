//! Console report lines, the run summary, and the benchmark CSV sink.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use colored::Colorize;
use serde::Serialize;

use crate::bench::{BenchmarkRecord, CaseFailure};
use crate::cases::BenchmarkFile;
use crate::orchestrator::{Counters, Tally};
use crate::stage::{Stage, StageOutcome};

const RULE_WIDTH: usize = 80;

/// CSV header, in column order.
pub const CSV_HEADER: &str = "date,suite,benchmark,name,case,time";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOptions {
    /// Also report passing stages.
    pub verbose: bool,
    pub color: bool,
}

/// Write one stage outcome, preceded by the file name if nothing has been
/// written for this file yet. Returns the updated `header_emitted` flag.
pub fn report_outcome<W: Write>(
    writer: &mut W,
    filename: &Path,
    outcome: &StageOutcome,
    options: ReportOptions,
    header_emitted: bool,
) -> io::Result<bool> {
    let line = match &outcome.failure {
        Some(failure) => format!(
            "└─ {} {} {failure}",
            outcome.stage,
            paint("✘", Paint::Red, options.color)
        ),
        None if options.verbose => {
            format!("└─ {} {}", outcome.stage, paint("✓", Paint::Green, options.color))
        }
        None => return Ok(header_emitted),
    };

    if !header_emitted {
        writeln!(writer, "{}", filename.display())?;
    }
    writeln!(writer, "{line}")?;
    Ok(true)
}

/// Report every outcome of one file in order.
pub fn report_file<W: Write>(
    writer: &mut W,
    filename: &Path,
    outcomes: &[StageOutcome],
    options: ReportOptions,
) -> io::Result<()> {
    let mut header_emitted = false;
    for outcome in outcomes {
        header_emitted = report_outcome(writer, filename, outcome, options, header_emitted)?;
    }
    Ok(())
}

/// Report a file that could not be loaded. Always emits the file name.
pub fn report_bad_file<W: Write>(
    writer: &mut W,
    filename: &Path,
    reason: &str,
    options: ReportOptions,
) -> io::Result<()> {
    writeln!(writer, "{}", filename.display())?;
    writeln!(
        writer,
        "└─ yaml_check {} {reason}",
        paint("!", Paint::Yellow, options.color)
    )
}

/// Passed/total for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub passed: usize,
    pub total: usize,
}

/// Totals of a test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestSummary {
    /// Stages that ran at least once, in dependency order.
    pub stages: Vec<StageSummary>,
    pub required: Tally,
    pub total: Tally,
    pub bad_files: usize,
}

impl TestSummary {
    pub fn from_counters(counters: &Counters) -> Self {
        Self {
            stages: counters
                .stages()
                .map(|(stage, tally)| StageSummary {
                    stage,
                    passed: tally.passed,
                    total: tally.total,
                })
                .collect(),
            required: counters.required(),
            total: counters.total(),
            bad_files: counters.bad_files(),
        }
    }

    pub fn all_required_passed(&self) -> bool {
        self.required.all_passed()
    }

    pub fn all_passed(&self) -> bool {
        self.total.all_passed()
    }

    /// Exit verdict: with `all`, optional stages count too.
    pub fn succeeded(&self, all: bool) -> bool {
        if all {
            self.all_passed()
        } else {
            self.all_required_passed()
        }
    }

    pub fn render_text(&self, color: bool) -> String {
        let width = self
            .stages
            .iter()
            .map(|s| s.stage.name().len())
            .chain(["Required".len(), "Total".len(), "Bad files".len()])
            .max()
            .unwrap_or_default();
        let rule = "-".repeat(RULE_WIDTH);
        let mut lines = vec![rule.clone()];

        if self.bad_files > 0 {
            lines.push(format!("{:<width$}: {}", "Bad files", self.bad_files));
            lines.push(rule.clone());
        }

        for summary in &self.stages {
            let tally = Tally {
                passed: summary.passed,
                total: summary.total,
            };
            lines.push(format!(
                "{:<width$}: {}",
                summary.stage.name(),
                ratio(tally, color)
            ));
        }
        lines.push(rule);

        for (label, tally) in [("Required", self.required), ("Total", self.total)] {
            let label = format!("{label:<width$}");
            let label = if color {
                label.bold().to_string()
            } else {
                label
            };
            lines.push(format!("{label}: {}", ratio(tally, color)));
        }

        lines.join("\n")
    }

    pub fn render_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn ratio(tally: Tally, color: bool) -> String {
    let paint_as = if tally.all_passed() {
        Paint::Green
    } else {
        Paint::Red
    };
    format!("{}/{}", paint(&tally.passed.to_string(), paint_as, color), tally.total)
}

#[derive(Clone, Copy)]
enum Paint {
    Red,
    Green,
    Yellow,
}

fn paint(text: &str, paint: Paint, color: bool) -> String {
    if !color {
        return text.to_string();
    }
    match paint {
        Paint::Red => text.red().to_string(),
        Paint::Green => text.green().to_string(),
        Paint::Yellow => text.yellow().to_string(),
    }
}

/// Report block for a benchmark case that produced no samples: the
/// reproduction recipe when there is one, then the failure line.
pub fn render_case_failure(file: &BenchmarkFile, failure: &CaseFailure) -> String {
    let mut out = String::new();
    if let Some(diagnostic) = failure
        .error
        .diagnostic(&crate::bench::normalize_query(&failure.case.query), &failure.command)
    {
        out.push_str(&format!("{}\n", file.path.display()));
        out.push_str(&diagnostic);
        out.push('\n');
    }
    out.push_str(&format!(
        "Benchmark {}/{} failed: {}",
        file.suite, file.benchmark, failure.error
    ));
    out
}

/// Appends benchmark samples as CSV rows.
pub struct CsvSink<W: Write> {
    writer: W,
    rows: usize,
}

impl CsvSink<BufWriter<File>> {
    /// Truncate `path` and write the header.
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(mut writer: W) -> io::Result<Self> {
        writeln!(writer, "{CSV_HEADER}")?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn append(&mut self, record: &BenchmarkRecord) -> io::Result<()> {
        writeln!(
            self.writer,
            "{},{},{},{},{},{:?}",
            record.date.format("%Y-%m-%d"),
            csv_field(&record.suite),
            csv_field(&record.benchmark),
            csv_field(&record.name),
            csv_field(&record.case),
            record.time
        )?;
        self.rows += 1;
        Ok(())
    }

    /// Append all records and flush, so a later crash keeps them.
    pub fn append_all(&mut self, records: &[BenchmarkRecord]) -> io::Result<()> {
        for record in records {
            self.append(record)?;
        }
        self.writer.flush()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
