//! Stage Runner: one SUT invocation checked against declared expectations.
//!
//! The stage set is closed. Each [`Stage`] knows which entry point of the
//! engine it drives and which fixed arguments that entry point takes, so an
//! unknown stage name is rejected when a test file is loaded rather than when
//! it is run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cases::{StageSpec, TestCase};
use crate::error::HarnessError;
use crate::process::{ProcessResult, ProcessRunner, SutCommand};

/// A phase of end-to-end validation, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Lexer,
    Parser,
    Sema,
    End2End,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Lexer, Stage::Parser, Stage::Sema, Stage::End2End];

    pub fn name(self) -> &'static str {
        match self {
            Self::Lexer => "lexer",
            Self::Parser => "parser",
            Self::Sema => "sema",
            Self::End2End => "end2end",
        }
    }

    /// Name of the engine executable this stage drives.
    pub fn entry_point(self) -> &'static str {
        match self {
            Self::Lexer => "lex",
            Self::Parser => "parse",
            Self::Sema => "check",
            Self::End2End => "shell",
        }
    }

    /// Whether the entry point loads a database setup file.
    pub fn needs_setup(self) -> bool {
        matches!(self, Self::Sema | Self::End2End)
    }

    fn fixed_args(self) -> &'static [&'static str] {
        match self {
            Self::Lexer | Self::Parser => &[],
            Self::Sema => &["--quiet"],
            Self::End2End => &["--quiet", "--noprompt"],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

/// Builds the command line for each stage from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommands {
    bin_dir: PathBuf,
    setups: BTreeMap<String, PathBuf>,
    extra_args: Vec<String>,
}

impl StageCommands {
    pub fn new(bin_dir: impl Into<PathBuf>, setups: BTreeMap<String, PathBuf>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            setups,
            extra_args: Vec::new(),
        }
    }

    /// Arguments passed through to every entry point before the trailing `-`.
    #[must_use]
    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    pub fn has_setup(&self, db: &str) -> bool {
        self.setups.contains_key(db)
    }

    /// `<bin_dir>/<entry> [fixed args] [setup] [extra args] -`
    pub fn command(&self, stage: Stage, db: &str) -> Result<SutCommand, StageFailure> {
        let mut command = SutCommand::new(
            self.bin_dir.join(stage.entry_point()),
            stage.fixed_args().iter().copied(),
        );
        if stage.needs_setup() {
            let setup = self
                .setups
                .get(db)
                .ok_or_else(|| StageFailure::Process(format!("no setup configured for db '{db}'")))?;
            command = command.with_args([setup.display().to_string()]);
        }
        Ok(command.with_args(self.extra_args.iter().cloned()).with_args(["-"]))
    }
}

/// Checks declared for one stage. `None` means the check is not performed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expectation {
    pub returncode: Option<i32>,
    pub num_err: Option<usize>,
    pub err: Option<String>,
    pub out: Option<String>,
}

/// Why a stage did not pass.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageFailure {
    #[error("Timeout expired")]
    Timeout(Duration),

    #[error("{0}")]
    Process(String),

    #[error("{stream} is not valid UTF-8")]
    InvalidUtf8 { stream: &'static str },

    #[error("Expected return code {expected}, received {actual}")]
    ReturnCode { expected: i32, actual: i32 },

    #[error("Expected {expected} error, received {actual}")]
    ErrorCount { expected: usize, actual: usize },

    #[error("Expected err\n{expected}\nreceived\n{actual}")]
    Stderr { expected: String, actual: String },

    #[error("Expected out\n{expected:?}\nreceived\n{actual:?}")]
    Stdout {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("earlier stage failed")]
    EarlierStageFailed,
}

/// Result of one stage, executed or propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub stage: Stage,
    pub failure: Option<StageFailure>,
}

impl StageOutcome {
    pub fn passed(stage: Stage) -> Self {
        Self {
            stage,
            failure: None,
        }
    }

    pub fn failed(stage: Stage, failure: StageFailure) -> Self {
        Self {
            stage,
            failure: Some(failure),
        }
    }

    /// Outcome recorded for a stage skipped because an earlier one failed.
    pub fn propagated(stage: Stage) -> Self {
        Self::failed(stage, StageFailure::EarlierStageFailed)
    }

    pub fn is_pass(&self) -> bool {
        self.failure.is_none()
    }

    pub fn was_executed(&self) -> bool {
        !matches!(self.failure, Some(StageFailure::EarlierStageFailed))
    }

    /// Empty on success.
    pub fn message(&self) -> String {
        self.failure
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}

/// Run one stage of `case` and classify the result. Never fails: every
/// problem becomes a failed outcome.
pub fn run_stage(
    runner: &dyn ProcessRunner,
    case: &TestCase,
    spec: &StageSpec,
    command: &SutCommand,
    timeout: Duration,
) -> StageOutcome {
    let result = match runner.run(command, &case.query, timeout) {
        Ok(result) => result,
        Err(HarnessError::Timeout(limit)) => {
            return StageOutcome::failed(spec.stage, StageFailure::Timeout(limit));
        }
        Err(err) => return StageOutcome::failed(spec.stage, StageFailure::Process(err.to_string())),
    };

    match check(&spec.expectation, &result) {
        Ok(()) => StageOutcome::passed(spec.stage),
        Err(failure) => {
            debug!(stage = %spec.stage, file = %case.filename.display(), %failure, "Stage check failed");
            StageOutcome::failed(spec.stage, failure)
        }
    }
}

/// Apply the declared checks in order; the first mismatch wins.
pub fn check(expectation: &Expectation, result: &ProcessResult) -> Result<(), StageFailure> {
    let out = std::str::from_utf8(result.stdout_bytes())
        .map_err(|_| StageFailure::InvalidUtf8 { stream: "stdout" })?;
    let err = std::str::from_utf8(result.stderr_bytes())
        .map_err(|_| StageFailure::InvalidUtf8 { stream: "stderr" })?;
    let num_err = err.matches("error").count();

    if let Some(expected) = expectation.returncode
        && expected != result.exit_code()
    {
        return Err(StageFailure::ReturnCode {
            expected,
            actual: result.exit_code(),
        });
    }
    if let Some(expected) = expectation.num_err
        && expected != num_err
    {
        return Err(StageFailure::ErrorCount {
            expected,
            actual: num_err,
        });
    }
    if let Some(expected) = expectation.err.as_deref()
        && expected != err
    {
        return Err(StageFailure::Stderr {
            expected: expected.to_string(),
            actual: err.to_string(),
        });
    }
    if let Some(expected) = expectation.out.as_deref() {
        let expected = sorted_lines(expected);
        let actual = sorted_lines(out);
        if expected != actual {
            return Err(StageFailure::Stdout { expected, actual });
        }
    }
    Ok(())
}

/// Lines as a sorted list, so comparison ignores order but not multiplicity.
fn sorted_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    lines.sort();
    lines
}
