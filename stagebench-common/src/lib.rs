//! Staged execution and measurement engine for an external query engine.
//!
//! The harness drives a system under test (SUT) as a black-box subprocess:
//! integration test files run a query through a fixed sequence of stages and
//! compare observed behavior with declared expectations; benchmark files time
//! repeated executions of a query and emit per-run samples.

pub mod bench;
pub mod cases;
pub mod config;
pub mod error;
pub mod logging;
pub mod mock;
pub mod orchestrator;
pub mod process;
pub mod report;
pub mod stage;
pub mod timing;

pub use bench::{BenchmarkError, BenchmarkFileRun, BenchmarkRecord, BenchmarkRunner, CaseFailure};
pub use cases::{BenchmarkFile, TestCase};
pub use config::{ConfigError, ConfigWarning, HarnessConfig};
pub use error::{HarnessError, HarnessResult};
pub use logging::{LogConfig, LogFormat, init_logging, init_test_logging};
pub use orchestrator::{Counters, Orchestrator, Tally};
pub use process::{ProcessResult, ProcessRunner, SubprocessRunner, SutCommand};
pub use report::{CsvSink, ReportOptions, TestSummary};
pub use stage::{Expectation, Stage, StageCommands, StageFailure, StageOutcome};
