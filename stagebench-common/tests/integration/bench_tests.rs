use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use regex::Regex;
use stagebench_common::bench::run_case;
use stagebench_common::cases::parse_benchmark_file;
use stagebench_common::mock::{Scripted, ScriptedRunner};
use stagebench_common::{BenchmarkError, BenchmarkRunner, SutCommand};

use crate::common::{assert_contains, init_test_logging};

const BENCH_FILE: &str = r#"
suite: operators
benchmark: group_by
description: Group by a single column
pattern: '^Execute query:.*'
cases:
  10: |
    SELECT COUNT(*)
    FROM t GROUP BY a10;
  fails: SELECT FAIL;
  100: SELECT COUNT(*) FROM t GROUP BY a100;
"#;

/// One timing line per input line, or a failure for queries mentioning FAIL.
fn timing_engine() -> ScriptedRunner {
    ScriptedRunner::new().respond_with(|_, input| {
        if input.contains("FAIL") {
            return Scripted::exit(1, "partial\n", "error: FAIL\n");
        }
        let stdout: String = input
            .lines()
            .enumerate()
            .map(|(i, _)| format!("Execute query: {}.5\n", i + 1))
            .collect();
        Scripted::ok(stdout)
    })
}

#[test]
fn test_run_case_one_sample_per_repetition() {
    init_test_logging();
    crate::test_log!("TEST START: test_run_case_one_sample_per_repetition");

    let runner = timing_engine();
    let pattern = Regex::new("^Execute query:").unwrap();
    let samples = run_case(
        &runner,
        &SutCommand::new("shell", ["-t", "schema.sql"]),
        "SELECT 1;",
        &pattern,
        5,
        Duration::from_secs(60),
    )
    .unwrap();
    assert_eq!(samples, vec![1.5, 2.5, 3.5, 4.5, 5.5]);

    let calls = runner.invocations();
    assert_eq!(calls[0].input, "SELECT 1;\n".repeat(5));
    assert_eq!(calls[0].command.to_string(), "shell -t schema.sql --quiet -");
    assert_eq!(calls[0].timeout, Duration::from_secs(60));
}

#[test]
fn test_run_case_stderr_with_exit_zero_is_failure() {
    init_test_logging();

    let runner = ScriptedRunner::new().on_program("shell", Scripted::exit(0, "Execute query: 1.0\n", "warning\n"));
    let err = run_case(
        &runner,
        &SutCommand::new("shell", Vec::<String>::new()),
        "q",
        &Regex::new("^Execute").unwrap(),
        5,
        Duration::from_secs(1),
    )
    .unwrap_err();
    assert!(matches!(err, BenchmarkError::UnexpectedFailure { exit_code: 0, .. }));
}

#[test]
fn test_run_case_timeout() {
    init_test_logging();

    let runner = ScriptedRunner::new().on_program("shell", Scripted::Timeout);
    let err = run_case(
        &runner,
        &SutCommand::new("shell", Vec::<String>::new()),
        "q",
        &Regex::new("x").unwrap(),
        5,
        Duration::from_secs(60),
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "Benchmark timed out after 60 seconds");
}

#[test]
fn test_run_file_isolates_failing_case() {
    init_test_logging();

    let file = parse_benchmark_file(Path::new("benchmark/operators/group_by_mutable.yml"), BENCH_FILE)
        .unwrap();
    let runner = Arc::new(timing_engine());
    let bench = BenchmarkRunner::new(runner.clone(), "/build/release/bin/shell").with_repetitions(3);
    let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();

    let run = bench.run_file(&file, date);

    assert_eq!(runner.call_count(), 3);
    assert_eq!(run.records.len(), 6);
    assert!(run.records.iter().all(|r| r.name == "group_by_mutable" && r.date == date));
    let cases: Vec<&str> = run.records.iter().map(|r| r.case.as_str()).collect();
    assert_eq!(cases, vec!["10", "10", "10", "100", "100", "100"]);

    assert_eq!(run.failures.len(), 1);
    let failure = &run.failures[0];
    assert_eq!(failure.case.name, "fails");
    assert_eq!(failure.error.to_string(), "Benchmark failed with return code 1.");
    let diagnostic = failure.error.diagnostic("SELECT FAIL;", &failure.command).unwrap();
    assert_contains(&diagnostic, "===== stderr =====\nerror: FAIL");
    assert_contains(
        &diagnostic,
        "| /build/release/bin/shell -t benchmark/operators/data/schema.sql --quiet -",
    );

    let multi_line = &runner.invocations()[0].input;
    assert_eq!(multi_line, &"SELECT COUNT(*) FROM t GROUP BY a10;\n".repeat(3));
}
