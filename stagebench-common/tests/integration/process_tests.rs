use std::time::{Duration, Instant};

use stagebench_common::{HarnessError, ProcessRunner, SubprocessRunner, SutCommand};

use crate::common::{FakeEngine, init_test_logging};

fn no_args() -> Vec<String> {
    Vec::new()
}

#[test]
fn test_stdin_is_delivered_and_closed() {
    init_test_logging();
    crate::test_log!("TEST START: test_stdin_is_delivered_and_closed");

    let engine = FakeEngine::new();
    let script = engine.script("echo_input", "cat; echo done");
    let runner = SubprocessRunner::new(engine.root());

    let result = runner
        .run(&SutCommand::new(script, no_args()), "SELECT 1;\nSELECT 2;\n", Duration::from_secs(5))
        .unwrap();
    assert_eq!(result.exit_code(), 0);
    assert_eq!(result.stdout_bytes(), b"SELECT 1;\nSELECT 2;\ndone\n");
    assert!(result.stderr_bytes().is_empty());
    assert!(result.wall_time().is_some());
}

#[test]
fn test_exit_code_and_stderr_are_captured() {
    init_test_logging();

    let engine = FakeEngine::new();
    let script = engine.script("fail", "echo out; echo 'error: oops' >&2; exit 3");
    let result = SubprocessRunner::new(engine.root())
        .run(&SutCommand::new(script, no_args()), "", Duration::from_secs(5))
        .unwrap();
    assert_eq!(result.exit_code(), 3);
    assert_eq!(result.stdout_latin1(), "out\n");
    assert_eq!(result.stderr_latin1(), "error: oops\n");
    assert!(!result.is_clean());
}

#[test]
fn test_arguments_and_working_directory() {
    init_test_logging();

    let engine = FakeEngine::new();
    let script = engine.script("args", "pwd; for a in \"$@\"; do echo \"[$a]\"; done");
    let result = SubprocessRunner::new(engine.root())
        .run(
            &SutCommand::new(script, ["-t", "data/schema.sql", "--quiet", "-"]),
            "",
            Duration::from_secs(5),
        )
        .unwrap();
    let stdout = result.stdout_latin1();
    let mut lines = stdout.lines();
    let cwd = lines.next().unwrap();
    assert_eq!(
        std::fs::canonicalize(cwd).unwrap(),
        std::fs::canonicalize(engine.root()).unwrap()
    );
    assert_eq!(
        lines.collect::<Vec<_>>(),
        vec!["[-t]", "[data/schema.sql]", "[--quiet]", "[-]"]
    );
}

#[test]
fn test_latin1_output_never_fails_to_decode() {
    init_test_logging();

    let engine = FakeEngine::new();
    let script = engine.script("bytes", "printf '\\377\\376ok'");
    let result = SubprocessRunner::new(engine.root())
        .run(&SutCommand::new(script, no_args()), "", Duration::from_secs(5))
        .unwrap();
    assert_eq!(result.stdout_bytes(), b"\xff\xfeok");
    assert_eq!(result.stdout_latin1(), "\u{ff}\u{fe}ok");
}

#[test]
fn test_timeout_kills_and_reaps() {
    init_test_logging();
    crate::test_log!("TEST START: test_timeout_kills_and_reaps");

    let engine = FakeEngine::new();
    let pid_file = engine.root().join("pid");
    let script = engine.script("hang", &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()));

    let start = Instant::now();
    let err = SubprocessRunner::new(engine.root())
        .run(&SutCommand::new(script, no_args()), "", Duration::from_millis(300))
        .unwrap_err();
    assert!(matches!(err, HarnessError::Timeout(limit) if limit == Duration::from_millis(300)));
    assert!(start.elapsed() < Duration::from_secs(5), "run outlived its deadline");

    #[cfg(target_os = "linux")]
    {
        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let proc_entry = std::path::Path::new("/proc").join(pid.trim());
        assert!(!proc_entry.exists(), "timed out process {} still present", pid.trim());
    }

    crate::test_log!("TEST PASS: test_timeout_kills_and_reaps");
}

#[test]
fn test_background_process_holding_pipes_hits_deadline() {
    init_test_logging();
    crate::test_log!("TEST START: test_background_process_holding_pipes_hits_deadline");

    let engine = FakeEngine::new();
    let script = engine.script("leaves_child", "sleep 4 &\necho hi");

    let start = Instant::now();
    let err = SubprocessRunner::new(engine.root())
        .run(&SutCommand::new(script, no_args()), "", Duration::from_millis(500))
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    assert!(elapsed < Duration::from_secs(2), "run blocked {elapsed:?} past a 500ms deadline");

    crate::test_log!("TEST PASS: test_background_process_holding_pipes_hits_deadline");
}

#[test]
fn test_payload_is_sent_as_latin1() {
    init_test_logging();

    let engine = FakeEngine::new();
    let script = engine.script("echo_input", "cat");
    let result = SubprocessRunner::new(engine.root())
        .run(&SutCommand::new(script, no_args()), "SELECT 'caf\u{e9}';", Duration::from_secs(5))
        .unwrap();
    assert_eq!(result.stdout_bytes(), b"SELECT 'caf\xe9';");
    assert_eq!(result.stdout_latin1(), "SELECT 'caf\u{e9}';");
}

#[test]
fn test_sut_that_ignores_stdin_still_completes() {
    init_test_logging();

    let engine = FakeEngine::new();
    let script = engine.script("no_read", "echo ignored; exit 0");
    let payload = "SELECT 1;\n".repeat(200_000);
    let result = SubprocessRunner::new(engine.root())
        .run(&SutCommand::new(script, no_args()), &payload, Duration::from_secs(10))
        .unwrap();
    assert_eq!(result.exit_code(), 0);
    assert_eq!(result.stdout_latin1(), "ignored\n");
}

#[test]
fn test_signal_exit_is_negative() {
    init_test_logging();

    let engine = FakeEngine::new();
    let script = engine.script("killed", "kill -9 $$");
    let result = SubprocessRunner::new(engine.root())
        .run(&SutCommand::new(script, no_args()), "", Duration::from_secs(5))
        .unwrap();
    assert_eq!(result.exit_code(), -9);
}

#[test]
fn test_missing_binary_is_spawn_error() {
    init_test_logging();

    let engine = FakeEngine::new();
    let err = SubprocessRunner::new(engine.root())
        .run(
            &SutCommand::new(engine.bin_dir().join("lex"), ["-"]),
            "",
            Duration::from_secs(1),
        )
        .unwrap_err();
    assert!(matches!(err, HarnessError::Spawn { .. }));
}
