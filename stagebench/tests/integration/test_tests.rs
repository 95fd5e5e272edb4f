use crate::common::{TestProject, assert_contains, init_test_logging};

const PASSING_STAGES: &str = "  lexer:\n    returncode: 0\n  parser:\n    num_err: 0\n  end2end:\n    err:\n";

fn project_with_cases() -> TestProject {
    let project = TestProject::new();
    project.test_file("test/select/a_projection.yml", "SELECT a FROM R;", true, PASSING_STAGES);
    project.test_file(
        "test/select/b_optional.yml",
        "SELECT bad FROM R;",
        false,
        "  lexer:\n  sema:\n    returncode: 0\n  end2end:\n",
    );
    project.file("test/_schema.yml", "description: str()\n");
    project
}

#[test]
fn test_required_pass_exits_zero() {
    init_test_logging();
    crate::test_log!("TEST START: test_required_pass_exits_zero");

    let project = project_with_cases();
    let output = project.run(&["test"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stdout: {stdout}");
    assert_contains(&stdout, "test/select/b_optional.yml\n└─ sema ✘ Expected return code 0, received 1\n└─ end2end ✘ earlier stage failed");
    assert!(!stdout.contains("a_projection.yml"));
    assert_contains(&stdout, "Required : 3/3");
    assert_contains(&stdout, "Total    : 4/6");

    crate::test_log!("TEST PASS: test_required_pass_exits_zero");
}

#[test]
fn test_all_flag_counts_optional_stages() {
    init_test_logging();

    let project = project_with_cases();
    let output = project.run(&["test", "--all"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_required_failure_exits_nonzero() {
    init_test_logging();

    let project = TestProject::new();
    project.test_file(
        "test/fail.yml",
        "SELECT 1;",
        true,
        "  end2end:\n    out: \"2\\n\"\n",
    );
    let output = project.run(&["test"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(1));
    assert_contains(&stdout, "└─ end2end ✘ Expected out");
    assert_contains(&stdout, "Required : 0/1");
}

#[test]
fn test_malformed_file_counted_and_skipped() {
    init_test_logging();

    let project = project_with_cases();
    project.file("test/broken.yml", "description: missing everything\n");
    let output = project.run(&["test"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert_contains(&stdout, "test/broken.yml\n└─ yaml_check !");
    assert_contains(&stdout, "Bad files: 1");
}

#[test]
fn test_parallel_run_matches_sequential_output() {
    init_test_logging();

    let project = project_with_cases();
    for i in 0..6 {
        project.test_file(
            &format!("test/more/case_{i}.yml"),
            if i % 2 == 0 { "SELECT 1;" } else { "SELECT bad;" },
            i % 3 == 0,
            "  parser:\n    returncode: 0\n  end2end:\n",
        );
    }

    let sequential = project.run(&["test", "--jobs", "1"]);
    let parallel = project.run(&["test", "--jobs", "4"]);
    assert_eq!(sequential.status.code(), parallel.status.code());
    assert_eq!(
        String::from_utf8_lossy(&sequential.stdout),
        String::from_utf8_lossy(&parallel.stdout)
    );
}

#[test]
fn test_explicit_paths_and_verbose() {
    init_test_logging();

    let project = project_with_cases();
    let output = project.run(&["test", "-v", "test/select/a_projection.yml"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert_contains(&stdout, "test/select/a_projection.yml\n└─ lexer ✓\n└─ parser ✓\n└─ end2end ✓");
    assert!(!stdout.contains("b_optional"));
    assert_contains(&stdout, "Total    : 3/3");
}

#[test]
fn test_json_summary() {
    init_test_logging();

    let project = project_with_cases();
    let output = project.run(&["test", "--format", "json"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.trim_start().starts_with('{'), "stdout: {stdout}");
    assert_contains(&stdout, "\"bad_files\": 0");
    assert_contains(&stdout, "\"stage\": \"end2end\"");
    assert_contains(&String::from_utf8_lossy(&output.stderr), "b_optional.yml");
}

#[test]
fn test_missing_binaries_fail_stages() {
    init_test_logging();

    let project = project_with_cases();
    let output = project.run(&["test", "--bin-dir", "nowhere"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(1));
    assert_contains(&stdout, "└─ lexer ✘ Failed to launch");
}
