use std::fs;

use crate::common::{TestProject, assert_contains, init_test_logging};

fn project_with_benchmarks() -> TestProject {
    let project = TestProject::new();
    project.file("benchmark/operators/data/schema.sql", "CREATE TABLE t (a INT);\n");
    project.file(
        "benchmark/operators/group_by.yml",
        "suite: operators\nbenchmark: group_by\ndescription: Group by\npattern: '^Execute query:'\ncases:\n  10: SELECT COUNT(*) FROM t GROUP BY a;\n  broken: SELECT FAIL;\n",
    );
    project.file("benchmark/tpch/data/schema.sql", "CREATE TABLE lineitem (a INT);\n");
    project.file(
        "benchmark/tpch/q1.yml",
        "suite: tpch\nbenchmark: q1\ndescription: TPC-H Q1\npattern: '^Execute query:'\ncases:\n  sf1: |\n    SELECT a\n    FROM lineitem;\n",
    );
    project
}

#[test]
fn test_bench_writes_csv_and_reports_failures() {
    init_test_logging();
    crate::test_log!("TEST START: test_bench_writes_csv_and_reports_failures");

    let project = project_with_benchmarks();
    let output = project.run(&["bench", "--repetitions", "3"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stdout: {stdout}");
    assert_contains(&stdout, "Benchmark operators/group_by failed: Benchmark failed with return code 2.");
    assert_contains(&stdout, "===== stderr =====\nerror: cannot run");
    assert_contains(&stdout, "2/2 benchmark files performed, 6 samples written to");

    let csv = fs::read_to_string(project.root().join("benchmark.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "date,suite,benchmark,name,case,time");
    assert_eq!(lines.len(), 7);
    assert!(lines[1].ends_with(",operators,group_by,group_by,10,1.5"), "{}", lines[1]);
    assert!(lines[6].ends_with(",tpch,q1,q1,sf1,3.5"), "{}", lines[6]);

    crate::test_log!("TEST PASS: test_bench_writes_csv_and_reports_failures");
}

#[test]
fn test_bench_selected_suite_and_csv_path() {
    init_test_logging();

    let project = project_with_benchmarks();
    let output = project.run(&["bench", "--csv", "out/tpch.csv", "tpch"]);
    assert!(output.status.success());

    let csv = fs::read_to_string(project.root().join("out/tpch.csv")).unwrap();
    assert_eq!(csv.lines().count(), 1 + 5);
    assert!(csv.lines().skip(1).all(|line| line.contains(",tpch,q1,q1,sf1,")));
}

#[test]
fn test_bench_malformed_file_fails_run() {
    init_test_logging();

    let project = project_with_benchmarks();
    project.file(
        "benchmark/tpch/q2.yml",
        "suite: tpch\nbenchmark: q2\ndescription: bad regex\npattern: '('\ncases:\n  sf1: SELECT 1;\n",
    );
    let output = project.run(&["bench", "tpch"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(1));
    assert_contains(&stdout, "Benchmark file \"benchmark/tpch/q2.yml\" violates schema: invalid pattern");
    assert_contains(&stdout, "1/2 benchmark files performed");
}

#[test]
fn test_bench_verbose_prints_reproduction_commands() {
    init_test_logging();

    let project = project_with_benchmarks();
    let output = project.run(&["bench", "-v", "--args", "--backend Interpreter", "tpch"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert_contains(&stdout, "$ echo -e \"SELECT a FROM lineitem;\" | ");
    assert_contains(&stdout, "--backend Interpreter --quiet -");
}
