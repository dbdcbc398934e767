use std::fs;

use cli_test_dir::*;

/// Arguments pointing at our golden fixtures.
fn fixture_args(testdir: &TestDir) -> Vec<String> {
    vec![
        "--schema".to_owned(),
        "hr".to_owned(),
        "--metadata".to_owned(),
        testdir
            .src_path("tests/golden/catalog.json")
            .display()
            .to_string(),
        "--packages".to_owned(),
        testdir
            .src_path("tests/golden/packages")
            .display()
            .to_string(),
    ]
}

#[test]
fn transpile_writes_output_file() {
    let testdir = TestDir::new("pl2pg", "transpile_writes_output_file");
    testdir
        .cmd()
        .arg("transpile")
        .arg(testdir.src_path("tests/golden/dept_total.sql"))
        .args(fixture_args(&testdir))
        .arg("--output")
        .arg("out.pgsql")
        .expect_success();
    testdir.expect_path("out.pgsql");
    let expected = fs::read_to_string(testdir.src_path("tests/golden/dept_total.pgsql")).unwrap();
    let actual = fs::read_to_string(testdir.path("out.pgsql")).unwrap();
    assert_eq!(actual.trim_end(), expected.trim_end());
}

#[test]
fn transpile_fails_on_unsupported_constructs() {
    let testdir = TestDir::new("pl2pg", "transpile_fails_on_unsupported_constructs");
    testdir.create_file(
        "commit.sql",
        "CREATE PROCEDURE p IS BEGIN COMMIT; END;\n/\n",
    );
    let output = testdir
        .cmd()
        .arg("transpile")
        .arg("commit.sql")
        .args(fixture_args(&testdir))
        .expect_failure();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unsupported-construct"), "{}", stderr);
}

#[test]
fn stub_matches_transpiled_header() {
    let testdir = TestDir::new("pl2pg", "stub_matches_transpiled_header");
    let output = testdir
        .cmd()
        .arg("stub")
        .arg(testdir.src_path("tests/golden/dept_total.sql"))
        .args(fixture_args(&testdir))
        .expect_success();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim_end(),
        "CREATE OR REPLACE FUNCTION hr.dept_total(p_dept numeric)
RETURNS numeric
LANGUAGE plpgsql
AS $$
BEGIN
  RETURN NULL;
END;
$$;"
    );
}

#[test]
fn package_helpers_cover_every_variable() {
    let testdir = TestDir::new("pl2pg", "package_helpers_cover_every_variable");
    let output = testdir
        .cmd()
        .arg("package-helpers")
        .args(fixture_args(&testdir))
        .arg("--package")
        .arg("hr.counter_pkg")
        .expect_success();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("CREATE OR REPLACE FUNCTION hr.counter_pkg__initialize()"));
    assert!(stdout.contains("CREATE OR REPLACE FUNCTION hr.counter_pkg__get_g_counter()"));
    assert!(stdout.contains("CREATE OR REPLACE FUNCTION hr.counter_pkg__set_g_counter(p_value numeric)"));
    assert!(stdout.contains("CREATE OR REPLACE FUNCTION hr.counter_pkg__get_c_step()"));
    // Constants have no setter.
    assert!(!stdout.contains("counter_pkg__set_c_step"));
}

#[test]
fn batch_writes_report_and_outputs() {
    let testdir = TestDir::new("pl2pg", "batch_writes_report_and_outputs");
    fs::create_dir_all(testdir.path("src")).unwrap();
    testdir.create_file(
        "src/good.sql",
        "CREATE PROCEDURE good IS BEGIN NULL; END;\n/\n",
    );
    testdir.create_file(
        "src/bad.sql",
        "CREATE PROCEDURE bad IS BEGIN ROLLBACK; END;\n/\n",
    );
    testdir
        .cmd()
        .arg("batch")
        .arg("src")
        .args(fixture_args(&testdir))
        .arg("--output")
        .arg("out")
        .arg("--report")
        .arg("report.csv")
        .expect_failure();

    testdir.expect_path("out/good.pgsql");
    let report = fs::read_to_string(testdir.path("report.csv")).unwrap();
    let mut lines = report.lines().collect::<Vec<_>>();
    lines.sort();
    assert_eq!(lines.len(), 3, "{}", report);
    assert!(lines.contains(&"file,routine,status,kind,message"));
    assert!(lines
        .iter()
        .any(|l| l.contains("hr.good") && l.contains(",ok,,")));
    assert!(lines
        .iter()
        .any(|l| l.contains("hr.bad") && l.contains(",failed,unsupported-construct,")));
}

#[test]
fn batch_reports_unreadable_files_and_keeps_going() {
    let testdir = TestDir::new("pl2pg", "batch_reports_unreadable_files_and_keeps_going");
    // A directory matches `*.sql`, but can't be read as one.
    fs::create_dir_all(testdir.path("src/unreadable.sql")).unwrap();
    testdir.create_file(
        "src/good.sql",
        "CREATE PROCEDURE good IS BEGIN NULL; END;\n/\n",
    );
    let output = testdir
        .cmd()
        .arg("batch")
        .arg("src")
        .args(fixture_args(&testdir))
        .arg("--output")
        .arg("out")
        .arg("--report")
        .arg("report.csv")
        .expect_failure();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ok hr.good"), "{}", stdout);
    assert!(stdout.contains("FAIL: 1 of 2 routines failed"), "{}", stdout);
    testdir.expect_path("out/good.pgsql");
    let report = fs::read_to_string(testdir.path("report.csv")).unwrap();
    assert!(report
        .lines()
        .any(|l| l.contains("unreadable.sql") && l.contains(",failed,parse-unusable,")));
}
