use cli_test_dir::*;

#[test]
fn run_golden_tests() {
    let testdir = TestDir::new("pl2pg", "run_golden_tests");
    let golden_dir = testdir.src_path("tests/golden/");
    testdir
        .cmd()
        .arg("golden-test")
        .arg(&golden_dir)
        .arg("--schema")
        .arg("hr")
        .expect_success();
}
