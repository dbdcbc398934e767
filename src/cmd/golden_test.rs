//! Run our golden tests: transpile `*.sql` files and compare the output
//! against `*.pgsql` files next to them.

use std::path::{Path, PathBuf};

use clap::Parser;

use super::{read_source, InputOpt};
use crate::{
    context::{transform_source, OutputMode},
    errors::{Context, Error, Result},
    metadata::MetadataIndex,
    package_context::PackageSources,
};

/// Run golden tests from a directory.
#[derive(Debug, Parser)]
pub struct GoldenTestOpt {
    /// A directory containing `*.sql` inputs and `*.pgsql` expected
    /// outputs. `catalog.json` and `packages/` in this directory are used
    /// unless `--metadata` or `--packages` say otherwise.
    dir_path: PathBuf,

    #[clap(flatten)]
    input: InputOpt,
}

/// Run our golden test suite.
pub fn cmd_golden_test(opt: &GoldenTestOpt) -> Result<()> {
    let (index, packages) = load_inputs(opt)?;

    // Keep track of our test results.
    let mut test_count = 0usize;
    let mut test_failures: Vec<(PathBuf, String)> = vec![];

    let pattern = format!("{}/**/*.sql", opt.dir_path.display());
    for entry in glob::glob(&pattern).context("Failed to read test directory")? {
        let path = entry.context("Failed to read test file")?;
        test_count += 1;

        match run_test(&path, &opt.input.schema, &index, &packages) {
            Ok(()) => {
                print!(".");
            }
            Err(message) => {
                print!("E");
                test_failures.push((path, message));
            }
        }
    }
    println!();

    if test_count == 0 {
        Err(Error::Other("No tests found".into()))
    } else if test_failures.is_empty() {
        println!("OK: {} tests passed", test_count);
        Ok(())
    } else {
        for (i, (path, message)) in test_failures.iter().enumerate() {
            println!("\nFAILED {}: {}", i + 1, path.display());
            println!("{}", message);
        }

        println!(
            "FAIL: {} of {} tests failed",
            test_failures.len(),
            test_count
        );

        Err(Error::Other("Some tests failed".into()))
    }
}

/// Load the index and package sources, defaulting to the fixtures in the
/// test directory.
fn load_inputs(opt: &GoldenTestOpt) -> Result<(MetadataIndex, PackageSources)> {
    let catalog = opt.dir_path.join("catalog.json");
    let packages_dir = opt.dir_path.join("packages");
    let input = InputOpt {
        schema: opt.input.schema.clone(),
        metadata: opt
            .input
            .metadata
            .clone()
            .or_else(|| catalog.exists().then_some(catalog)),
        packages: opt
            .input
            .packages
            .clone()
            .or_else(|| packages_dir.is_dir().then_some(packages_dir)),
    };
    Ok((input.load_index()?, input.load_packages()?))
}

/// Transpile one file and compare it to its expected output. Returns a
/// printable explanation on failure.
fn run_test(
    path: &Path,
    schema: &str,
    index: &MetadataIndex,
    packages: &PackageSources,
) -> std::result::Result<(), String> {
    let expected_path = path.with_extension("pgsql");
    let expected = read_source(&expected_path).map_err(|e| e.to_string())?;
    let source = read_source(path).map_err(|e| e.to_string())?;
    let outcomes = transform_source(
        &path.display().to_string(),
        &source,
        schema,
        index,
        packages,
        OutputMode::Full,
    );

    let mut statements = vec![];
    for outcome in outcomes {
        match outcome.result {
            Ok(transformed) => statements.push(transformed.sql),
            Err(failure) => {
                return Err(format!(
                    "{} failed ({}):\n{}",
                    outcome.name, failure.kind, failure.rendered
                ))
            }
        }
    }
    let actual = statements.join("\n\n");
    if actual.trim_end() == expected.trim_end() {
        Ok(())
    } else {
        Err(describe_mismatch(expected.trim_end(), &actual))
    }
}

/// Point at the first line that differs.
fn describe_mismatch(expected: &str, actual: &str) -> String {
    let expected_lines = expected.lines().collect::<Vec<_>>();
    let actual_lines = actual.lines().collect::<Vec<_>>();
    let line = expected_lines
        .iter()
        .zip(&actual_lines)
        .position(|(e, a)| e != a)
        .unwrap_or_else(|| expected_lines.len().min(actual_lines.len()));
    format!(
        "first difference at line {}\n  expected: {}\n  actual:   {}\n--- actual output ---\n{}",
        line + 1,
        expected_lines.get(line).unwrap_or(&"<end of file>"),
        actual_lines.get(line).unwrap_or(&"<end of file>"),
        actual
    )
}
