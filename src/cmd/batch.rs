//! Transpile a directory of PL/SQL files, one unit of work per routine.
//!
//! Files run in parallel on the blocking thread pool. They share the
//! metadata index and the package sources, both read-only, and nothing else.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::{read_source, InputOpt};
use crate::{
    context::{transform_source, OutputMode, TransformFailure, UnitOutcome},
    errors::{format_err, Context, Error, Result},
    known_files::KnownFiles,
    metadata::MetadataIndex,
    package_context::PackageSources,
};

/// Transpile every PL/SQL file in a directory.
#[derive(Debug, Parser)]
pub struct BatchOpt {
    /// A directory to search for `*.sql` files, recursively.
    dir_path: PathBuf,

    #[clap(flatten)]
    input: InputOpt,

    /// A directory to write one `*.pgsql` file per input file. Only
    /// routines that transpiled successfully are written.
    #[clap(long, short = 'o')]
    output: Option<PathBuf>,

    /// Write a CSV report with one row per routine.
    #[clap(long)]
    report: Option<PathBuf>,
}

/// One row of our CSV report.
#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    file: &'a str,
    routine: &'a str,
    status: &'static str,
    kind: &'static str,
    message: &'a str,
}

/// The outcomes for one input file.
struct FileOutcomes {
    path: PathBuf,
    outcomes: Vec<UnitOutcome>,
}

impl FileOutcomes {
    /// A file that failed before any of its routines could be found.
    fn failed(path: PathBuf, err: &Error) -> Self {
        let name = path.display().to_string();
        let failure = TransformFailure::from_error(err, &KnownFiles::new(), None);
        Self {
            path,
            outcomes: vec![UnitOutcome {
                name,
                result: Err(failure),
            }],
        }
    }
}

/// Transpile a directory.
#[instrument(skip(opt), fields(dir = %opt.dir_path.display()))]
pub async fn cmd_batch(opt: &BatchOpt) -> Result<()> {
    let index = Arc::new(opt.input.load_index()?);
    let packages = Arc::new(opt.input.load_packages()?);

    let pattern = format!("{}/**/*.sql", opt.dir_path.display());
    let mut paths = vec![];
    for entry in glob::glob(&pattern).context("invalid batch directory pattern")? {
        paths.push(entry.context("could not read batch directory entry")?);
    }
    if paths.is_empty() {
        return Err(format_err!(
            "no *.sql files found in {}",
            opt.dir_path.display()
        ));
    }
    info!(files = paths.len(), "starting batch");

    let mut handles = vec![];
    for path in paths {
        let index = Arc::clone(&index);
        let packages = Arc::clone(&packages);
        let schema = opt.input.schema.clone();
        let worker_path = path.clone();
        let handle = tokio::task::spawn_blocking(move || {
            transpile_file(worker_path, &schema, &index, &packages)
        });
        handles.push((path, handle));
    }
    let mut results = vec![];
    for (path, handle) in handles {
        // A file we can't process fails as a unit. The rest of the batch goes on.
        let file_outcomes = match handle.await.context("batch worker failed") {
            Ok(Ok(file_outcomes)) => file_outcomes,
            Ok(Err(err)) | Err(err) => {
                warn!(path = %path.display(), %err, "could not transpile file");
                FileOutcomes::failed(path, &err)
            }
        };
        results.push(file_outcomes);
    }

    if let Some(output_dir) = &opt.output {
        write_outputs(output_dir, &opt.dir_path, &results)?;
    }
    if let Some(report_path) = &opt.report {
        write_report(report_path, &results)?;
    }
    print_summary(&results)
}

/// Transpile one file. Runs on a blocking worker thread.
fn transpile_file(
    path: PathBuf,
    schema: &str,
    index: &MetadataIndex,
    packages: &PackageSources,
) -> Result<FileOutcomes> {
    let source = read_source(&path)?;
    let outcomes = transform_source(
        &path.display().to_string(),
        &source,
        schema,
        index,
        packages,
        OutputMode::Full,
    );
    debug!(path = %path.display(), units = outcomes.len(), "transpiled file");
    Ok(FileOutcomes { path, outcomes })
}

/// Write the successful routines of each file to `<output_dir>/<relative
/// path>.pgsql`.
fn write_outputs(output_dir: &Path, input_dir: &Path, results: &[FileOutcomes]) -> Result<()> {
    for file in results {
        let statements = file
            .outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(|t| t.sql.as_str())
            .collect::<Vec<_>>();
        if statements.is_empty() {
            continue;
        }
        let relative = file.path.strip_prefix(input_dir).unwrap_or(&file.path);
        let out_path = output_dir.join(relative).with_extension("pgsql");
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("could not create {}", parent.display()))?;
        }
        let mut text = statements.join("\n\n");
        text.push('\n');
        fs::write(&out_path, text)
            .with_context(|| format!("could not write {}", out_path.display()))?;
    }
    Ok(())
}

/// Write a CSV report.
fn write_report(report_path: &Path, results: &[FileOutcomes]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(report_path)
        .with_context(|| format!("could not create report {}", report_path.display()))?;
    for file in results {
        let file_name = file.path.display().to_string();
        for outcome in &file.outcomes {
            let row = match &outcome.result {
                Ok(_) => ReportRow {
                    file: &file_name,
                    routine: &outcome.name,
                    status: "ok",
                    kind: "",
                    message: "",
                },
                Err(failure) => ReportRow {
                    file: &file_name,
                    routine: &outcome.name,
                    status: "failed",
                    kind: failure.kind.as_str(),
                    message: &failure.message,
                },
            };
            wtr.serialize(row)
                .with_context(|| format!("could not write report {}", report_path.display()))?;
        }
    }
    wtr.flush()
        .with_context(|| format!("could not write report {}", report_path.display()))
}

/// Print one line per routine, and a total. Fails if any routine failed.
fn print_summary(results: &[FileOutcomes]) -> Result<()> {
    let mut total = 0;
    let mut failed = 0;
    for file in results {
        for outcome in &file.outcomes {
            total += 1;
            match &outcome.result {
                Ok(_) => anstream::println!("{} {}", "ok".green(), outcome.name),
                Err(failure) => {
                    failed += 1;
                    anstream::println!(
                        "{} {} ({}): {}",
                        "FAILED".red().bold(),
                        outcome.name,
                        failure.kind.yellow(),
                        failure.message
                    );
                }
            }
        }
    }

    if failed == 0 {
        anstream::println!("{}: {} routines transpiled", "OK".green().bold(), total);
        Ok(())
    } else {
        anstream::println!(
            "{}: {} of {} routines failed",
            "FAIL".red().bold(),
            failed,
            total
        );
        Err(format_err!("{} of {} routines failed", failed, total))
    }
}
