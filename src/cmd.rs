//! Command-line subcommands. Everything here is an external collaborator of
//! the compiler proper: it loads inputs from disk, runs units of work, and
//! reports on them.

use std::{
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use clap::Args;
use tracing::debug;

use crate::{
    context::{TransformFailure, UnitOutcome},
    errors::{format_err, Context, Result},
    metadata::{CatalogSnapshot, MetadataIndex},
    package_context::PackageSources,
};

pub mod batch;
pub mod golden_test;
pub mod package_helpers;
pub mod stub;
pub mod transpile;

/// Inputs shared by every subcommand.
#[derive(Debug, Args)]
pub struct InputOpt {
    /// The schema routines belong to, unless their names say otherwise.
    #[clap(long, default_value = "public")]
    pub schema: String,

    /// A JSON catalog snapshot describing tables, routines, types,
    /// sequences and synonyms.
    #[clap(long)]
    pub metadata: Option<PathBuf>,

    /// A directory of `<schema>.<package>.pks` files, with optional
    /// matching `.pkb` files.
    #[clap(long)]
    pub packages: Option<PathBuf>,
}

impl InputOpt {
    /// Build the metadata index. With no `--metadata`, the index is empty.
    pub fn load_index(&self) -> Result<MetadataIndex> {
        let snapshot = match &self.metadata {
            Some(path) => CatalogSnapshot::from_path(path)?,
            None => CatalogSnapshot::default(),
        };
        Ok(MetadataIndex::from_snapshot(snapshot))
    }

    /// Load package sources. With no `--packages`, there are none.
    pub fn load_packages(&self) -> Result<PackageSources> {
        match &self.packages {
            Some(dir) => PackageSources::from_dir(dir),
            None => Ok(PackageSources::new()),
        }
    }
}

/// Read a PL/SQL file.
pub(crate) fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))
}

/// Write `text` to `path`, or to standard output.
pub(crate) fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "writing output");
            fs::write(path, text).with_context(|| format!("could not write {}", path.display()))
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(text.as_bytes())
                .context("could not write to standard output")
        }
    }
}

/// Collect the SQL of every successful unit, and print every failure to
/// standard error. Fails if any unit failed, after printing them all.
pub(crate) fn collect_outcomes(outcomes: &[UnitOutcome], show_partial: bool) -> Result<String> {
    let mut statements = vec![];
    let mut failures: Vec<(&str, &TransformFailure)> = vec![];
    for outcome in outcomes {
        match &outcome.result {
            Ok(transformed) => {
                for warning in &transformed.warnings {
                    eprintln!("warning: {}: {}", outcome.name, warning);
                }
                statements.push(transformed.sql.as_str());
            }
            Err(failure) => failures.push((outcome.name.as_str(), failure)),
        }
    }

    for (name, failure) in &failures {
        eprintln!("FAILED {} ({})", name, failure.kind);
        eprint!("{}", failure.rendered);
        if show_partial {
            if let Some(partial) = &failure.partial {
                eprintln!("-- partial output, not for execution:\n{}\n", partial);
            }
        }
    }

    if failures.is_empty() {
        let mut text = statements.join("\n\n");
        text.push('\n');
        Ok(text)
    } else {
        Err(format_err!(
            "{} of {} routines failed",
            failures.len(),
            outcomes.len()
        ))
    }
}
