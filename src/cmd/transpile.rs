//! Transpile the routines in one PL/SQL file.

use std::path::PathBuf;

use clap::Parser;
use tracing::instrument;

use super::{collect_outcomes, read_source, write_output, InputOpt};
use crate::{
    context::{transform_source, OutputMode},
    errors::Result,
};

/// Transpile the routines in one PL/SQL file.
#[derive(Debug, Parser)]
pub struct TranspileOpt {
    /// A PL/SQL file containing routines or package bodies.
    sql_path: PathBuf,

    #[clap(flatten)]
    input: InputOpt,

    /// Where to write the PL/pgSQL. Defaults to standard output.
    #[clap(long, short = 'o')]
    output: Option<PathBuf>,

    /// When a routine fails, also print whatever we generated before the
    /// failure.
    #[clap(long)]
    show_partial: bool,
}

/// Transpile one file.
#[instrument(skip(opt), fields(path = %opt.sql_path.display()))]
pub fn cmd_transpile(opt: &TranspileOpt) -> Result<()> {
    let index = opt.input.load_index()?;
    let packages = opt.input.load_packages()?;
    let source = read_source(&opt.sql_path)?;
    let outcomes = transform_source(
        &opt.sql_path.display().to_string(),
        &source,
        &opt.input.schema,
        &index,
        &packages,
        OutputMode::Full,
    );
    let sql = collect_outcomes(&outcomes, opt.show_partial)?;
    write_output(opt.output.as_deref(), &sql)
}
