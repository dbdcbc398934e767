//! Generate stubs for the routines in a PL/SQL file.
//!
//! Loading every stub before any full definition lets routines refer to
//! each other regardless of the order they are created in.

use std::path::PathBuf;

use clap::Parser;
use tracing::instrument;

use super::{collect_outcomes, read_source, write_output, InputOpt};
use crate::{
    context::{transform_source, OutputMode},
    errors::Result,
};

/// Generate stubs for the routines in a PL/SQL file.
#[derive(Debug, Parser)]
pub struct StubOpt {
    /// A PL/SQL file containing routines or package bodies.
    sql_path: PathBuf,

    #[clap(flatten)]
    input: InputOpt,

    /// Where to write the stubs. Defaults to standard output.
    #[clap(long, short = 'o')]
    output: Option<PathBuf>,
}

/// Generate stubs for one file.
#[instrument(skip(opt), fields(path = %opt.sql_path.display()))]
pub fn cmd_stub(opt: &StubOpt) -> Result<()> {
    let index = opt.input.load_index()?;
    let packages = opt.input.load_packages()?;
    let source = read_source(&opt.sql_path)?;
    let outcomes = transform_source(
        &opt.sql_path.display().to_string(),
        &source,
        &opt.input.schema,
        &index,
        &packages,
        OutputMode::Stub,
    );
    let sql = collect_outcomes(&outcomes, false)?;
    write_output(opt.output.as_deref(), &sql)
}
