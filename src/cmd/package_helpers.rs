//! Generate the helper functions backing package variables.

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, instrument};

use super::{write_output, InputOpt};
use crate::{
    errors::{format_err, Result},
    known_files::KnownFiles,
    package_context::{generate_package_helpers, PackageContext, PackageSource},
};

/// Generate the helper functions backing package variables.
#[derive(Debug, Parser)]
pub struct PackageHelpersOpt {
    #[clap(flatten)]
    input: InputOpt,

    /// A package to generate helpers for, as `package` or `schema.package`.
    /// May be repeated. Defaults to every package in `--packages`.
    #[clap(long = "package")]
    package_names: Vec<String>,

    /// Where to write the helpers. Defaults to standard output.
    #[clap(long, short = 'o')]
    output: Option<PathBuf>,
}

/// Generate helpers for the selected packages.
#[instrument(skip_all)]
pub fn cmd_package_helpers(files: &mut KnownFiles, opt: &PackageHelpersOpt) -> Result<()> {
    let index = opt.input.load_index()?;
    let sources = opt.input.load_packages()?;

    let selected = if opt.package_names.is_empty() {
        sources
            .names()
            .map(|(schema, package)| (schema.to_owned(), package.to_owned()))
            .collect::<Vec<_>>()
    } else {
        opt.package_names
            .iter()
            .map(|name| {
                let name = name.to_lowercase();
                match name.split_once('.') {
                    Some((schema, package)) => (schema.to_owned(), package.to_owned()),
                    None => (opt.input.schema.to_lowercase(), name),
                }
            })
            .collect()
    };
    if selected.is_empty() {
        return Err(format_err!("no packages found; use --packages or --package"));
    }

    let mut statements = vec![];
    for (schema, package) in &selected {
        let text = sources
            .package_source(schema, package)
            .ok_or_else(|| format_err!("no source for package {}.{}", schema, package))?;
        let context = PackageContext::from_source(schema, package, text, &index, files)?;
        let helpers = generate_package_helpers(&context);
        info!(%schema, %package, count = helpers.len(), "generated package helpers");
        statements.extend(helpers);
    }
    let mut text = statements.join("\n\n");
    text.push('\n');
    write_output(opt.output.as_deref(), &text)
}
