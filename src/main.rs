use std::process::exit;

use clap::Parser;
use tracing::info_span;
use tracing_subscriber::EnvFilter;

use pl2pg::{
    cmd::{
        batch::{cmd_batch, BatchOpt},
        golden_test::{cmd_golden_test, GoldenTestOpt},
        package_helpers::{cmd_package_helpers, PackageHelpersOpt},
        stub::{cmd_stub, StubOpt},
        transpile::{cmd_transpile, TranspileOpt},
    },
    known_files::KnownFiles,
};

#[derive(Debug, Parser)]
#[clap(version, about = "Compile Oracle PL/SQL routines into PostgreSQL PL/pgSQL.")]
enum Opt {
    /// Transpile the routines in one PL/SQL file.
    Transpile(TranspileOpt),
    /// Transpile every PL/SQL file in a directory, in parallel.
    Batch(BatchOpt),
    /// Generate stubs with the same signatures as the routines in a file.
    Stub(StubOpt),
    /// Generate the getter and setter functions backing package variables.
    PackageHelpers(PackageHelpersOpt),
    /// Compare transpiled output against expected `*.pgsql` files.
    GoldenTest(GoldenTestOpt),
}

#[tokio::main]
async fn main() {
    // Configure tracing. Verbosity comes from `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let _span = info_span!("pl2pg").entered();

    // Sources parsed outside of a unit of work, for error messages.
    let mut files = KnownFiles::new();
    let opt = Opt::parse();
    let result = match opt {
        Opt::Transpile(opt) => cmd_transpile(&opt),
        Opt::Batch(opt) => cmd_batch(&opt).await,
        Opt::Stub(opt) => cmd_stub(&opt),
        Opt::PackageHelpers(opt) => cmd_package_helpers(&mut files, &opt),
        Opt::GoldenTest(opt) => cmd_golden_test(&opt),
    };
    if let Err(e) = result {
        e.emit(&files);
        exit(1);
    }
}
