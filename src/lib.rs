//! Compile Oracle PL/SQL routines into PostgreSQL PL/pgSQL.
//!
//! Each routine is one unit of work: we parse it, run type inference over
//! it, and generate a `CREATE OR REPLACE FUNCTION` statement. The only state
//! shared between units is the read-only [`MetadataIndex`] and
//! [`PackageSource`].

pub mod analyze;
pub mod ast;
pub mod cmd;
pub mod codegen;
pub mod context;
pub mod errors;
pub mod infer;
pub mod known_files;
pub mod metadata;
pub mod package_context;
pub mod scope;
pub mod tokenizer;
pub mod types;
pub mod unification;
pub mod util;

pub use context::{
    generate_stub, transform_routine, transform_source, OutputMode, RoutineUnit,
    TransformFailure, TransformationContext, TransformationResult, Transformed, UnitOutcome,
};
pub use errors::{Error, FailureKind, Result};
pub use metadata::{CatalogSnapshot, MetadataIndex, MetadataIndexBuilder};
pub use package_context::{
    generate_package_helpers, PackageContext, PackageContextCache, PackageSource,
    PackageSources, PackageText,
};
