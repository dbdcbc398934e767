//! Units of work, and the context code generation runs in.
//!
//! A unit of work is one routine. Every unit gets its own
//! [`PackageContextCache`] and its own type annotations, and drops both when
//! it finishes. Only the [`MetadataIndex`] and the [`PackageSource`] are
//! shared, and both are read-only.

use std::fmt;

use tracing::{debug, instrument};

use crate::{
    analyze::{check_annotations, CursorUsage},
    ast::{self, parse_plsql, Declaration, SourceUnit},
    codegen::{self, PlpgsqlWriter},
    errors::{Error, FailureKind, Result},
    infer::{InferenceResults, Inferrer},
    known_files::KnownFiles,
    metadata::MetadataIndex,
    package_context::{PackageContext, PackageContextCache, PackageSource},
    tokenizer::{Span, Spanned},
};

/// Everything code generation may consult. Passed explicitly to every
/// rewrite rule.
pub struct TransformationContext<'run> {
    /// The schema the routine belongs to.
    pub schema: String,
    /// The package the routine belongs to, if any.
    pub package: Option<String>,
    pub index: &'run MetadataIndex,
    pub packages: &'run PackageContextCache,
    pub inference: &'run InferenceResults,
    /// Cursors needing tracking variables, and records of query loops.
    pub cursors: CursorUsage,
    pub files: &'run KnownFiles,
}

impl<'run> TransformationContext<'run> {
    /// Get a package context that type inference already built.
    pub fn package_context(
        &self,
        schema: &str,
        package: &str,
        span: Span,
    ) -> Result<&'run PackageContext> {
        self.packages.peek(schema, package).ok_or_else(|| {
            Error::incomplete(
                format!("package {}.{} was never loaded", schema, package),
                span,
            )
        })
    }

    /// The flattened PL/pgSQL name of a routine: `schema.name`, or
    /// `schema.package__name` for a package member.
    pub fn routine_name(&self, schema: &str, package: Option<&str>, name: &str) -> String {
        match package {
            Some(package) => format!(
                "{}.{}",
                codegen::ident_sql(schema),
                codegen::ident_sql(&format!("{}__{}", package, name))
            ),
            None => format!("{}.{}", codegen::ident_sql(schema), codegen::ident_sql(name)),
        }
    }

    /// The schema-qualified name of a table, as it should appear in SQL.
    /// Names we can't find in the catalog are left as written.
    pub fn table_name(&self, table: &ast::TableReference) -> Result<String> {
        if let Some(dblink) = &table.dblink {
            return Err(Error::unsupported("database link", dblink.span()));
        }
        let parts = table.name.canonical_parts();
        match self.index.resolve_table(&self.schema, &parts) {
            Some(name) => Ok(format!(
                "{}.{}",
                codegen::ident_sql(&name.schema),
                codegen::ident_sql(&name.name)
            )),
            None => Ok(parts
                .iter()
                .map(|p| codegen::ident_sql(p))
                .collect::<Vec<_>>()
                .join(".")),
        }
    }
}

/// A successful transformation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transformed {
    /// A complete `CREATE OR REPLACE FUNCTION` statement.
    pub sql: String,
    /// Things a human should look at, with source locations.
    pub warnings: Vec<String>,
}

/// A failed transformation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransformFailure {
    pub kind: FailureKind,
    /// A one-line description.
    pub message: String,
    /// A full diagnostic, with source snippets, without color.
    pub rendered: String,
    /// Whatever we generated before failing. For display only, never for
    /// execution.
    pub partial: Option<String>,
}

impl TransformFailure {
    /// Describe `err`, rendering any diagnostic against `files`.
    pub fn from_error(err: &Error, files: &KnownFiles, partial: Option<String>) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            rendered: err.render(files),
            partial,
        }
    }
}

impl fmt::Display for TransformFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// The result of one unit of work. Never contains partial output on
/// success.
pub type TransformationResult = std::result::Result<Transformed, TransformFailure>;

/// One routine to transform.
#[derive(Clone, Copy)]
pub struct RoutineUnit<'a> {
    pub schema: &'a str,
    pub package: Option<&'a str>,
    pub heading: &'a ast::RoutineHeading,
    pub body: &'a ast::Block,
    /// The package-level declarations of the body this routine came from.
    /// Used when the package isn't available from the [`PackageSource`].
    pub package_items: Option<&'a [Declaration]>,
}

impl<'a> RoutineUnit<'a> {
    /// A display name, like `hr.pkg.proc`.
    pub fn name(&self) -> String {
        let name = self.heading.name.name();
        match self.package {
            Some(package) => format!("{}.{}.{}", self.schema, package, name),
            None => format!("{}.{}", self.schema, name),
        }
    }
}

/// Make sure the cache knows about the package our routine belongs to,
/// including the private declarations of its body.
fn load_own_package(
    unit: &RoutineUnit<'_>,
    index: &MetadataIndex,
    sources: &dyn PackageSource,
    cache: &mut PackageContextCache,
    files: &mut KnownFiles,
) -> Result<()> {
    let Some(package) = unit.package else {
        return Ok(());
    };
    let has_body = match cache.get(unit.schema, package, sources, index, files)? {
        Some(context) => context.has_body(),
        None => false,
    };
    let Some(items) = unit.package_items else {
        return Ok(());
    };
    if has_body {
        return Ok(());
    }
    let mut context = match cache.peek(unit.schema, package) {
        Some(spec_only) => {
            debug!(schema = %unit.schema, %package, "adding body declarations to package context");
            spec_only.clone()
        }
        None => {
            debug!(schema = %unit.schema, %package, "building package context from body");
            PackageContext::new(unit.schema, package)
        }
    };
    context.add_body_declarations(items, index, files)?;
    cache.insert(context);
    Ok(())
}

/// Run type inference for a unit, with a fresh package context cache.
fn run_inference(
    unit: &RoutineUnit<'_>,
    index: &MetadataIndex,
    sources: &dyn PackageSource,
    cache: &mut PackageContextCache,
    files: &mut KnownFiles,
    heading_only: bool,
) -> Result<InferenceResults> {
    load_own_package(unit, index, sources, cache, files)?;
    let inferrer = Inferrer::new(unit.schema, unit.package, index, sources, cache, files);
    if heading_only {
        inferrer.infer_heading(unit.heading)
    } else {
        let results = inferrer.infer_routine(unit.heading, unit.body)?;
        check_annotations(unit.heading, &results.types)?;
        check_annotations(unit.body, &results.types)?;
        Ok(results)
    }
}

/// Transform one routine. This is our unit of work.
#[instrument(level = "debug", skip_all, fields(routine = %unit.name()))]
pub fn transform_routine(
    unit: &RoutineUnit<'_>,
    index: &MetadataIndex,
    sources: &dyn PackageSource,
    files: &mut KnownFiles,
) -> TransformationResult {
    generate(unit, index, sources, files, false)
}

/// Generate a stub for one routine: the same header as [`transform_routine`]
/// would produce, with a body that only returns.
#[instrument(level = "debug", skip_all, fields(routine = %unit.name()))]
pub fn generate_stub(
    unit: &RoutineUnit<'_>,
    index: &MetadataIndex,
    sources: &dyn PackageSource,
    files: &mut KnownFiles,
) -> TransformationResult {
    generate(unit, index, sources, files, true)
}

fn generate(
    unit: &RoutineUnit<'_>,
    index: &MetadataIndex,
    sources: &dyn PackageSource,
    files: &mut KnownFiles,
    stub: bool,
) -> TransformationResult {
    let mut cache = PackageContextCache::new();
    let inference = run_inference(unit, index, sources, &mut cache, files, stub)
        .map_err(|err| TransformFailure::from_error(&err, files, None))?;
    debug!(packages = cache.len(), "type inference complete");

    let cx = TransformationContext {
        schema: unit.schema.to_owned(),
        package: unit.package.map(|p| p.to_owned()),
        index,
        packages: &cache,
        inference: &inference,
        cursors: if stub {
            CursorUsage::default()
        } else {
            CursorUsage::collect(unit.body)
        },
        files: &*files,
    };
    let mut writer = PlpgsqlWriter::new();
    let emitted = if stub {
        codegen::emit_stub(&cx, unit.heading, &mut writer)
    } else {
        codegen::emit_routine(&cx, unit.heading, unit.body, &mut writer)
    };
    match emitted {
        Ok(()) => {
            debug!("code generation complete");
            Ok(Transformed {
                sql: writer.into_string(),
                warnings: inference.warnings().to_vec(),
            })
        }
        Err(err) => Err(TransformFailure::from_error(
            &err,
            files,
            Some(writer.into_string()),
        )),
    }
}

/// The outcome of one unit of work in a source file.
#[derive(Clone, Debug)]
pub struct UnitOutcome {
    /// The routine's display name, or the file name if we couldn't parse it.
    pub name: String,
    pub result: TransformationResult,
}

/// What to produce for each routine in a file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputMode {
    /// A full translation.
    Full,
    /// A stub with the same header.
    Stub,
}

/// Parse a file of PL/SQL and transform every routine in it. Standalone
/// routines are one unit each. Package bodies produce one unit per
/// subprogram. Package specs produce nothing.
///
/// `schema` is used for routines whose names aren't schema-qualified.
#[instrument(level = "debug", skip_all, fields(path = %path))]
pub fn transform_source(
    path: &str,
    source: &str,
    schema: &str,
    index: &MetadataIndex,
    sources: &dyn PackageSource,
    mode: OutputMode,
) -> Vec<UnitOutcome> {
    let mut files = KnownFiles::new();
    let file_id = files.add_string(path, source);
    let source_file = match parse_plsql(&files, file_id) {
        Ok(source_file) => source_file,
        Err(err) => {
            return vec![UnitOutcome {
                name: path.to_owned(),
                result: Err(TransformFailure::from_error(&err, &files, None)),
            }]
        }
    };

    let default_schema = schema.to_lowercase();
    let schema_of = |name: &ast::QualifiedName| {
        name.qualifier()
            .unwrap_or_else(|| default_schema.clone())
    };
    let mut pending = vec![];
    for source_unit in &source_file.units {
        match source_unit {
            SourceUnit::Routine(routine) => pending.push(PendingUnit {
                schema: schema_of(&routine.heading.name),
                package: None,
                heading: &routine.heading,
                body: &routine.body,
                package_items: None,
            }),
            SourceUnit::PackageBody(body) => {
                for item in &body.items {
                    if let Declaration::Subprogram(ast::SubprogramDeclaration {
                        heading,
                        body: Some(sub_body),
                        ..
                    }) = item
                    {
                        pending.push(PendingUnit {
                            schema: schema_of(&body.name),
                            package: Some(body.name.name()),
                            heading,
                            body: &sub_body.block,
                            package_items: Some(&body.items),
                        });
                    }
                }
            }
            SourceUnit::PackageSpec(spec) => {
                debug!(package = %spec.name.name(), "skipping package spec");
            }
        }
    }

    let mut outcomes = vec![];
    for pending_unit in &pending {
        let unit = RoutineUnit {
            schema: &pending_unit.schema,
            package: pending_unit.package.as_deref(),
            heading: pending_unit.heading,
            body: pending_unit.body,
            package_items: pending_unit.package_items,
        };
        let result = match mode {
            OutputMode::Full => transform_routine(&unit, index, sources, &mut files),
            OutputMode::Stub => generate_stub(&unit, index, sources, &mut files),
        };
        outcomes.push(UnitOutcome {
            name: unit.name(),
            result,
        });
    }
    outcomes
}

/// A unit found in a source file, with owned names.
struct PendingUnit<'a> {
    schema: String,
    package: Option<String>,
    heading: &'a ast::RoutineHeading,
    body: &'a ast::Block,
    package_items: Option<&'a [Declaration]>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{metadata::tests::test_index, package_context::tests::test_sources};

    fn transform(source: &str) -> Vec<UnitOutcome> {
        transform_source(
            "test.sql",
            source,
            "HR",
            &test_index(),
            &test_sources(),
            OutputMode::Full,
        )
    }

    #[test]
    fn parse_errors_are_parse_unusable() {
        let outcomes = transform("CREATE PROCEDURE p IS BEGIN x := ; END;");
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].name, "test.sql");
        let failure = outcomes[0].result.as_ref().unwrap_err();
        assert_eq!(failure.kind, FailureKind::ParseUnusable);
        assert!(failure.partial.is_none());
    }

    #[test]
    fn package_bodies_are_one_unit_per_subprogram() {
        let outcomes = transform(
            "CREATE OR REPLACE PACKAGE BODY app_pkg IS
               g_hits NUMBER := 0;
               PROCEDURE hit IS
               BEGIN
                 g_hits := g_hits + 1;
               END hit;
               FUNCTION hits RETURN NUMBER IS
               BEGIN
                 RETURN g_hits;
               END hits;
             END app_pkg;",
        );
        let names = outcomes.iter().map(|o| o.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["hr.app_pkg.hit", "hr.app_pkg.hits"]);
        let hit = outcomes[0].result.as_ref().unwrap();
        assert!(hit
            .sql
            .contains("PERFORM hr.app_pkg__set_g_hits(hr.app_pkg__get_g_hits() + 1);"));
    }

    #[test]
    fn failures_keep_partial_output() {
        let outcomes = transform(
            "CREATE PROCEDURE p IS
             BEGIN
               COMMIT;
             END;",
        );
        let failure = outcomes[0].result.as_ref().unwrap_err();
        assert_eq!(failure.kind, FailureKind::UnsupportedConstruct);
        assert!(failure
            .partial
            .as_deref()
            .unwrap()
            .starts_with("CREATE OR REPLACE FUNCTION hr.p()"));
    }

    #[test]
    fn failures_do_not_affect_sibling_units() {
        let outcomes = transform(
            "CREATE OR REPLACE PACKAGE BODY app_pkg IS
               PROCEDURE bad IS
               BEGIN
                 x := missing_thing;
               END bad;
               PROCEDURE good IS
               BEGIN
                 NULL;
               END good;
             END app_pkg;",
        );
        assert_eq!(
            outcomes[0].result.as_ref().unwrap_err().kind,
            FailureKind::UnresolvedReference
        );
        assert!(outcomes[1].result.is_ok());
    }
}
