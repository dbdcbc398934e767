//! Package contexts: what we know about a package's variables.
//!
//! PL/pgSQL has no package state, so package variables become session
//! settings behind generated getter and setter functions. To rewrite a
//! reference like `pkg.g_counter`, we need the package's declarations,
//! which we get by parsing its source on first use.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt::Write as _,
    fs,
    path::Path,
};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::{
    ast::{parse_plsql, Declaration, SourceUnit, VariableDeclaration},
    errors::{format_err, Context, Error, Result},
    known_files::KnownFiles,
    metadata::{MetadataIndex, MetadataTypeResolver},
    tokenizer::Spanned,
    types::{resolve_data_type, ScalarKind, TypeInfo},
};

/// The raw source of a package, as supplied before a unit of work starts.
#[derive(Clone, Debug, Default)]
pub struct PackageText {
    /// The package specification.
    pub spec: String,
    /// The package body, if we have it.
    pub body: Option<String>,
}

/// Somewhere we can get package sources from. Implementations must be
/// read-only, because they are shared between units of work.
pub trait PackageSource: Send + Sync {
    /// Get the source of `schema.package`. Both names are canonical.
    fn package_source(&self, schema: &str, package: &str) -> Option<&PackageText>;
}

/// An in-memory [`PackageSource`].
#[derive(Debug, Default)]
pub struct PackageSources {
    packages: BTreeMap<(String, String), PackageText>,
}

impl PackageSources {
    /// Create an empty set of package sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package.
    pub fn insert(&mut self, schema: &str, package: &str, spec: String, body: Option<String>) {
        self.packages.insert(
            (schema.to_lowercase(), package.to_lowercase()),
            PackageText { spec, body },
        );
    }

    /// How many packages do we have?
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Do we have no packages at all?
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Every `(schema, package)` we have, in order.
    pub fn names(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.packages
            .keys()
            .map(|(schema, package)| (schema.as_str(), package.as_str()))
    }

    /// Load every `<schema>.<package>.pks` file in `dir`, together with the
    /// matching `.pkb` file if there is one.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut sources = Self::new();
        let pattern = dir.join("*.pks");
        let pattern = pattern
            .to_str()
            .ok_or_else(|| format_err!("package directory is not valid UTF-8: {}", dir.display()))?;
        for entry in glob::glob(pattern).context("invalid package directory pattern")? {
            let spec_path = entry.context("could not read package directory entry")?;
            let stem = spec_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let Some((schema, package)) = stem.split_once('.') else {
                warn!(path = %spec_path.display(), "package file name should be <schema>.<package>.pks");
                continue;
            };
            let spec = fs::read_to_string(&spec_path)
                .with_context(|| format!("could not read {}", spec_path.display()))?;
            let body_path = spec_path.with_extension("pkb");
            let body = if body_path.exists() {
                Some(
                    fs::read_to_string(&body_path)
                        .with_context(|| format!("could not read {}", body_path.display()))?,
                )
            } else {
                None
            };
            sources.insert(schema, package, spec, body);
        }
        debug!(count = sources.len(), dir = %dir.display(), "loaded package sources");
        Ok(sources)
    }
}

impl PackageSource for PackageSources {
    fn package_source(&self, schema: &str, package: &str) -> Option<&PackageText> {
        self.packages.get(&(schema.to_owned(), package.to_owned()))
    }
}

/// How a variable's default should be written in SQL.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DefaultValue {
    /// A literal, stored as text and quoted on output.
    Text(String),
    /// A SQL expression, written as-is.
    Expression(String),
    /// No sensible default.
    Null,
}

impl DefaultValue {
    /// The default, as a SQL expression of type `text`.
    fn as_text_sql(&self) -> String {
        match self {
            DefaultValue::Text(text) => quote_literal(text),
            DefaultValue::Expression(expr) => format!("({})::text", expr),
            DefaultValue::Null => "NULL".to_owned(),
        }
    }

    /// The default, cast to `pg_type`.
    fn as_typed_sql(&self, pg_type: &str) -> String {
        match self {
            DefaultValue::Text(text) => format!("{}::{}", quote_literal(text), pg_type),
            DefaultValue::Expression(expr) => format!("({})::{}", expr, pg_type),
            DefaultValue::Null => format!("NULL::{}", pg_type),
        }
    }
}

/// A package-level variable or constant.
#[derive(Clone, Debug)]
pub struct PackageVariable {
    /// Canonical name.
    pub name: String,
    /// The PL/pgSQL type we store it as.
    pub pg_type: String,
    /// The semantic type.
    pub ty: TypeInfo,
    /// The default expression, as written in the source.
    pub default: Option<String>,
    /// Is this a `CONSTANT`?
    pub constant: bool,
}

impl PackageVariable {
    /// The value used to initialize this variable.
    pub fn default_value(&self) -> DefaultValue {
        static NUMBER: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^-?\d+(\.\d+)?$").expect("constant regex should be valid")
        });

        let Some(default) = self.default.as_deref().map(str::trim) else {
            return type_default(&self.ty);
        };
        if default.is_empty() || default.eq_ignore_ascii_case("NULL") {
            return type_default(&self.ty);
        }
        if NUMBER.is_match(default) {
            return DefaultValue::Text(default.to_owned());
        }
        if default.len() >= 2 && default.starts_with('\'') && default.ends_with('\'') {
            let inner = &default[1..default.len() - 1];
            return DefaultValue::Text(inner.replace("''", "'"));
        }
        match default.to_ascii_uppercase().as_str() {
            "SYSDATE" | "SYSTIMESTAMP" => DefaultValue::Expression("CURRENT_TIMESTAMP".to_owned()),
            "TRUE" => DefaultValue::Text("true".to_owned()),
            "FALSE" => DefaultValue::Text("false".to_owned()),
            _ => DefaultValue::Expression(default.to_owned()),
        }
    }
}

/// The default value for a type, used when a variable has none.
fn type_default(ty: &TypeInfo) -> DefaultValue {
    match ty.scalar() {
        Some(kind) if kind.is_numeric() => DefaultValue::Text("0".to_owned()),
        Some(ScalarKind::Boolean) => DefaultValue::Text("false".to_owned()),
        Some(kind) if kind.is_date_like() => DefaultValue::Expression("CURRENT_TIMESTAMP".to_owned()),
        Some(ScalarKind::Text) | None => DefaultValue::Text(String::new()),
        Some(_) => DefaultValue::Null,
    }
}

/// Quote a string as a SQL literal.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Everything we know about one package.
#[derive(Clone, Debug)]
pub struct PackageContext {
    pub schema: String,
    pub package: String,
    variables: Vec<PackageVariable>,
    by_name: HashMap<String, usize>,
    subprograms: BTreeSet<String>,
    has_body: bool,
}

impl PackageContext {
    /// Create an empty context.
    pub fn new(schema: &str, package: &str) -> Self {
        Self {
            schema: schema.to_owned(),
            package: package.to_owned(),
            variables: vec![],
            by_name: HashMap::new(),
            subprograms: BTreeSet::new(),
            has_body: false,
        }
    }

    /// Parse a package's source and collect its declarations. The spec and
    /// body are added to `files`, so that errors can point into them.
    #[instrument(level = "debug", skip_all, fields(schema = %schema, package = %package))]
    pub fn from_source(
        schema: &str,
        package: &str,
        text: &PackageText,
        index: &MetadataIndex,
        files: &mut KnownFiles,
    ) -> Result<Self> {
        let mut context = Self::new(schema, package);
        let mut sources = vec![(format!("{}.{}.pks", schema, package), text.spec.as_str())];
        if let Some(body) = &text.body {
            sources.push((format!("{}.{}.pkb", schema, package), body.as_str()));
        }
        for (path, source) in sources {
            let file_id = files.add_string(path, source);
            let source_file = parse_plsql(files, file_id)?;
            for unit in &source_file.units {
                let items = match unit {
                    SourceUnit::PackageSpec(spec) => &spec.items,
                    SourceUnit::PackageBody(body) => {
                        context.has_body = true;
                        &body.items
                    }
                    SourceUnit::Routine(routine) => {
                        return Err(Error::annotated(
                            format!("expected package {}, found a routine", package),
                            routine.heading.name.span(),
                            "not a package",
                        ));
                    }
                };
                context.add_declarations(items, index, files)?;
            }
        }
        debug!(
            variables = context.variables.len(),
            subprograms = context.subprograms.len(),
            "built package context"
        );
        Ok(context)
    }

    /// Collect the variables and subprograms from a package spec or body.
    /// `files` must hold the source the declarations were parsed from.
    pub fn add_declarations<'d>(
        &mut self,
        items: impl IntoIterator<Item = &'d Declaration>,
        index: &MetadataIndex,
        files: &KnownFiles,
    ) -> Result<()> {
        let resolver = MetadataTypeResolver {
            index,
            schema: &self.schema,
        };
        let mut variables = vec![];
        for item in items {
            match item {
                Declaration::Variable(decl) => {
                    variables.push(variable_from_decl(decl, &resolver, files))
                }
                Declaration::Subprogram(decl) => {
                    self.subprograms.insert(decl.heading.name.name());
                }
                Declaration::Cursor(_)
                | Declaration::Exception(_)
                | Declaration::Pragma(_)
                | Declaration::Type(_) => {}
            }
        }
        for variable in variables {
            self.add_variable(variable)?;
        }
        Ok(())
    }

    /// Collect the private declarations of the package body. Variables the
    /// spec already declared are not redeclared.
    pub fn add_body_declarations(
        &mut self,
        items: &[Declaration],
        index: &MetadataIndex,
        files: &KnownFiles,
    ) -> Result<()> {
        let private = items
            .iter()
            .filter(|item| match item {
                Declaration::Variable(decl) => {
                    !self.by_name.contains_key(&decl.name.canonical_name())
                }
                _ => true,
            })
            .collect::<Vec<_>>();
        self.add_declarations(private, index, files)?;
        self.has_body = true;
        Ok(())
    }

    /// Have we seen the package body, or only the spec?
    pub fn has_body(&self) -> bool {
        self.has_body
    }

    /// Add a variable. Declaring the same name twice is an error.
    pub fn add_variable(&mut self, variable: PackageVariable) -> Result<()> {
        if self.by_name.contains_key(&variable.name) {
            return Err(format_err!(
                "duplicate package variable {}.{}.{}",
                self.schema,
                self.package,
                variable.name
            ));
        }
        self.by_name
            .insert(variable.name.clone(), self.variables.len());
        self.variables.push(variable);
        Ok(())
    }

    /// Add a subprogram name.
    pub fn add_subprogram(&mut self, name: &str) {
        self.subprograms.insert(name.to_owned());
    }

    /// Look up a variable by canonical name.
    pub fn variable(&self, name: &str) -> Option<&PackageVariable> {
        self.by_name.get(name).map(|&i| &self.variables[i])
    }

    /// All variables, in declaration order.
    pub fn variables(&self) -> &[PackageVariable] {
        &self.variables
    }

    /// Does this package declare a function or procedure named `name`?
    pub fn has_subprogram(&self, name: &str) -> bool {
        self.subprograms.contains(name)
    }

    /// The flattened, schema-qualified name of a package member.
    pub fn member_name(&self, name: &str) -> String {
        format!("{}.{}__{}", self.schema, self.package, name)
    }

    /// The getter for `variable`.
    pub fn getter_name(&self, variable: &str) -> String {
        self.member_name(&format!("get_{}", variable))
    }

    /// The setter for `variable`.
    pub fn setter_name(&self, variable: &str) -> String {
        self.member_name(&format!("set_{}", variable))
    }

    /// The function which initializes all our variables.
    pub fn initializer_name(&self) -> String {
        self.member_name("initialize")
    }

    /// The session setting holding `variable`.
    pub fn config_key(&self, variable: &str) -> String {
        format!("{}.{}.{}", self.schema, self.package, variable)
    }
}

/// Build a [`PackageVariable`] from its declaration.
fn variable_from_decl(
    decl: &VariableDeclaration,
    resolver: &MetadataTypeResolver<'_>,
    files: &KnownFiles,
) -> PackageVariable {
    let resolved = resolve_data_type(&decl.data_type, resolver);
    let pg_type = match resolved.info.scalar() {
        Some(kind) => kind.pg_name(),
        None => resolved.pg_name,
    };
    PackageVariable {
        name: decl.name.canonical_name(),
        pg_type,
        ty: resolved.info,
        default: decl
            .default
            .as_ref()
            .and_then(|d| files.span_text(d.value.span()))
            .map(|s| s.to_owned()),
        constant: decl.constant_token.is_some(),
    }
}

/// Package contexts for one unit of work.
///
/// This is created fresh for each unit and dropped with it. Never keep one
/// around between units.
#[derive(Debug, Default)]
pub struct PackageContextCache {
    contexts: HashMap<(String, String), Option<PackageContext>>,
}

impl PackageContextCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the context for `schema.package`, building it on first use.
    /// Returns `None` if we have no source for the package, and remembers
    /// that too.
    pub fn get(
        &mut self,
        schema: &str,
        package: &str,
        source: &dyn PackageSource,
        index: &MetadataIndex,
        files: &mut KnownFiles,
    ) -> Result<Option<&PackageContext>> {
        let key = (schema.to_owned(), package.to_owned());
        if !self.contexts.contains_key(&key) {
            debug!(%schema, %package, "package context cache miss");
            let context = match source.package_source(schema, package) {
                Some(text) => Some(PackageContext::from_source(
                    schema, package, text, index, files,
                )?),
                None => None,
            };
            self.contexts.insert(key.clone(), context);
        }
        Ok(self.contexts.get(&key).and_then(|c| c.as_ref()))
    }

    /// Insert a context directly. Mostly used for the package that owns
    /// the routine being transformed.
    pub fn insert(&mut self, context: PackageContext) {
        self.contexts.insert(
            (context.schema.clone(), context.package.clone()),
            Some(context),
        );
    }

    /// Look up an already-built context without building anything.
    pub fn peek(&self, schema: &str, package: &str) -> Option<&PackageContext> {
        self.contexts
            .get(&(schema.to_owned(), package.to_owned()))
            .and_then(|c| c.as_ref())
    }

    /// How many packages have we looked up, including absent ones?
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Have we looked up nothing yet?
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Generate the helper functions backing a package's variables: one
/// initializer, one getter per variable, and one setter per non-constant
/// variable. Each statement is complete and ends with `$$;`.
pub fn generate_package_helpers(context: &PackageContext) -> Vec<String> {
    let mut statements = vec![generate_initializer(context)];
    for variable in context.variables() {
        statements.push(generate_getter(context, variable));
        if !variable.constant {
            statements.push(generate_setter(context, variable));
        }
    }
    debug!(
        schema = %context.schema,
        package = %context.package,
        count = statements.len(),
        "generated package helpers"
    );
    statements
}

fn generate_initializer(context: &PackageContext) -> String {
    let flag = quote_literal(&context.config_key("__initialized"));
    let mut sql = String::new();
    let _ = writeln!(sql, "CREATE OR REPLACE FUNCTION {}()", context.initializer_name());
    sql.push_str("RETURNS void\nLANGUAGE plpgsql\nAS $$\nBEGIN\n");
    let _ = writeln!(sql, "  IF current_setting({}, true) = 'true' THEN", flag);
    sql.push_str("    RETURN;\n  END IF;\n");
    for variable in context.variables() {
        let _ = writeln!(
            sql,
            "  PERFORM set_config({}, {}, false);",
            quote_literal(&context.config_key(&variable.name)),
            variable.default_value().as_text_sql(),
        );
    }
    let _ = writeln!(sql, "  PERFORM set_config({}, 'true', false);", flag);
    sql.push_str("END;\n$$;");
    sql
}

fn generate_getter(context: &PackageContext, variable: &PackageVariable) -> String {
    let default = variable.default_value().as_typed_sql(&variable.pg_type);
    let mut sql = String::new();
    let _ = writeln!(sql, "CREATE OR REPLACE FUNCTION {}()", context.getter_name(&variable.name));
    let _ = writeln!(sql, "RETURNS {}", variable.pg_type);
    sql.push_str("LANGUAGE plpgsql\nAS $$\nBEGIN\n");
    let _ = writeln!(
        sql,
        "  RETURN COALESCE(current_setting({}, true)::{}, {});",
        quote_literal(&context.config_key(&variable.name)),
        variable.pg_type,
        default,
    );
    sql.push_str("EXCEPTION WHEN OTHERS THEN\n");
    let _ = writeln!(sql, "  RETURN {};", default);
    sql.push_str("END;\n$$;");
    sql
}

fn generate_setter(context: &PackageContext, variable: &PackageVariable) -> String {
    let mut sql = String::new();
    let _ = writeln!(
        sql,
        "CREATE OR REPLACE FUNCTION {}(p_value {})",
        context.setter_name(&variable.name),
        variable.pg_type,
    );
    sql.push_str("RETURNS void\nLANGUAGE plpgsql\nAS $$\nBEGIN\n");
    let _ = writeln!(
        sql,
        "  PERFORM set_config({}, p_value::text, false);",
        quote_literal(&context.config_key(&variable.name)),
    );
    sql.push_str("END;\n$$;");
    sql
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::metadata::tests::test_index;

    pub(crate) const COUNTER_SPEC: &str = "CREATE OR REPLACE PACKAGE hr.counter_pkg IS
  g_counter NUMBER := 0;
  g_label VARCHAR2(30) := 'it''s';
  c_limit CONSTANT PLS_INTEGER := 100;
  g_started DATE;
  PROCEDURE bump;
  FUNCTION current_value RETURN NUMBER;
END counter_pkg;
/
";

    pub(crate) const COUNTER_BODY: &str = "CREATE OR REPLACE PACKAGE BODY hr.counter_pkg IS
  g_hidden BOOLEAN := TRUE;
  PROCEDURE bump IS
  BEGIN
    g_counter := g_counter + 1;
  END bump;
  FUNCTION current_value RETURN NUMBER IS
  BEGIN
    RETURN g_counter;
  END current_value;
END counter_pkg;
/
";

    pub(crate) fn test_sources() -> PackageSources {
        let mut sources = PackageSources::new();
        sources.insert(
            "hr",
            "counter_pkg",
            COUNTER_SPEC.to_owned(),
            Some(COUNTER_BODY.to_owned()),
        );
        sources.insert("hr", "broken_pkg", "CREATE PACKAGE broken_pkg IS x;".to_owned(), None);
        sources
    }

    fn counter_context() -> PackageContext {
        let index = test_index();
        let mut files = KnownFiles::new();
        let sources = test_sources();
        let text = sources.package_source("hr", "counter_pkg").unwrap();
        PackageContext::from_source("hr", "counter_pkg", text, &index, &mut files).unwrap()
    }

    #[test]
    fn collects_variables_from_spec_and_body() {
        let context = counter_context();
        let names = context
            .variables()
            .iter()
            .map(|v| v.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["g_counter", "g_label", "c_limit", "g_started", "g_hidden"]
        );
        assert!(context.variable("c_limit").unwrap().constant);
        assert_eq!(context.variable("g_label").unwrap().pg_type, "text");
        assert!(context.has_subprogram("bump"));
        assert!(context.has_subprogram("current_value"));
        assert_eq!(context.getter_name("g_counter"), "hr.counter_pkg__get_g_counter");
        assert_eq!(context.setter_name("g_counter"), "hr.counter_pkg__set_g_counter");
    }

    #[test]
    fn defaults_follow_types() {
        let context = counter_context();
        let default = |name: &str| context.variable(name).unwrap().default_value();
        assert_eq!(default("g_counter"), DefaultValue::Text("0".to_owned()));
        assert_eq!(default("g_label"), DefaultValue::Text("it's".to_owned()));
        assert_eq!(
            default("g_started"),
            DefaultValue::Expression("CURRENT_TIMESTAMP".to_owned())
        );
        assert_eq!(default("g_hidden"), DefaultValue::Text("true".to_owned()));
    }

    #[test]
    fn cache_builds_once_and_remembers_absence() {
        let index = test_index();
        let sources = test_sources();
        let mut files = KnownFiles::new();
        let mut cache = PackageContextCache::new();
        assert!(cache
            .get("hr", "counter_pkg", &sources, &index, &mut files)
            .unwrap()
            .is_some());
        assert!(cache
            .get("hr", "missing_pkg", &sources, &index, &mut files)
            .unwrap()
            .is_none());
        assert_eq!(cache.len(), 2);
        assert!(cache.peek("hr", "counter_pkg").is_some());

        // A second lookup is served from the cache.
        cache
            .get("hr", "counter_pkg", &sources, &index, &mut files)
            .unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn unparseable_package_source_is_parse_unusable() {
        let index = test_index();
        let sources = test_sources();
        let mut files = KnownFiles::new();
        let mut cache = PackageContextCache::new();
        let err = cache
            .get("hr", "broken_pkg", &sources, &index, &mut files)
            .unwrap_err();
        assert_eq!(err.kind(), crate::errors::FailureKind::ParseUnusable);
    }

    #[test]
    fn helper_functions() {
        let context = counter_context();
        let helpers = generate_package_helpers(&context);
        // One initializer, five getters and four setters.
        assert_eq!(helpers.len(), 10);
        assert_eq!(
            helpers[1],
            "CREATE OR REPLACE FUNCTION hr.counter_pkg__get_g_counter()
RETURNS numeric
LANGUAGE plpgsql
AS $$
BEGIN
  RETURN COALESCE(current_setting('hr.counter_pkg.g_counter', true)::numeric, '0'::numeric);
EXCEPTION WHEN OTHERS THEN
  RETURN '0'::numeric;
END;
$$;"
        );
        assert_eq!(
            helpers[2],
            "CREATE OR REPLACE FUNCTION hr.counter_pkg__set_g_counter(p_value numeric)
RETURNS void
LANGUAGE plpgsql
AS $$
BEGIN
  PERFORM set_config('hr.counter_pkg.g_counter', p_value::text, false);
END;
$$;"
        );
        assert!(helpers[0].contains("PERFORM set_config('hr.counter_pkg.g_label', 'it''s', false);"));
        assert!(helpers[0]
            .contains("PERFORM set_config('hr.counter_pkg.__initialized', 'true', false);"));
        assert!(!helpers.iter().any(|h| h.contains("__set_c_limit")));
    }
}
