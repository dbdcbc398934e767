//! Our type inference and name resolution pass.
//!
//! This walks a routine once, depth first, and records three things, all
//! keyed by [`NodeId`]:
//!
//! 1. A [`TypeInfo`] for every expression.
//! 2. A [`NameResolution`] for every dotted name, saying whether `a.b` is a
//!    record field, a package variable, a type method, a package function,
//!    and so on.
//! 3. A [`ResolvedType`] for every declared type, and an
//!    [`ExceptionResolution`] for every exception name.
//!
//! Code generation never re-derives any of this. It asks, and if the answer
//! is missing, that's a bug in this module.

use std::collections::HashMap;

use tracing::{debug, instrument, trace, warn};

use crate::{
    analyze::expression_spans,
    ast::{self, NameExpression},
    errors::{Error, Result},
    known_files::{FileId, KnownFiles},
    metadata::{MetadataIndex, MetadataTypeResolver},
    package_context::{PackageContextCache, PackageSource, PackageVariable},
    scope::{ColumnLookup, ColumnSet, LocalKind, LocalSymbol, ScopeStack},
    tokenizer::{Ident, LiteralValue, Span, Spanned},
    types::{
        arithmetic_result, built_in_function, resolve_data_type, ArithmeticOp, ObjectName,
        RecordField, RecordType, ResolvedType, ScalarKind, TypeInfo, TypeNameResolver,
    },
};

/// PL/SQL predefined exceptions, and their PL/pgSQL condition names.
static PREDEFINED_EXCEPTIONS: phf::Map<&'static str, &'static str> = phf::phf_map! {
    "NO_DATA_FOUND" => "no_data_found",
    "TOO_MANY_ROWS" => "too_many_rows",
    "ZERO_DIVIDE" => "division_by_zero",
    "VALUE_ERROR" => "invalid_text_representation",
    "INVALID_NUMBER" => "invalid_text_representation",
    "DUP_VAL_ON_INDEX" => "unique_violation",
    "INVALID_CURSOR" => "invalid_cursor_state",
    "CURSOR_ALREADY_OPEN" => "duplicate_cursor",
    "TIMEOUT_ON_RESOURCE" => "lock_not_available",
    "LOGIN_DENIED" => "invalid_authorization_specification",
    "NOT_LOGGED_ON" => "connection_does_not_exist",
    "PROGRAM_ERROR" => "internal_error",
    "STORAGE_ERROR" => "out_of_memory",
    "ROWTYPE_MISMATCH" => "datatype_mismatch",
    "COLLECTION_IS_NULL" => "null_value_not_allowed",
    "SUBSCRIPT_BEYOND_COUNT" => "array_subscript_error",
    "SUBSCRIPT_OUTSIDE_LIMIT" => "array_subscript_error",
    "TRANSACTION_BACKED_OUT" => "transaction_rollback",
};

/// The first SQLSTATE we hand out to user-declared exceptions is `P9001`.
const FIRST_USER_EXCEPTION: u32 = 9001;

/// A stable identity for a syntax tree node: the byte range of its source.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId {
    pub file_id: FileId,
    pub start: usize,
    pub end: usize,
}

impl NodeId {
    /// The identity of `node`, if it came from a source file.
    pub fn of<T: Spanned + ?Sized>(node: &T) -> Option<NodeId> {
        match node.span() {
            Span::Known {
                file_id,
                start,
                end,
            } => Some(NodeId {
                file_id,
                start,
                end,
            }),
            Span::Unknown => None,
        }
    }
}

/// Write-once type annotations.
#[derive(Debug, Default)]
pub struct TypeAnnotations {
    types: HashMap<NodeId, TypeInfo>,
}

impl TypeAnnotations {
    /// Record the type of `node`. Recording a different type for a node we
    /// have already annotated is a bug.
    pub fn record(&mut self, node: &dyn Spanned, ty: TypeInfo) -> Result<()> {
        let span = node.span();
        let id = NodeId::of(&span)
            .ok_or_else(|| Error::incomplete("cannot annotate a node with no source", span))?;
        match self.types.get(&id) {
            Some(existing) if *existing != ty => Err(Error::incomplete(
                format!("conflicting types {} and {} for one node", existing, ty),
                span,
            )),
            Some(_) => Ok(()),
            None => {
                self.types.insert(id, ty);
                Ok(())
            }
        }
    }

    /// Get the type of `node`, if we have one.
    pub fn get(&self, node: &dyn Spanned) -> Option<&TypeInfo> {
        self.types.get(&NodeId::of(node)?)
    }

    /// Get the type of `node`, or fail.
    pub fn require(&self, node: &dyn Spanned) -> Result<&TypeInfo> {
        self.get(node)
            .ok_or_else(|| Error::incomplete("expression has no type annotation", node.span()))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// `NEXTVAL` or `CURRVAL`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SequenceOp {
    NextVal,
    CurrVal,
}

impl SequenceOp {
    /// The PostgreSQL function implementing this operation.
    pub fn pg_function(self) -> &'static str {
        match self {
            SequenceOp::NextVal => "nextval",
            SequenceOp::CurrVal => "currval",
        }
    }
}

/// `%FOUND`, `%NOTFOUND`, `%ISOPEN` or `%ROWCOUNT`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CursorAttributeKind {
    Found,
    NotFound,
    IsOpen,
    RowCount,
}

/// What a name refers to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NameResolution {
    /// A local variable, parameter, cursor, loop index or loop record.
    Local { name: String },
    /// A field of a local record or object, like `r.salary`.
    LocalField {
        variable: String,
        fields: Vec<String>,
    },
    /// A field of a local `TYPE ... IS RECORD` variable, which lives in a
    /// `jsonb` object.
    JsonbField {
        variable: String,
        fields: Vec<String>,
    },
    /// A package-level variable, read or written through accessors.
    ModuleVariable {
        schema: String,
        package: String,
        variable: String,
        constant: bool,
    },
    /// `v.method(args)`, where `v` has an object type.
    TypeMethod {
        schema: String,
        type_name: String,
        method: String,
        receiver: String,
    },
    /// `type.method(args)`.
    StaticTypeMethod {
        schema: String,
        type_name: String,
        method: String,
    },
    /// `pkg.f(args)`, or a call to another subprogram of our own package.
    PackageFunction {
        schema: String,
        package: String,
        function: String,
    },
    /// A standalone function or procedure.
    StandaloneRoutine { schema: String, name: String },
    /// A built-in function or pseudo-column, by canonical name.
    Builtin { name: String },
    /// A column of a table in an enclosing query.
    Column {
        qualifier: Option<String>,
        column: String,
    },
    /// `seq.NEXTVAL` or `seq.CURRVAL`.
    Sequence {
        schema: String,
        name: String,
        op: SequenceOp,
    },
    /// `c%FOUND`, or `SQL%FOUND` when `cursor` is `None`.
    CursorAttribute {
        cursor: Option<String>,
        attribute: CursorAttributeKind,
    },
}

/// What an exception name refers to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExceptionResolution {
    /// A predefined exception with a PL/pgSQL condition name.
    Predefined(&'static str),
    /// An exception declared in the routine, with its SQLSTATE.
    UserDefined { sqlstate: String },
    /// `OTHERS`.
    Others,
    /// Anything else, lowercased.
    Passthrough(String),
}

/// Everything type inference learned about one routine.
#[derive(Debug, Default)]
pub struct InferenceResults {
    pub types: TypeAnnotations,
    names: HashMap<NodeId, NameResolution>,
    declared: HashMap<NodeId, ResolvedType>,
    exceptions: HashMap<NodeId, ExceptionResolution>,
    warnings: Vec<String>,
}

impl InferenceResults {
    /// The type of an expression.
    pub fn type_of(&self, expr: &ast::Expression) -> Result<&TypeInfo> {
        self.types.require(expr)
    }

    /// What a name refers to.
    pub fn name(&self, name: &NameExpression) -> Result<&NameResolution> {
        NodeId::of(name)
            .and_then(|id| self.names.get(&id))
            .ok_or_else(|| Error::incomplete("name was never resolved", name.span()))
    }

    /// A declared type, resolved.
    pub fn declared_type(&self, data_type: &ast::DataType) -> Result<&ResolvedType> {
        NodeId::of(data_type)
            .and_then(|id| self.declared.get(&id))
            .ok_or_else(|| Error::incomplete("declared type was never resolved", data_type.span()))
    }

    /// What an exception name refers to.
    pub fn exception(&self, name: &ast::QualifiedName) -> Result<&ExceptionResolution> {
        NodeId::of(name)
            .and_then(|id| self.exceptions.get(&id))
            .ok_or_else(|| Error::incomplete("exception was never resolved", name.span()))
    }

    /// Problems that didn't stop inference, formatted with their locations.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// How a name is being used.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum NameUsage {
    /// Read as a value.
    Value,
    /// The target of a call statement, which may be a procedure with no
    /// argument list.
    CallStatement,
    /// Assigned to.
    Target,
}

/// Resolves `%TYPE` against local variables first, then the catalog.
struct ScopedTypeResolver<'s> {
    scopes: &'s ScopeStack,
    metadata: MetadataTypeResolver<'s>,
}

impl<'s> TypeNameResolver for ScopedTypeResolver<'s> {
    fn object_type(&self, parts: &[String]) -> Option<ObjectName> {
        self.metadata.object_type(parts)
    }

    fn anchored_type(&self, parts: &[String], rowtype: bool) -> Option<ResolvedType> {
        if let [name] = parts {
            if let Some(local) = self.scopes.get(name) {
                let pg_name = if rowtype {
                    "RECORD".to_owned()
                } else {
                    format!("{}%TYPE", name)
                };
                return Some(ResolvedType {
                    info: local.ty.clone(),
                    pg_name,
                });
            }
        }
        self.metadata.anchored_type(parts, rowtype)
    }

    fn local_type(&self, parts: &[String]) -> Option<ResolvedType> {
        match parts {
            [name] => self
                .scopes
                .get(name)
                .filter(|local| local.kind == LocalKind::RecordType)
                .map(|local| ResolvedType::from_info(local.ty.clone())),
            _ => None,
        }
    }
}

/// Our inference state for one routine.
pub struct Inferrer<'a> {
    schema: String,
    package: Option<String>,
    index: &'a MetadataIndex,
    sources: &'a dyn PackageSource,
    packages: &'a mut PackageContextCache,
    files: &'a mut KnownFiles,
    scopes: ScopeStack,
    /// Columns visible in each enclosing query, innermost last.
    queries: Vec<ColumnSet>,
    /// Common table expressions in scope, innermost last.
    ctes: Vec<(String, RecordType)>,
    next_exception: u32,
    results: InferenceResults,
}

impl<'a> Inferrer<'a> {
    /// Create an inferrer for a routine in `schema`, optionally belonging to
    /// `package`.
    pub fn new(
        schema: &str,
        package: Option<&str>,
        index: &'a MetadataIndex,
        sources: &'a dyn PackageSource,
        packages: &'a mut PackageContextCache,
        files: &'a mut KnownFiles,
    ) -> Self {
        Self {
            schema: schema.to_owned(),
            package: package.map(|p| p.to_owned()),
            index,
            sources,
            packages,
            files,
            scopes: ScopeStack::new(),
            queries: vec![],
            ctes: vec![],
            next_exception: FIRST_USER_EXCEPTION,
            results: InferenceResults::default(),
        }
    }

    /// Infer types for a routine with the given heading and body.
    #[instrument(level = "debug", skip_all, fields(routine = %heading.name.name()))]
    pub fn infer_routine(
        mut self,
        heading: &ast::RoutineHeading,
        body: &ast::Block,
    ) -> Result<InferenceResults> {
        debug!("starting type inference");
        self.with_frame(|cx| {
            cx.infer_parameters(heading)?;
            cx.infer_block_contents(body)
        })?;
        debug!(
            annotations = self.results.types.len(),
            names = self.results.names.len(),
            warnings = self.results.warnings.len(),
            "finished type inference"
        );
        Ok(self.results)
    }

    /// Infer types for a routine heading alone. Used for stubs, which have
    /// no body.
    #[instrument(level = "debug", skip_all, fields(routine = %heading.name.name()))]
    pub fn infer_heading(mut self, heading: &ast::RoutineHeading) -> Result<InferenceResults> {
        self.with_frame(|cx| cx.infer_parameters(heading))?;
        Ok(self.results)
    }

    /// Declare our parameters in the current frame, and resolve our return
    /// type.
    fn infer_parameters(&mut self, heading: &ast::RoutineHeading) -> Result<()> {
        for param in heading.params() {
            let ty = self.declare_type(&param.data_type)?;
            if let Some(default) = &param.default {
                default.value.infer_types(self)?;
            }
            self.scopes.add(
                &param.name,
                LocalKind::Parameter { mode: param.mode() },
                ty.info,
            )?;
        }
        if let Some(return_clause) = &heading.return_clause {
            self.declare_type(&return_clause.data_type)?;
        }
        Ok(())
    }

    fn with_frame<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.scopes.push();
        let result = f(self);
        self.scopes.pop();
        result
    }

    fn with_query<T>(
        &mut self,
        columns: ColumnSet,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.queries.push(columns);
        let result = f(self);
        self.queries.pop();
        result
    }

    fn in_sql(&self) -> bool {
        !self.queries.is_empty()
    }

    /// Record a non-fatal problem.
    fn warn(&mut self, spanned: &dyn Spanned, message: String) {
        let location = self
            .files
            .describe_span(spanned.span())
            .unwrap_or_else(|| "?".to_owned());
        warn!(%location, "{}", message);
        self.results.warnings.push(format!("{}: {}", location, message));
    }

    fn record(&mut self, node: &dyn Spanned, ty: TypeInfo) -> Result<TypeInfo> {
        self.results.types.record(node, ty.clone())?;
        Ok(ty)
    }

    /// Every expression under `node` gets `Unknown`. Used for constructs
    /// that code generation will reject anyway.
    fn annotate_opaque(&mut self, node: &impl derive_visitor::Drive) -> Result<()> {
        for span in expression_spans(node) {
            self.results.types.record(&span, TypeInfo::Unknown)?;
        }
        Ok(())
    }

    /// Resolve and record a declared type.
    fn declare_type(&mut self, data_type: &ast::DataType) -> Result<ResolvedType> {
        let resolver = ScopedTypeResolver {
            scopes: &self.scopes,
            metadata: MetadataTypeResolver {
                index: self.index,
                schema: &self.schema,
            },
        };
        let resolved = resolve_data_type(data_type, &resolver);
        if !resolved.info.is_known() {
            self.warn(
                data_type,
                format!("unknown type {}, passing it through", resolved.pg_name),
            );
        }
        if let Some(id) = NodeId::of(data_type) {
            self.results.declared.insert(id, resolved.clone());
        }
        Ok(resolved)
    }

    fn package_variable(
        &mut self,
        schema: &str,
        package: &str,
        name: &str,
    ) -> Result<Option<PackageVariable>> {
        let context = self
            .packages
            .get(schema, package, self.sources, self.index, self.files)?;
        Ok(context.and_then(|c| c.variable(name)).cloned())
    }

    /// Does `schema.package` declare a subprogram `name`, either in its
    /// source or in the catalog?
    fn package_has_subprogram(&mut self, schema: &str, package: &str, name: &str) -> Result<bool> {
        if !self.index.routines(schema, Some(package), name).is_empty() {
            return Ok(true);
        }
        let context = self
            .packages
            .get(schema, package, self.sources, self.index, self.files)?;
        Ok(context.map_or(false, |c| c.has_subprogram(name)))
    }

    fn package_exists(&mut self, schema: &str, package: &str) -> Result<bool> {
        if self.index.is_package(schema, package) {
            return Ok(true);
        }
        Ok(self
            .packages
            .get(schema, package, self.sources, self.index, self.files)?
            .is_some())
    }

    fn routine_result_type(&self, schema: &str, package: Option<&str>, name: &str) -> TypeInfo {
        self.index
            .routine(schema, package, name)
            .map(|r| r.result_type())
            .unwrap_or_default()
    }

    fn local(&self, name: &str) -> Option<LocalSymbol> {
        self.scopes.get(name).cloned()
    }

    /// Require that `cursor` names a local.
    fn require_local(&self, cursor: &Ident) -> Result<()> {
        match self.scopes.get(&cursor.canonical_name()) {
            Some(_) => Ok(()),
            None => Err(Error::unresolved(cursor.canonical_name(), cursor.span())),
        }
    }

    fn infer_block_contents(&mut self, block: &ast::Block) -> Result<()> {
        for decl in &block.declarations {
            decl.infer_types(self)?;
        }
        self.infer_statements(&block.statements)?;
        if let Some(section) = &block.exception_section {
            for handler in &section.handlers {
                for exception in &handler.exceptions {
                    self.resolve_exception(exception)?;
                }
                self.infer_statements(&handler.statements)?;
            }
        }
        Ok(())
    }

    fn infer_statements(&mut self, statements: &[ast::Statement]) -> Result<()> {
        for statement in statements {
            statement.infer_types(self)?;
        }
        Ok(())
    }

    fn resolve_exception(&mut self, name: &ast::QualifiedName) -> Result<()> {
        let parts = name.canonical_parts();
        let resolution = match parts.as_slice() {
            [only] if only == "others" => ExceptionResolution::Others,
            [only] => match self.scopes.get(only) {
                Some(LocalSymbol {
                    kind: LocalKind::Exception { sqlstate },
                    ..
                }) => ExceptionResolution::UserDefined {
                    sqlstate: sqlstate.clone(),
                },
                _ => match PREDEFINED_EXCEPTIONS.get(only.to_ascii_uppercase().as_str()) {
                    Some(pg_name) => ExceptionResolution::Predefined(pg_name),
                    None => ExceptionResolution::Passthrough(only.clone()),
                },
            },
            _ => ExceptionResolution::Passthrough(parts.join(".")),
        };
        trace!(exception = %parts.join("."), ?resolution, "resolved exception");
        if let Some(id) = NodeId::of(name) {
            self.results.exceptions.insert(id, resolution);
        }
        Ok(())
    }

    fn resolve_targets(&mut self, into: &ast::IntoClause) -> Result<()> {
        for target in &into.targets {
            self.resolve_name(target, NameUsage::Target)?;
        }
        Ok(())
    }

    /// The columns of a DML target table.
    fn table_columns(&self, table: &ast::TableReference, alias: Option<&Ident>) -> ColumnSet {
        let parts = table.name.canonical_parts();
        let qualifier = alias
            .map(|a| a.canonical_name())
            .unwrap_or_else(|| table.name.name());
        let table = self
            .index
            .resolve_table(&self.schema, &parts)
            .and_then(|name| self.index.table(&name));
        ColumnSet::from_table(&qualifier, table)
    }

    /// Resolve a name and record what it refers to. Returns its type.
    fn resolve_name(&mut self, name: &NameExpression, usage: NameUsage) -> Result<TypeInfo> {
        if name.has_inner_args() {
            return Err(Error::unsupported(
                "argument list inside a dotted name",
                name.span(),
            ));
        }
        let mut arg_types = vec![];
        if let Some(args) = name.call_args() {
            for arg in &args.args {
                arg_types.push(arg.value.infer_types(self)?);
            }
        }
        if let Some(over) = &name.over_clause {
            if let Some(partition_by) = &over.partition_by {
                for expr in &partition_by.expressions {
                    expr.infer_types(self)?;
                }
            }
            if let Some(order_by) = &over.order_by {
                for item in &order_by.items {
                    item.expression.infer_types(self)?;
                }
            }
        }
        let parts = name.canonical_parts();
        let (resolution, ty) = if let Some(attribute) = &name.attribute {
            self.resolve_cursor_attribute(name, &parts, attribute)?
        } else if let [only] = parts.as_slice() {
            self.resolve_unqualified(name, only, &arg_types, usage)?
        } else {
            self.resolve_qualified(name, &parts, usage)?
        };
        trace!(name = %parts.join("."), ?resolution, %ty, "resolved name");
        if let Some(id) = NodeId::of(name) {
            self.results.names.insert(id, resolution);
        }
        Ok(ty)
    }

    fn resolve_cursor_attribute(
        &mut self,
        name: &NameExpression,
        parts: &[String],
        attribute: &ast::CursorAttribute,
    ) -> Result<(NameResolution, TypeInfo)> {
        let kind = match attribute.attribute.canonical_name().as_str() {
            "found" => CursorAttributeKind::Found,
            "notfound" => CursorAttributeKind::NotFound,
            "isopen" => CursorAttributeKind::IsOpen,
            "rowcount" => CursorAttributeKind::RowCount,
            other => {
                return Err(Error::unsupported(
                    format!("cursor attribute %{}", other.to_ascii_uppercase()),
                    attribute.span(),
                ))
            }
        };
        let cursor = match parts {
            [sql] if sql == "sql" => None,
            [cursor] if self.scopes.get(cursor).is_some() => Some(cursor.clone()),
            _ => return Err(Error::unresolved(parts.join("."), name.span())),
        };
        let ty = match kind {
            CursorAttributeKind::RowCount => TypeInfo::Scalar(ScalarKind::Integer),
            _ => TypeInfo::BOOLEAN,
        };
        Ok((
            NameResolution::CursorAttribute {
                cursor,
                attribute: kind,
            },
            ty,
        ))
    }

    fn resolve_unqualified(
        &mut self,
        name: &NameExpression,
        ident: &str,
        arg_types: &[TypeInfo],
        usage: NameUsage,
    ) -> Result<(NameResolution, TypeInfo)> {
        let has_args = name.call_args().is_some();
        let is_call = has_args || usage == NameUsage::CallStatement;

        // Locals always win.
        if let Some(local) = self.local(ident) {
            if has_args && !local.is_cursor() {
                return Err(Error::unsupported(
                    format!("element access on {}", ident),
                    name.span(),
                ));
            }
            return Ok((
                NameResolution::Local {
                    name: ident.to_owned(),
                },
                local.ty,
            ));
        }

        // Then our own package's variables.
        if !has_args {
            if let Some(package) = self.package.clone() {
                let schema = self.schema.clone();
                if let Some(var) = self.package_variable(&schema, &package, ident)? {
                    return Ok((
                        NameResolution::ModuleVariable {
                            schema,
                            package,
                            variable: var.name,
                            constant: var.constant,
                        },
                        var.ty,
                    ));
                }
            }
        }

        // Then columns of enclosing queries.
        let mut opaque = false;
        if !has_args && usage != NameUsage::Target {
            for columns in self.queries.iter().rev() {
                match columns.get(None, ident, name)? {
                    ColumnLookup::Found(ty) => {
                        return Ok((
                            NameResolution::Column {
                                qualifier: None,
                                column: ident.to_owned(),
                            },
                            ty.clone(),
                        ))
                    }
                    ColumnLookup::Opaque => opaque = true,
                    ColumnLookup::Missing => {}
                }
            }
        }

        // Then built-ins.
        if let Some(ty) = self.builtin_type(name, ident, arg_types)? {
            return Ok((
                NameResolution::Builtin {
                    name: ident.to_owned(),
                },
                ty,
            ));
        }

        // Then routines.
        if let Some(package) = self.package.clone() {
            let schema = self.schema.clone();
            if self.package_has_subprogram(&schema, &package, ident)? {
                let ty = self.routine_result_type(&schema, Some(package.as_str()), ident);
                return Ok((
                    NameResolution::PackageFunction {
                        schema,
                        package,
                        function: ident.to_owned(),
                    },
                    ty,
                ));
            }
        }
        if self.index.routine(&self.schema, None, ident).is_some() {
            let ty = self.routine_result_type(&self.schema, None, ident);
            return Ok((
                NameResolution::StandaloneRoutine {
                    schema: self.schema.clone(),
                    name: ident.to_owned(),
                },
                ty,
            ));
        }

        // Nothing we know about.
        if (opaque || self.in_sql()) && !has_args && usage != NameUsage::Target {
            return Ok((
                NameResolution::Column {
                    qualifier: None,
                    column: ident.to_owned(),
                },
                TypeInfo::Unknown,
            ));
        }
        if is_call {
            self.warn(
                name,
                format!("routine {}.{} is not in the catalog", self.schema, ident),
            );
            return Ok((
                NameResolution::StandaloneRoutine {
                    schema: self.schema.clone(),
                    name: ident.to_owned(),
                },
                TypeInfo::Unknown,
            ));
        }
        Err(Error::unresolved(ident, name.span()))
    }

    /// The type of a built-in function call, or `None` if `ident` isn't a
    /// built-in usable this way.
    fn builtin_type(
        &mut self,
        name: &NameExpression,
        ident: &str,
        arg_types: &[TypeInfo],
    ) -> Result<Option<TypeInfo>> {
        let has_args = name.call_args().is_some();
        if has_args && ident == "raise_application_error" {
            return Ok(Some(TypeInfo::Null));
        }
        if has_args && ident == "decode" {
            return Ok(Some(self.decode_type(name, arg_types)));
        }
        let Some(function) = built_in_function(ident) else {
            return Ok(None);
        };
        match function.return_type_for(arg_types, name)? {
            Some(ty) => Ok(Some(ty)),
            // A bare name like `upper` isn't a call to `UPPER`.
            None if !has_args => Ok(None),
            None => {
                let types = arg_types
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                self.warn(
                    name,
                    format!(
                        "no signature of {} accepts ({})",
                        ident.to_ascii_uppercase(),
                        types
                    ),
                );
                Ok(Some(TypeInfo::Unknown))
            }
        }
    }

    /// `DECODE(x, search, result, ..., [default])` has the common type of
    /// its results.
    fn decode_type(&mut self, name: &NameExpression, arg_types: &[TypeInfo]) -> TypeInfo {
        let mut results = arg_types.iter().skip(2).step_by(2).collect::<Vec<_>>();
        if arg_types.len() > 3 && arg_types.len() % 2 == 0 {
            results.extend(arg_types.last());
        }
        let common = results
            .into_iter()
            .try_fold(TypeInfo::Null, |acc, ty| acc.common_supertype(ty));
        match common {
            Some(ty) => ty,
            None => {
                self.warn(name, "DECODE results have incompatible types".to_owned());
                TypeInfo::Unknown
            }
        }
    }

    /// The type reached by following `fields` from `ty`.
    fn field_type(&mut self, name: &NameExpression, ty: &TypeInfo, fields: &[String]) -> TypeInfo {
        let mut current = ty.clone();
        for field in fields {
            current = match &current {
                TypeInfo::Record(record) => record.field(field).cloned(),
                TypeInfo::Composite { schema, name } => self
                    .index
                    .object_type(&ObjectName::new(schema.clone(), name.clone()))
                    .and_then(|t| t.field(field))
                    .map(|c| c.ty.clone()),
                _ => Some(TypeInfo::Unknown),
            }
            .unwrap_or_else(|| {
                self.warn(name, format!("unknown field {}", field));
                TypeInfo::Unknown
            });
        }
        current
    }

    fn resolve_qualified(
        &mut self,
        name: &NameExpression,
        parts: &[String],
        usage: NameUsage,
    ) -> Result<(NameResolution, TypeInfo)> {
        let has_args = name.call_args().is_some();
        let is_call = has_args || usage == NameUsage::CallStatement;

        if let [package, procedure] = parts {
            if package == "dbms_output" && procedure == "put_line" {
                return Ok((
                    NameResolution::Builtin {
                        name: "dbms_output.put_line".to_owned(),
                    },
                    TypeInfo::Null,
                ));
            }
        }

        // 1. A local record or object.
        if let Some(local) = self.local(&parts[0]) {
            if let (TypeInfo::Composite { schema, name: type_name }, [_, method]) =
                (&local.ty, parts)
            {
                let object = self
                    .index
                    .object_type(&ObjectName::new(schema.clone(), type_name.clone()));
                if object.map_or(false, |t| t.has_method(method)) {
                    return Ok((
                        NameResolution::TypeMethod {
                            schema: schema.clone(),
                            type_name: type_name.clone(),
                            method: method.clone(),
                            receiver: local.name.clone(),
                        },
                        TypeInfo::Unknown,
                    ));
                }
            }
            let ty = self.field_type(name, &local.ty, &parts[1..]);
            let variable = local.name;
            let fields = parts[1..].to_vec();
            let resolution = match &local.ty {
                TypeInfo::Record(record) if record.jsonb => {
                    NameResolution::JsonbField { variable, fields }
                }
                _ => NameResolution::LocalField { variable, fields },
            };
            return Ok((resolution, ty));
        }

        // 2. A column of an enclosing query.
        if let [qualifier, column] = parts {
            let mut found = None;
            for columns in self.queries.iter().rev() {
                if columns.has_qualifier(qualifier) {
                    found = Some(match columns.get(Some(qualifier.as_str()), column, name)? {
                        ColumnLookup::Found(ty) => Some(ty.clone()),
                        ColumnLookup::Opaque => Some(TypeInfo::Unknown),
                        ColumnLookup::Missing => None,
                    });
                    break;
                }
            }
            match found {
                Some(Some(ty)) => {
                    return Ok((
                        NameResolution::Column {
                            qualifier: Some(qualifier.clone()),
                            column: column.clone(),
                        },
                        ty,
                    ))
                }
                Some(None) => return Err(Error::unresolved(parts.join("."), name.span())),
                None => {}
            }
        }

        // 3. Package members, static type methods and sequences.
        let (explicit_schema, target, member) = match parts {
            [target, member] => (None, target, member),
            [schema, target, member] => (Some(schema), target, member),
            _ => {
                return Err(Error::unsupported(
                    format!("name with {} parts", parts.len()),
                    name.span(),
                ))
            }
        };
        let object = match explicit_schema {
            Some(schema) => ObjectName::new(schema.clone(), target.clone()),
            None => {
                // Objects in our own schema hide synonyms of the same name.
                let own = ObjectName::new(self.schema.clone(), target.clone());
                if self.package_exists(&own.schema, &own.name)?
                    || self.index.object_type(&own).is_some()
                {
                    own
                } else {
                    self.index.resolve_synonym(&self.schema, target).unwrap_or(own)
                }
            }
        };

        let mut candidates = vec![];
        if !has_args {
            if let Some(var) = self.package_variable(&object.schema, &object.name, member)? {
                candidates.push((
                    NameResolution::ModuleVariable {
                        schema: object.schema.clone(),
                        package: object.name.clone(),
                        variable: var.name,
                        constant: var.constant,
                    },
                    var.ty,
                ));
            }
        }
        if self
            .index
            .object_type(&object)
            .map_or(false, |t| t.has_method(member))
        {
            candidates.push((
                NameResolution::StaticTypeMethod {
                    schema: object.schema.clone(),
                    type_name: object.name.clone(),
                    method: member.clone(),
                },
                TypeInfo::Unknown,
            ));
        }
        if self.package_has_subprogram(&object.schema, &object.name, member)? {
            candidates.push((
                NameResolution::PackageFunction {
                    schema: object.schema.clone(),
                    package: object.name.clone(),
                    function: member.clone(),
                },
                self.routine_result_type(&object.schema, Some(object.name.as_str()), member),
            ));
        }
        if candidates.len() > 1 {
            return Err(Error::unresolved(
                format!("{} (ambiguous)", parts.join(".")),
                name.span(),
            ));
        }
        if let Some(candidate) = candidates.pop() {
            return Ok(candidate);
        }

        let sequence_op = match member.as_str() {
            "nextval" => Some(SequenceOp::NextVal),
            "currval" => Some(SequenceOp::CurrVal),
            _ => None,
        };
        if let Some(op) = sequence_op {
            if !self.index.has_sequence(&object) {
                self.warn(name, format!("sequence {} is not in the catalog", object));
            }
            return Ok((
                NameResolution::Sequence {
                    schema: object.schema,
                    name: object.name,
                    op,
                },
                TypeInfo::Scalar(ScalarKind::Integer),
            ));
        }

        if is_call {
            if explicit_schema.is_none()
                && self.index.is_schema(target)
                && !self.package_exists(&object.schema, &object.name)?
            {
                let ty = self.routine_result_type(target, None, member);
                return Ok((
                    NameResolution::StandaloneRoutine {
                        schema: target.clone(),
                        name: member.clone(),
                    },
                    ty,
                ));
            }
            self.warn(
                name,
                format!("{}.{} is not in the catalog", object, member),
            );
            return Ok((
                NameResolution::PackageFunction {
                    schema: object.schema,
                    package: object.name,
                    function: member.clone(),
                },
                TypeInfo::Unknown,
            ));
        }
        Err(Error::unresolved(parts.join("."), name.span()))
    }
}

/// Types which support inference.
pub trait InferTypes {
    /// The type of AST node itself, if it has one.
    type Type;

    /// Infer types for this node and everything below it.
    fn infer_types(&self, cx: &mut Inferrer<'_>) -> Result<Self::Type>;
}

impl InferTypes for ast::Block {
    type Type = ();

    fn infer_types(&self, cx: &mut Inferrer<'_>) -> Result<()> {
        cx.with_frame(|cx| cx.infer_block_contents(self))
    }
}

impl InferTypes for ast::Declaration {
    type Type = ();

    fn infer_types(&self, cx: &mut Inferrer<'_>) -> Result<()> {
        match self {
            ast::Declaration::Variable(decl) => {
                let ty = cx.declare_type(&decl.data_type)?;
                if let Some(default) = &decl.default {
                    default.value.infer_types(cx)?;
                }
                cx.scopes.add(
                    &decl.name,
                    LocalKind::Variable {
                        constant: decl.constant_token.is_some(),
                    },
                    ty.info,
                )
            }
            ast::Declaration::Cursor(decl) => {
                let ty = cx.with_frame(|cx| {
                    if let Some(params) = &decl.params {
                        for param in &params.params {
                            let ty = cx.declare_type(&param.data_type)?;
                            if let Some(default) = &param.default {
                                default.value.infer_types(cx)?;
                            }
                            cx.scopes.add(
                                &param.name,
                                LocalKind::Parameter { mode: param.mode() },
                                ty.info,
                            )?;
                        }
                    }
                    let declared = match &decl.return_clause {
                        Some(clause) => Some(cx.declare_type(&clause.data_type)?.info),
                        None => None,
                    };
                    match &decl.query {
                        Some(query) => Ok(TypeInfo::Record(query.query.infer_types(cx)?)),
                        None => Ok(declared.unwrap_or_default()),
                    }
                })?;
                cx.scopes.add(&decl.name, LocalKind::Cursor, ty)
            }
            ast::Declaration::Exception(decl) => {
                let sqlstate = format!("P{}", cx.next_exception);
                cx.next_exception += 1;
                cx.scopes.add(
                    &decl.name,
                    LocalKind::Exception { sqlstate },
                    TypeInfo::Unknown,
                )
            }
            ast::Declaration::Pragma(pragma) => {
                cx.annotate_opaque(pragma)?;
                if pragma.name.is("EXCEPTION_INIT") {
                    bind_exception_init(pragma, cx)?;
                }
                Ok(())
            }
            ast::Declaration::Type(decl) => match &decl.definition {
                ast::TypeDefinition::Record(definition) => {
                    let mut fields = vec![];
                    for field in &definition.fields {
                        let ty = cx.declare_type(&field.data_type)?;
                        if let Some(default) = &field.default {
                            default.value.infer_types(cx)?;
                        }
                        fields.push(RecordField {
                            name: field.name.canonical_name(),
                            ty: ty.info,
                        });
                    }
                    let record = RecordType {
                        table: None,
                        fields,
                        jsonb: true,
                    };
                    cx.scopes
                        .add(&decl.name, LocalKind::RecordType, TypeInfo::Record(record))
                }
                ast::TypeDefinition::Other(_) => Ok(()),
            },
            ast::Declaration::Subprogram(decl) => cx.annotate_opaque(decl),
        }
    }
}

/// `PRAGMA EXCEPTION_INIT(e, -20NNN)` binds `e` to SQLSTATE `P0NNN`.
fn bind_exception_init(pragma: &ast::PragmaDeclaration, cx: &mut Inferrer<'_>) -> Result<()> {
    let args = pragma
        .args
        .as_ref()
        .map(|a| a.args.as_slice())
        .unwrap_or_default();
    let (exception, code) = match args {
        [exception, code] => (&exception.value, &code.value),
        _ => {
            return Err(Error::annotated(
                "EXCEPTION_INIT takes an exception and an error code",
                pragma.span(),
                "wrong number of arguments",
            ))
        }
    };
    let exception = match exception {
        ast::Expression::Name(name) => name.as_simple(),
        _ => None,
    }
    .ok_or_else(|| Error::unresolved("exception name", exception.span()))?;
    let code = code
        .as_integer_literal()
        .filter(|c| (-20999..=-20000).contains(c))
        .ok_or_else(|| {
            Error::unsupported("EXCEPTION_INIT with a non-user error code", code.span())
        })?;
    let sqlstate = format!("P0{:03}", -code - 20000);
    if !cx.scopes.bind_exception(&exception.canonical_name(), sqlstate) {
        return Err(Error::unresolved(exception.canonical_name(), exception.span()));
    }
    Ok(())
}

impl InferTypes for ast::Statement {
    type Type = ();

    fn infer_types(&self, cx: &mut Inferrer<'_>) -> Result<()> {
        match self {
            ast::Statement::Label(_)
            | ast::Statement::Null(_)
            | ast::Statement::Transaction(_)
            | ast::Statement::Goto(_) => Ok(()),
            ast::Statement::Assignment(stmt) => {
                cx.resolve_name(&stmt.target, NameUsage::Target)?;
                stmt.value.infer_types(cx)?;
                Ok(())
            }
            ast::Statement::If(stmt) => {
                stmt.condition.infer_types(cx)?;
                cx.infer_statements(&stmt.statements)?;
                for elsif in &stmt.elsif_clauses {
                    elsif.condition.infer_types(cx)?;
                    cx.infer_statements(&elsif.statements)?;
                }
                if let Some(else_clause) = &stmt.else_clause {
                    cx.infer_statements(&else_clause.statements)?;
                }
                Ok(())
            }
            ast::Statement::Case(stmt) => {
                if let Some(operand) = &stmt.operand {
                    operand.infer_types(cx)?;
                }
                for when in &stmt.when_clauses {
                    when.condition.infer_types(cx)?;
                    cx.infer_statements(&when.statements)?;
                }
                if let Some(else_clause) = &stmt.else_clause {
                    cx.infer_statements(&else_clause.statements)?;
                }
                Ok(())
            }
            ast::Statement::Loop(stmt) => cx.infer_statements(&stmt.body.statements),
            ast::Statement::While(stmt) => {
                stmt.condition.infer_types(cx)?;
                cx.infer_statements(&stmt.body.statements)
            }
            ast::Statement::ForRange(stmt) => {
                stmt.lower.infer_types(cx)?;
                stmt.upper.infer_types(cx)?;
                cx.with_frame(|cx| {
                    cx.scopes.add(
                        &stmt.index,
                        LocalKind::LoopIndex,
                        TypeInfo::Scalar(ScalarKind::Integer),
                    )?;
                    cx.infer_statements(&stmt.body.statements)
                })
            }
            ast::Statement::ForCursor(stmt) => {
                let ty = match &stmt.source {
                    ast::CursorSource::Query(query) => {
                        TypeInfo::Record(query.query.infer_types(cx)?)
                    }
                    ast::CursorSource::Named(name) => cx.resolve_name(name, NameUsage::Value)?,
                };
                cx.with_frame(|cx| {
                    cx.scopes.add(&stmt.record, LocalKind::Record, ty)?;
                    cx.infer_statements(&stmt.body.statements)
                })
            }
            ast::Statement::Exit(stmt) => {
                if let Some(when) = &stmt.when_clause {
                    when.condition.infer_types(cx)?;
                }
                Ok(())
            }
            ast::Statement::Return(stmt) => {
                if let Some(value) = &stmt.value {
                    value.infer_types(cx)?;
                }
                Ok(())
            }
            ast::Statement::Raise(stmt) => {
                if let Some(exception) = &stmt.exception {
                    cx.resolve_exception(exception)?;
                }
                Ok(())
            }
            ast::Statement::Call(stmt) => {
                cx.resolve_name(&stmt.target, NameUsage::CallStatement)?;
                if let Some(into) = &stmt.into_clause {
                    cx.resolve_targets(into)?;
                }
                Ok(())
            }
            ast::Statement::Select(stmt) => {
                stmt.query.infer_types(cx)?;
                Ok(())
            }
            ast::Statement::Insert(stmt) => {
                match &stmt.source {
                    ast::InsertSource::Values(values) => {
                        for value in &values.values {
                            value.infer_types(cx)?;
                        }
                    }
                    ast::InsertSource::Query(query) => {
                        query.infer_types(cx)?;
                    }
                }
                let columns = cx.table_columns(&stmt.table, None);
                infer_returning(stmt.returning.as_ref(), columns, cx)
            }
            ast::Statement::Update(stmt) => {
                let columns = cx.table_columns(&stmt.table, stmt.alias.as_ref());
                cx.with_query(columns.clone(), |cx| {
                    for assignment in &stmt.assignments {
                        assignment.value.infer_types(cx)?;
                    }
                    infer_dml_where(stmt.where_clause.as_ref(), cx)
                })?;
                infer_returning(stmt.returning.as_ref(), columns, cx)
            }
            ast::Statement::Delete(stmt) => {
                let columns = cx.table_columns(&stmt.table, stmt.alias.as_ref());
                cx.with_query(columns.clone(), |cx| {
                    infer_dml_where(stmt.where_clause.as_ref(), cx)
                })?;
                infer_returning(stmt.returning.as_ref(), columns, cx)
            }
            ast::Statement::Open(stmt) => {
                cx.require_local(&stmt.cursor)?;
                if let Some(args) = &stmt.args {
                    for arg in &args.args {
                        arg.value.infer_types(cx)?;
                    }
                }
                if let Some(for_clause) = &stmt.for_clause {
                    match &for_clause.source {
                        ast::OpenForSource::Query(query) => {
                            query.infer_types(cx)?;
                        }
                        ast::OpenForSource::Dynamic(expr) => {
                            expr.infer_types(cx)?;
                        }
                    }
                    if let Some(using) = &for_clause.using_clause {
                        infer_using(using, cx)?;
                    }
                }
                Ok(())
            }
            ast::Statement::Fetch(stmt) => {
                cx.require_local(&stmt.cursor)?;
                cx.resolve_targets(&stmt.into_clause)?;
                if let Some(limit) = &stmt.limit {
                    limit.value.infer_types(cx)?;
                }
                Ok(())
            }
            ast::Statement::Close(stmt) => cx.require_local(&stmt.cursor),
            ast::Statement::ExecuteImmediate(stmt) => {
                stmt.sql.infer_types(cx)?;
                if let Some(into) = &stmt.into_clause {
                    cx.resolve_targets(into)?;
                }
                if let Some(using) = &stmt.using_clause {
                    infer_using(using, cx)?;
                }
                Ok(())
            }
            ast::Statement::Block(block) => block.infer_types(cx),
            ast::Statement::Forall(stmt) => cx.annotate_opaque(stmt),
            ast::Statement::PipeRow(stmt) => cx.annotate_opaque(stmt),
        }
    }
}

fn infer_dml_where(where_clause: Option<&ast::DmlWhereClause>, cx: &mut Inferrer<'_>) -> Result<()> {
    match where_clause {
        Some(ast::DmlWhereClause::Condition(clause)) => {
            clause.condition.infer_types(cx)?;
            Ok(())
        }
        Some(ast::DmlWhereClause::CurrentOf(clause)) => cx.require_local(&clause.cursor),
        None => Ok(()),
    }
}

fn infer_returning(
    returning: Option<&ast::ReturningClause>,
    columns: ColumnSet,
    cx: &mut Inferrer<'_>,
) -> Result<()> {
    let Some(returning) = returning else {
        return Ok(());
    };
    cx.with_query(columns, |cx| {
        for expr in &returning.expressions {
            expr.infer_types(cx)?;
        }
        Ok(())
    })?;
    cx.resolve_targets(&returning.into_clause)
}

fn infer_using(using: &ast::UsingClause, cx: &mut Inferrer<'_>) -> Result<()> {
    for arg in &using.args {
        arg.value.infer_types(cx)?;
    }
    Ok(())
}

impl InferTypes for ast::Expression {
    type Type = TypeInfo;

    fn infer_types(&self, cx: &mut Inferrer<'_>) -> Result<TypeInfo> {
        let ty = match self {
            ast::Expression::Literal(literal) => match &literal.value {
                LiteralValue::Integer(_) => TypeInfo::Scalar(ScalarKind::Integer),
                LiteralValue::Number(_) => TypeInfo::NUMERIC,
                LiteralValue::String(_) => TypeInfo::TEXT,
            },
            ast::Expression::Bool(_) => TypeInfo::BOOLEAN,
            ast::Expression::Null(_) => TypeInfo::Null,
            ast::Expression::Name(name) => cx.resolve_name(name, NameUsage::Value)?,
            ast::Expression::Unary(unary) => {
                let operand = unary.operand.infer_types(cx)?;
                match unary.op {
                    ast::UnaryOp::Not => TypeInfo::BOOLEAN,
                    ast::UnaryOp::Neg | ast::UnaryOp::Plus
                        if operand.is_numeric()
                            || !operand.is_known()
                            || operand.scalar() == Some(ScalarKind::Interval) =>
                    {
                        operand
                    }
                    ast::UnaryOp::Neg | ast::UnaryOp::Plus => {
                        cx.warn(self, format!("cannot negate a value of type {}", operand));
                        TypeInfo::Unknown
                    }
                }
            }
            ast::Expression::Binary(binary) => {
                let left = binary.left.infer_types(cx)?;
                let right = binary.right.infer_types(cx)?;
                match arithmetic_op(binary.op) {
                    None => TypeInfo::BOOLEAN,
                    Some(op) => match arithmetic_result(op, &left, &right) {
                        Some(ty) => ty,
                        None => {
                            cx.warn(
                                self,
                                format!("incompatible operand types {} and {}", left, right),
                            );
                            TypeInfo::Unknown
                        }
                    },
                }
            }
            ast::Expression::IsNull(expr) => {
                expr.operand.infer_types(cx)?;
                TypeInfo::BOOLEAN
            }
            ast::Expression::Like(expr) => {
                expr.operand.infer_types(cx)?;
                expr.pattern.infer_types(cx)?;
                if let Some(escape) = &expr.escape {
                    escape.value.infer_types(cx)?;
                }
                TypeInfo::BOOLEAN
            }
            ast::Expression::Between(expr) => {
                expr.operand.infer_types(cx)?;
                expr.low.infer_types(cx)?;
                expr.high.infer_types(cx)?;
                TypeInfo::BOOLEAN
            }
            ast::Expression::In(expr) => {
                expr.operand.infer_types(cx)?;
                match &expr.list {
                    ast::InList::Query(query) => {
                        query.infer_types(cx)?;
                    }
                    ast::InList::Values(values) => {
                        for value in values {
                            value.infer_types(cx)?;
                        }
                    }
                }
                TypeInfo::BOOLEAN
            }
            ast::Expression::Exists(expr) => {
                expr.query.query.infer_types(cx)?;
                TypeInfo::BOOLEAN
            }
            ast::Expression::Case(case) => {
                if let Some(operand) = &case.operand {
                    operand.infer_types(cx)?;
                }
                let mut result = Some(TypeInfo::Null);
                for when in &case.when_clauses {
                    when.condition.infer_types(cx)?;
                    let ty = when.result.infer_types(cx)?;
                    result = result.and_then(|r| r.common_supertype(&ty));
                }
                if let Some(else_clause) = &case.else_clause {
                    let ty = else_clause.result.infer_types(cx)?;
                    result = result.and_then(|r| r.common_supertype(&ty));
                }
                result.unwrap_or_else(|| {
                    cx.warn(self, "CASE branches have incompatible types".to_owned());
                    TypeInfo::Unknown
                })
            }
            ast::Expression::Parens(parens) => parens.expression.infer_types(cx)?,
            ast::Expression::Subquery(subquery) => {
                let record = subquery.query.infer_types(cx)?;
                match record.fields.as_slice() {
                    [only] => only.ty.clone(),
                    _ => TypeInfo::Unknown,
                }
            }
            ast::Expression::Cast(cast) => {
                cast.value.infer_types(cx)?;
                cx.declare_type(&cast.data_type)?.info
            }
            ast::Expression::Extract(extract) => {
                extract.value.infer_types(cx)?;
                TypeInfo::NUMERIC
            }
            ast::Expression::DateLiteral(literal) => {
                if literal.keyword.is("TIMESTAMP") {
                    TypeInfo::Scalar(ScalarKind::Timestamp)
                } else {
                    TypeInfo::Scalar(ScalarKind::Date)
                }
            }
            ast::Expression::IntervalLiteral(_) => TypeInfo::Scalar(ScalarKind::Interval),
            ast::Expression::BindVariable(_) | ast::Expression::Star(_) => TypeInfo::Unknown,
        };
        cx.record(self, ty)
    }
}

/// Map a binary operator to an arithmetic operator. Comparisons and logical
/// operators return `None`, since they always produce `BOOLEAN`.
fn arithmetic_op(op: ast::BinaryOp) -> Option<ArithmeticOp> {
    Some(match op {
        ast::BinaryOp::Add => ArithmeticOp::Add,
        ast::BinaryOp::Sub => ArithmeticOp::Sub,
        ast::BinaryOp::Mul => ArithmeticOp::Mul,
        ast::BinaryOp::Div => ArithmeticOp::Div,
        ast::BinaryOp::Pow => ArithmeticOp::Pow,
        ast::BinaryOp::Concat => ArithmeticOp::Concat,
        ast::BinaryOp::Or
        | ast::BinaryOp::And
        | ast::BinaryOp::Eq
        | ast::BinaryOp::NotEq
        | ast::BinaryOp::Lt
        | ast::BinaryOp::LtEq
        | ast::BinaryOp::Gt
        | ast::BinaryOp::GtEq => return None,
    })
}

impl InferTypes for ast::QueryExpression {
    type Type = RecordType;

    fn infer_types(&self, cx: &mut Inferrer<'_>) -> Result<RecordType> {
        match self {
            ast::QueryExpression::Select(select) => select.infer_types(cx),
            ast::QueryExpression::Nested(nested) => nested.query.infer_types(cx),
            ast::QueryExpression::SetOperation(set_operation) => {
                let left = set_operation.left.infer_types(cx)?;
                let right = set_operation.right.infer_types(cx)?;
                let fields = left
                    .fields
                    .iter()
                    .enumerate()
                    .map(|(i, field)| {
                        let ty = right
                            .fields
                            .get(i)
                            .and_then(|r| field.ty.common_supertype(&r.ty))
                            .unwrap_or_default();
                        RecordField {
                            name: field.name.clone(),
                            ty,
                        }
                    })
                    .collect();
                Ok(RecordType {
                    table: None,
                    fields,
                    jsonb: false,
                })
            }
            ast::QueryExpression::With(with) => {
                let depth = cx.ctes.len();
                let result = infer_with_query(with, cx);
                cx.ctes.truncate(depth);
                result
            }
        }
    }
}

/// CTEs are visible to later CTEs and to the main query.
fn infer_with_query(with: &ast::WithQuery, cx: &mut Inferrer<'_>) -> Result<RecordType> {
    for cte in &with.ctes {
        let record = cte.query.query.infer_types(cx)?;
        cx.ctes.push((cte.name.canonical_name(), record));
    }
    with.query.infer_types(cx)
}

impl InferTypes for ast::SelectExpression {
    type Type = RecordType;

    fn infer_types(&self, cx: &mut Inferrer<'_>) -> Result<RecordType> {
        // `INTO` targets are procedural variables, never columns.
        if let Some(into) = &self.into_clause {
            cx.resolve_targets(into)?;
        }
        let columns = match &self.from_clause {
            Some(from) => from.infer_types(cx)?,
            None => ColumnSet::empty(),
        };
        cx.with_query(columns, |cx| {
            let mut fields = vec![];
            for (i, item) in self.select_list.iter().enumerate() {
                match item {
                    ast::SelectListItem::Star(_) => {
                        let record = cx.queries.last().map(|c| c.to_record(None));
                        fields.extend(record.into_iter().flat_map(|r| r.fields));
                    }
                    ast::SelectListItem::TableStar(star) => {
                        let qualifier = star.table.name();
                        let record = cx.queries.last().map(|c| c.to_record(Some(&qualifier)));
                        fields.extend(record.into_iter().flat_map(|r| r.fields));
                    }
                    ast::SelectListItem::Expression(item) => {
                        let ty = item.expression.infer_types(cx)?;
                        let name = item
                            .alias
                            .as_ref()
                            .map(|a| a.name.canonical_name())
                            .or_else(|| column_name(&item.expression))
                            .unwrap_or_else(|| format!("column{}", i + 1));
                        fields.push(RecordField { name, ty });
                    }
                }
            }
            if let Some(where_clause) = &self.where_clause {
                where_clause.condition.infer_types(cx)?;
            }
            if let Some(group_by) = &self.group_by {
                for expr in &group_by.expressions {
                    expr.infer_types(cx)?;
                }
            }
            if let Some(having) = &self.having {
                having.condition.infer_types(cx)?;
            }
            if let Some(order_by) = &self.order_by {
                for item in &order_by.items {
                    item.expression.infer_types(cx)?;
                }
            }
            Ok(RecordType {
                table: None,
                fields,
                jsonb: false,
            })
        })
    }
}

/// The implicit column name of a select list expression.
fn column_name(expr: &ast::Expression) -> Option<String> {
    match expr {
        ast::Expression::Name(name) if name.call_args().is_none() => {
            name.parts.last().map(|p| p.ident.canonical_name())
        }
        _ => None,
    }
}

impl InferTypes for ast::FromClause {
    type Type = ColumnSet;

    fn infer_types(&self, cx: &mut Inferrer<'_>) -> Result<ColumnSet> {
        let mut columns = ColumnSet::empty();
        for item in &self.items {
            let item_columns = item.infer_types(cx)?;
            columns = columns.join(&item_columns);
        }
        Ok(columns)
    }
}

impl InferTypes for ast::FromItem {
    type Type = ColumnSet;

    fn infer_types(&self, cx: &mut Inferrer<'_>) -> Result<ColumnSet> {
        match self {
            ast::FromItem::Table(item) => {
                let parts = item.table.name.canonical_parts();
                let qualifier = item
                    .alias
                    .as_ref()
                    .map(|a| a.canonical_name())
                    .unwrap_or_else(|| item.table.name.name());
                if let [name] = parts.as_slice() {
                    let cte = cx.ctes.iter().rev().find(|(n, _)| n == name);
                    if let Some((_, record)) = cte {
                        return Ok(ColumnSet::from_record(Some(&qualifier), record));
                    }
                }
                if item.table.dblink.is_some() {
                    return Ok(ColumnSet::from_table(&qualifier, None));
                }
                let table = cx
                    .index
                    .resolve_table(&cx.schema, &parts)
                    .and_then(|name| cx.index.table(&name));
                if table.is_none() && !item.table.name.name().eq("dual") {
                    cx.warn(
                        &item.table,
                        format!("table {} is not in the catalog", parts.join(".")),
                    );
                }
                Ok(ColumnSet::from_table(&qualifier, table))
            }
            ast::FromItem::Subquery(item) => {
                let record = item.query.query.infer_types(cx)?;
                let alias = item.alias.as_ref().map(|a| a.canonical_name());
                Ok(ColumnSet::from_record(alias.as_deref(), &record))
            }
            ast::FromItem::Join(join) => {
                let left = join.left.infer_types(cx)?;
                let right = join.right.infer_types(cx)?;
                match &join.condition {
                    None => Ok(left.join(&right)),
                    Some(ast::JoinCondition::Using(using)) => {
                        left.join_using(&right, &using.columns.columns)
                    }
                    Some(ast::JoinCondition::On(on)) => {
                        let joined = left.join(&right);
                        cx.with_query(joined.clone(), |cx| on.condition.infer_types(cx))?;
                        Ok(joined)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        ast::{parse_plsql, SourceUnit},
        errors::FailureKind,
        metadata::tests::test_index,
        package_context::tests::test_sources,
    };

    /// Parse a standalone routine and infer its types.
    pub(crate) fn infer_source(source: &str) -> (ast::RoutineDefinition, Result<InferenceResults>) {
        infer_in_package(source, None)
    }

    pub(crate) fn infer_in_package(
        source: &str,
        package: Option<&str>,
    ) -> (ast::RoutineDefinition, Result<InferenceResults>) {
        let mut files = KnownFiles::new();
        let file_id = files.add_string("test.sql", source);
        let file = parse_plsql(&files, file_id).unwrap();
        let routine = match file.units.into_iter().next().unwrap() {
            SourceUnit::Routine(routine) => routine,
            _ => panic!("expected a routine"),
        };
        let index = test_index();
        let sources = test_sources();
        let mut cache = PackageContextCache::new();
        let results = Inferrer::new("hr", package, &index, &sources, &mut cache, &mut files)
            .infer_routine(&routine.heading, &routine.body);
        (routine, results)
    }

    /// Find the expression of the first assignment statement.
    fn first_assignment(routine: &ast::RoutineDefinition) -> &ast::AssignmentStatement {
        routine
            .body
            .statements
            .iter()
            .find_map(|s| match s {
                ast::Statement::Assignment(a) => Some(a),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn locals_shadow_columns() {
        let (routine, results) = infer_source(
            "CREATE FUNCTION f(salary VARCHAR2) RETURN NUMBER IS
               v NUMBER;
             BEGIN
               SELECT COUNT(*) INTO v FROM employees WHERE last_name = salary;
               v := LENGTH(salary);
               RETURN v;
             END;",
        );
        let results = results.unwrap();
        let assignment = first_assignment(&routine);
        assert_eq!(
            results.type_of(&assignment.value).unwrap(),
            &TypeInfo::Scalar(ScalarKind::Integer)
        );
        assert_eq!(
            results.name(&assignment.target).unwrap(),
            &NameResolution::Local {
                name: "v".to_owned()
            }
        );
    }

    #[test]
    fn arithmetic_promotes() {
        let (routine, results) = infer_source(
            "CREATE PROCEDURE p IS
               d DATE;
             BEGIN
               d := SYSDATE + 1;
             END;",
        );
        let results = results.unwrap();
        let assignment = first_assignment(&routine);
        assert_eq!(
            results.type_of(&assignment.value).unwrap(),
            &TypeInfo::Scalar(ScalarKind::Date)
        );
    }

    #[test]
    fn incompatible_operands_warn_but_succeed() {
        let (routine, results) = infer_source(
            "CREATE PROCEDURE p IS
               b BOOLEAN;
               n NUMBER;
             BEGIN
               n := b + 1;
             END;",
        );
        let results = results.unwrap();
        let assignment = first_assignment(&routine);
        assert_eq!(results.type_of(&assignment.value).unwrap(), &TypeInfo::Unknown);
        assert_eq!(results.warnings().len(), 1);
    }

    #[test]
    fn own_package_variables_are_module_variables() {
        let (routine, results) = infer_in_package(
            "CREATE PROCEDURE bump2 IS
             BEGIN
               G_Counter := g_counter + 1;
             END;",
            Some("counter_pkg"),
        );
        let results = results.unwrap();
        let assignment = first_assignment(&routine);
        assert_eq!(
            results.name(&assignment.target).unwrap(),
            &NameResolution::ModuleVariable {
                schema: "hr".to_owned(),
                package: "counter_pkg".to_owned(),
                variable: "g_counter".to_owned(),
                constant: false,
            }
        );
    }

    #[test]
    fn qualified_names_find_package_members() {
        let (routine, results) = infer_source(
            "CREATE PROCEDURE p IS
               n NUMBER;
             BEGIN
               n := counter_pkg.c_limit + util.bump(1) + emp_seq.NEXTVAL;
             END;",
        );
        let results = results.unwrap();
        let assignment = first_assignment(&routine);
        let mut names = vec![];
        collect_names(&assignment.value, &mut names);
        let resolutions = names
            .iter()
            .map(|n| results.name(n).unwrap().clone())
            .collect::<Vec<_>>();
        assert_eq!(
            resolutions,
            vec![
                NameResolution::ModuleVariable {
                    schema: "hr".to_owned(),
                    package: "counter_pkg".to_owned(),
                    variable: "c_limit".to_owned(),
                    constant: true,
                },
                NameResolution::PackageFunction {
                    schema: "hr".to_owned(),
                    package: "util".to_owned(),
                    function: "bump".to_owned(),
                },
                NameResolution::Sequence {
                    schema: "hr".to_owned(),
                    name: "emp_seq".to_owned(),
                    op: SequenceOp::NextVal,
                },
            ]
        );
    }

    #[test]
    fn own_schema_packages_hide_public_synonyms() {
        // `public.util` and `public.counter_pkg` both point at `shared`.
        let (routine, results) = infer_source(
            "CREATE PROCEDURE p IS
               n NUMBER;
             BEGIN
               n := util.bump(1) + counter_pkg.g_counter;
             END;",
        );
        let results = results.unwrap();
        let assignment = first_assignment(&routine);
        let mut names = vec![];
        collect_names(&assignment.value, &mut names);
        let schemas = names
            .iter()
            .map(|n| match results.name(n).unwrap() {
                NameResolution::PackageFunction { schema, package, .. }
                | NameResolution::ModuleVariable { schema, package, .. } => {
                    format!("{}.{}", schema, package)
                }
                other => panic!("unexpected resolution {:?}", other),
            })
            .collect::<Vec<_>>();
        assert_eq!(schemas, vec!["hr.util", "hr.counter_pkg"]);
    }

    fn collect_names<'e>(expr: &'e ast::Expression, names: &mut Vec<&'e NameExpression>) {
        match expr {
            ast::Expression::Name(name) => names.push(name),
            ast::Expression::Binary(binary) => {
                collect_names(&binary.left, names);
                collect_names(&binary.right, names);
            }
            _ => {}
        }
    }

    #[test]
    fn object_methods_and_fields() {
        let (routine, results) = infer_source(
            "CREATE PROCEDURE p IS
               a address_t;
               s VARCHAR2(100);
             BEGIN
               s := a.city;
               s := a.full_text();
             END;",
        );
        let results = results.unwrap();
        let assignments = routine
            .body
            .statements
            .iter()
            .filter_map(|s| match s {
                ast::Statement::Assignment(a) => Some(a),
                _ => None,
            })
            .collect::<Vec<_>>();
        let value_name = |a: &ast::AssignmentStatement| match &a.value {
            ast::Expression::Name(name) => results.name(name).unwrap().clone(),
            _ => panic!("expected a name"),
        };
        assert_eq!(
            value_name(assignments[0]),
            NameResolution::LocalField {
                variable: "a".to_owned(),
                fields: vec!["city".to_owned()],
            }
        );
        assert_eq!(results.type_of(&assignments[0].value).unwrap(), &TypeInfo::TEXT);
        assert_eq!(
            value_name(assignments[1]),
            NameResolution::TypeMethod {
                schema: "hr".to_owned(),
                type_name: "address_t".to_owned(),
                method: "full_text".to_owned(),
                receiver: "a".to_owned(),
            }
        );
    }

    #[test]
    fn unknown_names_outside_sql_are_unresolved() {
        let (_, results) = infer_source(
            "CREATE PROCEDURE p IS
               n NUMBER;
             BEGIN
               n := no_such_thing;
             END;",
        );
        assert_eq!(results.unwrap_err().kind(), FailureKind::UnresolvedReference);
    }

    #[test]
    fn unknown_names_inside_sql_are_columns() {
        let (_, results) = infer_source(
            "CREATE PROCEDURE p IS
               n NUMBER;
             BEGIN
               SELECT mystery INTO n FROM missing_table;
             END;",
        );
        let results = results.unwrap();
        assert!(results
            .warnings()
            .iter()
            .any(|w| w.contains("missing_table")));
    }

    #[test]
    fn ambiguous_columns_are_unresolved() {
        let (_, results) = infer_source(
            "CREATE PROCEDURE p IS
               n NUMBER;
             BEGIN
               SELECT department_id INTO n FROM employees e, departments d;
             END;",
        );
        assert_eq!(results.unwrap_err().kind(), FailureKind::UnresolvedReference);
    }

    #[test]
    fn exceptions_get_sqlstates() {
        let (routine, results) = infer_source(
            "CREATE PROCEDURE p IS
               e_first EXCEPTION;
               e_second EXCEPTION;
               PRAGMA EXCEPTION_INIT(e_second, -20042);
             BEGIN
               RAISE e_first;
             EXCEPTION
               WHEN e_second OR no_data_found THEN NULL;
               WHEN my_pkg.oops THEN NULL;
               WHEN OTHERS THEN NULL;
             END;",
        );
        let results = results.unwrap();
        let raised = match &routine.body.statements[0] {
            ast::Statement::Raise(raise) => raise.exception.as_ref().unwrap(),
            _ => panic!("expected RAISE"),
        };
        assert_eq!(
            results.exception(raised).unwrap(),
            &ExceptionResolution::UserDefined {
                sqlstate: "P9001".to_owned()
            }
        );
        let handlers = &routine.body.exception_section.as_ref().unwrap().handlers;
        let resolved = handlers
            .iter()
            .flat_map(|h| h.exceptions.iter())
            .map(|e| results.exception(e).unwrap().clone())
            .collect::<Vec<_>>();
        assert_eq!(
            resolved,
            vec![
                ExceptionResolution::UserDefined {
                    sqlstate: "P0042".to_owned()
                },
                ExceptionResolution::Predefined("no_data_found"),
                ExceptionResolution::Passthrough("my_pkg.oops".to_owned()),
                ExceptionResolution::Others,
            ]
        );
    }

    #[test]
    fn anchored_types_resolve_through_scope_and_catalog() {
        let (routine, results) = infer_source(
            "CREATE PROCEDURE p(p_id employees.employee_id%TYPE) IS
               v_copy p_id%TYPE;
               r emp%ROWTYPE;
             BEGIN
               NULL;
             END;",
        );
        let results = results.unwrap();
        let param = &routine.heading.params()[0];
        assert_eq!(
            results.declared_type(&param.data_type).unwrap().pg_name,
            "hr.employees.employee_id%TYPE"
        );
        let decls = &routine.body.declarations;
        let declared = |d: &ast::Declaration| match d {
            ast::Declaration::Variable(v) => results.declared_type(&v.data_type).unwrap().clone(),
            _ => panic!("expected a variable"),
        };
        assert_eq!(declared(&decls[0]).pg_name, "p_id%TYPE");
        assert_eq!(declared(&decls[1]).pg_name, "hr.employees%ROWTYPE");
    }

    #[test]
    fn cursor_loops_get_record_types() {
        let (routine, results) = infer_source(
            "CREATE PROCEDURE p IS
               total NUMBER := 0;
             BEGIN
               FOR r IN (SELECT salary, last_name AS who FROM employees) LOOP
                 total := total + r.salary;
               END LOOP;
             END;",
        );
        let results = results.unwrap();
        let body = match &routine.body.statements[0] {
            ast::Statement::ForCursor(stmt) => &stmt.body.statements,
            _ => panic!("expected FOR"),
        };
        let assignment = match &body[0] {
            ast::Statement::Assignment(a) => a,
            _ => panic!("expected assignment"),
        };
        assert_eq!(results.type_of(&assignment.value).unwrap(), &TypeInfo::NUMERIC);
    }

    #[test]
    fn decode_uses_common_result_type() {
        let (routine, results) = infer_source(
            "CREATE PROCEDURE p(x NUMBER) IS
               s VARCHAR2(10);
             BEGIN
               s := DECODE(x, 1, 'one', 2, 'two', NULL);
             END;",
        );
        let results = results.unwrap();
        let assignment = first_assignment(&routine);
        assert_eq!(results.type_of(&assignment.value).unwrap(), &TypeInfo::TEXT);
    }

    #[test]
    fn duplicate_declarations_are_rejected() {
        let (_, results) = infer_source(
            "CREATE PROCEDURE p(x NUMBER) IS
               x NUMBER;
             BEGIN
               NULL;
             END;",
        );
        assert_eq!(results.unwrap_err().kind(), FailureKind::ParseUnusable);
    }

    #[test]
    fn annotations_are_write_once() {
        let mut annotations = TypeAnnotations::default();
        let mut files = KnownFiles::new();
        let file_id = files.add_string("x.sql", "x");
        let span = Span::new(file_id, 0..1);
        annotations.record(&span, TypeInfo::TEXT).unwrap();
        annotations.record(&span, TypeInfo::TEXT).unwrap();
        let err = annotations.record(&span, TypeInfo::BOOLEAN).unwrap_err();
        assert_eq!(err.kind(), FailureKind::TypeInferenceIncomplete);
    }
}
