//! Namespaces for PL/SQL.
//!
//! There are two kinds. The [`ScopeStack`] holds procedural declarations:
//! parameters, variables, cursors, exceptions and loop indices. A
//! [`ColumnSet`] holds the columns visible inside one query, built from its
//! `FROM` clause.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use codespan_reporting::diagnostic::Label;

use crate::{
    ast::ParameterMode,
    errors::{Error, Result},
    metadata::Table,
    tokenizer::{Ident, Span, Spanned},
    types::{RecordType, TypeInfo},
};

/// What kind of thing a local name refers to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LocalKind {
    Variable { constant: bool },
    Parameter { mode: ParameterMode },
    Cursor,
    Exception { sqlstate: String },
    LoopIndex,
    Record,
    /// A `TYPE ... IS RECORD` declaration.
    RecordType,
}

/// A name declared in a block or routine heading.
#[derive(Clone, Debug)]
pub struct LocalSymbol {
    /// Canonical name.
    pub name: String,
    pub kind: LocalKind,
    pub ty: TypeInfo,
    /// Where it was declared.
    pub span: Span,
}

impl LocalSymbol {
    /// Is this a cursor?
    pub fn is_cursor(&self) -> bool {
        self.kind == LocalKind::Cursor
    }
}

/// One level of the scope stack.
#[derive(Clone, Debug, Default)]
struct Frame {
    names: BTreeMap<String, LocalSymbol>,
}

/// A stack of nested declaration scopes. Lookups search from the innermost
/// frame outwards.
#[derive(Clone, Debug, Default)]
pub struct ScopeStack {
    frames: Vec<Frame>,
}

impl ScopeStack {
    /// Create a stack with a single, empty frame.
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
        }
    }

    /// Enter a new declarative scope.
    pub fn push(&mut self) {
        self.frames.push(Frame::default());
    }

    /// Leave the innermost scope.
    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// How deeply nested are we?
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Declare a name in the innermost scope. Declaring the same name twice
    /// in one scope is an error, but shadowing an outer name is fine.
    pub fn add(&mut self, name: &Ident, kind: LocalKind, ty: TypeInfo) -> Result<()> {
        let canonical = name.canonical_name();
        if self.frames.is_empty() {
            self.push();
        }
        let innermost = self.frames.len() - 1;
        let frame = &mut self.frames[innermost];
        if let Some(existing) = frame.names.get(&canonical) {
            let mut err = Error::annotated(
                format!("duplicate declaration of {}", canonical),
                name.span(),
                "declared again here",
            );
            if let (Error::Source(source), Span::Known { file_id, start, end }) =
                (&mut err, existing.span)
            {
                source
                    .diagnostic
                    .labels
                    .push(Label::secondary(file_id, start..end).with_message("first declared here"));
            }
            return Err(err);
        }
        frame.names.insert(
            canonical.clone(),
            LocalSymbol {
                name: canonical,
                kind,
                ty,
                span: name.span(),
            },
        );
        Ok(())
    }

    /// Look up a canonical name, innermost scope first.
    pub fn get(&self, name: &str) -> Option<&LocalSymbol> {
        self.frames.iter().rev().find_map(|f| f.names.get(name))
    }

    /// Bind a declared exception to a specific SQLSTATE. Returns `false` if
    /// `name` is not an exception declared in the innermost scope.
    pub fn bind_exception(&mut self, name: &str, code: String) -> bool {
        let symbol = self.frames.last_mut().and_then(|f| f.names.get_mut(name));
        match symbol {
            Some(LocalSymbol {
                kind: LocalKind::Exception { sqlstate },
                ..
            }) => {
                *sqlstate = code;
                true
            }
            _ => false,
        }
    }
}

/// A column visible in a query.
#[derive(Clone, Debug)]
struct QueryColumn {
    /// The alias or table name which qualifies this column, if any.
    qualifier: Option<String>,
    name: String,
    ty: TypeInfo,
}

/// The outcome of looking up a column.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnLookup<'a> {
    /// Exactly one column matched.
    Found(&'a TypeInfo),
    /// The qualifier names a table we know nothing about, so any column
    /// might exist.
    Opaque,
    /// Nothing matched.
    Missing,
}

/// A set of columns and types.
///
/// This is output by a `FROM` or `JOIN` clause, and consulted when resolving
/// names inside the query.
#[derive(Clone, Debug, Default)]
pub struct ColumnSet {
    columns: Vec<QueryColumn>,
    /// Every table name or alias that can qualify a column.
    qualifiers: BTreeSet<String>,
    /// Qualifiers of tables missing from the catalog.
    opaque: BTreeSet<String>,
}

impl ColumnSet {
    /// An empty column set. Used for SQL statements with no `FROM` clause,
    /// so that we still know we're inside SQL.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a column set from a catalog table. If the table is missing, we
    /// still remember its qualifier.
    pub fn from_table(qualifier: &str, table: Option<&Table>) -> Self {
        let mut set = Self::default();
        set.qualifiers.insert(qualifier.to_owned());
        match table {
            Some(table) => {
                set.columns = table
                    .columns
                    .iter()
                    .map(|c| QueryColumn {
                        qualifier: Some(qualifier.to_owned()),
                        name: c.name.clone(),
                        ty: c.ty.clone(),
                    })
                    .collect();
            }
            None => {
                set.opaque.insert(qualifier.to_owned());
            }
        }
        set
    }

    /// Build a column set from the output of a subquery or CTE.
    pub fn from_record(qualifier: Option<&str>, record: &RecordType) -> Self {
        let mut set = Self::default();
        if let Some(qualifier) = qualifier {
            set.qualifiers.insert(qualifier.to_owned());
        }
        set.columns = record
            .fields
            .iter()
            .map(|f| QueryColumn {
                qualifier: qualifier.map(|q| q.to_owned()),
                name: f.name.clone(),
                ty: f.ty.clone(),
            })
            .collect();
        set
    }

    /// Join another column set, returning a new column set. This corresponds
    /// to joins that work like `ON`, which preserve all columns from both
    /// sides.
    pub fn join(&self, other: &Self) -> Self {
        let mut set = self.clone();
        set.columns.extend(other.columns.iter().cloned());
        set.qualifiers.extend(other.qualifiers.iter().cloned());
        set.opaque.extend(other.opaque.iter().cloned());
        set
    }

    /// Join another column set using the columns from a `USING` clause.
    ///
    /// For the columns that are in the `USING` clause, we only include one
    /// copy of each, without a qualifier.
    pub fn join_using(&self, other: &Self, using: &[Ident]) -> Result<Self> {
        let mut seen_with_type: HashMap<String, Option<TypeInfo>> = using
            .iter()
            .map(|ident| (ident.canonical_name(), None))
            .collect();
        let spans: HashMap<String, Span> = using
            .iter()
            .map(|ident| (ident.canonical_name(), ident.span()))
            .collect();

        let mut columns = vec![];
        for col in self.columns.iter().chain(other.columns.iter()) {
            match seen_with_type.get_mut(&col.name) {
                Some(slot @ None) => {
                    *slot = Some(col.ty.clone());
                    columns.push(QueryColumn {
                        qualifier: None,
                        name: col.name.clone(),
                        ty: col.ty.clone(),
                    });
                }
                Some(Some(ty)) => {
                    if ty.common_supertype(&col.ty).is_none() {
                        return Err(Error::annotated(
                            format!(
                                "column {} has type {} in one table and type {} in another",
                                col.name, ty, col.ty
                            ),
                            spans.get(&col.name).copied().unwrap_or_default(),
                            "types do not match",
                        ));
                    }
                }
                None => columns.push(col.clone()),
            }
        }
        let mut set = self.join(other);
        set.columns = columns;
        Ok(set)
    }

    /// Can `name` qualify a column here?
    pub fn has_qualifier(&self, name: &str) -> bool {
        self.qualifiers.contains(name)
    }

    /// All columns, optionally restricted to one qualifier, as a record.
    pub fn to_record(&self, qualifier: Option<&str>) -> RecordType {
        RecordType {
            table: None,
            jsonb: false,
            fields: self
                .columns
                .iter()
                .filter(|c| qualifier.is_none() || c.qualifier.as_deref() == qualifier)
                .map(|c| crate::types::RecordField {
                    name: c.name.clone(),
                    ty: c.ty.clone(),
                })
                .collect(),
        }
    }

    /// Look up a column. An ambiguous match is an error.
    pub fn get(
        &self,
        qualifier: Option<&str>,
        name: &str,
        spanned: &dyn Spanned,
    ) -> Result<ColumnLookup<'_>> {
        let matches = self
            .columns
            .iter()
            .filter(|c| {
                c.name == name && (qualifier.is_none() || c.qualifier.as_deref() == qualifier)
            })
            .collect::<Vec<_>>();
        match matches.as_slice() {
            [] => match qualifier {
                Some(q) if self.opaque.contains(q) => Ok(ColumnLookup::Opaque),
                Some(q) if self.qualifiers.contains(q) => Ok(ColumnLookup::Missing),
                None if !self.opaque.is_empty() => Ok(ColumnLookup::Opaque),
                _ => Ok(ColumnLookup::Missing),
            },
            [only] => Ok(ColumnLookup::Found(&only.ty)),
            _ => Err(Error::unresolved(
                format!("{} (ambiguous column)", name),
                spanned.span(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        errors::FailureKind,
        metadata::tests::test_index,
        types::{ObjectName, ScalarKind},
    };

    #[test]
    fn inner_scopes_shadow_outer_ones() {
        let mut scopes = ScopeStack::new();
        scopes
            .add(&Ident::new("x"), LocalKind::Variable { constant: false }, TypeInfo::TEXT)
            .unwrap();
        scopes.push();
        scopes
            .add(&Ident::new("X"), LocalKind::LoopIndex, TypeInfo::Scalar(ScalarKind::Integer))
            .unwrap();
        assert_eq!(scopes.get("x").unwrap().kind, LocalKind::LoopIndex);
        scopes.pop();
        assert_eq!(scopes.get("x").unwrap().ty, TypeInfo::TEXT);
        assert!(scopes.get("y").is_none());
    }

    #[test]
    fn duplicates_in_one_scope_are_rejected() {
        let mut scopes = ScopeStack::new();
        let x = Ident::new("x");
        scopes
            .add(&x, LocalKind::Variable { constant: false }, TypeInfo::TEXT)
            .unwrap();
        let err = scopes.add(&x, LocalKind::Cursor, TypeInfo::Unknown).unwrap_err();
        assert_eq!(err.kind(), FailureKind::ParseUnusable);
    }

    #[test]
    fn exceptions_can_be_rebound() {
        let mut scopes = ScopeStack::new();
        scopes
            .add(
                &Ident::new("e_bad"),
                LocalKind::Exception {
                    sqlstate: "P9001".to_owned(),
                },
                TypeInfo::Unknown,
            )
            .unwrap();
        assert!(scopes.bind_exception("e_bad", "P0001".to_owned()));
        assert!(!scopes.bind_exception("e_missing", "P0002".to_owned()));
        assert_eq!(
            scopes.get("e_bad").unwrap().kind,
            LocalKind::Exception {
                sqlstate: "P0001".to_owned()
            }
        );
    }

    #[test]
    fn column_lookup() {
        let index = test_index();
        let employees = index.table(&ObjectName::new("hr", "employees"));
        let departments = index.table(&ObjectName::new("hr", "departments"));
        let e = ColumnSet::from_table("e", employees);
        let d = ColumnSet::from_table("d", departments);
        let joined = e.join(&d);
        assert_eq!(
            joined.get(None, "last_name", &Span::Unknown).unwrap(),
            ColumnLookup::Found(&TypeInfo::TEXT)
        );
        assert!(joined.get(None, "department_id", &Span::Unknown).is_err());
        assert!(matches!(
            joined.get(Some("d"), "department_id", &Span::Unknown).unwrap(),
            ColumnLookup::Found(_)
        ));
        assert_eq!(
            joined.get(Some("d"), "nope", &Span::Unknown).unwrap(),
            ColumnLookup::Missing
        );

        let using = e.join_using(&d, &[Ident::new("department_id")]).unwrap();
        assert!(matches!(
            using.get(None, "department_id", &Span::Unknown).unwrap(),
            ColumnLookup::Found(_)
        ));
    }

    #[test]
    fn missing_tables_are_opaque() {
        let set = ColumnSet::from_table("x", None);
        assert_eq!(
            set.get(Some("x"), "anything", &Span::Unknown).unwrap(),
            ColumnLookup::Opaque
        );
        assert_eq!(
            set.get(None, "anything", &Span::Unknown).unwrap(),
            ColumnLookup::Opaque
        );
        assert!(set.has_qualifier("x"));
    }
}
