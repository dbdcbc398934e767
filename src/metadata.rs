//! The metadata index: everything we know about the catalog.
//!
//! The catalog arrives as one or more [`CatalogSnapshot`]s, which are plain
//! JSON documents extracted from the source database by someone else. We
//! fold every name to lowercase, build lookup tables, and then never mutate
//! the result. A single [`MetadataIndex`] may be shared by many units of
//! work running in parallel.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fs,
    path::Path,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    ast::ParameterMode,
    errors::{Context, Result},
    types::{ObjectName, RecordField, RecordType, ResolvedType, TypeInfo, TypeNameResolver},
};

/// The schema we fall back to when resolving synonyms.
pub const PUBLIC_SCHEMA: &str = "public";

/// How many synonym hops we follow before giving up.
const MAX_SYNONYM_HOPS: usize = 8;

/// A catalog snapshot, as supplied by the extraction tooling. Every section
/// is optional.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogSnapshot {
    pub tables: Vec<TableInfo>,
    pub routines: Vec<RoutineInfo>,
    pub object_types: Vec<ObjectTypeInfo>,
    pub sequences: Vec<SequenceInfo>,
    pub synonyms: Vec<SynonymInfo>,
}

impl CatalogSnapshot {
    /// Parse a snapshot from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("could not parse catalog snapshot")
    }

    /// Load a snapshot from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("could not read catalog snapshot {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("could not parse catalog snapshot {}", path.display()))
    }
}

/// A table or view.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

/// A column, or an object type attribute.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    /// The owner of a user-defined type, if `data_type` is one.
    #[serde(default)]
    pub type_owner: Option<String>,
}

/// Is a routine a function or a procedure?
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutineInfoKind {
    Function,
    Procedure,
}

/// A parameter mode, as written in the snapshot.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamInfoMode {
    #[default]
    In,
    Out,
    #[serde(alias = "in_out", alias = "in out")]
    InOut,
}

impl From<ParamInfoMode> for ParameterMode {
    fn from(mode: ParamInfoMode) -> Self {
        match mode {
            ParamInfoMode::In => ParameterMode::In,
            ParamInfoMode::Out => ParameterMode::Out,
            ParamInfoMode::InOut => ParameterMode::InOut,
        }
    }
}

/// A standalone routine, or a routine in a package.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RoutineInfo {
    pub schema: String,
    #[serde(default)]
    pub package: Option<String>,
    pub name: String,
    pub kind: RoutineInfoKind,
    #[serde(default)]
    pub params: Vec<ParamInfo>,
    #[serde(default)]
    pub return_type: Option<String>,
}

/// A routine parameter.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ParamInfo {
    pub name: String,
    #[serde(default)]
    pub mode: ParamInfoMode,
    pub data_type: String,
}

/// A user-defined object type.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ObjectTypeInfo {
    pub schema: String,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<ColumnInfo>,
    #[serde(default)]
    pub methods: Vec<String>,
}

/// A sequence.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SequenceInfo {
    pub schema: String,
    pub name: String,
}

/// A synonym.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SynonymInfo {
    pub schema: String,
    pub name: String,
    pub target_schema: String,
    pub target_name: String,
}

/// A column with its resolved type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: TypeInfo,
}

/// A table, with its columns in order.
#[derive(Clone, Debug)]
pub struct Table {
    pub name: ObjectName,
    pub columns: Vec<Column>,
}

impl Table {
    /// Look up a column by canonical name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// This table's row type.
    pub fn row_type(&self) -> RecordType {
        RecordType {
            table: Some(self.name.clone()),
            jsonb: false,
            fields: self
                .columns
                .iter()
                .map(|c| RecordField {
                    name: c.name.clone(),
                    ty: c.ty.clone(),
                })
                .collect(),
        }
    }
}

/// A routine parameter with its resolved type.
#[derive(Clone, Debug)]
pub struct RoutineParam {
    pub name: String,
    pub mode: ParameterMode,
    pub ty: TypeInfo,
}

/// A routine signature.
#[derive(Clone, Debug)]
pub struct Routine {
    pub schema: String,
    pub package: Option<String>,
    pub name: String,
    pub kind: RoutineInfoKind,
    pub params: Vec<RoutineParam>,
    pub return_type: Option<TypeInfo>,
}

impl Routine {
    /// Is this a function?
    pub fn is_function(&self) -> bool {
        self.kind == RoutineInfoKind::Function
    }

    /// Does this routine have any `OUT` or `IN OUT` parameters?
    pub fn has_out_params(&self) -> bool {
        self.params.iter().any(|p| p.mode != ParameterMode::In)
    }

    /// The type of value a call produces, once translated. Procedures with
    /// a single `OUT` parameter produce that parameter's value.
    pub fn result_type(&self) -> TypeInfo {
        if let Some(ty) = &self.return_type {
            return ty.clone();
        }
        let outs = self
            .params
            .iter()
            .filter(|p| p.mode != ParameterMode::In)
            .collect::<Vec<_>>();
        match outs.as_slice() {
            [] => TypeInfo::Null,
            [only] => only.ty.clone(),
            _ => TypeInfo::Record(RecordType {
                table: None,
                jsonb: false,
                fields: outs
                    .iter()
                    .map(|p| RecordField {
                        name: p.name.clone(),
                        ty: p.ty.clone(),
                    })
                    .collect(),
            }),
        }
    }
}

/// A user-defined object type.
#[derive(Clone, Debug)]
pub struct ObjectType {
    pub name: ObjectName,
    pub fields: Vec<Column>,
    pub methods: BTreeSet<String>,
}

impl ObjectType {
    /// Look up a field by canonical name.
    pub fn field(&self, name: &str) -> Option<&Column> {
        self.fields.iter().find(|c| c.name == name)
    }

    /// Does this type have a method named `name`?
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains(name)
    }
}

/// Key for looking up routines.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct RoutineKey {
    schema: String,
    package: Option<String>,
    name: String,
}

/// Builds a [`MetadataIndex`] from one or more snapshots.
#[derive(Debug, Default)]
pub struct MetadataIndexBuilder {
    index: MetadataIndex,
}

impl MetadataIndexBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add everything in `snapshot`. Later entries for the same table
    /// replace earlier ones. Routine overloads accumulate.
    pub fn add_snapshot(&mut self, snapshot: CatalogSnapshot) -> &mut Self {
        let index = &mut self.index;
        for table in snapshot.tables {
            let name = ObjectName::new(table.schema.to_lowercase(), table.name.to_lowercase());
            index.schemas.insert(name.schema.clone());
            let columns = table.columns.iter().map(column_from_info).collect();
            index.tables.insert(
                name.clone(),
                Table {
                    name: name.clone(),
                    columns,
                },
            );
        }
        for routine in snapshot.routines {
            let key = RoutineKey {
                schema: routine.schema.to_lowercase(),
                package: routine.package.as_ref().map(|p| p.to_lowercase()),
                name: routine.name.to_lowercase(),
            };
            index.schemas.insert(key.schema.clone());
            if let Some(package) = &key.package {
                index
                    .packages
                    .insert(ObjectName::new(key.schema.clone(), package.clone()));
            }
            let params = routine
                .params
                .iter()
                .map(|p| RoutineParam {
                    name: p.name.to_lowercase(),
                    mode: p.mode.into(),
                    ty: TypeInfo::from_catalog(&p.data_type, None),
                })
                .collect();
            let resolved = Routine {
                schema: key.schema.clone(),
                package: key.package.clone(),
                name: key.name.clone(),
                kind: routine.kind,
                params,
                return_type: routine
                    .return_type
                    .as_deref()
                    .map(|t| TypeInfo::from_catalog(t, None)),
            };
            index.routines.entry(key).or_default().push(resolved);
        }
        for object_type in snapshot.object_types {
            let name = ObjectName::new(
                object_type.schema.to_lowercase(),
                object_type.name.to_lowercase(),
            );
            index.schemas.insert(name.schema.clone());
            index.object_types.insert(
                name.clone(),
                ObjectType {
                    name,
                    fields: object_type.fields.iter().map(column_from_info).collect(),
                    methods: object_type
                        .methods
                        .iter()
                        .map(|m| m.to_lowercase())
                        .collect(),
                },
            );
        }
        for sequence in snapshot.sequences {
            let name = ObjectName::new(sequence.schema.to_lowercase(), sequence.name.to_lowercase());
            index.schemas.insert(name.schema.clone());
            index.sequences.insert(name);
        }
        for synonym in snapshot.synonyms {
            index.synonyms.insert(
                ObjectName::new(synonym.schema.to_lowercase(), synonym.name.to_lowercase()),
                ObjectName::new(
                    synonym.target_schema.to_lowercase(),
                    synonym.target_name.to_lowercase(),
                ),
            );
        }
        self
    }

    /// Finish building.
    pub fn build(self) -> MetadataIndex {
        let index = self.index;
        debug!(
            tables = index.tables.len(),
            routines = index.routines.len(),
            object_types = index.object_types.len(),
            sequences = index.sequences.len(),
            synonyms = index.synonyms.len(),
            "built metadata index"
        );
        index
    }
}

fn column_from_info(column: &ColumnInfo) -> Column {
    Column {
        name: column.name.to_lowercase(),
        ty: TypeInfo::from_catalog(&column.data_type, column.type_owner.as_deref()),
    }
}

/// An immutable index over catalog objects.
#[derive(Debug, Default)]
pub struct MetadataIndex {
    tables: HashMap<ObjectName, Table>,
    routines: HashMap<RoutineKey, Vec<Routine>>,
    object_types: HashMap<ObjectName, ObjectType>,
    sequences: HashSet<ObjectName>,
    synonyms: HashMap<ObjectName, ObjectName>,
    schemas: BTreeSet<String>,
    packages: HashSet<ObjectName>,
}

impl MetadataIndex {
    /// Build an index from a single snapshot.
    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        let mut builder = MetadataIndexBuilder::new();
        builder.add_snapshot(snapshot);
        builder.build()
    }

    /// Look up a table.
    pub fn table(&self, name: &ObjectName) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Look up a column of a table.
    pub fn column(&self, table: &ObjectName, column: &str) -> Option<&Column> {
        self.table(table)?.column(column)
    }

    /// All overloads of a routine.
    pub fn routines(&self, schema: &str, package: Option<&str>, name: &str) -> &[Routine] {
        let key = RoutineKey {
            schema: schema.to_owned(),
            package: package.map(|p| p.to_owned()),
            name: name.to_owned(),
        };
        self.routines.get(&key).map(|r| r.as_slice()).unwrap_or(&[])
    }

    /// The first overload of a routine, which is what we use when we can't
    /// tell overloads apart.
    pub fn routine(&self, schema: &str, package: Option<&str>, name: &str) -> Option<&Routine> {
        self.routines(schema, package, name).first()
    }

    /// Look up an object type.
    pub fn object_type(&self, name: &ObjectName) -> Option<&ObjectType> {
        self.object_types.get(name)
    }

    /// Do we have a sequence with this name?
    pub fn has_sequence(&self, name: &ObjectName) -> bool {
        self.sequences.contains(name)
    }

    /// Is `name` a schema that owns at least one object?
    pub fn is_schema(&self, name: &str) -> bool {
        self.schemas.contains(name)
    }

    /// Is `schema.name` a package with at least one known routine?
    pub fn is_package(&self, schema: &str, name: &str) -> bool {
        self.packages
            .contains(&ObjectName::new(schema.to_owned(), name.to_owned()))
    }

    /// Is there a real object (not a synonym) with this name?
    fn object_exists(&self, name: &ObjectName) -> bool {
        self.tables.contains_key(name)
            || self.object_types.contains_key(name)
            || self.sequences.contains(name)
            || self.packages.contains(name)
            || !self.routines(&name.schema, None, &name.name).is_empty()
    }

    /// Resolve a synonym. We look in `schema` first, then in `public`, and
    /// follow chains of synonyms until we reach a real object.
    ///
    /// Returns `None` if `name` is not a synonym, or if the chain loops back
    /// on itself. Callers should treat `None` as "use the name as written",
    /// not as an error. If the chain is too long, we return the last target
    /// we reached.
    pub fn resolve_synonym(&self, schema: &str, name: &str) -> Option<ObjectName> {
        let start = [schema, PUBLIC_SCHEMA].into_iter().find_map(|s| {
            self.synonyms
                .get(&ObjectName::new(s.to_owned(), name.to_owned()))
        })?;

        let mut seen = HashSet::new();
        seen.insert(ObjectName::new(schema.to_owned(), name.to_owned()));
        let mut target = start.clone();
        for _ in 1..MAX_SYNONYM_HOPS {
            if self.object_exists(&target) {
                break;
            }
            match self.synonyms.get(&target) {
                Some(next) => {
                    if !seen.insert(target.clone()) || seen.contains(next) {
                        trace!(%schema, %name, "synonym cycle");
                        return None;
                    }
                    target = next.clone();
                }
                None => break,
            }
        }
        trace!(%schema, %name, %target, "resolved synonym");
        Some(target)
    }

    /// Resolve a table name as written (one or two canonical parts), looking
    /// in `schema` first and then through synonyms. Returns `None` if we've
    /// never heard of it.
    pub fn resolve_table(&self, schema: &str, parts: &[String]) -> Option<ObjectName> {
        let (schema, name) = match parts {
            [name] => (schema, name.as_str()),
            [schema, name] => (schema.as_str(), name.as_str()),
            _ => return None,
        };
        let direct = ObjectName::new(schema.to_owned(), name.to_owned());
        if self.tables.contains_key(&direct) {
            return Some(direct);
        }
        self.resolve_synonym(schema, name)
    }

    /// Resolve an object type name as written.
    pub fn resolve_object_type(&self, schema: &str, parts: &[String]) -> Option<&ObjectType> {
        let (schema, name) = match parts {
            [name] => (schema, name.as_str()),
            [schema, name] => (schema.as_str(), name.as_str()),
            _ => return None,
        };
        let direct = ObjectName::new(schema.to_owned(), name.to_owned());
        if let Some(object_type) = self.object_types.get(&direct) {
            return Some(object_type);
        }
        self.object_types.get(&self.resolve_synonym(schema, name)?)
    }
}

/// Resolves declared types against a [`MetadataIndex`], relative to a
/// default schema.
pub struct MetadataTypeResolver<'a> {
    pub index: &'a MetadataIndex,
    pub schema: &'a str,
}

impl<'a> MetadataTypeResolver<'a> {
    /// `t.c%TYPE` or `s.t.c%TYPE`.
    fn column_type(&self, parts: &[String]) -> Option<ResolvedType> {
        let (table_parts, column) = parts.split_at(parts.len().checked_sub(1)?);
        let table = self.index.resolve_table(self.schema, table_parts)?;
        let column = self.index.column(&table, &column[0])?;
        Some(ResolvedType {
            info: column.ty.clone(),
            pg_name: format!("{}.{}%TYPE", table, column.name),
        })
    }

    /// `t%ROWTYPE` or `s.t%ROWTYPE`.
    fn row_type(&self, parts: &[String]) -> Option<ResolvedType> {
        let name = self.index.resolve_table(self.schema, parts)?;
        let table = self.index.table(&name)?;
        Some(ResolvedType {
            info: TypeInfo::Record(table.row_type()),
            pg_name: format!("{}%ROWTYPE", name),
        })
    }
}

impl<'a> TypeNameResolver for MetadataTypeResolver<'a> {
    fn object_type(&self, parts: &[String]) -> Option<ObjectName> {
        self.index
            .resolve_object_type(self.schema, parts)
            .map(|t| t.name.clone())
    }

    fn anchored_type(&self, parts: &[String], rowtype: bool) -> Option<ResolvedType> {
        if rowtype {
            self.row_type(parts)
        } else {
            self.column_type(parts)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::ScalarKind;

    /// A small catalog shared by tests across the crate.
    pub(crate) const TEST_CATALOG: &str = r#"{
        "tables": [
            {"schema": "HR", "name": "EMPLOYEES", "columns": [
                {"name": "EMPLOYEE_ID", "data_type": "NUMBER(10)"},
                {"name": "SALARY", "data_type": "NUMBER(10,2)"},
                {"name": "LAST_NAME", "data_type": "VARCHAR2(50)"},
                {"name": "HIRE_DATE", "data_type": "DATE"},
                {"name": "DEPARTMENT_ID", "data_type": "NUMBER"},
                {"name": "HOME", "data_type": "ADDRESS_T", "type_owner": "HR"}
            ]},
            {"schema": "hr", "name": "departments", "columns": [
                {"name": "department_id", "data_type": "NUMBER"},
                {"name": "department_name", "data_type": "VARCHAR2(30)"}
            ]}
        ],
        "routines": [
            {"schema": "hr", "name": "calc", "kind": "function",
             "params": [{"name": "p", "data_type": "NUMBER"}], "return_type": "NUMBER"},
            {"schema": "hr", "name": "split_name", "kind": "procedure",
             "params": [
                {"name": "p_full", "data_type": "VARCHAR2"},
                {"name": "p_first", "mode": "out", "data_type": "VARCHAR2"},
                {"name": "p_last", "mode": "out", "data_type": "VARCHAR2"}
             ]},
            {"schema": "hr", "name": "log_it", "kind": "procedure",
             "params": [{"name": "p_msg", "data_type": "VARCHAR2"}]},
            {"schema": "hr", "package": "util", "name": "bump", "kind": "function",
             "params": [{"name": "n", "data_type": "NUMBER"}], "return_type": "NUMBER"},
            {"schema": "hr", "package": "util", "name": "split_pair", "kind": "procedure",
             "params": [
                {"name": "p_in", "data_type": "NUMBER"},
                {"name": "p_a", "mode": "out", "data_type": "VARCHAR2"},
                {"name": "p_b", "mode": "out", "data_type": "VARCHAR2"}
             ]}
        ],
        "object_types": [
            {"schema": "hr", "name": "address_t",
             "fields": [{"name": "city", "data_type": "VARCHAR2(30)"}],
             "methods": ["full_text"]}
        ],
        "sequences": [{"schema": "hr", "name": "emp_seq"}],
        "synonyms": [
            {"schema": "public", "name": "emp", "target_schema": "hr", "target_name": "employees"},
            {"schema": "public", "name": "util", "target_schema": "shared", "target_name": "util"},
            {"schema": "public", "name": "counter_pkg", "target_schema": "shared", "target_name": "counter_pkg"},
            {"schema": "hr", "name": "staff", "target_schema": "hr", "target_name": "emp2"},
            {"schema": "hr", "name": "emp2", "target_schema": "public", "target_name": "emp"},
            {"schema": "hr", "name": "loop_a", "target_schema": "hr", "target_name": "loop_b"},
            {"schema": "hr", "name": "loop_b", "target_schema": "hr", "target_name": "loop_a"}
        ]
    }"#;

    pub(crate) fn test_index() -> MetadataIndex {
        MetadataIndex::from_snapshot(CatalogSnapshot::from_json(TEST_CATALOG).unwrap())
    }

    #[test]
    fn names_are_folded_to_lowercase() {
        let index = test_index();
        let employees = ObjectName::new("hr", "employees");
        let salary = index.column(&employees, "salary").unwrap();
        assert_eq!(
            salary.ty,
            TypeInfo::Scalar(ScalarKind::Numeric {
                precision: Some(10),
                scale: Some(2),
            })
        );
        assert_eq!(
            index.column(&employees, "home").unwrap().ty,
            TypeInfo::Composite {
                schema: "hr".to_owned(),
                name: "address_t".to_owned(),
            }
        );
        assert!(index.is_schema("hr"));
        assert!(index.is_package("hr", "util"));
        assert!(index.has_sequence(&ObjectName::new("hr", "emp_seq")));
    }

    #[test]
    fn empty_sections_are_optional() {
        let index = MetadataIndex::from_snapshot(CatalogSnapshot::from_json("{}").unwrap());
        assert!(index.table(&ObjectName::new("hr", "employees")).is_none());
        assert!(CatalogSnapshot::from_json("{\"tables\": 7}").is_err());
    }

    #[test]
    fn synonyms_fall_back_to_public() {
        let index = test_index();
        assert_eq!(
            index.resolve_synonym("sales", "emp"),
            Some(ObjectName::new("hr", "employees"))
        );
        assert_eq!(index.resolve_synonym("sales", "nothing"), None);
    }

    #[test]
    fn synonym_chains_are_followed() {
        let index = test_index();
        assert_eq!(
            index.resolve_synonym("hr", "staff"),
            Some(ObjectName::new("hr", "employees"))
        );
        assert_eq!(
            index.resolve_table("hr", &["staff".to_owned()]),
            Some(ObjectName::new("hr", "employees"))
        );
    }

    #[test]
    fn synonym_cycles_are_unresolved() {
        let index = test_index();
        assert_eq!(index.resolve_synonym("hr", "loop_a"), None);
    }

    #[test]
    fn procedure_result_types_follow_out_params() {
        let index = test_index();
        let split = index.routine("hr", None, "split_name").unwrap();
        assert!(split.has_out_params());
        match split.result_type() {
            TypeInfo::Record(record) => {
                let names = record.fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
                assert_eq!(names, vec!["p_first", "p_last"]);
            }
            other => panic!("expected a record, got {}", other),
        }
        let log_it = index.routine("hr", None, "log_it").unwrap();
        assert_eq!(log_it.result_type(), TypeInfo::Null);
        let bump = index.routine("hr", Some("util"), "bump").unwrap();
        assert_eq!(bump.result_type(), TypeInfo::NUMERIC);
    }

    #[test]
    fn anchored_types_resolve_through_the_catalog() {
        let index = test_index();
        let resolver = MetadataTypeResolver {
            index: &index,
            schema: "hr",
        };
        let column = resolver
            .anchored_type(&["employees".to_owned(), "last_name".to_owned()], false)
            .unwrap();
        assert_eq!(column.pg_name, "hr.employees.last_name%TYPE");
        assert_eq!(column.info, TypeInfo::TEXT);
        let row = resolver
            .anchored_type(&["emp".to_owned()], true)
            .unwrap();
        assert_eq!(row.pg_name, "hr.employees%ROWTYPE");
        assert_eq!(
            resolver.object_type(&["address_t".to_owned()]),
            Some(ObjectName::new("hr", "address_t"))
        );
    }
}
