//! A basic type system for PL/SQL, as seen from PL/pgSQL.
//!
//! Every expression gets a [`TypeInfo`]. Most are scalars, but we also have
//! references to user-defined object types, anonymous records (from
//! `%ROWTYPE` or cursor `FOR` loops), and two special cases: `NULL`, which
//! fits anywhere, and `Unknown`, which means we couldn't work it out.
//!
//! Built-in functions are described using a small declaration language, so
//! that we can write things like `NVL = Fn<?T>(?T, ?T) -> ?T` and have
//! unification work out the result type.

use std::{collections::BTreeMap, fmt};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    ast::{DataType, NamedType},
    errors::{format_err, Result, SourceError},
    known_files::{FileId, KnownFiles},
    tokenizer::{Span, Spanned},
    unification::{UnificationTable, Unify},
    util::is_simple_ident,
};

/// The name of a schema object, in canonical form.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObjectName {
    pub schema: String,
    pub name: String,
}

impl ObjectName {
    /// Create a new object name.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A scalar type.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ScalarKind {
    Integer,
    Numeric {
        precision: Option<u32>,
        scale: Option<i32>,
    },
    Float,
    Double,
    Text,
    Date,
    Timestamp,
    TimestampTz,
    Interval,
    Boolean,
    Binary,
    RefCursor,
    Json,
    Xml,
}

impl ScalarKind {
    /// An unconstrained `NUMERIC`.
    pub const NUMERIC: ScalarKind = ScalarKind::Numeric {
        precision: None,
        scale: None,
    };

    /// Rank in the numeric widening chain, if this is a number.
    fn numeric_rank(self) -> Option<u8> {
        match self {
            ScalarKind::Integer => Some(0),
            ScalarKind::Numeric { .. } => Some(1),
            ScalarKind::Float => Some(2),
            ScalarKind::Double => Some(3),
            _ => None,
        }
    }

    /// Rank in the date widening chain, if this is a date or timestamp.
    fn date_rank(self) -> Option<u8> {
        match self {
            ScalarKind::Date => Some(0),
            ScalarKind::Timestamp => Some(1),
            ScalarKind::TimestampTz => Some(2),
            _ => None,
        }
    }

    /// Is this a number?
    pub fn is_numeric(self) -> bool {
        self.numeric_rank().is_some()
    }

    /// Is this a date or timestamp?
    pub fn is_date_like(self) -> bool {
        self.date_rank().is_some()
    }

    /// Are these the same kind, ignoring precision and scale?
    pub fn same_kind(self, other: ScalarKind) -> bool {
        match (self, other) {
            (ScalarKind::Numeric { .. }, ScalarKind::Numeric { .. }) => true,
            (a, b) => a == b,
        }
    }

    /// Can a value of this kind be passed where `target` is expected, using
    /// only widening conversions?
    pub fn widens_to(self, target: ScalarKind) -> bool {
        if self.same_kind(target) {
            return true;
        }
        match (self.numeric_rank(), target.numeric_rank()) {
            (Some(a), Some(b)) => return a <= b,
            (Some(_), None) | (None, Some(_)) => return false,
            _ => {}
        }
        match (self.date_rank(), target.date_rank()) {
            (Some(a), Some(b)) => a <= b,
            _ => false,
        }
    }

    /// The smallest kind that can hold both `self` and `other`.
    pub fn common_supertype(self, other: ScalarKind) -> Option<ScalarKind> {
        if self == other {
            return Some(self);
        }
        if self.same_kind(other) {
            return Some(ScalarKind::NUMERIC);
        }
        if let (Some(a), Some(b)) = (self.numeric_rank(), other.numeric_rank()) {
            return Some(if a >= b { self } else { other });
        }
        if let (Some(a), Some(b)) = (self.date_rank(), other.date_rank()) {
            return Some(if a >= b { self } else { other });
        }
        None
    }

    /// The PL/pgSQL spelling of this type.
    pub fn pg_name(self) -> String {
        match self {
            ScalarKind::Integer => "integer".to_owned(),
            ScalarKind::Numeric {
                precision: Some(p),
                scale: Some(s),
            } => format!("numeric({},{})", p, s),
            ScalarKind::Numeric {
                precision: Some(p),
                scale: None,
            } => format!("numeric({})", p),
            ScalarKind::Numeric { .. } => "numeric".to_owned(),
            ScalarKind::Float => "real".to_owned(),
            ScalarKind::Double => "double precision".to_owned(),
            ScalarKind::Text => "text".to_owned(),
            // Oracle `DATE` carries a time of day.
            ScalarKind::Date | ScalarKind::Timestamp => "timestamp".to_owned(),
            ScalarKind::TimestampTz => "timestamptz".to_owned(),
            ScalarKind::Interval => "interval".to_owned(),
            ScalarKind::Boolean => "boolean".to_owned(),
            ScalarKind::Binary => "bytea".to_owned(),
            ScalarKind::RefCursor => "refcursor".to_owned(),
            ScalarKind::Json => "jsonb".to_owned(),
            ScalarKind::Xml => "xml".to_owned(),
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarKind::Integer => write!(f, "INTEGER"),
            ScalarKind::Numeric {
                precision: Some(p),
                scale: Some(s),
            } => write!(f, "NUMERIC({},{})", p, s),
            ScalarKind::Numeric {
                precision: Some(p),
                scale: None,
            } => write!(f, "NUMERIC({})", p),
            ScalarKind::Numeric { .. } => write!(f, "NUMERIC"),
            ScalarKind::Float => write!(f, "FLOAT"),
            ScalarKind::Double => write!(f, "DOUBLE"),
            ScalarKind::Text => write!(f, "TEXT"),
            ScalarKind::Date => write!(f, "DATE"),
            ScalarKind::Timestamp => write!(f, "TIMESTAMP"),
            ScalarKind::TimestampTz => write!(f, "TIMESTAMPTZ"),
            ScalarKind::Interval => write!(f, "INTERVAL"),
            ScalarKind::Boolean => write!(f, "BOOLEAN"),
            ScalarKind::Binary => write!(f, "BINARY"),
            ScalarKind::RefCursor => write!(f, "REFCURSOR"),
            ScalarKind::Json => write!(f, "JSON"),
            ScalarKind::Xml => write!(f, "XML"),
        }
    }
}

/// An anonymous record, with named fields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordType {
    /// The table this record was derived from, if any.
    pub table: Option<ObjectName>,
    /// Our fields, in order.
    pub fields: Vec<RecordField>,
    /// Declared with `TYPE ... IS RECORD`. PostgreSQL has no local
    /// composite types, so these are stored as `jsonb` objects.
    pub jsonb: bool,
}

impl RecordType {
    /// Look up a field by canonical name.
    pub fn field(&self, name: &str) -> Option<&TypeInfo> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.ty)
    }
}

/// A record field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordField {
    pub name: String,
    pub ty: TypeInfo,
}

/// The resolved semantic type of an expression.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum TypeInfo {
    /// We could not work out the type.
    #[default]
    Unknown,
    /// The `NULL` literal, which is compatible with everything.
    Null,
    /// A scalar value.
    Scalar(ScalarKind),
    /// A user-defined object type.
    Composite { schema: String, name: String },
    /// An anonymous record.
    Record(RecordType),
}

impl TypeInfo {
    /// The `BOOLEAN` type. We use this a lot.
    pub const BOOLEAN: TypeInfo = TypeInfo::Scalar(ScalarKind::Boolean);

    /// The `TEXT` type.
    pub const TEXT: TypeInfo = TypeInfo::Scalar(ScalarKind::Text);

    /// An unconstrained `NUMERIC`.
    pub const NUMERIC: TypeInfo = TypeInfo::Scalar(ScalarKind::NUMERIC);

    /// Get our scalar kind, if we have one.
    pub fn scalar(&self) -> Option<ScalarKind> {
        match self {
            TypeInfo::Scalar(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Is this a date or timestamp?
    pub fn is_date_like(&self) -> bool {
        self.scalar().map_or(false, ScalarKind::is_date_like)
    }

    /// Is this a number?
    pub fn is_numeric(&self) -> bool {
        self.scalar().map_or(false, ScalarKind::is_numeric)
    }

    /// Is this known to be a particular type? `NULL` and `Unknown` are not.
    pub fn is_known(&self) -> bool {
        !matches!(self, TypeInfo::Unknown | TypeInfo::Null)
    }

    /// The smallest type that can hold values of both `self` and `other`.
    /// `Unknown` absorbs everything, and `NULL` fits anywhere.
    pub fn common_supertype(&self, other: &TypeInfo) -> Option<TypeInfo> {
        match (self, other) {
            (TypeInfo::Unknown, _) | (_, TypeInfo::Unknown) => Some(TypeInfo::Unknown),
            (TypeInfo::Null, t) | (t, TypeInfo::Null) => Some(t.clone()),
            (TypeInfo::Scalar(a), TypeInfo::Scalar(b)) => {
                a.common_supertype(*b).map(TypeInfo::Scalar)
            }
            (a, b) if a == b => Some(a.clone()),
            _ => None,
        }
    }

    /// The PL/pgSQL spelling of this type, if it has one we can write down.
    pub fn pg_name(&self) -> Option<String> {
        match self {
            TypeInfo::Scalar(kind) => Some(kind.pg_name()),
            TypeInfo::Composite { schema, name } => Some(format!("{}.{}", schema, name)),
            TypeInfo::Record(record) if record.jsonb => Some("jsonb".to_owned()),
            TypeInfo::Record(record) => match &record.table {
                Some(table) => Some(format!("{}%ROWTYPE", table)),
                None => Some("RECORD".to_owned()),
            },
            TypeInfo::Unknown | TypeInfo::Null => None,
        }
    }

    /// Build a type from a catalog type name like `NUMBER(10,2)` or
    /// `TIMESTAMP(6) WITH TIME ZONE`. `type_owner` is set for user-defined
    /// types.
    pub fn from_catalog(data_type: &str, type_owner: Option<&str>) -> TypeInfo {
        static ARGS: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"\(([^)]*)\)").expect("constant regex should be valid")
        });

        let args: Vec<Option<i64>> = match ARGS.captures(data_type) {
            Some(cap) => cap[1]
                .split(',')
                .map(|a| a.split_whitespace().next().and_then(|a| a.parse().ok()))
                .collect(),
            None => vec![],
        };
        let bare = ARGS.replace_all(data_type, " ");
        let name = bare
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        match builtin_scalar(&name, &args) {
            Some(kind) => TypeInfo::Scalar(kind),
            None => match type_owner {
                Some(owner) => TypeInfo::Composite {
                    schema: owner.to_lowercase(),
                    name: name.to_lowercase(),
                },
                None => TypeInfo::Unknown,
            },
        }
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeInfo::Unknown => write!(f, "UNKNOWN"),
            TypeInfo::Null => write!(f, "NULL"),
            TypeInfo::Scalar(kind) => write!(f, "{}", kind),
            TypeInfo::Composite { schema, name } => write!(f, "{}.{}", schema, name),
            TypeInfo::Record(record) => {
                write!(f, "RECORD<")?;
                for (i, field) in record.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", field.name, field.ty)?;
                }
                write!(f, ">")
            }
        }
    }
}

/// Map an uppercase PL/SQL type name (with any trailing words, but without
/// arguments) to a scalar kind.
pub fn builtin_scalar(name: &str, args: &[Option<i64>]) -> Option<ScalarKind> {
    let arg = |i: usize| args.get(i).copied().flatten();
    Some(match name {
        "NUMBER" | "DECIMAL" | "NUMERIC" | "DEC" => ScalarKind::Numeric {
            precision: arg(0).and_then(|p| u32::try_from(p).ok()),
            scale: arg(1).and_then(|s| i32::try_from(s).ok()),
        },
        "PLS_INTEGER" | "BINARY_INTEGER" | "INTEGER" | "INT" | "SMALLINT" | "NATURAL"
        | "NATURALN" | "POSITIVE" | "POSITIVEN" | "SIGNTYPE" | "SIMPLE_INTEGER" => {
            ScalarKind::Integer
        }
        "BINARY_FLOAT" | "FLOAT" | "REAL" => ScalarKind::Float,
        "BINARY_DOUBLE" | "DOUBLE PRECISION" => ScalarKind::Double,
        "VARCHAR2" | "VARCHAR" | "NVARCHAR2" | "CHAR" | "NCHAR" | "CLOB" | "NCLOB" | "LONG"
        | "STRING" | "CHARACTER" | "CHARACTER VARYING" => ScalarKind::Text,
        "RAW" | "LONG RAW" | "BLOB" => ScalarKind::Binary,
        "DATE" => ScalarKind::Date,
        "TIMESTAMP" => ScalarKind::Timestamp,
        "TIMESTAMP WITH TIME ZONE" | "TIMESTAMP WITH LOCAL TIME ZONE" => ScalarKind::TimestampTz,
        "BOOLEAN" => ScalarKind::Boolean,
        "SYS_REFCURSOR" => ScalarKind::RefCursor,
        "JSON" => ScalarKind::Json,
        "XMLTYPE" | "SYS.XMLTYPE" => ScalarKind::Xml,
        n if n.starts_with("INTERVAL ") => ScalarKind::Interval,
        _ => return None,
    })
}

/// Map a declared type with no anchors to a scalar kind.
pub fn named_scalar(named: &NamedType) -> Option<ScalarKind> {
    builtin_scalar(&named.uppercase_name(), &named.int_args())
}

/// A declared type, resolved.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedType {
    /// The semantic type.
    pub info: TypeInfo,
    /// How to write this type in PL/pgSQL.
    pub pg_name: String,
}

impl ResolvedType {
    /// A resolved type with the default PL/pgSQL spelling.
    pub fn from_info(info: TypeInfo) -> Self {
        let pg_name = info.pg_name().unwrap_or_else(|| "text".to_owned());
        Self { info, pg_name }
    }
}

/// Look up the names a declared type may refer to.
pub trait TypeNameResolver {
    /// Find a user-defined object type by (canonical) name parts.
    fn object_type(&self, parts: &[String]) -> Option<ObjectName>;

    /// Resolve `parts%TYPE` or `parts%ROWTYPE`.
    fn anchored_type(&self, parts: &[String], rowtype: bool) -> Option<ResolvedType>;

    /// Find a type declared in the routine itself.
    fn local_type(&self, _parts: &[String]) -> Option<ResolvedType> {
        None
    }
}

/// Resolve a declared type. Names we don't recognize are lowercased and
/// passed through, with an unknown semantic type.
pub fn resolve_data_type(data_type: &DataType, resolver: &dyn TypeNameResolver) -> ResolvedType {
    match data_type {
        DataType::Named(named) => {
            if let Some(kind) = named_scalar(named) {
                return ResolvedType {
                    info: TypeInfo::Scalar(kind),
                    pg_name: kind.pg_name(),
                };
            }
            let parts = named.name.canonical_parts();
            if let Some(local) = resolver.local_type(&parts) {
                return local;
            }
            match resolver.object_type(&parts) {
                Some(object) => ResolvedType {
                    pg_name: object.to_string(),
                    info: TypeInfo::Composite {
                        schema: object.schema,
                        name: object.name,
                    },
                },
                None => ResolvedType {
                    info: TypeInfo::Unknown,
                    pg_name: parts.join("."),
                },
            }
        }
        DataType::Anchored(anchored) => {
            let parts = anchored.target.canonical_parts();
            let rowtype = anchored.is_rowtype();
            resolver
                .anchored_type(&parts, rowtype)
                .unwrap_or_else(|| ResolvedType {
                    info: TypeInfo::Unknown,
                    pg_name: format!(
                        "{}%{}",
                        parts.join("."),
                        if rowtype { "ROWTYPE" } else { "TYPE" }
                    ),
                })
        }
    }
}

/// Result type of an arithmetic operator, or `None` if the operands are
/// incompatible.
pub fn arithmetic_result(op: ArithmeticOp, left: &TypeInfo, right: &TypeInfo) -> Option<TypeInfo> {
    use ScalarKind as K;

    let (l, r) = match (left, right) {
        (TypeInfo::Null, _) | (_, TypeInfo::Null) => return Some(TypeInfo::Null),
        (TypeInfo::Unknown, _) | (_, TypeInfo::Unknown) => return Some(TypeInfo::Unknown),
        (TypeInfo::Scalar(l), TypeInfo::Scalar(r)) => (*l, *r),
        _ => return None,
    };
    let kind = match op {
        ArithmeticOp::Concat => K::Text,
        ArithmeticOp::Pow if l.is_numeric() && r.is_numeric() => K::NUMERIC,
        ArithmeticOp::Div if l.is_numeric() && r.is_numeric() => {
            match l.common_supertype(r)? {
                K::Integer => K::NUMERIC,
                other if other.same_kind(K::NUMERIC) => K::NUMERIC,
                other => other,
            }
        }
        ArithmeticOp::Add | ArithmeticOp::Sub | ArithmeticOp::Mul
            if l.is_numeric() && r.is_numeric() =>
        {
            match l.common_supertype(r)? {
                other if other.same_kind(K::NUMERIC) => K::NUMERIC,
                other => other,
            }
        }
        ArithmeticOp::Add if l.is_date_like() && (r.is_numeric() || r == K::Interval) => l,
        ArithmeticOp::Add if r.is_date_like() && (l.is_numeric() || l == K::Interval) => r,
        ArithmeticOp::Sub if l.is_date_like() && (r.is_numeric() || r == K::Interval) => l,
        ArithmeticOp::Sub if l.is_date_like() && r.is_date_like() => K::NUMERIC,
        ArithmeticOp::Add | ArithmeticOp::Sub if l == K::Interval && r == K::Interval => {
            K::Interval
        }
        _ => return None,
    };
    Some(TypeInfo::Scalar(kind))
}

/// Operators which compute a new value, as opposed to comparisons.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
}

/// A type variable.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TypeVar {
    name: String,
}

impl TypeVar {
    /// Create a new type variable.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Self::new_helper(name.into())
    }

    /// Helper for `new` that has no type parameter, and therefore only gets
    /// compiled once.
    fn new_helper(name: String) -> Result<Self> {
        if !is_simple_ident(&name) {
            return Err(format_err!("invalid type variable name: {}", name));
        }
        if !name.starts_with(|c: char| c.is_ascii_uppercase()) {
            return Err(format_err!(
                "type variable name must start with an uppercase letter: {}",
                name
            ));
        }
        Ok(Self { name })
    }
}

impl fmt::Display for TypeVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.name)
    }
}

/// A parameter or return type in a built-in function signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ArgType {
    /// A specific scalar kind.
    Scalar(ScalarKind),
    /// Anything at all. Returning `ANY` produces `Unknown`.
    Any,
    /// A type variable.
    Var(TypeVar),
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgType::Scalar(kind) => write!(f, "{}", kind),
            ArgType::Any => write!(f, "ANY"),
            ArgType::Var(var) => write!(f, "{}", var),
        }
    }
}

/// How strictly should we match arguments against parameters?
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatchMode {
    /// Only identical kinds match. `NULL` matches anything.
    Exact,
    /// Widening conversions are allowed, and `Unknown` matches anything.
    Widening,
}

/// A function signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FunctionSignature {
    pub type_vars: Vec<TypeVar>,
    pub params: Vec<ArgType>,
    pub rest_params: Option<ArgType>,
    pub return_type: ArgType,
}

impl FunctionSignature {
    /// Try to match this signature against argument types. Returns the
    /// result type, or `None` if the arguments don't fit.
    pub fn match_args(
        &self,
        args: &[TypeInfo],
        mode: MatchMode,
        spanned: &dyn Spanned,
    ) -> Result<Option<TypeInfo>> {
        if args.len() < self.params.len()
            || (self.rest_params.is_none() && args.len() > self.params.len())
        {
            return Ok(None);
        }
        let mut table = UnificationTable::default();
        for var in &self.type_vars {
            table.declare(var.clone(), spanned)?;
        }
        let params = self
            .params
            .iter()
            .chain(self.rest_params.iter().cycle())
            .zip(args);
        for (param, arg) in params {
            if param.unify(arg, mode, &mut table, spanned)?.is_none() {
                return Ok(None);
            }
        }
        Ok(Some(self.return_type.resolve(&table, spanned)?))
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fn")?;
        if !self.type_vars.is_empty() {
            write!(f, "<")?;
            for (i, type_var) in self.type_vars.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", type_var)?;
            }
            write!(f, ">")?;
        }
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        if let Some(rest_params) = &self.rest_params {
            if !self.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "..{}", rest_params)?;
        }
        write!(f, ") -> {}", self.return_type)
    }
}

/// A function type. Note that functions may have multiple signatures.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FunctionType {
    pub signatures: Vec<FunctionSignature>,
}

impl FunctionType {
    /// Pick an overload and compute the result type.
    ///
    /// We first look for an exact match, in declaration order. Failing that,
    /// we allow widening. If several widened overloads match and they
    /// disagree about the result, we only pick the first one when every
    /// argument type was known.
    ///
    /// Returns `None` if no overload accepts these arguments.
    pub fn return_type_for(
        &self,
        args: &[TypeInfo],
        spanned: &dyn Spanned,
    ) -> Result<Option<TypeInfo>> {
        for sig in &self.signatures {
            if let Some(ty) = sig.match_args(args, MatchMode::Exact, spanned)? {
                return Ok(Some(ty));
            }
        }
        let mut candidates = vec![];
        for sig in &self.signatures {
            if let Some(ty) = sig.match_args(args, MatchMode::Widening, spanned)? {
                if !candidates.contains(&ty) {
                    candidates.push(ty);
                }
            }
        }
        match candidates.len() {
            0 => Ok(None),
            1 => Ok(candidates.pop()),
            _ if args.iter().any(|a| *a == TypeInfo::Unknown) => Ok(Some(TypeInfo::Unknown)),
            _ => Ok(Some(candidates.swap_remove(0))),
        }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, sig) in self.signatures.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", sig)?;
        }
        Ok(())
    }
}

/// Built-in function declarations, keyed by uppercase name. Zero-argument
/// entries also serve as pseudo-columns like `SYSDATE`.
static BUILT_IN_FUNCTIONS: &str = "
-- Pseudo-columns.
CURRENT_DATE = Fn() -> DATE;
CURRENT_TIMESTAMP = Fn() -> TIMESTAMPTZ;
LOCALTIMESTAMP = Fn() -> TIMESTAMP;
ROWNUM = Fn() -> INTEGER;
SQLCODE = Fn() -> INTEGER;
SQLERRM = Fn() -> TEXT | Fn(INTEGER) -> TEXT;
SYSDATE = Fn() -> DATE;
SYSTIMESTAMP = Fn() -> TIMESTAMPTZ;
USER = Fn() -> TEXT;

-- Numbers.
ABS = Fn(INTEGER) -> INTEGER | Fn(NUMERIC) -> NUMERIC | Fn(FLOAT) -> FLOAT | Fn(DOUBLE) -> DOUBLE;
CEIL = Fn(INTEGER) -> INTEGER | Fn(NUMERIC) -> NUMERIC | Fn(DOUBLE) -> DOUBLE;
FLOOR = Fn(INTEGER) -> INTEGER | Fn(NUMERIC) -> NUMERIC | Fn(DOUBLE) -> DOUBLE;
MOD = Fn(INTEGER, INTEGER) -> INTEGER | Fn(NUMERIC, NUMERIC) -> NUMERIC;
POWER = Fn(NUMERIC, NUMERIC) -> NUMERIC | Fn(DOUBLE, DOUBLE) -> DOUBLE;
ROUND = Fn(INTEGER) -> INTEGER | Fn(NUMERIC) -> NUMERIC | Fn(NUMERIC, INTEGER) -> NUMERIC
    | Fn(DOUBLE) -> DOUBLE | Fn(DATE) -> DATE | Fn(DATE, TEXT) -> DATE;
SIGN = Fn(NUMERIC) -> INTEGER | Fn(DOUBLE) -> INTEGER;
SQRT = Fn(NUMERIC) -> NUMERIC | Fn(DOUBLE) -> DOUBLE;
TRUNC = Fn(INTEGER) -> INTEGER | Fn(NUMERIC) -> NUMERIC | Fn(NUMERIC, INTEGER) -> NUMERIC
    | Fn(DOUBLE) -> DOUBLE
    | Fn(DATE) -> DATE | Fn(DATE, TEXT) -> DATE
    | Fn(TIMESTAMP) -> TIMESTAMP | Fn(TIMESTAMP, TEXT) -> TIMESTAMP;

-- Strings.
ASCII = Fn(TEXT) -> INTEGER;
CHR = Fn(INTEGER) -> TEXT;
CONCAT = Fn(TEXT, TEXT) -> TEXT;
INITCAP = Fn(TEXT) -> TEXT;
INSTR = Fn(TEXT, TEXT) -> INTEGER | Fn(TEXT, TEXT, INTEGER) -> INTEGER
    | Fn(TEXT, TEXT, INTEGER, INTEGER) -> INTEGER;
LENGTH = Fn(TEXT) -> INTEGER;
LOWER = Fn(TEXT) -> TEXT;
LPAD = Fn(TEXT, INTEGER) -> TEXT | Fn(TEXT, INTEGER, TEXT) -> TEXT;
LTRIM = Fn(TEXT) -> TEXT | Fn(TEXT, TEXT) -> TEXT;
REGEXP_INSTR = Fn(TEXT, TEXT) -> INTEGER;
REGEXP_LIKE = Fn(TEXT, TEXT) -> BOOLEAN | Fn(TEXT, TEXT, TEXT) -> BOOLEAN;
REGEXP_REPLACE = Fn(TEXT, TEXT) -> TEXT | Fn(TEXT, TEXT, TEXT) -> TEXT;
REGEXP_SUBSTR = Fn(TEXT, TEXT) -> TEXT;
REPLACE = Fn(TEXT, TEXT) -> TEXT | Fn(TEXT, TEXT, TEXT) -> TEXT;
RPAD = Fn(TEXT, INTEGER) -> TEXT | Fn(TEXT, INTEGER, TEXT) -> TEXT;
RTRIM = Fn(TEXT) -> TEXT | Fn(TEXT, TEXT) -> TEXT;
SUBSTR = Fn(TEXT, INTEGER) -> TEXT | Fn(TEXT, INTEGER, INTEGER) -> TEXT;
TRIM = Fn(TEXT) -> TEXT;
UPPER = Fn(TEXT) -> TEXT;

-- Conversions.
TO_CHAR = Fn(TEXT) -> TEXT | Fn(NUMERIC) -> TEXT | Fn(DOUBLE) -> TEXT
    | Fn(TIMESTAMPTZ) -> TEXT | Fn(NUMERIC, TEXT) -> TEXT | Fn(TIMESTAMPTZ, TEXT) -> TEXT;
TO_DATE = Fn(TEXT) -> DATE | Fn(TEXT, TEXT) -> DATE;
TO_NUMBER = Fn(TEXT) -> NUMERIC | Fn(NUMERIC) -> NUMERIC | Fn(TEXT, TEXT) -> NUMERIC;
TO_TIMESTAMP = Fn(TEXT) -> TIMESTAMP | Fn(TEXT, TEXT) -> TIMESTAMP;

-- Dates.
ADD_MONTHS = Fn(DATE, NUMERIC) -> DATE | Fn(TIMESTAMP, NUMERIC) -> TIMESTAMP;
LAST_DAY = Fn(DATE) -> DATE | Fn(TIMESTAMP) -> TIMESTAMP;
MONTHS_BETWEEN = Fn(TIMESTAMPTZ, TIMESTAMPTZ) -> NUMERIC;

-- NULL handling and comparisons.
COALESCE = Fn<?T>(?T, ..?T) -> ?T;
GREATEST = Fn<?T>(?T, ..?T) -> ?T;
LEAST = Fn<?T>(?T, ..?T) -> ?T;
NULLIF = Fn<?T>(?T, ?T) -> ?T;
NVL = Fn<?T>(?T, ?T) -> ?T;
NVL2 = Fn<?T>(ANY, ?T, ?T) -> ?T;

-- Aggregates and window functions.
AVG = Fn(NUMERIC) -> NUMERIC | Fn(DOUBLE) -> DOUBLE;
COUNT = Fn(ANY) -> INTEGER;
DENSE_RANK = Fn() -> INTEGER;
LISTAGG = Fn(TEXT) -> TEXT | Fn(TEXT, TEXT) -> TEXT;
MAX = Fn<?T>(?T) -> ?T;
MIN = Fn<?T>(?T) -> ?T;
RANK = Fn() -> INTEGER;
ROW_NUMBER = Fn() -> INTEGER;
SUM = Fn(INTEGER) -> INTEGER | Fn(NUMERIC) -> NUMERIC | Fn(DOUBLE) -> DOUBLE;

-- Miscellaneous.
SYS_GUID = Fn() -> BINARY;
";

/// Our built-in functions, parsed on first use.
static BUILT_INS: Lazy<BTreeMap<String, FunctionType>> = Lazy::new(|| {
    // We use a local `KnownFiles` here, since this is our own source code and
    // a parse error is a bug.
    let mut files = KnownFiles::new();
    let file_id = files.add_string("built-in functions", BUILT_IN_FUNCTIONS);
    match parse_function_decls(&files, file_id) {
        Ok(decls) => decls.into_iter().collect(),
        Err(err) => {
            err.emit(&files);
            panic!("built-in function parse error");
        }
    }
});

/// Look up a built-in function by name, ignoring case.
pub fn built_in_function(name: &str) -> Option<&'static FunctionType> {
    BUILT_INS.get(&name.to_ascii_uppercase())
}

/// Parse function declarations written in our declaration language.
pub fn parse_function_decls(
    files: &KnownFiles,
    file_id: FileId,
) -> Result<Vec<(String, FunctionType)>> {
    let source = files.source_code(file_id)?;
    type_grammar::function_decls(source).map_err(|e| {
        let span = Span::new(file_id, e.location.offset..e.location.offset);
        SourceError::parse_error("error parsing function declarations", span, e.expected).into()
    })
}

// A `peg` grammar for internal use only, used to define our built-in functions.
//
// This is much more of a "classic" parser than our main PL/SQL parser. It
// throws away whitespace, and doesn't try to record source spans.
peg::parser! {
    grammar type_grammar() for str {

        pub rule function_decls() -> Vec<(String, FunctionType)>
            = _? decls:(function_decl() ** (_? ";" _?)) _? (";" _?)? {
                decls
            }

        rule function_decl() -> (String, FunctionType)
            = name:name() _? "=" _? ty:function_type() {
                (name, ty)
            }

        rule function_type() -> FunctionType
            = signatures:(function_signature() ** (_? "|" _?)) {
                FunctionType { signatures }
            }

        rule function_signature() -> FunctionSignature
            = "Fn" type_vars:type_vars()
              "(" _? params:function_params() _? ")" _?
              "->" _? return_type:arg_type()
            {
                let (params, rest_params) = params;
                FunctionSignature {
                    type_vars,
                    params,
                    rest_params,
                    return_type,
                }
            }

        rule function_params() -> (Vec<ArgType>, Option<ArgType>)
            = params:(arg_type() ++ (_? "," _?))
              rest_params:(("," _? ".." _? rest_params:arg_type() { rest_params })?)
            {
                (params, rest_params)
            }
            / ".." _? rest_params:arg_type() { (Vec::new(), Some(rest_params)) }
            / { (Vec::new(), None) }

        rule type_vars() -> Vec<TypeVar>
            = "<" _? vars:(type_var() ** (_? "," _?)) _? ">" _? { vars }
            / { Vec::new() }

        // Longest match first.
        rule arg_type() -> ArgType
            = "ANY" { ArgType::Any }
            / "BINARY" { ArgType::Scalar(ScalarKind::Binary) }
            / "BOOLEAN" { ArgType::Scalar(ScalarKind::Boolean) }
            / "DATE" { ArgType::Scalar(ScalarKind::Date) }
            / "DOUBLE" { ArgType::Scalar(ScalarKind::Double) }
            / "FLOAT" { ArgType::Scalar(ScalarKind::Float) }
            / "INTEGER" { ArgType::Scalar(ScalarKind::Integer) }
            / "INTERVAL" { ArgType::Scalar(ScalarKind::Interval) }
            / "NUMERIC" { ArgType::Scalar(ScalarKind::NUMERIC) }
            / "TEXT" { ArgType::Scalar(ScalarKind::Text) }
            / "TIMESTAMPTZ" { ArgType::Scalar(ScalarKind::TimestampTz) }
            / "TIMESTAMP" { ArgType::Scalar(ScalarKind::Timestamp) }
            / type_var:type_var() { ArgType::Var(type_var) }

        rule name() -> String
            = name:$(['A'..='Z' | '_']['A'..='Z' | '0'..='9' | '_']*) { name.to_owned() }

        rule type_var() -> TypeVar
            = "?" name:$(['A'..='Z']['a'..='z' | 'A'..='Z' | '0'..='9' | '_']*) {?
                TypeVar::new(name).map_err(|_| "type variable")
            }

        rule _() = ([' ' | '\t' | '\r' | '\n' ] / "--" [^ '\n']* "\n")+
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn call(name: &str, args: &[TypeInfo]) -> Option<TypeInfo> {
        built_in_function(name)
            .unwrap_or_else(|| panic!("no built-in {}", name))
            .return_type_for(args, &Span::Unknown)
            .unwrap()
    }

    const INT: TypeInfo = TypeInfo::Scalar(ScalarKind::Integer);
    const DATE: TypeInfo = TypeInfo::Scalar(ScalarKind::Date);

    #[test]
    fn parse_built_in_functions() {
        assert!(built_in_function("nvl").is_some());
        assert!(built_in_function("sysdate").is_some());
    }

    #[test]
    fn overloads_prefer_exact_matches() {
        assert_eq!(call("ROUND", &[INT]), Some(INT));
        assert_eq!(call("ROUND", &[TypeInfo::NUMERIC]), Some(TypeInfo::NUMERIC));
        assert_eq!(call("ROUND", &[DATE]), Some(DATE));
        assert_eq!(
            call("ROUND", &[INT, INT]),
            Some(TypeInfo::NUMERIC),
            "integer widens to numeric"
        );
    }

    #[test]
    fn overloads_with_unknown_arguments_stay_unknown() {
        assert_eq!(call("ROUND", &[TypeInfo::Unknown]), Some(TypeInfo::Unknown));
        assert_eq!(call("LOWER", &[TypeInfo::Unknown]), Some(TypeInfo::TEXT));
    }

    #[test]
    fn type_variables_unify() {
        assert_eq!(call("NVL", &[INT, TypeInfo::NUMERIC]), Some(TypeInfo::NUMERIC));
        assert_eq!(call("NVL", &[TypeInfo::Null, DATE]), Some(DATE));
        assert_eq!(call("NVL", &[TypeInfo::TEXT, DATE]), None);
        assert_eq!(call("GREATEST", &[INT, INT, INT]), Some(INT));
    }

    #[test]
    fn catalog_type_names() {
        assert_eq!(
            TypeInfo::from_catalog("NUMBER(10,2)", None),
            TypeInfo::Scalar(ScalarKind::Numeric {
                precision: Some(10),
                scale: Some(2)
            })
        );
        assert_eq!(
            TypeInfo::from_catalog("TIMESTAMP(6) WITH TIME ZONE", None),
            TypeInfo::Scalar(ScalarKind::TimestampTz)
        );
        assert_eq!(
            TypeInfo::from_catalog("VARCHAR2(30 CHAR)", None),
            TypeInfo::TEXT
        );
        assert_eq!(
            TypeInfo::from_catalog("ADDRESS_T", Some("HR")),
            TypeInfo::Composite {
                schema: "hr".to_owned(),
                name: "address_t".to_owned()
            }
        );
    }

    #[test]
    fn arithmetic_rules() {
        use ArithmeticOp::*;
        assert_eq!(arithmetic_result(Add, &INT, &INT), Some(INT));
        assert_eq!(arithmetic_result(Div, &INT, &INT), Some(TypeInfo::NUMERIC));
        assert_eq!(arithmetic_result(Add, &DATE, &INT), Some(DATE));
        assert_eq!(arithmetic_result(Sub, &DATE, &DATE), Some(TypeInfo::NUMERIC));
        assert_eq!(
            arithmetic_result(Concat, &INT, &DATE),
            Some(TypeInfo::TEXT)
        );
        assert_eq!(arithmetic_result(Mul, &DATE, &INT), None);
        assert_eq!(arithmetic_result(Add, &TypeInfo::Null, &INT), Some(TypeInfo::Null));
    }

    #[test]
    fn pg_names() {
        assert_eq!(ScalarKind::Date.pg_name(), "timestamp");
        assert_eq!(
            ScalarKind::Numeric {
                precision: Some(10),
                scale: Some(2)
            }
            .pg_name(),
            "numeric(10,2)"
        );
    }
}
