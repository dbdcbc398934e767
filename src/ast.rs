//! Our abstract syntax tree and parser.
//!
//! Every node in this tree implements:
//!
//! - [`Spanned`]: The source span of the node, generated by
//!   `#[derive(Spanned)]`. Spans double as node identities (see
//!   [`crate::infer::NodeId`]), which is how type inference and code
//!   generation agree on which node they are talking about.
//! - [`Drive`]: Provided by the [`derive-visitor`
//!   crate](https://github.com/nikis05/derive-visitor). This provides an API to
//!   traverse the AST generically, using the [`derive_visitor::Visitor`] trait.
//!
//! The tree is never modified after parsing. Both passes only borrow it.

// Don't bother with `Box`-ing everything for now. Allow huge enum values.
#![allow(clippy::large_enum_variant)]

use derive_visitor::Drive;
use pl2pg_macros::Spanned;

use crate::{
    errors::{Result, SourceError},
    known_files::{FileId, KnownFiles},
    tokenizer::{
        tokenize_plsql, Ident, Keyword, Literal, LiteralValue, Punct, Span, Spanned, Token,
        TokenStream,
    },
};

/// None of these keywords should ever be matched as a bare identifier. We use
/// [`phf`](https://github.com/rust-phf/rust-phf), which generates "perfect hash
/// functions." These allow us to create highly optimized, read-only sets/maps
/// generated at compile time.
///
/// This is smaller than Oracle's list of reserved words. Words like `TYPE`,
/// `DATE` or `NATURAL` are commonly used as names, and the grammar can tell
/// them apart from context.
static KEYWORDS: phf::Set<&'static str> = phf::phf_set! {
    "ALL", "AND", "ANY", "AS", "ASC", "BEGIN", "BETWEEN", "BY", "CASE",
    "CLOSE", "CONSTANT", "CREATE", "CROSS", "CURSOR", "DECLARE", "DEFAULT",
    "DELETE", "DESC", "DISTINCT", "ELSE", "ELSIF", "END", "EXCEPTION",
    "EXISTS", "EXIT", "FETCH", "FOR", "FROM", "FULL", "FUNCTION", "GOTO",
    "GROUP", "HAVING", "IF", "IN", "INNER", "INSERT", "INTERSECT", "INTO",
    "IS", "JOIN", "LEFT", "LIKE", "LOOP", "MINUS", "NOT", "NULL", "OF", "ON",
    "OPEN", "OR", "ORDER", "OUT", "OUTER", "PACKAGE", "PRAGMA", "PROCEDURE",
    "RAISE", "RETURN", "RETURNING", "REVERSE", "RIGHT", "SELECT", "SET",
    "SUBTYPE", "THEN", "UNION", "UPDATE", "USING", "VALUES", "WHEN", "WHERE",
    "WHILE", "WITH",
};

/// Is `name` a reserved word?
pub fn is_reserved(name: &str) -> bool {
    KEYWORDS.contains(name.to_ascii_uppercase().as_str())
}

/// A parsed source file, containing one or more units.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct SourceFile {
    pub units: Vec<SourceUnit>,
}

/// Something that can appear at the top level of a source file.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum SourceUnit {
    Routine(RoutineDefinition),
    PackageSpec(PackageSpec),
    PackageBody(PackageBody),
}

/// `CREATE [OR REPLACE] [EDITIONABLE | NONEDITIONABLE]`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct CreateClause {
    pub create_token: Keyword,
    pub or_replace: Option<OrReplace>,
    pub editionable: Option<Keyword>,
}

/// `OR REPLACE`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct OrReplace {
    pub or_token: Keyword,
    pub replace_token: Keyword,
}

/// A dotted name, like `hr.employees` or `pkg.counter`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct QualifiedName {
    pub parts: Vec<Ident>,
}

impl QualifiedName {
    /// The canonical form of the last part.
    pub fn name(&self) -> String {
        self.parts
            .last()
            .map(|p| p.canonical_name())
            .unwrap_or_default()
    }

    /// The canonical form of the qualifier, if there is exactly one.
    pub fn qualifier(&self) -> Option<String> {
        match self.parts.as_slice() {
            [qualifier, _] => Some(qualifier.canonical_name()),
            _ => None,
        }
    }

    /// All parts, in canonical form.
    pub fn canonical_parts(&self) -> Vec<String> {
        self.parts.iter().map(|p| p.canonical_name()).collect()
    }

    /// The last identifier.
    pub fn last_ident(&self) -> Option<&Ident> {
        self.parts.last()
    }
}

/// Is this a function or a procedure?
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RoutineKind {
    Function,
    Procedure,
}

/// `FUNCTION f(a NUMBER) RETURN NUMBER DETERMINISTIC`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct RoutineHeading {
    pub kind_token: Keyword,
    #[drive(skip)]
    #[spanned(skip)]
    pub kind: RoutineKind,
    pub name: QualifiedName,
    pub params: Option<ParameterList>,
    pub return_clause: Option<ReturnClause>,
    pub options: Vec<RoutineOption>,
}

impl RoutineHeading {
    /// The parameters, or an empty slice.
    pub fn params(&self) -> &[Parameter] {
        match &self.params {
            Some(list) => &list.params,
            None => &[],
        }
    }
}

/// `(a NUMBER, b OUT VARCHAR2)`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ParameterList {
    pub paren1: Punct,
    pub params: Vec<Parameter>,
    pub paren2: Punct,
}

/// `RETURN type`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ReturnClause {
    pub return_token: Keyword,
    pub data_type: DataType,
}

/// Options after a routine heading. None of these affect translation.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum RoutineOption {
    /// `DETERMINISTIC`, `PARALLEL_ENABLE`, `RESULT_CACHE` or `PIPELINED`.
    Flag(Keyword),
    /// `AUTHID CURRENT_USER` or `AUTHID DEFINER`.
    Authid(AuthidOption),
}

/// `AUTHID CURRENT_USER`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct AuthidOption {
    pub authid_token: Keyword,
    pub who: Ident,
}

/// A standalone `CREATE FUNCTION` or `CREATE PROCEDURE`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct RoutineDefinition {
    pub create: Option<CreateClause>,
    pub heading: RoutineHeading,
    pub is_token: Keyword,
    pub body: Block,
    pub slash: Option<Punct>,
}

/// A parameter mode.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ParameterMode {
    #[default]
    In,
    Out,
    InOut,
}

/// `IN`, `OUT` or `IN OUT`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ParameterModeClause {
    pub tokens: Vec<Keyword>,
    #[drive(skip)]
    #[spanned(skip)]
    pub mode: ParameterMode,
}

/// `name [IN | OUT | IN OUT] [NOCOPY] type [:= | DEFAULT expr]`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct Parameter {
    pub name: Ident,
    pub mode_clause: Option<ParameterModeClause>,
    pub nocopy_token: Option<Keyword>,
    pub data_type: DataType,
    pub default: Option<DefaultClause>,
}

impl Parameter {
    /// The declared mode, defaulting to `IN`.
    pub fn mode(&self) -> ParameterMode {
        self.mode_clause
            .as_ref()
            .map(|m| m.mode)
            .unwrap_or_default()
    }

    /// Is this an `OUT` or `IN OUT` parameter?
    pub fn is_out(&self) -> bool {
        matches!(self.mode(), ParameterMode::Out | ParameterMode::InOut)
    }
}

/// `:= expr` or `DEFAULT expr`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct DefaultClause {
    pub token: Token,
    pub value: Expression,
}

/// A declared type.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum DataType {
    /// `NUMBER(10, 2)`, `VARCHAR2(30 CHAR)`, `TIMESTAMP WITH TIME ZONE`,
    /// `hr.address_t`.
    Named(NamedType),
    /// `employees.salary%TYPE` or `employees%ROWTYPE`.
    Anchored(AnchoredType),
}

/// A named type, with optional arguments and trailing words.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct NamedType {
    pub name: QualifiedName,
    pub args: Option<TypeArgs>,
    pub words: Vec<TypeWord>,
}

impl NamedType {
    /// The full type name in uppercase, with trailing words, for matching
    /// against built-in type names. `DOUBLE PRECISION` and `TIMESTAMP WITH
    /// LOCAL TIME ZONE` come out as written, without arguments.
    pub fn uppercase_name(&self) -> String {
        let mut name = self
            .name
            .parts
            .iter()
            .map(|p| p.name.to_ascii_uppercase())
            .collect::<Vec<_>>()
            .join(".");
        for word in &self.words {
            name.push(' ');
            name.push_str(&word.word.to_uppercase());
        }
        name
    }

    /// Integer arguments, like the `10, 2` in `NUMBER(10, 2)`. `*` is
    /// returned as `None`.
    pub fn int_args(&self) -> Vec<Option<i64>> {
        match &self.args {
            Some(args) => args.args.iter().map(|a| a.as_integer()).collect(),
            None => vec![],
        }
    }
}

/// A word following a type name, like `PRECISION` or `ZONE`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct TypeWord {
    pub word: Keyword,
    pub args: Option<TypeArgs>,
}

/// `(10, 2)` or `(30 CHAR)`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct TypeArgs {
    pub paren1: Punct,
    pub args: Vec<TypeArg>,
    pub paren2: Punct,
}

/// A single type argument. `value` is either an integer literal or `*`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct TypeArg {
    pub value: Token,
    pub semantics: Option<Keyword>,
}

impl TypeArg {
    /// Get this argument as an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match &self.value {
            Token::Literal(Literal {
                value: LiteralValue::Integer(i),
                ..
            }) => Some(*i),
            _ => None,
        }
    }
}

/// `target%TYPE` or `target%ROWTYPE`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct AnchoredType {
    pub target: QualifiedName,
    pub percent: Punct,
    pub attribute: Keyword,
}

impl AnchoredType {
    /// Is this `%ROWTYPE`?
    pub fn is_rowtype(&self) -> bool {
        self.attribute.is("ROWTYPE")
    }
}

/// A block, with optional label and declarations.
///
/// Routine bodies are blocks without a `DECLARE` keyword.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct Block {
    pub declare_token: Option<Keyword>,
    pub declarations: Vec<Declaration>,
    pub begin_token: Keyword,
    pub statements: Vec<Statement>,
    pub exception_section: Option<ExceptionSection>,
    pub end_token: Keyword,
    pub end_label: Option<Ident>,
    pub semi: Punct,
}

/// A declaration in a block or package.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum Declaration {
    Variable(VariableDeclaration),
    Cursor(CursorDeclaration),
    Exception(ExceptionDeclaration),
    Pragma(PragmaDeclaration),
    Type(TypeDeclaration),
    Subprogram(SubprogramDeclaration),
}

/// `name [CONSTANT] type [NOT NULL] [:= expr];`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct VariableDeclaration {
    pub name: Ident,
    pub constant_token: Option<Keyword>,
    pub data_type: DataType,
    pub not_null: Option<NotNull>,
    pub default: Option<DefaultClause>,
    pub semi: Punct,
}

/// `NOT NULL`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct NotNull {
    pub not_token: Keyword,
    pub null_token: Keyword,
}

/// `CURSOR c [(params)] [RETURN type] [IS query];`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct CursorDeclaration {
    pub cursor_token: Keyword,
    pub name: Ident,
    pub params: Option<ParameterList>,
    pub return_clause: Option<ReturnClause>,
    pub query: Option<CursorQuery>,
    pub semi: Punct,
}

/// `IS query`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct CursorQuery {
    pub is_token: Keyword,
    pub query: QueryExpression,
}

/// `e EXCEPTION;`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ExceptionDeclaration {
    pub name: Ident,
    pub exception_token: Keyword,
    pub semi: Punct,
}

/// `PRAGMA name [(args)];`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct PragmaDeclaration {
    pub pragma_token: Keyword,
    pub name: Ident,
    pub args: Option<CallArgs>,
    pub semi: Punct,
}

/// `TYPE t IS ...;` or `SUBTYPE t IS ...;`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct TypeDeclaration {
    pub type_token: Keyword,
    pub name: Ident,
    pub is_token: Keyword,
    pub definition: TypeDefinition,
    pub semi: Punct,
}

/// The right-hand side of a type declaration. Only records are parsed;
/// collections and subtypes stay raw tokens, because we never translate them.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum TypeDefinition {
    Record(RecordDefinition),
    Other(Vec<Token>),
}

/// `RECORD (a NUMBER, b VARCHAR2(30) := 'x')`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct RecordDefinition {
    pub record_token: Keyword,
    pub paren1: Punct,
    pub fields: Vec<RecordFieldDeclaration>,
    pub paren2: Punct,
}

/// One field of a record type.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct RecordFieldDeclaration {
    pub name: Ident,
    pub data_type: DataType,
    pub not_null: Option<NotNull>,
    pub default: Option<DefaultClause>,
}

/// A nested function or procedure, or a signature in a package spec.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct SubprogramDeclaration {
    pub heading: RoutineHeading,
    pub body: Option<SubprogramBody>,
    pub semi: Option<Punct>,
}

/// `IS block`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct SubprogramBody {
    pub is_token: Keyword,
    pub block: Block,
}

/// `EXCEPTION WHEN ... THEN ...`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ExceptionSection {
    pub exception_token: Keyword,
    pub handlers: Vec<ExceptionHandler>,
}

/// `WHEN a OR b THEN statements`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ExceptionHandler {
    pub when_token: Keyword,
    pub exceptions: Vec<QualifiedName>,
    pub then_token: Keyword,
    pub statements: Vec<Statement>,
}

/// A statement.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum Statement {
    Label(LabelStatement),
    Assignment(AssignmentStatement),
    If(IfStatement),
    Case(CaseStatement),
    Loop(LoopStatement),
    While(WhileStatement),
    ForRange(ForRangeStatement),
    ForCursor(ForCursorStatement),
    Exit(ExitStatement),
    Return(ReturnStatement),
    Null(NullStatement),
    Raise(RaiseStatement),
    Call(CallStatement),
    Select(SelectIntoStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    Open(OpenStatement),
    Fetch(FetchStatement),
    Close(CloseStatement),
    ExecuteImmediate(ExecuteImmediateStatement),
    Block(Block),
    Transaction(TransactionStatement),
    Goto(GotoStatement),
    Forall(ForallStatement),
    PipeRow(PipeRowStatement),
}

/// `<<name>>`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct LabelStatement {
    pub open: Punct,
    pub name: Ident,
    pub close: Punct,
}

/// `target := value;`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct AssignmentStatement {
    pub target: NameExpression,
    pub assign: Punct,
    pub value: Expression,
    pub semi: Punct,
}

/// `IF ... THEN ... [ELSIF ...] [ELSE ...] END IF;`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct IfStatement {
    pub if_token: Keyword,
    pub condition: Expression,
    pub then_token: Keyword,
    pub statements: Vec<Statement>,
    pub elsif_clauses: Vec<ElsifClause>,
    pub else_clause: Option<ElseClause>,
    pub end_token: Keyword,
    pub end_if_token: Keyword,
    pub semi: Punct,
}

/// `ELSIF condition THEN statements`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ElsifClause {
    pub elsif_token: Keyword,
    pub condition: Expression,
    pub then_token: Keyword,
    pub statements: Vec<Statement>,
}

/// `ELSE statements`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ElseClause {
    pub else_token: Keyword,
    pub statements: Vec<Statement>,
}

/// A simple or searched `CASE` statement.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct CaseStatement {
    pub case_token: Keyword,
    pub operand: Option<Expression>,
    pub when_clauses: Vec<CaseStatementWhen>,
    pub else_clause: Option<ElseClause>,
    pub end_token: Keyword,
    pub end_case_token: Keyword,
    pub semi: Punct,
}

/// `WHEN value THEN statements`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct CaseStatementWhen {
    pub when_token: Keyword,
    pub condition: Expression,
    pub then_token: Keyword,
    pub statements: Vec<Statement>,
}

/// The shared tail of every loop: `LOOP statements END LOOP [label];`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct LoopBody {
    pub loop_token: Keyword,
    pub statements: Vec<Statement>,
    pub end_token: Keyword,
    pub end_loop_token: Keyword,
    pub end_label: Option<Ident>,
    pub semi: Punct,
}

/// A basic `LOOP`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct LoopStatement {
    pub body: LoopBody,
}

/// `WHILE condition LOOP ... END LOOP;`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct WhileStatement {
    pub while_token: Keyword,
    pub condition: Expression,
    pub body: LoopBody,
}

/// `FOR i IN [REVERSE] a..b LOOP ... END LOOP;`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ForRangeStatement {
    pub for_token: Keyword,
    pub index: Ident,
    pub in_token: Keyword,
    pub reverse_token: Option<Keyword>,
    pub lower: Expression,
    pub dots: Punct,
    pub upper: Expression,
    pub body: LoopBody,
}

/// `FOR r IN (query) LOOP` or `FOR r IN c[(args)] LOOP`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ForCursorStatement {
    pub for_token: Keyword,
    pub record: Ident,
    pub in_token: Keyword,
    pub source: CursorSource,
    pub body: LoopBody,
}

/// What a cursor `FOR` loop iterates over.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum CursorSource {
    Query(ParenthesizedQuery),
    Named(NameExpression),
}

/// `(query)`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ParenthesizedQuery {
    pub paren1: Punct,
    pub query: Box<QueryExpression>,
    pub paren2: Punct,
}

/// `EXIT [label] [WHEN condition];` or the same with `CONTINUE`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ExitStatement {
    pub keyword: Keyword,
    pub label: Option<Ident>,
    pub when_clause: Option<WhenCondition>,
    pub semi: Punct,
}

/// `WHEN condition`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct WhenCondition {
    pub when_token: Keyword,
    pub condition: Expression,
}

/// `RETURN [value];`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ReturnStatement {
    pub return_token: Keyword,
    pub value: Option<Expression>,
    pub semi: Punct,
}

/// `NULL;`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct NullStatement {
    pub null_token: Keyword,
    pub semi: Punct,
}

/// `RAISE [exception];`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct RaiseStatement {
    pub raise_token: Keyword,
    pub exception: Option<QualifiedName>,
    pub semi: Punct,
}

/// `[CALL] name[(args)] [INTO targets];`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct CallStatement {
    pub call_token: Option<Keyword>,
    pub target: NameExpression,
    pub into_clause: Option<IntoClause>,
    pub semi: Punct,
}

/// `[BULK COLLECT] INTO a, b`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct IntoClause {
    pub bulk_collect: Option<BulkCollect>,
    pub into_token: Keyword,
    pub targets: Vec<NameExpression>,
}

/// `BULK COLLECT`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct BulkCollect {
    pub bulk_token: Keyword,
    pub collect_token: Keyword,
}

/// `SELECT ... INTO ...;`, or any other query used as a statement.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct SelectIntoStatement {
    pub query: QueryExpression,
    pub semi: Punct,
}

/// `INSERT INTO t [(cols)] VALUES (...) | query [RETURNING ...];`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct InsertStatement {
    pub insert_token: Keyword,
    pub into_token: Keyword,
    pub table: TableReference,
    pub columns: Option<ColumnList>,
    pub source: InsertSource,
    pub returning: Option<ReturningClause>,
    pub semi: Punct,
}

/// `(a, b, c)`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ColumnList {
    pub paren1: Punct,
    pub columns: Vec<Ident>,
    pub paren2: Punct,
}

/// The data inserted by an `INSERT`.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum InsertSource {
    Values(ValuesClause),
    Query(QueryExpression),
}

/// `VALUES (a, b)`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ValuesClause {
    pub values_token: Keyword,
    pub paren1: Punct,
    pub values: Vec<Expression>,
    pub paren2: Punct,
}

/// `RETURNING a, b INTO x, y`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ReturningClause {
    pub returning_token: Keyword,
    pub expressions: Vec<Expression>,
    pub into_clause: IntoClause,
}

/// `UPDATE t [alias] SET a = b [WHERE ...] [RETURNING ...];`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct UpdateStatement {
    pub update_token: Keyword,
    pub table: TableReference,
    pub alias: Option<Ident>,
    pub set_token: Keyword,
    pub assignments: Vec<SetAssignment>,
    pub where_clause: Option<DmlWhereClause>,
    pub returning: Option<ReturningClause>,
    pub semi: Punct,
}

/// `column = value`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct SetAssignment {
    pub column: QualifiedName,
    pub eq: Punct,
    pub value: Expression,
}

/// `DELETE [FROM] t [alias] [WHERE ...] [RETURNING ...];`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct DeleteStatement {
    pub delete_token: Keyword,
    pub from_token: Option<Keyword>,
    pub table: TableReference,
    pub alias: Option<Ident>,
    pub where_clause: Option<DmlWhereClause>,
    pub returning: Option<ReturningClause>,
    pub semi: Punct,
}

/// A `WHERE` clause on `UPDATE` or `DELETE`, which may also be `WHERE
/// CURRENT OF cursor`.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum DmlWhereClause {
    Condition(WhereClause),
    CurrentOf(CurrentOfClause),
}

/// `WHERE CURRENT OF c`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct CurrentOfClause {
    pub where_token: Keyword,
    pub current_token: Keyword,
    pub of_token: Keyword,
    pub cursor: Ident,
}

/// `OPEN c [(args)];` or `OPEN c FOR query | expr [USING ...];`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct OpenStatement {
    pub open_token: Keyword,
    pub cursor: Ident,
    pub args: Option<CallArgs>,
    pub for_clause: Option<OpenForClause>,
    pub semi: Punct,
}

/// `FOR query` or `FOR dynamic_sql [USING ...]`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct OpenForClause {
    pub for_token: Keyword,
    pub source: OpenForSource,
    pub using_clause: Option<UsingClause>,
}

/// What an `OPEN FOR` statement opens.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum OpenForSource {
    Query(QueryExpression),
    Dynamic(Expression),
}

/// `FETCH c INTO targets [LIMIT n];`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct FetchStatement {
    pub fetch_token: Keyword,
    pub cursor: Ident,
    pub into_clause: IntoClause,
    pub limit: Option<LimitClause>,
    pub semi: Punct,
}

/// `LIMIT n`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct LimitClause {
    pub limit_token: Keyword,
    pub value: Expression,
}

/// `CLOSE c;`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct CloseStatement {
    pub close_token: Keyword,
    pub cursor: Ident,
    pub semi: Punct,
}

/// `EXECUTE IMMEDIATE sql [INTO targets] [USING args];`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ExecuteImmediateStatement {
    pub execute_token: Keyword,
    pub immediate_token: Keyword,
    pub sql: Expression,
    pub into_clause: Option<IntoClause>,
    pub using_clause: Option<UsingClause>,
    pub semi: Punct,
}

/// `USING [IN] a, b`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct UsingClause {
    pub using_token: Keyword,
    pub args: Vec<UsingArg>,
}

/// A single bind argument.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct UsingArg {
    pub mode_clause: Option<ParameterModeClause>,
    pub value: Expression,
}

/// `COMMIT`, `ROLLBACK` or `SAVEPOINT`, with whatever follows.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct TransactionStatement {
    pub keyword: Keyword,
    pub rest: Vec<Token>,
    pub semi: Punct,
}

/// `GOTO label;`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct GotoStatement {
    pub goto_token: Keyword,
    pub label: Ident,
    pub semi: Punct,
}

/// `FORALL i IN a..b statement`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ForallStatement {
    pub forall_token: Keyword,
    pub index: Ident,
    pub in_token: Keyword,
    pub lower: Expression,
    pub dots: Punct,
    pub upper: Expression,
    pub statement: Box<Statement>,
}

/// `PIPE ROW (value);`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct PipeRowStatement {
    pub pipe_token: Keyword,
    pub row_token: Keyword,
    pub paren1: Punct,
    pub value: Expression,
    pub paren2: Punct,
    pub semi: Punct,
}

/// An expression.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum Expression {
    Literal(Literal),
    Bool(Keyword),
    Null(Keyword),
    Name(NameExpression),
    Unary(UnaryExpression),
    Binary(BinaryExpression),
    IsNull(IsNullExpression),
    Like(LikeExpression),
    Between(BetweenExpression),
    In(InExpression),
    Exists(ExistsExpression),
    Case(CaseExpression),
    Parens(ParenExpression),
    Subquery(ParenthesizedQuery),
    Cast(CastExpression),
    Extract(ExtractExpression),
    DateLiteral(DateLiteral),
    IntervalLiteral(IntervalLiteral),
    BindVariable(BindVariable),
    /// `*`, as in `COUNT(*)`.
    Star(Punct),
}

impl Expression {
    /// Construct a binary expression.
    fn binary(left: Expression, op_token: Token, op: BinaryOp, right: Expression) -> Expression {
        Expression::Binary(BinaryExpression {
            left: Box::new(left),
            op_token,
            op,
            right: Box::new(right),
        })
    }

    /// Construct a unary expression.
    fn unary(op_token: Token, op: UnaryOp, operand: Expression) -> Expression {
        Expression::Unary(UnaryExpression {
            op_token,
            op,
            operand: Box::new(operand),
        })
    }

    /// If this is a string literal, return its value.
    pub fn as_string_literal(&self) -> Option<&str> {
        match self {
            Expression::Literal(Literal {
                value: LiteralValue::String(s),
                ..
            }) => Some(s),
            _ => None,
        }
    }

    /// If this is an integer literal, possibly negated, return its value.
    pub fn as_integer_literal(&self) -> Option<i64> {
        match self {
            Expression::Literal(Literal {
                value: LiteralValue::Integer(i),
                ..
            }) => Some(*i),
            Expression::Unary(UnaryExpression {
                op: UnaryOp::Neg,
                operand,
                ..
            }) => operand.as_integer_literal().map(|i| -i),
            Expression::Parens(p) => p.expression.as_integer_literal(),
            _ => None,
        }
    }
}

/// A unary operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

/// `NOT x`, `-x` or `+x`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct UnaryExpression {
    pub op_token: Token,
    #[drive(skip)]
    #[spanned(skip)]
    pub op: UnaryOp,
    pub operand: Box<Expression>,
}

/// A binary operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    /// Is this a comparison operator?
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    /// Is this `AND` or `OR`?
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    fn from_punct(s: &str) -> Option<BinaryOp> {
        Some(match s {
            "=" => BinaryOp::Eq,
            "<>" | "!=" | "^=" | "~=" => BinaryOp::NotEq,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::LtEq,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::GtEq,
            "||" => BinaryOp::Concat,
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "**" => BinaryOp::Pow,
            _ => return None,
        })
    }
}

/// `left op right`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct BinaryExpression {
    pub left: Box<Expression>,
    pub op_token: Token,
    #[drive(skip)]
    #[spanned(skip)]
    pub op: BinaryOp,
    pub right: Box<Expression>,
}

/// `x IS [NOT] NULL`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct IsNullExpression {
    pub operand: Box<Expression>,
    pub is_token: Keyword,
    pub not_token: Option<Keyword>,
    pub null_token: Keyword,
}

/// `x [NOT] LIKE pattern [ESCAPE c]`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct LikeExpression {
    pub operand: Box<Expression>,
    pub not_token: Option<Keyword>,
    pub like_token: Keyword,
    pub pattern: Box<Expression>,
    pub escape: Option<EscapeClause>,
}

/// `ESCAPE c`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct EscapeClause {
    pub escape_token: Keyword,
    pub value: Box<Expression>,
}

/// `x [NOT] BETWEEN low AND high`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct BetweenExpression {
    pub operand: Box<Expression>,
    pub not_token: Option<Keyword>,
    pub between_token: Keyword,
    pub low: Box<Expression>,
    pub and_token: Keyword,
    pub high: Box<Expression>,
}

/// `x [NOT] IN (list | query)`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct InExpression {
    pub operand: Box<Expression>,
    pub not_token: Option<Keyword>,
    pub in_token: Keyword,
    pub paren1: Punct,
    pub list: InList,
    pub paren2: Punct,
}

/// The right-hand side of `IN`.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum InList {
    Query(Box<QueryExpression>),
    Values(Vec<Expression>),
}

/// `EXISTS (query)`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ExistsExpression {
    pub exists_token: Keyword,
    pub query: ParenthesizedQuery,
}

/// A simple or searched `CASE` expression.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct CaseExpression {
    pub case_token: Keyword,
    pub operand: Option<Box<Expression>>,
    pub when_clauses: Vec<CaseWhen>,
    pub else_clause: Option<CaseElse>,
    pub end_token: Keyword,
}

/// `WHEN x THEN y`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct CaseWhen {
    pub when_token: Keyword,
    pub condition: Expression,
    pub then_token: Keyword,
    pub result: Expression,
}

/// `ELSE y`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct CaseElse {
    pub else_token: Keyword,
    pub result: Box<Expression>,
}

/// `(expr)`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ParenExpression {
    pub paren1: Punct,
    pub expression: Box<Expression>,
    pub paren2: Punct,
}

/// `CAST(x AS type)`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct CastExpression {
    pub cast_token: Keyword,
    pub paren1: Punct,
    pub value: Box<Expression>,
    pub as_token: Keyword,
    pub data_type: DataType,
    pub paren2: Punct,
}

/// `EXTRACT(field FROM x)`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ExtractExpression {
    pub extract_token: Keyword,
    pub paren1: Punct,
    pub field: Ident,
    pub from_token: Keyword,
    pub value: Box<Expression>,
    pub paren2: Punct,
}

/// `DATE '2020-01-31'` or `TIMESTAMP '2020-01-31 10:00:00'`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct DateLiteral {
    pub keyword: Keyword,
    pub value: Literal,
}

/// `INTERVAL '1' DAY`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct IntervalLiteral {
    pub interval_token: Keyword,
    pub value: Literal,
    pub words: Vec<TypeWord>,
}

/// `:name` or `:1`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct BindVariable {
    pub colon: Punct,
    pub name: Token,
}

/// A dotted name, possibly with argument lists, a cursor attribute, an
/// analytic `OVER` clause or an Oracle `(+)` outer join marker. This covers
/// variables, record fields, columns, function and procedure calls, package
/// members, sequences and type methods. Type inference decides which.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct NameExpression {
    pub parts: Vec<NamePart>,
    pub attribute: Option<CursorAttribute>,
    pub over_clause: Option<OverClause>,
    pub outer_join: Option<OuterJoinMarker>,
}

impl NameExpression {
    /// The canonical names of all parts.
    pub fn canonical_parts(&self) -> Vec<String> {
        self.parts.iter().map(|p| p.ident.canonical_name()).collect()
    }

    /// If this is a single bare identifier, return it.
    pub fn as_simple(&self) -> Option<&Ident> {
        match self.parts.as_slice() {
            [part]
                if part.args.is_none()
                    && self.attribute.is_none()
                    && self.over_clause.is_none()
                    && self.outer_join.is_none() =>
            {
                Some(&part.ident)
            }
            _ => None,
        }
    }

    /// The argument list of the last part, if it has one.
    pub fn call_args(&self) -> Option<&CallArgs> {
        self.parts.last().and_then(|p| p.args.as_ref())
    }

    /// Do any parts except the last have argument lists? We don't support
    /// things like `f(x).field` or `arr(i).field`.
    pub fn has_inner_args(&self) -> bool {
        self.parts.len() > 1
            && self.parts[..self.parts.len() - 1]
                .iter()
                .any(|p| p.args.is_some())
    }
}

/// One component of a dotted name.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct NamePart {
    pub ident: Ident,
    pub args: Option<CallArgs>,
}

/// `(a, b => c)`, with an optional `DISTINCT` for aggregates.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct CallArgs {
    pub paren1: Punct,
    pub distinct_token: Option<Keyword>,
    pub args: Vec<CallArg>,
    pub paren2: Punct,
}

/// A positional or named argument.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct CallArg {
    pub name: Option<NamedArgPrefix>,
    pub value: Expression,
}

/// `name =>`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct NamedArgPrefix {
    pub name: Ident,
    pub arrow: Punct,
}

/// `%FOUND`, `%NOTFOUND`, `%ISOPEN` or `%ROWCOUNT`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct CursorAttribute {
    pub percent: Punct,
    pub attribute: Ident,
}

/// `(+)`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct OuterJoinMarker {
    pub paren1: Punct,
    pub plus: Punct,
    pub paren2: Punct,
}

/// `OVER ([PARTITION BY ...] [ORDER BY ...])`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct OverClause {
    pub over_token: Keyword,
    pub paren1: Punct,
    pub partition_by: Option<PartitionBy>,
    pub order_by: Option<OrderBy>,
    pub paren2: Punct,
}

/// `PARTITION BY a, b`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct PartitionBy {
    pub partition_token: Keyword,
    pub by_token: Keyword,
    pub expressions: Vec<Expression>,
}

/// A query.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum QueryExpression {
    Select(Box<SelectExpression>),
    Nested(ParenthesizedQuery),
    SetOperation(SetOperation),
    With(WithQuery),
}

/// `left UNION [ALL] right`, and friends.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct SetOperation {
    pub left: Box<QueryExpression>,
    pub operator: SetOperator,
    pub right: Box<QueryExpression>,
}

/// A set operator.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum SetOperator {
    Union(UnionOperator),
    Intersect(Keyword),
    Minus(Keyword),
}

/// `UNION [ALL]`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct UnionOperator {
    pub union_token: Keyword,
    pub all_token: Option<Keyword>,
}

/// `WITH a AS (query) query`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct WithQuery {
    pub with_token: Keyword,
    pub ctes: Vec<CommonTableExpression>,
    pub query: Box<QueryExpression>,
}

/// `name AS (query)`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct CommonTableExpression {
    pub name: Ident,
    pub as_token: Keyword,
    pub query: ParenthesizedQuery,
}

/// A `SELECT` expression.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct SelectExpression {
    pub select_token: Keyword,
    pub distinct_token: Option<Keyword>,
    pub select_list: Vec<SelectListItem>,
    pub into_clause: Option<IntoClause>,
    pub from_clause: Option<FromClause>,
    pub where_clause: Option<WhereClause>,
    pub group_by: Option<GroupBy>,
    pub having: Option<Having>,
    pub order_by: Option<OrderBy>,
    pub for_update: Option<ForUpdate>,
}

/// An item in a select list.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum SelectListItem {
    Star(Punct),
    TableStar(TableStar),
    Expression(SelectExpressionItem),
}

/// `t.*`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct TableStar {
    pub table: QualifiedName,
    pub dot: Punct,
    pub star: Punct,
}

/// `expr [[AS] alias]`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct SelectExpressionItem {
    pub expression: Expression,
    pub alias: Option<Alias>,
}

/// `[AS] name`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct Alias {
    pub as_token: Option<Keyword>,
    pub name: Ident,
}

/// `FROM a, b JOIN c ON ...`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct FromClause {
    pub from_token: Keyword,
    pub items: Vec<FromItem>,
}

/// An item in a `FROM` clause.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum FromItem {
    Table(TableItem),
    Subquery(SubqueryItem),
    Join(JoinItem),
}

/// `table [alias]`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct TableItem {
    pub table: TableReference,
    pub alias: Option<Ident>,
}

/// A table name, possibly with a database link.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct TableReference {
    pub name: QualifiedName,
    pub dblink: Option<DbLink>,
}

/// `@link`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct DbLink {
    pub at: Punct,
    pub name: QualifiedName,
}

/// `(query) [alias]`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct SubqueryItem {
    pub query: ParenthesizedQuery,
    pub alias: Option<Ident>,
}

/// `left JOIN right [ON ... | USING (...)]`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct JoinItem {
    pub left: Box<FromItem>,
    pub operator: JoinOperator,
    pub right: Box<FromItem>,
    pub condition: Option<JoinCondition>,
}

/// The kind of join.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

/// `[INNER | LEFT [OUTER] | RIGHT [OUTER] | FULL [OUTER] | CROSS] JOIN`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct JoinOperator {
    pub tokens: Vec<Keyword>,
    #[drive(skip)]
    #[spanned(skip)]
    pub kind: JoinKind,
}

/// `ON condition` or `USING (a, b)`.
#[derive(Clone, Debug, Drive, Spanned)]
pub enum JoinCondition {
    On(JoinOn),
    Using(JoinUsing),
}

/// `ON condition`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct JoinOn {
    pub on_token: Keyword,
    pub condition: Expression,
}

/// `USING (a, b)`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct JoinUsing {
    pub using_token: Keyword,
    pub columns: ColumnList,
}

/// `WHERE condition`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct WhereClause {
    pub where_token: Keyword,
    pub condition: Expression,
}

/// `GROUP BY a, b`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct GroupBy {
    pub group_token: Keyword,
    pub by_token: Keyword,
    pub expressions: Vec<Expression>,
}

/// `HAVING condition`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct Having {
    pub having_token: Keyword,
    pub condition: Expression,
}

/// `ORDER BY a [ASC | DESC] [NULLS FIRST | LAST], ...`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct OrderBy {
    pub order_token: Keyword,
    pub by_token: Keyword,
    pub items: Vec<OrderByItem>,
}

/// One `ORDER BY` item.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct OrderByItem {
    pub expression: Expression,
    pub direction: Option<Keyword>,
    pub nulls: Option<NullsClause>,
}

/// `NULLS FIRST` or `NULLS LAST`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct NullsClause {
    pub nulls_token: Keyword,
    pub position: Keyword,
}

/// `FOR UPDATE [OF cols] [NOWAIT | WAIT n | SKIP LOCKED]`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ForUpdate {
    pub for_token: Keyword,
    pub update_token: Keyword,
    pub of_columns: Option<ForUpdateOf>,
    pub options: Vec<Token>,
}

/// `OF a, b`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct ForUpdateOf {
    pub of_token: Keyword,
    pub columns: Vec<QualifiedName>,
}

/// `CREATE PACKAGE p IS ... END p;`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct PackageSpec {
    pub create: Option<CreateClause>,
    pub package_token: Keyword,
    pub name: QualifiedName,
    pub options: Vec<RoutineOption>,
    pub is_token: Keyword,
    pub items: Vec<Declaration>,
    pub end_token: Keyword,
    pub end_label: Option<Ident>,
    pub semi: Punct,
    pub slash: Option<Punct>,
}

/// `CREATE PACKAGE BODY p IS ... [BEGIN ...] END p;`.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct PackageBody {
    pub create: Option<CreateClause>,
    pub package_token: Keyword,
    pub body_token: Keyword,
    pub name: QualifiedName,
    pub is_token: Keyword,
    pub items: Vec<Declaration>,
    pub initialization: Option<PackageInitialization>,
    pub end_token: Keyword,
    pub end_label: Option<Ident>,
    pub semi: Punct,
    pub slash: Option<Punct>,
}

/// `BEGIN statements [EXCEPTION ...]` at the end of a package body.
#[derive(Clone, Debug, Drive, Spanned)]
pub struct PackageInitialization {
    pub begin_token: Keyword,
    pub statements: Vec<Statement>,
    pub exception_section: Option<ExceptionSection>,
}

/// Parse PL/SQL source code.
pub fn parse_plsql(files: &KnownFiles, file_id: FileId) -> Result<SourceFile> {
    let tokens = tokenize_plsql(files, file_id)?;

    // Parse with or without tracing, as appropriate. The tracing code throws
    // off error positions, so we don't want to use it unless we're going to
    // use `pegviz` to visualize the parse.
    #[cfg(feature = "trace")]
    let result = plsql::source_file_traced(&tokens);
    #[cfg(not(feature = "trace"))]
    let result = plsql::source_file(&tokens);

    result.map_err(|e| {
        let span = Span::new(e.location.file_id, e.location.offset..e.location.offset);
        SourceError::parse_error("failed to parse PL/SQL", span, e.expected).into()
    })
}

/// Build a `Token` from a keyword.
fn kw_token(keyword: Keyword) -> Token {
    Token::Ident(keyword.ident)
}

/// Build a binary expression from a punctuation operator.
fn punct_binary(left: Expression, op_token: Punct, right: Expression) -> Expression {
    // The grammar only passes us operators listed in `BinaryOp::from_punct`.
    let op = BinaryOp::from_punct(op_token.token.as_str()).unwrap_or(BinaryOp::Eq);
    Expression::binary(left, Token::Punct(op_token), op, right)
}

/// Assemble a chain of joins, left to right.
fn fold_joins(
    first: FromItem,
    joins: Vec<(JoinOperator, FromItem, Option<JoinCondition>)>,
) -> FromItem {
    joins
        .into_iter()
        .fold(first, |left, (operator, right, condition)| {
            FromItem::Join(JoinItem {
                left: Box::new(left),
                operator,
                right: Box::new(right),
                condition,
            })
        })
}

// We use `rust-peg` to parse PL/SQL. The tokenizer has already split the input
// into tokens with attached whitespace, so this grammar runs over a
// `TokenStream` and uses the undocumented `##` syntax to call methods on it.
//
// Grammar notes:
//   - Keywords are matched using `k` (eg `k("SELECT")`) and punctuation using
//     `p` (eg `p(";")`).
//   - `ident` rejects the reserved words in `KEYWORDS`, unless quoted.
//   - Statements each end with their own `;`, which we keep in the tree.
peg::parser! {
    /// A conservative subset of PL/SQL.
    pub grammar plsql() for TokenStream {
        /// Alternate entry point for tracing the parse with `pegviz`.
        pub rule source_file_traced() -> SourceFile = traced(<source_file()>)

        /// Main entry point.
        pub rule source_file() -> SourceFile
            = units:source_unit()+ ![_] { SourceFile { units } }

        rule source_unit() -> SourceUnit
            = b:package_body() { SourceUnit::PackageBody(b) }
            / s:package_spec() { SourceUnit::PackageSpec(s) }
            / r:routine_definition() { SourceUnit::Routine(r) }

        rule create_clause() -> CreateClause
            = create_token:k("CREATE")
              or_replace:(or_token:k("OR") replace_token:k("REPLACE") { OrReplace { or_token, replace_token } })?
              editionable:(k("EDITIONABLE") / k("NONEDITIONABLE"))?
            {
                CreateClause { create_token, or_replace, editionable }
            }

        rule package_spec() -> PackageSpec
            = create:create_clause()? package_token:k("PACKAGE") name:qualified_name()
              options:routine_option()* is_token:is_or_as() items:declaration()*
              end_token:k("END") end_label:ident()? semi:p(";") slash:p("/")?
            {
                PackageSpec {
                    create,
                    package_token,
                    name,
                    options,
                    is_token,
                    items,
                    end_token,
                    end_label,
                    semi,
                    slash,
                }
            }

        rule package_body() -> PackageBody
            = create:create_clause()? package_token:k("PACKAGE") body_token:k("BODY")
              name:qualified_name() is_token:is_or_as() items:declaration()*
              initialization:package_initialization()?
              end_token:k("END") end_label:ident()? semi:p(";") slash:p("/")?
            {
                PackageBody {
                    create,
                    package_token,
                    body_token,
                    name,
                    is_token,
                    items,
                    initialization,
                    end_token,
                    end_label,
                    semi,
                    slash,
                }
            }

        rule package_initialization() -> PackageInitialization
            = begin_token:k("BEGIN") statements:statement()+ exception_section:exception_section()? {
                PackageInitialization { begin_token, statements, exception_section }
            }

        rule routine_definition() -> RoutineDefinition
            = create:create_clause()? heading:routine_heading() is_token:is_or_as()
              body:routine_block() slash:p("/")?
            {
                RoutineDefinition { create, heading, is_token, body, slash }
            }

        rule routine_heading() -> RoutineHeading
            = kind_token:k("FUNCTION") name:qualified_name() params:parameter_list()?
              return_clause:return_clause() options:routine_option()*
            {
                RoutineHeading {
                    kind_token,
                    kind: RoutineKind::Function,
                    name,
                    params,
                    return_clause: Some(return_clause),
                    options,
                }
            }
            / kind_token:k("PROCEDURE") name:qualified_name() params:parameter_list()?
              options:routine_option()*
            {
                RoutineHeading {
                    kind_token,
                    kind: RoutineKind::Procedure,
                    name,
                    params,
                    return_clause: None,
                    options,
                }
            }

        rule routine_option() -> RoutineOption
            = flag:(k("DETERMINISTIC") / k("PARALLEL_ENABLE") / k("RESULT_CACHE") / k("PIPELINED")) {
                RoutineOption::Flag(flag)
            }
            / authid_token:k("AUTHID") who:ident() {
                RoutineOption::Authid(AuthidOption { authid_token, who })
            }

        rule is_or_as() -> Keyword = k("IS") / k("AS")

        rule parameter_list() -> ParameterList
            = paren1:p("(") params:sep(<parameter()>, ",") paren2:p(")") {
                ParameterList { paren1, params, paren2 }
            }

        rule parameter() -> Parameter
            = name:ident() mode_clause:parameter_mode()? nocopy_token:k("NOCOPY")?
              data_type:data_type() default:default_clause()?
            {
                Parameter { name, mode_clause, nocopy_token, data_type, default }
            }

        rule parameter_mode() -> ParameterModeClause
            = in_token:k("IN") out_token:k("OUT") {
                ParameterModeClause { tokens: vec![in_token, out_token], mode: ParameterMode::InOut }
            }
            / in_token:k("IN") {
                ParameterModeClause { tokens: vec![in_token], mode: ParameterMode::In }
            }
            / out_token:k("OUT") {
                ParameterModeClause { tokens: vec![out_token], mode: ParameterMode::Out }
            }

        rule return_clause() -> ReturnClause
            = return_token:k("RETURN") data_type:data_type() {
                ReturnClause { return_token, data_type }
            }

        rule default_clause() -> DefaultClause
            = assign:p(":=") value:expression() {
                DefaultClause { token: Token::Punct(assign), value }
            }
            / default_token:k("DEFAULT") value:expression() {
                DefaultClause { token: kw_token(default_token), value }
            }

        rule data_type() -> DataType
            = target:qualified_name() percent:p("%") attribute:(k("TYPE") / k("ROWTYPE")) {
                DataType::Anchored(AnchoredType { target, percent, attribute })
            }
            / name:qualified_name() args:type_args()? words:type_word()* {
                DataType::Named(NamedType { name, args, words })
            }

        /// Words that can follow a type name, as in `DOUBLE PRECISION`,
        /// `LONG RAW`, `TIMESTAMP WITH LOCAL TIME ZONE` or `INTERVAL DAY(2) TO
        /// SECOND(6)`.
        rule type_word() -> TypeWord
            = word:(k("PRECISION") / k("RAW") / k("VARYING") / k("WITH") / k("LOCAL")
                    / k("TIME") / k("ZONE") / k("TO") / k("YEAR") / k("MONTH")
                    / k("DAY") / k("SECOND"))
              args:type_args()?
            {
                TypeWord { word, args }
            }

        rule type_args() -> TypeArgs
            = paren1:p("(") args:sep(<type_arg()>, ",") paren2:p(")") {
                TypeArgs { paren1, args, paren2 }
            }

        rule type_arg() -> TypeArg
            = literal:literal() semantics:(k("BYTE") / k("CHAR"))? {
                TypeArg { value: Token::Literal(literal), semantics }
            }
            / star:p("*") {
                TypeArg { value: Token::Punct(star), semantics: None }
            }

        rule routine_block() -> Block
            = declarations:declaration()* block:block_tail() {
                Block { declarations, ..block }
            }

        rule block_statement() -> Block
            = declare_token:k("DECLARE") declarations:declaration()* block:block_tail() {
                Block { declare_token: Some(declare_token), declarations, ..block }
            }
            / block_tail()

        /// `BEGIN ... END;`, with no declarations.
        rule block_tail() -> Block
            = begin_token:k("BEGIN") statements:statement()*
              exception_section:exception_section()?
              end_token:k("END") end_label:ident()? semi:p(";")
            {
                Block {
                    declare_token: None,
                    declarations: vec![],
                    begin_token,
                    statements,
                    exception_section,
                    end_token,
                    end_label,
                    semi,
                }
            }

        rule declaration() -> Declaration
            = c:cursor_declaration() { Declaration::Cursor(c) }
            / e:exception_declaration() { Declaration::Exception(e) }
            / p:pragma_declaration() { Declaration::Pragma(p) }
            / t:type_declaration() { Declaration::Type(t) }
            / s:subprogram_declaration() { Declaration::Subprogram(s) }
            / v:variable_declaration() { Declaration::Variable(v) }

        rule variable_declaration() -> VariableDeclaration
            = name:ident() constant_token:k("CONSTANT")? data_type:data_type()
              not_null:(not_token:k("NOT") null_token:k("NULL") { NotNull { not_token, null_token } })?
              default:default_clause()? semi:p(";")
            {
                VariableDeclaration { name, constant_token, data_type, not_null, default, semi }
            }

        rule cursor_declaration() -> CursorDeclaration
            = cursor_token:k("CURSOR") name:ident() params:parameter_list()?
              return_clause:return_clause()?
              query:(is_token:k("IS") query:query_expression() { CursorQuery { is_token, query } })?
              semi:p(";")
            {
                CursorDeclaration { cursor_token, name, params, return_clause, query, semi }
            }

        rule exception_declaration() -> ExceptionDeclaration
            = name:ident() exception_token:k("EXCEPTION") semi:p(";") {
                ExceptionDeclaration { name, exception_token, semi }
            }

        rule pragma_declaration() -> PragmaDeclaration
            = pragma_token:k("PRAGMA") name:ident() args:call_args()? semi:p(";") {
                PragmaDeclaration { pragma_token, name, args, semi }
            }

        rule type_declaration() -> TypeDeclaration
            = type_token:k("TYPE") name:ident() is_token:is_or_as()
              definition:record_definition() semi:p(";")
            {
                TypeDeclaration {
                    type_token,
                    name,
                    is_token,
                    definition: TypeDefinition::Record(definition),
                    semi,
                }
            }
            / type_token:(k("TYPE") / k("SUBTYPE")) name:ident() is_token:is_or_as()
              definition:(!p(";") t:[_] { t.clone() })+ semi:p(";")
            {
                TypeDeclaration {
                    type_token,
                    name,
                    is_token,
                    definition: TypeDefinition::Other(definition),
                    semi,
                }
            }

        rule record_definition() -> RecordDefinition
            = record_token:k("RECORD") paren1:p("(")
              fields:sep(<record_field_declaration()>, ",") paren2:p(")")
            {
                RecordDefinition { record_token, paren1, fields, paren2 }
            }

        rule record_field_declaration() -> RecordFieldDeclaration
            = name:ident() data_type:data_type()
              not_null:(not_token:k("NOT") null_token:k("NULL") { NotNull { not_token, null_token } })?
              default:default_clause()?
            {
                RecordFieldDeclaration { name, data_type, not_null, default }
            }

        rule subprogram_declaration() -> SubprogramDeclaration
            = heading:routine_heading() is_token:is_or_as() block:routine_block() {
                SubprogramDeclaration {
                    heading,
                    body: Some(SubprogramBody { is_token, block }),
                    semi: None,
                }
            }
            / heading:routine_heading() semi:p(";") {
                SubprogramDeclaration { heading, body: None, semi: Some(semi) }
            }

        rule exception_section() -> ExceptionSection
            = exception_token:k("EXCEPTION") handlers:exception_handler()+ {
                ExceptionSection { exception_token, handlers }
            }

        rule exception_handler() -> ExceptionHandler
            = when_token:k("WHEN")
              first:qualified_name() rest:(k("OR") name:qualified_name() { name })*
              then_token:k("THEN") statements:statement()+
            {
                let mut exceptions = vec![first];
                exceptions.extend(rest);
                ExceptionHandler { when_token, exceptions, then_token, statements }
            }

        rule statement() -> Statement
            = s:label_statement() { Statement::Label(s) }
            / s:if_statement() { Statement::If(s) }
            / s:case_statement() { Statement::Case(s) }
            / body:loop_body() { Statement::Loop(LoopStatement { body }) }
            / s:while_statement() { Statement::While(s) }
            / s:for_range_statement() { Statement::ForRange(s) }
            / s:for_cursor_statement() { Statement::ForCursor(s) }
            / s:exit_statement() { Statement::Exit(s) }
            / s:return_statement() { Statement::Return(s) }
            / s:null_statement() { Statement::Null(s) }
            / s:raise_statement() { Statement::Raise(s) }
            / s:select_into_statement() { Statement::Select(s) }
            / s:insert_statement() { Statement::Insert(s) }
            / s:update_statement() { Statement::Update(s) }
            / s:delete_statement() { Statement::Delete(s) }
            / s:open_statement() { Statement::Open(s) }
            / s:fetch_statement() { Statement::Fetch(s) }
            / s:close_statement() { Statement::Close(s) }
            / s:execute_immediate_statement() { Statement::ExecuteImmediate(s) }
            / s:block_statement() { Statement::Block(s) }
            / s:transaction_statement() { Statement::Transaction(s) }
            / s:goto_statement() { Statement::Goto(s) }
            / s:forall_statement() { Statement::Forall(s) }
            / s:pipe_row_statement() { Statement::PipeRow(s) }
            / s:assignment_statement() { Statement::Assignment(s) }
            / s:call_statement() { Statement::Call(s) }

        rule label_statement() -> LabelStatement
            = open:p("<<") name:ident() close:p(">>") {
                LabelStatement { open, name, close }
            }

        rule assignment_statement() -> AssignmentStatement
            = target:name_expression() assign:p(":=") value:expression() semi:p(";") {
                AssignmentStatement { target, assign, value, semi }
            }

        rule if_statement() -> IfStatement
            = if_token:k("IF") condition:expression() then_token:k("THEN")
              statements:statement()+
              elsif_clauses:elsif_clause()*
              else_clause:else_clause()?
              end_token:k("END") end_if_token:k("IF") semi:p(";")
            {
                IfStatement {
                    if_token,
                    condition,
                    then_token,
                    statements,
                    elsif_clauses,
                    else_clause,
                    end_token,
                    end_if_token,
                    semi,
                }
            }

        rule elsif_clause() -> ElsifClause
            = elsif_token:k("ELSIF") condition:expression() then_token:k("THEN") statements:statement()+ {
                ElsifClause { elsif_token, condition, then_token, statements }
            }

        rule else_clause() -> ElseClause
            = else_token:k("ELSE") statements:statement()+ {
                ElseClause { else_token, statements }
            }

        rule case_statement() -> CaseStatement
            = case_token:k("CASE") operand:expression()?
              when_clauses:case_statement_when()+
              else_clause:else_clause()?
              end_token:k("END") end_case_token:k("CASE") semi:p(";")
            {
                CaseStatement {
                    case_token,
                    operand,
                    when_clauses,
                    else_clause,
                    end_token,
                    end_case_token,
                    semi,
                }
            }

        rule case_statement_when() -> CaseStatementWhen
            = when_token:k("WHEN") condition:expression() then_token:k("THEN") statements:statement()+ {
                CaseStatementWhen { when_token, condition, then_token, statements }
            }

        rule loop_body() -> LoopBody
            = loop_token:k("LOOP") statements:statement()*
              end_token:k("END") end_loop_token:k("LOOP") end_label:ident()? semi:p(";")
            {
                LoopBody { loop_token, statements, end_token, end_loop_token, end_label, semi }
            }

        rule while_statement() -> WhileStatement
            = while_token:k("WHILE") condition:expression() body:loop_body() {
                WhileStatement { while_token, condition, body }
            }

        rule for_range_statement() -> ForRangeStatement
            = for_token:k("FOR") index:ident() in_token:k("IN") reverse_token:k("REVERSE")?
              lower:expression() dots:p("..") upper:expression() body:loop_body()
            {
                ForRangeStatement {
                    for_token,
                    index,
                    in_token,
                    reverse_token,
                    lower,
                    dots,
                    upper,
                    body,
                }
            }

        rule for_cursor_statement() -> ForCursorStatement
            = for_token:k("FOR") record:ident() in_token:k("IN") source:cursor_source() body:loop_body() {
                ForCursorStatement { for_token, record, in_token, source, body }
            }

        rule cursor_source() -> CursorSource
            = query:parenthesized_query() { CursorSource::Query(query) }
            / name:name_expression() { CursorSource::Named(name) }

        rule exit_statement() -> ExitStatement
            = keyword:(k("EXIT") / k("CONTINUE")) label:ident()?
              when_clause:(when_token:k("WHEN") condition:expression() { WhenCondition { when_token, condition } })?
              semi:p(";")
            {
                ExitStatement { keyword, label, when_clause, semi }
            }

        rule return_statement() -> ReturnStatement
            = return_token:k("RETURN") value:expression()? semi:p(";") {
                ReturnStatement { return_token, value, semi }
            }

        rule null_statement() -> NullStatement
            = null_token:k("NULL") semi:p(";") { NullStatement { null_token, semi } }

        rule raise_statement() -> RaiseStatement
            = raise_token:k("RAISE") exception:qualified_name()? semi:p(";") {
                RaiseStatement { raise_token, exception, semi }
            }

        rule call_statement() -> CallStatement
            = call_token:k("CALL")? target:name_expression() into_clause:into_clause()? semi:p(";") {
                CallStatement { call_token, target, into_clause, semi }
            }

        rule into_clause() -> IntoClause
            = bulk_collect:(bulk_token:k("BULK") collect_token:k("COLLECT") { BulkCollect { bulk_token, collect_token } })?
              into_token:k("INTO") targets:sep(<name_expression()>, ",")
            {
                IntoClause { bulk_collect, into_token, targets }
            }

        rule select_into_statement() -> SelectIntoStatement
            = query:query_expression() semi:p(";") { SelectIntoStatement { query, semi } }

        rule insert_statement() -> InsertStatement
            = insert_token:k("INSERT") into_token:k("INTO") table:table_reference()
              columns:column_list()? source:insert_source() returning:returning_clause()?
              semi:p(";")
            {
                InsertStatement { insert_token, into_token, table, columns, source, returning, semi }
            }

        rule column_list() -> ColumnList
            = paren1:p("(") columns:sep(<ident()>, ",") paren2:p(")") {
                ColumnList { paren1, columns, paren2 }
            }

        rule insert_source() -> InsertSource
            = values_token:k("VALUES") paren1:p("(") values:sep(<expression()>, ",") paren2:p(")") {
                InsertSource::Values(ValuesClause { values_token, paren1, values, paren2 })
            }
            / query:query_expression() { InsertSource::Query(query) }

        rule returning_clause() -> ReturningClause
            = returning_token:(k("RETURNING") / k("RETURN")) expressions:sep(<expression()>, ",")
              into_clause:into_clause()
            {
                ReturningClause { returning_token, expressions, into_clause }
            }

        rule update_statement() -> UpdateStatement
            = update_token:k("UPDATE") table:table_reference() alias:ident()?
              set_token:k("SET") assignments:sep(<set_assignment()>, ",")
              where_clause:dml_where_clause()? returning:returning_clause()? semi:p(";")
            {
                UpdateStatement {
                    update_token,
                    table,
                    alias,
                    set_token,
                    assignments,
                    where_clause,
                    returning,
                    semi,
                }
            }

        rule set_assignment() -> SetAssignment
            = column:qualified_name() eq:p("=") value:expression() {
                SetAssignment { column, eq, value }
            }

        rule delete_statement() -> DeleteStatement
            = delete_token:k("DELETE") from_token:k("FROM")? table:table_reference() alias:ident()?
              where_clause:dml_where_clause()? returning:returning_clause()? semi:p(";")
            {
                DeleteStatement { delete_token, from_token, table, alias, where_clause, returning, semi }
            }

        rule dml_where_clause() -> DmlWhereClause
            = where_token:k("WHERE") current_token:k("CURRENT") of_token:k("OF") cursor:ident() {
                DmlWhereClause::CurrentOf(CurrentOfClause { where_token, current_token, of_token, cursor })
            }
            / w:where_clause() { DmlWhereClause::Condition(w) }

        rule open_statement() -> OpenStatement
            = open_token:k("OPEN") cursor:ident() args:call_args()? for_clause:open_for_clause()? semi:p(";") {
                OpenStatement { open_token, cursor, args, for_clause, semi }
            }

        rule open_for_clause() -> OpenForClause
            = for_token:k("FOR") source:open_for_source() using_clause:using_clause()? {
                OpenForClause { for_token, source, using_clause }
            }

        rule open_for_source() -> OpenForSource
            = query:query_expression() { OpenForSource::Query(query) }
            / e:expression() { OpenForSource::Dynamic(e) }

        rule fetch_statement() -> FetchStatement
            = fetch_token:k("FETCH") cursor:ident() into_clause:into_clause()
              limit:(limit_token:k("LIMIT") value:expression() { LimitClause { limit_token, value } })?
              semi:p(";")
            {
                FetchStatement { fetch_token, cursor, into_clause, limit, semi }
            }

        rule close_statement() -> CloseStatement
            = close_token:k("CLOSE") cursor:ident() semi:p(";") {
                CloseStatement { close_token, cursor, semi }
            }

        rule execute_immediate_statement() -> ExecuteImmediateStatement
            = execute_token:k("EXECUTE") immediate_token:k("IMMEDIATE") sql:expression()
              into_clause:into_clause()? using_clause:using_clause()? semi:p(";")
            {
                ExecuteImmediateStatement {
                    execute_token,
                    immediate_token,
                    sql,
                    into_clause,
                    using_clause,
                    semi,
                }
            }

        rule using_clause() -> UsingClause
            = using_token:k("USING") args:sep(<using_arg()>, ",") {
                UsingClause { using_token, args }
            }

        rule using_arg() -> UsingArg
            = mode_clause:parameter_mode()? value:expression() {
                UsingArg { mode_clause, value }
            }

        rule transaction_statement() -> TransactionStatement
            = keyword:(k("COMMIT") / k("ROLLBACK") / k("SAVEPOINT"))
              rest:(!p(";") t:[_] { t.clone() })* semi:p(";")
            {
                TransactionStatement { keyword, rest, semi }
            }

        rule goto_statement() -> GotoStatement
            = goto_token:k("GOTO") label:ident() semi:p(";") {
                GotoStatement { goto_token, label, semi }
            }

        rule forall_statement() -> ForallStatement
            = forall_token:k("FORALL") index:ident() in_token:k("IN")
              lower:expression() dots:p("..") upper:expression() statement:statement()
            {
                ForallStatement {
                    forall_token,
                    index,
                    in_token,
                    lower,
                    dots,
                    upper,
                    statement: Box::new(statement),
                }
            }

        rule pipe_row_statement() -> PipeRowStatement
            = pipe_token:k("PIPE") row_token:k("ROW") paren1:p("(") value:expression() paren2:p(")") semi:p(";") {
                PipeRowStatement { pipe_token, row_token, paren1, value, paren2, semi }
            }

        rule query_expression() -> QueryExpression = precedence! {
            left:(@) operator:set_operator() right:@ {
                QueryExpression::SetOperation(SetOperation {
                    left: Box::new(left),
                    operator,
                    right: Box::new(right),
                })
            }
            --
            select:select_expression() { QueryExpression::Select(Box::new(select)) }
            query:parenthesized_query() { QueryExpression::Nested(query) }
            with_token:k("WITH") ctes:sep(<common_table_expression()>, ",") query:query_expression() {
                QueryExpression::With(WithQuery {
                    with_token,
                    ctes,
                    query: Box::new(query),
                })
            }
        }

        rule parenthesized_query() -> ParenthesizedQuery
            = paren1:p("(") query:query_expression() paren2:p(")") {
                ParenthesizedQuery { paren1, query: Box::new(query), paren2 }
            }

        rule set_operator() -> SetOperator
            = union_token:k("UNION") all_token:k("ALL")? {
                SetOperator::Union(UnionOperator { union_token, all_token })
            }
            / intersect_token:k("INTERSECT") { SetOperator::Intersect(intersect_token) }
            / minus_token:k("MINUS") { SetOperator::Minus(minus_token) }

        rule common_table_expression() -> CommonTableExpression
            = name:ident() as_token:k("AS") query:parenthesized_query() {
                CommonTableExpression { name, as_token, query }
            }

        rule select_expression() -> SelectExpression
            = select_token:k("SELECT")
              distinct_token:(k("DISTINCT") / k("UNIQUE") / k("ALL"))?
              select_list:sep(<select_list_item()>, ",")
              into_clause:into_clause()?
              from_clause:from_clause()?
              where_clause:where_clause()?
              group_by:group_by()?
              having:having()?
              order_by:order_by()?
              for_update:for_update()?
            {
                SelectExpression {
                    select_token,
                    distinct_token,
                    select_list,
                    into_clause,
                    from_clause,
                    where_clause,
                    group_by,
                    having,
                    order_by,
                    for_update,
                }
            }

        rule select_list_item() -> SelectListItem
            = star:p("*") { SelectListItem::Star(star) }
            / table:qualified_name() dot:p(".") star:p("*") {
                SelectListItem::TableStar(TableStar { table, dot, star })
            }
            / expression:expression() alias:alias()? {
                SelectListItem::Expression(SelectExpressionItem { expression, alias })
            }

        rule alias() -> Alias
            = as_token:k("AS")? name:ident() { Alias { as_token, name } }

        rule from_clause() -> FromClause
            = from_token:k("FROM") items:sep(<from_item()>, ",") {
                FromClause { from_token, items }
            }

        rule from_item() -> FromItem
            = first:from_primary() joins:join_tail()* { fold_joins(first, joins) }

        rule join_tail() -> (JoinOperator, FromItem, Option<JoinCondition>)
            = operator:join_operator() right:from_primary() condition:join_condition()? {
                (operator, right, condition)
            }

        rule from_primary() -> FromItem
            = query:parenthesized_query() alias:ident()? {
                FromItem::Subquery(SubqueryItem { query, alias })
            }
            / table:table_reference() alias:ident()? {
                FromItem::Table(TableItem { table, alias })
            }

        rule table_reference() -> TableReference
            = name:qualified_name() dblink:(at:p("@") name:qualified_name() { DbLink { at, name } })? {
                TableReference { name, dblink }
            }

        rule join_operator() -> JoinOperator
            = t1:k("INNER")? t2:k("JOIN") {
                JoinOperator { tokens: t1.into_iter().chain(Some(t2)).collect(), kind: JoinKind::Inner }
            }
            / t1:k("LEFT") t2:k("OUTER")? t3:k("JOIN") {
                JoinOperator { tokens: Some(t1).into_iter().chain(t2).chain(Some(t3)).collect(), kind: JoinKind::Left }
            }
            / t1:k("RIGHT") t2:k("OUTER")? t3:k("JOIN") {
                JoinOperator { tokens: Some(t1).into_iter().chain(t2).chain(Some(t3)).collect(), kind: JoinKind::Right }
            }
            / t1:k("FULL") t2:k("OUTER")? t3:k("JOIN") {
                JoinOperator { tokens: Some(t1).into_iter().chain(t2).chain(Some(t3)).collect(), kind: JoinKind::Full }
            }
            / t1:k("CROSS") t2:k("JOIN") {
                JoinOperator { tokens: vec![t1, t2], kind: JoinKind::Cross }
            }

        rule join_condition() -> JoinCondition
            = on_token:k("ON") condition:expression() {
                JoinCondition::On(JoinOn { on_token, condition })
            }
            / using_token:k("USING") columns:column_list() {
                JoinCondition::Using(JoinUsing { using_token, columns })
            }

        rule where_clause() -> WhereClause
            = where_token:k("WHERE") condition:expression() {
                WhereClause { where_token, condition }
            }

        rule group_by() -> GroupBy
            = group_token:k("GROUP") by_token:k("BY") expressions:sep(<expression()>, ",") {
                GroupBy { group_token, by_token, expressions }
            }

        rule having() -> Having
            = having_token:k("HAVING") condition:expression() {
                Having { having_token, condition }
            }

        rule order_by() -> OrderBy
            = order_token:k("ORDER") by_token:k("BY") items:sep(<order_by_item()>, ",") {
                OrderBy { order_token, by_token, items }
            }

        rule order_by_item() -> OrderByItem
            = expression:expression() direction:(k("ASC") / k("DESC"))?
              nulls:(nulls_token:k("NULLS") position:(k("FIRST") / k("LAST")) { NullsClause { nulls_token, position } })?
            {
                OrderByItem { expression, direction, nulls }
            }

        rule for_update() -> ForUpdate
            = for_token:k("FOR") update_token:k("UPDATE")
              of_columns:(of_token:k("OF") columns:sep(<qualified_name()>, ",") { ForUpdateOf { of_token, columns } })?
              options:for_update_options()?
            {
                ForUpdate { for_token, update_token, of_columns, options: options.unwrap_or_default() }
            }

        rule for_update_options() -> Vec<Token>
            = nowait:k("NOWAIT") { vec![kw_token(nowait)] }
            / wait:k("WAIT") seconds:literal() { vec![kw_token(wait), Token::Literal(seconds)] }
            / skip:k("SKIP") locked:k("LOCKED") { vec![kw_token(skip), kw_token(locked)] }

        /// Expressions, by precedence. We split `expression` and
        /// `expression_no_and` because `AND` also appears in `x BETWEEN y AND
        /// z`, and we don't want to parse that as `x BETWEEN (y AND z)`.
        rule expression() -> Expression = precedence! {
            left:(@) or_token:k("OR") right:@ {
                Expression::binary(left, kw_token(or_token), BinaryOp::Or, right)
            }
            --
            left:(@) and_token:k("AND") right:@ {
                Expression::binary(left, kw_token(and_token), BinaryOp::And, right)
            }
            --
            e:expression_no_and() { e }
        }

        rule expression_no_and() -> Expression = precedence! {
            not_token:k("NOT") operand:@ {
                Expression::unary(kw_token(not_token), UnaryOp::Not, operand)
            }
            --
            operand:(@) is_token:k("IS") not_token:k("NOT")? null_token:k("NULL") {
                Expression::IsNull(IsNullExpression {
                    operand: Box::new(operand),
                    is_token,
                    not_token,
                    null_token,
                })
            }
            operand:(@) not_token:k("NOT")? like_token:k("LIKE") pattern:arith_expression()
              escape:(escape_token:k("ESCAPE") value:arith_expression() { EscapeClause { escape_token, value: Box::new(value) } })?
            {
                Expression::Like(LikeExpression {
                    operand: Box::new(operand),
                    not_token,
                    like_token,
                    pattern: Box::new(pattern),
                    escape,
                })
            }
            operand:(@) not_token:k("NOT")? between_token:k("BETWEEN") low:arith_expression()
              and_token:k("AND") high:arith_expression()
            {
                Expression::Between(BetweenExpression {
                    operand: Box::new(operand),
                    not_token,
                    between_token,
                    low: Box::new(low),
                    and_token,
                    high: Box::new(high),
                })
            }
            operand:(@) not_token:k("NOT")? in_token:k("IN") paren1:p("(") list:in_list() paren2:p(")") {
                Expression::In(InExpression {
                    operand: Box::new(operand),
                    not_token,
                    in_token,
                    paren1,
                    list,
                    paren2,
                })
            }
            left:(@) op_token:comparison_op() right:@ { punct_binary(left, op_token, right) }
            --
            e:arith_expression() { e }
        }

        rule comparison_op() -> Punct
            = p("=") / p("<>") / p("!=") / p("^=") / p("~=") / p("<=") / p(">=") / p("<") / p(">")

        rule in_list() -> InList
            = query:query_expression() { InList::Query(Box::new(query)) }
            / values:sep(<expression()>, ",") { InList::Values(values) }

        /// Arithmetic. Note that `||` has the same precedence as `+` and `-`.
        rule arith_expression() -> Expression = precedence! {
            left:(@) op_token:(p("+") / p("-") / p("||")) right:@ { punct_binary(left, op_token, right) }
            --
            left:(@) op_token:(p("*") / p("/")) right:@ { punct_binary(left, op_token, right) }
            --
            left:@ op_token:p("**") right:(@) { punct_binary(left, op_token, right) }
            --
            op_token:p("-") operand:@ { Expression::unary(Token::Punct(op_token), UnaryOp::Neg, operand) }
            op_token:p("+") operand:@ { Expression::unary(Token::Punct(op_token), UnaryOp::Plus, operand) }
            --
            e:primary_expression() { e }
        }

        rule primary_expression() -> Expression
            = e:case_expression() { Expression::Case(e) }
            / e:cast_expression() { Expression::Cast(e) }
            / e:extract_expression() { Expression::Extract(e) }
            / e:date_literal() { Expression::DateLiteral(e) }
            / e:interval_literal() { Expression::IntervalLiteral(e) }
            / exists_token:k("EXISTS") query:parenthesized_query() {
                Expression::Exists(ExistsExpression { exists_token, query })
            }
            / query:parenthesized_query() { Expression::Subquery(query) }
            / paren1:p("(") expression:expression() paren2:p(")") {
                Expression::Parens(ParenExpression { paren1, expression: Box::new(expression), paren2 })
            }
            / literal:literal() { Expression::Literal(literal) }
            / b:(k("TRUE") / k("FALSE")) { Expression::Bool(b) }
            / null_token:k("NULL") { Expression::Null(null_token) }
            / colon:p(":") name:bind_name() { Expression::BindVariable(BindVariable { colon, name }) }
            / name:name_expression() { Expression::Name(name) }

        rule bind_name() -> Token
            = ident:ident() { Token::Ident(ident) }
            / literal:literal() { Token::Literal(literal) }

        rule case_expression() -> CaseExpression
            = case_token:k("CASE") operand:expression()? when_clauses:case_when()+
              else_clause:(else_token:k("ELSE") result:expression() { CaseElse { else_token, result: Box::new(result) } })?
              end_token:k("END")
            {
                CaseExpression {
                    case_token,
                    operand: operand.map(Box::new),
                    when_clauses,
                    else_clause,
                    end_token,
                }
            }

        rule case_when() -> CaseWhen
            = when_token:k("WHEN") condition:expression() then_token:k("THEN") result:expression() {
                CaseWhen { when_token, condition, then_token, result }
            }

        rule cast_expression() -> CastExpression
            = cast_token:k("CAST") paren1:p("(") value:expression() as_token:k("AS")
              data_type:data_type() paren2:p(")")
            {
                CastExpression { cast_token, paren1, value: Box::new(value), as_token, data_type, paren2 }
            }

        rule extract_expression() -> ExtractExpression
            = extract_token:k("EXTRACT") paren1:p("(") field:ident() from_token:k("FROM")
              value:expression() paren2:p(")")
            {
                ExtractExpression { extract_token, paren1, field, from_token, value: Box::new(value), paren2 }
            }

        rule date_literal() -> DateLiteral
            = keyword:(k("DATE") / k("TIMESTAMP")) value:string_literal() {
                DateLiteral { keyword, value }
            }

        rule interval_literal() -> IntervalLiteral
            = interval_token:k("INTERVAL") value:string_literal() words:type_word()+ {
                IntervalLiteral { interval_token, value, words }
            }

        rule name_expression() -> NameExpression
            = parts:sep(<name_part()>, ".")
              attribute:(percent:p("%") attribute:ident() { CursorAttribute { percent, attribute } })?
              over_clause:over_clause()?
              outer_join:(paren1:p("(") plus:p("+") paren2:p(")") { OuterJoinMarker { paren1, plus, paren2 } })?
            {
                NameExpression { parts, attribute, over_clause, outer_join }
            }

        rule name_part() -> NamePart
            = ident:ident() args:call_args()? { NamePart { ident, args } }

        rule call_args() -> CallArgs
            = paren1:p("(") distinct_token:(k("DISTINCT") / k("ALL"))?
              args:sep(<call_arg()>, ",")? paren2:p(")")
            {
                CallArgs { paren1, distinct_token, args: args.unwrap_or_default(), paren2 }
            }

        rule call_arg() -> CallArg
            = name:ident() arrow:p("=>") value:expression() {
                CallArg { name: Some(NamedArgPrefix { name, arrow }), value }
            }
            / star:p("*") { CallArg { name: None, value: Expression::Star(star) } }
            / value:expression() { CallArg { name: None, value } }

        rule over_clause() -> OverClause
            = over_token:k("OVER") paren1:p("(")
              partition_by:(partition_token:k("PARTITION") by_token:k("BY") expressions:sep(<expression()>, ",") {
                  PartitionBy { partition_token, by_token, expressions }
              })?
              order_by:order_by()? paren2:p(")")
            {
                OverClause { over_token, paren1, partition_by, order_by, paren2 }
            }

        rule qualified_name() -> QualifiedName
            = parts:sep(<ident()>, ".") { QualifiedName { parts } }

        /// Punctuation separated list. Does not allow a trailing separator.
        rule sep<T>(node: rule<T>, separator: &'static str) -> Vec<T>
            = first:node() rest:(p(separator) node:node() { node })* {
                let mut items = vec![first];
                items.extend(rest);
                items
            }

        rule literal() -> Literal
            = literal:##literal() { literal }
            / expected!("literal")

        rule string_literal() -> Literal
            = literal:literal() {?
                match &literal.value {
                    LiteralValue::String(_) => Ok(literal),
                    _ => Err("string literal"),
                }
            }

        /// An identifier. Reserved words are only allowed when quoted.
        rule ident() -> Ident
            = ident:##ident() {?
                if !ident.quoted && is_reserved(&ident.name) {
                    Err("identifier")
                } else {
                    Ok(ident)
                }
            }
            / expected!("identifier")

        /// A keyword, matched without regard to case.
        rule k(s: &'static str) -> Keyword
            = token:##keyword(s) { token }
            / expected!(s)

        /// Punctuation.
        rule p(s: &'static str) -> Punct
            = token:##punct_eq(s) { token }
            / expected!(s)

        /// Tracing rule for `pegviz`. See
        /// https://github.com/fasterthanlime/pegviz.
        rule traced<T>(e: rule<T>) -> T =
            &([_]* {
                #[cfg(feature = "trace")]
                println!("[PEG_INPUT_START]\n[PEG_TRACE_START]");
            })
            e:e()? {?
                #[cfg(feature = "trace")]
                println!("[PEG_TRACE_STOP]");
                e.ok_or("")
            }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    pub(crate) fn parse(source: &str) -> SourceFile {
        let mut files = KnownFiles::new();
        let file_id = files.add_string("test.sql", source);
        match parse_plsql(&files, file_id) {
            Ok(file) => file,
            Err(err) => {
                err.emit(&files);
                panic!("failed to parse {:?}", source);
            }
        }
    }

    fn parse_routine(source: &str) -> RoutineDefinition {
        match parse(source).units.into_iter().next() {
            Some(SourceUnit::Routine(r)) => r,
            other => panic!("expected a routine, got {:?}", other),
        }
    }

    #[test]
    fn parses_a_variety_of_routines() {
        let examples = &[
            "CREATE OR REPLACE PROCEDURE p IS BEGIN NULL; END;",
            "CREATE OR REPLACE EDITIONABLE FUNCTION hr.f(a IN NUMBER, b OUT VARCHAR2) RETURN NUMBER IS\n  x NUMBER := 1;\nBEGIN\n  RETURN x;\nEND f;\n/\n",
            "PROCEDURE p(a NUMBER DEFAULT 5) AS v employees.salary%TYPE; r employees%ROWTYPE; BEGIN NULL; END;",
            "PROCEDURE p IS c_max CONSTANT PLS_INTEGER NOT NULL := 10; e_bad EXCEPTION; PRAGMA EXCEPTION_INIT(e_bad, -20001); BEGIN NULL; END;",
            "PROCEDURE p IS CURSOR c(p_id NUMBER) IS SELECT * FROM t WHERE id = p_id; BEGIN OPEN c(1); CLOSE c; END;",
            "PROCEDURE p IS v TIMESTAMP(6) WITH LOCAL TIME ZONE; d DOUBLE PRECISION; i INTERVAL DAY(2) TO SECOND(6); s VARCHAR2(30 CHAR); BEGIN NULL; END;",
            "PROCEDURE p IS BEGIN IF a = 1 THEN NULL; ELSIF a = 2 THEN NULL; ELSE NULL; END IF; END;",
            "PROCEDURE p IS BEGIN CASE x WHEN 1 THEN NULL; ELSE NULL; END CASE; END;",
            "PROCEDURE p IS BEGIN <<main_loop>> LOOP EXIT main_loop WHEN i > 10; i := i + 1; END LOOP main_loop; END;",
            "PROCEDURE p IS BEGIN FOR i IN REVERSE 1..10 LOOP NULL; END LOOP; END;",
            "PROCEDURE p IS BEGIN FOR r IN (SELECT id FROM t) LOOP NULL; END LOOP; FOR r IN c(5) LOOP NULL; END LOOP; END;",
            "PROCEDURE p IS BEGIN WHILE i < 10 LOOP CONTINUE WHEN i = 5; END LOOP; END;",
            "PROCEDURE p IS BEGIN log_it('x'); calc(5) INTO v; CALL pkg.run() INTO v; pkg.go; END;",
            "PROCEDURE p IS BEGIN SELECT a, b INTO x, y FROM t WHERE c = 1; END;",
            "PROCEDURE p IS BEGIN INSERT INTO t (a, b) VALUES (1, 'x') RETURNING id INTO v; END;",
            "PROCEDURE p IS BEGIN UPDATE t SET a = a + 1 WHERE b IS NOT NULL; DELETE FROM t WHERE CURRENT OF c; END;",
            "PROCEDURE p IS BEGIN EXECUTE IMMEDIATE 'DELETE FROM t WHERE id = :id' USING v_id; END;",
            "PROCEDURE p IS BEGIN OPEN rc FOR SELECT * FROM t; FETCH rc INTO r; CLOSE rc; END;",
            "PROCEDURE p IS BEGIN BEGIN NULL; EXCEPTION WHEN NO_DATA_FOUND OR TOO_MANY_ROWS THEN NULL; WHEN OTHERS THEN RAISE; END; END;",
            "PROCEDURE p IS BEGIN COMMIT; ROLLBACK TO SAVEPOINT s; SAVEPOINT s; END;",
            "PROCEDURE p IS BEGIN v := CASE WHEN a BETWEEN 1 AND 2 AND b NOT LIKE 'x%' THEN 1 ELSE 0 END; END;",
            "PROCEDURE p IS BEGIN v := CAST(x AS NUMBER(10,2)) + EXTRACT(YEAR FROM SYSDATE); END;",
            "PROCEDURE p IS BEGIN v := DATE '2020-01-01' + INTERVAL '1' DAY; END;",
            "PROCEDURE p IS BEGIN IF c%NOTFOUND OR SQL%ROWCOUNT = 0 THEN NULL; END IF; END;",
            "PROCEDURE p IS BEGIN SELECT COUNT(*) INTO n FROM a JOIN b ON a.id = b.id LEFT OUTER JOIN c USING (id) WHERE a.x IN (1, 2) AND EXISTS (SELECT 1 FROM dual); END;",
            "PROCEDURE p IS BEGIN SELECT x INTO v FROM t1 UNION ALL SELECT y FROM t2 MINUS SELECT z FROM t3; END;",
            "PROCEDURE p IS BEGIN v := s.NEXTVAL; v := f(a => 1, b => 2); END;",
        ];
        for source in examples {
            parse(source);
        }
    }

    #[test]
    fn parses_packages() {
        let file = parse(
            "CREATE OR REPLACE PACKAGE pkg AS\n  g NUMBER := 0;\n  c_name CONSTANT VARCHAR2(10) := 'x';\n  PROCEDURE bump;\n  FUNCTION get RETURN NUMBER;\nEND pkg;\n/\nCREATE OR REPLACE PACKAGE BODY pkg AS\n  PROCEDURE bump IS BEGIN g := g + 1; END bump;\n  FUNCTION get RETURN NUMBER IS BEGIN RETURN g; END;\nBEGIN\n  g := 1;\nEND pkg;\n/\n",
        );
        assert_eq!(file.units.len(), 2);
        match &file.units[0] {
            SourceUnit::PackageSpec(spec) => assert_eq!(spec.items.len(), 4),
            other => panic!("expected a package spec, got {:?}", other),
        }
        match &file.units[1] {
            SourceUnit::PackageBody(body) => {
                assert_eq!(body.items.len(), 2);
                assert!(body.initialization.is_some());
            }
            other => panic!("expected a package body, got {:?}", other),
        }
    }

    #[test]
    fn concatenation_and_addition_share_precedence() {
        let routine = parse_routine("PROCEDURE p IS BEGIN v := 1 + 2 || 'x'; END;");
        match &routine.body.statements[0] {
            Statement::Assignment(AssignmentStatement {
                value: Expression::Binary(b),
                ..
            }) => {
                assert_eq!(b.op, BinaryOp::Concat);
                assert!(matches!(
                    b.left.as_ref(),
                    Expression::Binary(BinaryExpression { op: BinaryOp::Add, .. })
                ));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn parameter_modes() {
        let routine = parse_routine("PROCEDURE p(a IN NUMBER, b OUT NUMBER, c IN OUT NOCOPY NUMBER, d DATE) IS BEGIN NULL; END;");
        let modes = routine
            .heading
            .params()
            .iter()
            .map(|p| p.mode())
            .collect::<Vec<_>>();
        assert_eq!(
            modes,
            vec![
                ParameterMode::In,
                ParameterMode::Out,
                ParameterMode::InOut,
                ParameterMode::In
            ]
        );
    }

    #[test]
    fn reserved_words_are_not_identifiers() {
        let mut files = KnownFiles::new();
        let file_id = files.add_string("bad.sql", "PROCEDURE p IS BEGIN select := 1; END;");
        assert!(parse_plsql(&files, file_id).is_err());
    }

    #[test]
    fn spans_identify_nodes() {
        let source = "PROCEDURE p IS BEGIN v := 1; END;";
        let routine = parse_routine(source);
        match routine.body.statements[0].span() {
            Span::Known { start, end, .. } => assert_eq!(&source[start..end], "v := 1;"),
            Span::Unknown => panic!("statement should have a span"),
        }
    }
}
