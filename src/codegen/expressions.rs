//! Expressions, names and assignment targets.

use super::{builtins, ident_sql, records, routine::tracking_var, Emit, PlpgsqlWriter};
use crate::{
    ast::{
        BinaryExpression, BinaryOp, CallArg, CallArgs, Expression, InList, IntoClause,
        NameExpression, OverClause, UnaryOp,
    },
    context::TransformationContext,
    errors::{Error, Result},
    infer::{CursorAttributeKind, NameResolution},
    package_context::quote_literal,
    tokenizer::{LiteralValue, Spanned},
    types::ScalarKind,
};

/// Precedence of things that never need parentheses.
const ATOM: u8 = 100;

/// PostgreSQL precedence levels, loosest first.
const OR: u8 = 1;
const AND: u8 = 2;
const NOT: u8 = 3;
const IS: u8 = 4;
const COMPARISON: u8 = 5;
const PATTERN: u8 = 6;
const OTHER_OPERATOR: u8 = 7;
const ADDITIVE: u8 = 8;
const MULTIPLICATIVE: u8 = 9;
const EXPONENT: u8 = 10;
const UNARY_MINUS: u8 = 11;

fn binary_precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Or => OR,
        BinaryOp::And => AND,
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::LtEq
        | BinaryOp::Gt
        | BinaryOp::GtEq => COMPARISON,
        BinaryOp::Concat => OTHER_OPERATOR,
        BinaryOp::Add | BinaryOp::Sub => ADDITIVE,
        BinaryOp::Mul | BinaryOp::Div => MULTIPLICATIVE,
        BinaryOp::Pow => EXPONENT,
    }
}

fn binary_sql(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Or => "OR",
        BinaryOp::And => "AND",
        BinaryOp::Eq => "=",
        BinaryOp::NotEq => "<>",
        BinaryOp::Lt => "<",
        BinaryOp::LtEq => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::GtEq => ">=",
        BinaryOp::Concat => "||",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Pow => "^",
    }
}

/// How tightly the generated form of `expr` binds.
fn precedence(expr: &Expression, cx: &TransformationContext<'_>) -> Result<u8> {
    Ok(match expr {
        Expression::Unary(unary) => match unary.op {
            UnaryOp::Not => NOT,
            UnaryOp::Neg | UnaryOp::Plus => UNARY_MINUS,
        },
        Expression::Binary(binary) => match date_arithmetic(binary, cx)? {
            Some(_) => ATOM,
            None => binary_precedence(binary.op),
        },
        Expression::IsNull(_) => IS,
        Expression::Like(_) | Expression::Between(_) | Expression::In(_) => PATTERN,
        Expression::Name(name) => match cx.inference.name(name)? {
            NameResolution::CursorAttribute {
                attribute: CursorAttributeKind::NotFound,
                ..
            } => NOT,
            _ => ATOM,
        },
        _ => ATOM,
    })
}

/// Emit `expr`, wrapped in parentheses unless it binds at least as tightly
/// as `min`.
pub(super) fn emit_operand(
    expr: &Expression,
    min: u8,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    if precedence(expr, cx)? < min {
        w.write("(");
        expr.emit(cx, w)?;
        w.write(")");
        Ok(())
    } else {
        expr.emit(cx, w)
    }
}

/// Operands of `IS NULL`, `IS NOT DISTINCT FROM` and friends.
pub(super) fn emit_is_operand(
    expr: &Expression,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    emit_operand(expr, COMPARISON, cx, w)
}

/// The date operand of an addition.
pub(super) fn emit_additive_operand(
    expr: &Expression,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    emit_operand(expr, ADDITIVE, cx, w)
}

/// Oracle date arithmetic counts in days.
enum DateArithmetic<'a> {
    /// `date ± days`, in either order for addition.
    Shift {
        date: &'a Expression,
        days: &'a Expression,
        op: BinaryOp,
    },
    /// `date - date`.
    Difference,
}

fn date_arithmetic<'a>(
    binary: &'a BinaryExpression,
    cx: &TransformationContext<'_>,
) -> Result<Option<DateArithmetic<'a>>> {
    if !matches!(binary.op, BinaryOp::Add | BinaryOp::Sub) {
        return Ok(None);
    }
    let left = cx.inference.type_of(&binary.left)?;
    let right = cx.inference.type_of(&binary.right)?;
    Ok(
        match (binary.op, left.is_date_like(), right.is_date_like()) {
            (_, true, false) if right.is_numeric() => Some(DateArithmetic::Shift {
                date: &binary.left,
                days: &binary.right,
                op: binary.op,
            }),
            (BinaryOp::Add, false, true) if left.is_numeric() => Some(DateArithmetic::Shift {
                date: &binary.right,
                days: &binary.left,
                op: BinaryOp::Add,
            }),
            (BinaryOp::Sub, true, true) => Some(DateArithmetic::Difference),
            _ => None,
        },
    )
}

fn emit_binary(
    binary: &BinaryExpression,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    match date_arithmetic(binary, cx)? {
        Some(DateArithmetic::Shift { date, days, op }) => {
            w.write("(");
            emit_operand(date, ADDITIVE, cx, w)?;
            w.write(&format!(" {} (", binary_sql(op)));
            days.emit(cx, w)?;
            w.write(") * INTERVAL '1 day')");
        }
        Some(DateArithmetic::Difference) => {
            w.write("(EXTRACT(EPOCH FROM (");
            emit_operand(&binary.left, ADDITIVE, cx, w)?;
            w.write(" - ");
            emit_operand(&binary.right, ADDITIVE + 1, cx, w)?;
            w.write(")) / 86400)");
        }
        None => {
            let precedence = binary_precedence(binary.op);
            // Oracle divides integers exactly.
            let integer_division = binary.op == BinaryOp::Div
                && cx.inference.type_of(&binary.left)?.scalar() == Some(ScalarKind::Integer)
                && cx.inference.type_of(&binary.right)?.scalar() == Some(ScalarKind::Integer);
            if integer_division {
                w.write("CAST(");
                binary.left.emit(cx, w)?;
                w.write(" AS numeric)");
            } else {
                emit_operand(&binary.left, precedence, cx, w)?;
            }
            w.write(&format!(" {} ", binary_sql(binary.op)));
            emit_operand(&binary.right, precedence + 1, cx, w)?;
        }
    }
    Ok(())
}

fn not_sql(negated: bool) -> &'static str {
    if negated {
        "NOT "
    } else {
        ""
    }
}

impl Emit for Expression {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        match self {
            Expression::Literal(literal) => match &literal.value {
                LiteralValue::Integer(i) => w.write(&i.to_string()),
                LiteralValue::Number(n) => w.write(n),
                LiteralValue::String(s) => w.write(&quote_literal(s)),
            },
            Expression::Bool(keyword) => w.write(&keyword.to_uppercase()),
            Expression::Null(_) => w.write("NULL"),
            Expression::Name(name) => name.emit(cx, w)?,
            Expression::Unary(unary) => {
                let (op, min) = match unary.op {
                    UnaryOp::Not => ("NOT ", NOT),
                    UnaryOp::Neg => ("-", UNARY_MINUS),
                    UnaryOp::Plus => ("+", UNARY_MINUS),
                };
                w.write(op);
                emit_operand(&unary.operand, min, cx, w)?;
            }
            Expression::Binary(binary) => emit_binary(binary, cx, w)?,
            Expression::IsNull(is_null) => {
                emit_is_operand(&is_null.operand, cx, w)?;
                w.write(" IS ");
                w.write(not_sql(is_null.not_token.is_some()));
                w.write("NULL");
            }
            Expression::Like(like) => {
                emit_operand(&like.operand, OTHER_OPERATOR, cx, w)?;
                w.write(" ");
                w.write(not_sql(like.not_token.is_some()));
                w.write("LIKE ");
                emit_operand(&like.pattern, OTHER_OPERATOR, cx, w)?;
                if let Some(escape) = &like.escape {
                    w.write(" ESCAPE ");
                    emit_operand(&escape.value, OTHER_OPERATOR, cx, w)?;
                }
            }
            Expression::Between(between) => {
                emit_operand(&between.operand, OTHER_OPERATOR, cx, w)?;
                w.write(" ");
                w.write(not_sql(between.not_token.is_some()));
                w.write("BETWEEN ");
                emit_operand(&between.low, OTHER_OPERATOR, cx, w)?;
                w.write(" AND ");
                emit_operand(&between.high, OTHER_OPERATOR, cx, w)?;
            }
            Expression::In(in_expr) => {
                emit_operand(&in_expr.operand, OTHER_OPERATOR, cx, w)?;
                w.write(" ");
                w.write(not_sql(in_expr.not_token.is_some()));
                w.write("IN (");
                match &in_expr.list {
                    InList::Query(query) => query.emit(cx, w)?,
                    InList::Values(values) => super::emit_separated(values, ", ", cx, w)?,
                }
                w.write(")");
            }
            Expression::Exists(exists) => {
                w.write("EXISTS (");
                exists.query.query.emit(cx, w)?;
                w.write(")");
            }
            Expression::Case(case) => {
                w.write("CASE");
                if let Some(operand) = &case.operand {
                    w.write(" ");
                    operand.emit(cx, w)?;
                }
                for when in &case.when_clauses {
                    w.write(" WHEN ");
                    when.condition.emit(cx, w)?;
                    w.write(" THEN ");
                    when.result.emit(cx, w)?;
                }
                if let Some(else_clause) = &case.else_clause {
                    w.write(" ELSE ");
                    else_clause.result.emit(cx, w)?;
                }
                w.write(" END");
            }
            Expression::Parens(parens) => {
                w.write("(");
                parens.expression.emit(cx, w)?;
                w.write(")");
            }
            Expression::Subquery(subquery) => {
                w.write("(");
                subquery.query.emit(cx, w)?;
                w.write(")");
            }
            Expression::Cast(cast) => {
                w.write("CAST(");
                cast.value.emit(cx, w)?;
                w.write(" AS ");
                w.write(&cx.inference.declared_type(&cast.data_type)?.pg_name);
                w.write(")");
            }
            Expression::Extract(extract) => {
                w.write(&format!(
                    "EXTRACT({} FROM ",
                    extract.field.name.to_ascii_uppercase()
                ));
                extract.value.emit(cx, w)?;
                w.write(")");
            }
            Expression::DateLiteral(literal) => {
                // Oracle dates have a time of day, so both become timestamps.
                let LiteralValue::String(value) = &literal.value.value else {
                    return Err(Error::unsupported("non-string date literal", literal.span()));
                };
                w.write(&format!("TIMESTAMP {}", quote_literal(value)));
            }
            Expression::IntervalLiteral(literal) => {
                return Err(Error::unsupported("INTERVAL literal", literal.span()))
            }
            Expression::BindVariable(bind) => {
                return Err(Error::unsupported("bind variable", bind.span()))
            }
            Expression::Star(_) => w.write("*"),
        }
        Ok(())
    }
}

impl Emit for CallArg {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        if let Some(prefix) = &self.name {
            w.write(&ident_sql(&prefix.name.canonical_name()));
            w.write(" => ");
        }
        self.value.emit(cx, w)
    }
}

/// Write `(args)`.
pub(super) fn emit_call_args(
    args: &CallArgs,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    w.write("(");
    if args.distinct_token.is_some() {
        w.write("DISTINCT ");
    }
    super::emit_separated(&args.args, ", ", cx, w)?;
    w.write(")");
    Ok(())
}

/// Write `(args)`, or `()` if there are none. Routine calls need the
/// parentheses in PL/pgSQL.
fn emit_routine_args(
    args: Option<&CallArgs>,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    match args {
        Some(args) => emit_call_args(args, cx, w),
        None => {
            w.write("()");
            Ok(())
        }
    }
}

/// `v.a.b`, quoted as needed.
fn dotted(first: &str, rest: &[String]) -> String {
    let mut out = ident_sql(first);
    for part in rest {
        out.push('.');
        out.push_str(&ident_sql(part));
    }
    out
}

/// The flattened PL/pgSQL name of a routine a name resolves to, if it
/// resolves to a user routine.
pub(super) fn callee_name(
    resolution: &NameResolution,
    cx: &TransformationContext<'_>,
) -> Option<String> {
    match resolution {
        NameResolution::PackageFunction {
            schema,
            package,
            function,
        } => Some(cx.routine_name(schema, Some(package), function)),
        NameResolution::StandaloneRoutine { schema, name } => {
            Some(cx.routine_name(schema, None, name))
        }
        NameResolution::StaticTypeMethod {
            schema,
            type_name,
            method,
        } => Some(cx.routine_name(schema, Some(type_name), method)),
        _ => None,
    }
}

impl Emit for NameExpression {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        match &self.outer_join {
            Some(marker) if !w.outer_join_markers => {
                return Err(Error::unsupported("(+) outer join", marker.span()))
            }
            _ => {}
        }
        let args = self.call_args();
        let resolution = cx.inference.name(self)?;
        match resolution {
            NameResolution::Local { name } => {
                w.write(&ident_sql(name));
                if let Some(args) = args {
                    emit_call_args(args, cx, w)?;
                }
            }
            NameResolution::LocalField { variable, fields } => w.write(&dotted(variable, fields)),
            NameResolution::JsonbField { variable, fields } => {
                let ty = cx.inference.types.require(self)?;
                w.write(&records::field_read(variable, fields, ty));
            }
            NameResolution::ModuleVariable {
                schema,
                package,
                variable,
                ..
            } => {
                let package = cx.package_context(schema, package, self.span())?;
                w.write(&format!("{}()", package.getter_name(variable)));
            }
            NameResolution::TypeMethod {
                schema,
                type_name,
                method,
                receiver,
            } => {
                w.write(&cx.routine_name(schema, Some(type_name), method));
                w.write("(");
                w.write(&ident_sql(receiver));
                if let Some(args) = args {
                    for arg in &args.args {
                        w.write(", ");
                        arg.emit(cx, w)?;
                    }
                }
                w.write(")");
            }
            NameResolution::StaticTypeMethod { .. }
            | NameResolution::PackageFunction { .. }
            | NameResolution::StandaloneRoutine { .. } => {
                let callee = callee_name(resolution, cx)
                    .ok_or_else(|| Error::incomplete("routine has no name", self.span()))?;
                w.write(&callee);
                emit_routine_args(args, cx, w)?;
            }
            NameResolution::Builtin { name } => builtins::emit_builtin(self, name, cx, w)?,
            NameResolution::Column { qualifier, column } => match qualifier {
                Some(qualifier) => w.write(&dotted(qualifier, std::slice::from_ref(column))),
                None => w.write(&ident_sql(column)),
            },
            NameResolution::Sequence { schema, name, op } => w.write(&format!(
                "{}({})",
                op.pg_function(),
                quote_literal(&format!("{}.{}", ident_sql(schema), ident_sql(name)))
            )),
            NameResolution::CursorAttribute { cursor, attribute } => {
                emit_cursor_attribute(self, cursor.as_deref(), *attribute, w)?
            }
        }
        if let Some(over) = &self.over_clause {
            w.write(" ");
            over.emit(cx, w)?;
        }
        Ok(())
    }
}

fn emit_cursor_attribute(
    name: &NameExpression,
    cursor: Option<&str>,
    attribute: CursorAttributeKind,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    match (cursor, attribute) {
        (None, CursorAttributeKind::Found) => w.write("FOUND"),
        (None, CursorAttributeKind::NotFound) => w.write("NOT FOUND"),
        (None, CursorAttributeKind::IsOpen) => {
            return Err(Error::unsupported("SQL%ISOPEN", name.span()))
        }
        (None, CursorAttributeKind::RowCount) => {
            return Err(Error::unsupported(
                "SQL%ROWCOUNT outside a simple assignment",
                name.span(),
            ))
        }
        (Some(cursor), CursorAttributeKind::Found) => w.write(&tracking_var(cursor, "found")),
        (Some(cursor), CursorAttributeKind::NotFound) => {
            w.write(&format!("NOT {}", tracking_var(cursor, "found")))
        }
        (Some(cursor), CursorAttributeKind::IsOpen) => w.write(&tracking_var(cursor, "isopen")),
        (Some(cursor), CursorAttributeKind::RowCount) => {
            w.write(&tracking_var(cursor, "rowcount"))
        }
    }
    Ok(())
}

impl Emit for OverClause {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        w.write("OVER (");
        if let Some(partition_by) = &self.partition_by {
            w.write("PARTITION BY ");
            super::emit_separated(&partition_by.expressions, ", ", cx, w)?;
            if self.order_by.is_some() {
                w.write(" ");
            }
        }
        if let Some(order_by) = &self.order_by {
            order_by.emit(cx, w)?;
        }
        w.write(")");
        Ok(())
    }
}

/// Write a variable we're assigning to.
pub(super) fn emit_target(
    target: &NameExpression,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    match cx.inference.name(target)? {
        NameResolution::Local { .. } if target.call_args().is_some() => {
            Err(Error::unsupported("collection element", target.span()))
        }
        NameResolution::Local { name } => {
            w.write(&ident_sql(name));
            Ok(())
        }
        NameResolution::LocalField { variable, fields } => {
            w.write(&dotted(variable, fields));
            Ok(())
        }
        NameResolution::JsonbField { .. } => Err(Error::unsupported(
            "record field as an INTO target",
            target.span(),
        )),
        NameResolution::ModuleVariable { .. } => Err(Error::unsupported(
            "package variable as an INTO target",
            target.span(),
        )),
        _ => Err(Error::unsupported("assignment to a non-variable", target.span())),
    }
}

/// Write `INTO [STRICT] a, b`, with a leading space.
pub(super) fn emit_into(
    into: &IntoClause,
    strict: bool,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    if let Some(bulk) = &into.bulk_collect {
        return Err(Error::unsupported("BULK COLLECT", bulk.span()));
    }
    w.write(if strict { " INTO STRICT " } else { " INTO " });
    for (i, target) in into.targets.iter().enumerate() {
        if i > 0 {
            w.write(", ");
        }
        emit_target(target, cx, w)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{
        codegen::tests::{failure_kind, transpile_body},
        errors::FailureKind,
    };

    /// Translate `v := <expr>;` with a few typed locals in scope.
    fn expr(source: &str) -> String {
        let lines = transpile_body(
            "v VARCHAR2(100); n NUMBER; i PLS_INTEGER; j PLS_INTEGER; d DATE; d2 DATE; b BOOLEAN;",
            &format!("v := {};", source),
        );
        assert_eq!(lines.len(), 1, "{:?}", lines);
        lines[0]
            .strip_prefix("v := ")
            .and_then(|l| l.strip_suffix(';'))
            .unwrap()
            .to_owned()
    }

    #[test]
    fn operators_keep_their_grouping() {
        // `||` and `+` are equal in PL/SQL, but `+` binds tighter in
        // PostgreSQL.
        assert_eq!(expr("'a' || n + 1"), "('a' || n) + 1");
        assert_eq!(expr("n + 1 || 'a'"), "n + 1 || 'a'");
        // `**` is right-associative, `^` is left-associative.
        assert_eq!(expr("2 ** 3 ** n"), "2 ^ (3 ^ n)");
        assert_eq!(expr("n ** 2"), "n ^ 2");
        assert_eq!(expr("-(n + 1)"), "-(n + 1)");
    }

    #[test]
    fn parenthesized_input_is_kept() {
        // Parentheses in the source are their own node.
        assert_eq!(expr("(n)"), "(n)");
    }

    #[test]
    fn boolean_operators() {
        assert_eq!(
            expr("CASE WHEN NOT (b AND n > 1) OR n != 2 THEN 'x' END"),
            "CASE WHEN NOT (b AND n > 1) OR n <> 2 THEN 'x' END"
        );
        assert_eq!(
            expr("CASE WHEN v IS NOT NULL AND v NOT LIKE 'a%' THEN 'y' ELSE 'z' END"),
            "CASE WHEN v IS NOT NULL AND v NOT LIKE 'a%' THEN 'y' ELSE 'z' END"
        );
        assert_eq!(
            expr("CASE WHEN n BETWEEN 1 AND 2 OR n IN (3, 4) THEN 'w' END"),
            "CASE WHEN n BETWEEN 1 AND 2 OR n IN (3, 4) THEN 'w' END"
        );
    }

    #[test]
    fn integer_division_is_exact() {
        assert_eq!(expr("i / j"), "CAST(i AS numeric) / j");
        assert_eq!(expr("n / i"), "n / i");
    }

    #[test]
    fn date_arithmetic_counts_days() {
        assert_eq!(expr("d + 1"), "(d + (1) * INTERVAL '1 day')");
        assert_eq!(expr("n + d"), "(d + (n) * INTERVAL '1 day')");
        assert_eq!(expr("d - n"), "(d - (n) * INTERVAL '1 day')");
        assert_eq!(expr("d - d2"), "(EXTRACT(EPOCH FROM (d - d2)) / 86400)");
    }

    #[test]
    fn literals_and_casts() {
        assert_eq!(expr("'it''s'"), "'it''s'");
        assert_eq!(expr("DATE '2020-01-31'"), "TIMESTAMP '2020-01-31'");
        assert_eq!(expr("CAST(n AS VARCHAR2(10))"), "CAST(n AS text)");
        assert_eq!(expr("EXTRACT(year FROM d)"), "EXTRACT(YEAR FROM d)");
    }

    #[test]
    fn names_are_rewritten_by_what_they_refer_to() {
        assert_eq!(expr("calc(n)"), "hr.calc(n)");
        assert_eq!(expr("util.bump(n => 1)"), "hr.util__bump(n => 1)");
        assert_eq!(expr("emp_seq.NEXTVAL"), "nextval('hr.emp_seq')");
        assert_eq!(expr("counter_pkg.g_label"), "hr.counter_pkg__get_g_label()");
    }

    #[test]
    fn sql_cursor_attributes() {
        assert_eq!(
            expr("CASE WHEN SQL%NOTFOUND THEN 'none' END"),
            "CASE WHEN NOT FOUND THEN 'none' END"
        );
        assert_eq!(
            failure_kind("v NUMBER;", "IF SQL%ISOPEN THEN NULL; END IF;"),
            FailureKind::UnsupportedConstruct
        );
    }

    #[test]
    fn untranslatable_expressions_are_unsupported() {
        assert_eq!(
            failure_kind("v NUMBER;", "v := :x;"),
            FailureKind::UnsupportedConstruct
        );
        assert_eq!(
            failure_kind("v DATE;", "v := SYSDATE + INTERVAL '1' DAY;"),
            FailureKind::UnsupportedConstruct
        );
    }
}
