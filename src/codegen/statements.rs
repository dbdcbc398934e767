//! Statements. Each statement ends its own line.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::{
    builtins,
    expressions::{callee_name, emit_call_args, emit_into, emit_target},
    ident_sql, records,
    routine::{emit_nested_block, tracking_var},
    Emit, PlpgsqlWriter,
};
use crate::{
    ast::{
        AssignmentStatement, CallStatement, CaseStatement, CursorSource, DeleteStatement,
        DmlWhereClause, ElseClause, ExecuteImmediateStatement, Expression, FetchStatement,
        ForCursorStatement, ForRangeStatement, IfStatement, InsertSource, InsertStatement,
        LoopBody, NameExpression, OpenForSource, OpenStatement, ParameterMode, QueryExpression,
        RaiseStatement, ReturningClause, Statement, UpdateStatement, UsingClause,
    },
    context::TransformationContext,
    errors::{Error, Result},
    infer::{CursorAttributeKind, ExceptionResolution, NameResolution},
    package_context::quote_literal,
    tokenizer::Spanned,
};

/// Write a list of statements at the current indentation.
pub(super) fn emit_statements(
    statements: &[Statement],
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    for statement in statements {
        statement.emit(cx, w)?;
    }
    Ok(())
}

/// Write `statements` one level further in.
fn emit_indented(
    statements: &[Statement],
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    w.indented(|w| emit_statements(statements, cx, w))
}

impl Emit for Statement {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        match self {
            Statement::Label(label) => {
                w.line(&format!("<<{}>>", ident_sql(&label.name.canonical_name())));
                Ok(())
            }
            Statement::Assignment(stmt) => emit_assignment(stmt, cx, w),
            Statement::If(stmt) => emit_if(stmt, cx, w),
            Statement::Case(stmt) => emit_case(stmt, cx, w),
            Statement::Loop(stmt) => emit_loop_body(&stmt.body, cx, w),
            Statement::While(stmt) => {
                w.write("WHILE ");
                stmt.condition.emit(cx, w)?;
                w.write(" ");
                emit_loop_body(&stmt.body, cx, w)
            }
            Statement::ForRange(stmt) => emit_for_range(stmt, cx, w),
            Statement::ForCursor(stmt) => emit_for_cursor(stmt, cx, w),
            Statement::Exit(stmt) => {
                w.write(&stmt.keyword.to_uppercase());
                if let Some(label) = &stmt.label {
                    w.write(" ");
                    w.write(&ident_sql(&label.canonical_name()));
                }
                if let Some(when) = &stmt.when_clause {
                    w.write(" WHEN ");
                    when.condition.emit(cx, w)?;
                }
                w.line(";");
                Ok(())
            }
            Statement::Return(stmt) => {
                w.write("RETURN");
                if let Some(value) = &stmt.value {
                    w.write(" ");
                    value.emit(cx, w)?;
                }
                w.line(";");
                Ok(())
            }
            Statement::Null(_) => {
                w.line("NULL;");
                Ok(())
            }
            Statement::Raise(stmt) => emit_raise(stmt, cx, w),
            Statement::Call(stmt) => emit_call(stmt, cx, w),
            Statement::Select(stmt) => {
                if !has_into(&stmt.query) {
                    return Err(Error::unsupported("query without INTO", stmt.span()));
                }
                stmt.query.emit(cx, w)?;
                w.line(";");
                Ok(())
            }
            Statement::Insert(stmt) => emit_insert(stmt, cx, w),
            Statement::Update(stmt) => emit_update(stmt, cx, w),
            Statement::Delete(stmt) => emit_delete(stmt, cx, w),
            Statement::Open(stmt) => emit_open(stmt, cx, w),
            Statement::Fetch(stmt) => emit_fetch(stmt, cx, w),
            Statement::Close(stmt) => {
                let cursor = stmt.cursor.canonical_name();
                w.line(&format!("CLOSE {};", ident_sql(&cursor)));
                if cx.cursors.is_tracked(&cursor) {
                    w.line(&format!("{} := FALSE;", tracking_var(&cursor, "isopen")));
                }
                Ok(())
            }
            Statement::ExecuteImmediate(stmt) => emit_execute_immediate(stmt, cx, w),
            Statement::Block(block) => emit_nested_block(cx, block, w),
            Statement::Transaction(stmt) => Err(Error::unsupported(
                stmt.keyword.to_uppercase(),
                stmt.span(),
            )),
            Statement::Goto(stmt) => Err(Error::unsupported("GOTO", stmt.span())),
            Statement::Forall(stmt) => Err(Error::unsupported("FORALL", stmt.span())),
            Statement::PipeRow(stmt) => Err(Error::unsupported("PIPE ROW", stmt.span())),
        }
    }
}

fn emit_assignment(
    stmt: &AssignmentStatement,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    // `SQL%ROWCOUNT` only exists as a diagnostic item.
    if let Expression::Name(value) = &stmt.value {
        if let NameResolution::CursorAttribute {
            cursor: None,
            attribute: CursorAttributeKind::RowCount,
        } = cx.inference.name(value)?
        {
            w.write("GET DIAGNOSTICS ");
            emit_target(&stmt.target, cx, w)?;
            w.line(" = ROW_COUNT;");
            return Ok(());
        }
    }
    match cx.inference.name(&stmt.target)? {
        NameResolution::ModuleVariable { constant: true, .. } => Err(Error::unsupported(
            "assignment to a package constant",
            stmt.target.span(),
        )),
        NameResolution::ModuleVariable {
            schema,
            package,
            variable,
            ..
        } => {
            let package = cx.package_context(schema, package, stmt.target.span())?;
            w.write(&format!("PERFORM {}(", package.setter_name(variable)));
            stmt.value.emit(cx, w)?;
            w.line(");");
            Ok(())
        }
        NameResolution::JsonbField { variable, fields } => {
            records::emit_field_assignment(variable, fields, &stmt.value, cx, w)
        }
        _ => {
            emit_target(&stmt.target, cx, w)?;
            w.write(" := ");
            stmt.value.emit(cx, w)?;
            w.line(";");
            Ok(())
        }
    }
}

fn emit_else(
    else_clause: Option<&ElseClause>,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    if let Some(else_clause) = else_clause {
        w.line("ELSE");
        emit_indented(&else_clause.statements, cx, w)?;
    }
    Ok(())
}

fn emit_if(stmt: &IfStatement, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
    w.write("IF ");
    stmt.condition.emit(cx, w)?;
    w.line(" THEN");
    emit_indented(&stmt.statements, cx, w)?;
    for elsif in &stmt.elsif_clauses {
        w.write("ELSIF ");
        elsif.condition.emit(cx, w)?;
        w.line(" THEN");
        emit_indented(&elsif.statements, cx, w)?;
    }
    emit_else(stmt.else_clause.as_ref(), cx, w)?;
    w.line("END IF;");
    Ok(())
}

fn emit_case(
    stmt: &CaseStatement,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    w.write("CASE");
    if let Some(operand) = &stmt.operand {
        w.write(" ");
        operand.emit(cx, w)?;
    }
    w.newline();
    for when in &stmt.when_clauses {
        w.write("WHEN ");
        when.condition.emit(cx, w)?;
        w.line(" THEN");
        emit_indented(&when.statements, cx, w)?;
    }
    emit_else(stmt.else_clause.as_ref(), cx, w)?;
    w.line("END CASE;");
    Ok(())
}

/// `LOOP ... END LOOP [label];`, continuing the current line.
fn emit_loop_body(
    body: &LoopBody,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    emit_loop_body_with(body, &[], cx, w)
}

/// Like [`emit_loop_body`], with `prologue` at the top of every iteration.
fn emit_loop_body_with(
    body: &LoopBody,
    prologue: &[String],
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    w.line("LOOP");
    w.indented(|w| {
        for line in prologue {
            w.line(line);
        }
        Ok(())
    })?;
    emit_indented(&body.statements, cx, w)?;
    match &body.end_label {
        Some(label) => w.line(&format!("END LOOP {};", ident_sql(&label.canonical_name()))),
        None => w.line("END LOOP;"),
    }
    Ok(())
}

/// `FOR r IN cursor LOOP`. A tracked cursor is open inside the loop, and
/// every iteration is one more row fetched. It's closed again afterwards.
fn emit_for_cursor(
    stmt: &ForCursorStatement,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    w.write(&format!("FOR {} IN ", ident_sql(&stmt.record.canonical_name())));
    let tracked = match &stmt.source {
        CursorSource::Query(query) => {
            query.query.emit(cx, w)?;
            None
        }
        CursorSource::Named(name) => {
            name.emit(cx, w)?;
            match name.parts.as_slice() {
                [part] => Some(part.ident.canonical_name())
                    .filter(|cursor| cx.cursors.is_tracked(cursor)),
                _ => None,
            }
        }
    };
    w.write(" ");
    let Some(cursor) = tracked else {
        return emit_loop_body(&stmt.body, cx, w);
    };

    let isopen = tracking_var(&cursor, "isopen");
    let found = tracking_var(&cursor, "found");
    let rowcount = tracking_var(&cursor, "rowcount");
    let prologue = [
        format!("{} := TRUE;", isopen),
        format!("{} := {} + 1;", rowcount, rowcount),
        format!("{} := TRUE;", found),
    ];
    emit_loop_body_with(&stmt.body, &prologue, cx, w)?;
    w.line(&format!("{} := FALSE;", isopen));
    w.line(&format!("{} := NULL;", found));
    w.line(&format!("{} := 0;", rowcount));
    Ok(())
}

fn emit_for_range(
    stmt: &ForRangeStatement,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    w.write(&format!("FOR {} IN ", ident_sql(&stmt.index.canonical_name())));
    // PL/pgSQL wants the bounds of a reverse loop from high to low.
    let (from, to) = if stmt.reverse_token.is_some() {
        w.write("REVERSE ");
        (&stmt.upper, &stmt.lower)
    } else {
        (&stmt.lower, &stmt.upper)
    };
    from.emit(cx, w)?;
    w.write("..");
    to.emit(cx, w)?;
    w.write(" ");
    emit_loop_body(&stmt.body, cx, w)
}

fn emit_raise(
    stmt: &RaiseStatement,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    let Some(exception) = &stmt.exception else {
        w.line("RAISE;");
        return Ok(());
    };
    match cx.inference.exception(exception)? {
        ExceptionResolution::UserDefined { sqlstate } => {
            w.line(&format!("RAISE EXCEPTION USING ERRCODE = '{}';", sqlstate))
        }
        ExceptionResolution::Predefined(name) => w.line(&format!("RAISE {};", name)),
        ExceptionResolution::Passthrough(name) => w.line(&format!("RAISE {};", name)),
        ExceptionResolution::Others => {
            return Err(Error::unsupported("RAISE OTHERS", exception.span()))
        }
    }
    Ok(())
}

fn emit_call(
    stmt: &CallStatement,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    let target = &stmt.target;
    let resolution = cx.inference.name(target)?;
    match resolution {
        NameResolution::Builtin { name } if name == "raise_application_error" => {
            return builtins::emit_raise_application_error(target, cx, w)
        }
        NameResolution::Builtin { name } if name == "dbms_output.put_line" => {
            return builtins::emit_put_line(target, cx, w)
        }
        NameResolution::Builtin { .. }
        | NameResolution::PackageFunction { .. }
        | NameResolution::StandaloneRoutine { .. }
        | NameResolution::StaticTypeMethod { .. }
        | NameResolution::TypeMethod { .. } => {}
        _ => return Err(Error::unsupported("call to something that isn't a routine", target.span())),
    }

    if let Some(into) = &stmt.into_clause {
        w.write("SELECT ");
        target.emit(cx, w)?;
        emit_into(into, true, cx, w)?;
        w.line(";");
        return Ok(());
    }

    if let Some(callee) = callee_name(resolution, cx) {
        let routine = match resolution {
            NameResolution::PackageFunction {
                schema,
                package,
                function,
            } => cx.index.routine(schema, Some(package), function),
            NameResolution::StandaloneRoutine { schema, name } => {
                cx.index.routine(schema, None, name)
            }
            _ => None,
        };
        if let Some(routine) = routine.filter(|r| r.has_out_params()) {
            let modes = routine
                .params
                .iter()
                .map(|p| (p.name.as_str(), p.mode))
                .collect::<Vec<_>>();
            return emit_out_param_call(target, &callee, &modes, cx, w);
        }
    }

    w.write("PERFORM ");
    target.emit(cx, w)?;
    w.line(";");
    Ok(())
}

/// Call a procedure with `OUT` parameters, which became a function
/// returning them: `SELECT * INTO outs FROM f(ins);`.
fn emit_out_param_call(
    target: &NameExpression,
    callee: &str,
    params: &[(&str, ParameterMode)],
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    let args = target.call_args().map(|a| a.args.as_slice()).unwrap_or(&[]);
    let mut inputs = vec![];
    let mut outputs = vec![];
    for (position, arg) in args.iter().enumerate() {
        let index = match &arg.name {
            Some(prefix) => {
                let name = prefix.name.canonical_name();
                params.iter().position(|(p, _)| *p == name)
            }
            None if position < params.len() => Some(position),
            None => None,
        };
        let Some(index) = index else {
            return Err(Error::unsupported(
                "argument that matches no catalog parameter",
                arg.span(),
            ));
        };
        let mode = params[index].1;
        if mode != ParameterMode::Out {
            inputs.push(arg);
        }
        if mode != ParameterMode::In {
            let Expression::Name(name) = &arg.value else {
                return Err(Error::unsupported(
                    "OUT argument that isn't a variable",
                    arg.value.span(),
                ));
            };
            outputs.push((index, name));
        }
    }
    outputs.sort_by_key(|(index, _)| *index);

    w.write("SELECT * INTO ");
    for (i, (_, name)) in outputs.iter().enumerate() {
        if i > 0 {
            w.write(", ");
        }
        emit_target(name, cx, w)?;
    }
    w.write(&format!(" FROM {}(", callee));
    for (i, arg) in inputs.iter().enumerate() {
        if i > 0 {
            w.write(", ");
        }
        arg.emit(cx, w)?;
    }
    w.line(");");
    Ok(())
}

/// Does this query select `INTO` variables?
fn has_into(query: &QueryExpression) -> bool {
    match query {
        QueryExpression::Select(select) => select.into_clause.is_some(),
        QueryExpression::With(with) => has_into(&with.query),
        QueryExpression::Nested(_) | QueryExpression::SetOperation(_) => false,
    }
}

fn emit_returning(
    returning: Option<&ReturningClause>,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    if let Some(returning) = returning {
        w.write(" RETURNING ");
        super::emit_separated(&returning.expressions, ", ", cx, w)?;
        emit_into(&returning.into_clause, false, cx, w)?;
    }
    Ok(())
}

fn emit_dml_where(
    where_clause: Option<&DmlWhereClause>,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    match where_clause {
        Some(DmlWhereClause::Condition(clause)) => {
            w.write(" WHERE ");
            clause.condition.emit(cx, w)
        }
        Some(DmlWhereClause::CurrentOf(clause)) => {
            w.write(&format!(
                " WHERE CURRENT OF {}",
                ident_sql(&clause.cursor.canonical_name())
            ));
            Ok(())
        }
        None => Ok(()),
    }
}

fn emit_insert(
    stmt: &InsertStatement,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    w.write(&format!("INSERT INTO {}", cx.table_name(&stmt.table)?));
    if let Some(columns) = &stmt.columns {
        let columns = columns
            .columns
            .iter()
            .map(|c| ident_sql(&c.canonical_name()))
            .collect::<Vec<_>>();
        w.write(&format!(" ({})", columns.join(", ")));
    }
    match &stmt.source {
        InsertSource::Values(values) => {
            w.write(" VALUES (");
            super::emit_separated(&values.values, ", ", cx, w)?;
            w.write(")");
        }
        InsertSource::Query(query) => {
            w.write(" ");
            query.emit(cx, w)?;
        }
    }
    emit_returning(stmt.returning.as_ref(), cx, w)?;
    w.line(";");
    Ok(())
}

fn emit_update(
    stmt: &UpdateStatement,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    w.write(&format!("UPDATE {}", cx.table_name(&stmt.table)?));
    if let Some(alias) = &stmt.alias {
        w.write(&format!(" {}", ident_sql(&alias.canonical_name())));
    }
    w.write(" SET ");
    for (i, assignment) in stmt.assignments.iter().enumerate() {
        if i > 0 {
            w.write(", ");
        }
        // PostgreSQL doesn't allow a qualifier on the column being set.
        let column = assignment
            .column
            .last_ident()
            .map(|c| c.canonical_name())
            .unwrap_or_else(|| assignment.column.name());
        w.write(&format!("{} = ", ident_sql(&column)));
        assignment.value.emit(cx, w)?;
    }
    emit_dml_where(stmt.where_clause.as_ref(), cx, w)?;
    emit_returning(stmt.returning.as_ref(), cx, w)?;
    w.line(";");
    Ok(())
}

fn emit_delete(
    stmt: &DeleteStatement,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    w.write(&format!("DELETE FROM {}", cx.table_name(&stmt.table)?));
    if let Some(alias) = &stmt.alias {
        w.write(&format!(" {}", ident_sql(&alias.canonical_name())));
    }
    emit_dml_where(stmt.where_clause.as_ref(), cx, w)?;
    emit_returning(stmt.returning.as_ref(), cx, w)?;
    w.line(";");
    Ok(())
}

fn emit_open(
    stmt: &OpenStatement,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    let cursor = stmt.cursor.canonical_name();
    w.write(&format!("OPEN {}", ident_sql(&cursor)));
    if let Some(args) = &stmt.args {
        emit_call_args(args, cx, w)?;
    }
    if let Some(for_clause) = &stmt.for_clause {
        match &for_clause.source {
            OpenForSource::Query(query) => {
                w.write(" FOR ");
                query.emit(cx, w)?;
            }
            OpenForSource::Dynamic(sql) => {
                let using = for_clause.using_clause.as_ref();
                w.write(" FOR EXECUTE ");
                emit_dynamic_command(sql, using, cx, w)?;
                emit_using(using, cx, w)?;
            }
        }
    }
    w.line(";");
    if cx.cursors.is_tracked(&cursor) {
        w.line(&format!("{} := TRUE;", tracking_var(&cursor, "isopen")));
        w.line(&format!("{} := NULL;", tracking_var(&cursor, "found")));
        w.line(&format!("{} := 0;", tracking_var(&cursor, "rowcount")));
    }
    Ok(())
}

fn emit_fetch(
    stmt: &FetchStatement,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    if let Some(limit) = &stmt.limit {
        return Err(Error::unsupported("FETCH with LIMIT", limit.span()));
    }
    let cursor = stmt.cursor.canonical_name();
    w.write(&format!("FETCH {}", ident_sql(&cursor)));
    emit_into(&stmt.into_clause, false, cx, w)?;
    w.line(";");
    if cx.cursors.is_tracked(&cursor) {
        let found = tracking_var(&cursor, "found");
        let rowcount = tracking_var(&cursor, "rowcount");
        w.line(&format!("{} := FOUND;", found));
        w.line(&format!("IF {} THEN", found));
        w.indented(|w| {
            w.line(&format!("{} := {} + 1;", rowcount, rowcount));
            Ok(())
        })?;
        w.line("END IF;");
    }
    Ok(())
}

/// Oracle bind placeholders, outside of string literals. `::` is a cast.
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"('(?:[^']|'')*')|(::)|:([A-Za-z][A-Za-z0-9_$#]*|[0-9]+)")
        .expect("constant regex should be valid")
});

/// Replace `:name` and `:1` placeholders with `$1`, `$2`, ... in order of
/// appearance, since Oracle binds dynamic SQL arguments by position.
fn renumber_placeholders(sql: &str) -> String {
    let mut next = 0;
    PLACEHOLDER
        .replace_all(sql, |caps: &Captures| {
            if caps.get(3).is_some() {
                next += 1;
                format!("${}", next)
            } else {
                caps[0].to_owned()
            }
        })
        .into_owned()
}

/// The command string of dynamic SQL. With bind arguments, it must be a
/// literal we can renumber.
fn emit_dynamic_command(
    sql: &Expression,
    using: Option<&UsingClause>,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    if using.is_none() {
        return sql.emit(cx, w);
    }
    match sql.as_string_literal() {
        Some(text) => {
            w.write(&quote_literal(&renumber_placeholders(text)));
            Ok(())
        }
        None => Err(Error::unsupported(
            "USING with dynamic SQL built at runtime",
            sql.span(),
        )),
    }
}

/// ` USING a, b`, if there are bind arguments.
fn emit_using(
    using: Option<&UsingClause>,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    let Some(using) = using else {
        return Ok(());
    };
    w.write(" USING ");
    for (i, arg) in using.args.iter().enumerate() {
        if let Some(mode) = &arg.mode_clause {
            if mode.mode != ParameterMode::In {
                return Err(Error::unsupported("OUT bind argument", mode.span()));
            }
        }
        if i > 0 {
            w.write(", ");
        }
        arg.value.emit(cx, w)?;
    }
    Ok(())
}

fn emit_execute_immediate(
    stmt: &ExecuteImmediateStatement,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    let using = stmt.using_clause.as_ref();
    w.write("EXECUTE ");
    emit_dynamic_command(&stmt.sql, using, cx, w)?;
    if let Some(into) = &stmt.into_clause {
        emit_into(into, true, cx, w)?;
    }
    emit_using(using, cx, w)?;
    w.line(";");
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::renumber_placeholders;
    use crate::{
        codegen::tests::{failure_kind, transpile, transpile_body},
        errors::FailureKind,
    };

    #[test]
    fn conditionals() {
        assert_eq!(
            transpile_body(
                "n NUMBER;",
                "IF n > 1 THEN n := 1; ELSIF n < 0 THEN n := 0; ELSE NULL; END IF;
                 CASE n WHEN 1 THEN n := 2; ELSE n := 3; END CASE;",
            ),
            vec![
                "IF n > 1 THEN",
                "n := 1;",
                "ELSIF n < 0 THEN",
                "n := 0;",
                "ELSE",
                "NULL;",
                "END IF;",
                "CASE n",
                "WHEN 1 THEN",
                "n := 2;",
                "ELSE",
                "n := 3;",
                "END CASE;",
            ]
        );
    }

    #[test]
    fn nested_statements_are_indented() {
        let sql = transpile(
            "CREATE PROCEDURE p IS n NUMBER := 0; BEGIN
               WHILE n < 10 LOOP
                 IF n = 5 THEN EXIT; END IF;
                 n := n + 1;
               END LOOP;
             END;",
        )
        .unwrap();
        assert!(sql.contains(
            "BEGIN
  WHILE n < 10 LOOP
    IF n = 5 THEN
      EXIT;
    END IF;
    n := n + 1;
  END LOOP;
END;"
        ));
    }

    #[test]
    fn loops() {
        assert_eq!(
            transpile_body(
                "n NUMBER;",
                "<<outer>>
                 FOR i IN REVERSE 1..n LOOP
                   EXIT outer WHEN i > 3;
                   CONTINUE;
                 END LOOP outer;
                 LOOP EXIT; END LOOP;",
            ),
            vec![
                "<<outer>>",
                "FOR i IN REVERSE n..1 LOOP",
                "EXIT outer WHEN i > 3;",
                "CONTINUE;",
                "END LOOP outer;",
                "LOOP",
                "EXIT;",
                "END LOOP;",
            ]
        );
    }

    #[test]
    fn cursor_loops() {
        assert_eq!(
            transpile_body(
                "CURSOR c_emps IS SELECT last_name FROM employees;",
                "FOR r IN (SELECT last_name FROM employees WHERE salary > 10) LOOP
                   log_it(r.last_name);
                 END LOOP;
                 FOR e IN c_emps LOOP
                   log_it(e.last_name);
                 END LOOP;",
            ),
            vec![
                "FOR r IN SELECT last_name FROM hr.employees WHERE salary > 10 LOOP",
                "PERFORM hr.log_it(r.last_name);",
                "END LOOP;",
                "FOR e IN c_emps LOOP",
                "PERFORM hr.log_it(e.last_name);",
                "END LOOP;",
            ]
        );
    }

    #[test]
    fn assignments() {
        assert_eq!(
            transpile_body(
                "n NUMBER;",
                "UPDATE employees SET salary = salary * 2 WHERE department_id = 10;
                 n := SQL%ROWCOUNT;
                 counter_pkg.g_counter := counter_pkg.g_counter + n;",
            ),
            vec![
                "UPDATE hr.employees SET salary = salary * 2 WHERE department_id = 10;",
                "GET DIAGNOSTICS n = ROW_COUNT;",
                "PERFORM hr.counter_pkg__set_g_counter(hr.counter_pkg__get_g_counter() + n);",
            ]
        );
        assert_eq!(
            failure_kind("", "counter_pkg.c_limit := 5;"),
            FailureKind::UnsupportedConstruct
        );
    }

    #[test]
    fn calls() {
        assert_eq!(
            transpile_body(
                "v_first VARCHAR2(50); v_last VARCHAR2(50); n NUMBER;",
                "log_it('hi');
                 split_name('Ada Lovelace', v_first, v_last);
                 split_name(p_last => v_last, p_full => 'x', p_first => v_first);
                 n := calc(1);",
            ),
            vec![
                "PERFORM hr.log_it('hi');",
                "SELECT * INTO v_first, v_last FROM hr.split_name('Ada Lovelace');",
                "SELECT * INTO v_first, v_last FROM hr.split_name(p_full => 'x');",
                "n := hr.calc(1);",
            ]
        );
        assert_eq!(
            failure_kind("", "split_name('x', 'y', 'z');"),
            FailureKind::UnsupportedConstruct
        );
    }

    #[test]
    fn calls_with_result_capture() {
        assert_eq!(
            transpile_body(
                "v NUMBER; v_a VARCHAR2(50); v_b VARCHAR2(50);",
                "calc(5) INTO v;
                 util.split_pair(3, v_a, v_b);
                 util.split_pair(p_b => v_b, p_in => v, p_a => v_a);",
            ),
            vec![
                "SELECT hr.calc(5) INTO STRICT v;",
                "SELECT * INTO v_a, v_b FROM hr.util__split_pair(3);",
                "SELECT * INTO v_a, v_b FROM hr.util__split_pair(p_in => v);",
            ]
        );
    }

    #[test]
    fn cursor_attributes_inside_cursor_loops() {
        assert_eq!(
            transpile_body(
                "CURSOR c IS SELECT salary FROM employees; n NUMBER;",
                "FOR r IN c LOOP
                   n := c%ROWCOUNT;
                   IF c%ISOPEN THEN log_it('open'); END IF;
                 END LOOP;",
            ),
            vec![
                "FOR r IN c LOOP",
                "c__isopen := TRUE;",
                "c__rowcount := c__rowcount + 1;",
                "c__found := TRUE;",
                "n := c__rowcount;",
                "IF c__isopen THEN",
                "PERFORM hr.log_it('open');",
                "END IF;",
                "END LOOP;",
                "c__isopen := FALSE;",
                "c__found := NULL;",
                "c__rowcount := 0;",
            ]
        );
    }

    #[test]
    fn select_into_and_dml() {
        assert_eq!(
            transpile_body(
                "v_name VARCHAR2(50); v_id NUMBER;",
                "SELECT last_name INTO v_name FROM employees WHERE employee_id = 7;
                 INSERT INTO employees (employee_id, last_name) VALUES (emp_seq.NEXTVAL, v_name)
                   RETURNING employee_id INTO v_id;
                 DELETE FROM employees e WHERE e.employee_id = v_id;",
            ),
            vec![
                "SELECT last_name INTO STRICT v_name FROM hr.employees WHERE employee_id = 7;",
                "INSERT INTO hr.employees (employee_id, last_name) VALUES (nextval('hr.emp_seq'), v_name) RETURNING employee_id INTO v_id;",
                "DELETE FROM hr.employees e WHERE e.employee_id = v_id;",
            ]
        );
        assert_eq!(
            failure_kind("", "SELECT 1 FROM dual;"),
            FailureKind::UnsupportedConstruct
        );
    }

    #[test]
    fn explicit_cursors_track_their_attributes() {
        let sql = transpile(
            "CREATE PROCEDURE p IS
               CURSOR c IS SELECT salary FROM employees;
               v NUMBER;
             BEGIN
               OPEN c;
               FETCH c INTO v;
               IF c%NOTFOUND THEN log_it('none'); END IF;
               CLOSE c;
             END;",
        )
        .unwrap();
        assert_eq!(
            sql.lines().skip(4).collect::<Vec<_>>(),
            vec![
                "DECLARE",
                "  c CURSOR FOR SELECT salary FROM hr.employees;",
                "  c__isopen boolean := FALSE;",
                "  c__found boolean;",
                "  c__rowcount integer := 0;",
                "  v numeric;",
                "BEGIN",
                "  OPEN c;",
                "  c__isopen := TRUE;",
                "  c__found := NULL;",
                "  c__rowcount := 0;",
                "  FETCH c INTO v;",
                "  c__found := FOUND;",
                "  IF c__found THEN",
                "    c__rowcount := c__rowcount + 1;",
                "  END IF;",
                "  IF NOT c__found THEN",
                "    PERFORM hr.log_it('none');",
                "  END IF;",
                "  CLOSE c;",
                "  c__isopen := FALSE;",
                "END;",
                "$$;",
            ]
        );
    }

    #[test]
    fn dynamic_sql() {
        assert_eq!(
            transpile_body(
                "n NUMBER; v_id NUMBER := 1;",
                "EXECUTE IMMEDIATE 'TRUNCATE TABLE t';
                 EXECUTE IMMEDIATE 'SELECT salary FROM employees WHERE employee_id = :id'
                   INTO n USING v_id;",
            ),
            vec![
                "EXECUTE 'TRUNCATE TABLE t';",
                "EXECUTE 'SELECT salary FROM employees WHERE employee_id = $1' INTO STRICT n USING v_id;",
            ]
        );
        assert_eq!(
            failure_kind(
                "v_sql VARCHAR2(100) := 'x'; n NUMBER;",
                "EXECUTE IMMEDIATE v_sql USING n;"
            ),
            FailureKind::UnsupportedConstruct
        );
    }

    #[test]
    fn placeholders_are_renumbered_outside_strings() {
        assert_eq!(
            renumber_placeholders("UPDATE t SET a = :a, b = ':b', c = x::text WHERE id = :1"),
            "UPDATE t SET a = $1, b = ':b', c = x::text WHERE id = $2"
        );
    }

    #[test]
    fn raise_statements() {
        assert_eq!(
            transpile_body(
                "",
                "BEGIN NULL; EXCEPTION WHEN OTHERS THEN RAISE; END; RAISE NO_DATA_FOUND;"
            ),
            vec![
                "BEGIN",
                "NULL;",
                "EXCEPTION",
                "WHEN OTHERS THEN",
                "RAISE;",
                "END;",
                "RAISE no_data_found;",
            ]
        );
    }

    #[test]
    fn untranslatable_statements_are_unsupported() {
        for statement in [
            "COMMIT;",
            "ROLLBACK;",
            "GOTO done;",
            "FETCH c INTO n LIMIT 10;",
        ] {
            assert_eq!(
                failure_kind(
                    "n NUMBER; CURSOR c IS SELECT salary FROM employees;",
                    statement
                ),
                FailureKind::UnsupportedConstruct,
                "{}",
                statement
            );
        }
    }
}
