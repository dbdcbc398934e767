//! Routine headers, declaration sections and exception handlers.

use super::{ident_sql, records, statements::emit_statements, Emit, PlpgsqlWriter};
use crate::{
    ast::{
        Block, CursorDeclaration, Declaration, ExceptionHandler, ExceptionSection, Parameter,
        ParameterMode, RoutineHeading, RoutineKind, TypeDefinition, VariableDeclaration,
    },
    context::TransformationContext,
    errors::{Error, Result},
    infer::ExceptionResolution,
    tokenizer::Spanned,
};

/// Write everything up to and including `AS $$`.
pub(super) fn emit_header(
    cx: &TransformationContext<'_>,
    heading: &RoutineHeading,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    let name = cx.routine_name(&cx.schema, cx.package.as_deref(), &heading.name.name());
    w.write(&format!("CREATE OR REPLACE FUNCTION {}(", name));
    for (i, param) in heading.params().iter().enumerate() {
        if i > 0 {
            w.write(", ");
        }
        emit_parameter(cx, param, w)?;
    }
    w.line(")");
    w.line(&format!("RETURNS {}", return_type(cx, heading)?));
    w.line("LANGUAGE plpgsql");
    w.line("AS $$");
    Ok(())
}

fn emit_parameter(
    cx: &TransformationContext<'_>,
    param: &Parameter,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    w.write(&ident_sql(&param.name.canonical_name()));
    match param.mode() {
        ParameterMode::In => {}
        ParameterMode::Out => w.write(" OUT"),
        ParameterMode::InOut => w.write(" INOUT"),
    }
    w.write(" ");
    w.write(&cx.inference.declared_type(&param.data_type)?.pg_name);
    if let Some(default) = &param.default {
        w.write(" DEFAULT ");
        default.value.emit(cx, w)?;
    }
    Ok(())
}

/// The `RETURNS` type. We always generate functions, so procedures return
/// their `OUT` parameters, or nothing.
fn return_type(cx: &TransformationContext<'_>, heading: &RoutineHeading) -> Result<String> {
    let outs = heading
        .params()
        .iter()
        .filter(|p| p.is_out())
        .collect::<Vec<_>>();
    match heading.kind {
        RoutineKind::Function => {
            if let Some(out) = outs.first() {
                return Err(Error::unsupported("function with OUT parameters", out.span()));
            }
            let clause = heading.return_clause.as_ref().ok_or_else(|| {
                Error::unsupported("function without a RETURN clause", heading.span())
            })?;
            Ok(cx.inference.declared_type(&clause.data_type)?.pg_name.clone())
        }
        RoutineKind::Procedure => match outs.as_slice() {
            [] => Ok("void".to_owned()),
            [only] => Ok(cx.inference.declared_type(&only.data_type)?.pg_name.clone()),
            _ => Ok("RECORD".to_owned()),
        },
    }
}

/// The only statement in a stub's body.
pub(super) fn stub_return(heading: &RoutineHeading) -> &'static str {
    match heading.kind {
        RoutineKind::Function => "RETURN NULL;",
        RoutineKind::Procedure => "RETURN;",
    }
}

/// Write a routine's outermost block, followed by nothing. Records of query
/// `FOR` loops are declared here, since PL/pgSQL wants them declared.
pub(super) fn emit_routine_block(
    cx: &TransformationContext<'_>,
    block: &Block,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    let declared = block
        .declarations
        .iter()
        .filter_map(|d| match d {
            Declaration::Variable(v) => Some(v.name.canonical_name()),
            _ => None,
        })
        .collect::<Vec<_>>();
    let records = cx
        .cursors
        .loop_records()
        .iter()
        .filter(|r| !declared.contains(r))
        .map(|r| r.as_str())
        .collect::<Vec<_>>();
    emit_block_contents(cx, block, &records, w)?;
    // A routine body's end label names the routine, which PL/pgSQL rejects.
    w.line("END;");
    Ok(())
}

/// Write a nested block.
pub(super) fn emit_nested_block(
    cx: &TransformationContext<'_>,
    block: &Block,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    emit_block_contents(cx, block, &[], w)?;
    match &block.end_label {
        Some(label) => w.line(&format!("END {};", ident_sql(&label.canonical_name()))),
        None => w.line("END;"),
    }
    Ok(())
}

/// Everything from `DECLARE` up to, but not including, `END`.
fn emit_block_contents(
    cx: &TransformationContext<'_>,
    block: &Block,
    records: &[&str],
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    if !records.is_empty() || block.declarations.iter().any(declares_anything) {
        w.line("DECLARE");
        w.indented(|w| {
            for declaration in &block.declarations {
                declaration.emit(cx, w)?;
            }
            for record in records {
                w.line(&format!("{} RECORD;", ident_sql(record)));
            }
            Ok(())
        })?;
    }
    w.line("BEGIN");
    w.indented(|w| emit_statements(&block.statements, cx, w))?;
    if let Some(section) = &block.exception_section {
        section.emit(cx, w)?;
    }
    Ok(())
}

/// Will this declaration produce any output, or an error?
fn declares_anything(declaration: &Declaration) -> bool {
    match declaration {
        Declaration::Exception(_) => false,
        Declaration::Pragma(pragma) => !pragma.name.is("EXCEPTION_INIT"),
        Declaration::Type(decl) => match &decl.definition {
            TypeDefinition::Record(definition) => {
                records::check_record_definition(definition).is_err()
            }
            TypeDefinition::Other(_) => true,
        },
        Declaration::Variable(_) | Declaration::Cursor(_) | Declaration::Subprogram(_) => true,
    }
}

impl Emit for Declaration {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        match self {
            Declaration::Variable(decl) => decl.emit(cx, w),
            Declaration::Cursor(decl) => decl.emit(cx, w),
            // Exceptions are identified by SQLSTATE, so they need no
            // declaration.
            Declaration::Exception(_) => Ok(()),
            Declaration::Pragma(pragma) if pragma.name.is("EXCEPTION_INIT") => Ok(()),
            Declaration::Pragma(pragma) => Err(Error::unsupported(
                format!("PRAGMA {}", pragma.name.name.to_ascii_uppercase()),
                pragma.span(),
            )),
            Declaration::Type(decl) => match &decl.definition {
                TypeDefinition::Record(definition) => records::check_record_definition(definition),
                TypeDefinition::Other(_) => Err(Error::unsupported(
                    format!("{} declaration", decl.type_token.to_uppercase()),
                    decl.span(),
                )),
            },
            Declaration::Subprogram(decl) => {
                Err(Error::unsupported("nested subprogram", decl.span()))
            }
        }
    }
}

impl Emit for VariableDeclaration {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        w.write(&ident_sql(&self.name.canonical_name()));
        if self.constant_token.is_some() {
            w.write(" CONSTANT");
        }
        w.write(" ");
        let declared = cx.inference.declared_type(&self.data_type)?;
        w.write(&declared.pg_name);
        if self.not_null.is_some() {
            w.write(" NOT NULL");
        }
        if let Some(default) = &self.default {
            w.write(" := ");
            default.value.emit(cx, w)?;
        } else if let Some(record) = records::as_jsonb_record(&declared.info) {
            w.write(&format!(" := {}", records::initial_value(record)));
        }
        w.line(";");
        emit_tracking_declarations(cx, &self.name.canonical_name(), w);
        Ok(())
    }
}

impl Emit for CursorDeclaration {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        let name = self.name.canonical_name();
        let query = self.query.as_ref().ok_or_else(|| {
            Error::unsupported("cursor declaration without a query", self.span())
        })?;
        w.write(&ident_sql(&name));
        w.write(" CURSOR");
        if let Some(params) = &self.params {
            w.write(" (");
            for (i, param) in params.params.iter().enumerate() {
                if i > 0 {
                    w.write(", ");
                }
                w.write(&ident_sql(&param.name.canonical_name()));
                w.write(" ");
                w.write(&cx.inference.declared_type(&param.data_type)?.pg_name);
            }
            w.write(")");
        }
        w.write(" FOR ");
        query.query.emit(cx, w)?;
        w.line(";");
        emit_tracking_declarations(cx, &name, w);
        Ok(())
    }
}

/// Declare the variables standing in for the attributes of `cursor`, if
/// anything reads them. Cursor variables need these too.
fn emit_tracking_declarations(cx: &TransformationContext<'_>, cursor: &str, w: &mut PlpgsqlWriter) {
    if cx.cursors.is_tracked(cursor) {
        w.line(&format!("{} boolean := FALSE;", tracking_var(cursor, "isopen")));
        w.line(&format!("{} boolean;", tracking_var(cursor, "found")));
        w.line(&format!("{} integer := 0;", tracking_var(cursor, "rowcount")));
    }
}

/// The variable tracking one attribute of a named cursor.
pub(super) fn tracking_var(cursor: &str, attribute: &str) -> String {
    ident_sql(&format!("{}__{}", cursor, attribute))
}

impl Emit for ExceptionSection {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        w.line("EXCEPTION");
        w.indented(|w| {
            for handler in &self.handlers {
                handler.emit(cx, w)?;
            }
            Ok(())
        })
    }
}

impl Emit for ExceptionHandler {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        w.write("WHEN ");
        for (i, exception) in self.exceptions.iter().enumerate() {
            if i > 0 {
                w.write(" OR ");
            }
            w.write(&condition_sql(cx.inference.exception(exception)?));
        }
        w.line(" THEN");
        w.indented(|w| emit_statements(&self.statements, cx, w))
    }
}

/// How an exception appears in a `WHEN` clause.
fn condition_sql(exception: &ExceptionResolution) -> String {
    match exception {
        ExceptionResolution::Predefined(name) => (*name).to_owned(),
        ExceptionResolution::UserDefined { sqlstate } => format!("SQLSTATE '{}'", sqlstate),
        ExceptionResolution::Others => "OTHERS".to_owned(),
        ExceptionResolution::Passthrough(name) => name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{
        codegen::tests::{failure_kind, transpile},
        errors::FailureKind,
    };

    fn header(source: &str) -> Vec<String> {
        let sql = transpile(source).unwrap_or_else(|f| panic!("{}", f));
        sql.lines().take(2).map(|l| l.to_owned()).collect()
    }

    #[test]
    fn procedures_return_their_out_parameters() {
        assert_eq!(
            header("CREATE PROCEDURE p(a IN NUMBER, b VARCHAR2) IS BEGIN NULL; END;"),
            vec!["CREATE OR REPLACE FUNCTION hr.p(a numeric, b text)", "RETURNS void"],
        );
        assert_eq!(
            header("CREATE PROCEDURE p(a IN NUMBER, b IN DATE, c OUT VARCHAR2) IS BEGIN c := 'x'; END;"),
            vec![
                "CREATE OR REPLACE FUNCTION hr.p(a numeric, b timestamp, c OUT text)",
                "RETURNS text",
            ],
        );
        assert_eq!(
            header("CREATE PROCEDURE p(a IN OUT NUMBER, b OUT NUMBER) IS BEGIN b := a; END;"),
            vec![
                "CREATE OR REPLACE FUNCTION hr.p(a INOUT numeric, b OUT numeric)",
                "RETURNS RECORD",
            ],
        );
    }

    #[test]
    fn parameter_defaults_are_kept() {
        assert_eq!(
            header("CREATE FUNCTION f(a NUMBER DEFAULT 1, b VARCHAR2 := 'x') RETURN NUMBER IS BEGIN RETURN a; END;"),
            vec![
                "CREATE OR REPLACE FUNCTION hr.f(a numeric DEFAULT 1, b text DEFAULT 'x')",
                "RETURNS numeric",
            ],
        );
    }

    #[test]
    fn functions_with_out_parameters_are_unsupported() {
        let failure = transpile(
            "CREATE FUNCTION f(a OUT NUMBER) RETURN NUMBER IS BEGIN a := 1; RETURN 2; END;",
        )
        .unwrap_err();
        assert_eq!(failure.kind, FailureKind::UnsupportedConstruct);
    }

    #[test]
    fn declarations_section() {
        let sql = transpile(
            "CREATE PROCEDURE p IS
               c_max CONSTANT PLS_INTEGER := 10;
               v_name employees.last_name%TYPE NOT NULL := 'x';
               e_bad EXCEPTION;
               PRAGMA EXCEPTION_INIT(e_bad, -20001);
               CURSOR c_emps(p_dept NUMBER) IS
                 SELECT employee_id FROM employees WHERE department_id = p_dept;
             BEGIN
               FOR r IN (SELECT 1 AS one FROM dual) LOOP
                 NULL;
               END LOOP;
             END;",
        )
        .unwrap();
        let lines = sql.lines().collect::<Vec<_>>();
        assert_eq!(
            lines[4..9],
            [
                "DECLARE",
                "  c_max CONSTANT integer := 10;",
                "  v_name hr.employees.last_name%TYPE NOT NULL := 'x';",
                "  c_emps CURSOR (p_dept numeric) FOR SELECT employee_id FROM hr.employees WHERE department_id = p_dept;",
                "  r RECORD;",
            ]
        );
    }

    #[test]
    fn empty_declare_sections_are_omitted() {
        let sql = transpile(
            "CREATE PROCEDURE p IS e EXCEPTION; BEGIN RAISE e; END;",
        )
        .unwrap();
        assert!(!sql.contains("DECLARE"));
        assert!(sql.contains("RAISE EXCEPTION USING ERRCODE = 'P9001';"));
    }

    #[test]
    fn exception_handlers() {
        let sql = transpile(
            "CREATE PROCEDURE p IS
               e_mine EXCEPTION;
             BEGIN
               NULL;
             EXCEPTION
               WHEN ZERO_DIVIDE OR e_mine THEN
                 NULL;
               WHEN no_data_found THEN
                 RAISE;
               WHEN OTHERS THEN
                 NULL;
             END p;",
        )
        .unwrap();
        assert!(sql.ends_with(
            "EXCEPTION
  WHEN division_by_zero OR SQLSTATE 'P9001' THEN
    NULL;
  WHEN no_data_found THEN
    RAISE;
  WHEN OTHERS THEN
    NULL;
END;
$$;"
        ));
    }

    #[test]
    fn untranslatable_declarations_are_unsupported() {
        assert_eq!(
            failure_kind("TYPE t_ids IS TABLE OF NUMBER;", "NULL;"),
            FailureKind::UnsupportedConstruct
        );
        assert_eq!(
            failure_kind("PROCEDURE inner IS BEGIN NULL; END;", "inner;"),
            FailureKind::UnsupportedConstruct
        );
        assert_eq!(
            failure_kind("PRAGMA AUTONOMOUS_TRANSACTION;", "NULL;"),
            FailureKind::UnsupportedConstruct
        );
    }
}
