//! The code generation pass. We walk the same tree as type inference and
//! write PL/pgSQL, consulting the [`TransformationContext`] for everything
//! we need to know about names and types.
//!
//! Every node kind has exactly one rewrite rule. A node we can't translate
//! is an [`Error::UnsupportedConstruct`], never an empty string.

use phf::phf_set;

use crate::{
    ast::{Block, RoutineHeading},
    context::TransformationContext,
    errors::Result,
    util::is_simple_ident,
};

mod builtins;
mod expressions;
mod queries;
mod records;
mod routine;
mod select_plan;
mod statements;

/// Words PostgreSQL reserves, which we must quote when they appear as
/// identifiers.
static PG_RESERVED: phf::Set<&'static str> = phf_set! {
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc",
    "asymmetric", "both", "case", "cast", "check", "collate", "column",
    "constraint", "create", "current_catalog", "current_date",
    "current_role", "current_time", "current_timestamp", "current_user",
    "default", "deferrable", "desc", "distinct", "do", "else", "end",
    "except", "false", "fetch", "for", "foreign", "from", "grant", "group",
    "having", "in", "initially", "intersect", "into", "lateral", "leading",
    "limit", "localtime", "localtimestamp", "not", "null", "offset", "on",
    "only", "or", "order", "placing", "primary", "references", "returning",
    "select", "session_user", "some", "symmetric", "table", "then", "to",
    "trailing", "true", "union", "unique", "user", "using", "variadic",
    "when", "where", "window", "with",
};

/// Format an identifier for PL/pgSQL, quoting it if necessary.
pub fn ident_sql(name: &str) -> String {
    let plain = is_simple_ident(name)
        && !name.chars().any(|c| c.is_ascii_uppercase())
        && !PG_RESERVED.contains(name);
    if plain {
        name.to_owned()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Something we can write as PL/pgSQL.
pub trait Emit {
    /// Write this node to `w`.
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()>;
}

impl<T: Emit + ?Sized> Emit for Box<T> {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        self.as_ref().emit(cx, w)
    }
}

/// Emit a separated list.
fn emit_separated<T: Emit>(
    items: &[T],
    separator: &str,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            w.write(separator);
        }
        item.emit(cx, w)?;
    }
    Ok(())
}

/// Accumulates generated PL/pgSQL, keeping track of indentation and of the
/// query-local names that must not be schema-qualified.
#[derive(Debug, Default)]
pub struct PlpgsqlWriter {
    out: String,
    indent: usize,
    at_line_start: bool,
    /// Names of common table expressions visible at this point.
    ctes: Vec<String>,
    /// Counter for aliases of unnamed subqueries.
    next_alias: usize,
    /// Are we writing the `ON` condition of a join we made from `(+)`?
    outer_join_markers: bool,
}

impl PlpgsqlWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self {
            at_line_start: true,
            ..Self::default()
        }
    }

    /// Write text on the current line.
    pub fn write(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        if self.at_line_start {
            for _ in 0..self.indent {
                self.out.push_str("  ");
            }
            self.at_line_start = false;
        }
        self.out.push_str(s);
    }

    /// End the current line.
    pub fn newline(&mut self) {
        self.out.push('\n');
        self.at_line_start = true;
    }

    /// Write a complete line.
    pub fn line(&mut self, s: &str) {
        self.write(s);
        self.newline();
    }

    /// Run `f` one level further indented.
    pub fn indented<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.indent += 1;
        let result = f(self);
        self.indent -= 1;
        result
    }

    /// Run `f` with extra common table expressions in scope.
    fn with_ctes<F>(&mut self, names: Vec<String>, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let depth = self.ctes.len();
        self.ctes.extend(names);
        let result = f(self);
        self.ctes.truncate(depth);
        result
    }

    /// Is `name` a common table expression in scope?
    fn is_cte(&self, name: &str) -> bool {
        self.ctes.iter().any(|cte| cte == name)
    }

    /// Run `f` with `(+)` markers dropped instead of rejected.
    fn allowing_outer_join_markers<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let outer = std::mem::replace(&mut self.outer_join_markers, true);
        let result = f(self);
        self.outer_join_markers = outer;
        result
    }

    /// A fresh alias for a subquery that doesn't have one.
    fn fresh_alias(&mut self) -> String {
        self.next_alias += 1;
        format!("sq{}", self.next_alias)
    }

    /// Everything written so far.
    pub fn into_string(self) -> String {
        self.out
    }
}

/// Write a complete `CREATE OR REPLACE FUNCTION` for a routine.
pub fn emit_routine(
    cx: &TransformationContext<'_>,
    heading: &RoutineHeading,
    body: &Block,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    routine::emit_header(cx, heading, w)?;
    routine::emit_routine_block(cx, body, w)?;
    w.write("$$;");
    Ok(())
}

/// Write a stub with the same header as [`emit_routine`], and a body that
/// only returns.
pub fn emit_stub(
    cx: &TransformationContext<'_>,
    heading: &RoutineHeading,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    routine::emit_header(cx, heading, w)?;
    w.line("BEGIN");
    w.indented(|w| {
        w.line(routine::stub_return(heading));
        Ok(())
    })?;
    w.line("END;");
    w.write("$$;");
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        context::{transform_source, OutputMode, TransformFailure},
        errors::FailureKind,
        metadata::tests::test_index,
        package_context::tests::test_sources,
    };

    /// Transform a single routine, returning its SQL.
    pub(crate) fn transpile(source: &str) -> Result<String, TransformFailure> {
        let mut outcomes = transform_source(
            "test.sql",
            source,
            "hr",
            &test_index(),
            &test_sources(),
            OutputMode::Full,
        );
        assert_eq!(outcomes.len(), 1, "expected a single routine");
        outcomes.remove(0).result.map(|t| t.sql)
    }

    /// Transform a procedure with the given body, returning the lines
    /// between `BEGIN` and `END;`, without indentation.
    pub(crate) fn transpile_body(declarations: &str, statements: &str) -> Vec<String> {
        let sql = transpile(&format!(
            "CREATE PROCEDURE p IS {} BEGIN {} END;",
            declarations, statements
        ))
        .unwrap_or_else(|failure| panic!("{}\n{}", failure, failure.rendered));
        let lines = sql.lines().collect::<Vec<_>>();
        let begin = lines.iter().position(|l| *l == "BEGIN").unwrap();
        let end = lines.iter().rposition(|l| *l == "END;").unwrap();
        lines[begin + 1..end]
            .iter()
            .map(|l| l.trim().to_owned())
            .collect()
    }

    /// Transform a procedure and return the failure kind.
    pub(crate) fn failure_kind(declarations: &str, statements: &str) -> FailureKind {
        transpile(&format!(
            "CREATE PROCEDURE p IS {} BEGIN {} END;",
            declarations, statements
        ))
        .unwrap_err()
        .kind
    }

    #[test]
    fn identifiers_are_quoted_when_needed() {
        assert_eq!(ident_sql("salary"), "salary");
        assert_eq!(ident_sql("Salary"), "\"Salary\"");
        assert_eq!(ident_sql("order"), "\"order\"");
        assert_eq!(ident_sql("a\"b"), "\"a\"\"b\"");
        assert_eq!(ident_sql("app_pkg__get_x"), "app_pkg__get_x");
    }

    #[test]
    fn writer_indents_lines() {
        let mut w = PlpgsqlWriter::new();
        w.line("BEGIN");
        w.indented(|w| {
            w.write("NULL");
            w.write(";");
            w.newline();
            Ok(())
        })
        .unwrap();
        w.write("END;");
        assert_eq!(w.into_string(), "BEGIN\n  NULL;\nEND;");
    }

    #[test]
    fn full_routine_layout() {
        let sql = transpile(
            "CREATE OR REPLACE FUNCTION hr.add_one(p_n IN NUMBER) RETURN NUMBER IS
               v_result NUMBER := 0;
             BEGIN
               v_result := p_n + 1;
               RETURN v_result;
             END add_one;",
        )
        .unwrap();
        assert_eq!(
            sql,
            "CREATE OR REPLACE FUNCTION hr.add_one(p_n numeric)
RETURNS numeric
LANGUAGE plpgsql
AS $$
DECLARE
  v_result numeric := 0;
BEGIN
  v_result := p_n + 1;
  RETURN v_result;
END;
$$;"
        );
    }

    #[test]
    fn output_is_deterministic() {
        let source = "CREATE PROCEDURE p IS
                        CURSOR c IS SELECT salary FROM employees;
                        v NUMBER;
                      BEGIN
                        OPEN c;
                        FETCH c INTO v;
                        IF c%FOUND THEN log_it('found'); END IF;
                        CLOSE c;
                      END;";
        assert_eq!(transpile(source).unwrap(), transpile(source).unwrap());
    }
}
