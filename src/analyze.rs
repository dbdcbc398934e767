//! Read-only walks over a routine's syntax tree. We rely heavily on
//! [`derive_visitor`] to traverse the AST.

use std::collections::BTreeSet;

use derive_visitor::{Drive, Visitor};

use crate::{
    ast::{CursorSource, Expression, ForCursorStatement, NameExpression},
    errors::{Error, Result},
    infer::TypeAnnotations,
    tokenizer::{Span, Spanned},
};

/// Collect the spans of every expression under a node, outermost first.
#[derive(Debug, Default, Visitor)]
#[visitor(Expression(enter))]
struct ExpressionSpans {
    spans: Vec<Span>,
}

impl ExpressionSpans {
    fn enter_expression(&mut self, expr: &Expression) {
        self.spans.push(expr.span());
    }
}

/// The spans of every expression under `node`.
pub fn expression_spans(node: &impl Drive) -> Vec<Span> {
    let mut visitor = ExpressionSpans::default();
    node.drive(&mut visitor);
    visitor.spans
}

/// Check that type inference annotated every expression under `node`.
///
/// Code generation must never guess, so we run this between the two passes
/// and fail fast.
pub fn check_annotations(node: &impl Drive, types: &TypeAnnotations) -> Result<()> {
    match expression_spans(node)
        .into_iter()
        .find(|span| types.get(span).is_none())
    {
        Some(span) => Err(Error::incomplete(
            "expression has no type annotation",
            span,
        )),
        None => Ok(()),
    }
}

/// How a routine uses cursors, for the declarations code generation has to
/// add.
#[derive(Debug, Default, Visitor)]
#[visitor(NameExpression(enter), ForCursorStatement(enter))]
pub struct CursorUsage {
    /// Named cursors whose `%FOUND`, `%NOTFOUND`, `%ISOPEN` or `%ROWCOUNT`
    /// we read.
    tracked: BTreeSet<String>,
    /// Records of `FOR r IN (query)` loops, in order of first appearance.
    loop_records: Vec<String>,
}

impl CursorUsage {
    /// Find the cursor usage under `node`.
    pub fn collect(node: &impl Drive) -> Self {
        let mut usage = Self::default();
        node.drive(&mut usage);
        usage
    }

    fn enter_name_expression(&mut self, name: &NameExpression) {
        if name.attribute.is_none() {
            return;
        }
        if let [part] = name.parts.as_slice() {
            let cursor = part.ident.canonical_name();
            if cursor != "sql" {
                self.tracked.insert(cursor);
            }
        }
    }

    fn enter_for_cursor_statement(&mut self, stmt: &ForCursorStatement) {
        if let CursorSource::Query(_) = stmt.source {
            let record = stmt.record.canonical_name();
            if !self.loop_records.contains(&record) {
                self.loop_records.push(record);
            }
        }
    }

    /// Do we need tracking variables for `cursor`?
    pub fn is_tracked(&self, cursor: &str) -> bool {
        self.tracked.contains(cursor)
    }

    /// Cursors which need tracking variables, sorted by name.
    pub fn tracked(&self) -> impl Iterator<Item = &str> {
        self.tracked.iter().map(|c| c.as_str())
    }

    /// Records that need a `RECORD` declaration.
    pub fn loop_records(&self) -> &[String] {
        &self.loop_records
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{ast::tests::parse, ast::SourceUnit, errors::FailureKind, types::TypeInfo};

    fn parse_routine(source: &str) -> crate::ast::RoutineDefinition {
        match parse(source).units.into_iter().next().unwrap() {
            SourceUnit::Routine(routine) => routine,
            _ => panic!("expected a routine"),
        }
    }

    #[test]
    fn finds_nested_expressions() {
        let routine = parse_routine(
            "CREATE PROCEDURE p IS BEGIN IF a + f(b) > 1 THEN NULL; END IF; END;",
        );
        // The comparison, the sum, `a`, `f(b)`, `b` and `1`.
        assert_eq!(expression_spans(&routine.body).len(), 6);
    }

    #[test]
    fn missing_annotations_are_incomplete() {
        let routine = parse_routine("CREATE PROCEDURE p IS BEGIN x := 1; END;");
        let mut types = TypeAnnotations::default();
        let err = check_annotations(&routine.body, &types).unwrap_err();
        assert_eq!(err.kind(), FailureKind::TypeInferenceIncomplete);
        for span in expression_spans(&routine.body) {
            types.record(&span, TypeInfo::Unknown).unwrap();
        }
        check_annotations(&routine.body, &types).unwrap();
    }

    #[test]
    fn collects_cursor_usage() {
        let routine = parse_routine(
            "CREATE PROCEDURE p IS
               CURSOR c IS SELECT 1 FROM dual;
             BEGIN
               IF c%ISOPEN OR SQL%FOUND THEN NULL; END IF;
               FOR r IN (SELECT 1 FROM dual) LOOP NULL; END LOOP;
               FOR r IN (SELECT 2 FROM dual) LOOP NULL; END LOOP;
               FOR q IN c LOOP NULL; END LOOP;
             END;",
        );
        let usage = CursorUsage::collect(&routine.body);
        assert_eq!(usage.tracked().collect::<Vec<_>>(), vec!["c"]);
        assert!(usage.is_tracked("c"));
        assert_eq!(usage.loop_records(), &["r".to_owned()]);
    }
}
