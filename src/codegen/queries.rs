//! Queries. These stay on one line.

use super::{
    emit_separated,
    expressions::emit_into,
    ident_sql,
    select_plan::{has_row_limit, SelectPlan},
    Emit, PlpgsqlWriter,
};
use crate::{
    ast::{
        ForUpdate, FromItem, JoinCondition, JoinKind, OrderBy, OrderByItem, QueryExpression,
        SelectExpression, SelectListItem, SetOperator, TableItem,
    },
    context::TransformationContext,
    errors::{Error, Result},
    tokenizer::Spanned,
};

impl Emit for QueryExpression {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        match self {
            QueryExpression::Select(select) => select.emit(cx, w),
            QueryExpression::Nested(nested) => {
                w.write("(");
                nested.query.emit(cx, w)?;
                w.write(")");
                Ok(())
            }
            QueryExpression::SetOperation(set_operation) => {
                emit_set_operand(&set_operation.left, cx, w)?;
                w.write(match &set_operation.operator {
                    SetOperator::Union(union) if union.all_token.is_some() => " UNION ALL ",
                    SetOperator::Union(_) => " UNION ",
                    SetOperator::Intersect(_) => " INTERSECT ",
                    SetOperator::Minus(_) => " EXCEPT ",
                });
                emit_set_operand(&set_operation.right, cx, w)
            }
            QueryExpression::With(with) => {
                let names = with
                    .ctes
                    .iter()
                    .map(|cte| cte.name.canonical_name())
                    .collect::<Vec<_>>();
                w.with_ctes(names, |w| {
                    w.write("WITH ");
                    for (i, cte) in with.ctes.iter().enumerate() {
                        if i > 0 {
                            w.write(", ");
                        }
                        w.write(&format!("{} AS (", ident_sql(&cte.name.canonical_name())));
                        cte.query.query.emit(cx, w)?;
                        w.write(")");
                    }
                    w.write(" ");
                    with.query.emit(cx, w)
                })
            }
        }
    }
}

/// PostgreSQL only accepts `LIMIT` on a set operand in parentheses.
fn emit_set_operand(
    operand: &QueryExpression,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    match operand {
        QueryExpression::Select(select) if has_row_limit(select) => {
            w.write("(");
            select.emit(cx, w)?;
            w.write(")");
            Ok(())
        }
        _ => operand.emit(cx, w),
    }
}

/// Is this `FROM dual`, which PostgreSQL doesn't need?
fn is_dual(items: &[FromItem]) -> bool {
    match items {
        [FromItem::Table(TableItem { table, .. })] if table.dblink.is_none() => {
            matches!(
                table.name.canonical_parts().as_slice(),
                [name] | [_, name] if name == "dual"
            ) && table.name.qualifier().map_or(true, |q| q == "sys")
        }
        _ => false,
    }
}

impl Emit for SelectExpression {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        let plan = SelectPlan::new(self)?;
        w.write("SELECT ");
        if self.distinct_token.is_some() {
            w.write("DISTINCT ");
        }
        emit_separated(&self.select_list, ", ", cx, w)?;
        if let Some(into) = &self.into_clause {
            // Oracle raises NO_DATA_FOUND and TOO_MANY_ROWS here.
            emit_into(into, true, cx, w)?;
        }
        if let Some(from) = &self.from_clause {
            if plan.rewrites_from() {
                w.write(" FROM ");
                plan.emit_from(cx, w)?;
            } else if !is_dual(&from.items) {
                w.write(" FROM ");
                emit_separated(&from.items, ", ", cx, w)?;
            }
        }
        if let Some(where_clause) = &self.where_clause {
            plan.emit_where(&where_clause.condition, cx, w)?;
        }
        if let Some(group_by) = &self.group_by {
            w.write(" GROUP BY ");
            emit_separated(&group_by.expressions, ", ", cx, w)?;
        }
        if let Some(having) = &self.having {
            w.write(" HAVING ");
            having.condition.emit(cx, w)?;
        }
        if let Some(order_by) = &self.order_by {
            w.write(" ");
            order_by.emit(cx, w)?;
        }
        if let Some(limit) = plan.limit() {
            w.write(&format!(" LIMIT {}", limit));
        }
        if let Some(for_update) = &self.for_update {
            emit_for_update(for_update, w)?;
        }
        Ok(())
    }
}

/// PostgreSQL locks tables, not columns, so `FOR UPDATE OF t.a` becomes
/// `FOR UPDATE OF t`.
fn emit_for_update(for_update: &ForUpdate, w: &mut PlpgsqlWriter) -> Result<()> {
    w.write(" FOR UPDATE");
    if let Some(of) = &for_update.of_columns {
        let mut tables: Vec<String> = vec![];
        for column in &of.columns {
            if let Some(qualifier) = column.qualifier() {
                if !tables.contains(&qualifier) {
                    tables.push(qualifier);
                }
            }
        }
        if !tables.is_empty() {
            let tables = tables.iter().map(|t| ident_sql(t)).collect::<Vec<_>>();
            w.write(&format!(" OF {}", tables.join(", ")));
        }
    }
    for option in &for_update.options {
        let option = option.raw().as_str().to_ascii_uppercase();
        if option == "WAIT" {
            return Err(Error::unsupported("FOR UPDATE WAIT", for_update.span()));
        }
        w.write(" ");
        w.write(&option);
    }
    Ok(())
}

impl Emit for SelectListItem {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        match self {
            SelectListItem::Star(_) => w.write("*"),
            SelectListItem::TableStar(star) => {
                let parts = star
                    .table
                    .canonical_parts()
                    .iter()
                    .map(|p| ident_sql(p))
                    .collect::<Vec<_>>();
                w.write(&format!("{}.*", parts.join(".")));
            }
            SelectListItem::Expression(item) => {
                item.expression.emit(cx, w)?;
                if let Some(alias) = &item.alias {
                    w.write(&format!(" AS {}", ident_sql(&alias.name.canonical_name())));
                }
            }
        }
        Ok(())
    }
}

impl Emit for FromItem {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        match self {
            FromItem::Table(item) => {
                let parts = item.table.name.canonical_parts();
                match parts.as_slice() {
                    [name] if item.table.dblink.is_none() && w.is_cte(name) => {
                        w.write(&ident_sql(name))
                    }
                    _ => w.write(&cx.table_name(&item.table)?),
                }
                if let Some(alias) = &item.alias {
                    w.write(&format!(" {}", ident_sql(&alias.canonical_name())));
                }
            }
            FromItem::Subquery(item) => {
                w.write("(");
                item.query.query.emit(cx, w)?;
                w.write(")");
                // PostgreSQL requires an alias here.
                let alias = match &item.alias {
                    Some(alias) => ident_sql(&alias.canonical_name()),
                    None => w.fresh_alias(),
                };
                w.write(&format!(" {}", alias));
            }
            FromItem::Join(join) => {
                join.left.emit(cx, w)?;
                w.write(match join.operator.kind {
                    JoinKind::Inner => " JOIN ",
                    JoinKind::Left => " LEFT JOIN ",
                    JoinKind::Right => " RIGHT JOIN ",
                    JoinKind::Full => " FULL JOIN ",
                    JoinKind::Cross => " CROSS JOIN ",
                });
                join.right.emit(cx, w)?;
                match &join.condition {
                    Some(JoinCondition::On(on)) => {
                        w.write(" ON ");
                        on.condition.emit(cx, w)?;
                    }
                    Some(JoinCondition::Using(using)) => {
                        let columns = using
                            .columns
                            .columns
                            .iter()
                            .map(|c| ident_sql(&c.canonical_name()))
                            .collect::<Vec<_>>();
                        w.write(&format!(" USING ({})", columns.join(", ")));
                    }
                    None => {}
                }
            }
        }
        Ok(())
    }
}

impl Emit for OrderBy {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        w.write("ORDER BY ");
        emit_separated(&self.items, ", ", cx, w)
    }
}

impl Emit for OrderByItem {
    fn emit(&self, cx: &TransformationContext<'_>, w: &mut PlpgsqlWriter) -> Result<()> {
        self.expression.emit(cx, w)?;
        if let Some(direction) = &self.direction {
            w.write(&format!(" {}", direction.to_uppercase()));
        }
        if let Some(nulls) = &self.nulls {
            w.write(&format!(" NULLS {}", nulls.position.to_uppercase()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{
        codegen::tests::{failure_kind, transpile_body},
        errors::FailureKind,
    };

    /// Translate a `SELECT ... INTO v` statement.
    fn query(source: &str) -> String {
        let lines = transpile_body("v NUMBER; n NUMBER; s VARCHAR2(100);", source);
        assert_eq!(lines.len(), 1, "{:?}", lines);
        lines[0].strip_suffix(';').unwrap().to_owned()
    }

    #[test]
    fn dual_is_dropped() {
        assert_eq!(query("SELECT 1 INTO v FROM dual;"), "SELECT 1 INTO STRICT v");
        assert!(!query("SELECT n INTO v FROM sys.dual;").contains("FROM"));
    }

    #[test]
    fn joins_and_aliases() {
        assert_eq!(
            query(
                "SELECT MAX(e.salary) INTO v
                 FROM employees e JOIN departments d ON e.department_id = d.department_id
                 WHERE d.department_id = 10
                 GROUP BY d.department_id HAVING COUNT(*) > 1;"
            ),
            "SELECT max(e.salary) INTO STRICT v FROM hr.employees e JOIN hr.departments d ON e.department_id = d.department_id WHERE d.department_id = 10 GROUP BY d.department_id HAVING count(*) > 1"
        );
        assert_eq!(
            query("SELECT COUNT(*) INTO v FROM (SELECT salary FROM employees);"),
            "SELECT count(*) INTO STRICT v FROM (SELECT salary FROM hr.employees) sq1"
        );
    }

    #[test]
    fn synonyms_are_resolved() {
        assert_eq!(
            query("SELECT COUNT(*) INTO v FROM staff;"),
            "SELECT count(*) INTO STRICT v FROM hr.employees"
        );
    }

    #[test]
    fn set_operations_and_ctes() {
        assert_eq!(
            query(
                "WITH rich AS (SELECT employee_id FROM employees WHERE salary > 100)
                 SELECT COUNT(*) INTO v FROM rich;"
            ),
            "WITH rich AS (SELECT employee_id FROM hr.employees WHERE salary > 100) SELECT count(*) INTO STRICT v FROM rich"
        );
        let lines = transpile_body(
            "",
            "FOR r IN (SELECT employee_id FROM employees MINUS SELECT employee_id FROM employees WHERE salary > 1) LOOP NULL; END LOOP;",
        );
        assert_eq!(
            lines[0],
            "FOR r IN SELECT employee_id FROM hr.employees EXCEPT SELECT employee_id FROM hr.employees WHERE salary > 1 LOOP"
        );
    }

    #[test]
    fn ordering_and_locking() {
        assert_eq!(
            query(
                "SELECT last_name INTO s FROM employees e
                 WHERE employee_id = 1 ORDER BY last_name DESC NULLS LAST
                 FOR UPDATE OF e.salary NOWAIT;"
            ),
            "SELECT last_name INTO STRICT s FROM hr.employees e WHERE employee_id = 1 ORDER BY last_name DESC NULLS LAST FOR UPDATE OF e NOWAIT"
        );
        assert_eq!(
            failure_kind(
                "v NUMBER;",
                "SELECT salary INTO v FROM employees FOR UPDATE WAIT 5;"
            ),
            FailureKind::UnsupportedConstruct
        );
    }
}
