//! Oracle query idioms that PostgreSQL spells differently: `ROWNUM` limits
//! in `WHERE`, and `(+)` outer join markers.
//!
//! We split the `WHERE` condition into its top-level `AND` terms. A term
//! like `ROWNUM <= 10` becomes `LIMIT 10`. Terms with `(+)` markers become
//! the `ON` conditions of ANSI joins. Everything else stays in `WHERE`.

use std::collections::{BTreeSet, HashSet};

use derive_visitor::{Drive, Visitor};

use super::{Emit, PlpgsqlWriter};
use crate::{
    ast::{BinaryExpression, BinaryOp, Expression, FromItem, NameExpression, SelectExpression},
    context::TransformationContext,
    errors::{Error, Result},
    tokenizer::{Span, Spanned},
};

/// How to write the `FROM`, `WHERE` and `LIMIT` parts of a `SELECT`.
pub(super) struct SelectPlan<'q> {
    /// `None` if the `FROM` clause is written as it appears.
    from: Option<Vec<Segment<'q>>>,
    /// Terms left for `WHERE`, or `None` to write the condition unchanged.
    filters: Option<Vec<&'q Expression>>,
    limit: Option<i64>,
}

/// A chain of joins, separated from the next chain by a comma.
struct Segment<'q> {
    first: &'q FromItem,
    joins: Vec<Join<'q>>,
}

struct Join<'q> {
    keyword: &'static str,
    table: &'q FromItem,
    on: Vec<&'q Expression>,
}

/// The `(+)` terms that make one table optional.
struct OuterGroup<'q> {
    optional: String,
    base: String,
    conditions: Vec<&'q Expression>,
    span: Span,
}

impl<'q> SelectPlan<'q> {
    /// Plan `select`, failing on `(+)` patterns we can't express as ANSI
    /// joins.
    pub(super) fn new(select: &'q SelectExpression) -> Result<Self> {
        let mut plan = SelectPlan {
            from: None,
            filters: None,
            limit: None,
        };
        let condition = match &select.where_clause {
            Some(where_clause) => &where_clause.condition,
            None => return Ok(plan),
        };
        let mut terms = vec![];
        conjuncts(condition, &mut terms);
        let all_terms = terms.len();

        if let Some(pos) = terms.iter().position(|term| row_limit(term).is_some()) {
            plan.limit = row_limit(terms[pos]);
            terms.remove(pos);
        }

        let mut outer_terms = vec![];
        terms.retain(|term| {
            let refs = ColumnRefs::collect(*term);
            if refs.marked.is_empty() && refs.unqualified_marker.is_none() {
                true
            } else {
                outer_terms.push((*term, refs));
                false
            }
        });
        if !outer_terms.is_empty() {
            let items = select
                .from_clause
                .as_ref()
                .map(|from| from.items.as_slice())
                .unwrap_or_default();
            plan.from = Some(plan_joins(items, outer_terms)?);
        }

        if terms.len() != all_terms {
            plan.filters = Some(terms);
        }
        Ok(plan)
    }

    /// Does this plan rewrite the `FROM` clause?
    pub(super) fn rewrites_from(&self) -> bool {
        self.from.is_some()
    }

    /// The `LIMIT` to append, if any.
    pub(super) fn limit(&self) -> Option<i64> {
        self.limit
    }

    /// Write the rewritten `FROM` items.
    pub(super) fn emit_from(
        &self,
        cx: &TransformationContext<'_>,
        w: &mut PlpgsqlWriter,
    ) -> Result<()> {
        let segments = match &self.from {
            Some(segments) => segments,
            None => return Ok(()),
        };
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                w.write(", ");
            }
            segment.first.emit(cx, w)?;
            for join in &segment.joins {
                w.write(&format!(" {} ", join.keyword));
                join.table.emit(cx, w)?;
                w.write(" ON ");
                w.allowing_outer_join_markers(|w| emit_conjunction(&join.on, cx, w))?;
            }
        }
        Ok(())
    }

    /// Write ` WHERE ...`, if anything is left to filter on.
    pub(super) fn emit_where(
        &self,
        condition: &Expression,
        cx: &TransformationContext<'_>,
        w: &mut PlpgsqlWriter,
    ) -> Result<()> {
        match &self.filters {
            None => {
                w.write(" WHERE ");
                condition.emit(cx, w)
            }
            Some(filters) if filters.is_empty() => Ok(()),
            Some(filters) => {
                w.write(" WHERE ");
                emit_conjunction(filters, cx, w)
            }
        }
    }
}

/// Does this `SELECT` turn into a query with `LIMIT`? Set operations need
/// to parenthesize those.
pub(super) fn has_row_limit(select: &SelectExpression) -> bool {
    let mut terms = vec![];
    if let Some(where_clause) = &select.where_clause {
        conjuncts(&where_clause.condition, &mut terms);
    }
    terms.iter().any(|term| row_limit(term).is_some())
}

fn emit_conjunction(
    terms: &[&Expression],
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            w.write(" AND ");
        }
        term.emit(cx, w)?;
    }
    Ok(())
}

/// Split `a AND b AND c` into its terms.
fn conjuncts<'q>(expr: &'q Expression, out: &mut Vec<&'q Expression>) {
    match expr {
        Expression::Binary(BinaryExpression {
            left,
            op: BinaryOp::And,
            right,
            ..
        }) => {
            conjuncts(left, out);
            conjuncts(right, out);
        }
        _ => out.push(expr),
    }
}

/// Is this a bare `ROWNUM`?
fn is_rownum(expr: &Expression) -> bool {
    match expr {
        Expression::Name(name) => name
            .as_simple()
            .map_or(false, |ident| ident.canonical_name() == "rownum"),
        Expression::Parens(parens) => is_rownum(&parens.expression),
        _ => false,
    }
}

/// The row count a `ROWNUM` term allows, for `ROWNUM <= n`, `ROWNUM < n`,
/// `ROWNUM = 1` and the same comparisons written the other way around.
fn row_limit(term: &Expression) -> Option<i64> {
    let binary = match term {
        Expression::Binary(binary) => binary,
        Expression::Parens(parens) => return row_limit(&parens.expression),
        _ => return None,
    };
    let (op, bound) = if is_rownum(&binary.left) {
        (binary.op, binary.right.as_integer_literal()?)
    } else if is_rownum(&binary.right) {
        let flipped = match binary.op {
            BinaryOp::GtEq => BinaryOp::LtEq,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Eq => BinaryOp::Eq,
            _ => return None,
        };
        (flipped, binary.left.as_integer_literal()?)
    } else {
        return None;
    };
    match op {
        BinaryOp::LtEq => Some(bound.max(0)),
        BinaryOp::Lt => Some((bound - 1).max(0)),
        BinaryOp::Eq if bound == 1 => Some(1),
        _ => None,
    }
}

/// The table qualifiers a term refers to, split by whether they carry a
/// `(+)` marker.
#[derive(Debug, Default, Visitor)]
#[visitor(NameExpression(enter), Expression(enter))]
struct ColumnRefs {
    marked: BTreeSet<String>,
    unmarked: BTreeSet<String>,
    unqualified_marker: Option<Span>,
    has_or: bool,
}

impl ColumnRefs {
    fn collect(node: &impl Drive) -> Self {
        let mut refs = Self::default();
        node.drive(&mut refs);
        refs
    }

    fn enter_name_expression(&mut self, name: &NameExpression) {
        match name.parts.as_slice() {
            [table, column] if table.args.is_none() && column.args.is_none() => {
                let qualifier = table.ident.canonical_name();
                if name.outer_join.is_some() {
                    self.marked.insert(qualifier);
                } else {
                    self.unmarked.insert(qualifier);
                }
            }
            _ => {
                if let Some(marker) = &name.outer_join {
                    self.unqualified_marker.get_or_insert(marker.span());
                }
            }
        }
    }

    fn enter_expression(&mut self, expr: &Expression) {
        if let Expression::Binary(binary) = expr {
            if binary.op == BinaryOp::Or {
                self.has_or = true;
            }
        }
    }
}

/// The name other clauses use for a `FROM` item.
fn item_key(item: &FromItem) -> Option<String> {
    match item {
        FromItem::Table(table) => Some(match &table.alias {
            Some(alias) => alias.canonical_name(),
            None => table.table.name.canonical_parts().last()?.clone(),
        }),
        FromItem::Subquery(subquery) => subquery.alias.as_ref().map(|a| a.canonical_name()),
        FromItem::Join(_) => None,
    }
}

/// Turn the `(+)` terms into chains of `LEFT JOIN` and `RIGHT JOIN`.
fn plan_joins<'q>(
    items: &'q [FromItem],
    outer_terms: Vec<(&'q Expression, ColumnRefs)>,
) -> Result<Vec<Segment<'q>>> {
    let mut tables: Vec<(String, &'q FromItem)> = vec![];
    for item in items {
        match item_key(item) {
            Some(key) => tables.push((key, item)),
            None => {
                return Err(Error::unsupported(
                    "(+) outer join mixed with ANSI joins or unnamed subqueries",
                    item.span(),
                ))
            }
        }
    }
    let is_table = |key: &str| tables.iter().any(|(k, _)| k == key);

    let mut pending: Vec<(String, Option<String>, Vec<&'q Expression>, Span)> = vec![];
    for (term, refs) in outer_terms {
        let span = term.span();
        if let Some(marker) = refs.unqualified_marker {
            return Err(Error::unsupported("(+) on an unqualified column", marker));
        }
        if refs.has_or {
            return Err(Error::unsupported("(+) inside OR", span));
        }
        let optional = match refs.marked.iter().collect::<Vec<_>>().as_slice() {
            [optional] if is_table(optional) => (*optional).clone(),
            _ => return Err(Error::unsupported("(+) on more than one table", span)),
        };
        let bases = refs
            .unmarked
            .iter()
            .filter(|q| **q != optional && is_table(q))
            .collect::<Vec<_>>();
        let base = match bases.as_slice() {
            [] => None,
            [base] => Some((*base).clone()),
            _ => {
                return Err(Error::unsupported(
                    "(+) condition joining more than two tables",
                    span,
                ))
            }
        };
        match pending.iter_mut().find(|(o, ..)| *o == optional) {
            Some((_, group_base, conditions, _)) => {
                if base.is_some() && group_base.is_some() && *group_base != base {
                    return Err(Error::unsupported(
                        "table outer-joined to more than one table",
                        span,
                    ));
                }
                if group_base.is_none() {
                    *group_base = base;
                }
                conditions.push(term);
            }
            None => pending.push((optional, base, vec![term], span)),
        }
    }
    let mut groups = vec![];
    for (optional, base, conditions, span) in pending {
        let base =
            base.ok_or_else(|| Error::unsupported("(+) without a join condition", span))?;
        groups.push(OuterGroup {
            optional,
            base,
            conditions,
            span,
        });
    }

    let lookup = |key: &str, span: Span| -> Result<&'q FromItem> {
        tables
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, item)| *item)
            .ok_or_else(|| Error::unsupported(format!("(+) on unknown table {}", key), span))
    };
    let mut placed: HashSet<String> = HashSet::new();
    let mut in_segment: HashSet<String> = HashSet::new();
    let mut segments: Vec<Segment<'q>> = vec![];
    while !groups.is_empty() {
        let next = groups.iter().position(|g| {
            in_segment.contains(&g.base) != in_segment.contains(&g.optional)
        });
        let group = match next {
            Some(pos) => groups.remove(pos),
            None => {
                // Start a new chain at the first unplaced base.
                let group = &groups[0];
                if placed.contains(&group.base) {
                    return Err(Error::unsupported(
                        "(+) joins that don't form a chain",
                        group.span,
                    ));
                }
                in_segment.clear();
                in_segment.insert(group.base.clone());
                placed.insert(group.base.clone());
                segments.push(Segment {
                    first: lookup(&group.base, group.span)?,
                    joins: vec![],
                });
                continue;
            }
        };
        let (keyword, joined) = if in_segment.contains(&group.optional) {
            ("RIGHT JOIN", group.base)
        } else {
            ("LEFT JOIN", group.optional)
        };
        if placed.contains(&joined) {
            return Err(Error::unsupported(
                "(+) joins that don't form a chain",
                group.span,
            ));
        }
        let table = lookup(&joined, group.span)?;
        in_segment.insert(joined.clone());
        placed.insert(joined);
        if let Some(segment) = segments.last_mut() {
            segment.joins.push(Join {
                keyword,
                table,
                on: group.conditions,
            });
        }
    }

    for (key, item) in &tables {
        if !placed.contains(key) {
            segments.push(Segment {
                first: item,
                joins: vec![],
            });
        }
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{
        codegen::tests::{failure_kind, transpile_body},
        errors::FailureKind,
    };

    fn query(source: &str) -> String {
        let lines = transpile_body("v NUMBER; s VARCHAR2(100);", source);
        assert_eq!(lines.len(), 1, "{:?}", lines);
        lines[0].strip_suffix(';').unwrap().to_owned()
    }

    #[test]
    fn rownum_bounds_become_limits() {
        assert_eq!(
            query("SELECT last_name INTO s FROM employees WHERE ROWNUM = 1;"),
            "SELECT last_name INTO STRICT s FROM hr.employees LIMIT 1"
        );
        assert_eq!(
            query(
                "SELECT COUNT(*) INTO v FROM (SELECT salary FROM employees WHERE salary > 10 AND ROWNUM <= 5);"
            ),
            "SELECT count(*) INTO STRICT v FROM (SELECT salary FROM hr.employees WHERE salary > 10 LIMIT 5) sq1"
        );
        assert_eq!(
            query(
                "SELECT last_name INTO s FROM employees WHERE 3 > ROWNUM AND department_id = 10 ORDER BY salary DESC;"
            ),
            "SELECT last_name INTO STRICT s FROM hr.employees WHERE department_id = 10 ORDER BY salary DESC LIMIT 2"
        );
    }

    #[test]
    fn other_rownum_uses_are_unsupported() {
        assert_eq!(
            failure_kind("v NUMBER;", "SELECT ROWNUM INTO v FROM employees WHERE salary > 1;"),
            FailureKind::UnsupportedConstruct
        );
        assert_eq!(
            failure_kind(
                "v NUMBER;",
                "SELECT COUNT(*) INTO v FROM employees WHERE ROWNUM > 2;"
            ),
            FailureKind::UnsupportedConstruct
        );
    }

    #[test]
    fn limited_set_operands_are_parenthesized() {
        let lines = transpile_body(
            "",
            "FOR r IN (SELECT employee_id FROM employees WHERE ROWNUM <= 2 UNION ALL SELECT employee_id FROM employees) LOOP NULL; END LOOP;",
        );
        assert_eq!(
            lines[0],
            "FOR r IN (SELECT employee_id FROM hr.employees LIMIT 2) UNION ALL SELECT employee_id FROM hr.employees LOOP"
        );
    }

    #[test]
    fn outer_join_markers_become_left_joins() {
        assert_eq!(
            query(
                "SELECT COUNT(*) INTO v FROM employees e, departments d
                 WHERE e.department_id = d.department_id(+) AND e.salary > 10;"
            ),
            "SELECT count(*) INTO STRICT v FROM hr.employees e LEFT JOIN hr.departments d ON e.department_id = d.department_id WHERE e.salary > 10"
        );
        assert_eq!(
            query(
                "SELECT COUNT(*) INTO v FROM departments d, employees e
                 WHERE e.department_id = d.department_id(+) AND d.department_name(+) = 'IT';"
            ),
            "SELECT count(*) INTO STRICT v FROM hr.employees e LEFT JOIN hr.departments d ON e.department_id = d.department_id AND d.department_name = 'IT'"
        );
    }

    #[test]
    fn optional_tables_chain_and_keep_plain_tables() {
        assert_eq!(
            query(
                "SELECT COUNT(*) INTO v FROM employees e, departments d, employees m, departments x
                 WHERE e.department_id = d.department_id(+)
                   AND d.department_id = m.department_id(+)
                   AND x.department_id = e.department_id;"
            ),
            "SELECT count(*) INTO STRICT v FROM hr.employees e LEFT JOIN hr.departments d ON e.department_id = d.department_id LEFT JOIN hr.employees m ON d.department_id = m.department_id, hr.departments x WHERE x.department_id = e.department_id"
        );
    }

    #[test]
    fn outer_joins_we_cannot_rewrite() {
        assert_eq!(
            failure_kind(
                "v NUMBER;",
                "SELECT COUNT(*) INTO v FROM employees e, departments d WHERE e.department_id = d.department_id(+) OR e.salary > 1;"
            ),
            FailureKind::UnsupportedConstruct
        );
        assert_eq!(
            failure_kind(
                "v NUMBER;",
                "SELECT COUNT(*) INTO v FROM employees e JOIN departments d2 ON e.department_id = d2.department_id, departments d WHERE e.department_id = d.department_id(+);"
            ),
            FailureKind::UnsupportedConstruct
        );
        assert_eq!(
            failure_kind(
                "v NUMBER;",
                "SELECT d.department_id(+) INTO v FROM departments d;"
            ),
            FailureKind::UnsupportedConstruct
        );
    }
}
