//! Records declared with `TYPE ... IS RECORD`. PostgreSQL has no
//! routine-local composite types, so each such variable is a `jsonb`
//! object keyed by field name.

use serde_json::{Map, Value};

use super::{ident_sql, Emit, PlpgsqlWriter};
use crate::{
    ast::{Expression, RecordDefinition},
    context::TransformationContext,
    errors::{Error, Result},
    package_context::quote_literal,
    tokenizer::Spanned,
    types::{RecordType, TypeInfo},
};

/// Is this a record we store as `jsonb`?
pub(super) fn as_jsonb_record(ty: &TypeInfo) -> Option<&RecordType> {
    match ty {
        TypeInfo::Record(record) if record.jsonb => Some(record),
        _ => None,
    }
}

/// Record types need no declaration of their own. We reject field
/// defaults and `NOT NULL`, which an empty object can't honor.
pub(super) fn check_record_definition(definition: &RecordDefinition) -> Result<()> {
    for field in &definition.fields {
        if let Some(default) = &field.default {
            return Err(Error::unsupported("record field default", default.span()));
        }
        if let Some(not_null) = &field.not_null {
            return Err(Error::unsupported("NOT NULL record field", not_null.span()));
        }
    }
    Ok(())
}

/// The value a new record variable starts with: an empty object, with an
/// empty object for each nested record so `jsonb_set` can reach into it.
pub(super) fn initial_value(record: &RecordType) -> String {
    fn object(record: &RecordType) -> Value {
        let mut fields = Map::new();
        for field in &record.fields {
            if let Some(nested) = as_jsonb_record(&field.ty) {
                fields.insert(field.name.clone(), object(nested));
            }
        }
        Value::Object(fields)
    }
    format!("{}::jsonb", quote_literal(&object(record).to_string()))
}

/// Read `v.a.b` as `(v->'a'->>'b')`, cast back to the field's type.
pub(super) fn field_read(variable: &str, fields: &[String], ty: &TypeInfo) -> String {
    let nested = as_jsonb_record(ty).is_some();
    let mut path = ident_sql(variable);
    for (i, field) in fields.iter().enumerate() {
        let last = i + 1 == fields.len();
        path.push_str(if last && !nested { "->>" } else { "->" });
        path.push_str(&quote_literal(field));
    }
    match ty.pg_name() {
        Some(pg_name) if !nested && pg_name != "text" => format!("({})::{}", path, pg_name),
        _ => format!("({})", path),
    }
}

/// Write `v := jsonb_set(v, '{a,b}', value);`.
pub(super) fn emit_field_assignment(
    variable: &str,
    fields: &[String],
    value: &Expression,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    let variable = ident_sql(variable);
    let path = quote_literal(&format!("{{{}}}", fields.join(",")));
    w.write(&format!("{} := jsonb_set({}, {}, ", variable, variable, path));
    match value {
        // `jsonb_set` returns NULL when the new value is SQL NULL.
        Expression::Null(_) => w.write("'null'::jsonb"),
        Expression::Literal(_) => {
            w.write("to_jsonb(");
            value.emit(cx, w)?;
            if value.as_string_literal().is_some() {
                w.write("::text");
            }
            w.write(")");
        }
        _ => {
            w.write("coalesce(to_jsonb(");
            value.emit(cx, w)?;
            w.write("), 'null'::jsonb)");
        }
    }
    w.line(");");
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{
        codegen::tests::{failure_kind, transpile, transpile_body},
        errors::FailureKind,
    };

    const RANGE: &str = "TYPE range_t IS RECORD (min_sal NUMBER, max_sal NUMBER, label VARCHAR2(30));
                         v_range range_t;
                         n NUMBER;";

    #[test]
    fn record_variables_are_jsonb_objects() {
        let lines = transpile_body(
            RANGE,
            "v_range.min_sal := 50000;
             v_range.label := 'low';
             v_range.max_sal := n;
             n := v_range.max_sal - v_range.min_sal;",
        );
        assert_eq!(
            lines,
            vec![
                "v_range := jsonb_set(v_range, '{min_sal}', to_jsonb(50000));",
                "v_range := jsonb_set(v_range, '{label}', to_jsonb('low'::text));",
                "v_range := jsonb_set(v_range, '{max_sal}', coalesce(to_jsonb(n), 'null'::jsonb));",
                "n := (v_range->>'max_sal')::numeric - (v_range->>'min_sal')::numeric;",
            ]
        );
    }

    #[test]
    fn record_declarations() {
        let sql = transpile(&format!(
            "CREATE PROCEDURE p IS {} BEGIN NULL; END;",
            RANGE
        ))
        .unwrap();
        assert!(
            sql.contains("DECLARE\n  v_range jsonb := '{}'::jsonb;\n  n numeric;\nBEGIN"),
            "{}",
            sql
        );
    }

    #[test]
    fn nested_records_start_with_nested_objects() {
        let decls = "TYPE addr_t IS RECORD (street VARCHAR2(100), city VARCHAR2(50));
                     TYPE person_t IS RECORD (name VARCHAR2(50), address addr_t);
                     v_person person_t;
                     s VARCHAR2(100);";
        let sql = transpile(&format!(
            "CREATE PROCEDURE p IS {} BEGIN NULL; END;",
            decls
        ))
        .unwrap();
        assert!(
            sql.contains("v_person jsonb := '{\"address\":{}}'::jsonb;"),
            "{}",
            sql
        );
        let lines = transpile_body(
            decls,
            "v_person.address.city := NULL;
             s := v_person.address.city || v_person.name;",
        );
        assert_eq!(
            lines,
            vec![
                "v_person := jsonb_set(v_person, '{address,city}', 'null'::jsonb);",
                "s := (v_person->'address'->>'city') || (v_person->>'name');",
            ]
        );
    }

    #[test]
    fn record_features_we_cannot_store() {
        assert_eq!(
            failure_kind(
                "TYPE t IS RECORD (a NUMBER := 1); v t;",
                "NULL;"
            ),
            FailureKind::UnsupportedConstruct
        );
        assert_eq!(
            failure_kind(
                "TYPE t IS RECORD (a NUMBER); v t;",
                "SELECT salary INTO v.a FROM employees WHERE employee_id = 1;"
            ),
            FailureKind::UnsupportedConstruct
        );
        assert_eq!(
            failure_kind("TYPE t IS TABLE OF NUMBER; v t;", "NULL;"),
            FailureKind::UnsupportedConstruct
        );
    }
}
