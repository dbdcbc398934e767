//! Rewrites for Oracle built-in functions and pseudo-columns.

use super::{
    expressions::{emit_additive_operand, emit_call_args, emit_is_operand},
    Emit, PlpgsqlWriter,
};
use crate::{
    ast::{Expression, NameExpression},
    context::TransformationContext,
    errors::{Error, Result},
    package_context::quote_literal,
    tokenizer::Spanned,
};

/// The argument values of a call.
fn arg_values(name: &NameExpression) -> Vec<&Expression> {
    match name.call_args() {
        Some(args) => args.args.iter().map(|a| &a.value).collect(),
        None => vec![],
    }
}

/// Write a call to a built-in function. `builtin` is the canonical name
/// type inference resolved.
pub(super) fn emit_builtin(
    name: &NameExpression,
    builtin: &str,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    let args = arg_values(name);
    let span = name.span();
    let first_is_date = match args.first() {
        Some(first) => cx.inference.type_of(first)?.is_date_like(),
        None => false,
    };
    match (builtin, args.as_slice()) {
        ("sysdate" | "systimestamp" | "current_timestamp", []) => w.write("CURRENT_TIMESTAMP"),
        ("current_date", []) => w.write("CURRENT_DATE"),
        ("localtimestamp", []) => w.write("LOCALTIMESTAMP"),
        ("user", []) => w.write("current_user"),
        ("sqlerrm", []) => w.write("SQLERRM"),
        ("sqlcode", _) => return Err(Error::unsupported("SQLCODE", span)),
        ("rownum", _) => return Err(Error::unsupported("ROWNUM", span)),
        ("nvl", [value, default]) => {
            w.write("coalesce(");
            value.emit(cx, w)?;
            w.write(", ");
            default.emit(cx, w)?;
            w.write(")");
        }
        ("nvl2", [value, if_not_null, if_null]) => {
            w.write("CASE WHEN ");
            emit_is_operand(value, cx, w)?;
            w.write(" IS NOT NULL THEN ");
            if_not_null.emit(cx, w)?;
            w.write(" ELSE ");
            if_null.emit(cx, w)?;
            w.write(" END");
        }
        ("decode", [value, rest @ ..]) if rest.len() >= 2 => emit_decode(value, rest, cx, w)?,
        ("instr", [haystack, needle]) => {
            w.write("strpos(");
            haystack.emit(cx, w)?;
            w.write(", ");
            needle.emit(cx, w)?;
            w.write(")");
        }
        ("instr", _) => {
            return Err(Error::unsupported(
                "INSTR with more than two arguments",
                span,
            ))
        }
        ("add_months", [date, months]) => {
            w.write("(");
            emit_additive_operand(date, cx, w)?;
            w.write(" + (");
            months.emit(cx, w)?;
            w.write(") * INTERVAL '1 month')");
        }
        ("last_day", [date]) => {
            w.write("(date_trunc('month', ");
            date.emit(cx, w)?;
            w.write(") + INTERVAL '1 month - 1 day')");
        }
        ("to_date", [text, format]) => {
            w.write("to_timestamp(");
            text.emit(cx, w)?;
            w.write(", ");
            format.emit(cx, w)?;
            w.write(")::timestamp");
        }
        ("to_date", [text]) => emit_cast(text, "timestamp", cx, w)?,
        ("to_char", [value]) => emit_cast(value, "text", cx, w)?,
        ("to_number", [value]) => emit_cast(value, "numeric", cx, w)?,
        ("trunc", [date]) if first_is_date => {
            w.write("date_trunc('day', ");
            date.emit(cx, w)?;
            w.write(")");
        }
        ("trunc", [date, format]) if first_is_date => {
            let unit = format
                .as_string_literal()
                .and_then(trunc_unit)
                .ok_or_else(|| Error::unsupported("TRUNC with this date format", format.span()))?;
            w.write(&format!("date_trunc('{}', ", unit));
            date.emit(cx, w)?;
            w.write(")");
        }
        ("round", _) if first_is_date => return Err(Error::unsupported("ROUND over a date", span)),
        ("months_between", _) => return Err(Error::unsupported("MONTHS_BETWEEN", span)),
        ("raise_application_error", _) => {
            return Err(Error::unsupported(
                "RAISE_APPLICATION_ERROR outside a call statement",
                span,
            ))
        }
        ("dbms_output.put_line", _) => {
            return Err(Error::unsupported(
                "DBMS_OUTPUT.PUT_LINE outside a call statement",
                span,
            ))
        }
        _ => {
            w.write(builtin);
            if let Some(args) = name.call_args() {
                emit_call_args(args, cx, w)?;
            }
        }
    }
    Ok(())
}

fn emit_cast(
    value: &Expression,
    pg_type: &str,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    w.write("CAST(");
    value.emit(cx, w)?;
    w.write(&format!(" AS {})", pg_type));
    Ok(())
}

/// `DECODE` compares with `NULL` matching `NULL`.
fn emit_decode(
    value: &Expression,
    rest: &[&Expression],
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    w.write("CASE");
    for pair in rest.chunks(2) {
        match pair {
            [search, result] => {
                w.write(" WHEN ");
                emit_is_operand(value, cx, w)?;
                w.write(" IS NOT DISTINCT FROM ");
                emit_is_operand(search, cx, w)?;
                w.write(" THEN ");
                result.emit(cx, w)?;
            }
            [default] => {
                w.write(" ELSE ");
                default.emit(cx, w)?;
            }
            _ => {}
        }
    }
    w.write(" END");
    Ok(())
}

/// Map an Oracle `TRUNC` format model to a `date_trunc` unit.
fn trunc_unit(format: &str) -> Option<&'static str> {
    Some(match format.to_ascii_uppercase().as_str() {
        "DD" | "DDD" | "J" => "day",
        "MM" | "MON" | "MONTH" | "RM" => "month",
        "YYYY" | "SYYYY" | "YYY" | "YY" | "Y" | "YEAR" | "SYEAR" => "year",
        "Q" => "quarter",
        "HH" | "HH12" | "HH24" => "hour",
        "MI" => "minute",
        "IW" | "WW" | "W" | "DAY" | "DY" | "D" => "week",
        _ => return None,
    })
}

/// `RAISE_APPLICATION_ERROR(code, message [, keep])` as a statement.
pub(super) fn emit_raise_application_error(
    call: &NameExpression,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    let args = arg_values(call);
    let (code, message) = match args.as_slice() {
        [code, message] | [code, message, _] => (*code, *message),
        _ => {
            return Err(Error::unsupported(
                format!("RAISE_APPLICATION_ERROR with {} arguments", args.len()),
                call.span(),
            ))
        }
    };
    let (errcode, hint) = match code.as_integer_literal() {
        Some(n) if (-20999..=-20000).contains(&n) => (
            format!("P0{:03}", -n - 20000),
            format!("Original Oracle error code: {}", n),
        ),
        Some(n) => {
            return Err(Error::unsupported(
                format!("RAISE_APPLICATION_ERROR code {}", n),
                code.span(),
            ))
        }
        None => {
            let text = cx
                .files
                .span_text(code.span())
                .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
                .unwrap_or_default();
            (
                "P0001".to_owned(),
                format!("Original Oracle error code: {}", text),
            )
        }
    };
    match message.as_string_literal() {
        Some(text) => {
            w.write("RAISE EXCEPTION ");
            w.write(&quote_literal(&text.replace('%', "%%")));
            w.write(" USING ");
        }
        None => {
            w.write("RAISE EXCEPTION USING MESSAGE = ");
            message.emit(cx, w)?;
            w.write(", ");
        }
    }
    w.line(&format!(
        "ERRCODE = '{}', HINT = {};",
        errcode,
        quote_literal(&hint)
    ));
    Ok(())
}

/// `DBMS_OUTPUT.PUT_LINE(x)` as a statement.
pub(super) fn emit_put_line(
    call: &NameExpression,
    cx: &TransformationContext<'_>,
    w: &mut PlpgsqlWriter,
) -> Result<()> {
    match arg_values(call).as_slice() {
        [value] => {
            w.write("RAISE NOTICE '%', ");
            value.emit(cx, w)?;
            w.line(";");
            Ok(())
        }
        _ => Err(Error::unsupported(
            "DBMS_OUTPUT.PUT_LINE without exactly one argument",
            call.span(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{
        codegen::tests::{failure_kind, transpile_body},
        errors::FailureKind,
    };

    /// Translate `x := <expr>;`, where `x` has no particular type.
    fn call(source: &str) -> String {
        let lines = transpile_body(
            "x VARCHAR2(100); s VARCHAR2(100); n NUMBER; d DATE;",
            &format!("x := {};", source),
        );
        lines[0]
            .strip_prefix("x := ")
            .and_then(|l| l.strip_suffix(';'))
            .unwrap()
            .to_owned()
    }

    #[test]
    fn simple_renames() {
        assert_eq!(call("SYSDATE"), "CURRENT_TIMESTAMP");
        assert_eq!(call("SYSTIMESTAMP"), "CURRENT_TIMESTAMP");
        assert_eq!(call("USER"), "current_user");
        assert_eq!(call("NVL(s, 'none')"), "coalesce(s, 'none')");
        assert_eq!(call("INSTR(s, 'x')"), "strpos(s, 'x')");
        assert_eq!(call("UPPER(SUBSTR(s, 1, 2))"), "upper(substr(s, 1, 2))");
    }

    #[test]
    fn conditional_functions_become_case() {
        assert_eq!(
            call("NVL2(s, 'y', 'n')"),
            "CASE WHEN s IS NOT NULL THEN 'y' ELSE 'n' END"
        );
        assert_eq!(
            call("DECODE(n, 1, 'one', 2, 'two', 'many')"),
            "CASE WHEN n IS NOT DISTINCT FROM 1 THEN 'one' WHEN n IS NOT DISTINCT FROM 2 THEN 'two' ELSE 'many' END"
        );
        assert_eq!(
            call("DECODE(s, NULL, 'empty')"),
            "CASE WHEN s IS NOT DISTINCT FROM NULL THEN 'empty' END"
        );
    }

    #[test]
    fn date_functions() {
        assert_eq!(call("ADD_MONTHS(d, 3)"), "(d + (3) * INTERVAL '1 month')");
        assert_eq!(
            call("LAST_DAY(d)"),
            "(date_trunc('month', d) + INTERVAL '1 month - 1 day')"
        );
        assert_eq!(
            call("TO_DATE(s, 'YYYY-MM-DD')"),
            "to_timestamp(s, 'YYYY-MM-DD')::timestamp"
        );
        assert_eq!(call("TRUNC(d)"), "date_trunc('day', d)");
        assert_eq!(call("TRUNC(d, 'MM')"), "date_trunc('month', d)");
        assert_eq!(call("TRUNC(n, 2)"), "trunc(n, 2)");
        assert_eq!(call("ROUND(n)"), "round(n)");
    }

    #[test]
    fn conversions_with_one_argument_are_casts() {
        assert_eq!(call("TO_CHAR(n)"), "CAST(n AS text)");
        assert_eq!(call("TO_NUMBER(s)"), "CAST(s AS numeric)");
        assert_eq!(call("TO_CHAR(d, 'YYYY')"), "to_char(d, 'YYYY')");
    }

    #[test]
    fn raise_application_error() {
        assert_eq!(
            transpile_body("", "RAISE_APPLICATION_ERROR(-20042, 'Bad 100% value');"),
            vec!["RAISE EXCEPTION 'Bad 100%% value' USING ERRCODE = 'P0042', HINT = 'Original Oracle error code: -20042';"]
        );
        assert_eq!(
            transpile_body(
                "v_msg VARCHAR2(100) := 'bad'; v_code NUMBER := -20001;",
                "RAISE_APPLICATION_ERROR(v_code, v_msg);"
            ),
            vec!["RAISE EXCEPTION USING MESSAGE = v_msg, ERRCODE = 'P0001', HINT = 'Original Oracle error code: v_code';"]
        );
        assert_eq!(
            failure_kind("", "RAISE_APPLICATION_ERROR(-1, 'x');"),
            FailureKind::UnsupportedConstruct
        );
    }

    #[test]
    fn put_line_becomes_notice() {
        assert_eq!(
            transpile_body("", "DBMS_OUTPUT.PUT_LINE('hello ' || USER);"),
            vec!["RAISE NOTICE '%', 'hello ' || current_user;"]
        );
    }

    #[test]
    fn untranslatable_builtins_are_unsupported() {
        for statement in [
            "n := SQLCODE;",
            "n := MONTHS_BETWEEN(d, d);",
            "d := ROUND(d);",
            "n := INSTR(s, 'x', 2);",
            "d := TRUNC(d, 'XX');",
        ] {
            assert_eq!(
                failure_kind("n NUMBER; s VARCHAR2(10); d DATE;", statement),
                FailureKind::UnsupportedConstruct,
                "{}",
                statement
            );
        }
    }
}
