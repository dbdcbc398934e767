//! Drive the compiler through its library API, the way an orchestrating
//! service would.

use std::{sync::Arc, thread};

use pretty_assertions::assert_eq;

use pl2pg::{
    transform_source, CatalogSnapshot, FailureKind, MetadataIndex, OutputMode, PackageSources,
    UnitOutcome,
};

const CATALOG: &str = include_str!("golden/catalog.json");
const COUNTER_SPEC: &str = include_str!("golden/packages/hr.counter_pkg.pks");

fn index() -> MetadataIndex {
    MetadataIndex::from_snapshot(CatalogSnapshot::from_json(CATALOG).unwrap())
}

fn packages() -> PackageSources {
    let mut sources = PackageSources::new();
    sources.insert("HR", "COUNTER_PKG", COUNTER_SPEC.to_owned(), None);
    sources
}

fn run(source: &str, mode: OutputMode) -> Vec<UnitOutcome> {
    transform_source("test.sql", source, "hr", &index(), &packages(), mode)
}

fn sql(source: &str) -> String {
    let mut outcomes = run(source, OutputMode::Full);
    assert_eq!(outcomes.len(), 1);
    match outcomes.remove(0).result {
        Ok(transformed) => transformed.sql,
        Err(failure) => panic!("{}\n{}", failure, failure.rendered),
    }
}

#[test]
fn output_is_deterministic() {
    let source = include_str!("golden/raise_salary.sql");
    assert_eq!(sql(source), sql(source));
}

#[test]
fn stubs_and_full_definitions_share_a_header() {
    let source = "CREATE PROCEDURE p(a IN NUMBER, b IN DATE, c OUT VARCHAR2) IS
                  BEGIN
                    c := 'x';
                  END;";
    let full = sql(source);
    let stub = run(source, OutputMode::Stub)
        .remove(0)
        .result
        .unwrap()
        .sql;
    let header = |s: &str| s.lines().take(4).map(|l| l.to_owned()).collect::<Vec<_>>();
    assert_eq!(header(&full), header(&stub));
    assert_eq!(header(&full)[1], "RETURNS text");
    assert!(stub.contains("  RETURN;\n"));
}

#[test]
fn call_statements_are_normalized() {
    let out = sql("CREATE PROCEDURE p IS v NUMBER;
                   BEGIN
                     counter_pkg.bump(2);
                     v := counter_pkg.current_value;
                   END;");
    assert!(out.contains("  PERFORM hr.counter_pkg__bump(2);\n"), "{}", out);
    assert!(out.contains("  v := hr.counter_pkg__current_value();\n"), "{}", out);
}

#[test]
fn body_private_declarations_extend_a_spec_only_package() {
    // The sources only hold `hr.counter_pkg.pks`.
    let outcomes = run(
        "CREATE OR REPLACE PACKAGE BODY counter_pkg IS
           g_hidden NUMBER := 0;
           FUNCTION helper(p_n IN NUMBER) RETURN NUMBER IS
           BEGIN
             RETURN p_n * 2;
           END helper;
           PROCEDURE bump(p_by IN NUMBER DEFAULT 1) IS
           BEGIN
             g_hidden := g_hidden + helper(1);
             g_counter := g_counter + p_by;
           END bump;
         END counter_pkg;",
        OutputMode::Full,
    );
    let names = outcomes.iter().map(|o| o.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["hr.counter_pkg.helper", "hr.counter_pkg.bump"]);
    let bump = match &outcomes[1].result {
        Ok(transformed) => &transformed.sql,
        Err(failure) => panic!("{}\n{}", failure, failure.rendered),
    };
    assert!(
        bump.contains(
            "  PERFORM hr.counter_pkg__set_g_hidden(hr.counter_pkg__get_g_hidden() + hr.counter_pkg__helper(1));\n"
        ),
        "{}",
        bump
    );
    assert!(
        bump.contains("  PERFORM hr.counter_pkg__set_g_counter(hr.counter_pkg__get_g_counter() + p_by);\n"),
        "{}",
        bump
    );
}

#[test]
fn module_variables_are_case_insensitive() {
    let out = sql("CREATE PROCEDURE p IS
                   BEGIN
                     Counter_Pkg.G_COUNTER := counter_pkg.g_counter + 1;
                   END;");
    assert!(out.contains(
        "  PERFORM hr.counter_pkg__set_g_counter(hr.counter_pkg__get_g_counter() + 1);\n"
    ));
}

#[test]
fn failure_kinds_are_reported_per_unit() {
    let outcomes = run(
        "CREATE PROCEDURE a IS BEGIN SAVEPOINT s; END;
         /
         CREATE PROCEDURE b IS v NUMBER; BEGIN v := no_such_thing; END;
         /
         CREATE PROCEDURE c IS BEGIN NULL; END;
         /",
        OutputMode::Full,
    );
    let kinds = outcomes
        .iter()
        .map(|o| o.result.as_ref().err().map(|f| f.kind))
        .collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            Some(FailureKind::UnsupportedConstruct),
            Some(FailureKind::UnresolvedReference),
            None,
        ]
    );
}

#[test]
fn units_run_in_parallel_with_a_shared_index() {
    let index = Arc::new(index());
    let packages = Arc::new(packages());
    let handles = (0..4)
        .map(|i| {
            let index = Arc::clone(&index);
            let packages = Arc::clone(&packages);
            thread::spawn(move || {
                let source = format!("CREATE FUNCTION f{} RETURN NUMBER IS BEGIN RETURN {}; END;", i, i);
                transform_source("t.sql", &source, "hr", &index, &*packages, OutputMode::Full)
            })
        })
        .collect::<Vec<_>>();
    for (i, handle) in handles.into_iter().enumerate() {
        let outcomes = handle.join().unwrap();
        let sql = &outcomes[0].result.as_ref().unwrap().sql;
        assert!(sql.starts_with(&format!("CREATE OR REPLACE FUNCTION hr.f{}()", i)));
    }
}
