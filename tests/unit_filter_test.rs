// tests/unit_filter_test.rs

//! Filter expression grammar and evaluation.

mod common;

use drover::core::errors::DroverError;
use drover::core::query::FilterExpr;
use drover::core::types::JobStatus;

use common::{job, pool};

#[test]
fn equality_and_inequality() {
    let j = job("default", "web", "dev-1");
    assert!(FilterExpr::parse(r#"Name == "web""#).unwrap().eval(&j).unwrap());
    assert!(FilterExpr::parse(r#"Name != "db""#).unwrap().eval(&j).unwrap());
    assert!(!FilterExpr::parse(r#"Namespace == "other""#).unwrap().eval(&j).unwrap());
    // Bare values work too.
    assert!(FilterExpr::parse("NodePool == dev-1").unwrap().eval(&j).unwrap());
}

#[test]
fn typed_comparisons() {
    let mut j = job("default", "web", "dev-1");
    j.priority = 80;
    j.status = JobStatus::Running;
    assert!(FilterExpr::parse("Priority == 80").unwrap().eval(&j).unwrap());
    assert!(FilterExpr::parse(r#"Status == "running""#).unwrap().eval(&j).unwrap());
    assert!(FilterExpr::parse("Stop == false").unwrap().eval(&j).unwrap());
    // A non-numeric value against an integer field is a user error.
    assert!(matches!(
        FilterExpr::parse(r#"Priority == "high""#).unwrap().eval(&j),
        Err(DroverError::InvalidFilter(_))
    ));
}

#[test]
fn regex_matches() {
    let j = job("default", "job-03", "dev-1");
    assert!(FilterExpr::parse(r#"Name matches "job-0[12345]""#)
        .unwrap()
        .eval(&j)
        .unwrap());
    assert!(!FilterExpr::parse(r#"Name matches "job-0[789]""#)
        .unwrap()
        .eval(&j)
        .unwrap());
    assert!(FilterExpr::parse(r#"Name not matches "job-0[789]""#)
        .unwrap()
        .eval(&j)
        .unwrap());
    assert!(matches!(
        FilterExpr::parse(r#"Name matches "job-[""#),
        Err(DroverError::InvalidFilter(_))
    ));
}

#[test]
fn membership_and_emptiness() {
    let mut p = pool("prod-1");
    p.meta.insert("team".to_string(), "infra".to_string());

    assert!(FilterExpr::parse(r#""team" in Meta"#).unwrap().eval(&p).unwrap());
    assert!(FilterExpr::parse(r#""owner" not in Meta"#).unwrap().eval(&p).unwrap());
    assert!(FilterExpr::parse(r#"Meta contains "team""#).unwrap().eval(&p).unwrap());
    assert!(FilterExpr::parse(r#"Meta.team == "infra""#).unwrap().eval(&p).unwrap());
    assert!(FilterExpr::parse("Meta is not empty").unwrap().eval(&p).unwrap());

    let empty = pool("prod-2");
    assert!(FilterExpr::parse("Meta is empty").unwrap().eval(&empty).unwrap());
    assert!(FilterExpr::parse(r#"Name contains "prod""#).unwrap().eval(&empty).unwrap());
}

#[test]
fn boolean_combinators_and_parens() {
    let j = job("default", "web", "dev-1");
    let expr = FilterExpr::parse(
        r#"(Namespace == "default" and Name == "web") or NodePool == "prod-9""#,
    )
    .unwrap();
    assert!(expr.eval(&j).unwrap());

    let expr = FilterExpr::parse(r#"not Name == "web""#).unwrap();
    assert!(!expr.eval(&j).unwrap());

    let expr = FilterExpr::parse(r#"Namespace == "default" and not (Name == "db")"#).unwrap();
    assert!(expr.eval(&j).unwrap());
}

#[test]
fn unknown_selector_is_a_user_error() {
    let j = job("default", "web", "dev-1");
    let err = FilterExpr::parse(r#"Nonsense == "x""#).unwrap().eval(&j).unwrap_err();
    assert!(matches!(err, DroverError::InvalidFilter(_)));
}

#[test]
fn malformed_expressions_fail_to_parse() {
    for expr in [
        "",
        "Name ==",
        r#"Name = "web""#,
        r#"Name == "web" extra"#,
        "(Name == x",
        "Name is",
    ] {
        assert!(
            matches!(FilterExpr::parse(expr), Err(DroverError::InvalidFilter(_))),
            "expression {expr:?} should not parse"
        );
    }
}
