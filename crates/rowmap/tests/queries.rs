//! The dual-evaluator query engine: SQL text, named parameters, auto-named
//! constants, and the dirty-set merge.

use rowmap::{Q, Session, Value};
use std::rc::Rc;

fn numbers() -> (Session, Rc<rowmap::Entity>) {
    let session = Session::open_memory().unwrap();
    let entity = session
        .declare(
            "num",
            "key",
            vec![("key", "text!".into()), ("n", "int".into())],
        )
        .unwrap();
    entity.create().unwrap();
    for (key, n) in [("a", 1_i64), ("b", 2), ("c", 3), ("d", 4), ("e", 5)] {
        entity
            .new_row(vec![("key", key.into()), ("n", n.into())])
            .unwrap();
    }
    session.flush().unwrap();
    (session, entity)
}

#[test]
fn parameterized_comparison() {
    let (_session, entity) = numbers();
    let query = entity.query(vec!["n >= :min".into()]).unwrap();
    assert!(query.sql().contains("\"n\" >= :min"));

    let rows = query.run(&[("min", Value::Int(3))]).unwrap();
    assert_eq!(rows.len(), 3);
    let rows = query.run(&[("min", Value::Int(5))]).unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn bare_constants_are_auto_named() {
    let (_session, entity) = numbers();
    let query = entity.query(vec!["n > 2".into()]).unwrap();
    assert!(query.sql().contains(":_1"), "sql: {}", query.sql());
    assert_eq!(query.run(&[]).unwrap().len(), 3);
}

#[test]
fn quoted_and_wrapped_constants() {
    let (_session, entity) = numbers();

    let query = entity.query(vec!["key = 'c'".into()]).unwrap();
    let rows = query.run(&[]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("n").unwrap().as_i64(), Some(3));

    // A one-element list shields a token from field interpretation.
    let wrapped = entity
        .query(vec![Q::List(vec![
            Q::from("key"),
            Q::from("="),
            Q::List(vec![Q::from("key")]),
        ])])
        .unwrap();
    assert!(wrapped.run(&[]).unwrap().is_empty());
}

#[test]
fn multiple_arguments_imply_all() {
    let (_session, entity) = numbers();
    let query = entity
        .query(vec!["n > 1".into(), "n < 4".into()])
        .unwrap();
    assert_eq!(query.run(&[]).unwrap().len(), 2);
}

#[test]
fn any_aggregates_with_or() {
    let (_session, entity) = numbers();
    let query = entity
        .query(vec![Q::List(vec![
            Q::from("any"),
            Q::from("n = 1"),
            Q::from("n = 5"),
        ])])
        .unwrap();
    assert!(query.sql().contains(" OR "));
    assert_eq!(query.run(&[]).unwrap().len(), 2);
}

#[test]
fn null_tests() {
    let session = Session::open_memory().unwrap();
    let entity = session
        .declare(
            "maybe",
            "key",
            vec![("key", "text!".into()), ("v", "text".into())],
        )
        .unwrap();
    entity.create().unwrap();
    entity
        .new_row(vec![("key", "set".into()), ("v", "x".into())])
        .unwrap();
    entity.new_row(vec![("key", "unset".into())]).unwrap();
    session.flush().unwrap();

    let null = entity.query(vec!["v is_null".into()]).unwrap();
    let rows = null.run(&[]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("key").unwrap().as_str(), Some("unset"));

    let not_null = entity.query(vec!["v is_not_null".into()]).unwrap();
    assert_eq!(not_null.run(&[]).unwrap().len(), 1);
}

#[test]
fn dirty_rows_merge_into_results() {
    let (_session, entity) = numbers();
    let query = entity.query(vec!["n >= 3".into()]).unwrap();
    assert_eq!(query.run(&[]).unwrap().len(), 3);

    // A pending row joins the results without a flush.
    let fresh = entity
        .new_row(vec![("key", "f".into()), ("n", 9_i64.into())])
        .unwrap();
    let rows = query.run(&[]).unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().any(|r| Rc::ptr_eq(r, &fresh)));

    // A pending modification removes a row that no longer matches.
    let c = entity.get("c").unwrap().unwrap();
    c.set("n", 0_i64).unwrap();
    let rows = query.run(&[]).unwrap();
    assert_eq!(rows.len(), 3);
    assert!(!rows.iter().any(|r| Rc::ptr_eq(r, &c)));

    // A pending delete removes its row as well.
    let d = entity.get("d").unwrap().unwrap();
    d.delete().unwrap();
    assert_eq!(query.run(&[]).unwrap().len(), 2);
}

#[test]
fn results_match_the_predicate_and_never_duplicate() {
    let (_session, entity) = numbers();
    entity
        .new_row(vec![("key", "f".into()), ("n", 4_i64.into())])
        .unwrap();
    let query = entity.query(vec!["n >= :min".into()]).unwrap();
    let params = [("min", Value::Int(2))];

    let rows = query.run(&params).unwrap();
    let mut seen = std::collections::HashSet::new();
    for row in &rows {
        assert!(query.test(row, &params).unwrap());
        assert!(seen.insert(Rc::as_ptr(row)), "duplicate row in results");
    }
    assert_eq!(rows.len(), 5);
}

#[test]
fn unknown_fields_and_reserved_params_fail_at_compile_time() {
    let (_session, entity) = numbers();
    // 'nope' does not name a field, so it compiles as a bare constant; a
    // constant-only comparison is fine. A reserved parameter is not.
    assert!(entity.query(vec!["n > :_secret".into()]).is_err());
    assert!(entity.query(vec!["n >".into()]).is_err());
    assert!(entity.query(vec!["n like 3".into()]).is_err());
}

#[test]
fn test_rejects_nothing_it_should_match() {
    let (_session, entity) = numbers();
    let query = entity.query(vec!["n ~= 3".into()]).unwrap();
    let rows = query.run(&[]).unwrap();
    assert_eq!(rows.len(), 4);
    for row in &rows {
        assert!(query.test(row, &[]).unwrap());
    }
}

#[test]
fn unique_cache_points_at_the_live_row() {
    let (session, entity) = numbers();
    let a = entity.get("a").unwrap().unwrap();
    let again = entity.get("a").unwrap().unwrap();
    assert!(Rc::ptr_eq(&a, &again));

    // Changing the unique value moves the cache entry.
    a.set("key", "renamed").unwrap();
    let renamed = entity.get("renamed").unwrap().unwrap();
    assert!(Rc::ptr_eq(&a, &renamed));

    // Once flushed, the old key is gone from the database too.
    session.flush().unwrap();
    assert!(entity.get("a").unwrap().is_none());
}
