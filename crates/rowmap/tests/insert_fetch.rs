//! Basic insert/fetch lifecycle: deferred writes, identity mapping, weak
//! cache reclamation, and flush idempotence.

use rowmap::{Arg, Session, Value};
use std::rc::Rc;

fn map_session() -> (Session, Rc<rowmap::Entity>) {
    let session = Session::open_memory().unwrap();
    let map = session
        .declare(
            "map",
            "key",
            vec![("key", "text!".into()), ("value", "text".into())],
        )
        .unwrap();
    map.create().unwrap();
    (session, map)
}

#[test]
fn insert_flush_fetch_roundtrip() {
    let (session, map) = map_session();

    map.new_row(vec![("key", "a".into()), ("value", "b".into())])
        .unwrap();
    session.flush().unwrap();

    let row = map.get("a").unwrap().expect("row was flushed");
    assert_eq!(row.get("key").unwrap().as_str(), Some("a"));
    assert_eq!(row.get("value").unwrap().as_str(), Some("b"));
}

#[test]
fn fetch_after_dropping_all_references() {
    let (session, map) = map_session();

    let row = map
        .new_row(vec![("key", "a".into()), ("value", "b".into())])
        .unwrap();
    session.flush().unwrap();
    drop(row);

    // The weak caches no longer pin the row; this re-reads the database.
    let row = map.get("a").unwrap().expect("row persisted");
    assert_eq!(row.get("value").unwrap().as_str(), Some("b"));
}

#[test]
fn identity_while_referenced() {
    let (session, map) = map_session();
    map.new_row(vec![("key", "a".into()), ("value", "b".into())])
        .unwrap();
    session.flush().unwrap();

    let first = map.get("a").unwrap().unwrap();
    let second = map.get("a").unwrap().unwrap();
    assert!(Rc::ptr_eq(&first, &second));

    // An unflushed row is also reachable through the unique caches.
    let fresh = map
        .new_row(vec![("key", "c".into()), ("value", "d".into())])
        .unwrap();
    let found = map.get("c").unwrap().unwrap();
    assert!(Rc::ptr_eq(&fresh, &found));
}

#[test]
fn get_returns_none_for_missing_and_deleted() {
    let (session, map) = map_session();
    assert!(map.get("nope").unwrap().is_none());

    let row = map
        .new_row(vec![("key", "a".into()), ("value", "b".into())])
        .unwrap();
    session.flush().unwrap();

    row.delete().unwrap();
    assert!(map.get("a").unwrap().is_none());
    session.flush().unwrap();
    assert!(map.get("a").unwrap().is_none());
    assert!(!map.has("a").unwrap());
}

#[test]
fn has_does_not_materialize() {
    let (session, map) = map_session();
    map.new_row(vec![("key", "a".into()), ("value", "b".into())])
        .unwrap();
    session.flush().unwrap();
    assert!(map.has("a").unwrap());
    assert!(!map.has("z").unwrap());
}

#[test]
fn set_raw_value_back_leaves_row_clean() {
    let (session, map) = map_session();
    let row = map
        .new_row(vec![("key", "a".into()), ("value", "b".into())])
        .unwrap();
    session.flush().unwrap();
    assert!(!row.dirty());

    let raw = row.raw("value").unwrap();
    row.set("value", Arg::from(raw)).unwrap();
    assert!(!row.dirty());
    assert_eq!(map.dirty_count(), 0);
}

#[test]
fn flush_on_clean_state_is_a_noop() {
    let (session, map) = map_session();
    map.new_row(vec![("key", "a".into()), ("value", "b".into())])
        .unwrap();
    session.flush().unwrap();
    assert!(!session.pending_changes());
    session.flush().unwrap();
    assert!(!session.pending_changes());
    assert_eq!(map.dirty_count(), 0);
}

#[test]
fn update_flushes_changed_value() {
    let (session, map) = map_session();
    let row = map
        .new_row(vec![("key", "a".into()), ("value", "b".into())])
        .unwrap();
    session.flush().unwrap();

    row.set("value", "changed").unwrap();
    assert!(row.dirty());
    session.flush().unwrap();
    drop(row);

    let row = map.get("a").unwrap().unwrap();
    assert_eq!(row.get("value").unwrap().as_str(), Some("changed"));
}

#[test]
fn field_names_are_case_insensitive() {
    let (_session, map) = map_session();
    let row = map
        .new_row(vec![("KEY", "a".into()), ("Value", "b".into())])
        .unwrap();
    assert_eq!(row.get("VALUE").unwrap().as_str(), Some("b"));
    assert_eq!(row.raw("Key").unwrap(), Value::Text("a".into()));
}

#[test]
fn underscore_prefix_reads_raw() {
    let (_session, map) = map_session();
    let row = map
        .new_row(vec![("key", "a".into()), ("value", "b".into())])
        .unwrap();
    assert_eq!(row.get("_value").unwrap().as_value(), Some(&Value::Text("b".into())));
}

#[test]
fn unknown_field_is_rejected() {
    let (_session, map) = map_session();
    let row = map
        .new_row(vec![("key", "a".into()), ("value", "b".into())])
        .unwrap();
    assert!(row.get("nope").is_err());
    assert!(row.set("nope", 1_i64).is_err());
}

#[test]
fn unique_violation_on_new() {
    let (session, map) = map_session();
    map.new_row(vec![("key", "a".into()), ("value", "b".into())])
        .unwrap();
    session.flush().unwrap();

    let err = map
        .new_row(vec![("key", "a".into()), ("value", "other".into())])
        .unwrap_err();
    assert!(err.to_string().contains("unique"));
}

#[test]
fn required_field_missing_on_new() {
    let (_session, map) = map_session();
    let err = map.new_row(vec![("value", "b".into())]).unwrap_err();
    assert!(err.to_string().contains("required"));
}
