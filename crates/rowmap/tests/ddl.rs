//! Generated DDL shapes.

use rowmap::{KeySpec, Session, fkey};

#[test]
fn keyed_table_with_fkey_and_cascades() {
    let session = Session::open_memory().unwrap();
    session
        .declare(
            "parent",
            "key",
            vec![("key", "text!".into()), ("name", "text".into())],
        )
        .unwrap();
    let child = session
        .declare(
            "child",
            "data",
            vec![
                ("parent", fkey("parent").required().unique().into()),
                ("data", "text!".into()),
            ],
        )
        .unwrap();

    assert_eq!(
        child.create_sql().unwrap(),
        "CREATE TABLE IF NOT EXISTS \"child\" (\
         \"parent\" TEXT NOT NULL UNIQUE, \
         \"data\" TEXT NOT NULL UNIQUE, \
         FOREIGN KEY(\"parent\") REFERENCES \"parent\"(\"key\") \
         ON UPDATE CASCADE ON DELETE CASCADE, \
         PRIMARY KEY(\"data\"))"
    );
}

#[test]
fn rowid_table_omits_primary_key_clause() {
    let session = Session::open_memory().unwrap();
    let plain = session
        .declare("plain", None, vec![("a", "int".into()), ("b", "text!".into())])
        .unwrap();
    assert_eq!(
        plain.create_sql().unwrap(),
        "CREATE TABLE IF NOT EXISTS \"plain\" (\"a\" INTEGER, \"b\" TEXT NOT NULL)"
    );
}

#[test]
fn id_key_emits_integer() {
    let session = Session::open_memory().unwrap();
    let entity = session
        .declare("thing", KeySpec::Id("id".into()), vec![("name", "text".into())])
        .unwrap();
    assert_eq!(
        entity.create_sql().unwrap(),
        "CREATE TABLE IF NOT EXISTS \"thing\" (\
         \"id\" INTEGER UNIQUE, \"name\" TEXT, PRIMARY KEY(\"id\"))"
    );
}

#[test]
fn virtual_fields_are_omitted() {
    let session = Session::open_memory().unwrap();
    let parent = session
        .declare(
            "parent",
            "key",
            vec![("key", "text!".into()), ("children", "kid*".into())],
        )
        .unwrap();
    session
        .declare("kid", None, vec![("parent", "parent!".into())])
        .unwrap();
    let sql = parent.create_sql().unwrap();
    assert!(!sql.contains("children"));
    assert_eq!(
        sql,
        "CREATE TABLE IF NOT EXISTS \"parent\" (\"key\" TEXT NOT NULL UNIQUE, PRIMARY KEY(\"key\"))"
    );
}

#[test]
fn fkey_adopts_referenced_rowid_type() {
    let session = Session::open_memory().unwrap();
    session.declare("target", None, vec![("v", "text".into())]).unwrap();
    let source = session
        .declare("source", None, vec![("target", "target".into())])
        .unwrap();
    assert_eq!(
        source.create_sql().unwrap(),
        "CREATE TABLE IF NOT EXISTS \"source\" (\
         \"target\" INTEGER, \
         FOREIGN KEY(\"target\") REFERENCES \"target\"(\"rowid\") \
         ON UPDATE CASCADE ON DELETE CASCADE)"
    );
}

#[test]
fn create_fails_for_unregistered_target() {
    let session = Session::open_memory().unwrap();
    let dangling = session
        .declare("dangling", None, vec![("other", "nowhere".into())])
        .unwrap();
    assert!(dangling.create_sql().is_err());
}

#[test]
fn default_key_register_names_the_key() {
    let session = Session::open_memory().unwrap();
    session.set_default_key(Some("key"));
    let entity = session
        .declare("keyed", None, vec![("key", "text!".into()), ("v", "text".into())])
        .unwrap();
    assert_eq!(entity.key(), "key");

    session.set_default_key(None);
    let plain = session
        .declare("plain", None, vec![("v", "text".into())])
        .unwrap();
    assert_eq!(plain.key(), "rowid");
}
