//! Flush protocol: dependency deferral, forward references, circular
//! rejection, and the pending-changes register.

use rowmap::{Session, Value};
use std::cell::Cell;
use std::rc::Rc;

#[test]
fn mutually_required_fkeys_rejected_at_registration() {
    let session = Session::open_memory().unwrap();
    session
        .declare("a", None, vec![("b", "b!".into())])
        .unwrap();
    let err = session
        .declare("b", None, vec![("a", "a!".into())])
        .unwrap_err();
    assert!(err.to_string().contains("circular"));
}

#[test]
fn self_referencing_required_fkey_rejected() {
    let session = Session::open_memory().unwrap();
    let err = session
        .declare("node", None, vec![("parent", "node!".into())])
        .unwrap_err();
    assert!(err.to_string().contains("circular"));
}

#[test]
fn optional_cycle_flushes_in_two_passes() {
    let session = Session::open_memory().unwrap();
    let x = session
        .declare("x", None, vec![("y", "y".into()), ("tag", "text".into())])
        .unwrap();
    let y = session
        .declare("y", None, vec![("x", "x".into())])
        .unwrap();
    x.create().unwrap();
    y.create().unwrap();

    let rx = x.new_row(vec![("tag", "t".into())]).unwrap();
    let ry = y.new_row(vec![]).unwrap();
    rx.set("y", &ry).unwrap();
    ry.set("x", &rx).unwrap();

    session.flush().unwrap();

    assert!(rx.rowid().is_some());
    assert!(ry.rowid().is_some());
    assert!(!rx.dirty());
    assert!(!ry.dirty());

    // Both sides of the cycle resolved to real keys.
    assert_eq!(rx.raw("y").unwrap(), Value::Int(ry.rowid().unwrap()));
    assert_eq!(ry.raw("x").unwrap(), Value::Int(rx.rowid().unwrap()));
}

#[test]
fn required_forward_reference_defers_until_referent_inserts() {
    let session = Session::open_memory().unwrap();
    // Declaration order puts the child first, so the drain must defer it.
    let kid = session
        .declare("kid", None, vec![("parent", "parent!".into())])
        .unwrap();
    let parent = session
        .declare("parent", "key", vec![("key", "text!".into())])
        .unwrap();
    kid.create().unwrap();
    parent.create().unwrap();

    let p = parent.new_row(vec![("key", "p".into())]).unwrap();
    let k = kid.new_row(vec![("parent", (&p).into())]).unwrap();
    session.flush().unwrap();

    assert_eq!(k.raw("parent").unwrap().as_str(), Some("p"));
}

#[test]
fn flush_fails_when_required_referent_never_inserts() {
    let session = Session::open_memory().unwrap();
    let parent = session
        .declare("parent", "key", vec![("key", "text!".into())])
        .unwrap();
    let kid = session
        .declare("kid", None, vec![("parent", "parent!".into())])
        .unwrap();
    parent.create().unwrap();
    kid.create().unwrap();

    let p = parent.new_row(vec![("key", "p".into())]).unwrap();
    let k = kid.new_row(vec![("parent", (&p).into())]).unwrap();
    // Deleting the referent before it ever inserts leaves the reference
    // permanently unresolvable.
    p.delete().unwrap();

    let err = session.flush().unwrap_err();
    assert!(err.to_string().contains("unresolvable"));

    // The failed flush rolled back: nothing landed in the database.
    assert!(parent.get("p").unwrap().is_none());
    assert!(k.rowid().is_none());
    assert!(session.pending_changes());
}

#[test]
fn on_change_fires_once_per_clean_to_dirty_transition() {
    let session = Session::open_memory().unwrap();
    let map = session
        .declare(
            "map",
            "key",
            vec![("key", "text!".into()), ("value", "text".into())],
        )
        .unwrap();
    map.create().unwrap();

    let counter = Rc::new(Cell::new(0_u32));
    let hook = Rc::clone(&counter);
    session.set_on_change(Some(Box::new(move || hook.set(hook.get() + 1))));

    assert!(!session.pending_changes());
    map.new_row(vec![("key", "a".into())]).unwrap();
    assert_eq!(counter.get(), 1);
    map.new_row(vec![("key", "b".into())]).unwrap();
    assert_eq!(counter.get(), 1);

    session.flush().unwrap();
    assert!(!session.pending_changes());

    map.new_row(vec![("key", "c".into())]).unwrap();
    assert_eq!(counter.get(), 2);
}

#[test]
fn per_entity_flush_does_not_clear_pending() {
    let session = Session::open_memory().unwrap();
    let map = session
        .declare(
            "map",
            "key",
            vec![("key", "text!".into()), ("value", "text".into())],
        )
        .unwrap();
    map.create().unwrap();

    map.new_row(vec![("key", "a".into())]).unwrap();
    assert!(session.pending_changes());

    let remaining = map.flush(false).unwrap();
    assert_eq!(remaining, 0);
    // Documented behavior: only a whole-session flush resets the flag.
    assert!(session.pending_changes());

    session.flush().unwrap();
    assert!(!session.pending_changes());
}

#[test]
fn single_row_flush_reports_completion() {
    let session = Session::open_memory().unwrap();
    let map = session
        .declare(
            "map",
            "key",
            vec![("key", "text!".into()), ("value", "text".into())],
        )
        .unwrap();
    map.create().unwrap();

    let row = map.new_row(vec![("key", "a".into())]).unwrap();
    assert!(row.flush(false).unwrap());
    assert!(!row.dirty());
    assert!(row.rowid().is_some());
    assert!(session.pending_changes());
}

#[test]
fn delete_happens_exactly_once() {
    let session = Session::open_memory().unwrap();
    let map = session
        .declare(
            "map",
            "key",
            vec![("key", "text!".into()), ("value", "text".into())],
        )
        .unwrap();
    map.create().unwrap();

    let row = map
        .new_row(vec![("key", "a".into()), ("value", "1".into())])
        .unwrap();
    session.flush().unwrap();

    row.set("value", "2").unwrap();
    row.set("value", "3").unwrap();
    row.delete().unwrap();
    row.delete().unwrap();
    session.flush().unwrap();

    assert!(row.deleted());
    assert!(!row.dirty());
    assert!(map.get("a").unwrap().is_none());
    session.flush().unwrap();
}
