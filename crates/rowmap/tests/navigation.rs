//! Virtual foreign-key navigation: singular and multi, with the dirty set
//! merged into navigation results.

use rowmap::{Session, fkey};

/// parent(key TEXT pk, name TEXT, child -> virtual singular navigation)
/// child(parent fkey -> parent required unique, data TEXT pk)
fn family() -> (Session, std::rc::Rc<rowmap::Entity>, std::rc::Rc<rowmap::Entity>) {
    let session = Session::open_memory().unwrap();
    let parent = session
        .declare(
            "parent",
            "key",
            vec![
                ("key", "text!".into()),
                ("name", "text".into()),
                ("child", "child*".into()),
            ],
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
    parent.create().unwrap();
    child.create().unwrap();
    (session, parent, child)
}

#[test]
fn singular_navigation_follows_reparenting() {
    let (session, parent, child) = family();

    let a = parent
        .new_row(vec![("key", "a".into()), ("name", "A".into())])
        .unwrap();
    let b = parent
        .new_row(vec![("key", "b".into()), ("name", "B".into())])
        .unwrap();
    let kid = child
        .new_row(vec![("parent", (&a).into()), ("data", "blah".into())])
        .unwrap();
    session.flush().unwrap();

    let found = a.get("child").unwrap();
    let found = found.as_row().expect("a has a child");
    assert_eq!(found.get("data").unwrap().as_str(), Some("blah"));
    assert!(b.get("child").unwrap().is_null());

    // Reparent in memory only; navigation must track the pending change.
    kid.set("parent", &b).unwrap();
    assert!(a.get("child").unwrap().is_null());
    let moved = b.get("child").unwrap();
    assert!(std::rc::Rc::ptr_eq(moved.as_row().unwrap(), &kid));
}

#[test]
fn fkey_field_resolves_to_parent_row() {
    let (session, parent, child) = family();
    let a = parent
        .new_row(vec![("key", "a".into()), ("name", "A".into())])
        .unwrap();
    let kid = child
        .new_row(vec![("parent", (&a).into()), ("data", "blah".into())])
        .unwrap();

    // Before the flush the referent is held as a pending row object.
    let referent = kid.get("parent").unwrap();
    assert!(std::rc::Rc::ptr_eq(referent.as_row().unwrap(), &a));

    session.flush().unwrap();

    // After the flush the reference resolves through the identity map.
    let referent = kid.get("parent").unwrap();
    assert!(std::rc::Rc::ptr_eq(referent.as_row().unwrap(), &a));
    assert_eq!(kid.raw("parent").unwrap().as_str(), Some("a"));
}

#[test]
fn wrong_entity_assignment_is_rejected() {
    let (_session, parent, child) = family();
    let a = parent
        .new_row(vec![("key", "a".into()), ("name", "A".into())])
        .unwrap();
    let kid = child
        .new_row(vec![("parent", (&a).into()), ("data", "blah".into())])
        .unwrap();

    let err = kid.set("parent", &kid).unwrap_err();
    assert!(err.to_string().contains("expected a 'parent' row"));
}

/// parent(key TEXT pk, children -> virtual multi navigation)
/// kid(parent fkey -> parent required, n INT) — parent side not unique.
#[test]
fn multi_navigation_merges_dirty_rows() {
    let session = Session::open_memory().unwrap();
    let parent = session
        .declare(
            "parent",
            "key",
            vec![("key", "text!".into()), ("children", "kid*".into())],
        )
        .unwrap();
    let kid = session
        .declare(
            "kid",
            None,
            vec![("parent", "parent!".into()), ("n", "int".into())],
        )
        .unwrap();
    parent.create().unwrap();
    kid.create().unwrap();

    let a = parent.new_row(vec![("key", "a".into())]).unwrap();
    let b = parent.new_row(vec![("key", "b".into())]).unwrap();
    let mut kids = Vec::new();
    for n in 1..=5_i64 {
        kids.push(
            kid.new_row(vec![("parent", (&a).into()), ("n", n.into())])
                .unwrap(),
        );
    }
    session.flush().unwrap();

    // A sixth child exists only in memory.
    let kid6 = kid
        .new_row(vec![("parent", (&a).into()), ("n", 6_i64.into())])
        .unwrap();
    // The first child moves to b, also only in memory.
    kids[0].set("parent", &b).unwrap();

    let children = a.get("children").unwrap();
    let children = children.as_rows().unwrap().to_vec();
    assert_eq!(children.len(), 5);
    assert!(children.iter().any(|r| std::rc::Rc::ptr_eq(r, &kid6)));
    assert!(!children.iter().any(|r| std::rc::Rc::ptr_eq(r, &kids[0])));

    let b_children = b.get("children").unwrap();
    let b_children = b_children.as_rows().unwrap().to_vec();
    assert_eq!(b_children.len(), 1);
    assert!(std::rc::Rc::ptr_eq(&b_children[0], &kids[0]));

    kid6.set("parent", &b).unwrap();
    let b_children = b.get("children").unwrap();
    assert_eq!(b_children.as_rows().unwrap().len(), 2);
}

#[test]
fn navigation_multiplicity_must_match_declaration() {
    let session = Session::open_memory().unwrap();
    let parent = session
        .declare(
            "parent",
            "key",
            vec![
                ("key", "text!".into()),
                ("children", fkey("kid").virtual_nav().multi(false).into()),
            ],
        )
        .unwrap();
    session
        .declare(
            "kid",
            None,
            vec![("parent", "parent!".into())],
        )
        .unwrap();

    let a = parent.new_row(vec![("key", "a".into())]).unwrap();
    // The child-side field is not unique, so the navigation is multi; the
    // explicit multi=false declaration must be rejected.
    let err = a.get("children").unwrap_err();
    assert!(err.to_string().contains("multi"));
}

#[test]
fn virtual_fields_cannot_be_written() {
    let (_session, parent, _child) = family();
    let a = parent
        .new_row(vec![("key", "a".into()), ("name", "A".into())])
        .unwrap();
    assert!(a.set("child", "x").is_err());
}
