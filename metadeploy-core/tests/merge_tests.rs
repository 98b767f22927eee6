//! Collection merge behaviour of the overwrite engine.

use metadeploy_core::{
    CoreError, FieldSet, Lifecycle, LifecycleShape, Merger, Record, RecordRef, StorageId,
    TypeCatalog, TypeDescriptor, Value,
};
use rstest::rstest;

fn catalog(child_shape: LifecycleShape) -> TypeCatalog {
    let mut c = TypeCatalog::new();
    c.insert(
        TypeDescriptor::new("program")
            .retirable()
            .scalar("name")
            .collection("workflows", "workflow"),
    );
    c.insert(
        TypeDescriptor::new("workflow")
            .lifecycle(child_shape)
            .owner("program")
            .scalar("concept")
            .collection("states", "state")
            .collection("notes", "note")
            .exclude("date_created"),
    );
    c.insert(TypeDescriptor::new("state").retirable().owner("workflow"));
    c.insert(TypeDescriptor::new("note").scalar("text"));
    c
}

fn workflow(key: &str, concept: &str) -> Record {
    Record::keyed("workflow", key).with("concept", concept)
}

/// Existing program #1 with workflows a and b, as a store would return it.
fn existing_program() -> Record {
    let mut p = Record::keyed("program", "p").with("name", "HIV");
    p.storage_id = Some(StorageId(1));
    let owner = RecordRef::to(&p);
    let mut a = workflow("a", "A").with("program", owner.clone());
    a.storage_id = Some(StorageId(2));
    let mut b = workflow("b", "B")
        .with("program", owner)
        .with("date_created", "2020-01-01");
    b.storage_id = Some(StorageId(3));
    p.with("workflows", vec![a, b])
}

fn incoming_program() -> Record {
    let p = Record::keyed("program", "p").with("name", "HIV");
    let owner = RecordRef::to(&p);
    let b = workflow("b", "B2").with("program", owner.clone());
    let c = workflow("c", "C").with("program", owner);
    p.with("workflows", vec![b, c])
}

#[test]
fn collection_converges_on_incoming_keys() {
    let catalog = catalog(LifecycleShape::Retire);
    let mut existing = existing_program();

    Merger::new(&catalog)
        .actor(Some("admin"))
        .overwrite(incoming_program(), &mut existing, &FieldSet::new())
        .expect("merge");

    let workflows = existing.children("workflows").expect("workflows");
    let keys: Vec<&str> = workflows
        .iter()
        .map(|w| w.identity_key.as_ref().unwrap().as_str())
        .collect();
    assert_eq!(keys, vec!["a", "b", "c"], "container kept, addition appended last");

    let a = existing.child("workflows", "a").unwrap();
    match &a.lifecycle {
        Lifecycle::Retired(r) => {
            assert_eq!(r.reason, "metadata deploy");
            assert_eq!(r.by.as_deref(), Some("admin"));
        }
        other => panic!("expected a retired, got {other:?}"),
    }
    assert_eq!(a.storage_id, Some(StorageId(2)));

    let b = existing.child("workflows", "b").unwrap();
    assert!(b.is_active());
    assert_eq!(b.text("concept"), Some("B2"));
    assert_eq!(b.storage_id, Some(StorageId(3)));
    assert_eq!(b.text("date_created"), Some("2020-01-01"), "child exclusion honoured");

    let c = existing.child("workflows", "c").unwrap();
    assert_eq!(c.storage_id, None);
    match c.get("program") {
        Some(Value::Ref(owner)) => assert_eq!(owner.storage_id, Some(StorageId(1))),
        other => panic!("expected owner ref, got {other:?}"),
    }
}

#[test]
fn dropping_child_without_lifecycle_fails() {
    let catalog = catalog(LifecycleShape::None);
    let mut existing = existing_program();

    let err = Merger::new(&catalog)
        .overwrite(incoming_program(), &mut existing, &FieldSet::new())
        .unwrap_err();
    match err {
        CoreError::InvalidLifecycleShape { type_name, identity_key } => {
            assert_eq!(type_name.0, "workflow");
            assert_eq!(identity_key.unwrap().as_str(), "a");
        }
        other => panic!("expected InvalidLifecycleShape, got {other:?}"),
    }
}

#[rstest]
#[case(LifecycleShape::Retire, true)]
#[case(LifecycleShape::Void, false)]
fn dropped_child_uses_its_lifecycle_shape(#[case] shape: LifecycleShape, #[case] retired: bool) {
    let catalog = catalog(shape);
    let mut existing = existing_program();
    Merger::new(&catalog)
        .overwrite(incoming_program(), &mut existing, &FieldSet::new())
        .expect("merge");

    let a = existing.child("workflows", "a").unwrap();
    assert_eq!(matches!(a.lifecycle, Lifecycle::Retired(_)), retired);
    assert_eq!(matches!(a.lifecycle, Lifecycle::Voided(_)), !retired);
}

#[test]
fn already_retired_child_keeps_its_audit_trail() {
    let catalog = catalog(LifecycleShape::Retire);
    let mut existing = existing_program();
    let a = &mut existing.children_mut("workflows").unwrap()[0];
    metadeploy_core::soft_delete(a, LifecycleShape::Retire, "earlier", None).unwrap();

    Merger::new(&catalog)
        .overwrite(incoming_program(), &mut existing, &FieldSet::new())
        .expect("merge");

    let a = existing.child("workflows", "a").unwrap();
    assert_eq!(a.lifecycle.retirement().unwrap().reason, "earlier");
}

#[test]
fn dropped_child_cascades_to_grandchildren() {
    let catalog = catalog(LifecycleShape::Retire);
    let mut existing = existing_program();
    let a = &mut existing.children_mut("workflows").unwrap()[0];
    a.set("states", vec![Record::keyed("state", "s1")]);

    Merger::new(&catalog)
        .overwrite(incoming_program(), &mut existing, &FieldSet::new())
        .expect("merge");

    let a = existing.child("workflows", "a").unwrap();
    assert!(!a.child("states", "s1").unwrap().is_active());
}

#[test]
fn cascade_leaves_lifecycle_less_grandchildren_in_place() {
    let catalog = catalog(LifecycleShape::Retire);
    let mut existing = existing_program();
    let a = &mut existing.children_mut("workflows").unwrap()[0];
    a.set("states", vec![Record::keyed("state", "s1")]);
    a.set("notes", vec![Record::keyed("note", "n1").with("text", "keep")]);

    Merger::new(&catalog)
        .overwrite(incoming_program(), &mut existing, &FieldSet::new())
        .expect("merge");

    let a = existing.child("workflows", "a").unwrap();
    assert!(!a.is_active());
    assert!(!a.child("states", "s1").unwrap().is_active());
    let note = a.child("notes", "n1").unwrap();
    assert!(note.is_active());
    assert_eq!(note.text("text"), Some("keep"));
}

#[test]
fn nested_collections_merge_recursively() {
    let catalog = catalog(LifecycleShape::Retire);
    let mut existing = existing_program();
    existing.children_mut("workflows").unwrap()[1]
        .set("states", vec![Record::keyed("state", "s1"), Record::keyed("state", "s2")]);

    let mut incoming = incoming_program();
    incoming.children_mut("workflows").unwrap()[0]
        .set("states", vec![Record::keyed("state", "s2").with("initial", true)]);

    Merger::new(&catalog)
        .overwrite(incoming, &mut existing, &FieldSet::new())
        .expect("merge");

    let b = existing.child("workflows", "b").unwrap();
    assert!(!b.child("states", "s1").unwrap().is_active());
    let s2 = b.child("states", "s2").unwrap();
    assert!(s2.is_active());
    assert_eq!(s2.get("initial"), Some(&Value::Bool(true)));
}

#[test]
fn empty_incoming_collection_soft_deletes_everything() {
    let catalog = catalog(LifecycleShape::Retire);
    let mut existing = existing_program();
    let incoming = Record::keyed("program", "p").with("name", "HIV");

    Merger::new(&catalog)
        .overwrite(incoming, &mut existing, &FieldSet::new())
        .expect("merge");

    let workflows = existing.children("workflows").unwrap();
    assert_eq!(workflows.len(), 2);
    assert!(workflows.iter().all(|w| !w.is_active()));
}
