//! Synchronization engine: create / update / retire sets, idempotence,
//! key hygiene and CSV-fed runs.

use std::io::Write;

use metadeploy_core::{
    DeployConfig, Lifecycle, MemoryStore, Record, RecordRef, StorageId, TypeDescriptor,
    TypeName, TypeRegistry, Value,
};
use metadeploy_engine::{
    ByField, ByIdentityKey, CsvSource, DeployError, Deployer, IterSource, StringRecord,
    SyncPolicy,
};
use tempfile::TempDir;

fn deployer() -> Deployer {
    let mut registry = TypeRegistry::new();
    registry
        .register(
            TypeDescriptor::new("item").retirable().scalar("v"),
            MemoryStore::new("item"),
        )
        .register(
            TypeDescriptor::new("concept_source").scalar("code").scalar("name"),
            MemoryStore::new("concept_source"),
        )
        .register(
            TypeDescriptor::new("program")
                .retirable()
                .scalar("name")
                .collection("workflows", "workflow"),
            MemoryStore::new("program"),
        )
        .describe(
            TypeDescriptor::new("workflow")
                .retirable()
                .owner("program")
                .scalar("concept"),
        );
    let config = DeployConfig {
        actor: Some("sync".into()),
        ..DeployConfig::default()
    };
    Deployer::new(registry, config)
}

fn item(key: &str, v: i64) -> Record {
    Record::keyed("item", key).with("v", v)
}

/// Program `p` owning one workflow per key.
fn program(workflows: &[&str]) -> Record {
    let root = Record::keyed("program", "p").with("name", "HIV");
    let owner = RecordRef::to(&root);
    let workflows: Vec<Record> = workflows
        .iter()
        .map(|k| {
            Record::keyed("workflow", *k)
                .with("program", owner.clone())
                .with("concept", k.to_uppercase())
        })
        .collect();
    root.with("workflows", workflows)
}

fn sync_programs(d: &mut Deployer, records: Vec<Record>) -> metadeploy_engine::SyncResult {
    let mut source = IterSource::new(records);
    d.synchronize(&mut source, &ByIdentityKey::new("program"))
        .expect("sync")
}

fn keys(records: &[Record]) -> Vec<&str> {
    let mut keys: Vec<&str> = records
        .iter()
        .map(|r| r.identity_key.as_ref().unwrap().as_str())
        .collect();
    keys.sort();
    keys
}

fn sync(d: &mut Deployer, records: Vec<Record>) -> metadeploy_engine::SyncResult {
    let mut source = IterSource::new(records);
    d.synchronize(&mut source, &ByIdentityKey::new("item"))
        .expect("sync")
}

#[test]
fn round_trip_create_noop_update_retire() {
    let mut d = deployer();

    let first = sync(&mut d, vec![item("a", 1), item("b", 1)]);
    assert_eq!(keys(&first.created), vec!["a", "b"]);
    assert!(first.updated.is_empty());
    assert!(first.retired.is_empty());

    let second = sync(&mut d, vec![item("a", 1), item("b", 1)]);
    assert!(second.is_empty(), "second run must be a no-op: {second}");

    let third = sync(&mut d, vec![item("a", 2)]);
    assert!(third.created.is_empty());
    assert_eq!(keys(&third.updated), vec!["a"]);
    assert_eq!(third.updated[0].get("v"), Some(&Value::Int(2)));
    assert_eq!(keys(&third.retired), vec!["b"]);

    let b = d.existing("item", "b").unwrap();
    match b.lifecycle {
        Lifecycle::Retired(r) => {
            assert_eq!(r.reason, "Not found in sync source");
            assert_eq!(r.by.as_deref(), Some("sync"));
        }
        other => panic!("expected retired, got {other:?}"),
    }
}

#[test]
fn result_is_independent_of_source_order() {
    let mut forward = deployer();
    let mut backward = deployer();
    sync(&mut forward, vec![item("a", 1), item("b", 1), item("c", 1)]);
    sync(&mut backward, vec![item("a", 1), item("b", 1), item("c", 1)]);

    let f = sync(&mut forward, vec![item("a", 2), item("d", 1), item("b", 1)]);
    let b = sync(&mut backward, vec![item("b", 1), item("d", 1), item("a", 2)]);

    assert_eq!(keys(&f.created), keys(&b.created));
    assert_eq!(keys(&f.updated), keys(&b.updated));
    assert_eq!(keys(&f.retired), keys(&b.retired));
}

#[test]
fn already_retired_records_are_not_retired_again() {
    let mut d = deployer();
    sync(&mut d, vec![item("a", 1), item("b", 1)]);
    sync(&mut d, vec![item("a", 1)]);

    let again = sync(&mut d, vec![item("a", 1)]);
    assert!(again.retired.is_empty());
}

#[test]
fn retired_record_reappearing_is_revived() {
    let mut d = deployer();
    sync(&mut d, vec![item("a", 1)]);
    sync(&mut d, vec![]);
    assert!(!d.existing("item", "a").unwrap().is_active());

    let back = sync(&mut d, vec![item("a", 1)]);
    assert_eq!(keys(&back.updated), vec!["a"]);
    assert!(d.existing("item", "a").unwrap().is_active());
}

#[test]
fn dropped_child_settles_after_one_update() {
    let mut d = deployer();
    let first = sync_programs(&mut d, vec![program(&["w1", "w2"])]);
    assert_eq!(keys(&first.created), vec!["p"]);

    let second = sync_programs(&mut d, vec![program(&["w1"])]);
    assert_eq!(keys(&second.updated), vec!["p"]);
    assert!(second.retired.is_empty());
    let stored = d.existing("program", "p").unwrap();
    assert!(stored.child("workflows", "w1").unwrap().is_active());
    assert!(!stored.child("workflows", "w2").unwrap().is_active());

    let third = sync_programs(&mut d, vec![program(&["w1"])]);
    assert!(third.is_empty(), "third run must be a no-op: {third}");
    let fourth = sync_programs(&mut d, vec![program(&["w1"])]);
    assert!(fourth.is_empty(), "fourth run must be a no-op: {fourth}");
}

#[test]
fn dropped_child_reappearing_is_revived() {
    let mut d = deployer();
    sync_programs(&mut d, vec![program(&["w1", "w2"])]);
    sync_programs(&mut d, vec![program(&["w1"])]);

    let back = sync_programs(&mut d, vec![program(&["w1", "w2"])]);
    assert_eq!(keys(&back.updated), vec!["p"]);
    let stored = d.existing("program", "p").unwrap();
    assert_eq!(stored.children("workflows").unwrap().len(), 2);
    assert!(stored.child("workflows", "w2").unwrap().is_active());

    assert!(sync_programs(&mut d, vec![program(&["w1", "w2"])]).is_empty());
}

#[test]
fn empty_collection_matches_absent_container() {
    let mut d = deployer();
    let bare = Record::keyed("program", "p").with("name", "HIV");
    let first = sync_programs(&mut d, vec![bare]);
    assert_eq!(keys(&first.created), vec!["p"]);

    let second = sync_programs(&mut d, vec![program(&[])]);
    assert!(second.is_empty(), "empty collection must be a no-op: {second}");
    let third = sync_programs(&mut d, vec![program(&[])]);
    assert!(third.is_empty(), "empty collection must be a no-op: {third}");
}

#[test]
fn unkeyed_incoming_record_aborts() {
    let mut d = deployer();
    let mut source = IterSource::new(vec![item("a", 1), Record::new("item").with("v", 1i64)]);
    let err = d
        .synchronize(&mut source, &ByIdentityKey::new("item"))
        .unwrap_err();
    assert!(matches!(err, DeployError::MissingSyncKey { .. }), "got: {err}");
}

/// Keys on `v` so two stored items can collide.
struct ByValue;

impl SyncPolicy for ByValue {
    type Key = i64;

    fn type_name(&self) -> TypeName {
        TypeName::from("item")
    }

    fn sync_key(&self, record: &Record) -> Option<i64> {
        match record.get("v") {
            Some(Value::Int(v)) => Some(*v),
            _ => None,
        }
    }
}

#[test]
fn duplicate_and_missing_keys_excluded_from_index() {
    let mut d = deployer();
    d.save(item("a", 1)).unwrap();
    d.save(item("b", 1)).unwrap();
    d.save(Record::keyed("item", "c")).unwrap();

    let mut source = IterSource::new(Vec::<Record>::new());
    let result = d.synchronize(&mut source, &ByValue).expect("sync");

    // Only "a" made it into the index, so only "a" is retired.
    assert_eq!(keys(&result.retired), vec!["a"]);
    assert!(d.existing("item", "b").unwrap().is_active());
    assert!(d.existing("item", "c").unwrap().is_active());
}

#[test]
fn lifecycle_less_types_are_purged() {
    let mut d = deployer();
    let policy = ByField::new("concept_source", "code");
    let mut source = IterSource::new(vec![
        Record::keyed("concept_source", "s1").with("code", "SNOMED"),
        Record::keyed("concept_source", "s2").with("code", "ICD"),
    ]);
    d.synchronize(&mut source, &policy).unwrap();

    let mut source = IterSource::new(vec![
        Record::keyed("concept_source", "s1").with("code", "SNOMED"),
    ]);
    let result = d.synchronize(&mut source, &policy).unwrap();
    assert_eq!(keys(&result.retired), vec!["s2"]);
    assert!(d.possible("concept_source", "s2").unwrap().is_none());
}

#[test]
fn csv_source_feeds_synchronization() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("sources.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "uuid,code,name").unwrap();
    writeln!(file, "s1,SNOMED,SNOMED CT").unwrap();
    writeln!(file, "s2,ICD,ICD-10").unwrap();
    drop(file);

    let config = DeployConfig {
        resource_dir: dir.path().to_path_buf(),
        ..DeployConfig::default()
    };
    let mut source = CsvSource::resource(&config, "sources.csv", true, |row: &StringRecord| {
        Ok::<_, DeployError>(
            Record::keyed("concept_source", row.get(0).unwrap_or_default())
                .with("code", row.get(1).unwrap_or_default())
                .with("name", row.get(2).unwrap_or_default()),
        )
    })
    .expect("open");

    let mut d = deployer();
    let result = d
        .synchronize(&mut source, &ByField::new("concept_source", "code"))
        .expect("sync");

    assert_eq!(keys(&result.created), vec!["s1", "s2"]);
    assert!(!source.is_open(), "reader released after the drain");
    let stored = d.existing("concept_source", "s2").unwrap();
    assert_eq!(stored.text("name"), Some("ICD-10"));
    assert_eq!(stored.storage_id, Some(StorageId(2)));
}

#[test]
fn missing_csv_resource_is_io_error() {
    let dir = TempDir::new().expect("tempdir");
    let config = DeployConfig {
        resource_dir: dir.path().to_path_buf(),
        ..DeployConfig::default()
    };
    let result = CsvSource::resource(&config, "absent.csv", true, |_: &StringRecord| {
        Ok::<_, DeployError>(Record::new("concept_source"))
    });
    assert!(matches!(result, Err(DeployError::Io { .. })));
}
