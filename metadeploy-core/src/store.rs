//! Storage capabilities the engine calls, plus an in-memory implementation.
//!
//! One [`RecordStore`] backs one record type. How records are kept (SQL,
//! documents, memory) is the implementor's business; the engine only needs
//! identity-key lookup, full listing, persist, purge and flush.

use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::types::{IdentityKey, Record, StorageId, TypeName, Value};

/// Storage capability for a single record type.
pub trait RecordStore {
    /// Exact lookup by identity key.
    fn find_by_identity_key(&self, key: &IdentityKey) -> Result<Option<Record>, CoreError>;

    /// Every stored record of the type, soft-deleted ones included.
    fn find_all(&self) -> Result<Vec<Record>, CoreError>;

    /// Saves `record`, assigning a storage id if it has none, and returns the
    /// stored form.
    fn persist(&mut self, record: Record) -> Result<Record, CoreError>;

    /// Irreversibly removes `record`.
    fn purge(&mut self, record: &Record) -> Result<(), CoreError>;

    /// Pushes pending writes so later lookups observe them.
    fn flush(&mut self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Optional per-type rule that finds a differently keyed record standing for
/// the same logical entity.
pub trait AlternateMatch {
    fn find_alternate(
        &self,
        store: &dyn RecordStore,
        incoming: &Record,
    ) -> Result<Option<Record>, CoreError>;
}

impl<F> AlternateMatch for F
where
    F: Fn(&dyn RecordStore, &Record) -> Result<Option<Record>, CoreError>,
{
    fn find_alternate(
        &self,
        store: &dyn RecordStore,
        incoming: &Record,
    ) -> Result<Option<Record>, CoreError> {
        self(store, incoming)
    }
}

/// Matches the first stored record whose `field` equals the incoming one's,
/// e.g. a program with the same name created before identity keys were
/// assigned consistently.
#[derive(Debug, Clone)]
pub struct MatchByField(pub String);

impl MatchByField {
    pub fn new(field: &str) -> Self {
        Self(field.to_owned())
    }
}

impl AlternateMatch for MatchByField {
    fn find_alternate(
        &self,
        store: &dyn RecordStore,
        incoming: &Record,
    ) -> Result<Option<Record>, CoreError> {
        let Some(wanted) = incoming.get(&self.0).filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        Ok(store
            .find_all()?
            .into_iter()
            .find(|candidate| candidate.get(&self.0) == Some(wanted)))
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Ordered in-memory store with sequential storage ids.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    type_name: TypeName,
    records: BTreeMap<StorageId, Record>,
    next_id: u64,
    flushes: usize,
}

impl MemoryStore {
    pub fn new(type_name: impl Into<TypeName>) -> Self {
        Self {
            type_name: type_name.into(),
            records: BTreeMap::new(),
            next_id: 1,
            flushes: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of times [`RecordStore::flush`] has been called.
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    fn check_type(&self, record: &Record) -> Result<(), CoreError> {
        if record.type_name != self.type_name {
            return Err(CoreError::Store {
                type_name: self.type_name.clone(),
                message: format!("cannot store a record of type '{}'", record.type_name),
            });
        }
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn find_by_identity_key(&self, key: &IdentityKey) -> Result<Option<Record>, CoreError> {
        Ok(self
            .records
            .values()
            .find(|r| r.identity_key.as_ref() == Some(key))
            .cloned())
    }

    fn find_all(&self) -> Result<Vec<Record>, CoreError> {
        Ok(self.records.values().cloned().collect())
    }

    fn persist(&mut self, mut record: Record) -> Result<Record, CoreError> {
        self.check_type(&record)?;
        let id = match record.storage_id {
            Some(id) => {
                if !self.records.contains_key(&id) {
                    return Err(CoreError::Store {
                        type_name: self.type_name.clone(),
                        message: format!("no stored record with storage id {id}"),
                    });
                }
                id
            }
            None => {
                let id = StorageId(self.next_id);
                self.next_id += 1;
                record.storage_id = Some(id);
                id
            }
        };
        assign_child_ids(&mut record, &mut self.next_id);
        self.records.insert(id, record.clone());
        Ok(record)
    }

    fn purge(&mut self, record: &Record) -> Result<(), CoreError> {
        self.check_type(record)?;
        if let Some(id) = record.storage_id {
            self.records.remove(&id);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CoreError> {
        self.flushes += 1;
        Ok(())
    }
}

/// Children are persisted with their owner and get ids from the same sequence.
fn assign_child_ids(record: &mut Record, next_id: &mut u64) {
    for value in record.fields.values_mut() {
        match value {
            Value::Record(child) => assign_id(child, next_id),
            Value::Records(items) => {
                for child in items.iter_mut() {
                    assign_id(child, next_id);
                }
            }
            _ => {}
        }
    }
}

fn assign_id(child: &mut Record, next_id: &mut u64) {
    if child.storage_id.is_none() {
        child.storage_id = Some(StorageId(*next_id));
        *next_id += 1;
    }
    assign_child_ids(child, next_id);
}
