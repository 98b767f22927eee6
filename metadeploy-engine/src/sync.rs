//! Key-based reconciliation of a record stream against stored records.
//!
//! ## Phases
//!
//! 1. **Index**: key every stored record of the policy's type. Unkeyed and
//!    duplicate-keyed records are left out with a warning.
//! 2. **Drain**: pull each incoming record. New key → save as new. Known key
//!    → overwrite and save if the policy says it differs. An unkeyed incoming
//!    record aborts the run.
//! 3. **Retire**: uninstall every indexed record that was never matched and
//!    is still active.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;

use metadeploy_core::types::{IdentityKey, Record, StorageId, TypeName};

use crate::deployer::Deployer;
use crate::error::DeployError;
use crate::source::RecordSource;

/// How records of one type are matched and compared during a sync.
pub trait SyncPolicy {
    type Key: Eq + Hash + Clone + fmt::Debug;

    fn type_name(&self) -> TypeName;

    /// Stored records to reconcile against.
    fn fetch_all_existing(&self, deployer: &Deployer) -> Result<Vec<Record>, DeployError> {
        deployer.fetch_all(&self.type_name())
    }

    /// Key for `record`; `None` means it cannot take part.
    fn sync_key(&self, record: &Record) -> Option<Self::Key>;

    /// Whether `existing` needs updating to match `incoming`.
    fn differs(&self, incoming: &Record, existing: &Record) -> bool {
        incoming.content_hash() != existing.content_hash()
    }
}

/// Matches records on their identity key.
#[derive(Debug, Clone)]
pub struct ByIdentityKey {
    type_name: TypeName,
}

impl ByIdentityKey {
    pub fn new(type_name: impl Into<TypeName>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

impl SyncPolicy for ByIdentityKey {
    type Key = IdentityKey;

    fn type_name(&self) -> TypeName {
        self.type_name.clone()
    }

    fn sync_key(&self, record: &Record) -> Option<IdentityKey> {
        record.identity_key.clone().filter(|k| !k.is_empty())
    }
}

/// Matches records on a text field, e.g. a code from an external system.
#[derive(Debug, Clone)]
pub struct ByField {
    type_name: TypeName,
    field: String,
}

impl ByField {
    pub fn new(type_name: impl Into<TypeName>, field: &str) -> Self {
        Self {
            type_name: type_name.into(),
            field: field.to_owned(),
        }
    }
}

impl SyncPolicy for ByField {
    type Key = String;

    fn type_name(&self) -> TypeName {
        self.type_name.clone()
    }

    fn sync_key(&self, record: &Record) -> Option<String> {
        record
            .text(&self.field)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    }
}

/// Records touched by one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncResult {
    pub created: Vec<Record>,
    pub updated: Vec<Record>,
    pub retired: Vec<Record>,
}

impl SyncResult {
    /// True if the pass changed nothing.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.retired.is_empty()
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} retired",
            self.created.len(),
            self.updated.len(),
            self.retired.len()
        )
    }
}

impl Deployer {
    /// Reconciles the records in `source` with stored records of
    /// `policy.type_name()`.
    pub fn synchronize<P, S>(&mut self, source: &mut S, policy: &P) -> Result<SyncResult, DeployError>
    where
        P: SyncPolicy + ?Sized,
        S: RecordSource + ?Sized,
    {
        let type_name = policy.type_name();

        // Index
        let mut index: HashMap<P::Key, StorageId> = HashMap::new();
        let mut cache: HashMap<StorageId, Record> = HashMap::new();
        let mut pending: BTreeSet<StorageId> = BTreeSet::new();
        for record in policy.fetch_all_existing(self)? {
            let Some(id) = record.storage_id else {
                tracing::warn!("{} is not persisted; excluded from sync", record.label());
                continue;
            };
            let Some(key) = policy.sync_key(&record) else {
                tracing::warn!("{} has no sync key; excluded from sync", record.label());
                continue;
            };
            if index.contains_key(&key) {
                tracing::warn!(
                    "{} shares sync key {:?} with another record; excluded from sync",
                    record.label(),
                    key
                );
                continue;
            }
            index.insert(key, id);
            pending.insert(id);
            cache.insert(id, record);
        }
        tracing::info!("indexed {} existing {} record(s)", index.len(), type_name);

        // Drain
        let mut result = SyncResult::default();
        while let Some(incoming) = source.next_record()? {
            let Some(key) = policy.sync_key(&incoming) else {
                return Err(DeployError::MissingSyncKey {
                    type_name: incoming.type_name.clone(),
                    label: incoming.label(),
                });
            };
            let matched = index.get(&key).copied();
            let Some(id) = matched else {
                let saved = self.save(incoming)?;
                tracing::info!("created {}", saved.label());
                if let Some(id) = saved.storage_id {
                    index.insert(key, id);
                    cache.insert(id, saved.clone());
                }
                result.created.push(saved);
                continue;
            };
            pending.remove(&id);
            let Some(existing) = cache.get_mut(&id) else {
                continue;
            };
            if policy.differs(&incoming, existing) {
                self.overwrite(incoming, existing)?;
                let saved = self.save(existing.clone())?;
                tracing::info!("updated {}", saved.label());
                *existing = saved.clone();
                result.updated.push(saved);
            }
        }

        // Retire
        let reason = self.config().sync_retire_reason.clone();
        for id in pending {
            let Some(record) = cache.remove(&id) else {
                continue;
            };
            if !record.is_active() {
                continue;
            }
            let snapshot = record.clone();
            let retired = self.uninstall(Some(record), &reason)?.unwrap_or(snapshot);
            tracing::info!("retired {}", retired.label());
            result.retired.push(retired);
        }

        tracing::info!("synchronized {}: {}", type_name, result);
        Ok(result)
    }
}
