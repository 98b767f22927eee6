//! The `Deployer`: upsert decision, uninstall and record lookups.
//!
//! ## `install(incoming)`
//!
//! 1. Derive a missing identity key from the type's key field, if declared.
//!    Still no key → `MissingIdentifier`, nothing touched.
//! 2. Exact lookup by identity key, then the type's alternate-match rule.
//! 3. Match found → adopt the incoming key, overwrite with the type's
//!    excluded fields, persist, `overwritten = true`. This also revives a
//!    soft-deleted match unless the lifecycle is excluded.
//! 4. No match → persist `incoming` as a new record.

use metadeploy_core::config::DeployConfig;
use metadeploy_core::descriptor::{LifecycleShape, TypeCatalog};
use metadeploy_core::error::CoreError;
use metadeploy_core::merge::{soft_delete, Merger};
use metadeploy_core::registry::TypeRegistry;
use metadeploy_core::types::{IdentityKey, Record, TypeName};

use crate::error::DeployError;
use crate::source::RecordSource;

/// Result of [`Deployer::install`].
#[derive(Debug, Clone, PartialEq)]
pub struct Installed {
    /// The record as persisted.
    pub record: Record,
    /// True when an existing record was overwritten in place.
    pub overwritten: bool,
}

/// Entry point for every deploy operation. Owns the type registry for the
/// duration of a run.
pub struct Deployer {
    registry: TypeRegistry,
    config: DeployConfig,
}

impl Deployer {
    pub fn new(registry: TypeRegistry, config: DeployConfig) -> Self {
        let missing = registry.catalog().missing_child_types();
        if !missing.is_empty() {
            tracing::warn!(
                "child types without a descriptor: {}",
                missing
                    .iter()
                    .map(|t| t.0.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        Self { registry, config }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Hands the registry back, e.g. to inspect stores after a run.
    pub fn into_registry(self) -> TypeRegistry {
        self.registry
    }

    // -----------------------------------------------------------------------
    // Upsert
    // -----------------------------------------------------------------------

    pub fn install(&mut self, mut incoming: Record) -> Result<Installed, DeployError> {
        let type_name = incoming.type_name.clone();
        let descriptor = self.registry.descriptor(&type_name)?;
        ensure_writable(descriptor.is_read_only(), &type_name, "install")?;
        descriptor.derive_identity_key(&mut incoming);
        let excluded = descriptor.excluded_fields();

        let Some(key) = incoming.identity_key.clone().filter(|k| !k.is_empty()) else {
            return Err(DeployError::MissingIdentifier { type_name });
        };

        let (catalog, caps) = self.registry.parts_mut(&type_name)?;
        let mut found = caps.store.find_by_identity_key(&key)?;
        if found.is_none() {
            if let Some(rule) = &caps.alternate {
                found = rule.find_alternate(&*caps.store, &incoming)?;
            }
        }

        let Some(mut existing) = found else {
            let record = caps.store.persist(incoming)?;
            tracing::debug!("created {}", record.label());
            return Ok(Installed {
                record,
                overwritten: false,
            });
        };

        if existing.identity_key.as_ref() != Some(&key) {
            tracing::info!(
                "{} matched {} by alternate rule; adopting identity key",
                incoming.label(),
                existing.label()
            );
            existing.identity_key = Some(key);
        }
        merger(catalog, &self.config).overwrite(incoming, &mut existing, &excluded)?;
        let record = caps.store.persist(existing)?;
        tracing::debug!("overwrote {}", record.label());
        Ok(Installed {
            record,
            overwritten: true,
        })
    }

    /// Installs every record `source` yields, in order. The first failure
    /// aborts the call.
    pub fn install_all<S>(&mut self, source: &mut S) -> Result<Vec<Record>, DeployError>
    where
        S: RecordSource + ?Sized,
    {
        let mut installed = Vec::new();
        while let Some(record) = source.next_record()? {
            installed.push(self.install(record)?.record);
        }
        Ok(installed)
    }

    /// Persists `record` as-is, without match resolution.
    pub fn save(&mut self, record: Record) -> Result<Record, DeployError> {
        let descriptor = self.registry.descriptor(&record.type_name)?;
        ensure_writable(descriptor.is_read_only(), &record.type_name, "save")?;
        let caps = self.registry.capabilities_mut(&record.type_name)?;
        Ok(caps.store.persist(record)?)
    }

    /// Overwrites `existing` with `incoming` using the type's exclusions.
    /// Nothing is persisted.
    pub fn overwrite(&self, incoming: Record, existing: &mut Record) -> Result<(), DeployError> {
        let excluded = self.registry.descriptor(&existing.type_name)?.excluded_fields();
        merger(self.registry.catalog(), &self.config).overwrite(incoming, existing, &excluded)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Uninstall
    // -----------------------------------------------------------------------

    /// Retires, voids or purges `existing` according to its type's lifecycle
    /// shape. `None` is a no-op.
    ///
    /// Returns the persisted soft-deleted record, or `None` if nothing was
    /// passed or the record was purged.
    pub fn uninstall(
        &mut self,
        existing: Option<Record>,
        reason: &str,
    ) -> Result<Option<Record>, DeployError> {
        let Some(mut record) = existing else {
            return Ok(None);
        };
        let descriptor = self.registry.descriptor(&record.type_name)?;
        ensure_writable(descriptor.is_read_only(), &record.type_name, "uninstall")?;
        let shape = descriptor.lifecycle_shape();

        let caps = self.registry.capabilities_mut(&record.type_name)?;
        if shape == LifecycleShape::None {
            tracing::debug!("purging {}", record.label());
            caps.store.purge(&record)?;
            return Ok(None);
        }
        soft_delete(&mut record, shape, reason, self.config.actor.as_deref())?;
        Ok(Some(caps.store.persist(record)?))
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Record of `type_name` with `key`, if any.
    pub fn possible(&self, type_name: &str, key: &str) -> Result<Option<Record>, DeployError> {
        let caps = self.registry.capabilities(&TypeName::from(type_name))?;
        Ok(caps.store.find_by_identity_key(&IdentityKey::from(key))?)
    }

    /// Like [`possible`](Self::possible) but a missing record is an error.
    pub fn existing(&self, type_name: &str, key: &str) -> Result<Record, DeployError> {
        self.possible(type_name, key)?
            .ok_or_else(|| DeployError::MissingReference {
                type_name: TypeName::from(type_name),
                identity_key: IdentityKey::from(key),
            })
    }

    /// Every stored record of `type_name`, soft-deleted ones included.
    pub fn fetch_all(&self, type_name: &TypeName) -> Result<Vec<Record>, DeployError> {
        Ok(self.registry.capabilities(type_name)?.store.find_all()?)
    }

    /// Flushes every store so later lookups observe earlier writes.
    pub fn flush(&mut self) -> Result<(), DeployError> {
        tracing::debug!("flushing stores");
        Ok(self.registry.flush_all()?)
    }
}

fn merger<'a>(catalog: &'a TypeCatalog, config: &'a DeployConfig) -> Merger<'a> {
    Merger::new(catalog)
        .actor(config.actor.as_deref())
        .retire_reason(&config.merge_retire_reason)
}

fn ensure_writable(
    read_only: bool,
    type_name: &TypeName,
    operation: &'static str,
) -> Result<(), DeployError> {
    if read_only {
        return Err(CoreError::UnsupportedOperation {
            type_name: type_name.clone(),
            operation,
        }
        .into());
    }
    Ok(())
}
