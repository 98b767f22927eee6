//! Identity-preserving overwrite of one record by another of the same type.
//!
//! ## `Merger::overwrite`
//!
//! 1. Copy every non-excluded field (and the lifecycle state, unless
//!    [`LIFECYCLE_FIELD`] is excluded) from `incoming` onto `existing`.
//! 2. Before copying a child or collection value, rewrite each child's
//!    declared owner fields that point at the `incoming` root so they point
//!    at the `existing` root.
//! 3. Collections: an absent container on `existing` adopts the incoming
//!    container as-is. A present container is kept and merged item by item
//!    on child identity keys; unmatched existing children are soft-deleted,
//!    unmatched incoming children are appended last.
//! 4. Storage ids and the root identity key are never copied.

use std::collections::BTreeSet;

use chrono::Utc;

use crate::descriptor::{FieldKind, FieldSet, LifecycleShape, TypeCatalog, LIFECYCLE_FIELD};
use crate::error::CoreError;
use crate::types::{Lifecycle, Record, RecordRef, Retirement, TypeName, Value};

/// Reason recorded on children soft-deleted by a collection merge.
pub const DEFAULT_MERGE_RETIRE_REASON: &str = "metadata deploy";

/// Merge engine bound to a type catalog and an audit identity.
#[derive(Debug, Clone, Copy)]
pub struct Merger<'a> {
    catalog: &'a TypeCatalog,
    actor: Option<&'a str>,
    retire_reason: &'a str,
}

impl<'a> Merger<'a> {
    pub fn new(catalog: &'a TypeCatalog) -> Self {
        Self {
            catalog,
            actor: None,
            retire_reason: DEFAULT_MERGE_RETIRE_REASON,
        }
    }

    /// Who is recorded as retiring or voiding dropped children.
    pub fn actor(mut self, actor: Option<&'a str>) -> Self {
        self.actor = actor;
        self
    }

    pub fn retire_reason(mut self, reason: &'a str) -> Self {
        self.retire_reason = reason;
        self
    }

    /// Overwrites `existing` with `incoming`, leaving `excluded` fields alone.
    ///
    /// Fails with `InvalidLifecycleShape` if a collection would lose a child
    /// whose type cannot be soft-deleted; `existing` may then be partially
    /// updated and must not be persisted.
    pub fn overwrite(
        &self,
        mut incoming: Record,
        existing: &mut Record,
        excluded: &FieldSet,
    ) -> Result<(), CoreError> {
        if incoming.type_name != existing.type_name {
            return Err(CoreError::TypeMismatch {
                incoming: incoming.type_name,
                existing: existing.type_name.clone(),
            });
        }
        let descriptor = self.catalog.require(&existing.type_name)?;
        let incoming_root = RecordRef::to(&incoming);
        let existing_root = RecordRef::to(existing);

        if !excluded.contains(LIFECYCLE_FIELD) {
            existing.lifecycle = std::mem::take(&mut incoming.lifecycle);
        }

        let names: BTreeSet<String> = descriptor
            .fields()
            .iter()
            .map(|f| f.name.clone())
            .chain(incoming.fields.keys().cloned())
            .chain(existing.fields.keys().cloned())
            .collect();

        for name in names {
            if excluded.contains(&name) {
                continue;
            }
            let mut value = incoming.take(&name);
            self.fix_back_references(&mut value, &incoming_root, &existing_root);
            match descriptor.kind_of(&name) {
                FieldKind::Collection(child_type) => {
                    self.merge_collection(child_type, &name, value, existing)?;
                }
                _ => existing.set(&name, value),
            }
        }
        Ok(())
    }

    fn merge_collection(
        &self,
        child_type: &TypeName,
        field: &str,
        incoming: Value,
        existing: &mut Record,
    ) -> Result<(), CoreError> {
        let incoming_items = match incoming {
            Value::Records(items) => items,
            Value::Null => Vec::new(),
            other => {
                existing.set(field, other);
                return Ok(());
            }
        };

        let Some(container) = existing.children_mut(field) else {
            // No container yet: adopt the incoming one wholesale.
            if !incoming_items.is_empty() {
                existing.set(field, Value::Records(incoming_items));
            }
            return Ok(());
        };

        let child_excluded = self.catalog.require(child_type)?.excluded_fields();
        let mut handled = vec![false; container.len()];
        let mut staged = Vec::new();

        for item in incoming_items {
            let position = item
                .identity_key
                .as_ref()
                .filter(|k| !k.is_empty())
                .and_then(|k| {
                    container
                        .iter()
                        .position(|c| c.identity_key.as_ref() == Some(k))
                });
            match position {
                Some(i) => {
                    self.overwrite(item, &mut container[i], &child_excluded)?;
                    handled[i] = true;
                }
                None => staged.push(item),
            }
        }

        for (child, done) in container.iter_mut().zip(handled) {
            if !done {
                self.drop_child(child)?;
            }
        }

        if !staged.is_empty() {
            tracing::debug!(
                "adding {} new {} item(s) to '{}'",
                staged.len(),
                child_type,
                field
            );
        }
        container.extend(staged);
        Ok(())
    }

    /// Soft-deletes a child that is no longer part of its collection, along
    /// with any soft-deletable children of its own.
    fn drop_child(&self, child: &mut Record) -> Result<(), CoreError> {
        let shape = self.catalog.require(&child.type_name)?.lifecycle_shape();
        if shape == LifecycleShape::None {
            return Err(CoreError::InvalidLifecycleShape {
                type_name: child.type_name.clone(),
                identity_key: child.identity_key.clone(),
            });
        }
        tracing::debug!("soft-deleting {} dropped from collection", child.label());
        soft_delete(child, shape, self.retire_reason, self.actor)?;
        self.cascade(child)
    }

    /// Soft-deletes collection children of `record` that have a lifecycle;
    /// children without one are left in place.
    fn cascade(&self, record: &mut Record) -> Result<(), CoreError> {
        for value in record.fields.values_mut() {
            let Value::Records(items) = value else {
                continue;
            };
            for item in items.iter_mut() {
                let shape = self
                    .catalog
                    .get(&item.type_name)
                    .map(|d| d.lifecycle_shape())
                    .unwrap_or_default();
                if shape != LifecycleShape::None {
                    soft_delete(item, shape, self.retire_reason, self.actor)?;
                    self.cascade(item)?;
                }
            }
        }
        Ok(())
    }

    /// Points owner fields of children at `to` wherever they designate `from`.
    fn fix_back_references(&self, value: &mut Value, from: &RecordRef, to: &RecordRef) {
        match value {
            Value::Record(child) => self.fix_owner_fields(child, from, to),
            Value::Records(items) => {
                for child in items.iter_mut() {
                    self.fix_owner_fields(child, from, to);
                }
            }
            _ => {}
        }
    }

    fn fix_owner_fields(&self, child: &mut Record, from: &RecordRef, to: &RecordRef) {
        let Some(descriptor) = self.catalog.get(&child.type_name) else {
            return;
        };
        for owner in descriptor.owner_fields() {
            if let Some(Value::Ref(target)) = child.fields.get_mut(owner) {
                if target.matches(from) {
                    *target = to.clone();
                }
            }
        }
    }
}

/// Marks `record` retired or voided according to `shape`.
///
/// Already soft-deleted records keep their original audit trail. Shape
/// `None` fails with `InvalidLifecycleShape`.
pub fn soft_delete(
    record: &mut Record,
    shape: LifecycleShape,
    reason: &str,
    actor: Option<&str>,
) -> Result<(), CoreError> {
    if !record.is_active() {
        return Ok(());
    }
    let retirement = Retirement {
        reason: reason.to_owned(),
        at: Utc::now(),
        by: actor.map(str::to_owned),
    };
    record.lifecycle = match shape {
        LifecycleShape::Retire => Lifecycle::Retired(retirement),
        LifecycleShape::Void => Lifecycle::Voided(retirement),
        LifecycleShape::None => {
            return Err(CoreError::InvalidLifecycleShape {
                type_name: record.type_name.clone(),
                identity_key: record.identity_key.clone(),
            })
        }
    };
    Ok(())
}
