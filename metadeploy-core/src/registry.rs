//! Static type → capability table.
//!
//! Built once at startup and handed to the engine by reference. A type can be
//! *described* only (child types persisted through their owner) or
//! *registered* with a store, and optionally an alternate-match rule.

use std::collections::HashMap;

use crate::descriptor::{TypeCatalog, TypeDescriptor};
use crate::error::CoreError;
use crate::store::{AlternateMatch, RecordStore};
use crate::types::TypeName;

/// Capabilities bound to one record type.
pub struct Capabilities {
    pub store: Box<dyn RecordStore>,
    pub alternate: Option<Box<dyn AlternateMatch>>,
}

/// Descriptors plus the capability table, keyed by type name.
#[derive(Default)]
pub struct TypeRegistry {
    catalog: TypeCatalog,
    capabilities: HashMap<TypeName, Capabilities>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor without storage (child-only types).
    pub fn describe(&mut self, descriptor: TypeDescriptor) -> &mut Self {
        self.catalog.insert(descriptor);
        self
    }

    /// Adds a descriptor backed by `store`.
    pub fn register(
        &mut self,
        descriptor: TypeDescriptor,
        store: impl RecordStore + 'static,
    ) -> &mut Self {
        let name = descriptor.name().clone();
        self.catalog.insert(descriptor);
        self.capabilities.insert(
            name,
            Capabilities {
                store: Box::new(store),
                alternate: None,
            },
        );
        self
    }

    /// Attaches an alternate-match rule to an already registered type.
    pub fn alternate_match(
        &mut self,
        type_name: impl Into<TypeName>,
        rule: impl AlternateMatch + 'static,
    ) -> Result<&mut Self, CoreError> {
        let type_name = type_name.into();
        let caps = self
            .capabilities
            .get_mut(&type_name)
            .ok_or(CoreError::NoCapabilityForType { type_name })?;
        caps.alternate = Some(Box::new(rule));
        Ok(self)
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn descriptor(&self, type_name: &TypeName) -> Result<&TypeDescriptor, CoreError> {
        self.catalog.require(type_name)
    }

    pub fn capabilities(&self, type_name: &TypeName) -> Result<&Capabilities, CoreError> {
        self.capabilities
            .get(type_name)
            .ok_or_else(|| CoreError::NoCapabilityForType {
                type_name: type_name.clone(),
            })
    }

    pub fn capabilities_mut(
        &mut self,
        type_name: &TypeName,
    ) -> Result<&mut Capabilities, CoreError> {
        self.capabilities
            .get_mut(type_name)
            .ok_or_else(|| CoreError::NoCapabilityForType {
                type_name: type_name.clone(),
            })
    }

    /// Splits the borrow so callers can read descriptors while writing a store.
    pub fn parts_mut(
        &mut self,
        type_name: &TypeName,
    ) -> Result<(&TypeCatalog, &mut Capabilities), CoreError> {
        let caps = self
            .capabilities
            .get_mut(type_name)
            .ok_or_else(|| CoreError::NoCapabilityForType {
                type_name: type_name.clone(),
            })?;
        Ok((&self.catalog, caps))
    }

    /// Names of every type with a store, sorted.
    pub fn stored_types(&self) -> Vec<TypeName> {
        let mut names: Vec<TypeName> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    /// Flushes every store.
    pub fn flush_all(&mut self) -> Result<(), CoreError> {
        for name in self.stored_types() {
            if let Some(caps) = self.capabilities.get_mut(&name) {
                caps.store.flush()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MatchByField, MemoryStore};

    #[test]
    fn registered_type_has_store_and_descriptor() {
        let mut reg = TypeRegistry::new();
        reg.register(TypeDescriptor::new("location"), MemoryStore::new("location"));
        let name = TypeName::from("location");
        assert!(reg.descriptor(&name).is_ok());
        assert!(reg.capabilities(&name).is_ok());
    }

    #[test]
    fn described_type_has_no_store() {
        let mut reg = TypeRegistry::new();
        reg.describe(TypeDescriptor::new("workflow"));
        let name = TypeName::from("workflow");
        assert!(reg.descriptor(&name).is_ok());
        assert!(matches!(
            reg.capabilities(&name),
            Err(CoreError::NoCapabilityForType { .. })
        ));
    }

    #[test]
    fn alternate_match_requires_registration() {
        let mut reg = TypeRegistry::new();
        assert!(reg.alternate_match("program", MatchByField::new("name")).is_err());

        reg.register(TypeDescriptor::new("program"), MemoryStore::new("program"));
        reg.alternate_match("program", MatchByField::new("name"))
            .expect("attach");
        assert!(reg
            .capabilities(&TypeName::from("program"))
            .unwrap()
            .alternate
            .is_some());
    }

    #[test]
    fn stored_types_are_sorted() {
        let mut reg = TypeRegistry::new();
        reg.register(TypeDescriptor::new("role"), MemoryStore::new("role"))
            .register(TypeDescriptor::new("location"), MemoryStore::new("location"));
        assert_eq!(
            reg.stored_types(),
            vec![TypeName::from("location"), TypeName::from("role")]
        );
    }
}
