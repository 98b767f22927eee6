//! Per-type field descriptor tables.
//!
//! A [`TypeDescriptor`] is built once when a type is registered and tells the
//! merge engine, field by field, what to copy, what to leave alone and which
//! child fields point back at their owner. Fields a record carries but the
//! descriptor does not mention are treated as plain scalars.

use std::collections::{BTreeSet, HashMap};

use crate::error::CoreError;
use crate::types::{Record, TypeName};

/// Reserved field name: putting it in an excluded set stops a merge from
/// copying the lifecycle state (so re-installing does not revive).
pub const LIFECYCLE_FIELD: &str = "lifecycle";

/// Set of field names a merge must not touch.
pub type FieldSet = BTreeSet<String>;

/// How a type soft-deletes its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleShape {
    Retire,
    Void,
    /// Reference data with no lifecycle; only hard purge is possible.
    #[default]
    None,
}

/// Role a field plays in a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Copied by value.
    Scalar,
    /// Handle to an independently stored record; copied by value.
    Reference,
    /// Back-pointer from a child to the record that owns it.
    Owner,
    /// Single embedded child record.
    Child(TypeName),
    /// Container of child records of the given type, merged item by item.
    Collection(TypeName),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub excluded: bool,
}

/// Everything the engine knows about one record type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    name: TypeName,
    lifecycle: LifecycleShape,
    fields: Vec<FieldDescriptor>,
    extra_exclusions: FieldSet,
    keyed_by: Option<String>,
    read_only: bool,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<TypeName>) -> Self {
        Self {
            name: name.into(),
            lifecycle: LifecycleShape::None,
            fields: Vec::new(),
            extra_exclusions: FieldSet::new(),
            keyed_by: None,
            read_only: false,
        }
    }

    pub fn lifecycle(mut self, shape: LifecycleShape) -> Self {
        self.lifecycle = shape;
        self
    }

    pub fn retirable(self) -> Self {
        self.lifecycle(LifecycleShape::Retire)
    }

    pub fn voidable(self) -> Self {
        self.lifecycle(LifecycleShape::Void)
    }

    pub fn scalar(self, name: &str) -> Self {
        self.field(name, FieldKind::Scalar)
    }

    pub fn reference(self, name: &str) -> Self {
        self.field(name, FieldKind::Reference)
    }

    pub fn owner(self, name: &str) -> Self {
        self.field(name, FieldKind::Owner)
    }

    pub fn child(self, name: &str, child_type: impl Into<TypeName>) -> Self {
        self.field(name, FieldKind::Child(child_type.into()))
    }

    pub fn collection(self, name: &str, child_type: impl Into<TypeName>) -> Self {
        self.field(name, FieldKind::Collection(child_type.into()))
    }

    /// Declares or re-declares a field. Redeclaring keeps the excluded flag.
    pub fn field(mut self, name: &str, kind: FieldKind) -> Self {
        if let Some(existing) = self.fields.iter_mut().find(|f| f.name == name) {
            existing.kind = kind;
        } else {
            self.fields.push(FieldDescriptor {
                name: name.to_owned(),
                kind,
                excluded: false,
            });
        }
        self
    }

    /// Excludes a field from merges. Undeclared names (including
    /// [`LIFECYCLE_FIELD`]) are remembered as well.
    pub fn exclude(mut self, name: &str) -> Self {
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(f) => f.excluded = true,
            None => {
                self.extra_exclusions.insert(name.to_owned());
            }
        }
        self
    }

    /// Records of this type without an identity key take it from `field`.
    pub fn keyed_by(mut self, field: &str) -> Self {
        self.keyed_by = Some(field.to_owned());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn name(&self) -> &TypeName {
        &self.name
    }

    pub fn lifecycle_shape(&self) -> LifecycleShape {
        self.lifecycle
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn key_field(&self) -> Option<&str> {
        self.keyed_by.as_deref()
    }

    /// Kind of `field`; undeclared fields are scalars.
    pub fn kind_of(&self, field: &str) -> &FieldKind {
        self.fields
            .iter()
            .find(|f| f.name == field)
            .map(|f| &f.kind)
            .unwrap_or(&FieldKind::Scalar)
    }

    /// Names of the fields that point back at an owning record.
    pub fn owner_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.kind == FieldKind::Owner)
            .map(|f| f.name.as_str())
    }

    /// The type's own excluded-field set.
    pub fn excluded_fields(&self) -> FieldSet {
        self.fields
            .iter()
            .filter(|f| f.excluded)
            .map(|f| f.name.clone())
            .chain(self.extra_exclusions.iter().cloned())
            .collect()
    }

    /// Fills in a missing identity key from the declared key field.
    pub fn derive_identity_key(&self, record: &mut Record) {
        if record.identity_key.as_ref().is_some_and(|k| !k.is_empty()) {
            return;
        }
        if let Some(value) = self.keyed_by.as_deref().and_then(|f| record.text(f)) {
            if !value.trim().is_empty() {
                record.identity_key = Some(value.to_owned().into());
            }
        }
    }
}

/// All known type descriptors, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    types: HashMap<TypeName, TypeDescriptor>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `descriptor`, replacing any previous one with the same name.
    pub fn insert(&mut self, descriptor: TypeDescriptor) {
        self.types.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &TypeName) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    /// Like [`get`](Self::get) but fails with `NoCapabilityForType`.
    pub fn require(&self, name: &TypeName) -> Result<&TypeDescriptor, CoreError> {
        self.get(name).ok_or_else(|| CoreError::NoCapabilityForType {
            type_name: name.clone(),
        })
    }

    pub fn contains(&self, name: &TypeName) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Child types named by collection or child fields that have no descriptor.
    pub fn missing_child_types(&self) -> Vec<TypeName> {
        let mut missing: Vec<TypeName> = self
            .types
            .values()
            .flat_map(|d| d.fields.iter())
            .filter_map(|f| match &f.kind {
                FieldKind::Child(t) | FieldKind::Collection(t) => Some(t),
                _ => None,
            })
            .filter(|t| !self.types.contains_key(*t))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> TypeDescriptor {
        TypeDescriptor::new("program")
            .retirable()
            .scalar("name")
            .collection("workflows", "workflow")
            .exclude("descriptions")
            .exclude("name")
    }

    #[test]
    fn excluded_fields_merge_declared_and_undeclared_names() {
        let excluded = program().excluded_fields();
        assert!(excluded.contains("name"));
        assert!(excluded.contains("descriptions"));
        assert!(!excluded.contains("workflows"));
    }

    #[test]
    fn undeclared_fields_are_scalars() {
        assert_eq!(program().kind_of("whatever"), &FieldKind::Scalar);
        assert_eq!(
            program().kind_of("workflows"),
            &FieldKind::Collection(TypeName::from("workflow"))
        );
    }

    #[test]
    fn redeclaring_a_field_keeps_exclusion() {
        let d = TypeDescriptor::new("t").scalar("a").exclude("a").reference("a");
        assert_eq!(d.kind_of("a"), &FieldKind::Reference);
        assert!(d.excluded_fields().contains("a"));
    }

    #[test]
    fn identity_key_derived_from_key_field() {
        let d = TypeDescriptor::new("role").keyed_by("role");
        let mut r = Record::new("role").with("role", "Clerk");
        d.derive_identity_key(&mut r);
        assert_eq!(r.identity_key.unwrap().as_str(), "Clerk");
    }

    #[test]
    fn explicit_identity_key_is_kept() {
        let d = TypeDescriptor::new("role").keyed_by("role");
        let mut r = Record::keyed("role", "uuid-1").with("role", "Clerk");
        d.derive_identity_key(&mut r);
        assert_eq!(r.identity_key.unwrap().as_str(), "uuid-1");
    }

    #[test]
    fn catalog_reports_missing_child_types() {
        let mut catalog = TypeCatalog::new();
        catalog.insert(program());
        assert_eq!(catalog.missing_child_types(), vec![TypeName::from("workflow")]);
        catalog.insert(TypeDescriptor::new("workflow"));
        assert!(catalog.missing_child_types().is_empty());
    }

    #[test]
    fn require_unknown_type_fails() {
        let err = TypeCatalog::new().require(&TypeName::from("ghost")).unwrap_err();
        assert!(matches!(err, CoreError::NoCapabilityForType { .. }));
    }
}
