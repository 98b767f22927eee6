//! Record model shared by every deploy operation.
//!
//! A [`Record`] is a dynamically shaped domain object: its [`TypeName`]
//! selects a descriptor in the catalog, which decides how each entry in
//! `fields` takes part in a merge. Records are plain owned values; the store
//! behind a type is the single source of truth once a record is persisted.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of a record type, e.g. `"location"` or `"program_workflow"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeName(pub String);

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TypeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TypeName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Producer-assigned, globally unique key (usually a UUID).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityKey(pub String);

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for IdentityKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for IdentityKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Surrogate key handed out by a store on first persist. Never set by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageId(pub u64);

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Audit trail of a soft delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retirement {
    pub reason: String,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by: Option<String>,
}

/// Current lifecycle state of a record.
///
/// Types without a lifecycle shape keep every record `Active`; they can only
/// be purged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", tag = "state")]
pub enum Lifecycle {
    #[default]
    Active,
    Retired(Retirement),
    Voided(Retirement),
}

impl Lifecycle {
    pub fn is_active(&self) -> bool {
        matches!(self, Lifecycle::Active)
    }

    pub fn retirement(&self) -> Option<&Retirement> {
        match self {
            Lifecycle::Active => None,
            Lifecycle::Retired(r) | Lifecycle::Voided(r) => Some(r),
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Active => write!(f, "active"),
            Lifecycle::Retired(_) => write!(f, "retired"),
            Lifecycle::Voided(_) => write!(f, "voided"),
        }
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Handle to another record. Compared by type plus storage id or identity key,
/// never by address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub type_name: TypeName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_key: Option<IdentityKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<StorageId>,
}

impl RecordRef {
    /// Builds a handle pointing at `record` as it is right now.
    pub fn to(record: &Record) -> Self {
        Self {
            type_name: record.type_name.clone(),
            identity_key: record.identity_key.clone(),
            storage_id: record.storage_id,
        }
    }

    /// True if this handle designates `record`.
    ///
    /// Storage ids win when both sides have one; otherwise identity keys decide.
    pub fn refers_to(&self, record: &Record) -> bool {
        self.matches(&Self::to(record))
    }

    /// True if both handles designate the same record.
    pub fn matches(&self, other: &RecordRef) -> bool {
        if self.type_name != other.type_name {
            return false;
        }
        if let (Some(a), Some(b)) = (self.storage_id, other.storage_id) {
            return a == b;
        }
        match (&self.identity_key, &other.identity_key) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Pointer to an independently stored record.
    Ref(RecordRef),
    /// Embedded child owned by this record.
    Record(Box<Record>),
    /// Container of child records owned by this record.
    Records(Vec<Record>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<RecordRef> for Value {
    fn from(r: RecordRef) -> Self {
        Value::Ref(r)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(Box::new(r))
    }
}

impl From<Vec<Record>> for Value {
    fn from(items: Vec<Record>) -> Self {
        Value::Records(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A domain object instance being deployed or reconciled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub type_name: TypeName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_key: Option<IdentityKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<StorageId>,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    /// A transient record with no identity key and no fields.
    pub fn new(type_name: impl Into<TypeName>) -> Self {
        Self {
            type_name: type_name.into(),
            identity_key: None,
            storage_id: None,
            lifecycle: Lifecycle::Active,
            fields: BTreeMap::new(),
        }
    }

    /// A transient record carrying `key`.
    pub fn keyed(type_name: impl Into<TypeName>, key: impl Into<IdentityKey>) -> Self {
        let mut record = Self::new(type_name);
        record.identity_key = Some(key.into());
        record
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.fields.get_mut(field)
    }

    /// Sets `field`; a `Null` value removes it.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        let value = value.into();
        if value.is_null() {
            self.fields.remove(field);
        } else {
            self.fields.insert(field.to_owned(), value);
        }
    }

    pub fn take(&mut self, field: &str) -> Value {
        self.fields.remove(field).unwrap_or_default()
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_text)
    }

    /// Child records of a collection field, if the container exists.
    pub fn children(&self, field: &str) -> Option<&[Record]> {
        match self.get(field) {
            Some(Value::Records(items)) => Some(items),
            _ => None,
        }
    }

    pub fn children_mut(&mut self, field: &str) -> Option<&mut Vec<Record>> {
        match self.get_mut(field) {
            Some(Value::Records(items)) => Some(items),
            _ => None,
        }
    }

    /// Finds a direct child of `field` by identity key.
    pub fn child(&self, field: &str, key: &str) -> Option<&Record> {
        self.children(field)?
            .iter()
            .find(|c| c.identity_key.as_ref().is_some_and(|k| k.as_str() == key))
    }

    pub fn is_persisted(&self) -> bool {
        self.storage_id.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle.is_active()
    }

    /// Human-readable label used in log lines: `type 'key'`.
    pub fn label(&self) -> String {
        match (&self.identity_key, self.text("name")) {
            (_, Some(name)) => format!("{} '{}'", self.type_name, name),
            (Some(key), None) => format!("{} '{}'", self.type_name, key),
            (None, None) => format!("{} <unkeyed>", self.type_name),
        }
    }

    /// SHA-256 hex digest of the record's content.
    ///
    /// Covers field values, child content and whether the record is active.
    /// Storage ids, the root identity key and soft-delete audit details are
    /// not part of the digest, so a transient record and its persisted twin
    /// hash the same. Soft-deleted collection children are left out, and a
    /// collection with no active children hashes like an absent field.
    pub fn content_hash(&self) -> String {
        let mut h = Sha256::new();
        self.feed_content(&mut h);
        hex::encode(h.finalize())
    }

    fn feed_content(&self, h: &mut Sha256) {
        h.update(self.type_name.0.as_bytes());
        h.update([0u8, u8::from(self.is_active())]);
        for (name, value) in &self.fields {
            if let Value::Records(items) = value {
                if !items.iter().any(Record::is_active) {
                    continue;
                }
            }
            h.update(name.as_bytes());
            h.update([0xfe]);
            feed_value(value, h);
        }
        h.update([0xff]);
    }
}

fn feed_value(value: &Value, h: &mut Sha256) {
    match value {
        Value::Null => h.update([0u8]),
        Value::Bool(b) => h.update([1u8, u8::from(*b)]),
        Value::Int(n) => {
            h.update([2u8]);
            h.update(n.to_be_bytes());
        }
        Value::Float(n) => {
            h.update([3u8]);
            h.update(n.to_bits().to_be_bytes());
        }
        Value::Text(s) => {
            h.update([4u8]);
            h.update((s.len() as u64).to_be_bytes());
            h.update(s.as_bytes());
        }
        Value::Ref(r) => {
            h.update([5u8]);
            h.update(r.type_name.0.as_bytes());
            h.update([0u8]);
            if let Some(key) = &r.identity_key {
                h.update(key.0.as_bytes());
            }
        }
        Value::Record(child) => {
            h.update([6u8]);
            feed_child(child, h);
        }
        Value::Records(items) => {
            let active: Vec<&Record> = items.iter().filter(|c| c.is_active()).collect();
            h.update([7u8]);
            h.update((active.len() as u64).to_be_bytes());
            for child in active {
                feed_child(child, h);
            }
        }
    }
}

fn feed_child(child: &Record, h: &mut Sha256) {
    if let Some(key) = &child.identity_key {
        h.update(key.0.as_bytes());
    }
    h.update([0u8]);
    child.feed_content(h);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
