//! metadeploy core library: record model, type descriptors, storage
//! capabilities, the merge engine and configuration.
//!
//! - [`types`]: records, identity keys, lifecycle state
//! - [`descriptor`]: per-type field tables and the [`TypeCatalog`]
//! - [`store`]: [`RecordStore`] / [`AlternateMatch`] and [`MemoryStore`]
//! - [`registry`]: the type → capability table
//! - [`merge`]: identity-preserving [`Merger::overwrite`]
//! - [`config`]: [`DeployConfig`] load / save
//! - [`error`]: [`CoreError`]

pub mod config;
pub mod descriptor;
pub mod error;
pub mod merge;
pub mod registry;
pub mod store;
pub mod types;

pub use config::DeployConfig;
pub use descriptor::{
    FieldDescriptor, FieldKind, FieldSet, LifecycleShape, TypeCatalog, TypeDescriptor,
    LIFECYCLE_FIELD,
};
pub use error::CoreError;
pub use merge::{soft_delete, Merger};
pub use registry::{Capabilities, TypeRegistry};
pub use store::{AlternateMatch, MatchByField, MemoryStore, RecordStore};
pub use types::{
    IdentityKey, Lifecycle, Record, RecordRef, Retirement, StorageId, TypeName, Value,
};
