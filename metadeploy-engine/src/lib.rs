//! # metadeploy-engine
//!
//! Declarative deployment on top of `metadeploy-core`.
//!
//! Build a [`Deployer`] from a [`TypeRegistry`](metadeploy_core::TypeRegistry)
//! and a [`DeployConfig`](metadeploy_core::DeployConfig), then:
//! - [`Deployer::install`] / [`Deployer::uninstall`] single records,
//! - [`Deployer::install_bundles`] to run dependency-ordered [`Bundle`]s,
//! - [`Deployer::synchronize`] to reconcile a [`RecordSource`] with the store,
//! - [`Deployer::install_package`] to import versioned archive packages.

pub mod bundle;
pub mod deployer;
pub mod error;
pub mod ledger;
pub mod package;
pub mod source;
pub mod sync;

pub use bundle::{Bundle, BundleKey};
pub use deployer::{Deployer, Installed};
pub use error::DeployError;
pub use package::{ImportMode, PackageDescriptor, PackageImporter, RecordArchiveImporter};
pub use source::{CsvSource, IterSource, RecordSource, StringRecord};
pub use sync::{ByField, ByIdentityKey, SyncPolicy, SyncResult};
