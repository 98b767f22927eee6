//! Error types for metadeploy-engine.

use std::path::PathBuf;

use thiserror::Error;

use metadeploy_core::error::CoreError;
use metadeploy_core::types::{IdentityKey, TypeName};

use crate::bundle::BundleKey;

/// All errors that can arise from installing, uninstalling, bundles,
/// synchronization and package import.
#[derive(Debug, Error)]
pub enum DeployError {
    /// An error from the record model, merge engine or registry.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A record reached `install` without an identity key.
    #[error("{type_name} record has no identity key")]
    MissingIdentifier { type_name: TypeName },

    /// A fail-fast lookup found nothing.
    #[error("no {type_name} record with identity key '{identity_key}'")]
    MissingReference {
        type_name: TypeName,
        identity_key: IdentityKey,
    },

    /// A bundle names a prerequisite that was not supplied.
    #[error("bundle {requested_by} requires {missing}, which was not supplied")]
    BrokenDependency {
        missing: BundleKey,
        requested_by: BundleKey,
    },

    /// Bundle prerequisites loop back on themselves.
    #[error("cyclic bundle dependency through {bundle}")]
    CyclicDependency { bundle: BundleKey },

    /// A bundle's own install step failed.
    #[error("failed to install bundle {bundle}: {source}")]
    BundleFailed {
        bundle: BundleKey,
        #[source]
        source: Box<DeployError>,
    },

    /// Package filename or archive is malformed.
    #[error("package {filename}: {reason}")]
    PackageFormat { filename: String, reason: String },

    /// The package importer rejected an archive.
    #[error("failed to import package {filename}: {message}")]
    PackageImport { filename: String, message: String },

    /// A record source failed to produce its next record.
    #[error("record source {source_name} failed: {message}")]
    SourceIteration {
        source_name: String,
        message: String,
    },

    /// A record drawn during synchronization has no sync key.
    #[error("{type_name} record {label} has no sync key")]
    MissingSyncKey { type_name: TypeName, label: String },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (package ledger).
    #[error("package ledger JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`DeployError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DeployError {
    DeployError::Io {
        path: path.into(),
        source,
    }
}
