//! Error types for metadeploy-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{IdentityKey, TypeName};

/// All errors that can arise from the record model, the merge engine, the
/// type registry and configuration loading.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No descriptor or storage capability is registered for the type.
    #[error("no capability registered for type '{type_name}'")]
    NoCapabilityForType { type_name: TypeName },

    /// A read-only type was asked to change.
    #[error("type '{type_name}' is read-only; cannot {operation}")]
    UnsupportedOperation {
        type_name: TypeName,
        operation: &'static str,
    },

    /// A collection merge dropped a child whose type cannot be soft-deleted.
    #[error(
        "cannot drop {type_name} '{}' from a collection: type has no retire or void lifecycle",
        key_label(.identity_key)
    )]
    InvalidLifecycleShape {
        type_name: TypeName,
        identity_key: Option<IdentityKey>,
    },

    /// A merge was asked to overwrite a record with one of another type.
    #[error("cannot overwrite a '{existing}' record with a '{incoming}' record")]
    TypeMismatch {
        incoming: TypeName,
        existing: TypeName,
    },

    /// The storage collaborator for a type failed.
    #[error("store error for type '{type_name}': {message}")]
    Store { type_name: TypeName, message: String },

    /// Underlying I/O failure, with annotated path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (config save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}")]
    ConfigNotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

fn key_label(key: &Option<IdentityKey>) -> &str {
    key.as_ref().map(|k| k.as_str()).unwrap_or("<unkeyed>")
}

/// Convenience constructor for [`CoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
