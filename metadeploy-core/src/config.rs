//! Deployment configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.metadeploy/
//!   config.yaml
//! ```
//!
//! Every function has an `_at(home)` form used by tests with `TempDir`, and a
//! convenience wrapper that derives home from `dirs::home_dir()`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::merge::DEFAULT_MERGE_RETIRE_REASON;

/// Overrides [`DeployConfig::skip_package_refresh`] when set to `true`/`false`.
pub const SKIP_PACKAGE_REFRESH_ENV: &str = "METADEPLOY_SKIP_PACKAGE_REFRESH";

pub const DEFAULT_SYNC_RETIRE_REASON: &str = "Not found in sync source";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Recorded as the retiring/voiding user on soft-deletes.
    pub actor: Option<String>,
    /// Root for named resources (CSV files, package archives).
    pub resource_dir: PathBuf,
    /// Where the package ledger lives.
    pub state_dir: PathBuf,
    pub skip_package_refresh: bool,
    pub sync_retire_reason: String,
    pub merge_retire_reason: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            actor: None,
            resource_dir: PathBuf::from("."),
            state_dir: PathBuf::from(".metadeploy"),
            skip_package_refresh: false,
            sync_retire_reason: DEFAULT_SYNC_RETIRE_REASON.to_owned(),
            merge_retire_reason: DEFAULT_MERGE_RETIRE_REASON.to_owned(),
        }
    }
}

impl DeployConfig {
    /// Applies a raw [`SKIP_PACKAGE_REFRESH_ENV`] value; anything other than
    /// `true`/`false` (case-insensitive) is ignored.
    pub fn apply_skip_override(&mut self, raw: Option<&str>) {
        match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("true") => self.skip_package_refresh = true,
            Some("false") => self.skip_package_refresh = false,
            Some(other) => {
                tracing::warn!("ignoring {SKIP_PACKAGE_REFRESH_ENV}={other:?}: expected true or false")
            }
            None => {}
        }
    }

    /// Applies overrides from the process environment.
    pub fn with_env_overrides(mut self) -> Self {
        let raw = std::env::var(SKIP_PACKAGE_REFRESH_ENV).ok();
        self.apply_skip_override(raw.as_deref());
        self
    }

    /// Resolves a named resource against `resource_dir`.
    pub fn resource_path(&self, name: &str) -> PathBuf {
        self.resource_dir.join(name)
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// `<home>/.metadeploy/config.yaml` (pure, no I/O).
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".metadeploy").join("config.yaml")
}

/// Loads a config file.
///
/// Returns `ConfigNotFound` if absent, `Parse` (with path) if malformed.
pub fn load_at(path: &Path) -> Result<DeployConfig, CoreError> {
    if !path.exists() {
        return Err(CoreError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|source| CoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads `<home>/.metadeploy/config.yaml`, or defaults if there is none.
/// Environment overrides are applied either way.
pub fn load_or_default_at(home: &Path) -> Result<DeployConfig, CoreError> {
    let config = match load_at(&config_path_at(home)) {
        Ok(config) => config,
        Err(CoreError::ConfigNotFound { .. }) => DeployConfig::default(),
        Err(e) => return Err(e),
    };
    Ok(config.with_env_overrides())
}

/// `load_or_default_at` convenience wrapper.
pub fn load() -> Result<DeployConfig, CoreError> {
    load_or_default_at(&home()?)
}

/// Atomically writes `config` to `<home>/.metadeploy/config.yaml`.
pub fn save_at(home: &Path, config: &DeployConfig) -> Result<(), CoreError> {
    let path = config_path_at(home);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let tmp_path = path.with_file_name("config.yaml.tmp");
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &DeployConfig) -> Result<(), CoreError> {
    save_at(&home()?, config)
}

fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}
