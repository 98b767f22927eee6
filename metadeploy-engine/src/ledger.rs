//! Package ledger: which version of each package group has been imported.
//!
//! Persists a [`PackageLedger`] JSON document at `<state_dir>/packages.json`.
//! Writes use the atomic `.tmp` + rename pattern.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, DeployError};
use crate::package::ImportMode;

/// Last import of one package group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedPackage {
    pub filename: String,
    pub version: u32,
    #[serde(default)]
    pub import_mode: ImportMode,
    pub imported_at: DateTime<Utc>,
}

/// On-disk ledger payload, keyed by group identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageLedger {
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub groups: BTreeMap<String, ImportedPackage>,
}

impl Default for PackageLedger {
    fn default() -> Self {
        Self {
            updated_at: Utc::now(),
            groups: BTreeMap::new(),
        }
    }
}

impl PackageLedger {
    /// Highest imported version for `group`, if any.
    pub fn version_of(&self, group: &str) -> Option<u32> {
        self.groups.get(group).map(|p| p.version)
    }

    pub fn record(&mut self, group: &str, entry: ImportedPackage) {
        self.updated_at = entry.imported_at;
        self.groups.insert(group.to_owned(), entry);
    }
}

/// `<state_dir>/packages.json`
pub fn ledger_path_at(state_dir: &Path) -> PathBuf {
    state_dir.join("packages.json")
}

/// Loads the ledger, or an empty one if the file does not exist yet.
pub fn load_at(state_dir: &Path) -> Result<PackageLedger, DeployError> {
    let path = ledger_path_at(state_dir);
    if !path.exists() {
        return Ok(PackageLedger::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Saves the ledger atomically.
pub fn save_at(state_dir: &Path, ledger: &PackageLedger) -> Result<(), DeployError> {
    std::fs::create_dir_all(state_dir).map_err(|e| io_err(state_dir, e))?;
    let path = ledger_path_at(state_dir);
    let json = serde_json::to_string_pretty(ledger)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}
