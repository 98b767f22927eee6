//! Versioned archive packages.
//!
//! Package filenames carry their version: `<name>-<version>.zip`. Each
//! package belongs to a group; a group is re-imported only when the requested
//! version is newer than the one recorded in the ledger.

use std::fs::File;
use std::io::Read;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use metadeploy_core::types::Record;

use crate::deployer::Deployer;
use crate::error::{io_err, DeployError};
use crate::ledger::{self, ImportedPackage};

static FILENAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w/-]+-(\d+)\.zip$").expect("valid filename pattern"));

/// How an importer treats records that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Packaged records overwrite local ones.
    #[default]
    Mirror,
    /// Local records win; only missing records are added.
    Merge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    /// Archive name relative to the resource directory.
    pub filename: String,
    /// Group identifier shared by every version of the package.
    pub group: String,
    pub import_mode: ImportMode,
}

impl PackageDescriptor {
    pub fn new(filename: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            group: group.into(),
            import_mode: ImportMode::default(),
        }
    }

    pub fn import_mode(mut self, mode: ImportMode) -> Self {
        self.import_mode = mode;
        self
    }

    /// Version encoded in the filename.
    pub fn version(&self) -> Result<u32, DeployError> {
        parse_version(&self.filename)
    }
}

/// Extracts the version from `<name>-<version>.zip`.
pub fn parse_version(filename: &str) -> Result<u32, DeployError> {
    let format_err = |reason: String| DeployError::PackageFormat {
        filename: filename.to_owned(),
        reason,
    };
    let captures = FILENAME_PATTERN.captures(filename).ok_or_else(|| {
        format_err("filename must match PackageNameWithNoSpaces-X.zip".to_owned())
    })?;
    captures[1]
        .parse()
        .map_err(|e| format_err(format!("bad version: {e}")))
}

/// Applies an opened package archive.
pub trait PackageImporter {
    fn import(
        &mut self,
        deployer: &mut Deployer,
        package: &PackageDescriptor,
        archive: &mut ZipArchive<File>,
    ) -> Result<(), DeployError>;
}

impl<F> PackageImporter for F
where
    F: FnMut(&mut Deployer, &PackageDescriptor, &mut ZipArchive<File>) -> Result<(), DeployError>,
{
    fn import(
        &mut self,
        deployer: &mut Deployer,
        package: &PackageDescriptor,
        archive: &mut ZipArchive<File>,
    ) -> Result<(), DeployError> {
        self(deployer, package, archive)
    }
}

/// Imports every `.json` entry of an archive as a JSON array of records.
///
/// In `Mirror` mode each record is installed; in `Merge` mode only records
/// with no stored counterpart are.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordArchiveImporter;

impl PackageImporter for RecordArchiveImporter {
    fn import(
        &mut self,
        deployer: &mut Deployer,
        package: &PackageDescriptor,
        archive: &mut ZipArchive<File>,
    ) -> Result<(), DeployError> {
        let mut names: Vec<String> = archive
            .file_names()
            .filter(|n| n.ends_with(".json"))
            .map(str::to_owned)
            .collect();
        names.sort();

        for name in names {
            let mut contents = String::new();
            archive
                .by_name(&name)
                .map_err(|e| DeployError::PackageFormat {
                    filename: package.filename.clone(),
                    reason: format!("{name}: {e}"),
                })?
                .read_to_string(&mut contents)
                .map_err(|e| DeployError::PackageFormat {
                    filename: package.filename.clone(),
                    reason: format!("{name}: {e}"),
                })?;
            let records: Vec<Record> = serde_json::from_str(&contents)?;
            tracing::debug!("{}: {} record(s) in {name}", package.filename, records.len());

            for record in records {
                if package.import_mode == ImportMode::Merge {
                    let stored = match &record.identity_key {
                        Some(key) => deployer.possible(&record.type_name.0, key.as_str())?,
                        None => None,
                    };
                    if stored.is_some() {
                        continue;
                    }
                }
                deployer.install(record)?;
            }
        }
        Ok(())
    }
}

impl Deployer {
    /// Imports `package` unless its group is already at this version or newer.
    ///
    /// Returns `true` if the archive was imported, `false` if skipped.
    pub fn install_package(
        &mut self,
        package: &PackageDescriptor,
        importer: &mut dyn PackageImporter,
    ) -> Result<bool, DeployError> {
        if self.config().skip_package_refresh {
            tracing::warn!("skipping package {}: package refresh disabled", package.filename);
            return Ok(false);
        }

        let version = package.version()?;
        let state_dir = self.config().state_dir.clone();
        let mut ledger = ledger::load_at(&state_dir)?;
        if let Some(installed) = ledger.version_of(&package.group) {
            if installed >= version {
                tracing::info!(
                    "package {} is already installed with version {installed}",
                    package.filename
                );
                return Ok(false);
            }
        }

        let path = self.config().resource_path(&package.filename);
        if !path.exists() {
            return Err(DeployError::PackageFormat {
                filename: package.filename.clone(),
                reason: format!("cannot load {} for group {}", path.display(), package.group),
            });
        }
        let file = File::open(&path).map_err(|e| io_err(&path, e))?;
        let mut archive = ZipArchive::new(file).map_err(|e| DeployError::PackageFormat {
            filename: package.filename.clone(),
            reason: e.to_string(),
        })?;

        importer
            .import(self, package, &mut archive)
            .map_err(|e| match e {
                e @ (DeployError::PackageImport { .. } | DeployError::PackageFormat { .. }) => e,
                other => DeployError::PackageImport {
                    filename: package.filename.clone(),
                    message: other.to_string(),
                },
            })?;
        self.flush()?;

        ledger.record(
            &package.group,
            ImportedPackage {
                filename: package.filename.clone(),
                version,
                import_mode: package.import_mode,
                imported_at: Utc::now(),
            },
        );
        ledger::save_at(&state_dir, &ledger)?;
        tracing::info!("imported package {} (version {version})", package.filename);
        Ok(true)
    }
}
