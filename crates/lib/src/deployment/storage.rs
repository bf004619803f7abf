//! Deployment manifest storage.
//!
//! # Storage Layout
//!
//! ```text
//! {packages_dir}/
//! └── <name>/
//!     └── <version>/
//!         ├── .lock         # held while writing
//!         └── deploy.json   # DeploymentManifest
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::consts::{DEPLOY_FILENAME, MANIFEST_VERSION};
use crate::definition::PackageRef;
use crate::platform::paths::packages_dir;

use super::lock::PackageLock;
use super::types::{DeploymentError, DeploymentManifest, DeploymentRecord};

/// Reads and writes deployment manifests under a packages directory.
#[derive(Debug, Clone)]
pub struct DeploymentStore {
  root: PathBuf,
}

impl DeploymentStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Store at `$CANNON_DIRECTORY` or the data directory.
  pub fn default_store() -> Self {
    Self::new(packages_dir())
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// `<root>/<name>/<version>`. Fails for references that would leave the
  /// root.
  fn package_dir(&self, package: &PackageRef) -> Result<PathBuf, DeploymentError> {
    package.validate()?;
    Ok(self.root.join(&package.name).join(&package.version))
  }

  pub fn manifest_path(&self, package: &PackageRef) -> Result<PathBuf, DeploymentError> {
    Ok(self.package_dir(package)?.join(DEPLOY_FILENAME))
  }

  /// Load a package manifest, `None` if the package was never stored.
  pub fn load_manifest(&self, package: &PackageRef) -> Result<Option<DeploymentManifest>, DeploymentError> {
    let path = self.manifest_path(package)?;

    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => return Err(DeploymentError::Read { path, source }),
    };

    let manifest: DeploymentManifest =
      serde_json::from_str(&content).map_err(|source| DeploymentError::Parse { path, source })?;

    if manifest.version != MANIFEST_VERSION {
      return Err(DeploymentError::UnsupportedVersion(manifest.version));
    }

    Ok(Some(manifest))
  }

  /// Replace a whole package manifest.
  pub fn save_manifest(&self, manifest: &DeploymentManifest) -> Result<(), DeploymentError> {
    if manifest.version != MANIFEST_VERSION {
      return Err(DeploymentError::UnsupportedVersion(manifest.version));
    }

    let package = manifest.package();
    let _lock = PackageLock::acquire(&self.package_dir(&package)?)?;
    self.write_manifest(manifest)
  }

  /// Load the record for one (package, chain id, preset).
  pub fn load(&self, package: &PackageRef, chain_id: u64, preset: &str) -> Result<DeploymentRecord, DeploymentError> {
    self
      .load_manifest(package)?
      .and_then(|manifest| manifest.record(chain_id, preset))
      .ok_or_else(|| DeploymentError::NotFound {
        package: package.clone(),
        chain_id,
        preset: preset.to_string(),
      })
  }

  /// Like `load`, but `None` when there is no such record.
  pub fn find(&self, package: &PackageRef, chain_id: u64, preset: &str) -> Result<Option<DeploymentRecord>, DeploymentError> {
    match self.load(package, chain_id, preset) {
      Ok(record) => Ok(Some(record)),
      Err(DeploymentError::NotFound { .. }) => Ok(None),
      Err(e) => Err(e),
    }
  }

  /// Save a record under the package lock.
  ///
  /// The manifest is re-read after taking the lock so concurrent saves to
  /// other chains or presets of the same package are not lost.
  pub fn save(&self, record: &DeploymentRecord) -> Result<(), DeploymentError> {
    let _lock = PackageLock::acquire(&self.package_dir(&record.package)?)?;

    let mut manifest = self
      .load_manifest(&record.package)?
      .unwrap_or_else(|| DeploymentManifest::new(&record.package, record.definition.clone()));
    manifest.upsert(record);

    self.write_manifest(&manifest)?;
    info!(
      package = %record.package,
      chain_id = record.chain_id,
      preset = %record.preset,
      "deployment saved"
    );
    Ok(())
  }

  /// `(chain id, preset)` pairs stored for a package.
  pub fn list(&self, package: &PackageRef) -> Result<Vec<(u64, String)>, DeploymentError> {
    let Some(manifest) = self.load_manifest(package)? else {
      return Ok(Vec::new());
    };

    let mut entries = Vec::new();
    for (chain, presets) in &manifest.deploys {
      let Ok(chain_id) = chain.parse::<u64>() else {
        warn!(package = %package, chain = %chain, "ignoring invalid chain id in manifest");
        continue;
      };
      entries.extend(presets.keys().map(|preset| (chain_id, preset.clone())));
    }
    entries.sort();
    Ok(entries)
  }

  /// Every package with a manifest in this store.
  pub fn list_packages(&self) -> Result<Vec<PackageRef>, DeploymentError> {
    let mut packages = Vec::new();
    for name_dir in read_dirs(&self.root)? {
      for version_dir in read_dirs(&name_dir)? {
        if !version_dir.join(DEPLOY_FILENAME).is_file() {
          continue;
        }
        if let (Some(name), Some(version)) = (file_name(&name_dir), file_name(&version_dir)) {
          packages.push(PackageRef::new(name, version));
        }
      }
    }
    packages.sort();
    Ok(packages)
  }

  /// Write to a temporary file in the package directory, then rename over
  /// the manifest. Callers hold the package lock.
  fn write_manifest(&self, manifest: &DeploymentManifest) -> Result<(), DeploymentError> {
    let package = manifest.package();
    let dir = self.package_dir(&package)?;
    let path = dir.join(DEPLOY_FILENAME);

    let write_err = |source| DeploymentError::Write {
      path: path.clone(),
      source,
    };

    fs::create_dir_all(&dir).map_err(write_err)?;
    let content = serde_json::to_string_pretty(manifest).map_err(DeploymentError::Serialize)?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    temp.write_all(content.as_bytes()).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;
    temp.persist(&path).map_err(|e| write_err(e.error))?;

    debug!(path = %path.display(), "manifest written");
    Ok(())
  }
}

fn read_dirs(path: &Path) -> Result<Vec<PathBuf>, DeploymentError> {
  let entries = match fs::read_dir(path) {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(source) => {
      return Err(DeploymentError::Read {
        path: path.to_path_buf(),
        source,
      });
    }
  };

  let mut dirs: Vec<PathBuf> = entries
    .filter_map(Result::ok)
    .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
    .map(|entry| entry.path())
    .collect();
  dirs.sort();
  Ok(dirs)
}

fn file_name(path: &Path) -> Option<&str> {
  path.file_name().and_then(|n| n.to_str())
}
