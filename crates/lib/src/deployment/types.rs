use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::consts::MANIFEST_VERSION;
use crate::context::Artifacts;
use crate::definition::{DefinitionError, PackageRef};
use crate::util::hash::Fingerprint;

use super::lock::LockError;

/// Everything stored for one package version, across chains and presets.
///
/// Serialized as `<packages>/<name>/<version>/deploy.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentManifest {
  pub version: u32,
  pub name: String,
  pub package_version: String,
  /// Definition shared by every leaf without its own override.
  pub definition: Value,
  /// chain id -> preset -> deployment
  #[serde(default)]
  pub deploys: BTreeMap<String, BTreeMap<String, DeploymentInfo>>,
}

impl DeploymentManifest {
  pub fn new(package: &PackageRef, definition: Value) -> Self {
    Self {
      version: MANIFEST_VERSION,
      name: package.name.clone(),
      package_version: package.version.clone(),
      definition,
      deploys: BTreeMap::new(),
    }
  }

  /// The package this manifest declares. Not validated; the store rejects
  /// names and versions that are unsafe as directories.
  pub fn package(&self) -> PackageRef {
    PackageRef::new(&self.name, &self.package_version)
  }

  pub fn leaf(&self, chain_id: u64, preset: &str) -> Option<&DeploymentInfo> {
    self.deploys.get(&chain_id.to_string())?.get(preset)
  }

  /// Flatten one leaf into a record, applying the top-level definition when
  /// the leaf has no override.
  pub fn record(&self, chain_id: u64, preset: &str) -> Option<DeploymentRecord> {
    let leaf = self.leaf(chain_id, preset)?;
    Some(DeploymentRecord {
      package: self.package(),
      chain_id,
      preset: preset.to_string(),
      definition: leaf.definition.clone().unwrap_or_else(|| self.definition.clone()),
      options: leaf.options.clone(),
      step_states: leaf.step_states.clone(),
      artifacts: leaf.artifacts.clone(),
      timestamp: leaf.timestamp,
    })
  }

  /// Store a record, making its definition the top-level one.
  ///
  /// Leaves that used the previous top-level definition keep it as an
  /// explicit override; overrides equal to the new top level are dropped.
  pub fn upsert(&mut self, record: &DeploymentRecord) {
    if self.definition != record.definition {
      let previous = std::mem::replace(&mut self.definition, record.definition.clone());
      for leaf in self.deploys.values_mut().flat_map(|presets| presets.values_mut()) {
        leaf.definition = match leaf.definition.take() {
          None => Some(previous.clone()),
          Some(own) if own == self.definition => None,
          own => own,
        };
      }
    }

    self.deploys.entry(record.chain_id.to_string()).or_default().insert(
      record.preset.clone(),
      DeploymentInfo {
        definition: None,
        options: record.options.clone(),
        step_states: record.step_states.clone(),
        artifacts: record.artifacts.clone(),
        timestamp: record.timestamp,
      },
    );
  }
}

/// One (chain id, preset) leaf of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
  /// Definition override; `None` means the manifest's top-level definition.
  #[serde(default)]
  pub definition: Option<Value>,
  #[serde(default)]
  pub options: BTreeMap<String, String>,
  #[serde(default)]
  pub step_states: BTreeMap<String, Fingerprint>,
  #[serde(default)]
  pub artifacts: BTreeMap<String, Artifacts>,
  #[serde(default)]
  pub timestamp: u64,
}

/// The outcome of a successful build for one (package, chain id, preset).
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentRecord {
  pub package: PackageRef,
  pub chain_id: u64,
  pub preset: String,
  /// JSON snapshot of the definition that was built.
  pub definition: Value,
  pub options: BTreeMap<String, String>,
  /// step id -> fingerprint
  pub step_states: BTreeMap<String, Fingerprint>,
  /// step id -> artifacts produced by that step
  pub artifacts: BTreeMap<String, Artifacts>,
  /// Seconds since the unix epoch.
  pub timestamp: u64,
}

impl DeploymentRecord {
  /// Artifacts of all steps merged, in step id order.
  pub fn merged_artifacts(&self) -> Artifacts {
    Artifacts::merged(self.artifacts.values())
  }
}

#[derive(Debug, Error)]
pub enum DeploymentError {
  #[error("no deployment of {package} for chain {chain_id} preset '{preset}'")]
  NotFound {
    package: PackageRef,
    chain_id: u64,
    preset: String,
  },

  #[error("package {0} is not stored locally")]
  PackageNotFound(PackageRef),

  #[error("unsupported deployment manifest version {0} (expected {MANIFEST_VERSION})")]
  UnsupportedVersion(u32),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize deployment manifest: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  InvalidPackage(#[from] DefinitionError),

  #[error("'{0}' cannot be used as a file name")]
  InvalidFileName(String),
}
