//! Moving whole packages between the local store and the registry.

use tracing::info;

use crate::chain::TxHash;
use crate::consts::MANIFEST_VERSION;
use crate::definition::PackageRef;
use crate::deployment::{DeploymentError, DeploymentManifest, DeploymentStore};

use super::{ContentStore, RegistryClient, RegistryError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPackage {
  pub url: String,
  pub transactions: Vec<TxHash>,
}

/// Upload a stored package and register it under its version and `tags`.
pub async fn publish_package(
  store: &DeploymentStore,
  content: &dyn ContentStore,
  registry: &RegistryClient,
  package: &PackageRef,
  tags: &[String],
  variant: &str,
) -> Result<PublishedPackage, RegistryError> {
  let manifest = store
    .load_manifest(package)?
    .ok_or_else(|| DeploymentError::PackageNotFound(package.clone()))?;

  let data = serde_json::to_vec(&manifest).map_err(DeploymentError::Serialize)?;
  let url = content.push(data).await?;
  info!(package = %package, url = %url, "package uploaded");

  let references: Vec<String> = std::iter::once(package.version.as_str())
    .chain(tags.iter().map(String::as_str))
    .map(|version| format!("{}:{version}", package.name))
    .collect();
  let transactions = registry.publish(&references, &url, variant).await?;

  Ok(PublishedPackage { url, transactions })
}

/// Resolve a package through the registry and store its manifest locally.
///
/// `package.version` may be a tag; the manifest is stored under the version
/// it declares.
pub async fn fetch_package(
  store: &DeploymentStore,
  content: &dyn ContentStore,
  registry: &RegistryClient,
  package: &PackageRef,
  variant: &str,
) -> Result<DeploymentManifest, RegistryError> {
  let url = registry
    .resolve(&package.name, &package.version, variant)
    .await?
    .ok_or_else(|| RegistryError::NotFound(package.clone()))?;

  let data = content.fetch(&url).await?;
  let manifest: DeploymentManifest =
    serde_json::from_slice(&data).map_err(|source| RegistryError::InvalidManifest { url: url.clone(), source })?;

  if manifest.version != MANIFEST_VERSION {
    return Err(DeploymentError::UnsupportedVersion(manifest.version).into());
  }
  if manifest.name != package.name {
    return Err(RegistryError::ManifestMismatch {
      url,
      expected: package.clone(),
      found: manifest.package(),
    });
  }
  manifest.package().validate()?;

  store.save_manifest(&manifest)?;
  info!(package = %manifest.package(), url = %url, "package fetched");
  Ok(manifest)
}
