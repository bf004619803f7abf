//! On-chain package registry.
//!
//! The registry contract maps `(name, version, variant)` to the URL of a
//! package manifest. Variants are `<chainId>-<preset>`.

pub mod bytes32;
pub mod content;
pub mod package;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::chain::{
  Address, CallRequest, ChainError, ChainProvider, Signer, TransactionRequest, TxHash, TxPayload, send_and_wait,
};
use crate::consts::IPFS_PSEUDO_PACKAGE;
use crate::definition::{DefinitionError, PackageRef};
use crate::deployment::DeploymentError;

pub use content::{ContentError, ContentStore, IpfsClient};
pub use package::{PublishedPackage, fetch_package, publish_package};

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("no signer configured for publishing")]
  NoSigner,

  #[error("signer {address} has no funds to pay for publishing")]
  InsufficientFunds { address: Address },

  #[error(transparent)]
  InvalidPackageRef(#[from] DefinitionError),

  #[error("'{0}' does not fit in bytes32 (at most 31 bytes)")]
  Bytes32TooLong(String),

  #[error("registry returned a non-string url: {0}")]
  InvalidResponse(Value),

  #[error("package {0} is not registered")]
  NotFound(PackageRef),

  #[error("manifest at {url} is invalid: {source}")]
  InvalidManifest {
    url: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("manifest at {url} describes {found}, expected {expected}")]
  ManifestMismatch {
    url: String,
    expected: PackageRef,
    found: PackageRef,
  },

  #[error(transparent)]
  Chain(#[from] ChainError),

  #[error(transparent)]
  Content(#[from] ContentError),

  #[error(transparent)]
  Deployment(#[from] DeploymentError),
}

/// Registry variant for a chain and preset.
pub fn variant(chain_id: u64, preset: &str) -> String {
  format!("{chain_id}-{preset}")
}

fn registry_abi() -> Value {
  json!([
    {
      "type": "function",
      "name": "publish",
      "stateMutability": "nonpayable",
      "inputs": [
        {"name": "_packageName", "type": "bytes32"},
        {"name": "_packageVersionNames", "type": "bytes32[]"},
        {"name": "_packageVariant", "type": "bytes32"},
        {"name": "_packageDeployUrl", "type": "string"}
      ],
      "outputs": []
    },
    {
      "type": "function",
      "name": "getPackageUrl",
      "stateMutability": "view",
      "inputs": [
        {"name": "_packageName", "type": "bytes32"},
        {"name": "_packageVersionName", "type": "bytes32"},
        {"name": "_packageVariant", "type": "bytes32"}
      ],
      "outputs": [{"name": "", "type": "string"}]
    }
  ])
}

/// Client for the registry contract at a fixed address.
pub struct RegistryClient {
  provider: Arc<dyn ChainProvider>,
  address: Address,
  signer: Option<Arc<dyn Signer>>,
  receipt_timeout: Option<Duration>,
}

impl RegistryClient {
  pub fn new(provider: Arc<dyn ChainProvider>, address: Address) -> Self {
    Self {
      provider,
      address,
      signer: None,
      receipt_timeout: None,
    }
  }

  /// Publish with this signer instead of the provider's default.
  pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
    self.signer = Some(signer);
    self
  }

  pub fn with_receipt_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.receipt_timeout = timeout;
    self
  }

  pub fn address(&self) -> &Address {
    &self.address
  }

  /// Register `url` for every `name:version` in `packages`.
  ///
  /// One transaction is sent per package name, in order of first
  /// appearance, and each is mined before the next is sent.
  pub async fn publish(&self, packages: &[String], url: &str, variant: &str) -> Result<Vec<TxHash>, RegistryError> {
    let signer = self
      .signer
      .clone()
      .or_else(|| self.provider.default_signer())
      .ok_or(RegistryError::NoSigner)?;

    if signer.balance().await? == 0 {
      return Err(RegistryError::InsufficientFunds {
        address: signer.address().clone(),
      });
    }

    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for reference in packages {
      let package = PackageRef::parse(reference)?;
      match groups.iter_mut().find(|(name, _)| *name == package.name) {
        Some((_, versions)) => versions.push(package.version),
        None => groups.push((package.name, vec![package.version])),
      }
    }

    // Encode everything up front so a bad name or version sends nothing.
    let variant_b32 = bytes32::encode(variant)?;
    let mut calls = Vec::with_capacity(groups.len());
    for (name, versions) in groups {
      let encoded_name = bytes32::encode(&name)?;
      let encoded_versions = versions
        .iter()
        .map(|v| bytes32::encode(v).map(Value::String))
        .collect::<Result<Vec<_>, _>>()?;
      calls.push((name, versions, encoded_name, encoded_versions));
    }

    let mut hashes = Vec::with_capacity(calls.len());
    for (name, versions, encoded_name, encoded_versions) in calls {
      let tx = TransactionRequest {
        payload: TxPayload::Call {
          to: self.address.clone(),
          abi: registry_abi(),
          function: "publish".to_string(),
          args: vec![
            Value::String(encoded_name),
            Value::Array(encoded_versions),
            Value::String(variant_b32.clone()),
            Value::String(url.to_string()),
          ],
        },
        value: None,
      };

      info!(name = %name, versions = ?versions, variant = %variant, url = %url, "publishing package");
      let receipt = send_and_wait(self.provider.as_ref(), signer.as_ref(), tx, self.receipt_timeout).await?;
      hashes.push(receipt.transaction_hash);
    }

    Ok(hashes)
  }

  /// The URL registered for a package, `None` when nothing is registered.
  ///
  /// The `@ipfs` pseudo-package resolves to `ipfs://<version>` without
  /// touching the chain.
  pub async fn resolve(&self, name: &str, version: &str, variant: &str) -> Result<Option<String>, RegistryError> {
    if name == IPFS_PSEUDO_PACKAGE {
      return Ok(Some(format!("ipfs://{version}")));
    }

    let request = CallRequest {
      to: self.address.clone(),
      abi: registry_abi(),
      function: "getPackageUrl".to_string(),
      args: vec![
        Value::String(bytes32::encode(name)?),
        Value::String(bytes32::encode(version)?),
        Value::String(bytes32::encode(variant)?),
      ],
    };

    let url = match self.provider.call(request).await? {
      Value::String(url) => url,
      other => return Err(RegistryError::InvalidResponse(other)),
    };
    debug!(name = %name, version = %version, variant = %variant, url = %url, "resolved package");

    Ok(if url.is_empty() { None } else { Some(url) })
  }
}
