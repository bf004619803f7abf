//! Compiled contract artifacts.
//!
//! Compilation happens elsewhere; the builder only needs to look up the ABI
//! and bytecode of a contract by name.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use walkdir::WalkDir;

/// ABI and bytecode of one compiled contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractArtifact {
  pub contract_name: String,
  pub source_name: String,
  pub abi: Value,
  pub bytecode: String,
}

#[derive(Debug, Error)]
pub enum ArtifactError {
  #[error("artifact not found: {0}")]
  NotFound(String),

  #[error("failed to read artifact {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse artifact {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// Looks up compiled artifacts by contract name.
#[async_trait]
pub trait ArtifactProvider: Send + Sync {
  async fn get_artifact(&self, name: &str) -> Result<ContractArtifact, ArtifactError>;
}

/// Reads Hardhat-style `<Name>.json` artifact files under a directory tree.
///
/// Debug files (`<Name>.dbg.json`) are ignored because only exact file names
/// match.
#[derive(Debug, Clone)]
pub struct FsArtifactProvider {
  root: PathBuf,
}

impl FsArtifactProvider {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn find(&self, name: &str) -> Option<PathBuf> {
    let file_name = format!("{name}.json");
    WalkDir::new(&self.root)
      .sort_by_file_name()
      .into_iter()
      .filter_map(Result::ok)
      .find(|entry| entry.file_type().is_file() && entry.file_name().to_str() == Some(file_name.as_str()))
      .map(|entry| entry.into_path())
  }
}

#[async_trait]
impl ArtifactProvider for FsArtifactProvider {
  async fn get_artifact(&self, name: &str) -> Result<ContractArtifact, ArtifactError> {
    let path = self.find(name).ok_or_else(|| ArtifactError::NotFound(name.to_string()))?;

    let content = tokio::fs::read_to_string(&path)
      .await
      .map_err(|source| ArtifactError::Read {
        path: path.clone(),
        source,
      })?;

    serde_json::from_str(&content).map_err(|source| ArtifactError::Parse { path, source })
  }
}
