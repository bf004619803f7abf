//! Per-contract deployment files for frontends and scripts.
//!
//! ```text
//! {dir}/
//! ├── Token.json        # { "address": ..., "abi": [...] }
//! └── <import>/
//!     └── Pool.json
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::{debug, info};

use crate::context::Artifacts;

use super::types::DeploymentError;

/// Write `<Contract>.json` with the address and ABI of every contract in
/// `artifacts`, creating `dir` as needed. Imported packages are written to a
/// subdirectory named after the import.
///
/// Returns the written files in order.
pub fn write_deployments(artifacts: &Artifacts, dir: &Path) -> Result<Vec<PathBuf>, DeploymentError> {
  let mut written = Vec::new();
  write_into(artifacts, dir, &mut written)?;
  info!(dir = %dir.display(), files = written.len(), "deployments written");
  Ok(written)
}

fn write_into(artifacts: &Artifacts, dir: &Path, written: &mut Vec<PathBuf>) -> Result<(), DeploymentError> {
  fs::create_dir_all(dir).map_err(|source| DeploymentError::Write {
    path: dir.to_path_buf(),
    source,
  })?;

  for (name, contract) in &artifacts.contracts {
    let path = dir.join(format!("{}.json", file_stem(name)?));
    let content = serde_json::to_string_pretty(&json!({
      "address": contract.address,
      "abi": contract.abi,
    }))
    .map_err(DeploymentError::Serialize)?;
    write_atomic(dir, &path, content.as_bytes())?;
    written.push(path);
  }

  for (name, import) in &artifacts.imports {
    write_into(import, &dir.join(file_stem(name)?), written)?;
  }
  Ok(())
}

/// Contract and import names become file names as-is.
fn file_stem(name: &str) -> Result<&str, DeploymentError> {
  if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
    return Err(DeploymentError::InvalidFileName(name.to_string()));
  }
  Ok(name)
}

fn write_atomic(dir: &Path, path: &Path, content: &[u8]) -> Result<(), DeploymentError> {
  let write_err = |source| DeploymentError::Write {
    path: path.to_path_buf(),
    source,
  };

  let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
  temp.write_all(content).map_err(write_err)?;
  temp.persist(path).map_err(|e| write_err(e.error))?;

  debug!(path = %path.display(), "deployment file written");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::chain::Address;
  use crate::context::ContractInfo;
  use serde_json::Value;
  use tempfile::TempDir;

  fn contract(address: &str) -> ContractInfo {
    ContractInfo {
      address: Address(address.to_string()),
      abi: json!([{"type": "function", "name": "mint"}]),
      constructor_args: vec![json!("1")],
      source_name: "contracts/Token.sol".to_string(),
      contract_name: "Token".to_string(),
      deploy_txn_hash: None,
    }
  }

  fn read(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
  }

  #[test]
  fn writes_address_and_abi_per_contract() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("deployments");
    let mut artifacts = Artifacts::default();
    artifacts.contracts.insert("Token".to_string(), contract("0x00000000000000000000000000000000000000aa"));
    artifacts.contracts.insert("Vault".to_string(), contract("0x00000000000000000000000000000000000000bb"));

    let written = write_deployments(&artifacts, &dir).unwrap();

    assert_eq!(written, vec![dir.join("Token.json"), dir.join("Vault.json")]);
    assert_eq!(
      read(&dir.join("Token.json")),
      json!({
        "address": "0x00000000000000000000000000000000000000aa",
        "abi": [{"type": "function", "name": "mint"}],
      })
    );
  }

  #[test]
  fn imports_go_to_subdirectories() {
    let temp = TempDir::new().unwrap();
    let mut imported = Artifacts::default();
    imported.contracts.insert("Pool".to_string(), contract("0x00000000000000000000000000000000000000cc"));
    let mut artifacts = Artifacts::default();
    artifacts.imports.insert("sub".to_string(), imported);

    write_deployments(&artifacts, temp.path()).unwrap();

    let pool = read(&temp.path().join("sub/Pool.json"));
    assert_eq!(pool["address"], json!("0x00000000000000000000000000000000000000cc"));
  }

  #[test]
  fn overwrites_and_leaves_no_temporary_files() {
    let temp = TempDir::new().unwrap();
    let mut artifacts = Artifacts::default();
    artifacts.contracts.insert("Token".to_string(), contract("0x00000000000000000000000000000000000000aa"));
    write_deployments(&artifacts, temp.path()).unwrap();

    artifacts.contracts.insert("Token".to_string(), contract("0x00000000000000000000000000000000000000dd"));
    write_deployments(&artifacts, temp.path()).unwrap();

    let names: Vec<String> = fs::read_dir(temp.path())
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
      .collect();
    assert_eq!(names, vec!["Token.json"]);
    assert_eq!(
      read(&temp.path().join("Token.json"))["address"],
      json!("0x00000000000000000000000000000000000000dd")
    );
  }

  #[test]
  fn path_like_names_are_rejected() {
    let temp = TempDir::new().unwrap();
    let mut artifacts = Artifacts::default();
    artifacts.contracts.insert("../Token".to_string(), contract("0x00000000000000000000000000000000000000aa"));

    let err = write_deployments(&artifacts, &temp.path().join("out")).unwrap_err();
    assert!(matches!(err, DeploymentError::InvalidFileName(ref name) if name == "../Token"));
    assert!(!temp.path().join("Token.json").exists());
  }
}
