//! Build context and step artifacts.
//!
//! A `Context` belongs to exactly one in-progress build. Each completed step
//! appends its `Artifacts`; later steps see the merged view through the
//! template scope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::chain::{Address, TxHash};
use crate::definition::PackageRef;

/// A deployed contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
  pub address: Address,
  pub abi: Value,
  #[serde(default)]
  pub constructor_args: Vec<Value>,
  #[serde(default)]
  pub source_name: String,
  #[serde(default)]
  pub contract_name: String,
  #[serde(default)]
  pub deploy_txn_hash: Option<TxHash>,
}

/// A mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
  pub hash: TxHash,
  #[serde(default)]
  pub block_number: u64,
}

/// Output of one step, or the merged output of a build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifacts {
  #[serde(default)]
  pub contracts: BTreeMap<String, ContractInfo>,
  #[serde(default)]
  pub txns: BTreeMap<String, TransactionInfo>,
  #[serde(default)]
  pub imports: BTreeMap<String, Artifacts>,
}

impl Artifacts {
  pub fn is_empty(&self) -> bool {
    self.contracts.is_empty() && self.txns.is_empty() && self.imports.is_empty()
  }

  /// Merge `other` into `self`. Entries of `other` win on name clashes.
  pub fn merge(&mut self, other: &Artifacts) {
    self
      .contracts
      .extend(other.contracts.iter().map(|(k, v)| (k.clone(), v.clone())));
    self.txns.extend(other.txns.iter().map(|(k, v)| (k.clone(), v.clone())));
    self
      .imports
      .extend(other.imports.iter().map(|(k, v)| (k.clone(), v.clone())));
  }

  /// Merge a sequence of per-step artifacts in order.
  pub fn merged<'a>(parts: impl IntoIterator<Item = &'a Artifacts>) -> Artifacts {
    let mut all = Artifacts::default();
    for part in parts {
      all.merge(part);
    }
    all
  }
}

/// Accumulating environment of one build.
#[derive(Debug, Clone)]
pub struct Context {
  pub chain_id: u64,
  pub preset: String,
  pub package: PackageRef,
  pub settings: BTreeMap<String, String>,
  steps: BTreeMap<String, Artifacts>,
  merged: Artifacts,
}

impl Context {
  pub fn new(chain_id: u64, preset: &str, package: PackageRef, settings: BTreeMap<String, String>) -> Self {
    Self {
      chain_id,
      preset: preset.to_string(),
      package,
      settings,
      steps: BTreeMap::new(),
      merged: Artifacts::default(),
    }
  }

  /// Record the artifacts of a finished step.
  ///
  /// Each step is recorded at most once per build.
  pub fn record_step(&mut self, step: &str, artifacts: Artifacts) {
    debug_assert!(!self.steps.contains_key(step), "step {step} recorded twice");
    self.merged.merge(&artifacts);
    self.steps.insert(step.to_string(), artifacts);
  }

  pub fn step_artifacts(&self, step: &str) -> Option<&Artifacts> {
    self.steps.get(step)
  }

  /// Merged artifacts of every step recorded so far.
  pub fn artifacts(&self) -> &Artifacts {
    &self.merged
  }

  /// The JSON document templates are resolved against.
  pub fn template_scope(&self) -> Value {
    json!({
      "chainId": self.chain_id,
      "preset": self.preset,
      "package": { "name": self.package.name, "version": self.package.version },
      "settings": self.settings,
      "contracts": self.merged.contracts,
      "txns": self.merged.txns,
      "imports": self.merged.imports,
    })
  }
}
