//! `[contract.<Name>]`: deploy a contract from a compiled artifact.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::builder::Runtime;
use crate::chain::{Address, ChainError, TransactionRequest, TxPayload, ensure_funded, resolve_signer, send_and_wait};
use crate::context::{Artifacts, ContractInfo, Context};
use crate::util::hash::{Fingerprint, hash_bytes};

use super::{Namespace, StepError, StepExecutor, resolved_config, typed_config};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContractConfig {
  /// Artifact (contract) name to deploy.
  pub artifact: String,
  #[serde(default)]
  pub args: Vec<Value>,
  /// Deployer address; the default signer when absent.
  #[serde(default)]
  pub from: Option<String>,
  /// Wei to send with the deployment, as a decimal string.
  #[serde(default)]
  pub value: Option<String>,
  #[serde(default)]
  pub depends: Vec<String>,
}

impl ContractConfig {
  pub(crate) fn from_address(&self) -> Result<Option<Address>, ChainError> {
    self.from.as_deref().map(Address::parse).transpose()
  }
}

pub struct ContractStep;

#[async_trait]
impl StepExecutor for ContractStep {
  fn kind(&self) -> &'static str {
    "contract"
  }

  fn namespace(&self) -> Option<Namespace> {
    Some(Namespace::Contracts)
  }

  fn validate(&self, config: &Value) -> Result<(), String> {
    typed_config::<ContractConfig>(config).map(|_| ())
  }

  async fn get_state(&self, runtime: &Runtime, _ctx: &Context, config: &Value) -> Result<Fingerprint, StepError> {
    let cfg: ContractConfig = resolved_config(config)?;
    let artifact = runtime.artifacts.get_artifact(&cfg.artifact).await?;

    Ok(Fingerprint::of(&json!({
      "config": config,
      "bytecode": hash_bytes(artifact.bytecode.as_bytes()).0,
    })))
  }

  async fn exec(&self, runtime: &Runtime, _ctx: &Context, name: &str, config: &Value) -> Result<Artifacts, StepError> {
    let cfg: ContractConfig = resolved_config(config)?;
    let artifact = runtime.artifacts.get_artifact(&cfg.artifact).await?;

    let from = cfg.from_address()?;
    let signer = resolve_signer(runtime.provider.as_ref(), from.as_ref()).await?;
    ensure_funded(signer.as_ref()).await?;

    info!(contract = %name, artifact = %cfg.artifact, from = %signer.address(), "deploying contract");

    let tx = TransactionRequest {
      payload: TxPayload::Deploy {
        bytecode: artifact.bytecode.clone(),
        abi: artifact.abi.clone(),
        args: cfg.args.clone(),
      },
      value: cfg.value.clone(),
    };
    let receipt = send_and_wait(runtime.provider.as_ref(), signer.as_ref(), tx, runtime.receipt_timeout).await?;

    let address = receipt
      .contract_address
      .ok_or_else(|| ChainError::MissingContractAddress {
        hash: receipt.transaction_hash.clone(),
      })?;
    info!(contract = %name, address = %address, "contract deployed");

    let mut artifacts = Artifacts::default();
    artifacts.contracts.insert(
      name.to_string(),
      ContractInfo {
        address,
        abi: artifact.abi,
        constructor_args: cfg.args,
        source_name: artifact.source_name,
        contract_name: artifact.contract_name,
        deploy_txn_hash: Some(receipt.transaction_hash),
      },
    );
    Ok(artifacts)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::deployment::DeploymentStore;
  use crate::definition::PackageRef;
  use crate::util::testutil::{MockArtifacts, MockChain};
  use std::collections::BTreeMap;
  use std::sync::Arc;

  fn setup() -> (MockChain, MockArtifacts, Runtime, Context) {
    let chain = MockChain::new();
    let artifacts = MockArtifacts::new().with("Token");
    let runtime = Runtime::new(
      Arc::new(chain.clone()),
      Arc::new(artifacts.clone()),
      DeploymentStore::new("/nonexistent"),
    );
    let mut settings = BTreeMap::new();
    settings.insert("supply".to_string(), "100".to_string());
    let ctx = Context::new(1, "main", PackageRef::new("proj", "1.0.0"), settings);
    (chain, artifacts, runtime, ctx)
  }

  #[test]
  fn validate_rejects_unknown_fields() {
    assert!(ContractStep.validate(&json!({"artifact": "Token"})).is_ok());
    assert!(ContractStep.validate(&json!({"artifact": "Token", "salt": "1"})).is_err());
    assert!(ContractStep.validate(&json!({"args": []})).is_err());
  }

  #[test]
  fn config_inject_is_pure() {
    let (_, _, _, ctx) = setup();
    let config = json!({"artifact": "Token", "args": ["<%= settings.supply %>", 7]});

    let first = ContractStep.config_inject(&ctx, &config).unwrap();
    let second = ContractStep.config_inject(&ctx, &config).unwrap();

    assert_eq!(first, second);
    assert_eq!(first["args"], json!(["100", 7]));
    assert_eq!(config["args"][0], json!("<%= settings.supply %>"));
  }

  #[tokio::test]
  async fn state_tracks_config_and_bytecode() {
    let (_, artifacts, runtime, ctx) = setup();
    let config = json!({"artifact": "Token", "args": ["1"]});

    let a = ContractStep.get_state(&runtime, &ctx, &config).await.unwrap();
    let same = ContractStep.get_state(&runtime, &ctx, &config).await.unwrap();
    let other_args = ContractStep
      .get_state(&runtime, &ctx, &json!({"artifact": "Token", "args": ["2"]}))
      .await
      .unwrap();
    artifacts.set_bytecode("Token", "0xdead");
    let other_code = ContractStep.get_state(&runtime, &ctx, &config).await.unwrap();

    assert_eq!(a, same);
    assert_ne!(a, other_args);
    assert_ne!(a, other_code);
  }

  #[tokio::test]
  async fn exec_records_contract() {
    let (chain, _, runtime, ctx) = setup();
    let config = json!({"artifact": "Token", "args": ["100"]});

    let artifacts = ContractStep.exec(&runtime, &ctx, "Token", &config).await.unwrap();

    let info = &artifacts.contracts["Token"];
    assert!(info.address.as_str().starts_with("0x"));
    assert_eq!(info.contract_name, "Token");
    assert_eq!(info.source_name, "contracts/Token.sol");
    assert_eq!(info.constructor_args, vec![json!("100")]);
    assert!(info.deploy_txn_hash.is_some());
    assert_eq!(chain.sent_count(), 1);
  }

  #[tokio::test]
  async fn exec_uses_from_signer() {
    let (chain, _, runtime, ctx) = setup();
    let other = chain.add_signer(10);
    let config = json!({"artifact": "Token", "from": other.as_str()});

    ContractStep.exec(&runtime, &ctx, "Token", &config).await.unwrap();
    assert_eq!(chain.sent()[0].0, other);
  }

  #[tokio::test]
  async fn exec_with_unknown_from_fails() {
    let (_, _, runtime, ctx) = setup();
    let config = json!({"artifact": "Token", "from": "0x00000000000000000000000000000000000000ff"});
    let err = ContractStep.exec(&runtime, &ctx, "Token", &config).await.unwrap_err();
    assert!(matches!(err, StepError::Chain(ChainError::SignerNotFound(_))));
  }

  #[tokio::test]
  async fn missing_artifact_fails() {
    let (_, _, runtime, ctx) = setup();
    let err = ContractStep
      .exec(&runtime, &ctx, "Nope", &json!({"artifact": "Nope"}))
      .await
      .unwrap_err();
    assert!(matches!(err, StepError::Artifact(_)));
  }
}
