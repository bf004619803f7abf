//! `[invoke.<name>]`: call a function on a deployed contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::builder::Runtime;
use crate::chain::{Address, TransactionRequest, TxPayload, ensure_funded, resolve_signer, send_and_wait};
use crate::context::{Artifacts, Context, TransactionInfo};
use crate::util::hash::Fingerprint;

use super::{Namespace, StepError, StepExecutor, resolved_config, typed_config};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InvokeConfig {
  /// Contract name from this build, or a literal address.
  pub target: String,
  /// Artifact providing the ABI when `target` is an address.
  #[serde(default)]
  pub abi: Option<String>,
  pub func: String,
  #[serde(default)]
  pub args: Vec<Value>,
  #[serde(default)]
  pub from: Option<String>,
  #[serde(default)]
  pub value: Option<String>,
  #[serde(default)]
  pub depends: Vec<String>,
}

pub struct InvokeStep;

impl InvokeStep {
  async fn resolve_target(runtime: &Runtime, ctx: &Context, cfg: &InvokeConfig) -> Result<(Address, Value), StepError> {
    if let Some(contract) = ctx.artifacts().contracts.get(&cfg.target) {
      return Ok((contract.address.clone(), contract.abi.clone()));
    }

    let address = Address::parse(&cfg.target).map_err(|_| StepError::UnknownTarget(cfg.target.clone()))?;
    let abi_name = cfg
      .abi
      .as_deref()
      .ok_or_else(|| StepError::Config(format!("`abi` is required when target is an address ({address})")))?;
    let artifact = runtime.artifacts.get_artifact(abi_name).await?;
    Ok((address, artifact.abi))
  }
}

#[async_trait]
impl StepExecutor for InvokeStep {
  fn kind(&self) -> &'static str {
    "invoke"
  }

  fn namespace(&self) -> Option<Namespace> {
    Some(Namespace::Txns)
  }

  fn validate(&self, config: &Value) -> Result<(), String> {
    typed_config::<InvokeConfig>(config).map(|_| ())
  }

  /// A `target` that is neither a template nor an address names a contract
  /// of this build.
  fn static_references(&self, config: &Value) -> Vec<(Namespace, String)> {
    match config.get("target").and_then(Value::as_str) {
      Some(target) if !target.contains("<%") && Address::parse(target).is_err() => {
        vec![(Namespace::Contracts, target.to_string())]
      }
      _ => Vec::new(),
    }
  }

  async fn get_state(&self, runtime: &Runtime, ctx: &Context, config: &Value) -> Result<Fingerprint, StepError> {
    let cfg: InvokeConfig = resolved_config(config)?;
    let (address, _) = Self::resolve_target(runtime, ctx, &cfg).await?;
    Ok(Fingerprint::of(&json!({
      "config": config,
      "target": address,
    })))
  }

  async fn exec(&self, runtime: &Runtime, ctx: &Context, name: &str, config: &Value) -> Result<Artifacts, StepError> {
    let cfg: InvokeConfig = resolved_config(config)?;
    let (to, abi) = Self::resolve_target(runtime, ctx, &cfg).await?;

    let from = cfg.from.as_deref().map(Address::parse).transpose()?;
    let signer = resolve_signer(runtime.provider.as_ref(), from.as_ref()).await?;
    ensure_funded(signer.as_ref()).await?;

    info!(txn = %name, target = %to, func = %cfg.func, "invoking contract");

    let tx = TransactionRequest {
      payload: TxPayload::Call {
        to,
        abi,
        function: cfg.func.clone(),
        args: cfg.args.clone(),
      },
      value: cfg.value.clone(),
    };
    let receipt = send_and_wait(runtime.provider.as_ref(), signer.as_ref(), tx, runtime.receipt_timeout).await?;

    let mut artifacts = Artifacts::default();
    artifacts.txns.insert(
      name.to_string(),
      TransactionInfo {
        hash: receipt.transaction_hash,
        block_number: receipt.block_number,
      },
    );
    Ok(artifacts)
  }
}
