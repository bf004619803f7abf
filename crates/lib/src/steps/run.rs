//! `[run.<name>]`: run an external command.
//!
//! The command runs in the project directory with the build context exported
//! through the environment:
//!
//! - `CANNON_CHAIN_ID` - chain id of the build
//! - `CANNON_PRESET` - preset of the build
//! - `CANNON_CONTEXT` - the template scope as JSON
//!
//! Anything the command prints on stdout must be an artifacts document, e.g.
//! `{"contracts": {"Proxy": {"address": "0x..", "abi": []}}}`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::process::Command;
use tracing::{debug, info};

use crate::builder::Runtime;
use crate::context::{Artifacts, Context};
use crate::util::hash::{Fingerprint, hash_path};

use super::{Namespace, StepError, StepExecutor, resolved_config, typed_config};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunConfig {
  pub exec: String,
  #[serde(default)]
  pub args: Vec<String>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  /// Files or directories whose contents affect the command, relative to
  /// the project directory.
  #[serde(default)]
  pub modified: Vec<String>,
  #[serde(default)]
  pub depends: Vec<String>,
}

pub struct RunStep;

#[async_trait]
impl StepExecutor for RunStep {
  fn kind(&self) -> &'static str {
    "run"
  }

  // Outputs depend on the command, so nothing can be inferred.
  fn namespace(&self) -> Option<Namespace> {
    None
  }

  fn validate(&self, config: &Value) -> Result<(), String> {
    typed_config::<RunConfig>(config).map(|_| ())
  }

  async fn get_state(&self, runtime: &Runtime, _ctx: &Context, config: &Value) -> Result<Fingerprint, StepError> {
    let cfg: RunConfig = resolved_config(config)?;

    let mut hashes = BTreeMap::new();
    for relative in &cfg.modified {
      let hash = hash_path(&runtime.base_dir.join(relative)).map_err(|source| StepError::Hash {
        path: relative.clone(),
        source,
      })?;
      hashes.insert(relative.clone(), hash.0);
    }

    Ok(Fingerprint::of(&json!({
      "config": config,
      "modified": hashes,
    })))
  }

  async fn exec(&self, runtime: &Runtime, ctx: &Context, name: &str, config: &Value) -> Result<Artifacts, StepError> {
    let cfg: RunConfig = resolved_config(config)?;
    info!(run = %name, exec = %cfg.exec, "running command");

    let mut command = Command::new(&cfg.exec);
    command
      .args(&cfg.args)
      .current_dir(&runtime.base_dir)
      .envs(&cfg.env)
      .env("CANNON_CHAIN_ID", ctx.chain_id.to_string())
      .env("CANNON_PRESET", &ctx.preset)
      .env("CANNON_CONTEXT", ctx.template_scope().to_string());

    debug!(working_dir = ?runtime.base_dir, args = ?cfg.args, "spawning process");

    let output = command.output().await.map_err(|source| StepError::Spawn {
      command: cfg.exec.clone(),
      source,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      if !stderr.is_empty() {
        debug!(stderr = %stderr, "command stderr");
      }
      if !stdout.is_empty() {
        debug!(stdout = %stdout, "command stdout");
      }
      return Err(StepError::CommandFailed {
        command: cfg.exec,
        code: output.status.code(),
      });
    }

    if stdout.is_empty() {
      return Ok(Artifacts::default());
    }

    serde_json::from_str(&stdout).map_err(|source| StepError::CommandOutput {
      command: cfg.exec,
      source,
    })
  }
}
