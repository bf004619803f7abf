//! Step kinds.
//!
//! Every kind implements [`StepExecutor`] and is registered by name in a
//! [`StepRegistry`]. The builder drives each step through the same sequence:
//!
//! 1. `config_inject` resolves templates against the build context
//! 2. `get_state` fingerprints the resolved configuration
//! 3. `exec` runs the side effects, only when the fingerprint changed
//!
//! # Kinds
//!
//! - `contract`: deploy a contract from a compiled artifact
//! - `invoke`: call a function on a deployed contract
//! - `import`: pull in the outputs of another stored package
//! - `run`: run an external command that prints artifacts as JSON

pub mod contract;
pub mod import;
pub mod invoke;
pub mod run;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::artifacts::ArtifactError;
use crate::builder::{BuildError, Runtime};
use crate::chain::ChainError;
use crate::context::{Artifacts, Context};
use crate::deployment::DeploymentError;
use crate::template::{self, TemplateError};
use crate::util::hash::{DirHashError, Fingerprint};

pub use contract::ContractStep;
pub use import::ImportStep;
pub use invoke::InvokeStep;
pub use run::RunStep;

/// Template namespace a kind publishes its outputs into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
  Contracts,
  Txns,
  Imports,
}

impl Namespace {
  pub fn as_str(self) -> &'static str {
    match self {
      Namespace::Contracts => "contracts",
      Namespace::Txns => "txns",
      Namespace::Imports => "imports",
    }
  }

  /// The namespace addressed by the first segment of a template reference.
  pub fn from_root(root: &str) -> Option<Self> {
    match root {
      "contracts" => Some(Namespace::Contracts),
      "txns" => Some(Namespace::Txns),
      "imports" => Some(Namespace::Imports),
      _ => None,
    }
  }
}

#[derive(Debug, Error)]
pub enum StepError {
  #[error(transparent)]
  Template(#[from] TemplateError),

  #[error(transparent)]
  Chain(#[from] ChainError),

  #[error(transparent)]
  Artifact(#[from] ArtifactError),

  #[error(transparent)]
  Deployment(#[from] DeploymentError),

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error("unknown target '{0}': not a contract of this build and not an address")]
  UnknownTarget(String),

  #[error("invalid import source '{0}', expected name:version")]
  InvalidSource(String),

  #[error("imported package {package} failed: {source}")]
  Import {
    package: String,
    #[source]
    source: Box<BuildError>,
  },

  #[error("command `{command}` failed to start: {source}")]
  Spawn {
    command: String,
    #[source]
    source: std::io::Error,
  },

  #[error("command `{command}` exited with code {code:?}")]
  CommandFailed { command: String, code: Option<i32> },

  #[error("command `{command}` printed invalid artifacts: {source}")]
  CommandOutput {
    command: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to hash {path}: {source}")]
  Hash {
    path: String,
    #[source]
    source: DirHashError,
  },
}

/// Behaviour of one step kind.
///
/// `config` arguments of `get_state` and `exec` are already injected.
#[async_trait]
pub trait StepExecutor: Send + Sync {
  /// Table name in the definition (`contract`, `invoke`, ...).
  fn kind(&self) -> &'static str;

  /// Namespace this kind publishes into, if its outputs are known statically.
  fn namespace(&self) -> Option<Namespace>;

  /// Check the raw configuration shape. Templates are not resolved here.
  fn validate(&self, config: &Value) -> Result<(), String>;

  /// Outputs of other steps named by plain fields rather than templates.
  fn static_references(&self, _config: &Value) -> Vec<(Namespace, String)> {
    Vec::new()
  }

  /// Resolve templates against the context. Must be pure.
  fn config_inject(&self, ctx: &Context, config: &Value) -> Result<Value, StepError> {
    Ok(template::inject_value(config, &ctx.template_scope())?)
  }

  /// Fingerprint everything that affects the step's side effects.
  async fn get_state(&self, runtime: &Runtime, ctx: &Context, config: &Value) -> Result<Fingerprint, StepError>;

  /// Perform the step. Called at most once per step per build.
  async fn exec(&self, runtime: &Runtime, ctx: &Context, name: &str, config: &Value) -> Result<Artifacts, StepError>;
}

/// Step kinds by name.
#[derive(Clone)]
pub struct StepRegistry {
  executors: BTreeMap<&'static str, Arc<dyn StepExecutor>>,
}

impl StepRegistry {
  /// A registry without any kinds.
  pub fn empty() -> Self {
    Self {
      executors: BTreeMap::new(),
    }
  }

  /// Add or replace a kind.
  pub fn register(&mut self, executor: Arc<dyn StepExecutor>) {
    self.executors.insert(executor.kind(), executor);
  }

  pub fn get(&self, kind: &str) -> Option<&Arc<dyn StepExecutor>> {
    self.executors.get(kind)
  }

  pub fn kinds(&self) -> Vec<&'static str> {
    self.executors.keys().copied().collect()
  }
}

impl Default for StepRegistry {
  fn default() -> Self {
    let mut registry = Self::empty();
    registry.register(Arc::new(ContractStep));
    registry.register(Arc::new(InvokeStep));
    registry.register(Arc::new(ImportStep));
    registry.register(Arc::new(RunStep));
    registry
  }
}

impl std::fmt::Debug for StepRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StepRegistry").field("kinds", &self.kinds()).finish()
  }
}

/// Deserialize a step configuration into its typed form.
pub(crate) fn typed_config<T: DeserializeOwned>(config: &Value) -> Result<T, String> {
  serde_json::from_value(config.clone()).map_err(|e| e.to_string())
}

/// Like `typed_config`, for configurations that already passed `validate`.
pub(crate) fn resolved_config<T: DeserializeOwned>(config: &Value) -> Result<T, StepError> {
  typed_config(config).map_err(StepError::Config)
}
