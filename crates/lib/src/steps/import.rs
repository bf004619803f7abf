//! `[import.<name>]`: pull in the outputs of another stored package.
//!
//! The imported package is rebuilt with a nested, non-persisting builder
//! against its own stored record, so an unchanged import executes nothing.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::builder::{BuildError, ChainBuilder, EngineConfig, Runtime, WriteMode};
use crate::consts::DEFAULT_PRESET;
use crate::context::{Artifacts, Context};
use crate::definition::{Definition, PackageRef};
use crate::template;
use crate::util::hash::Fingerprint;

use super::{Namespace, StepError, StepExecutor, resolved_config, typed_config};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImportConfig {
  /// `name:version` of the package to import.
  pub source: String,
  /// Chain the package was deployed to; the build's own chain when absent.
  #[serde(default)]
  pub chain_id: Option<u64>,
  #[serde(default)]
  pub preset: Option<String>,
  /// Settings overriding the ones stored with the package.
  #[serde(default)]
  pub options: BTreeMap<String, String>,
  #[serde(default)]
  pub depends: Vec<String>,
}

/// Stored options overlaid by the importer's options.
pub fn effective_options(stored: &BTreeMap<String, String>, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
  let mut options = stored.clone();
  options.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
  options
}

pub struct ImportStep;

#[async_trait]
impl StepExecutor for ImportStep {
  fn kind(&self) -> &'static str {
    "import"
  }

  fn namespace(&self) -> Option<Namespace> {
    Some(Namespace::Imports)
  }

  fn validate(&self, config: &Value) -> Result<(), String> {
    typed_config::<ImportConfig>(config).map(|_| ())
  }

  /// Templates `source`, `preset` and option values, then fills in the
  /// default preset and chain id. A preset that is missing or resolves to
  /// an empty string becomes the default.
  fn config_inject(&self, ctx: &Context, config: &Value) -> Result<Value, StepError> {
    let mut injected = template::inject_value(config, &ctx.template_scope())?;
    if let Some(table) = injected.as_object_mut() {
      let preset = table.get("preset").and_then(Value::as_str).unwrap_or_default();
      if preset.is_empty() {
        table.insert("preset".to_string(), Value::String(DEFAULT_PRESET.to_string()));
      }
      table.entry("chainId").or_insert_with(|| json!(ctx.chain_id));
    }
    Ok(injected)
  }

  async fn get_state(&self, _runtime: &Runtime, _ctx: &Context, config: &Value) -> Result<Fingerprint, StepError> {
    Ok(Fingerprint::of(config))
  }

  async fn exec(&self, runtime: &Runtime, ctx: &Context, name: &str, config: &Value) -> Result<Artifacts, StepError> {
    let cfg: ImportConfig = resolved_config(config)?;
    let package = PackageRef::parse(&cfg.source).map_err(|_| StepError::InvalidSource(cfg.source.clone()))?;
    let chain_id = cfg.chain_id.unwrap_or(ctx.chain_id);
    let preset = cfg
      .preset
      .clone()
      .filter(|p| !p.is_empty())
      .unwrap_or_else(|| DEFAULT_PRESET.to_string());

    let record = runtime.store.load(&package, chain_id, &preset)?;
    let nested_failure = |source: BuildError| StepError::Import {
      package: package.to_string(),
      source: Box::new(source),
    };

    let definition = Definition::parse(&record.definition, &runtime.registry)
      .map_err(|e| nested_failure(BuildError::Definition(e)))?;
    let options = effective_options(&record.options, &cfg.options);

    info!(import = %name, package = %package, chain_id, preset = %preset, "building import");

    let mut config = EngineConfig::new(package.clone(), chain_id);
    config.preset = preset;
    config.write_mode = WriteMode::None;

    let mut builder = ChainBuilder::new(runtime.clone(), config);
    let imported = builder
      .build(&definition, &options)
      .await
      .and_then(|result| result.into_artifacts())
      .map_err(nested_failure)?;

    let mut artifacts = Artifacts::default();
    artifacts.imports.insert(name.to_string(), imported);
    Ok(artifacts)
  }
}
