//! The build engine.
//!
//! A [`ChainBuilder`] walks a definition in dependency order. Each step's
//! configuration is resolved against the artifacts of the steps before it and
//! fingerprinted; when the fingerprint matches the baseline record the stored
//! artifacts are reused, otherwise the step executes. A successful build is
//! saved as a whole. A failed one saves nothing.

mod runtime;
mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info};

use crate::context::{Artifacts, Context};
use crate::definition::{Definition, PackageRef, Step};
use crate::deployment::{DeploymentError, DeploymentRecord, DeploymentStore};
use crate::steps::{StepError, StepExecutor, StepRegistry};
use crate::util::hash::Fingerprint;

pub use runtime::{DEFAULT_RECEIPT_TIMEOUT, Runtime};
pub use types::{
  BuildError, BuildResult, BuildState, EngineConfig, PlanStatus, PlannedStep, StepFailure, WriteMode,
};

/// Builds one package on one chain and preset.
#[derive(Debug)]
pub struct ChainBuilder {
  runtime: Runtime,
  config: EngineConfig,
  state: BuildState,
}

impl ChainBuilder {
  pub fn new(runtime: Runtime, config: EngineConfig) -> Self {
    Self {
      runtime,
      config,
      state: BuildState::Initialized,
    }
  }

  pub fn state(&self) -> &BuildState {
    &self.state
  }

  fn transition(&mut self, state: BuildState) {
    debug!(package = %self.config.package, state = %state, "build state");
    self.state = state;
  }

  /// The record fingerprints are compared against.
  fn baseline(&self) -> Result<Option<DeploymentRecord>, DeploymentError> {
    let EngineConfig {
      package,
      chain_id,
      preset,
      ..
    } = &self.config;

    if self.config.wipe {
      return Ok(None);
    }
    match &self.config.upgrade_from {
      Some(previous) => self.runtime.store.load(previous, *chain_id, preset).map(Some),
      None => self.runtime.store.find(package, *chain_id, preset),
    }
  }

  fn executor(&self, step: &Step) -> Result<std::sync::Arc<dyn StepExecutor>, BuildError> {
    self
      .runtime
      .registry
      .get(&step.kind)
      .cloned()
      .ok_or_else(|| BuildError::UnknownKind(step.kind.clone()))
  }

  fn context(&self, definition: &Definition, options: &BTreeMap<String, String>) -> Result<Context, BuildError> {
    let settings = definition.resolve_settings(options)?;
    Ok(Context::new(
      self.config.chain_id,
      &self.config.preset,
      self.config.package.clone(),
      settings,
    ))
  }

  /// Run every step of `definition` in dependency order.
  ///
  /// Problems found before any step runs (cycles, missing settings, an
  /// unreadable baseline) are returned as `Err`. A failing step stops the
  /// build and is reported in `BuildResult::failure`.
  pub async fn build(
    &mut self,
    definition: &Definition,
    options: &BTreeMap<String, String>,
  ) -> Result<BuildResult, BuildError> {
    self.transition(BuildState::Initialized);

    let order = definition.topological_order()?;
    let mut ctx = self.context(definition, options)?;
    let baseline = self.baseline()?;

    info!(
      package = %self.config.package,
      chain_id = self.config.chain_id,
      preset = %self.config.preset,
      steps = order.len(),
      baseline = baseline.is_some(),
      "starting build"
    );

    let mut result = BuildResult::default();
    for step in order {
      self.transition(BuildState::Resolving(step.id.clone()));
      let executor = self.executor(step)?;

      match self.run_step(executor.as_ref(), step, &ctx, baseline.as_ref()).await {
        Ok((fingerprint, artifacts, executed)) => {
          if executed {
            result.executed.push(step.id.clone());
          } else {
            result.cached.push(step.id.clone());
          }
          result.step_states.insert(step.id.clone(), fingerprint);
          result.step_artifacts.insert(step.id.clone(), artifacts.clone());
          ctx.record_step(&step.id, artifacts);
        }
        Err(err) => {
          self.transition(BuildState::Failed(step.id.clone()));
          error!(step = %step.id, error = %err, "step failed");
          result.artifacts = ctx.artifacts().clone();
          result.failure = Some(StepFailure {
            step: step.id.clone(),
            error: err,
          });
          return Ok(result);
        }
      }
    }

    result.artifacts = ctx.artifacts().clone();

    if self.config.write_mode == WriteMode::Persist {
      let record = DeploymentRecord {
        package: self.config.package.clone(),
        chain_id: self.config.chain_id,
        preset: self.config.preset.clone(),
        definition: definition.to_value(),
        options: options.clone(),
        step_states: result.step_states.clone(),
        artifacts: result.step_artifacts.clone(),
        timestamp: SystemTime::now()
          .duration_since(UNIX_EPOCH)
          .unwrap_or_default()
          .as_secs(),
      };
      self.runtime.store.save(&record)?;
    }

    self.transition(BuildState::Completed);
    info!(
      package = %self.config.package,
      executed = result.executed.len(),
      cached = result.cached.len(),
      "build completed"
    );
    Ok(result)
  }

  async fn run_step(
    &mut self,
    executor: &dyn StepExecutor,
    step: &Step,
    ctx: &Context,
    baseline: Option<&DeploymentRecord>,
  ) -> Result<(Fingerprint, Artifacts, bool), StepError> {
    let config = executor.config_inject(ctx, &step.config)?;
    let fingerprint = executor.get_state(&self.runtime, ctx, &config).await?;

    if let Some(record) = baseline
      && record.step_states.get(&step.id) == Some(&fingerprint)
      && let Some(artifacts) = record.artifacts.get(&step.id)
    {
      self.transition(BuildState::Cached(step.id.clone()));
      debug!(step = %step.id, fingerprint = %fingerprint, "fingerprint unchanged, reusing artifacts");
      return Ok((fingerprint, artifacts.clone(), false));
    }

    self.transition(BuildState::Executing(step.id.clone()));
    info!(step = %step.id, "executing step");
    let artifacts = executor.exec(&self.runtime, ctx, &step.name, &config).await?;
    Ok((fingerprint, artifacts, true))
  }

  /// Compare each step with the baseline without executing anything.
  ///
  /// Steps downstream of a step that would execute are `Pending`: their
  /// configuration may reference outputs that do not exist yet.
  pub async fn plan(
    &self,
    definition: &Definition,
    options: &BTreeMap<String, String>,
  ) -> Result<Vec<PlannedStep>, BuildError> {
    let order = definition.topological_order()?;
    let mut ctx = self.context(definition, options)?;
    let baseline = self.baseline()?;

    let mut dirty: BTreeSet<&str> = BTreeSet::new();
    let mut planned = Vec::with_capacity(order.len());

    for step in order {
      if step.dependencies().iter().any(|dep| dirty.contains(dep)) {
        dirty.insert(&step.id);
        planned.push(PlannedStep {
          step: step.id.clone(),
          status: PlanStatus::Pending,
          fingerprint: None,
        });
        continue;
      }

      let executor = self.executor(step)?;
      let step_err = |source| BuildError::StepExecution {
        step: step.id.clone(),
        source,
      };
      let config = executor.config_inject(&ctx, &step.config).map_err(step_err)?;
      let fingerprint = executor
        .get_state(&self.runtime, &ctx, &config)
        .await
        .map_err(step_err)?;

      let stored = baseline
        .as_ref()
        .and_then(|record| Some((record.step_states.get(&step.id)?, record.artifacts.get(&step.id))));

      let status = match stored {
        None => PlanStatus::New,
        Some((previous, Some(artifacts))) if *previous == fingerprint => {
          ctx.record_step(&step.id, artifacts.clone());
          PlanStatus::Unchanged
        }
        Some(_) => PlanStatus::Changed,
      };

      if status != PlanStatus::Unchanged {
        dirty.insert(&step.id);
      }
      debug!(step = %step.id, status = %status, "planned");
      planned.push(PlannedStep {
        step: step.id.clone(),
        status,
        fingerprint: Some(fingerprint),
      });
    }

    Ok(planned)
  }
}

/// Merged artifacts of a stored deployment, `None` when nothing is stored.
///
/// Step artifacts are merged in the stored definition's execution order.
pub fn get_outputs(
  store: &DeploymentStore,
  package: &PackageRef,
  chain_id: u64,
  preset: &str,
) -> Result<Option<Artifacts>, DeploymentError> {
  let Some(record) = store.find(package, chain_id, preset)? else {
    return Ok(None);
  };

  let order: Option<Vec<String>> = Definition::parse(&record.definition, &StepRegistry::default())
    .ok()
    .and_then(|definition| {
      let steps = definition.topological_order().ok()?;
      Some(steps.into_iter().map(|s| s.id.clone()).collect())
    });

  let artifacts = match order {
    Some(ids) => Artifacts::merged(ids.iter().filter_map(|id| record.artifacts.get(id))),
    None => record.merged_artifacts(),
  };
  Ok(Some(artifacts))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::chain::{ChainError, TxPayload};
  use crate::util::testutil::{MockArtifacts, MockChain};
  use serde_json::json;
  use std::path::Path;
  use std::sync::Arc;
  use tempfile::TempDir;

  const CHAIN_ID: u64 = 13370;

  const PROJECT: &str = r#"
name = "proj"
version = "1.0.0"

[setting.label]
defaultValue = "one"

[contract.A]
artifact = "A"

[contract.B]
artifact = "B"
args = ["<%= settings.label %>"]

[contract.C]
artifact = "C"
args = ["<%= contracts.B.address %>"]

[contract.D]
artifact = "D"
"#;

  struct Harness {
    chain: MockChain,
    artifacts: MockArtifacts,
    dir: TempDir,
  }

  impl Harness {
    fn new() -> Self {
      Self {
        chain: MockChain::new(),
        artifacts: MockArtifacts::new().with("A").with("B").with("C").with("D"),
        dir: TempDir::new().unwrap(),
      }
    }

    fn store(&self) -> DeploymentStore {
      DeploymentStore::new(self.dir.path())
    }

    fn runtime(&self) -> Runtime {
      Runtime::new(Arc::new(self.chain.clone()), Arc::new(self.artifacts.clone()), self.store())
        .with_base_dir(Path::new("."))
    }

    fn builder(&self, version: &str) -> ChainBuilder {
      ChainBuilder::new(self.runtime(), EngineConfig::new(PackageRef::new("proj", version), CHAIN_ID))
    }

    async fn build(&self, toml: &str, options: &[(&str, &str)]) -> BuildResult {
      let definition = Definition::from_toml_str(toml).unwrap();
      let options = options.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
      self.builder(&definition.version).build(&definition, &options).await.unwrap()
    }
  }

  fn ids(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
  }

  #[tokio::test]
  async fn first_build_executes_and_persists() {
    let h = Harness::new();
    let result = h.build(PROJECT, &[]).await;

    assert!(result.is_success());
    assert_eq!(result.executed, ids(&["contract.A", "contract.B", "contract.C", "contract.D"]));
    assert!(result.cached.is_empty());
    assert_eq!(h.chain.sent_count(), 4);

    let record = h.store().load(&PackageRef::new("proj", "1.0.0"), CHAIN_ID, "main").unwrap();
    assert_eq!(record.step_states, result.step_states);
    assert_eq!(record.merged_artifacts(), result.artifacts);
  }

  #[tokio::test]
  async fn constructor_args_are_resolved_from_context() {
    let h = Harness::new();
    let result = h.build(PROJECT, &[]).await;

    let b = &result.artifacts.contracts["B"];
    let c = &result.artifacts.contracts["C"];
    assert_eq!(b.constructor_args, vec![json!("one")]);
    assert_eq!(c.constructor_args, vec![json!(b.address.as_str())]);
  }

  #[tokio::test]
  async fn unchanged_rebuild_executes_nothing() {
    let h = Harness::new();
    let first = h.build(PROJECT, &[]).await;
    let sent = h.chain.sent_count();

    let second = h.build(PROJECT, &[]).await;

    assert!(second.executed.is_empty());
    assert_eq!(second.cached.len(), 4);
    assert_eq!(h.chain.sent_count(), sent);
    assert_eq!(second.artifacts, first.artifacts);
  }

  #[tokio::test]
  async fn changed_step_reexecutes_with_dependents_only() {
    let h = Harness::new();
    let first = h.build(PROJECT, &[]).await;

    let second = h.build(PROJECT, &[("label", "two")]).await;

    assert_eq!(second.executed, ids(&["contract.B", "contract.C"]));
    assert_eq!(second.cached, ids(&["contract.A", "contract.D"]));
    assert_eq!(second.artifacts.contracts["A"], first.artifacts.contracts["A"]);
    assert_ne!(second.artifacts.contracts["B"].address, first.artifacts.contracts["B"].address);
  }

  #[tokio::test]
  async fn new_bytecode_reexecutes() {
    let h = Harness::new();
    h.build(PROJECT, &[]).await;
    h.artifacts.set_bytecode("D", "0x6001");

    let second = h.build(PROJECT, &[]).await;
    assert_eq!(second.executed, ids(&["contract.D"]));
  }

  #[tokio::test]
  async fn failure_keeps_earlier_artifacts_and_writes_nothing() {
    let h = Harness::new();
    h.chain.fail_function("boom");
    let definition = Definition::from_toml_str(
      r#"
name = "proj"
version = "1.0.0"

[contract.A]
artifact = "A"

[invoke.B]
target = "A"
func = "boom"

[contract.C]
artifact = "C"
depends = ["invoke.B"]
"#,
    )
    .unwrap();

    let mut builder = h.builder("1.0.0");
    let result = builder.build(&definition, &BTreeMap::new()).await.unwrap();

    assert_eq!(builder.state(), &BuildState::Failed("invoke.B".to_string()));
    assert_eq!(result.executed, ids(&["contract.A"]));
    assert!(result.artifacts.contracts.contains_key("A"));
    assert!(!result.artifacts.contracts.contains_key("C"));
    // A deploy plus the reverted call; C never sent
    assert_eq!(h.chain.sent_count(), 2);

    let failure = result.failure.as_ref().unwrap();
    assert_eq!(failure.step, "invoke.B");
    assert!(matches!(failure.error, StepError::Chain(ChainError::Reverted { .. })));

    assert!(h.store().find(&PackageRef::new("proj", "1.0.0"), CHAIN_ID, "main").unwrap().is_none());
    assert!(matches!(
      result.into_artifacts(),
      Err(BuildError::StepExecution { ref step, .. }) if step == "invoke.B"
    ));
  }

  #[tokio::test]
  async fn dry_run_persists_nothing() {
    let h = Harness::new();
    let definition = Definition::from_toml_str(PROJECT).unwrap();
    let mut config = EngineConfig::new(PackageRef::new("proj", "1.0.0"), CHAIN_ID);
    config.write_mode = WriteMode::None;

    let mut builder = ChainBuilder::new(h.runtime(), config);
    let result = builder.build(&definition, &BTreeMap::new()).await.unwrap();

    assert!(result.is_success());
    assert_eq!(builder.state(), &BuildState::Completed);
    assert!(h.store().list_packages().unwrap().is_empty());
  }

  #[tokio::test]
  async fn wipe_ignores_stored_record() {
    let h = Harness::new();
    h.build(PROJECT, &[]).await;

    let definition = Definition::from_toml_str(PROJECT).unwrap();
    let mut config = EngineConfig::new(PackageRef::new("proj", "1.0.0"), CHAIN_ID);
    config.wipe = true;
    let result = ChainBuilder::new(h.runtime(), config)
      .build(&definition, &BTreeMap::new())
      .await
      .unwrap();

    assert_eq!(result.executed.len(), 4);
  }

  #[tokio::test]
  async fn upgrade_from_reuses_previous_package() {
    let h = Harness::new();
    h.build(PROJECT, &[]).await;

    let next = PROJECT.replace("version = \"1.0.0\"", "version = \"1.1.0\"");
    let definition = Definition::from_toml_str(&next).unwrap();
    let mut config = EngineConfig::new(PackageRef::new("proj", "1.1.0"), CHAIN_ID);
    config.upgrade_from = Some(PackageRef::new("proj", "1.0.0"));

    let result = ChainBuilder::new(h.runtime(), config)
      .build(&definition, &BTreeMap::new())
      .await
      .unwrap();

    assert!(result.executed.is_empty());
    assert!(h.store().find(&PackageRef::new("proj", "1.1.0"), CHAIN_ID, "main").unwrap().is_some());
  }

  #[tokio::test]
  async fn upgrade_from_missing_package_is_not_found() {
    let h = Harness::new();
    let definition = Definition::from_toml_str(PROJECT).unwrap();
    let mut config = EngineConfig::new(PackageRef::new("proj", "1.0.0"), CHAIN_ID);
    config.upgrade_from = Some(PackageRef::new("proj", "0.9.0"));

    let err = ChainBuilder::new(h.runtime(), config)
      .build(&definition, &BTreeMap::new())
      .await
      .unwrap_err();
    assert!(matches!(err, BuildError::Deployment(DeploymentError::NotFound { .. })));
  }

  #[tokio::test]
  async fn presets_are_independent() {
    let h = Harness::new();
    h.build(PROJECT, &[]).await;

    let definition = Definition::from_toml_str(PROJECT).unwrap();
    let mut config = EngineConfig::new(PackageRef::new("proj", "1.0.0"), CHAIN_ID);
    config.preset = "staging".to_string();
    let result = ChainBuilder::new(h.runtime(), config)
      .build(&definition, &BTreeMap::new())
      .await
      .unwrap();

    assert_eq!(result.executed.len(), 4);
    assert_eq!(h.store().list(&PackageRef::new("proj", "1.0.0")).unwrap().len(), 2);
  }

  #[tokio::test]
  async fn missing_setting_fails_before_any_step() {
    let h = Harness::new();
    let definition = Definition::from_toml_str(
      "name = \"proj\"\nversion = \"1.0.0\"\n[setting.owner]\n[contract.A]\nartifact = \"A\"\n",
    )
    .unwrap();

    let err = h.builder("1.0.0").build(&definition, &BTreeMap::new()).await.unwrap_err();
    assert!(matches!(err, BuildError::Definition(_)));
    assert_eq!(h.chain.sent_count(), 0);
  }

  #[tokio::test]
  async fn unresolved_template_is_step_failure() {
    let h = Harness::new();
    let result = h
      .build(
        "name = \"proj\"\nversion = \"1.0.0\"\n[contract.A]\nartifact = \"A\"\nargs = [\"<%= settings.nope %>\"]\n",
        &[],
      )
      .await;

    let failure = result.failure.unwrap();
    assert_eq!(failure.step, "contract.A");
    assert!(matches!(failure.error, StepError::Template(_)));
  }

  #[tokio::test]
  async fn no_signer_is_step_failure() {
    let h = Harness {
      chain: MockChain::without_default_signer(),
      ..Harness::new()
    };
    let result = h.build(PROJECT, &[]).await;
    let failure = result.failure.unwrap();
    assert!(matches!(failure.error, StepError::Chain(ChainError::NoSigner)));
  }

  #[tokio::test]
  #[tracing_test::traced_test]
  async fn step_failure_is_logged() {
    let h = Harness {
      chain: MockChain::without_default_signer(),
      ..Harness::new()
    };
    h.build(PROJECT, &[]).await;

    assert!(logs_contain("step failed"));
    assert!(logs_contain("contract.A"));
  }

  #[tokio::test]
  async fn unfunded_signer_is_step_failure() {
    let h = Harness::new();
    h.chain.drain_deployer();
    let result = h.build(PROJECT, &[]).await;
    let failure = result.failure.unwrap();
    assert!(matches!(failure.error, StepError::Chain(ChainError::InsufficientFunds { .. })));
    assert_eq!(h.chain.sent_count(), 0);
  }

  #[tokio::test]
  async fn deploy_transactions_carry_bytecode() {
    let h = Harness::new();
    h.build(PROJECT, &[]).await;
    let (sender, tx) = &h.chain.sent()[0];
    assert_eq!(sender, &h.chain.deployer());
    assert!(matches!(&tx.payload, TxPayload::Deploy { bytecode, .. } if bytecode.starts_with("0x60")));
  }

  #[tokio::test]
  async fn plan_reports_statuses() {
    let h = Harness::new();
    h.build(PROJECT, &[]).await;

    let changed = format!("{PROJECT}\n[contract.E]\nartifact = \"A\"\n");
    let definition = Definition::from_toml_str(&changed).unwrap();
    let mut options = BTreeMap::new();
    options.insert("label".to_string(), "two".to_string());

    let plan = h.builder("1.0.0").plan(&definition, &options).await.unwrap();
    let statuses: Vec<(String, PlanStatus)> = plan.into_iter().map(|p| (p.step, p.status)).collect();

    assert_eq!(
      statuses,
      vec![
        ("contract.A".to_string(), PlanStatus::Unchanged),
        ("contract.B".to_string(), PlanStatus::Changed),
        ("contract.C".to_string(), PlanStatus::Pending),
        ("contract.D".to_string(), PlanStatus::Unchanged),
        ("contract.E".to_string(), PlanStatus::New),
      ]
    );
    assert_eq!(h.chain.sent_count(), 4);
  }

  #[tokio::test]
  async fn plan_without_record_is_all_new_or_pending() {
    let h = Harness::new();
    let definition = Definition::from_toml_str(PROJECT).unwrap();
    let plan = h.builder("1.0.0").plan(&definition, &BTreeMap::new()).await.unwrap();
    let statuses: Vec<PlanStatus> = plan.iter().map(|p| p.status).collect();
    assert_eq!(
      statuses,
      vec![PlanStatus::New, PlanStatus::New, PlanStatus::Pending, PlanStatus::New]
    );
  }

  const INVOKE_FIRST: &str = r#"
name = "proj"
version = "1.0.0"

[invoke.mint]
target = "A"
func = "mint"

[contract.A]
artifact = "A"
"#;

  #[tokio::test]
  async fn plan_orders_invoke_after_its_named_target() {
    let h = Harness::new();
    let definition = Definition::from_toml_str(INVOKE_FIRST).unwrap();
    let plan = h.builder("1.0.0").plan(&definition, &BTreeMap::new()).await.unwrap();
    let statuses: Vec<(String, PlanStatus)> = plan.into_iter().map(|p| (p.step, p.status)).collect();

    assert_eq!(
      statuses,
      vec![
        ("contract.A".to_string(), PlanStatus::New),
        ("invoke.mint".to_string(), PlanStatus::Pending),
      ]
    );
  }

  #[tokio::test]
  async fn invoke_declared_before_contract_builds() {
    let h = Harness::new();
    let result = h.build(INVOKE_FIRST, &[]).await;

    assert!(result.is_success(), "{:?}", result.failure);
    assert_eq!(result.executed, ids(&["contract.A", "invoke.mint"]));
    let (_, tx) = &h.chain.sent()[1];
    assert!(matches!(
      &tx.payload,
      TxPayload::Call { to, .. } if *to == result.artifacts.contracts["A"].address
    ));
  }

  #[tokio::test]
  async fn get_outputs_reads_stored_record() {
    let h = Harness::new();
    let pkg = PackageRef::new("proj", "1.0.0");
    assert!(get_outputs(&h.store(), &pkg, CHAIN_ID, "main").unwrap().is_none());

    let result = h.build(PROJECT, &[]).await;
    let outputs = get_outputs(&h.store(), &pkg, CHAIN_ID, "main").unwrap().unwrap();
    assert_eq!(outputs, result.artifacts);
  }
}
