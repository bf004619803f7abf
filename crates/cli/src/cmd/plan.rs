//! Implementation of the `cannon plan` command.
//!
//! Parses a definition and compares every step with the stored deployment
//! without touching a chain.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::debug;

use cannon_lib::artifacts::FsArtifactProvider;
use cannon_lib::builder::{ChainBuilder, EngineConfig, PlanStatus, Runtime, WriteMode};
use cannon_lib::chain::OfflineProvider;
use cannon_lib::definition::{Definition, PackageRef};
use cannon_lib::settings::parse_settings;

use crate::output::{print_info, print_json, print_plan_step, print_stat};

pub struct PlanOptions {
  pub file: PathBuf,
  pub settings: Vec<String>,
  pub chain_id: u64,
  pub preset: String,
  pub wipe: bool,
  pub upgrade_from: Option<String>,
  pub artifacts: Option<PathBuf>,
}

pub fn cmd_plan(options: &PlanOptions, packages_dir: Option<&Path>, json: bool) -> Result<()> {
  let definition = Definition::load(&options.file)
    .with_context(|| format!("Failed to load definition: {}", options.file.display()))?;
  let settings = parse_settings(options.settings.as_slice()).context("Invalid settings")?;

  let base_dir = options
    .file
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or(Path::new("."))
    .to_path_buf();
  let artifacts_dir = options.artifacts.clone().unwrap_or_else(|| base_dir.join("artifacts"));
  debug!(base_dir = %base_dir.display(), artifacts = %artifacts_dir.display(), "planning");

  let runtime = Runtime::new(
    Arc::new(OfflineProvider),
    Arc::new(FsArtifactProvider::new(artifacts_dir)),
    super::open_store(packages_dir),
  )
  .with_base_dir(&base_dir);

  let package = definition.package();
  let mut config = EngineConfig::new(package.clone(), options.chain_id);
  config.preset = options.preset.clone();
  config.write_mode = WriteMode::None;
  config.wipe = options.wipe;
  config.upgrade_from = options
    .upgrade_from
    .as_deref()
    .map(PackageRef::parse)
    .transpose()
    .context("Invalid --upgrade-from")?;

  let builder = ChainBuilder::new(runtime, config);
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let planned = rt.block_on(builder.plan(&definition, &settings)).context("Plan failed")?;

  if json {
    let steps: Vec<_> = planned
      .iter()
      .map(|p| json!({ "step": p.step, "status": p.status.to_string(), "fingerprint": p.fingerprint.as_ref().map(|f| &f.0) }))
      .collect();
    return print_json(&json!({
      "package": package.to_string(),
      "chainId": options.chain_id,
      "preset": options.preset,
      "steps": steps,
    }));
  }

  print_info(&format!(
    "Plan: {} (chain {}, preset {})",
    package, options.chain_id, options.preset
  ));
  for step in &planned {
    print_plan_step(&step.step, step.status, step.fingerprint.as_ref().map(|f| f.0.as_str()));
  }

  let cached = planned.iter().filter(|p| p.status == PlanStatus::Unchanged).count();
  println!();
  print_stat(1, "Steps", planned.len());
  print_stat(1, "To execute", planned.len() - cached);
  print_stat(1, "Cached", cached);

  Ok(())
}
