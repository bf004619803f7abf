//! Implementation of the `cannon inspect` command.

use std::path::Path;

use anyhow::{Context, Result, bail};

use cannon_lib::builder::get_outputs;
use cannon_lib::context::Artifacts;
use cannon_lib::definition::PackageRef;
use cannon_lib::deployment::write_deployments;

use crate::output::{print_json, print_stat, print_success, symbols};

pub fn cmd_inspect(
  package: &str,
  chain_id: u64,
  preset: &str,
  deployments_dir: Option<&Path>,
  packages_dir: Option<&Path>,
  json: bool,
) -> Result<()> {
  let package = PackageRef::parse(package)?;
  let store = super::open_store(packages_dir);

  let Some(outputs) = get_outputs(&store, &package, chain_id, preset).context("Failed to read deployment")?
  else {
    bail!("no deployment of {package} for chain {chain_id} preset {preset}");
  };

  if let Some(dir) = deployments_dir {
    let written = write_deployments(&outputs, dir)
      .with_context(|| format!("Failed to write deployments to {}", dir.display()))?;
    if !json {
      print_success(&format!("Wrote {} deployment files to {}", written.len(), dir.display()));
    }
  }

  if json {
    return print_json(&outputs);
  }

  print_success(&format!("{package} (chain {chain_id}, preset {preset})"));
  print_artifacts(&outputs, 1);
  Ok(())
}

fn print_artifacts(artifacts: &Artifacts, depth: usize) {
  let indent = "  ".repeat(depth);

  for (name, contract) in &artifacts.contracts {
    println!("{indent}{} {name}", symbols::INFO);
    print_stat(depth + 1, "address", &contract.address);
    if let Some(hash) = &contract.deploy_txn_hash {
      print_stat(depth + 1, "deployed in", hash);
    }
  }

  for (name, txn) in &artifacts.txns {
    println!("{indent}{} {name}", symbols::ARROW);
    print_stat(depth + 1, "hash", &txn.hash);
    print_stat(depth + 1, "block", txn.block_number);
  }

  for (name, import) in &artifacts.imports {
    println!("{indent}{} import {name}", symbols::INFO);
    print_artifacts(import, depth + 1);
  }
}
