//! Implementation of the `cannon list` command.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;

use cannon_lib::definition::PackageRef;

use crate::output::{print_info, print_json, symbols};

pub fn cmd_list(package: Option<&str>, packages_dir: Option<&Path>, json: bool) -> Result<()> {
  let store = super::open_store(packages_dir);

  match package {
    Some(reference) => {
      let package = PackageRef::parse(reference)?;
      let deployments = store.list(&package).context("Failed to list deployments")?;

      if json {
        let items: Vec<_> = deployments
          .iter()
          .map(|(chain_id, preset)| json!({ "chainId": chain_id, "preset": preset }))
          .collect();
        return print_json(&items);
      }

      if deployments.is_empty() {
        print_info(&format!("No deployments of {package}"));
        return Ok(());
      }
      for (chain_id, preset) in deployments {
        println!("{} {package} chain {chain_id} preset {preset}", symbols::INFO);
      }
    }
    None => {
      let packages = store.list_packages().context("Failed to list packages")?;

      if json {
        let items: Vec<_> = packages.iter().map(ToString::to_string).collect();
        return print_json(&items);
      }

      if packages.is_empty() {
        print_info(&format!("No packages in {}", store.root().display()));
        return Ok(());
      }
      for package in packages {
        println!("{} {package}", symbols::INFO);
      }
    }
  }

  Ok(())
}
