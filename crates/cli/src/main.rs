mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cannon_lib::consts::DEFAULT_PRESET;

use crate::cmd::PlanOptions;

#[derive(Parser)]
#[command(name = "cannon")]
#[command(author, version, about = "Build engine and registry for smart-contract deployment packages", long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Directory holding built packages (default: $CANNON_DIRECTORY or the data dir)
  #[arg(long, global = true, value_name = "DIR")]
  packages_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Show which steps of a definition would execute
  Plan {
    /// Path to the definition file
    #[arg(default_value = "cannonfile.toml")]
    file: PathBuf,

    /// Setting overrides as key=value
    settings: Vec<String>,

    #[arg(long, default_value_t = 13370)]
    chain_id: u64,

    #[arg(long, default_value = DEFAULT_PRESET)]
    preset: String,

    /// Ignore the stored deployment
    #[arg(long)]
    wipe: bool,

    /// Compare against another package's deployment (name:version)
    #[arg(long, value_name = "PACKAGE")]
    upgrade_from: Option<String>,

    /// Compiled artifacts directory (default: <definition dir>/artifacts)
    #[arg(long, value_name = "DIR")]
    artifacts: Option<PathBuf>,

    #[arg(long)]
    json: bool,
  },

  /// Print the outputs of a stored deployment
  Inspect {
    /// Package reference (name:version)
    package: String,

    #[arg(long, default_value_t = 13370)]
    chain_id: u64,

    #[arg(long, default_value = DEFAULT_PRESET)]
    preset: String,

    /// Also write <Contract>.json (address and ABI) files into DIR
    #[arg(long, value_name = "DIR")]
    write_deployments: Option<PathBuf>,

    #[arg(long)]
    json: bool,
  },

  /// List stored packages, or the deployments of one package
  List {
    /// Package reference (name:version)
    package: Option<String>,

    #[arg(long)]
    json: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let packages_dir = cli.packages_dir.as_deref();

  match cli.command {
    Commands::Plan {
      file,
      settings,
      chain_id,
      preset,
      wipe,
      upgrade_from,
      artifacts,
      json,
    } => cmd::cmd_plan(
      &PlanOptions {
        file,
        settings,
        chain_id,
        preset,
        wipe,
        upgrade_from,
        artifacts,
      },
      packages_dir,
      json,
    ),
    Commands::Inspect {
      package,
      chain_id,
      preset,
      write_deployments,
      json,
    } => cmd::cmd_inspect(
      &package,
      chain_id,
      &preset,
      write_deployments.as_deref(),
      packages_dir,
      json,
    ),
    Commands::List { package, json } => cmd::cmd_list(package.as_deref(), packages_dir, json),
  }
}
