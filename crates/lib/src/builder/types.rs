use std::collections::BTreeMap;

use thiserror::Error;

use crate::consts::DEFAULT_PRESET;
use crate::context::Artifacts;
use crate::definition::{DefinitionError, PackageRef};
use crate::deployment::DeploymentError;
use crate::steps::StepError;
use crate::util::hash::Fingerprint;

/// Whether a successful build is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
  #[default]
  Persist,
  /// Dry runs and nested imports.
  None,
}

/// What to build and where.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub package: PackageRef,
  pub chain_id: u64,
  pub preset: String,
  pub write_mode: WriteMode,
  /// Ignore any stored record and run every step.
  pub wipe: bool,
  /// Start from another package's record on the same chain and preset.
  pub upgrade_from: Option<PackageRef>,
}

impl EngineConfig {
  pub fn new(package: PackageRef, chain_id: u64) -> Self {
    Self {
      package,
      chain_id,
      preset: DEFAULT_PRESET.to_string(),
      write_mode: WriteMode::Persist,
      wipe: false,
      upgrade_from: None,
    }
  }
}

/// Observable progress of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildState {
  Initialized,
  /// Injecting and fingerprinting a step.
  Resolving(String),
  /// Reusing stored artifacts of a step.
  Cached(String),
  Executing(String),
  Completed,
  Failed(String),
}

impl std::fmt::Display for BuildState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      BuildState::Initialized => write!(f, "initialized"),
      BuildState::Resolving(step) => write!(f, "resolving {step}"),
      BuildState::Cached(step) => write!(f, "cached {step}"),
      BuildState::Executing(step) => write!(f, "executing {step}"),
      BuildState::Completed => write!(f, "completed"),
      BuildState::Failed(step) => write!(f, "failed at {step}"),
    }
  }
}

/// The step that stopped a build.
#[derive(Debug)]
pub struct StepFailure {
  pub step: String,
  pub error: StepError,
}

/// Outcome of `ChainBuilder::build`.
///
/// On failure the result still carries everything produced before the
/// failing step.
#[derive(Debug, Default)]
pub struct BuildResult {
  /// Merged artifacts of all completed steps.
  pub artifacts: Artifacts,
  pub step_states: BTreeMap<String, Fingerprint>,
  pub step_artifacts: BTreeMap<String, Artifacts>,
  /// Steps whose `exec` ran, in order.
  pub executed: Vec<String>,
  /// Steps that reused stored artifacts, in order.
  pub cached: Vec<String>,
  pub failure: Option<StepFailure>,
}

impl BuildResult {
  pub fn is_success(&self) -> bool {
    self.failure.is_none()
  }

  /// The merged artifacts, or the step failure as an error.
  pub fn into_artifacts(self) -> Result<Artifacts, BuildError> {
    match self.failure {
      None => Ok(self.artifacts),
      Some(StepFailure { step, error }) => Err(BuildError::StepExecution { step, source: error }),
    }
  }
}

/// Status of a step in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
  /// Same fingerprint as the stored record.
  Unchanged,
  /// Stored with a different fingerprint.
  Changed,
  /// Not in the stored record.
  New,
  /// Depends on a step that will execute, so its inputs are not known yet.
  Pending,
}

impl std::fmt::Display for PlanStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      PlanStatus::Unchanged => "unchanged",
      PlanStatus::Changed => "changed",
      PlanStatus::New => "new",
      PlanStatus::Pending => "pending",
    };
    write!(f, "{s}")
  }
}

#[derive(Debug, Clone)]
pub struct PlannedStep {
  pub step: String,
  pub status: PlanStatus,
  /// `None` for pending steps.
  pub fingerprint: Option<Fingerprint>,
}

#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Definition(#[from] DefinitionError),

  #[error(transparent)]
  Deployment(#[from] DeploymentError),

  #[error("unknown step kind '{0}'")]
  UnknownKind(String),

  #[error("step {step} failed: {source}")]
  StepExecution {
    step: String,
    #[source]
    source: StepError,
  },
}
