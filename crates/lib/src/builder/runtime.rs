//! Collaborators shared by every step of a build.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::artifacts::ArtifactProvider;
use crate::chain::ChainProvider;
use crate::deployment::DeploymentStore;
use crate::steps::StepRegistry;

/// Default bound on waiting for a single receipt.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Everything a step may touch outside the build context.
///
/// Cloning is cheap; nested import builds share their parent's runtime.
#[derive(Clone)]
pub struct Runtime {
  pub provider: Arc<dyn ChainProvider>,
  pub artifacts: Arc<dyn ArtifactProvider>,
  pub store: DeploymentStore,
  pub registry: Arc<StepRegistry>,
  /// Project directory; `run` steps execute and hash paths relative to it.
  pub base_dir: PathBuf,
  /// Bound on each receipt wait. `None` waits indefinitely.
  pub receipt_timeout: Option<Duration>,
}

impl Runtime {
  pub fn new(provider: Arc<dyn ChainProvider>, artifacts: Arc<dyn ArtifactProvider>, store: DeploymentStore) -> Self {
    Self {
      provider,
      artifacts,
      store,
      registry: Arc::new(StepRegistry::default()),
      base_dir: PathBuf::from("."),
      receipt_timeout: Some(DEFAULT_RECEIPT_TIMEOUT),
    }
  }

  pub fn with_base_dir(mut self, base_dir: &Path) -> Self {
    self.base_dir = base_dir.to_path_buf();
    self
  }
}

impl std::fmt::Debug for Runtime {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Runtime")
      .field("store", &self.store)
      .field("registry", &self.registry)
      .field("base_dir", &self.base_dir)
      .field("receipt_timeout", &self.receipt_timeout)
      .finish_non_exhaustive()
  }
}
