//! Persistent deployment records.
//!
//! A record is written only after a build succeeds, and always as a whole:
//! readers see either the previous manifest or the new one.

mod export;
mod lock;
mod storage;
mod types;

pub use export::write_deployments;
pub use lock::{LockError, LockMetadata, PackageLock};
pub use storage::DeploymentStore;
pub use types::{DeploymentError, DeploymentInfo, DeploymentManifest, DeploymentRecord};
