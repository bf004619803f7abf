//! Crate-wide constants.

/// Application name, used for data directories.
pub const APP_NAME: &str = "cannon";

/// Preset used when a build or import does not name one.
pub const DEFAULT_PRESET: &str = "main";

/// File name of the per-package deployment manifest.
pub const DEPLOY_FILENAME: &str = "deploy.json";

/// Current deployment manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// Pseudo-package resolved straight to a content address.
pub const IPFS_PSEUDO_PACKAGE: &str = "@ipfs";

/// Environment variable overriding the packages directory.
pub const PACKAGES_DIR_ENV: &str = "CANNON_DIRECTORY";
