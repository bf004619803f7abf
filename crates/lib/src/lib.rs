//! cannon-lib: build engine and registry for smart-contract deployment packages
//!
//! This crate provides:
//! - `Definition`: a parsed deployment definition and its step graph
//! - `ChainBuilder`: executes steps in dependency order, skipping unchanged ones
//! - `DeploymentStore`: persisted per-chain, per-preset deployment records
//! - `RegistryClient`: on-chain package publication and resolution
//!
//! Chain access and compiled artifacts come from the host through the
//! `ChainProvider` and `ArtifactProvider` traits.

pub mod artifacts;
pub mod builder;
pub mod chain;
pub mod consts;
pub mod context;
pub mod definition;
pub mod deployment;
pub mod platform;
pub mod registry;
pub mod settings;
pub mod steps;
pub mod template;
pub mod util;
