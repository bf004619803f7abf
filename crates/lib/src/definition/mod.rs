//! Deployment definitions.
//!
//! A definition is a TOML document naming a package, its settings and a set
//! of steps grouped by kind:
//!
//! ```toml
//! name = "token"
//! version = "1.0.0"
//!
//! [setting.supply]
//! defaultValue = "1000"
//!
//! [contract.Token]
//! artifact = "Token"
//! args = ["<%= settings.supply %>"]
//!
//! [invoke.mint]
//! target = "Token"
//! func = "mint"
//! args = ["<%= contracts.Token.address %>"]
//! ```

mod dag;
mod types;

pub use dag::DependencyGraph;
pub use types::{Definition, DefinitionError, PackageRef, SettingDef, Step};
