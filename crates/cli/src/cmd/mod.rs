mod inspect;
mod list;
mod plan;

use std::path::Path;

use cannon_lib::deployment::DeploymentStore;

pub use inspect::cmd_inspect;
pub use list::cmd_list;
pub use plan::{PlanOptions, cmd_plan};

fn open_store(packages_dir: Option<&Path>) -> DeploymentStore {
  match packages_dir {
    Some(dir) => DeploymentStore::new(dir),
    None => DeploymentStore::default_store(),
  }
}
