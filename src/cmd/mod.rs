//! CLI command implementations.
//!
//! | Module     | Commands handled                   |
//! |------------|------------------------------------|
//! | `task`     | `Create`, `Status`                 |
//! | `run`      | `Run`                              |
//! | `control`  | `Approve`, `Cancel`, `Directive`   |
//! | `config`   | `Config`                           |

pub mod config;
pub mod control;
pub mod run;
pub mod task;

pub use config::cmd_config;
pub use control::{cmd_approve, cmd_cancel, cmd_directive};
pub use run::{RunArgs, cmd_run};
pub use task::{cmd_create, cmd_status};

use anyhow::Result;
use conductor::conductor_config::ConductorConfig;
use conductor::store::SqliteTaskStore;
use std::path::Path;
use std::sync::Arc;

/// Load config and open the task database, creating `.conductor/` on first use.
pub(crate) fn open_store(project_dir: &Path) -> Result<(ConductorConfig, Arc<SqliteTaskStore>)> {
    let config = ConductorConfig::new(project_dir.to_path_buf())?;
    config.ensure_directories()?;
    let store = SqliteTaskStore::open(&config.db_path())?;
    Ok((config, Arc::new(store)))
}
