//! CLI command implementations

use std::path::{Path, PathBuf};

use buildd_config::Config;
use color_eyre::eyre::{Context, Result};
use tracing::debug;

pub mod init;
pub mod run;
pub mod validate;

pub use init::InitCommand;
pub use run::RunCommand;
pub use validate::ValidateCommand;

/// Configuration read when no `--config` is given
const DEFAULT_CONFIG_PATH: &str = "/etc/buildd/buildd.yaml";

/// Load the configuration from `path`, the system-wide file, or defaults
pub(crate) fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let system = PathBuf::from(DEFAULT_CONFIG_PATH);
            if !system.exists() {
                debug!("No configuration file, using defaults");
                return Ok(Config::default());
            }
            system
        }
    };

    Config::from_file(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}
