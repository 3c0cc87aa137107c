mod demo;
mod plan;
mod ports;
mod verify;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use readyup_core::config::{ConfigError, ReadyupConfig};

pub use plan::run_plan;
pub use ports::run_ports;
pub use verify::{VerifyOptions, run_verify};

pub const EXIT_READY: u8 = 0;
pub const EXIT_NOT_READY: u8 = 1;
pub const EXIT_PREFLIGHT: u8 = 2;
pub const EXIT_CONFIG: u8 = 3;

/// Load an explicit config file, or discover one from the working directory
pub fn load(config: Option<&Path>) -> Result<(PathBuf, ReadyupConfig), ConfigError> {
    let (path, config) = match config {
        Some(path) => (path.to_path_buf(), ReadyupConfig::load(path)?),
        None => ReadyupConfig::discover(&std::env::current_dir()?)?,
    };
    tracing::info!(path = %path.display(), "loaded config");
    Ok((path, config))
}

pub fn config_failure(err: &ConfigError) -> ExitCode {
    eprintln!("Error: {}", err);
    if matches!(err, ConfigError::NotFound { .. }) {
        eprintln!("  Create a readyup.yml, pass --config, or try `readyup verify --demo`");
    }
    ExitCode::from(EXIT_CONFIG)
}
