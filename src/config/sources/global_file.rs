//! Global config file source: $XDG_CONFIG_HOME/tamer/config.toml, else the
//! platform config directory.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File, FileFormat};
use std::path::PathBuf;
use tracing::debug;

/// Path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg).join("tamer").join("config.toml"));
    }
    directories::ProjectDirs::from("", "", "tamer")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Add the global config file to the builder if it exists.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let path = match global_config_path() {
        Some(path) => path,
        None => return Ok(builder),
    };
    if !path.exists() {
        debug!(config_path = %path.display(), "No global configuration file");
        return Ok(builder);
    }
    debug!(config_path = %path.display(), "Loading global configuration");
    Ok(builder.add_source(File::from(path).format(FileFormat::Toml).required(false)))
}
