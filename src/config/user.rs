//! Location of the user configuration file.
//!
//! $XDG_CONFIG_HOME/automation-proxy/automation-proxy.toml when the variable
//! is set, otherwise the platform config directory from `dirs`.

use std::path::PathBuf;

const APP_DIR: &str = "automation-proxy";
const FILE_NAME: &str = "automation-proxy.toml";

/// Returns the path to the user configuration file, or `None` if no config
/// directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(xdg) if !xdg.is_empty() => PathBuf::from(xdg),
        _ => dirs::config_dir()?,
    };
    Some(base.join(APP_DIR).join(FILE_NAME))
}
