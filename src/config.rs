//! Configuration: profiles and launch defaults loaded from TOML.

pub mod settings;
pub mod user;

use std::path::Path;
use std::time::Duration;

use log::debug;

pub use settings::{ProfileSettings, ProxySettings};
pub use user::user_config_path;

use crate::channel::ProcessDescriptor;
use crate::error::ConfigError;
use crate::proxy::{DEFAULT_LAUNCH_TIMEOUT, DEFAULT_SLOW_LAUNCH_WARNING, LaunchParams};

/// Validated configuration.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    settings: ProxySettings,
}

impl ProxyConfig {
    /// Parse and validate configuration text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: ProxySettings = toml::from_str(text)?;
        let config = Self { settings };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            target: "automation_proxy::config",
            "Loaded configuration from {}",
            path.display()
        );
        Self::from_toml_str(&text)
    }

    /// Load from the user config path, or an empty configuration if the file
    /// does not exist.
    pub fn load_user() -> Result<Self, ConfigError> {
        match user_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.launch_timeout_ms == Some(0) {
            return Err(ConfigError::ZeroTimeout("<default>".to_string()));
        }
        for (name, profile) in &self.settings.profiles {
            if profile.command.first().is_none_or(|program| program.is_empty()) {
                return Err(ConfigError::MissingCommand(name.clone()));
            }
            if profile.launch_timeout_ms == Some(0) {
                return Err(ConfigError::ZeroTimeout(name.clone()));
            }
        }
        Ok(())
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// Profile names in sorted order.
    pub fn profile_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.settings.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build launch parameters for `profile`, applying top-level defaults.
    pub fn to_launch_params(&self, profile: &str) -> Result<LaunchParams, ConfigError> {
        let settings = self
            .settings
            .profiles
            .get(profile)
            .ok_or_else(|| ConfigError::UnknownProfile(profile.to_string()))?;

        let (program, args) = settings
            .command
            .split_first()
            .ok_or_else(|| ConfigError::MissingCommand(profile.to_string()))?;
        let mut process = ProcessDescriptor::new(program.clone()).args(args.iter().cloned());
        process.env = settings.env.clone();
        process.current_dir = settings.current_dir.clone();

        let launch_timeout = settings
            .launch_timeout_ms
            .or(self.settings.launch_timeout_ms)
            .map_or(DEFAULT_LAUNCH_TIMEOUT, Duration::from_millis);
        let slow_launch_warning = self
            .settings
            .slow_launch_warning_ms
            .map_or(DEFAULT_SLOW_LAUNCH_WARNING, Duration::from_millis);

        let mut params = LaunchParams::new(profile, process)
            .with_launch_timeout(launch_timeout)
            .with_slow_launch_warning(slow_launch_warning);
        params.expected_version = settings.expected_version.clone();
        Ok(params)
    }
}
