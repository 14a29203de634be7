//! Serde shapes of the configuration file.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Default bound on the launch handshake, in milliseconds
    #[serde(default)]
    pub launch_timeout_ms: Option<u64>,
    /// Launches slower than this are logged as warnings, in milliseconds
    #[serde(default)]
    pub slow_launch_warning_ms: Option<u64>,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileSettings>,
}

/// One `[profiles.NAME]` table. Unset values fall back to the top level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSettings {
    /// Program followed by its arguments
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub current_dir: Option<PathBuf>,
    #[serde(default)]
    pub expected_version: Option<String>,
    #[serde(default)]
    pub launch_timeout_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_profiles_with_defaults() {
        let toml_str = r#"
            launch_timeout_ms = 10000

            [profiles.default]
            command = ["automation-server", "--channel", "stdio"]
            env = { AUTOMATION_LANG = "en" }
            expected_version = "1.4.0"
        "#;

        let settings: ProxySettings = toml::from_str(toml_str).unwrap();

        assert_eq!(settings.launch_timeout_ms, Some(10000));
        assert_eq!(settings.slow_launch_warning_ms, None);
        let profile = &settings.profiles["default"];
        assert_eq!(profile.command, vec!["automation-server", "--channel", "stdio"]);
        assert_eq!(profile.env.get("AUTOMATION_LANG").map(String::as_str), Some("en"));
        assert_eq!(profile.expected_version.as_deref(), Some("1.4.0"));
        assert_eq!(profile.launch_timeout_ms, None);
    }

    #[test]
    fn empty_file_is_valid() {
        let settings: ProxySettings = toml::from_str("").unwrap();
        assert_eq!(settings, ProxySettings::default());
    }

    #[test]
    fn profile_without_command_fails_to_parse() {
        let result: Result<ProxySettings, _> = toml::from_str("[profiles.bare]\nenv = {}\n");
        assert!(result.is_err());
    }
}
