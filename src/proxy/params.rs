//! Per-profile launch parameters.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::ProcessDescriptor;

/// Default bound on the launch handshake.
pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Launches slower than this are logged as warnings.
pub const DEFAULT_SLOW_LAUNCH_WARNING: Duration = Duration::from_millis(1000);

/// Key under which proxies are cached. At most one live entry per identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileIdentity(String);

impl ProfileIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProfileIdentity {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ProfileIdentity {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for ProfileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the first `get_or_create_proxy` for a profile launches with.
///
/// Later callers for the same profile share the existing entry; their
/// parameters apart from `profile` are ignored.
#[derive(Debug, Clone)]
pub struct LaunchParams {
    pub profile: ProfileIdentity,
    pub process: ProcessDescriptor,
    pub launch_timeout: Duration,
    /// Version the server must report in its hello. `None` accepts any.
    pub expected_version: Option<String>,
    pub slow_launch_warning: Duration,
}

impl LaunchParams {
    pub fn new(profile: impl Into<ProfileIdentity>, process: ProcessDescriptor) -> Self {
        Self {
            profile: profile.into(),
            process,
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
            expected_version: None,
            slow_launch_warning: DEFAULT_SLOW_LAUNCH_WARNING,
        }
    }

    pub fn with_launch_timeout(mut self, timeout: Duration) -> Self {
        self.launch_timeout = timeout;
        self
    }

    pub fn with_expected_version(mut self, version: impl Into<String>) -> Self {
        self.expected_version = Some(version.into());
        self
    }

    pub fn with_slow_launch_warning(mut self, threshold: Duration) -> Self {
        self.slow_launch_warning = threshold;
        self
    }
}
