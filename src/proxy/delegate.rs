//! Launch notifications delivered to the clients of a proxy.

use std::fmt;
use std::sync::Arc;

use super::AutomationProxy;

/// Outcome of launching the automation server for a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaunchResult {
    Success,
    /// The server process could not be started
    LaunchFailed,
    /// The server did not say hello within the launch timeout
    Timeout,
    /// The channel was lost during the handshake or after launch
    ServerCrashed,
    /// The server reported a version other than the expected one
    VersionMismatch,
}

impl LaunchResult {
    pub fn is_success(self) -> bool {
        self == LaunchResult::Success
    }
}

impl fmt::Display for LaunchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LaunchResult::Success => "success",
            LaunchResult::LaunchFailed => "launch failed",
            LaunchResult::Timeout => "launch timed out",
            LaunchResult::ServerCrashed => "server crashed",
            LaunchResult::VersionMismatch => "version mismatch",
        };
        f.write_str(text)
    }
}

/// Client of a shared proxy.
///
/// Callbacks run on the proxy entry's worker thread, in the order the
/// delegates were attached. They must not call
/// `ProxyFactory::release_proxy` synchronously; post the release elsewhere
/// instead.
pub trait LaunchDelegate: Send + Sync {
    /// The launch finished. `proxy` is present only on `LaunchResult::Success`.
    fn launch_complete(&self, proxy: Option<Arc<AutomationProxy>>, result: LaunchResult);

    /// The server went away after a successful launch.
    fn server_died(&self);
}

/// Shared reference to a delegate. Identity is the pointer, not the value.
pub type DelegateRef = Arc<dyn LaunchDelegate>;

pub(crate) fn same_delegate(a: &DelegateRef, b: &DelegateRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
