//! Shared, lazily launched automation proxies.
//!
//! `ProxyFactory` keeps one `ProxyCacheEntry` per profile. Each entry owns a
//! worker thread that launches the server, tracks the attached
//! `LaunchDelegate`s and delivers their notifications in order.

mod automation_proxy;
mod delegate;
mod entry;
mod factory;
mod params;
#[cfg(test)]
pub(crate) mod test_helpers;

pub use automation_proxy::AutomationProxy;
pub use delegate::{DelegateRef, LaunchDelegate, LaunchResult};
pub use entry::{EntryState, ProxyHandle};
pub use factory::{ProxyFactory, ReleaseOutcome};
pub use params::{DEFAULT_LAUNCH_TIMEOUT, DEFAULT_SLOW_LAUNCH_WARNING, LaunchParams, ProfileIdentity};
