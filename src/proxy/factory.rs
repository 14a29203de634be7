//! The process-wide cache of automation proxies.
//!
//! One entry per `ProfileIdentity`. The first caller for a profile launches
//! its server; later callers share the entry and are replayed the cached
//! launch result. The entry is torn down when its last delegate is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, error, warn};
use tokio::sync::oneshot;

use super::entry::{EntryTask, ProxyCacheEntry, ProxyHandle};
use super::{DelegateRef, LaunchParams, ProfileIdentity};
use crate::channel::{ProcessLauncher, ServerLauncher};
use crate::error::{LockResultExt, ProxyError, ProxyResult};

/// What a successful release did to the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other delegates remain attached
    Retained,
    /// The released delegate was the last; the entry is gone
    LastDelegate,
}

pub struct ProxyFactory {
    registry: Mutex<HashMap<ProfileIdentity, Arc<ProxyCacheEntry>>>,
    launcher: Arc<dyn ServerLauncher>,
}

impl ProxyFactory {
    pub fn new(launcher: Arc<dyn ServerLauncher>) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            launcher,
        }
    }

    /// Factory that starts servers as child processes.
    pub fn with_process_launcher() -> Self {
        Self::new(Arc::new(ProcessLauncher))
    }

    /// Attach `delegate` to the proxy for `params.profile`, launching the
    /// server if no live entry exists.
    ///
    /// Returns immediately. The delegate's `launch_complete` fires on the
    /// entry's worker once the launch finishes, or right away on the worker
    /// if it already has.
    pub fn get_or_create_proxy(
        &self,
        delegate: DelegateRef,
        params: LaunchParams,
    ) -> ProxyResult<ProxyHandle> {
        let mut registry = self
            .registry
            .lock()
            .recover_poison("ProxyFactory::get_or_create_proxy");

        if let Some(entry) = registry.get(&params.profile) {
            match entry.post(EntryTask::AddDelegate(Arc::clone(&delegate))) {
                Ok(()) => {
                    debug!(
                        target: "automation_proxy::factory",
                        "Reusing proxy for profile {}",
                        params.profile
                    );
                    return Ok(ProxyHandle::new(Arc::clone(entry)));
                }
                Err(_) => {
                    // Tearing down; its release has not forgotten it yet
                    debug!(
                        target: "automation_proxy::factory",
                        "Proxy for profile {} is tearing down, replacing",
                        params.profile
                    );
                }
            }
        }

        let profile = params.profile.clone();
        let entry = ProxyCacheEntry::spawn(params, delegate, Arc::clone(&self.launcher))?;
        registry.insert(profile.clone(), Arc::clone(&entry));
        debug!(
            target: "automation_proxy::factory",
            "Created proxy for profile {}",
            profile
        );
        Ok(ProxyHandle::new(entry))
    }

    /// Detach `delegate` from the proxy behind `handle`.
    ///
    /// Resolves once the worker has processed the removal, and for the last
    /// delegate, once the connection is released and the worker has exited.
    /// Must not be called from a delegate callback.
    pub async fn release_proxy(
        &self,
        handle: &ProxyHandle,
        delegate: &DelegateRef,
    ) -> ProxyResult<ReleaseOutcome> {
        let done = self.post_release(handle, delegate)?;
        let last = done.await.map_err(|_| entry_gone(handle))?;
        if !last {
            return Ok(ReleaseOutcome::Retained);
        }

        self.forget(handle.entry());
        let entry = Arc::clone(handle.entry());
        if let Err(e) = tokio::task::spawn_blocking(move || entry.join_worker()).await {
            error!(
                target: "automation_proxy::factory",
                "Joining worker for profile {} failed: {}",
                handle.profile(),
                e
            );
        }
        Ok(ReleaseOutcome::LastDelegate)
    }

    /// Blocking form of `release_proxy` for callers outside any runtime.
    ///
    /// Fails with `BlockingInRuntime`, without detaching anything, when called
    /// from within an async execution context. That includes a delegate
    /// callback of one entry releasing another; use `release_proxy` there.
    pub fn release_proxy_blocking(
        &self,
        handle: &ProxyHandle,
        delegate: &DelegateRef,
    ) -> ProxyResult<ReleaseOutcome> {
        reject_worker_caller(handle.entry())?;
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(ProxyError::BlockingInRuntime {
                profile: handle.profile().to_string(),
            });
        }

        let done = self.post_release(handle, delegate)?;
        let last = done.blocking_recv().map_err(|_| entry_gone(handle))?;
        if !last {
            return Ok(ReleaseOutcome::Retained);
        }

        self.forget(handle.entry());
        handle.entry().join_worker();
        Ok(ReleaseOutcome::LastDelegate)
    }

    fn post_release(
        &self,
        handle: &ProxyHandle,
        delegate: &DelegateRef,
    ) -> ProxyResult<oneshot::Receiver<bool>> {
        let entry = handle.entry();
        reject_worker_caller(entry)?;

        let (done, rx) = oneshot::channel();
        entry.post(EntryTask::RemoveDelegate {
            delegate: Arc::clone(delegate),
            done,
        })?;
        Ok(rx)
    }

    /// Drop the registry slot for `entry` unless it was already replaced.
    fn forget(&self, entry: &Arc<ProxyCacheEntry>) {
        let mut registry = self.registry.lock().recover_poison("ProxyFactory::forget");
        let current = registry.get(entry.profile());
        if current.is_some_and(|current| Arc::ptr_eq(current, entry)) {
            registry.remove(entry.profile());
        }
    }

    pub fn entry_count(&self) -> usize {
        self.registry
            .lock()
            .recover_poison("ProxyFactory::entry_count")
            .len()
    }

    pub fn contains(&self, profile: &ProfileIdentity) -> bool {
        self.registry
            .lock()
            .recover_poison("ProxyFactory::contains")
            .contains_key(profile)
    }
}

/// The worker would wait on itself.
fn reject_worker_caller(entry: &ProxyCacheEntry) -> ProxyResult<()> {
    if entry.is_worker_thread() {
        return Err(ProxyError::ReleaseFromWorker {
            profile: entry.profile().to_string(),
        });
    }
    Ok(())
}

fn entry_gone(handle: &ProxyHandle) -> ProxyError {
    ProxyError::EntryGone {
        profile: handle.profile().to_string(),
    }
}

impl Default for ProxyFactory {
    fn default() -> Self {
        Self::with_process_launcher()
    }
}

impl Drop for ProxyFactory {
    fn drop(&mut self) {
        let registry = self.registry.lock().recover_poison("ProxyFactory::drop");
        for (profile, entry) in registry.iter() {
            warn!(
                target: "automation_proxy::factory",
                "Proxy for profile {} leaked with state {:?}",
                profile,
                entry.state()
            );
        }
    }
}
