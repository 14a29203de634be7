//! One cached proxy per profile and the worker that owns it.
//!
//! Every state change of an entry happens on its worker thread, in the order
//! tasks were posted. Other threads only post tasks and read the published
//! `EntryState`.
//!
//! # State Machine
//!
//! ```text
//! Launching ──(hello ok)──────────> Ready ──(channel error)──> Failed
//!     │                               │                         │
//!     └──(failed/timeout/mismatch)──> Failed                    │
//!                                     │                         │
//!        (last delegate removed) ─────┴─────────────────────────┴──> TornDown
//! ```

mod launch;
mod worker;

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::thread::{self, JoinHandle, ThreadId};

use log::{debug, error};
use tokio::sync::{mpsc, oneshot};

use super::{DelegateRef, LaunchParams, ProfileIdentity};
use crate::channel::ServerLauncher;
use crate::error::{LockResultExt, ProxyError, ProxyResult};

use worker::EntryWorker;

/// Lifecycle state of a cached proxy entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Server started, waiting for its hello
    Launching,
    /// Handshake complete, proxy available
    Ready,
    /// Launch failed or the server died; the cached result says which
    Failed,
    /// Last delegate removed, connection released
    TornDown,
}

/// Work executed on an entry's worker, strictly in posting order.
pub(crate) enum EntryTask {
    Launch {
        params: LaunchParams,
        delegate: DelegateRef,
    },
    AddDelegate(DelegateRef),
    RemoveDelegate {
        delegate: DelegateRef,
        /// Receives `true` if this removal tore the entry down.
        done: oneshot::Sender<bool>,
    },
    ChannelError(String),
}

impl EntryTask {
    fn kind(&self) -> &'static str {
        match self {
            EntryTask::Launch { .. } => "Launch",
            EntryTask::AddDelegate(_) => "AddDelegate",
            EntryTask::RemoveDelegate { .. } => "RemoveDelegate",
            EntryTask::ChannelError(_) => "ChannelError",
        }
    }
}

pub(crate) struct ProxyCacheEntry {
    profile: ProfileIdentity,
    /// Task queue into the worker. `None` once the worker has committed to
    /// teardown; posting then fails and the factory creates a new entry.
    gate: Mutex<Option<mpsc::UnboundedSender<EntryTask>>>,
    state: RwLock<EntryState>,
    worker_id: OnceLock<ThreadId>,
    worker: Mutex<Option<JoinHandle<()>>>,
    launch_attempts: AtomicUsize,
}

impl ProxyCacheEntry {
    /// Create the entry, queue its launch and start its worker thread.
    pub(crate) fn spawn(
        params: LaunchParams,
        delegate: DelegateRef,
        launcher: Arc<dyn ServerLauncher>,
    ) -> io::Result<Arc<Self>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let profile = params.profile.clone();
        let entry = Arc::new(Self {
            profile: profile.clone(),
            gate: Mutex::new(Some(tx)),
            state: RwLock::new(EntryState::Launching),
            worker_id: OnceLock::new(),
            worker: Mutex::new(None),
            launch_attempts: AtomicUsize::new(0),
        });

        // Queued before the worker exists, so it is always the first task
        entry
            .post(EntryTask::Launch { params, delegate })
            .map_err(|e| io::Error::other(e.to_string()))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let worker = EntryWorker::new(Arc::clone(&entry), rx, launcher);
        let handle = thread::Builder::new()
            .name(format!("automation-proxy:{}", profile))
            .spawn(move || runtime.block_on(worker.run()))?;

        *entry.worker.lock().recover_poison("ProxyCacheEntry::spawn") = Some(handle);
        debug!(
            target: "automation_proxy::entry",
            "Started worker for profile {}",
            profile
        );
        Ok(entry)
    }

    pub(crate) fn profile(&self) -> &ProfileIdentity {
        &self.profile
    }

    /// Queue `task` for the worker.
    ///
    /// Fails with `EntryGone` once the worker has committed to teardown.
    pub(crate) fn post(&self, task: EntryTask) -> ProxyResult<()> {
        let gate = self.gate.lock().recover_poison("ProxyCacheEntry::post");
        let sent = match gate.as_ref() {
            Some(tx) => tx.send(task).is_ok(),
            None => false,
        };
        if sent {
            Ok(())
        } else {
            Err(ProxyError::EntryGone {
                profile: self.profile.to_string(),
            })
        }
    }

    /// Take the next queued task, or close the gate if there is none.
    ///
    /// Checking the queue and closing happen under the gate lock, so no post
    /// can land after the final check.
    fn next_or_close(&self, rx: &mut mpsc::UnboundedReceiver<EntryTask>) -> Option<EntryTask> {
        let mut gate = self
            .gate
            .lock()
            .recover_poison("ProxyCacheEntry::next_or_close");
        match rx.try_recv() {
            Ok(task) => Some(task),
            Err(_) => {
                *gate = None;
                None
            }
        }
    }

    pub(crate) fn state(&self) -> EntryState {
        *self.state.read().recover_poison("ProxyCacheEntry::state")
    }

    fn set_state(&self, state: EntryState) {
        let mut current = self
            .state
            .write()
            .recover_poison("ProxyCacheEntry::set_state");
        if *current != state {
            debug!(
                target: "automation_proxy::entry",
                "Profile {}: {:?} -> {:?}",
                self.profile,
                *current,
                state
            );
            *current = state;
        }
    }

    pub(crate) fn is_worker_thread(&self) -> bool {
        self.worker_id.get() == Some(&thread::current().id())
    }

    fn record_launch_attempt(&self) {
        self.launch_attempts.fetch_add(1, Ordering::SeqCst);
    }

    /// Wait for the worker thread to exit. Blocks the calling thread.
    pub(crate) fn join_worker(&self) {
        let handle = self
            .worker
            .lock()
            .recover_poison("ProxyCacheEntry::join_worker")
            .take();
        let Some(handle) = handle else {
            return;
        };
        if handle.join().is_err() {
            error!(
                target: "automation_proxy::entry",
                "Worker for profile {} panicked",
                self.profile
            );
        }
    }
}

/// A caller's reference to a cached proxy, returned by
/// `ProxyFactory::get_or_create_proxy` and passed back to release it.
#[derive(Clone)]
pub struct ProxyHandle {
    entry: Arc<ProxyCacheEntry>,
}

impl ProxyHandle {
    pub(crate) fn new(entry: Arc<ProxyCacheEntry>) -> Self {
        Self { entry }
    }

    pub(crate) fn entry(&self) -> &Arc<ProxyCacheEntry> {
        &self.entry
    }

    pub fn profile(&self) -> &ProfileIdentity {
        self.entry.profile()
    }

    pub fn state(&self) -> EntryState {
        self.entry.state()
    }

    /// Number of server launches performed by this entry (zero or one).
    pub fn launch_attempts(&self) -> usize {
        self.entry.launch_attempts.load(Ordering::SeqCst)
    }

    /// True once the worker thread has exited.
    pub fn is_worker_finished(&self) -> bool {
        self.entry
            .worker
            .lock()
            .recover_poison("ProxyHandle::is_worker_finished")
            .as_ref()
            .is_none_or(JoinHandle::is_finished)
    }

    /// Whether two handles refer to the same cache entry.
    pub fn same_entry(&self, other: &ProxyHandle) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl std::fmt::Debug for ProxyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyHandle")
            .field("profile", self.profile())
            .field("state", &self.state())
            .finish()
    }
}
