//! The single-threaded owner of an entry's delegates, result and proxy.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};

use super::launch::launch_server;
use super::{EntryState, EntryTask, ProxyCacheEntry};
use crate::channel::ServerLauncher;
use crate::proxy::delegate::same_delegate;
use crate::proxy::{AutomationProxy, DelegateRef, LaunchParams, LaunchResult};

enum Flow {
    Continue,
    Stop,
}

pub(super) struct EntryWorker {
    entry: Arc<ProxyCacheEntry>,
    rx: mpsc::UnboundedReceiver<EntryTask>,
    launcher: Arc<dyn ServerLauncher>,
    /// Attached delegates in attach order.
    delegates: Vec<DelegateRef>,
    /// Cached outcome replayed to late joiners.
    launch_result: Option<LaunchResult>,
    proxy: Option<Arc<AutomationProxy>>,
}

impl EntryWorker {
    pub(super) fn new(
        entry: Arc<ProxyCacheEntry>,
        rx: mpsc::UnboundedReceiver<EntryTask>,
        launcher: Arc<dyn ServerLauncher>,
    ) -> Self {
        Self {
            entry,
            rx,
            launcher,
            delegates: Vec::new(),
            launch_result: None,
            proxy: None,
        }
    }

    pub(super) async fn run(mut self) {
        let _ = self.entry.worker_id.set(std::thread::current().id());

        while let Some(task) = self.rx.recv().await {
            if let Flow::Stop = self.handle(task).await {
                return;
            }
        }

        // The gate still holds a sender, so this only happens if the entry
        // was dropped without a final release.
        self.teardown().await;
    }

    async fn handle(&mut self, task: EntryTask) -> Flow {
        match task {
            EntryTask::Launch { params, delegate } => {
                self.launch(params, delegate).await;
                Flow::Continue
            }
            EntryTask::AddDelegate(delegate) => {
                self.add_delegate(delegate);
                Flow::Continue
            }
            EntryTask::RemoveDelegate { delegate, done } => {
                self.remove_delegate(delegate, done).await
            }
            EntryTask::ChannelError(reason) => {
                self.on_channel_error(&reason);
                Flow::Continue
            }
        }
    }

    async fn launch(&mut self, params: LaunchParams, delegate: DelegateRef) {
        self.entry.record_launch_attempt();

        let weak = Arc::downgrade(&self.entry);
        let (result, proxy) = launch_server(&params, self.launcher.as_ref(), move |reason| {
            if let Some(entry) = weak.upgrade() {
                // Fails only while tearing down, when the error is moot
                let _ = entry.post(EntryTask::ChannelError(reason.to_string()));
            }
        })
        .await;

        self.launch_result = Some(result);
        self.proxy = proxy;
        self.entry.set_state(if result.is_success() {
            EntryState::Ready
        } else {
            EntryState::Failed
        });

        self.delegates.push(delegate);
        let proxy = self.result_proxy();
        for delegate in self.delegates.clone() {
            delegate.launch_complete(proxy.clone(), result);
        }
    }

    /// The proxy as handed to delegates: only while the result is success.
    fn result_proxy(&self) -> Option<Arc<AutomationProxy>> {
        match self.launch_result {
            Some(LaunchResult::Success) => self.proxy.clone(),
            _ => None,
        }
    }

    fn position(&self, delegate: &DelegateRef) -> Option<usize> {
        self.delegates.iter().position(|d| same_delegate(d, delegate))
    }

    fn add_delegate(&mut self, delegate: DelegateRef) {
        if self.position(&delegate).is_some() {
            warn!(
                target: "automation_proxy::entry",
                "Delegate already attached to profile {}, ignoring",
                self.entry.profile()
            );
            return;
        }

        self.delegates.push(Arc::clone(&delegate));
        if let Some(result) = self.launch_result {
            delegate.launch_complete(self.result_proxy(), result);
        }
    }

    async fn remove_delegate(&mut self, delegate: DelegateRef, done: oneshot::Sender<bool>) -> Flow {
        let Some(position) = self.position(&delegate) else {
            warn!(
                target: "automation_proxy::entry",
                "Release of a delegate not attached to profile {}",
                self.entry.profile()
            );
            let _ = done.send(false);
            return Flow::Continue;
        };

        if self.delegates.len() > 1 {
            self.delegates.remove(position);
            let _ = done.send(false);
            return Flow::Continue;
        }

        // Last delegate. Finish whatever was posted before the gate closes;
        // the departing delegate still sees those notifications.
        loop {
            if self.delegates.len() > 1 {
                self.detach(&delegate);
                let _ = done.send(false);
                return Flow::Continue;
            }
            match self.entry.next_or_close(&mut self.rx) {
                Some(task) => self.handle_drained(task, &delegate),
                None => break,
            }
        }

        self.detach(&delegate);
        self.teardown().await;
        let _ = done.send(true);
        Flow::Stop
    }

    /// Handle a task that arrived while the last delegate was leaving.
    fn handle_drained(&mut self, task: EntryTask, departing: &DelegateRef) {
        debug!(
            target: "automation_proxy::entry",
            "Draining {} for profile {} before teardown",
            task.kind(),
            self.entry.profile()
        );
        match task {
            EntryTask::AddDelegate(delegate) => self.add_delegate(delegate),
            EntryTask::ChannelError(reason) => self.on_channel_error(&reason),
            EntryTask::RemoveDelegate { delegate, done } => {
                if same_delegate(&delegate, departing) {
                    warn!(
                        target: "automation_proxy::entry",
                        "Delegate released twice from profile {}",
                        self.entry.profile()
                    );
                } else if !self.detach(&delegate) {
                    warn!(
                        target: "automation_proxy::entry",
                        "Release of a delegate not attached to profile {}",
                        self.entry.profile()
                    );
                }
                let _ = done.send(false);
            }
            EntryTask::Launch { .. } => {
                warn!(
                    target: "automation_proxy::entry",
                    "Unexpected second launch for profile {}, ignoring",
                    self.entry.profile()
                );
            }
        }
    }

    fn detach(&mut self, delegate: &DelegateRef) -> bool {
        match self.position(delegate) {
            Some(position) => {
                self.delegates.remove(position);
                true
            }
            None => false,
        }
    }

    fn on_channel_error(&mut self, reason: &str) {
        if self.entry.state() != EntryState::Ready {
            debug!(
                target: "automation_proxy::entry",
                "Ignoring channel error for profile {} in state {:?}: {}",
                self.entry.profile(),
                self.entry.state(),
                reason
            );
            return;
        }

        warn!(
            target: "automation_proxy::entry",
            "Automation server for profile {} died: {}",
            self.entry.profile(),
            reason
        );
        self.launch_result = Some(LaunchResult::ServerCrashed);
        self.entry.set_state(EntryState::Failed);

        for delegate in self.delegates.clone() {
            delegate.server_died();
        }
    }

    async fn teardown(&mut self) {
        if let Some(proxy) = self.proxy.take() {
            proxy.shutdown().await;
        }
        self.delegates.clear();
        self.entry.set_state(EntryState::TornDown);
        info!(
            target: "automation_proxy::entry",
            "Proxy for profile {} torn down",
            self.entry.profile()
        );
    }
}
