//! Starting a server and waiting for its hello.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::oneshot;

use crate::channel::{Connection, MessageRouter, ServerLauncher, SessionHandler};
use crate::error::LockResultExt;
use crate::protocol::{Message, RoutingId};
use crate::proxy::{AutomationProxy, LaunchParams, LaunchResult};

enum HandshakeSignal {
    Hello { version: Option<String> },
    ChannelLost,
}

/// Control-channel handler that captures the first hello.
///
/// Registered before the connection opens so the hello cannot be missed.
struct HelloWaiter {
    tx: Mutex<Option<oneshot::Sender<HandshakeSignal>>>,
}

impl HelloWaiter {
    fn new() -> (Arc<Self>, oneshot::Receiver<HandshakeSignal>) {
        let (tx, rx) = oneshot::channel();
        let waiter = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
        });
        (waiter, rx)
    }

    fn signal(&self, signal: HandshakeSignal) {
        let tx = self.tx.lock().recover_poison("HelloWaiter::signal").take();
        if let Some(tx) = tx {
            let _ = tx.send(signal);
        }
    }
}

impl SessionHandler for HelloWaiter {
    fn on_message(&self, message: &Message) {
        if message.is_hello() {
            self.signal(HandshakeSignal::Hello {
                version: message.hello_version(),
            });
        } else {
            debug!(
                target: "automation_proxy::entry",
                "Ignoring control message {} during handshake",
                message.name
            );
        }
    }

    fn on_channel_error(&self) {
        self.signal(HandshakeSignal::ChannelLost);
    }
}

/// Launch the server described by `params` and wait for its hello.
///
/// Returns the proxy only on `LaunchResult::Success`; on any other result the
/// connection has already been shut down.
pub(super) async fn launch_server<F>(
    params: &LaunchParams,
    launcher: &dyn ServerLauncher,
    on_channel_error: F,
) -> (LaunchResult, Option<Arc<AutomationProxy>>)
where
    F: Fn(&str) + Send + Sync + 'static,
{
    let profile = &params.profile;
    let started = Instant::now();

    let transport = match launcher.launch(&params.process) {
        Ok(transport) => transport,
        Err(e) => {
            warn!(
                target: "automation_proxy::entry",
                "Failed to launch automation server for profile {}: {}",
                profile,
                e
            );
            return (LaunchResult::LaunchFailed, None);
        }
    };

    let router = Arc::new(MessageRouter::new());
    let (waiter, hello_rx) = HelloWaiter::new();
    // Fresh router, the control id cannot be taken
    let _ = router.register_handler(RoutingId::CONTROL, waiter);

    let connection = Connection::open(transport, Arc::clone(&router), on_channel_error);

    let handshake = tokio::time::timeout(params.launch_timeout, hello_rx).await;
    router.unregister_handler(RoutingId::CONTROL);

    let result = match handshake {
        Err(_) => {
            warn!(
                target: "automation_proxy::entry",
                "Automation server for profile {} did not say hello within {:?}",
                profile,
                params.launch_timeout
            );
            LaunchResult::Timeout
        }
        Ok(Ok(HandshakeSignal::Hello { version })) => {
            check_version(params, version.as_deref())
        }
        Ok(Ok(HandshakeSignal::ChannelLost)) | Ok(Err(_)) => {
            warn!(
                target: "automation_proxy::entry",
                "Automation server for profile {} exited during handshake",
                profile
            );
            LaunchResult::ServerCrashed
        }
    };

    let elapsed = started.elapsed();
    if !result.is_success() {
        debug!(
            target: "automation_proxy::entry",
            "Launch for profile {} ended with {} after {:?}",
            profile,
            result,
            elapsed
        );
        connection.shutdown().await;
        return (result, None);
    }

    if elapsed > params.slow_launch_warning {
        warn!(
            target: "automation_proxy::entry",
            "Slow launch for profile {}: {:?} (threshold {:?})",
            profile,
            elapsed,
            params.slow_launch_warning
        );
    } else {
        info!(
            target: "automation_proxy::entry",
            "Launched automation server for profile {} in {:?}",
            profile,
            elapsed
        );
    }

    let proxy = AutomationProxy::new(profile.clone(), connection);
    (result, Some(Arc::new(proxy)))
}

fn check_version(params: &LaunchParams, reported: Option<&str>) -> LaunchResult {
    match params.expected_version.as_deref() {
        None => LaunchResult::Success,
        Some(expected) if reported == Some(expected) => LaunchResult::Success,
        Some(expected) => {
            warn!(
                target: "automation_proxy::entry",
                "Version mismatch for profile {}: expected {}, server reported {}",
                params.profile,
                expected,
                reported.unwrap_or("nothing")
            );
            LaunchResult::VersionMismatch
        }
    }
}
