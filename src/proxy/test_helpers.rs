//! Shared test utilities for proxy tests.
//!
//! `FakeLauncher` hands out in-memory transports and gives the test the
//! server side of each; `RecordingDelegate` appends every callback to a
//! shared `EventLog`.
//!
//! Import from submodule tests via `use crate::proxy::test_helpers::*;`

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{DuplexStream, duplex};
use tokio::sync::mpsc;

use crate::channel::{ProcessDescriptor, ServerLauncher, ServerTransport};
use crate::protocol::{FrameReader, Message, write_message};
use crate::proxy::{AutomationProxy, DelegateRef, LaunchDelegate, LaunchResult};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// The test's end of a fake server. Dropping it closes the channel.
pub(crate) struct FakeServer {
    reader: FrameReader<DuplexStream>,
    writer: DuplexStream,
}

impl FakeServer {
    pub(crate) async fn say_hello(&mut self, version: Option<&str>) {
        self.send(&Message::hello(version)).await;
    }

    pub(crate) async fn send(&mut self, message: &Message) {
        write_message(&mut self.writer, message)
            .await
            .expect("fake server write");
    }

    pub(crate) async fn recv(&mut self) -> Message {
        tokio::time::timeout(WAIT_LIMIT, self.reader.read_message())
            .await
            .expect("message from proxy in time")
            .expect("fake server read")
    }
}

pub(crate) struct FakeLauncher {
    launches: AtomicUsize,
    fail: bool,
    tx: mpsc::UnboundedSender<FakeServer>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeServer>>,
}

impl FakeLauncher {
    pub(crate) fn new() -> Arc<Self> {
        Self::build(false)
    }

    /// Launcher whose every launch fails as if the binary were missing.
    pub(crate) fn failing() -> Arc<Self> {
        Self::build(true)
    }

    fn build(fail: bool) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            launches: AtomicUsize::new(0),
            fail,
            tx,
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    pub(crate) fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Server side of the next launch.
    pub(crate) async fn next_server(&self) -> FakeServer {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(WAIT_LIMIT, rx.recv())
            .await
            .expect("launch in time")
            .expect("launcher alive")
    }
}

impl ServerLauncher for FakeLauncher {
    fn launch(&self, descriptor: &ProcessDescriptor) -> io::Result<ServerTransport> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: not found", descriptor.program),
            ));
        }

        let (client_read, server_write) = duplex(64 * 1024);
        let (server_read, client_write) = duplex(64 * 1024);
        let _ = self.tx.send(FakeServer {
            reader: FrameReader::new(server_read),
            writer: server_write,
        });
        Ok(ServerTransport::new(client_read, client_write))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    /// Delegate name, result, whether a proxy was supplied
    LaunchComplete(&'static str, LaunchResult, bool),
    ServerDied(&'static str),
}

#[derive(Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    /// Wait until at least `count` events have been recorded.
    pub(crate) async fn wait_for(&self, count: usize) {
        let reached = tokio::time::timeout(WAIT_LIMIT, async {
            while self.0.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            reached.is_ok(),
            "expected {} events, got {:?}",
            count,
            self.events()
        );
    }
}

pub(crate) struct RecordingDelegate {
    name: &'static str,
    log: EventLog,
    proxy: Mutex<Option<Arc<AutomationProxy>>>,
}

impl RecordingDelegate {
    pub(crate) fn new(name: &'static str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            name,
            log: log.clone(),
            proxy: Mutex::new(None),
        })
    }

    pub(crate) fn as_ref_dyn(self: &Arc<Self>) -> DelegateRef {
        Arc::clone(self) as DelegateRef
    }

    /// The proxy from the most recent successful `launch_complete`.
    pub(crate) fn proxy(&self) -> Option<Arc<AutomationProxy>> {
        self.proxy.lock().unwrap().clone()
    }
}

impl LaunchDelegate for RecordingDelegate {
    fn launch_complete(&self, proxy: Option<Arc<AutomationProxy>>, result: LaunchResult) {
        let has_proxy = proxy.is_some();
        if proxy.is_some() {
            *self.proxy.lock().unwrap() = proxy;
        }
        self.log
            .push(Event::LaunchComplete(self.name, result, has_proxy));
    }

    fn server_died(&self) {
        self.log.push(Event::ServerDied(self.name));
    }
}
