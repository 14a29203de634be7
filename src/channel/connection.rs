//! Connection to a running automation server.
//!
//! # Architecture
//!
//! - `outbound`: bounded queue drained by the Writer Task
//! - `signal`: the channel's one-shot error latch, shared with both tasks
//! - Reader Task: routes replies to the dispatcher and notifications to the router
//!
//! Request flow:
//! 1. Register the token with the dispatcher (continuation stored)
//! 2. Queue the message for the writer
//! 3. The reader resolves the continuation when the reply arrives
//!
//! Registration comes first so a reply that races ahead of `send_async`
//! returning still finds its continuation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, warn};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::actor::{OUTBOUND_QUEUE_CAPACITY, spawn_reader_task, spawn_writer_task};
use super::dispatcher::{AsyncReplyDispatcher, Continuation};
use super::launcher::{ServerTransport, terminate};
use super::router::MessageRouter;
use crate::error::{CallError, LockResultExt, ProxyError, ProxyResult};
use crate::protocol::{CallToken, Message};

/// Callback fired once when the channel is lost.
pub type ChannelErrorCallback = Box<dyn Fn(&str) + Send + Sync>;

/// One-shot latch for the end of the channel.
///
/// Whichever comes first, a transport failure (`channel_error`) or a
/// deliberate release (`release`), closes the latch; the other becomes a
/// no-op. Only transport failures reach the error callback. Closing the
/// latch also cancels the reader and writer, so nothing is delivered after it.
pub(crate) struct ChannelSignal {
    closed: AtomicBool,
    cancel: CancellationToken,
    dispatcher: Arc<AsyncReplyDispatcher>,
    router: Arc<MessageRouter>,
    on_error: ChannelErrorCallback,
}

impl ChannelSignal {
    pub(crate) fn dispatcher(&self) -> &AsyncReplyDispatcher {
        &self.dispatcher
    }

    pub(crate) fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Raise the channel error. Only the first call has any effect.
    pub(crate) fn channel_error(&self, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(
            target: "automation_proxy::channel",
            "Automation channel lost: {}",
            reason
        );
        self.cancel.cancel();
        self.dispatcher
            .fail_all(CallError::ChannelLost(reason.to_string()));
        self.router.broadcast_channel_error();
        (self.on_error)(reason);
    }

    /// Close the latch without raising an error. Returns `false` if it was
    /// already closed.
    fn release(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        self.dispatcher.fail_all(CallError::Released);
        true
    }
}

/// Live channel to one automation server.
pub struct Connection {
    outbound: mpsc::Sender<Message>,
    signal: Arc<ChannelSignal>,
    router: Arc<MessageRouter>,
    dispatcher: Arc<AsyncReplyDispatcher>,
    next_token: AtomicU64,
    cancel: CancellationToken,
    process: std::sync::Mutex<Option<Child>>,
}

impl Connection {
    /// Start the reader and writer tasks for `transport`.
    ///
    /// Must be called inside a tokio runtime; the tasks live on it. Handlers
    /// that must see the very first messages (the handshake) should be
    /// registered on `router` before calling this.
    pub fn open<F>(transport: ServerTransport, router: Arc<MessageRouter>, on_error: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let dispatcher = Arc::new(AsyncReplyDispatcher::new());
        let cancel = CancellationToken::new();
        let signal = Arc::new(ChannelSignal {
            closed: AtomicBool::new(false),
            cancel: cancel.clone(),
            dispatcher: Arc::clone(&dispatcher),
            router: Arc::clone(&router),
            on_error: Box::new(on_error),
        });
        let (outbound, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);

        spawn_reader_task(transport.reader, Arc::clone(&signal), cancel.child_token());
        spawn_writer_task(transport.writer, rx, Arc::clone(&signal), cancel.child_token());

        Self {
            outbound,
            signal,
            router,
            dispatcher,
            next_token: AtomicU64::new(1),
            cancel,
            process: std::sync::Mutex::new(transport.process),
        }
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn dispatcher(&self) -> &Arc<AsyncReplyDispatcher> {
        &self.dispatcher
    }

    pub fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }

    /// Generate a unique correlation token (1, 2, 3, ...).
    pub fn next_token(&self) -> CallToken {
        CallToken::new(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn enqueue(&self, message: Message) -> ProxyResult<()> {
        if self.signal.is_closed() {
            return Err(ProxyError::ChannelClosed);
        }
        self.outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ProxyError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ProxyError::ChannelClosed,
        })
    }

    /// Send a message that expects no reply.
    pub fn send(&self, message: Message) -> ProxyResult<()> {
        self.enqueue(message)
    }

    /// Send a request whose reply resolves `continuation`.
    ///
    /// On `Ok`, the continuation is invoked exactly once: with the reply, or
    /// with a `CallError` if the channel goes away first. It is never invoked
    /// after `cancel_async(token)`. On `Err`, it is never invoked.
    pub fn send_async(
        &self,
        mut message: Message,
        token: CallToken,
        continuation: Continuation,
    ) -> ProxyResult<()> {
        message.token = Some(token);
        message.reply = false;

        self.dispatcher.register(token, continuation)?;

        if let Err(e) = self.enqueue(message) {
            // If the pending call is gone already, fail_all resolved it and
            // the caller has had its single notification.
            if self.dispatcher.cancel(token) {
                return Err(e);
            }
            debug!(
                target: "automation_proxy::channel",
                "Call {} failed to queue after the channel closed",
                token
            );
        }
        Ok(())
    }

    /// Forget the pending call for `token`. Idempotent, never fails.
    pub fn cancel_async(&self, token: CallToken) -> bool {
        self.dispatcher.cancel(token)
    }

    /// Send a request and wait for its reply.
    ///
    /// The pending call is cancelled if no reply arrives within `timeout`.
    pub async fn call(&self, message: Message, timeout: Duration) -> ProxyResult<Message> {
        let token = self.next_token();
        let (tx, rx) = oneshot::channel();
        self.send_async(
            message,
            token,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(reply))) => Ok(reply),
            Ok(Ok(Err(error))) => Err(ProxyError::CallFailed(error)),
            // Continuation dropped without being invoked
            Ok(Err(_)) => Err(ProxyError::ChannelClosed),
            Err(_) => {
                self.cancel_async(token);
                Err(ProxyError::CallTimeout { token, timeout })
            }
        }
    }

    /// Release the channel deliberately.
    ///
    /// Outstanding calls fail with `CallError::Released`, the reader and
    /// writer stop, and the server process is terminated. The channel-error
    /// callback does not fire.
    pub async fn shutdown(&self) {
        if self.signal.release() {
            debug!(
                target: "automation_proxy::channel",
                "Releasing automation channel"
            );
        }
        self.cancel.cancel();

        let process = self
            .process
            .lock()
            .recover_poison("Connection::shutdown")
            .take();
        if let Some(mut child) = process {
            terminate(&mut child).await;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Child is kill_on_drop; stopping the tasks is enough here
        self.cancel.cancel();
    }
}
