//! Reply correlation for asynchronous calls.
//!
//! This module provides the AsyncReplyDispatcher which tracks pending calls
//! by correlation token and resolves each one exactly once.
//!
//! # Lifecycle of a PendingCall
//!
//! - `register(token, continuation)` before the request is queued for writing
//! - exactly one of: `on_reply` (reply arrived), `cancel` (caller gave up),
//!   `fail_all` (channel lost or connection released)
//!
//! Continuations are always invoked after the state lock is released, so a
//! continuation may itself send or cancel calls on the same connection.

use std::collections::HashMap;

use log::debug;

use crate::error::{CallError, LockResultExt, ProxyError, ProxyResult};
use crate::protocol::{CallToken, Message};

/// Continuation invoked with the outcome of an asynchronous call.
pub type Continuation = Box<dyn FnOnce(Result<Message, CallError>) + Send + 'static>;

/// Routes replies to pending calls.
///
/// Thread-safe: registration happens on caller threads, replies arrive on the
/// reader task, and `fail_all` may run from either the reader or the writer.
pub struct AsyncReplyDispatcher {
    state: std::sync::Mutex<DispatcherState>,
}

struct DispatcherState {
    /// Pending calls waiting for replies.
    pending: HashMap<CallToken, Continuation>,
    /// Set once the channel is gone; later registrations are refused.
    closed: bool,
}

impl AsyncReplyDispatcher {
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(DispatcherState {
                pending: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Register a pending call.
    ///
    /// Must be called before the request is written so a reply arriving
    /// immediately finds its continuation. On error the continuation is
    /// dropped without being invoked.
    pub fn register(&self, token: CallToken, continuation: Continuation) -> ProxyResult<()> {
        let mut state = self
            .state
            .lock()
            .recover_poison("AsyncReplyDispatcher::register");

        if state.closed {
            return Err(ProxyError::ChannelClosed);
        }
        if state.pending.contains_key(&token) {
            return Err(ProxyError::DuplicateToken(token));
        }

        state.pending.insert(token, continuation);
        Ok(())
    }

    /// Resolve the pending call for `token` with `reply`.
    ///
    /// Returns `false` when no call is waiting (already cancelled or
    /// resolved); the reply is dropped in that case.
    pub fn on_reply(&self, token: CallToken, reply: Message) -> bool {
        let continuation = self
            .state
            .lock()
            .recover_poison("AsyncReplyDispatcher::on_reply")
            .pending
            .remove(&token);

        match continuation {
            Some(continuation) => {
                continuation(Ok(reply));
                true
            }
            None => false,
        }
    }

    /// Forget the pending call for `token` without invoking it.
    ///
    /// Idempotent. Returns `true` if a call was removed.
    pub fn cancel(&self, token: CallToken) -> bool {
        self.state
            .lock()
            .recover_poison("AsyncReplyDispatcher::cancel")
            .pending
            .remove(&token)
            .is_some()
    }

    /// Get the number of pending calls.
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .recover_poison("AsyncReplyDispatcher::pending_count")
            .pending
            .len()
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .recover_poison("AsyncReplyDispatcher::is_closed")
            .closed
    }

    /// Fail every pending call with `error` and refuse new registrations.
    ///
    /// Called once when the channel is lost or the connection is released so
    /// that no caller waits forever.
    pub fn fail_all(&self, error: CallError) {
        let entries: Vec<_> = {
            let mut state = self
                .state
                .lock()
                .recover_poison("AsyncReplyDispatcher::fail_all");
            state.closed = true;
            state.pending.drain().collect()
        };

        if !entries.is_empty() {
            debug!(
                target: "automation_proxy::dispatcher",
                "Failing {} pending call(s): {}",
                entries.len(),
                error
            );
        }

        for (_token, continuation) in entries {
            continuation(Err(error.clone()));
        }
    }
}

impl Default for AsyncReplyDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RoutingId;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn counting(counter: &Arc<AtomicUsize>) -> Continuation {
        let counter = Arc::clone(counter);
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn reply(token: u64) -> Message {
        Message::reply_to(CallToken::new(token), RoutingId::new(1), "done")
    }

    #[test]
    fn new_dispatcher_has_no_pending_calls() {
        let dispatcher = AsyncReplyDispatcher::new();
        assert_eq!(dispatcher.pending_count(), 0);
        assert!(!dispatcher.is_closed());
    }

    #[test]
    fn register_duplicate_token_is_rejected() {
        let dispatcher = AsyncReplyDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));

        dispatcher
            .register(CallToken::new(1), counting(&counter))
            .unwrap();
        let err = dispatcher
            .register(CallToken::new(1), counting(&counter))
            .unwrap_err();

        assert!(matches!(err, ProxyError::DuplicateToken(t) if t == CallToken::new(1)));
        assert_eq!(dispatcher.pending_count(), 1, "count should not increase");
    }

    #[tokio::test]
    async fn on_reply_delivers_to_continuation() {
        let dispatcher = AsyncReplyDispatcher::new();
        let (tx, rx) = oneshot::channel();
        dispatcher
            .register(
                CallToken::new(42),
                Box::new(move |result| {
                    let _ = tx.send(result);
                }),
            )
            .unwrap();

        assert!(dispatcher.on_reply(CallToken::new(42), reply(42)));

        let received = rx.await.unwrap().unwrap();
        assert_eq!(received.reply_token(), Some(CallToken::new(42)));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn reply_for_unknown_token_is_dropped() {
        let dispatcher = AsyncReplyDispatcher::new();
        assert!(!dispatcher.on_reply(CallToken::new(99), reply(99)));
    }

    #[test]
    fn cancelled_call_never_fires() {
        let dispatcher = AsyncReplyDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher
            .register(CallToken::new(7), counting(&counter))
            .unwrap();

        assert!(dispatcher.cancel(CallToken::new(7)));
        assert!(!dispatcher.cancel(CallToken::new(7)), "cancel is idempotent");
        assert!(!dispatcher.on_reply(CallToken::new(7), reply(7)));

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn second_reply_for_same_token_is_dropped() {
        let dispatcher = AsyncReplyDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher
            .register(CallToken::new(3), counting(&counter))
            .unwrap();

        assert!(dispatcher.on_reply(CallToken::new(3), reply(3)));
        assert!(!dispatcher.on_reply(CallToken::new(3), reply(3)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fail_all_resolves_each_pending_call_once() {
        let dispatcher = AsyncReplyDispatcher::new();
        let failures = Arc::new(std::sync::Mutex::new(Vec::new()));

        for token in 1..=3 {
            let failures = Arc::clone(&failures);
            dispatcher
                .register(
                    CallToken::new(token),
                    Box::new(move |result| {
                        failures.lock().unwrap().push((token, result.unwrap_err()));
                    }),
                )
                .unwrap();
        }

        dispatcher.fail_all(CallError::ChannelLost("server crashed".into()));
        dispatcher.fail_all(CallError::ChannelLost("again".into()));

        let mut failures = failures.lock().unwrap().clone();
        failures.sort_by_key(|(token, _)| *token);
        assert_eq!(failures.len(), 3);
        for (_, error) in failures {
            assert_eq!(error, CallError::ChannelLost("server crashed".into()));
        }
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn register_after_fail_all_is_refused() {
        let dispatcher = AsyncReplyDispatcher::new();
        dispatcher.fail_all(CallError::Released);

        let counter = Arc::new(AtomicUsize::new(0));
        let err = dispatcher
            .register(CallToken::new(1), counting(&counter))
            .unwrap_err();
        assert!(matches!(err, ProxyError::ChannelClosed));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn continuation_may_reenter_dispatcher() {
        let dispatcher = Arc::new(AsyncReplyDispatcher::new());
        let inner = Arc::clone(&dispatcher);
        dispatcher
            .register(
                CallToken::new(1),
                Box::new(move |_| {
                    // Lock is released before continuations run
                    inner.cancel(CallToken::new(2));
                }),
            )
            .unwrap();

        assert!(dispatcher.on_reply(CallToken::new(1), reply(1)));
    }
}
