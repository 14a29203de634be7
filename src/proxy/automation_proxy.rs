//! Client-facing handle to a launched automation server.

use std::sync::Arc;
use std::time::Duration;

use crate::channel::{Connection, Session, SessionHandler};
use crate::error::{CallError, ProxyResult};
use crate::protocol::{CallToken, Message, RoutingId};

use super::ProfileIdentity;

/// The live connection to a profile's automation server, shared by every
/// delegate of that profile.
///
/// Handed out only after a successful launch. Once the channel is lost all
/// sends fail fast with `ProxyError::ChannelClosed`.
pub struct AutomationProxy {
    profile: ProfileIdentity,
    connection: Connection,
}

impl AutomationProxy {
    pub(crate) fn new(profile: ProfileIdentity, connection: Connection) -> Self {
        Self {
            profile,
            connection,
        }
    }

    pub fn profile(&self) -> &ProfileIdentity {
        &self.profile
    }

    /// Send a message that expects no reply.
    pub fn send(&self, message: Message) -> ProxyResult<()> {
        self.connection.send(message)
    }

    /// Send a request; `on_reply` receives the outcome exactly once unless the
    /// call is cancelled first.
    pub fn send_async<F>(&self, message: Message, token: CallToken, on_reply: F) -> ProxyResult<()>
    where
        F: FnOnce(Result<Message, CallError>) + Send + 'static,
    {
        self.connection.send_async(message, token, Box::new(on_reply))
    }

    /// Send a request and wait up to `timeout` for its reply.
    pub async fn call(&self, message: Message, timeout: Duration) -> ProxyResult<Message> {
        self.connection.call(message, timeout).await
    }

    /// Drop interest in the reply for `token`. Idempotent.
    pub fn cancel_async(&self, token: CallToken) -> bool {
        self.connection.cancel_async(token)
    }

    pub fn next_token(&self) -> CallToken {
        self.connection.next_token()
    }

    /// Route notifications for `routing_id` to `handler` until the returned
    /// session is dropped.
    pub fn open_session(
        &self,
        routing_id: RoutingId,
        handler: Arc<dyn SessionHandler>,
    ) -> ProxyResult<Session> {
        Session::open(Arc::clone(self.connection.router()), routing_id, handler)
    }

    pub fn pending_calls(&self) -> usize {
        self.connection.dispatcher().pending_count()
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    pub(crate) async fn shutdown(&self) {
        self.connection.shutdown().await;
    }
}

impl std::fmt::Debug for AutomationProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationProxy")
            .field("profile", &self.profile)
            .field("closed", &self.is_closed())
            .finish()
    }
}
