//! The automation message envelope.
//!
//! The core never interprets `name` or `payload` beyond the connection-level
//! `hello` handshake; everything else is opaque to it and only the routing
//! fields matter.

use serde::{Deserialize, Serialize};

use super::{CallToken, RoutingId};

/// Name of the control message the server sends once it is ready.
pub const HELLO: &str = "hello";

/// A single message exchanged with the automation server.
///
/// Routing rules:
/// - `reply == true` with a `token`: reply to an async request, goes to the
///   `AsyncReplyDispatcher`
/// - anything else: routed to a session by `routing_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub routing_id: RoutingId,
    pub name: String,
    /// Correlation token: set on outgoing async requests and echoed on replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<CallToken>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reply: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(routing_id: RoutingId, name: impl Into<String>) -> Self {
        Self {
            routing_id,
            name: name.into(),
            token: None,
            reply: false,
            payload: Vec::new(),
        }
    }

    /// Build the reply to a request carrying `token`.
    pub fn reply_to(token: CallToken, routing_id: RoutingId, name: impl Into<String>) -> Self {
        Self {
            token: Some(token),
            reply: true,
            ..Self::new(routing_id, name)
        }
    }

    /// Build the server's readiness message, optionally reporting its version.
    pub fn hello(version: Option<&str>) -> Self {
        let message = Self::new(RoutingId::CONTROL, HELLO);
        match version {
            Some(version) => message.with_payload(version.as_bytes()),
            None => message,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_token(mut self, token: CallToken) -> Self {
        self.token = Some(token);
        self
    }

    /// The correlation token if this message is a reply, `None` otherwise.
    pub fn reply_token(&self) -> Option<CallToken> {
        if self.reply { self.token } else { None }
    }

    pub fn is_hello(&self) -> bool {
        self.routing_id.is_control() && self.name == HELLO && !self.reply
    }

    /// Version string reported by a `hello`, if any.
    pub fn hello_version(&self) -> Option<String> {
        if !self.is_hello() || self.payload.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&self.payload).into_owned())
    }
}
