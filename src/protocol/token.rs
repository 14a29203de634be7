//! Identifier newtypes carried by every automation message.
//!
//! Wrapping the raw integers keeps correlation tokens and routing ids from
//! being confused with each other (or with payload lengths) in signatures
//! and map keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Correlation token for an asynchronous request.
///
/// A request carries its token outbound; the server echoes it on the reply
/// so `AsyncReplyDispatcher` can find the waiting continuation. Tokens must be
/// unique among calls that are in flight on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallToken(u64);

impl CallToken {
    /// Create a new CallToken from a u64 value.
    #[inline]
    pub const fn new(token: u64) -> Self {
        Self(token)
    }

    /// Get the underlying u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for CallToken {
    fn from(token: u64) -> Self {
        Self(token)
    }
}

impl From<CallToken> for u64 {
    fn from(token: CallToken) -> Self {
        token.0
    }
}

impl fmt::Display for CallToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Routing id used to demultiplex unsolicited messages to a session.
///
/// Id 0 is reserved for connection-level control traffic such as the
/// server's `hello`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingId(i32);

impl RoutingId {
    /// Reserved id for control messages.
    pub const CONTROL: RoutingId = RoutingId(0);

    #[inline]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    pub fn is_control(self) -> bool {
        self == Self::CONTROL
    }
}

impl From<i32> for RoutingId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl fmt::Display for RoutingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
