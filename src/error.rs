//! Error handling types for the automation proxy
//!
//! Launch failures are not errors here: they reach delegates as a
//! `LaunchResult`. These types cover API misuse, send failures and
//! configuration problems.

use std::path::PathBuf;
use std::sync::PoisonError;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::{CallToken, RoutingId};

/// Failure delivered to a pending call's continuation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The transport to the automation server was lost before a reply arrived
    #[error("channel lost: {0}")]
    ChannelLost(String),

    /// The proxy was released while the call was outstanding
    #[error("connection released")]
    Released,
}

/// Comprehensive error type for proxy operations
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Send attempted after the channel closed
    #[error("channel closed")]
    ChannelClosed,

    /// Outbound queue is at capacity
    #[error("outbound queue full")]
    QueueFull,

    /// A call with this token is already in flight
    #[error("duplicate call token {0}")]
    DuplicateToken(CallToken),

    /// A session already owns this routing id
    #[error("routing id {0} is already registered")]
    DuplicateRoutingId(RoutingId),

    /// No reply within the caller's bound
    #[error("call {token} timed out after {timeout:?}")]
    CallTimeout { token: CallToken, timeout: Duration },

    /// The call resolved with a failure
    #[error("call failed: {0}")]
    CallFailed(#[from] CallError),

    /// The entry's worker is no longer accepting tasks
    #[error("proxy for profile {profile} has been torn down")]
    EntryGone { profile: String },

    /// Release attempted from the entry's own worker
    #[error("release of profile {profile} issued from its own worker thread")]
    ReleaseFromWorker { profile: String },

    /// Blocking release attempted inside an async runtime
    #[error("blocking release of profile {profile} issued inside an async runtime")]
    BlockingInRuntime { profile: String },

    /// Configuration error
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown profile: {0}")]
    UnknownProfile(String),

    #[error("profile {0} has an empty command")]
    MissingCommand(String),

    #[error("profile {0} has a zero launch timeout")]
    ZeroTimeout(String),
}

/// Result type for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Helper trait to recover the guard from a poisoned lock.
pub trait LockResultExt<T> {
    /// Return the guard, recovering from poisoning with a logged warning.
    ///
    /// The context parameter identifies which operation triggered lock recovery,
    /// helping developers debug thread safety issues.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "automation_proxy::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}
