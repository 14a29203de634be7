//! Transport-level plumbing for one automation server.
//!
//! A `Connection` owns the reader and writer tasks for a launched server.
//! Replies are correlated by the `AsyncReplyDispatcher`; everything else is
//! demultiplexed by routing id through the `MessageRouter`.

mod actor;
mod connection;
mod dispatcher;
mod launcher;
mod router;
mod session;

pub use connection::{ChannelErrorCallback, Connection};
pub use dispatcher::{AsyncReplyDispatcher, Continuation};
pub use launcher::{
    BoxedReader, BoxedWriter, ProcessDescriptor, ProcessLauncher, ServerLauncher, ServerTransport,
};
pub use router::{MessageRouter, RouteOutcome, SessionHandler};
pub use session::Session;
