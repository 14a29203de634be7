pub mod channel;
pub mod config;
pub mod error;
pub mod protocol;
pub mod proxy;

pub use channel::{
    Connection, MessageRouter, ProcessDescriptor, ProcessLauncher, ServerLauncher, Session,
    SessionHandler,
};
pub use config::ProxyConfig;
pub use error::{CallError, ConfigError, ProxyError, ProxyResult};
pub use protocol::{CallToken, Message, RoutingId};
pub use proxy::{
    AutomationProxy, DelegateRef, EntryState, LaunchDelegate, LaunchParams, LaunchResult,
    ProfileIdentity, ProxyFactory, ProxyHandle, ReleaseOutcome,
};
