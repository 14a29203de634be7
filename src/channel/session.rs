//! Scoped registration of a session handler.

use std::sync::Arc;

use log::debug;

use super::router::{MessageRouter, SessionHandler};
use crate::error::ProxyResult;
use crate::protocol::RoutingId;

/// A handler registered on a connection's router for one routing id.
///
/// Dropping the session unregisters the handler; no message for the id is
/// routed to it afterwards.
#[must_use = "dropping a Session unregisters its handler"]
pub struct Session {
    routing_id: RoutingId,
    router: Arc<MessageRouter>,
}

impl Session {
    pub(crate) fn open(
        router: Arc<MessageRouter>,
        routing_id: RoutingId,
        handler: Arc<dyn SessionHandler>,
    ) -> ProxyResult<Self> {
        router.register_handler(routing_id, handler)?;
        Ok(Self { routing_id, router })
    }

    pub fn routing_id(&self) -> RoutingId {
        self.routing_id
    }

    /// Unregister now. Equivalent to dropping the session.
    pub fn release(self) {}
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.router.unregister_handler(self.routing_id) {
            debug!(
                target: "automation_proxy::router",
                "Session {} closed",
                self.routing_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProxyError;
    use crate::protocol::Message;

    struct Quiet;

    impl SessionHandler for Quiet {
        fn on_message(&self, _message: &Message) {}
        fn on_channel_error(&self) {}
    }

    #[test]
    fn drop_unregisters_handler() {
        let router = Arc::new(MessageRouter::new());
        let session = Session::open(Arc::clone(&router), RoutingId::new(4), Arc::new(Quiet)).unwrap();
        assert_eq!(session.routing_id(), RoutingId::new(4));
        assert_eq!(router.handler_count(), 1);

        session.release();

        assert_eq!(router.handler_count(), 0);
        assert_eq!(
            router.dispatch(&Message::new(RoutingId::new(4), "late")),
            crate::channel::router::RouteOutcome::Unroutable
        );
    }

    #[test]
    fn duplicate_routing_id_is_rejected() {
        let router = Arc::new(MessageRouter::new());
        let _first = Session::open(Arc::clone(&router), RoutingId::new(2), Arc::new(Quiet)).unwrap();

        let second = Session::open(Arc::clone(&router), RoutingId::new(2), Arc::new(Quiet));

        assert!(matches!(second, Err(ProxyError::DuplicateRoutingId(_))));
        assert_eq!(router.handler_count(), 1);
    }
}
