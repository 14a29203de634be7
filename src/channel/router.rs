//! Routing of unsolicited inbound messages to per-session handlers.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use crate::error::{LockResultExt, ProxyError, ProxyResult};
use crate::protocol::{Message, RoutingId};

/// Receiver of messages addressed to one routing id.
///
/// Both methods run on the connection's reader task and must not block.
pub trait SessionHandler: Send + Sync {
    fn on_message(&self, message: &Message);

    /// The channel to the automation server is gone.
    fn on_channel_error(&self);
}

/// Outcome of routing one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    /// No handler for the routing id; logged and dropped
    Unroutable,
    /// Replies belong to the AsyncReplyDispatcher
    NotForRouter,
}

/// Demultiplexes inbound non-reply messages by routing id.
pub struct MessageRouter {
    handlers: std::sync::RwLock<HashMap<RoutingId, Arc<dyn SessionHandler>>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            handlers: std::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` for `routing_id`. Each id has at most one handler.
    pub fn register_handler(
        &self,
        routing_id: RoutingId,
        handler: Arc<dyn SessionHandler>,
    ) -> ProxyResult<()> {
        let mut handlers = self
            .handlers
            .write()
            .recover_poison("MessageRouter::register_handler");
        if handlers.contains_key(&routing_id) {
            return Err(ProxyError::DuplicateRoutingId(routing_id));
        }
        handlers.insert(routing_id, handler);
        Ok(())
    }

    /// Remove the handler for `routing_id`.
    ///
    /// Once this returns, lookups for the id no longer resolve.
    pub fn unregister_handler(&self, routing_id: RoutingId) -> bool {
        self.handlers
            .write()
            .recover_poison("MessageRouter::unregister_handler")
            .remove(&routing_id)
            .is_some()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .recover_poison("MessageRouter::handler_count")
            .len()
    }

    fn lookup(&self, routing_id: RoutingId) -> Option<Arc<dyn SessionHandler>> {
        self.handlers
            .read()
            .recover_poison("MessageRouter::lookup")
            .get(&routing_id)
            .cloned()
    }

    /// Deliver `message` to the handler registered for its routing id.
    ///
    /// The handler runs without the map lock held, so it may unregister
    /// itself or open further sessions.
    pub fn dispatch(&self, message: &Message) -> RouteOutcome {
        if message.reply_token().is_some() {
            warn!(
                target: "automation_proxy::router",
                "Reply {:?} handed to the message router, ignoring",
                message.token
            );
            return RouteOutcome::NotForRouter;
        }

        match self.lookup(message.routing_id) {
            Some(handler) => {
                handler.on_message(message);
                RouteOutcome::Delivered
            }
            None => {
                debug!(
                    target: "automation_proxy::router",
                    "No handler for routing id {} ({}), dropping",
                    message.routing_id,
                    message.name
                );
                RouteOutcome::Unroutable
            }
        }
    }

    /// Notify every registered handler that the channel is gone.
    ///
    /// Iterates over a snapshot so handlers may unregister during the callback.
    pub fn broadcast_channel_error(&self) {
        let snapshot: Vec<(RoutingId, Arc<dyn SessionHandler>)> = self
            .handlers
            .read()
            .recover_poison("MessageRouter::broadcast_channel_error")
            .iter()
            .map(|(id, handler)| (*id, Arc::clone(handler)))
            .collect();

        for (routing_id, handler) in snapshot {
            debug!(
                target: "automation_proxy::router",
                "Notifying session {} of channel error",
                routing_id
            );
            handler.on_channel_error();
        }
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CallToken;
    use std::sync::Mutex;
    use std::sync::Weak;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<String>>,
        errors: Mutex<usize>,
    }

    impl SessionHandler for Recorder {
        fn on_message(&self, message: &Message) {
            self.messages.lock().unwrap().push(message.name.clone());
        }

        fn on_channel_error(&self) {
            *self.errors.lock().unwrap() += 1;
        }
    }

    /// Unregisters itself (and a sibling) when the channel fails.
    struct SelfRemoving {
        router: Weak<MessageRouter>,
        own_id: RoutingId,
        sibling_id: RoutingId,
        errors: Mutex<usize>,
    }

    impl SessionHandler for SelfRemoving {
        fn on_message(&self, _message: &Message) {}

        fn on_channel_error(&self) {
            *self.errors.lock().unwrap() += 1;
            if let Some(router) = self.router.upgrade() {
                router.unregister_handler(self.own_id);
                router.unregister_handler(self.sibling_id);
            }
        }
    }

    #[test]
    fn dispatch_routes_by_routing_id() {
        let router = MessageRouter::new();
        let tab_a = Arc::new(Recorder::default());
        let tab_b = Arc::new(Recorder::default());
        router.register_handler(RoutingId::new(1), tab_a.clone()).unwrap();
        router.register_handler(RoutingId::new(2), tab_b.clone()).unwrap();

        assert_eq!(
            router.dispatch(&Message::new(RoutingId::new(2), "tab_loaded")),
            RouteOutcome::Delivered
        );

        assert!(tab_a.messages.lock().unwrap().is_empty());
        assert_eq!(*tab_b.messages.lock().unwrap(), vec!["tab_loaded"]);
    }

    #[test]
    fn unknown_routing_id_is_dropped() {
        let router = MessageRouter::new();
        assert_eq!(
            router.dispatch(&Message::new(RoutingId::new(9), "orphan")),
            RouteOutcome::Unroutable
        );
    }

    #[test]
    fn replies_are_not_routed_to_sessions() {
        let router = MessageRouter::new();
        let tab = Arc::new(Recorder::default());
        router.register_handler(RoutingId::new(1), tab.clone()).unwrap();

        let reply = Message::reply_to(CallToken::new(4), RoutingId::new(1), "navigate");
        assert_eq!(router.dispatch(&reply), RouteOutcome::NotForRouter);
        assert!(tab.messages.lock().unwrap().is_empty());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let router = MessageRouter::new();
        router
            .register_handler(RoutingId::new(1), Arc::new(Recorder::default()))
            .unwrap();
        let err = router
            .register_handler(RoutingId::new(1), Arc::new(Recorder::default()))
            .unwrap_err();
        assert!(matches!(err, ProxyError::DuplicateRoutingId(id) if id == RoutingId::new(1)));
    }

    #[test]
    fn unregistered_handler_no_longer_receives() {
        let router = MessageRouter::new();
        let tab = Arc::new(Recorder::default());
        router.register_handler(RoutingId::new(1), tab.clone()).unwrap();

        assert!(router.unregister_handler(RoutingId::new(1)));
        assert!(!router.unregister_handler(RoutingId::new(1)));
        assert_eq!(
            router.dispatch(&Message::new(RoutingId::new(1), "late")),
            RouteOutcome::Unroutable
        );
        assert!(tab.messages.lock().unwrap().is_empty());
    }

    #[test]
    fn channel_error_broadcast_survives_unregistration_during_callback() {
        let router = Arc::new(MessageRouter::new());
        let first = Arc::new(SelfRemoving {
            router: Arc::downgrade(&router),
            own_id: RoutingId::new(1),
            sibling_id: RoutingId::new(2),
            errors: Mutex::new(0),
        });
        let second = Arc::new(SelfRemoving {
            router: Arc::downgrade(&router),
            own_id: RoutingId::new(2),
            sibling_id: RoutingId::new(1),
            errors: Mutex::new(0),
        });
        router.register_handler(RoutingId::new(1), first.clone()).unwrap();
        router.register_handler(RoutingId::new(2), second.clone()).unwrap();

        router.broadcast_channel_error();

        // Both were in the snapshot even though the first callback removed both ids
        assert_eq!(*first.errors.lock().unwrap(), 1);
        assert_eq!(*second.errors.lock().unwrap(), 1);
        assert_eq!(router.handler_count(), 0);
    }
}
