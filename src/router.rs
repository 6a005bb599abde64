//! Message routing by envelope type
//!
//! The client delivers every frame to `message` listeners. A
//! [`MessageRouter`] sits behind one such listener and hands structured
//! frames to the handlers registered for their `type`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::client::{ClientEvent, EventClient, EventKind, Inbound, Listener};
use crate::protocol::{MessageKind, WsMessage};

/// Handler for one message type
pub type Handler = Arc<dyn Fn(&WsMessage) + Send + Sync>;

/// Handler for frames no typed route accepted
pub type FallbackHandler = Arc<dyn Fn(&Inbound) + Send + Sync>;

fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Dispatches decoded frames to per-type handlers
#[derive(Default)]
pub struct MessageRouter {
    routes: Mutex<HashMap<MessageKind, Vec<Handler>>>,
    fallback: Mutex<Option<FallbackHandler>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a message type
    ///
    /// Returns false if the same handler was already registered for it.
    pub fn route(&self, kind: impl Into<MessageKind>, handler: Handler) -> bool {
        let mut routes = self.routes.lock();
        let handlers = routes.entry(kind.into()).or_default();
        if handlers.iter().any(|h| same_handler(h, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    /// Register a closure and return its handle
    pub fn route_fn<F>(&self, kind: impl Into<MessageKind>, f: F) -> Handler
    where
        F: Fn(&WsMessage) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(f);
        self.route(kind, handler.clone());
        handler
    }

    /// Remove a handler; returns false if it was not registered
    pub fn unroute(&self, kind: impl Into<MessageKind>, handler: &Handler) -> bool {
        let kind = kind.into();
        let mut routes = self.routes.lock();
        let Some(handlers) = routes.get_mut(&kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|h| !same_handler(h, handler));
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            routes.remove(&kind);
        }
        removed
    }

    /// Handle raw frames, untyped JSON and types without a route
    pub fn set_fallback<F>(&self, f: F)
    where
        F: Fn(&Inbound) + Send + Sync + 'static,
    {
        *self.fallback.lock() = Some(Arc::new(f));
    }

    pub fn clear_fallback(&self) {
        *self.fallback.lock() = None;
    }

    pub fn handler_count(&self, kind: &MessageKind) -> usize {
        self.routes.lock().get(kind).map_or(0, Vec::len)
    }

    /// Deliver one inbound frame; returns true if a typed handler ran
    pub fn dispatch(&self, inbound: &Inbound) -> bool {
        let Some(message) = inbound.as_message() else {
            self.fall_back(inbound);
            return false;
        };

        let snapshot = self
            .routes
            .lock()
            .get(&message.kind)
            .cloned()
            .unwrap_or_default();

        let mut handled = false;
        for handler in snapshot {
            let still_routed = self
                .routes
                .lock()
                .get(&message.kind)
                .is_some_and(|hs| hs.iter().any(|h| same_handler(h, &handler)));
            if still_routed {
                handler(&message);
                handled = true;
            }
        }

        if !handled {
            trace!(kind = %message.kind, "No route for message");
            self.fall_back(inbound);
        }
        handled
    }

    fn fall_back(&self, inbound: &Inbound) {
        let fallback = self.fallback.lock().clone();
        if let Some(fallback) = fallback {
            fallback(inbound);
        }
    }

    /// Subscribe this router to a client's `message` events
    ///
    /// Keep the returned handle to [`detach`](Self::detach) later.
    pub fn attach(self: &Arc<Self>, client: &EventClient) -> Listener {
        let router = Arc::clone(self);
        client.on_fn(EventKind::Message, move |event| {
            if let ClientEvent::Message(inbound) = event {
                router.dispatch(inbound);
            }
        })
    }

    pub fn detach(client: &EventClient, listener: &Listener) {
        client.off(EventKind::Message, listener);
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes = self.routes.lock();
        let kinds: Vec<&str> = routes.keys().map(MessageKind::as_str).collect();
        f.debug_struct("MessageRouter")
            .field("routes", &kinds)
            .field("fallback", &self.fallback.lock().is_some())
            .finish()
    }
}
