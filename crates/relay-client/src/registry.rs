//! Handler registrations that outlive any single connection.
//!
//! Consumers register `(event, handler)` pairs here regardless of whether a
//! connection is currently up. A handler reaches a connection through
//! exactly one of two paths:
//!
//! - attach-on-register, when a connection is already live, or
//! - [`HandlerRegistry::replay_all`], when the next connection comes up.
//!
//! Combined with per-connection set semantics this guarantees a handler is
//! never attached twice to the same connection.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::connection::Connection;
use crate::handler::{Handler, HandlerTable};

#[derive(Default)]
struct Inner {
    tracked: HandlerTable,
    live: Option<Arc<Connection>>,
}

/// Tracks every consumer registration and replays them onto new connections.
#[derive(Default)]
pub struct HandlerRegistry {
    inner: Mutex<Inner>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `handler` for `event`.
    ///
    /// Attaches immediately if a connection is live, otherwise the handler
    /// waits for the next [`replay_all`](Self::replay_all). Returns `false`
    /// if the pair was already tracked.
    pub fn register(&self, event: &str, handler: Handler) -> bool {
        let mut inner = self.inner.lock();
        if !inner.tracked.insert(event, handler.clone()) {
            return false;
        }
        if let Some(conn) = inner.live.as_ref().filter(|c| c.is_live()) {
            let _ = conn.attach(event, handler);
        }
        debug!(event, "handler registered");
        true
    }

    /// Stop tracking `handler` for `event` and detach it from the live
    /// connection. Unknown handlers are ignored; returns whether anything was
    /// removed.
    pub fn unregister(&self, event: &str, handler: &Handler) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.tracked.remove(event, handler);
        if let Some(conn) = inner.live.as_ref() {
            let _ = conn.detach(event, handler);
        }
        if removed {
            debug!(event, "handler unregistered");
        }
        removed
    }

    /// Attach every tracked handler to a freshly established connection and
    /// make it the live connection for attach-on-register.
    ///
    /// Returns the number of handlers newly attached.
    pub fn replay_all(&self, connection: &Arc<Connection>) -> usize {
        let mut inner = self.inner.lock();
        let mut attached = 0;
        for (event, handlers) in inner.tracked.iter() {
            for handler in handlers {
                if connection.attach(event, handler.clone()) {
                    attached += 1;
                }
            }
        }
        inner.live = Some(Arc::clone(connection));
        debug!(attached, events = inner.tracked.events().len(), "replayed handlers");
        attached
    }

    /// Forget `connection` as the live connection, if it still is.
    pub fn release(&self, connection: &Arc<Connection>) {
        let mut inner = self.inner.lock();
        if inner
            .live
            .as_ref()
            .is_some_and(|live| Arc::ptr_eq(live, connection))
        {
            inner.live = None;
        }
    }

    /// Number of handlers tracked for `event`.
    pub fn handler_count(&self, event: &str) -> usize {
        self.inner.lock().tracked.count(event)
    }

    /// Whether `handler` is tracked for `event`.
    pub fn is_registered(&self, event: &str, handler: &Handler) -> bool {
        self.inner.lock().tracked.contains(event, handler)
    }

    /// Event names with at least one tracked handler, sorted.
    pub fn events(&self) -> Vec<String> {
        self.inner.lock().tracked.events()
    }
}
