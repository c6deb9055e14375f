//! Event relay: a publish/subscribe façade between the transport and
//! application listeners.
//!
//! Decouples transport event names from consumers. Multiple handlers
//! per event are supported and invoked in registration order; a
//! handler returning an error is logged and does not prevent later
//! handlers from running. `emit` is crate-internal: only the connector
//! forwards raw server events.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;

/// Token returned by [`EventRelay::on`], used to deregister exactly
/// that handler. Stands in for removal by reference identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Box<dyn FnMut(&Value) -> Result<()> + Send>;

struct Registration {
    id: HandlerId,
    handler: Handler,
}

#[derive(Default)]
struct RelayInner {
    next_id: u64,
    handlers: HashMap<String, Vec<Registration>>,
}

/// String-keyed publish/subscribe registry.
///
/// Handlers run synchronously on the connector's I/O task, in the
/// order the server sent the events. Handlers must not call back into
/// the relay; use [`crate::session::Session::shutdown`] for lifecycle
/// management instead.
#[derive(Default)]
pub struct EventRelay {
    inner: Mutex<RelayInner>,
}

impl EventRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `event`. Handlers for the same event are
    /// invoked in registration order.
    pub fn on<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: FnMut(&Value) -> Result<()> + Send + 'static,
    {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = HandlerId(inner.next_id);
        inner
            .handlers
            .entry(event.to_string())
            .or_default()
            .push(Registration {
                id,
                handler: Box::new(handler),
            });
        id
    }

    /// Remove exactly one registration. Removing an id that is not
    /// registered (or an unknown event) is a no-op, not an error.
    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        let mut inner = self.inner.lock();
        let Some(registrations) = inner.handlers.get_mut(event) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            inner.handlers.remove(event);
        }
        removed
    }

    /// Number of live registrations for `event`.
    pub fn handler_count(&self, event: &str) -> usize {
        self.inner
            .lock()
            .handlers
            .get(event)
            .map_or(0, |registrations| registrations.len())
    }

    /// Dispatch `payload` to every handler registered for `event`, in
    /// registration order. Internal: only the connector publishes.
    pub(crate) fn emit(&self, event: &str, payload: &Value) {
        let mut inner = self.inner.lock();
        let Some(registrations) = inner.handlers.get_mut(event) else {
            debug!(event, "no listeners registered, dropping event");
            return;
        };
        for registration in registrations.iter_mut() {
            if let Err(e) = (registration.handler)(payload) {
                warn!(event, error = %e, "event handler failed, continuing with remaining handlers");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_handlers_run_in_registration_order() {
        let relay = EventRelay::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            relay.on("ping", move |_| {
                seen.lock().push(tag);
                Ok(())
            });
        }

        relay.emit("ping", &Value::Null);
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_handler_does_not_block_later_handlers() {
        let relay = EventRelay::new();
        let calls = Arc::new(AtomicUsize::new(0));

        relay.on("ping", |_| Err(ClientError::Server("boom".to_string())));
        {
            let calls = Arc::clone(&calls);
            relay.on("ping", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        relay.emit("ping", &Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_removes_exactly_one_registration() {
        let relay = EventRelay::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = {
            let calls = Arc::clone(&calls);
            relay.on("ping", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        {
            let calls = Arc::clone(&calls);
            relay.on("ping", move |_| {
                calls.fetch_add(10, Ordering::SeqCst);
                Ok(())
            });
        }

        assert!(relay.off("ping", first));
        relay.emit("ping", &Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(relay.handler_count("ping"), 1);
    }

    #[test]
    fn test_off_unknown_id_is_noop() {
        let relay = EventRelay::new();
        let id = relay.on("ping", |_| Ok(()));
        assert!(!relay.off("pong", id));
        assert!(relay.off("ping", id));
        assert!(!relay.off("ping", id));
    }

    #[test]
    fn test_emit_without_listeners_is_noop() {
        let relay = EventRelay::new();
        relay.emit("nobody-home", &Value::Null);
    }
}
