//! [`EventHub`] – fan-out of localizer events.
//!
//! Two delivery paths share every event:
//!
//! - synchronous handlers registered with [`EventHub::register`], invoked in
//!   registration order on the thread that emits the event;
//! - a `tokio::sync::broadcast` channel for async consumers
//!   ([`EventHub::subscribe`]).  Slow receivers lag rather than block the
//!   localizer.

use std::sync::Arc;

use anchorloc_types::{EventPayload, LocalizerEvent};
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Broadcast channel depth used by [`EventHub::new`].
pub const DEFAULT_CAPACITY: usize = 64;

type Handler = Arc<dyn Fn(&LocalizerEvent) + Send + Sync>;

pub struct EventHub {
    source: String,
    handlers: RwLock<Vec<Handler>>,
    sender: broadcast::Sender<LocalizerEvent>,
}

impl EventHub {
    pub fn new(source: impl Into<String>) -> Self {
        Self::with_capacity(source, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(source: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            source: source.into(),
            handlers: RwLock::new(Vec::new()),
            sender,
        }
    }

    /// Register a handler invoked for every subsequent event.
    pub fn register<F>(&self, handler: F)
    where
        F: Fn(&LocalizerEvent) + Send + Sync + 'static,
    {
        self.handlers.write().push(Arc::new(handler));
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LocalizerEvent> {
        self.sender.subscribe()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Stamp `payload` and deliver it to every handler and subscriber.
    pub fn emit(&self, payload: EventPayload) -> LocalizerEvent {
        let event = LocalizerEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: self.source.clone(),
            payload,
        };
        // Handlers run outside the lock so they may register further handlers.
        let handlers: Vec<Handler> = self.handlers.read().clone();
        for handler in &handlers {
            handler(&event);
        }
        if self.sender.send(event.clone()).is_err() {
            trace!(source = %self.source, "no event subscribers");
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchorloc_types::MapId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn handlers_run_in_registration_order() {
        let hub = EventHub::new("anchorloc::test");
        let order = Arc::new(RwLock::new(Vec::new()));
        for tag in ["first", "second"] {
            let order = Arc::clone(&order);
            hub.register(move |_| order.write().push(tag));
        }
        hub.emit(EventPayload::Reset);
        assert_eq!(*order.read(), vec!["first", "second"]);
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let hub = EventHub::new("anchorloc::test");
        let event = hub.emit(EventPayload::MapChanged(MapId(4)));
        assert_eq!(event.source, "anchorloc::test");
    }

    #[test]
    fn handler_may_register_another_handler() {
        let hub = Arc::new(EventHub::new("anchorloc::test"));
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let hub_ref = Arc::downgrade(&hub);
            let calls = Arc::clone(&calls);
            hub.register(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(hub) = hub_ref.upgrade() {
                    hub.register(|_| {});
                }
            });
        }
        hub.emit(EventPayload::Reset);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(hub.handler_count(), 2);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let hub = EventHub::new("anchorloc::test");
        let mut rx = hub.subscribe();
        let sent = hub.emit(EventPayload::MapChanged(MapId(11)));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.id, sent.id);
        assert!(matches!(got.payload, EventPayload::MapChanged(MapId(11))));
    }
}
