//! Per-session registry of handlers for unsolicited messages.

use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, PoisonError, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use wxbridge_core::{Envelope, MessageType};

use crate::Session;

/// Handler invoked with the owning session and the raw envelope.
pub type Handler = dyn Fn(&Session, &Envelope) -> anyhow::Result<()> + Send + Sync;

struct Registered {
    id: u64,
    handler: Arc<Handler>,
}

type HandlerMap = RwLock<HashMap<MessageType, Vec<Registered>>>;

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping it keeps the handler registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    handlers: Weak<HandlerMap>,
    keys: Vec<(MessageType, u64)>,
}

impl Subscription {
    /// Remove every handler this subscription registered. Invocations
    /// already in progress run to completion.
    pub fn unsubscribe(self) {
        let Some(handlers) = self.handlers.upgrade() else {
            return;
        };
        let mut map = handlers.write().unwrap_or_else(PoisonError::into_inner);
        for (msg_type, id) in &self.keys {
            if let Some(list) = map.get_mut(msg_type) {
                list.retain(|r| r.id != *id);
                if list.is_empty() {
                    map.remove(msg_type);
                }
            }
        }
    }
}

/// Message-type keyed fan-out of unsolicited envelopes.
///
/// Handlers for one type run synchronously in registration order. A handler
/// that errors or panics is logged and skipped; later handlers still run.
#[derive(Default)]
pub struct EventBus {
    handlers: Arc<HandlerMap>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create a bus with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list for `msg_type`.
    pub fn subscribe<F>(&self, msg_type: MessageType, handler: F) -> Subscription
    where
        F: Fn(&Session, &Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_many([msg_type], handler)
    }

    /// Register one handler for several message types.
    pub fn subscribe_many<I, F>(&self, msg_types: I, handler: F) -> Subscription
    where
        I: IntoIterator<Item = MessageType>,
        F: Fn(&Session, &Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler: Arc<Handler> = Arc::new(handler);
        let mut map = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let keys = msg_types
            .into_iter()
            .map(|msg_type| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                map.entry(msg_type).or_default().push(Registered {
                    id,
                    handler: Arc::clone(&handler),
                });
                (msg_type, id)
            })
            .collect();

        Subscription {
            handlers: Arc::downgrade(&self.handlers),
            keys,
        }
    }

    /// Number of handlers registered for `msg_type`.
    #[must_use]
    pub fn handler_count(&self, msg_type: MessageType) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&msg_type)
            .map_or(0, Vec::len)
    }

    /// Invoke every handler registered for `msg_type`. Returns how many
    /// handlers completed without error.
    pub fn publish(&self, msg_type: MessageType, session: &Session, envelope: &Envelope) -> usize {
        // Snapshot so handlers may (un)subscribe without deadlocking.
        let snapshot: Vec<Arc<Handler>> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&msg_type)
            .map(|list| list.iter().map(|r| Arc::clone(&r.handler)).collect())
            .unwrap_or_default();

        if snapshot.is_empty() {
            tracing::trace!(msg_type = %msg_type, "no handlers for event");
            return 0;
        }

        let mut ok = 0;
        for handler in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(session, envelope))) {
                Ok(Ok(())) => ok += 1,
                Ok(Err(e)) => {
                    tracing::warn!(msg_type = %msg_type, "event handler failed: {e:#}");
                }
                Err(_) => {
                    tracing::error!(msg_type = %msg_type, "event handler panicked");
                }
            }
        }
        ok
    }
}
