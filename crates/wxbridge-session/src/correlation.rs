//! Correlation table and pending calls.
//!
//! Every synchronous request registers a [`PendingCall`] under a fresh
//! correlation id before it is sent. The inbound dispatch path hands each
//! correlated envelope to [`CorrelationTable::resolve`], which removes the
//! entry and wakes the single waiter through a oneshot channel.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde_json::Value;
use tokio::sync::oneshot;
use wxbridge_core::{Envelope, MessageType};

/// Candidates drawn before id generation gives up.
const MAX_ID_ATTEMPTS: usize = 64;

/// Correlation id already pending, or no free id could be drawn.
#[derive(Debug, thiserror::Error)]
#[error("Correlation id already pending: {0}")]
pub struct DuplicateId(pub String);

/// Pending call was dropped from the table without a response.
#[derive(Debug, thiserror::Error)]
#[error("Pending call {0} abandoned")]
pub struct Abandoned(pub String);

/// Outcome of a synchronous call.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Response carried a payload.
    Payload(Value),
    /// Response arrived without a payload.
    Empty,
    /// No response before the deadline.
    TimedOut,
}

impl Reply {
    fn from_envelope(envelope: Envelope) -> Self {
        if envelope.data.is_null() {
            Self::Empty
        } else {
            Self::Payload(envelope.data)
        }
    }

    /// Payload if one arrived; `None` for both empty and timed-out calls.
    #[must_use]
    pub fn into_payload(self) -> Option<Value> {
        match self {
            Self::Payload(value) => Some(value),
            Self::Empty | Self::TimedOut => None,
        }
    }

    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Result of offering an inbound envelope to the table.
#[derive(Debug)]
pub enum Resolution {
    /// A pending call owned the id and has been resolved.
    Resolved,
    /// No pending call matched; the envelope is handed back.
    Unmatched(Envelope),
}

struct PendingEntry {
    request_type: MessageType,
    tx: oneshot::Sender<Envelope>,
}

/// Concurrency-safe map from correlation id to pending call.
#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, PendingEntry>>,
}

impl CorrelationTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a pending entry under `id`.
    ///
    /// # Errors
    /// Returns error if `id` is already pending.
    pub fn register(
        &self,
        id: String,
        request_type: MessageType,
    ) -> Result<oneshot::Receiver<Envelope>, DuplicateId> {
        let mut pending = self.lock();
        if pending.contains_key(&id) {
            return Err(DuplicateId(id));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(id, PendingEntry { request_type, tx });
        Ok(rx)
    }

    fn draw_unique<F>(
        pending: &HashMap<String, PendingEntry>,
        generate: &mut F,
    ) -> Result<String, DuplicateId>
    where
        F: FnMut() -> String,
    {
        let mut last = String::new();
        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = generate();
            if !pending.contains_key(&candidate) {
                return Ok(candidate);
            }
            tracing::debug!(correlation_id = %candidate, "correlation id collision, retrying");
            last = candidate;
        }
        tracing::error!(
            correlation_id = %last,
            attempts = MAX_ID_ATTEMPTS,
            "no free correlation id"
        );
        Err(DuplicateId(last))
    }

    /// Draw candidates from `generate` until one is not pending.
    ///
    /// # Errors
    /// Returns error if every one of a bounded number of candidates is
    /// already pending.
    pub fn generate_unique_id<F>(&self, mut generate: F) -> Result<String, DuplicateId>
    where
        F: FnMut() -> String,
    {
        Self::draw_unique(&self.lock(), &mut generate)
    }

    /// Generate a unique id and register it under one lock, so concurrent
    /// callers can never be handed the same id.
    ///
    /// # Errors
    /// See [`CorrelationTable::generate_unique_id`].
    pub fn register_unique<F>(
        &self,
        mut generate: F,
        request_type: MessageType,
    ) -> Result<(String, oneshot::Receiver<Envelope>), DuplicateId>
    where
        F: FnMut() -> String,
    {
        let mut pending = self.lock();
        let id = Self::draw_unique(&pending, &mut generate)?;
        let (tx, rx) = oneshot::channel();
        pending.insert(id.clone(), PendingEntry { request_type, tx });
        Ok((id, rx))
    }

    /// Route `envelope` to the pending call named by its correlation id.
    pub fn resolve(&self, envelope: Envelope) -> Resolution {
        let Some(id) = envelope.correlation_id.as_deref() else {
            return Resolution::Unmatched(envelope);
        };
        let Some(entry) = self.lock().remove(id) else {
            return Resolution::Unmatched(envelope);
        };

        tracing::debug!(
            correlation_id = %id,
            request_type = %entry.request_type,
            "resolved pending call"
        );
        if entry.tx.send(envelope).is_err() {
            tracing::debug!("waiter already gone, response consumed");
        }
        Resolution::Resolved
    }

    /// Remove an entry without resolving it. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Drop every entry; their waiters observe [`Abandoned`].
    pub fn clear(&self) -> usize {
        let mut pending = self.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    /// Number of pending calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Ids of all pending calls (for diagnostics).
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// One in-flight synchronous request.
///
/// Dropping a pending call before it resolves removes its table entry when
/// eviction is enabled.
pub struct PendingCall {
    correlation_id: String,
    request_type: MessageType,
    request_payload: Value,
    rx: oneshot::Receiver<Envelope>,
    table: Arc<CorrelationTable>,
    evict: bool,
    settled: bool,
}

impl PendingCall {
    pub(crate) fn new(
        correlation_id: String,
        request_type: MessageType,
        request_payload: Value,
        rx: oneshot::Receiver<Envelope>,
        table: Arc<CorrelationTable>,
        evict: bool,
    ) -> Self {
        Self {
            correlation_id,
            request_type,
            request_payload,
            rx,
            table,
            evict,
            settled: false,
        }
    }

    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    #[must_use]
    pub const fn request_type(&self) -> MessageType {
        self.request_type
    }

    #[must_use]
    pub const fn request_payload(&self) -> &Value {
        &self.request_payload
    }

    /// Wait for the response or the deadline, whichever comes first.
    ///
    /// # Errors
    /// Returns error if the entry was dropped from the table (session
    /// detached) before a response arrived.
    pub async fn wait(mut self, timeout: Duration) -> Result<Reply, Abandoned> {
        let outcome = tokio::time::timeout(timeout, &mut self.rx).await;
        self.settled = true;
        match outcome {
            Ok(Ok(envelope)) => Ok(Reply::from_envelope(envelope)),
            Ok(Err(_)) => Err(Abandoned(self.correlation_id.clone())),
            Err(_) => {
                if self.evict && self.table.remove(&self.correlation_id) {
                    tracing::debug!(
                        correlation_id = %self.correlation_id,
                        ?timeout,
                        "pending call timed out, evicted"
                    );
                } else {
                    tracing::debug!(
                        correlation_id = %self.correlation_id,
                        ?timeout,
                        "pending call timed out"
                    );
                }
                Ok(Reply::TimedOut)
            }
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if !self.settled && self.evict && self.table.remove(&self.correlation_id) {
            tracing::debug!(
                correlation_id = %self.correlation_id,
                "pending call dropped, evicted"
            );
        }
    }
}
