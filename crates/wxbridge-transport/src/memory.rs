//! In-process loopback transport.
//!
//! Stands in for the hook process in tests and demos: outbound envelopes are
//! recorded and streamed to a harness, which answers by calling back into
//! the session registry.

use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;
use wxbridge_core::{Attachment, ClientId, Envelope, Pid, Transport, TransportError};

/// First pid handed out by [`Transport::open`].
const FIRST_PID: Pid = 4000;

type IdGenerator = Box<dyn FnMut(&str) -> String + Send>;

/// One envelope handed to the transport.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Connection the envelope was sent on.
    pub client_id: ClientId,
    /// Serialized envelope as handed to the transport.
    pub raw: String,
}

impl Outbound {
    /// Decode the recorded text back into an envelope.
    #[must_use]
    pub fn envelope(&self) -> Option<Envelope> {
        Envelope::decode(&self.raw).ok()
    }
}

struct Inner {
    sent: Vec<Outbound>,
    attached: Vec<Pid>,
    rx: Option<mpsc::UnboundedReceiver<Outbound>>,
    id_generator: Option<IdGenerator>,
}

/// Loopback transport.
pub struct MemoryTransport {
    inner: Mutex<Inner>,
    tx: mpsc::UnboundedSender<Outbound>,
    next_pid: AtomicU32,
    next_client_id: AtomicU64,
    reject_sends: AtomicBool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Create a new loopback transport.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Mutex::new(Inner {
                sent: Vec::new(),
                attached: Vec::new(),
                rx: Some(rx),
                id_generator: None,
            }),
            tx,
            next_pid: AtomicU32::new(FIRST_PID),
            next_client_id: AtomicU64::new(1),
            reject_sends: AtomicBool::new(false),
        }
    }

    /// Replace the uuid-based id generator.
    #[must_use]
    pub fn with_id_generator<F>(self, generator: F) -> Self
    where
        F: FnMut(&str) -> String + Send + 'static,
    {
        self.lock().id_generator = Some(Box::new(generator));
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make subsequent sends fail with [`TransportError::SendRejected`].
    pub fn set_reject_sends(&self, reject: bool) {
        self.reject_sends.store(reject, Ordering::SeqCst);
    }

    /// Everything sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Outbound> {
        self.lock().sent.clone()
    }

    /// Decoded envelopes sent so far.
    #[must_use]
    pub fn sent_envelopes(&self) -> Vec<Envelope> {
        self.lock().sent.iter().filter_map(Outbound::envelope).collect()
    }

    /// Pids currently attached.
    #[must_use]
    pub fn attached(&self) -> Vec<Pid> {
        self.lock().attached.clone()
    }

    /// Take the live stream of outbound envelopes. Only the first caller
    /// gets it.
    pub fn take_outbound(&self) -> Option<UnboundedReceiverStream<Outbound>> {
        self.lock().rx.take().map(UnboundedReceiverStream::new)
    }

    fn attach_pid(&self, pid: Pid) -> Attachment {
        let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
        self.lock().attached.push(pid);
        Attachment { pid, client_id }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, smart: bool) -> Result<Attachment, TransportError> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(pid, smart, "loopback open");
        Ok(self.attach_pid(pid))
    }

    async fn attach(&self, pid: Pid) -> Result<Attachment, TransportError> {
        if pid == 0 {
            return Err(TransportError::AttachFailed(pid));
        }
        Ok(self.attach_pid(pid))
    }

    async fn detach(&self, pid: Pid) -> Result<(), TransportError> {
        let mut inner = self.lock();
        let before = inner.attached.len();
        inner.attached.retain(|p| *p != pid);
        if inner.attached.len() == before {
            return Err(TransportError::DetachFailed(pid));
        }
        Ok(())
    }

    async fn send(&self, client_id: ClientId, raw: &str) -> Result<(), TransportError> {
        if self.reject_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendRejected(client_id));
        }
        let outbound = Outbound {
            client_id,
            raw: raw.to_string(),
        };
        self.lock().sent.push(outbound.clone());
        // Harness may not be listening; the record above is authoritative.
        let _ = self.tx.send(outbound);
        Ok(())
    }

    fn generate_id(&self, prefix: &str) -> String {
        let mut inner = self.lock();
        match inner.id_generator.as_mut() {
            Some(generator) => generator(prefix),
            None => format!("{prefix}-{}", Uuid::new_v4().simple()),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;
    use wxbridge_core::MessageType;

    use super::*;

    #[tokio::test]
    async fn test_send_is_recorded_and_streamed() {
        let transport = MemoryTransport::new();
        let mut outbound = transport.take_outbound().unwrap();
        assert!(transport.take_outbound().is_none());

        let raw = Envelope::new(MessageType::SendText, json!({"to_wxid": "r1", "content": "hi"}))
            .encode()
            .unwrap();
        tokio_test::assert_ok!(transport.send(7, &raw).await);

        let streamed = outbound.next().await.unwrap();
        assert_eq!(streamed.client_id, 7);
        assert_eq!(
            streamed.envelope().unwrap().msg_type,
            MessageType::SendText
        );
        assert_eq!(transport.sent_envelopes().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_send_is_not_recorded() {
        let transport = MemoryTransport::new();
        transport.set_reject_sends(true);
        let err = transport.send(3, "{}").await.unwrap_err();
        assert!(matches!(err, TransportError::SendRejected(3)));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_open_attach_detach() {
        let transport = MemoryTransport::new();
        let opened = transport.open(false).await.unwrap();
        let attached = transport.attach(1234).await.unwrap();
        assert_eq!(opened.pid, FIRST_PID);
        assert_ne!(opened.client_id, attached.client_id);
        assert_eq!(transport.attached(), vec![FIRST_PID, 1234]);

        transport.detach(1234).await.unwrap();
        assert!(transport.detach(1234).await.is_err());
        assert!(transport.attach(0).await.is_err());
    }

    #[test]
    fn test_generate_id_uses_prefix() {
        let transport = MemoryTransport::new();
        let a = transport.generate_id("req");
        let b = transport.generate_id("req");
        assert!(a.starts_with("req-"));
        assert_ne!(a, b);

        let fixed = MemoryTransport::new().with_id_generator(|prefix| format!("{prefix}-1"));
        assert_eq!(fixed.generate_id("call"), "call-1");
    }
}
