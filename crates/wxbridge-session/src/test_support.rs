//! Shared fixtures for session tests.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio_stream::wrappers::UnboundedReceiverStream;
use wxbridge_core::{Envelope, MessageType, Transport};
use wxbridge_transport::{MemoryTransport, Outbound};

use crate::{Session, SessionConfig, SessionRegistry};

pub struct Harness {
    pub session: Session,
    pub transport: Arc<MemoryTransport>,
    pub registry: Arc<SessionRegistry>,
    pub outbound: UnboundedReceiverStream<Outbound>,
}

impl Harness {
    /// Session over a fresh loopback transport, not yet attached.
    pub fn unattached(transport: MemoryTransport, config: SessionConfig) -> Self {
        let transport = Arc::new(transport);
        let outbound = transport.take_outbound().unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let dyn_transport: Arc<dyn Transport> = transport.clone();
        let session = Session::new(dyn_transport, &registry, config);
        Self {
            session,
            transport,
            registry,
            outbound,
        }
    }

    /// Attached, logged-out session.
    pub async fn attached(config: SessionConfig) -> Self {
        let harness = Self::unattached(MemoryTransport::new(), config);
        harness.session.attach(1234).await.unwrap();
        harness
    }

    /// Attached session after a login notification.
    pub async fn logged_in(config: SessionConfig) -> Self {
        let harness = Self::attached(config).await;
        harness.login(serde_json::json!({"nickname": "A"}));
        harness
    }

    pub fn login(&self, profile: Value) {
        self.session
            .dispatch_inbound(Envelope::new(MessageType::Login, profile));
    }

    /// Next envelope the session handed to the transport.
    pub async fn next_outbound(&mut self) -> Envelope {
        self.outbound.next().await.unwrap().envelope().unwrap()
    }
}
