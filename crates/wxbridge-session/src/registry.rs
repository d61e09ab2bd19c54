//! Process-wide routing of inbound traffic to sessions.
//!
//! Create one registry at startup, share it by `Arc`, and hand it to every
//! [`Session`]. Sessions add themselves when they attach and remove
//! themselves on detach; [`SessionRegistry::clear`] tears everything down.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use wxbridge_core::{ClientId, CodecError, Envelope};

use crate::Session;

/// Routing error.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("No session for client {0}")]
    UnknownClient(ClientId),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Map from transport client id to session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ClientId, Session>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` under `client_id`, replacing any previous entry.
    pub fn register(&self, client_id: ClientId, session: Session) {
        let previous = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(client_id, session);
        if previous.is_some() {
            tracing::warn!(client_id, "replaced existing session registration");
        } else {
            tracing::debug!(client_id, "registered session");
        }
    }

    /// Remove the session for `client_id`.
    pub fn unregister(&self, client_id: ClientId) -> Option<Session> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&client_id);
        if removed.is_some() {
            tracing::debug!(client_id, "unregistered session");
        }
        removed
    }

    #[must_use]
    pub fn get(&self, client_id: ClientId) -> Option<Session> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&client_id)
            .cloned()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Deliver a decoded envelope to the session for `client_id`.
    ///
    /// # Errors
    /// Returns error if no session is registered for `client_id`.
    pub fn route_envelope(&self, client_id: ClientId, envelope: Envelope) -> Result<(), RouteError> {
        // Lookup clones the session so dispatch runs without the map lock.
        let session = self
            .get(client_id)
            .ok_or(RouteError::UnknownClient(client_id))?;
        session.dispatch_inbound(envelope);
        Ok(())
    }

    /// Decode raw JSON from the transport and deliver it.
    ///
    /// # Errors
    /// Returns error if the text is not a valid envelope or no session is
    /// registered for `client_id`.
    pub fn route(&self, client_id: ClientId, raw: &str) -> Result<(), RouteError> {
        let envelope = Envelope::decode(raw).inspect_err(|e| {
            tracing::warn!(client_id, "dropping undecodable inbound message: {e}");
        })?;
        self.route_envelope(client_id, envelope)
            .inspect_err(|e| tracing::warn!("{e}"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use wxbridge_core::MessageType;

    use super::*;
    use crate::{SessionConfig, test_support::Harness};

    #[tokio::test]
    async fn test_attached_session_receives_routed_traffic() {
        let h = Harness::attached(SessionConfig::default()).await;
        let client_id = h.session.client_id().unwrap();
        assert_eq!(h.registry.len(), 1);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        h.session.subscribe(MessageType::RecvText, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        h.registry
            .route(client_id, r#"{"type":11025,"data":{"nickname":"A"}}"#)
            .unwrap();
        h.registry
            .route(client_id, r#"{"type":11046,"data":{"msg":"hi"}}"#)
            .unwrap();

        assert!(h.session.is_authenticated());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_route_errors() {
        let h = Harness::attached(SessionConfig::default()).await;
        let client_id = h.session.client_id().unwrap();

        assert!(matches!(
            h.registry.route(client_id + 100, r#"{"type":11024}"#),
            Err(RouteError::UnknownClient(_))
        ));
        assert!(matches!(
            h.registry.route(client_id, "not json"),
            Err(RouteError::Codec(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_drops_registrations() {
        let h = Harness::attached(SessionConfig::default()).await;
        let client_id = h.session.client_id().unwrap();
        assert!(h.registry.get(client_id).is_some());

        h.registry.clear();
        assert!(h.registry.is_empty());
        assert!(h.registry.unregister(client_id).is_none());
    }
}
