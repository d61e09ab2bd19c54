//! Transport abstraction consumed by sessions.

use async_trait::async_trait;
use thiserror::Error;

/// Transport-assigned handle of one hook connection.
pub type ClientId = u64;

/// Process id of the controlled process.
pub type Pid = u32;

/// Handles produced by opening or attaching to a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    /// Process the session is attached to.
    pub pid: Pid,
    /// Connection handle used for sends and inbound routing.
    pub client_id: ClientId,
}

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Open failed: {0}")]
    OpenFailed(String),
    #[error("Attach to pid {0} failed")]
    AttachFailed(Pid),
    #[error("Detach from pid {0} failed")]
    DetachFailed(Pid),
    #[error("Send rejected for client {0}")]
    SendRejected(ClientId),
    #[error("Transport closed")]
    Closed,
}

/// Trait for the channel to the hook process.
///
/// Implementations move serialized envelopes out; inbound traffic is routed
/// back to sessions by whoever owns the session registry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Launch a new process and attach to it.
    async fn open(&self, smart: bool) -> Result<Attachment, TransportError>;

    /// Attach to an already running process.
    async fn attach(&self, pid: Pid) -> Result<Attachment, TransportError>;

    /// Detach from the process.
    async fn detach(&self, pid: Pid) -> Result<(), TransportError>;

    /// Hand one serialized envelope to the process.
    async fn send(&self, client_id: ClientId, raw: &str) -> Result<(), TransportError>;

    /// Produce a fresh id candidate starting with `prefix`.
    ///
    /// Uniqueness is not required; callers retry on collision.
    fn generate_id(&self, prefix: &str) -> String;
}
