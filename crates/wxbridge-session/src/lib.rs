//! Session layer for the wxbridge hook protocol.
//!
//! Provides:
//! - `Session` - Login state machine, synchronous calls and event dispatch
//! - `CorrelationTable` / `PendingCall` - Request/response matching
//! - `EventBus` - Typed fan-out of unsolicited messages
//! - `SessionRegistry` - Routing of inbound traffic by client id

pub mod config;
pub mod correlation;
pub mod event_bus;
pub mod registry;
pub mod session;

pub use config::SessionConfig;
pub use correlation::{CorrelationTable, PendingCall, Reply};
pub use event_bus::{EventBus, Subscription};
pub use registry::{RouteError, SessionRegistry};
pub use session::{LinkCard, Session, SessionError, SessionState};

#[cfg(test)]
mod test_support;
