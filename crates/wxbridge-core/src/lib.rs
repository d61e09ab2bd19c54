//! Core abstractions for wxbridge sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `Envelope` - Wire message with optional correlation id
//! - `MessageType` - Typed message-type codes
//! - `Command` / `Query` - Typed outbound payloads
//! - `Profile` - Login information
//! - `Transport` trait

pub mod command;
pub mod envelope;
pub mod message_type;
pub mod profile;
pub mod traits;

pub use command::{Command, Query};
pub use envelope::{CodecError, Envelope};
pub use message_type::MessageType;
pub use profile::Profile;
pub use traits::{Attachment, ClientId, Pid, Transport, TransportError};
