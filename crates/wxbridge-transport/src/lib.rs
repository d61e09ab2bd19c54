//! Transport implementations for wxbridge sessions.
//!
//! Provides:
//! - In-process loopback transport (feature: memory)

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{MemoryTransport, Outbound};
