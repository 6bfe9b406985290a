//! RONDO Protocol - Transport Capability
//!
//! The core never touches the network directly: it drives an external
//! peer-to-peer transport through the traits in this module.
//!
//! - **Traits**: [`Transport`], [`Endpoint`], [`Channel`]
//! - **Events**: [`EndpointEvent`], [`ChannelEvent`]
//! - **Errors**: [`TransportError`], typed [`EndpointErrorKind`]
//! - **Loopback impl**: [`MemoryTransport`] (feature `memory-transport`)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Rendezvous / Session / Supervisor     │
//! ├─────────────────────────────────────────┤
//! │        Transport Capability             │  ← This module
//! │   endpoints, channels, typed events     │
//! ├─────────────────────────────────────────┤
//! │   Signaling relay + peer connections    │  (external)
//! └─────────────────────────────────────────┘
//! ```
//!
//! The signaling relay itself holds no matchmaking logic: it registers an
//! identity to a reachable address and forwards opaque connect handshakes.

mod endpoint;
mod error;
#[cfg(feature = "memory-transport")]
mod memory;

pub use endpoint::*;
pub use error::*;
#[cfg(feature = "memory-transport")]
pub use memory::*;
