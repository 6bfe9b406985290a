//! # RONDO Protocol
//!
//! **R**endezvous-**O**rchestrated **N**etwork **D**ialogue **O**verlay
//!
//! RONDO pairs anonymous strangers for one-to-one chat over a peer-to-peer
//! transport, with no matchmaking server: the only shared infrastructure is a
//! signaling relay that maps identifiers to reachable endpoints. It provides:
//!
//! - **Serverless pairing**: a seeker/holder race against one well-known slot
//!   identifier, with rotation to break holder/holder deadlocks
//! - **At-most-one session**: a single tagged state machine guards every
//!   pairing interleaving, so duplicate candidates always lose
//! - **Resilience**: supervised endpoint recovery with exponential backoff
//!   and a bounded attempt budget
//! - **Sessions**: messages with read receipts, typing indicators, emoji
//!   reactions and call signaling over one ordered channel
//!
//! ## Feature Flags
//!
//! - `memory-transport` (default): in-process loopback transport for tests
//!   and examples
//!
//! ## Modules
//!
//! - [`core`]: constants and error types
//! - [`identity`]: ephemeral endpoint identities
//! - [`backoff`]: exponential backoff policy
//! - [`wire`]: channel payloads
//! - [`transport`]: transport capability traits and the loopback impl
//! - [`session`]: connection-lifecycle state machine
//! - [`rendezvous`]: the seeker/holder race
//! - [`supervisor`]: endpoint recovery pacing
//! - [`client`]: the spawned driver task and its command/event surface
//!
//! ## Example Usage
//!
//! ```rust
//! use rondo_protocol::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let transport = MemoryTransport::new();
//! let config = ChatConfig::builder().id_prefix("demo-").build();
//!
//! let (alice, mut alice_events) = ChatClient::start(transport.clone(), config.clone());
//! let (bob, _bob_events) = ChatClient::start(transport, config);
//!
//! alice.start_search().await.unwrap();
//! bob.start_search().await.unwrap();
//!
//! while let Some(event) = alice_events.recv().await {
//!     if let ChatEvent::Connected { role } = event {
//!         println!("paired as {role:?}");
//!         break;
//!     }
//! }
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod client;
pub mod core;
pub mod identity;
pub mod rendezvous;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod wire;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::backoff::BackoffPolicy;
    pub use crate::client::{
        ChatClient, ChatCommand, ChatConfig, ChatEvent, ChatEvents, ClientError,
    };
    pub use crate::core::{RondoError, SearchError};
    pub use crate::identity::{Identity, IdentityProvider};
    pub use crate::rendezvous::{PairingRole, RendezvousConfig};
    pub use crate::session::SessionPhase;
    pub use crate::transport::{Channel, Endpoint, Transport};
    #[cfg(feature = "memory-transport")]
    pub use crate::transport::MemoryTransport;
    pub use crate::wire::{CallType, WireMessage};
}

// Re-export commonly used items at crate root
pub use client::{ChatClient, ChatConfig, ChatEvent, ChatEvents};
pub use crate::core::{RondoError, SearchError, SupervisorError};
pub use rendezvous::{PairingRole, RendezvousConfig, RendezvousController};
pub use session::SessionPhase;
pub use transport::{Channel, Endpoint, Transport};
