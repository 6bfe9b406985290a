//! RONDO Protocol - Chat Client
//!
//! The top of the stack: a spawned driver task that wires the rendezvous
//! race, the connection state machine and the reconnection supervisor to a
//! command/event pair of channels.
//!
//! - **Handle**: [`ChatClient`], [`ChatEvents`]
//! - **Configuration**: [`ChatConfig`], [`ChatConfigBuilder`]
//! - **Protocol surface**: [`ChatCommand`], [`ChatEvent`]

mod client;
mod events;

pub use client::*;
pub use events::*;
