//! Transport layer error types.

use thiserror::Error;

/// Typed endpoint failure, delivered through the endpoint's error event.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EndpointErrorKind {
    /// The requested identifier is already registered at the signaling relay.
    ///
    /// Expected during the holder-bind race; a protocol signal, not a fault.
    #[error("identifier unavailable")]
    IdUnavailable,

    /// Network-level failure reaching the signaling relay.
    #[error("network error")]
    Network,

    /// The signaling relay reported an internal error.
    #[error("server error")]
    Server,

    /// The signaling socket failed.
    #[error("socket error")]
    Socket,
}

impl EndpointErrorKind {
    /// Whether this failure should be routed to the reconnection supervisor.
    ///
    /// Identity collisions are handled inline by the rendezvous race and
    /// never trigger recovery.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::IdUnavailable)
    }
}

/// Errors returned by transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connect target is not registered at the signaling relay.
    #[error("peer '{0}' is not reachable")]
    PeerUnreachable(String),

    /// The channel's remote side is gone.
    #[error("channel is closed")]
    ChannelClosed,

    /// The endpoint has been closed.
    #[error("endpoint is closed")]
    EndpointClosed,

    /// The payload could not be encoded for the wire.
    #[error("wire encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}
