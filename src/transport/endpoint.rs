//! Transport endpoint capability.
//!
//! The core consumes a peer-to-peer transport through these traits; the
//! physical plumbing (signaling relay registration, NAT traversal, wire
//! encoding) is the implementor's concern. All results arrive as events, and
//! no operation blocks its caller beyond the await point.

use std::future::Future;

use super::error::{EndpointErrorKind, TransportError};
use crate::identity::Identity;
use crate::wire::WireMessage;

/// Event emitted by an [`Endpoint`].
#[derive(Debug)]
pub enum EndpointEvent<C> {
    /// The endpoint is registered at the signaling relay and reachable.
    Open {
        /// The identifier the relay registered.
        id: String,
    },
    /// An inbound channel from another endpoint.
    Connection(C),
    /// The endpoint failed. See [`EndpointErrorKind::is_recoverable`].
    Error(EndpointErrorKind),
    /// The signaling connection dropped; the registration may be stale.
    Disconnected,
}

/// Event emitted by a [`Channel`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The channel is open in both directions.
    Open,
    /// A payload from the peer.
    Data(WireMessage),
    /// The peer closed the channel.
    Close,
    /// The channel failed.
    Error(String),
}

/// A bidirectional, reliable, ordered message channel to one peer.
///
/// `Sync` is required so driver tasks holding a channel stay spawnable.
pub trait Channel: Send + Sync + 'static {
    /// Queue a payload for delivery. Fire-and-forget.
    fn send(&self, message: &WireMessage) -> Result<(), TransportError>;

    /// Next channel event, or `None` once the channel is defunct.
    fn next_event(&mut self) -> impl Future<Output = Option<ChannelEvent>> + Send;

    /// Close the channel. Idempotent.
    fn close(&mut self);
}

/// An endpoint bound to one [`Identity`] at the signaling relay.
///
/// `Sync` is required so driver tasks holding an endpoint stay spawnable.
pub trait Endpoint: Send + Sync + 'static {
    /// Channel type produced by this endpoint.
    type Channel: Channel;

    /// The identity this endpoint was created with.
    fn identity(&self) -> &Identity;

    /// Open a channel to `target_id`.
    ///
    /// A returned channel is not yet usable: wait for
    /// [`ChannelEvent::Open`].
    fn connect(
        &mut self,
        target_id: &str,
    ) -> impl Future<Output = Result<Self::Channel, TransportError>> + Send;

    /// Best-effort re-registration at the relay without changing identity.
    ///
    /// Success is signalled by a later [`EndpointEvent::Open`].
    fn reconnect(&mut self);

    /// Next endpoint event, or `None` once the endpoint is defunct.
    fn next_event(&mut self) -> impl Future<Output = Option<EndpointEvent<Self::Channel>>> + Send;

    /// Deregister and release the endpoint. Idempotent.
    fn close(&mut self);
}

/// Factory for endpoints.
///
/// Creation itself cannot fail; binding failures (identity collisions,
/// unreachable relay) are delivered asynchronously as
/// [`EndpointEvent::Error`].
pub trait Transport: Clone + Send + Sync + 'static {
    /// Endpoint type produced by this transport.
    type Endpoint: Endpoint;

    /// Create an endpoint bound to `identity`.
    fn create(&self, identity: Identity) -> Self::Endpoint;
}
