//! In-process signaling registry.
//!
//! A loopback [`Transport`] for tests and demos: endpoints register their
//! identifier in a shared map and channels are paired queues. Identifier
//! binding is atomic under the registry lock, which makes it a faithful
//! arbiter for the holder-bind race. Every `send` round-trips its payload
//! through JSON, so anything that works here is wire-encodable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::endpoint::{Channel, ChannelEvent, Endpoint, EndpointEvent, Transport};
use super::error::{EndpointErrorKind, TransportError};
use crate::identity::Identity;
use crate::wire::WireMessage;

type EndpointSender = mpsc::UnboundedSender<EndpointEvent<MemoryChannel>>;
type Registry = Arc<Mutex<HashMap<String, EndpointSender>>>;

/// Loopback transport backed by a shared in-process registry.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    registry: Registry,
    offline: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` is currently registered.
    pub fn is_registered(&self, id: &str) -> bool {
        self.registry.lock().expect("registry poisoned").contains_key(id)
    }

    /// Fault injection: drop `id`'s registration and signal `disconnected`.
    ///
    /// Mimics the relay force-closing a signaling connection.
    pub fn sever(&self, id: &str) {
        let removed = self.registry.lock().expect("registry poisoned").remove(id);
        if let Some(tx) = removed {
            let _ = tx.send(EndpointEvent::Disconnected);
        }
    }

    /// Fault injection: report a recoverable failure to `id` without
    /// touching its registration.
    pub fn fail(&self, id: &str, kind: EndpointErrorKind) {
        let registry = self.registry.lock().expect("registry poisoned");
        if let Some(tx) = registry.get(id) {
            let _ = tx.send(EndpointEvent::Error(kind));
        }
    }

    /// Fault injection: take the relay down or bring it back up.
    ///
    /// While offline, registration attempts and reconnects report a network
    /// error instead of opening. Existing registrations are untouched.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Identifiers currently registered.
    pub fn registered_ids(&self) -> Vec<String> {
        let registry = self.registry.lock().expect("registry poisoned");
        registry.keys().cloned().collect()
    }
}

impl Transport for MemoryTransport {
    type Endpoint = MemoryEndpoint;

    fn create(&self, identity: Identity) -> MemoryEndpoint {
        let (tx, rx) = mpsc::unbounded_channel();

        let registered = if self.offline.load(Ordering::SeqCst) {
            let _ = tx.send(EndpointEvent::Error(EndpointErrorKind::Network));
            false
        } else {
            let mut registry = self.registry.lock().expect("registry poisoned");
            if registry.contains_key(&identity.id) {
                let _ = tx.send(EndpointEvent::Error(EndpointErrorKind::IdUnavailable));
                false
            } else {
                registry.insert(identity.id.clone(), tx.clone());
                let _ = tx.send(EndpointEvent::Open {
                    id: identity.id.clone(),
                });
                true
            }
        };

        MemoryEndpoint {
            identity,
            events: rx,
            events_tx: tx,
            registry: self.registry.clone(),
            offline: self.offline.clone(),
            registered,
        }
    }
}

/// Endpoint registered in a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryEndpoint {
    identity: Identity,
    events: mpsc::UnboundedReceiver<EndpointEvent<MemoryChannel>>,
    events_tx: EndpointSender,
    registry: Registry,
    offline: Arc<AtomicBool>,
    registered: bool,
}

impl MemoryEndpoint {
    fn deregister(&mut self) {
        if self.registered {
            let mut registry = self.registry.lock().expect("registry poisoned");
            // The id may have been severed and re-bound by someone else in
            // the meantime; only the current owner may evict it.
            if registry
                .get(&self.identity.id)
                .is_some_and(|tx| tx.same_channel(&self.events_tx))
            {
                registry.remove(&self.identity.id);
            }
            self.registered = false;
        }
    }
}

impl Endpoint for MemoryEndpoint {
    type Channel = MemoryChannel;

    fn identity(&self) -> &Identity {
        &self.identity
    }

    async fn connect(&mut self, target_id: &str) -> Result<MemoryChannel, TransportError> {
        let target = {
            let registry = self.registry.lock().expect("registry poisoned");
            registry.get(target_id).cloned()
        };
        let Some(target) = target else {
            return Err(TransportError::PeerUnreachable(target_id.to_owned()));
        };

        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();

        // Both directions open as soon as the inbound side is delivered.
        let _ = local_tx.send(ChannelEvent::Open);
        let _ = remote_tx.send(ChannelEvent::Open);

        let local = MemoryChannel {
            events: local_rx,
            to_peer: remote_tx,
            closed: false,
        };
        let remote = MemoryChannel {
            events: remote_rx,
            to_peer: local_tx,
            closed: false,
        };
        target
            .send(EndpointEvent::Connection(remote))
            .map_err(|_| TransportError::PeerUnreachable(target_id.to_owned()))?;

        Ok(local)
    }

    fn reconnect(&mut self) {
        if self.offline.load(Ordering::SeqCst) {
            let _ = self
                .events_tx
                .send(EndpointEvent::Error(EndpointErrorKind::Network));
            return;
        }
        let mut registry = self.registry.lock().expect("registry poisoned");
        if !registry.contains_key(&self.identity.id) {
            registry.insert(self.identity.id.clone(), self.events_tx.clone());
            self.registered = true;
        }
        let _ = self.events_tx.send(EndpointEvent::Open {
            id: self.identity.id.clone(),
        });
    }

    async fn next_event(&mut self) -> Option<EndpointEvent<MemoryChannel>> {
        self.events.recv().await
    }

    fn close(&mut self) {
        self.deregister();
    }
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        self.deregister();
    }
}

/// One side of a paired in-process channel.
#[derive(Debug)]
pub struct MemoryChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    to_peer: mpsc::UnboundedSender<ChannelEvent>,
    closed: bool,
}

impl Channel for MemoryChannel {
    fn send(&self, message: &WireMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ChannelClosed);
        }
        // Round-trip through JSON to guarantee wire-encodability.
        let raw = serde_json::to_string(message)?;
        let decoded: WireMessage = serde_json::from_str(&raw)?;
        self.to_peer
            .send(ChannelEvent::Data(decoded))
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.to_peer.send(ChannelEvent::Close);
        }
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.to_peer.send(ChannelEvent::Close);
        }
    }
}
