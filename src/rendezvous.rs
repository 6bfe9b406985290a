//! Rendezvous race: pairing without a queue server.
//!
//! No server tracks who is waiting. Instead every searching client races
//! between two roles against one well-known slot identifier:
//!
//! 1. **Seek**: probe the slot with a short connect timeout. If the probe
//!    opens, the partner was already there and the pairing is done.
//! 2. **Hold**: nobody home, so rebuild the endpoint bound to the slot
//!    identifier and stay discoverable until a seeker arrives.
//! 3. **Rotate**: if no seeker shows up before the rotation timer fires,
//!    abandon the slot, mint a fresh private identity and probe again. This
//!    breaks the deadlock where two holders would wait forever.
//!
//! If binding the slot fails (`id-unavailable`), someone else just took it:
//! retry immediately as a seeker against the now-known-occupied slot. Exactly
//! one of two racing binders wins, so the protocol always makes progress.
//!
//! The whole search is bounded by a wall-clock deadline, independent of the
//! attempt count; expiry surfaces as [`SearchError::Exhausted`].

use std::time::Duration;

use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, trace};

use crate::backoff::BackoffPolicy;
use crate::core::constants;
use crate::core::SearchError;
use crate::identity::{Identity, IdentityProvider};
use crate::transport::{
    Channel, ChannelEvent, Endpoint, EndpointErrorKind, EndpointEvent, Transport,
};

/// Tuning knobs for the rendezvous race.
#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    /// The fixed, well-known slot identifier all unpaired clients share.
    pub slot_id: String,
    /// Seeker probe timeout.
    pub seek_timeout: Duration,
    /// Holder rotation timeout.
    pub rotation_timeout: Duration,
    /// Pause before re-entering the loop after a failed cycle.
    pub retry_delay: Duration,
    /// How long a fresh endpoint may take to report open.
    pub endpoint_open_timeout: Duration,
    /// Wall-clock ceiling on the whole search.
    pub search_deadline: Duration,
}

impl RendezvousConfig {
    /// Defaults with the slot identifier derived from `prefix`.
    pub fn for_prefix(prefix: &str) -> Self {
        Self {
            slot_id: format!("{prefix}{}", constants::SLOT_SUFFIX),
            seek_timeout: constants::SEEK_TIMEOUT,
            rotation_timeout: constants::ROTATION_TIMEOUT,
            retry_delay: constants::RETRY_DELAY,
            endpoint_open_timeout: constants::ENDPOINT_OPEN_TIMEOUT,
            search_deadline: constants::SEARCH_DEADLINE,
        }
    }
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self::for_prefix(constants::DEFAULT_ID_PREFIX)
    }
}

/// Which side of the race produced the pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingRole {
    /// This client probed into the slot; it initiates the handshake.
    Seeker,
    /// This client held the slot and accepted the inbound channel.
    Holder,
}

/// A successful pairing: the surviving endpoint and its candidate channel.
pub struct Pairing<E: Endpoint> {
    /// The endpoint that owns the channel. Must be kept alive.
    pub endpoint: E,
    /// The candidate peer channel.
    pub channel: E::Channel,
    /// Whether transport-level open has already fired for the channel.
    pub channel_open: bool,
    /// Side of the race this client ended up on.
    pub role: PairingRole,
    /// Completed seek/hold cycles, including the successful one.
    pub attempts: u32,
}

enum OpenWait {
    Ready,
    Failed(EndpointErrorKind),
    TimedOut,
}

enum HolderWait<C> {
    Inbound(C),
    Lost(EndpointErrorKind),
    Closed,
}

/// Drives the seeker/holder race for one client.
#[derive(Debug, Clone)]
pub struct RendezvousController<T: Transport> {
    transport: T,
    identities: IdentityProvider,
    config: RendezvousConfig,
    error_backoff: BackoffPolicy,
}

impl<T: Transport> RendezvousController<T> {
    /// Create a controller.
    pub fn new(transport: T, identities: IdentityProvider, config: RendezvousConfig) -> Self {
        Self {
            transport,
            identities,
            config,
            error_backoff: BackoffPolicy::default(),
        }
    }

    /// The rendezvous configuration in use.
    pub fn config(&self) -> &RendezvousConfig {
        &self.config
    }

    /// Run the race until a pairing or the wall-clock deadline.
    ///
    /// Endpoints are rebuilt per cycle under fresh identities; only the
    /// endpoint belonging to the returned pairing survives.
    pub async fn search(&self) -> Result<Pairing<T::Endpoint>, SearchError> {
        let started = Instant::now();
        let deadline = started + self.config.search_deadline;
        let mut attempts: u32 = 0;
        let mut error_backoff = self.error_backoff.start();

        loop {
            if Instant::now() >= deadline {
                debug!(attempts, "search deadline elapsed");
                return Err(SearchError::Exhausted {
                    elapsed: started.elapsed(),
                    attempts,
                });
            }
            attempts += 1;
            trace!(attempt = attempts, "starting search cycle");

            // Seeker phase: probe the slot from a fresh private identity.
            let mut endpoint = self.transport.create(self.identities.fresh());
            match self.await_open(&mut endpoint, deadline).await {
                OpenWait::Ready => {
                    if let Some(channel) = self.probe_slot(&mut endpoint, deadline).await {
                        debug!(attempts, "probe opened, paired as seeker");
                        return Ok(Pairing {
                            endpoint,
                            channel,
                            channel_open: true,
                            role: PairingRole::Seeker,
                            attempts,
                        });
                    }
                }
                OpenWait::Failed(kind) => {
                    debug!(%kind, "endpoint failed before open");
                    endpoint.close();
                    self.pause(error_backoff.next_delay(), deadline).await;
                    continue;
                }
                OpenWait::TimedOut => {
                    debug!("endpoint never opened, rebuilding");
                    endpoint.close();
                    continue;
                }
            }

            // Nobody home: take the holder role under the slot identity.
            endpoint.close();
            drop(endpoint);
            let mut holder = self
                .transport
                .create(Identity::well_known(self.config.slot_id.clone()));
            match self.await_open(&mut holder, deadline).await {
                OpenWait::Ready => {
                    let wait = self.clamped(self.config.rotation_timeout, deadline);
                    match timeout(wait, Self::await_inbound(&mut holder)).await {
                        Ok(HolderWait::Inbound(channel)) => {
                            debug!(attempts, "seeker arrived, paired as holder");
                            return Ok(Pairing {
                                endpoint: holder,
                                channel,
                                channel_open: false,
                                role: PairingRole::Holder,
                                attempts,
                            });
                        }
                        Ok(HolderWait::Lost(kind)) => {
                            debug!(%kind, "holder endpoint lost");
                            holder.close();
                            self.pause(error_backoff.next_delay(), deadline).await;
                        }
                        Ok(HolderWait::Closed) => {
                            holder.close();
                        }
                        Err(_) => {
                            trace!("rotation timer fired, returning to seeker role");
                            holder.close();
                            self.pause(self.config.retry_delay, deadline).await;
                        }
                    }
                }
                OpenWait::Failed(EndpointErrorKind::IdUnavailable) => {
                    // Lost the bind race; the slot is occupied, so a seeker
                    // probe is now guaranteed a target.
                    trace!("slot taken by another holder, retrying as seeker");
                    holder.close();
                    self.pause(self.config.retry_delay, deadline).await;
                }
                OpenWait::Failed(kind) => {
                    debug!(%kind, "holder bind failed");
                    holder.close();
                    self.pause(error_backoff.next_delay(), deadline).await;
                }
                OpenWait::TimedOut => {
                    holder.close();
                }
            }
        }
    }

    /// Connect into the slot and wait briefly for the channel to open.
    async fn probe_slot(
        &self,
        endpoint: &mut T::Endpoint,
        deadline: Instant,
    ) -> Option<<T::Endpoint as Endpoint>::Channel> {
        let mut channel = match endpoint.connect(&self.config.slot_id).await {
            Ok(channel) => channel,
            Err(err) => {
                trace!(%err, "slot probe refused");
                return None;
            }
        };

        let wait = self.clamped(self.config.seek_timeout, deadline);
        match timeout(wait, Self::await_channel_open(&mut channel)).await {
            Ok(true) => Some(channel),
            Ok(false) => {
                channel.close();
                None
            }
            Err(_) => {
                trace!("probe timed out before open");
                channel.close();
                None
            }
        }
    }

    /// Wait for the endpoint to report open, bounded by config and deadline.
    async fn await_open(&self, endpoint: &mut T::Endpoint, deadline: Instant) -> OpenWait {
        let wait = self.clamped(self.config.endpoint_open_timeout, deadline);
        let outcome = timeout(wait, async {
            loop {
                match endpoint.next_event().await {
                    Some(EndpointEvent::Open { .. }) => return OpenWait::Ready,
                    Some(EndpointEvent::Error(kind)) => return OpenWait::Failed(kind),
                    Some(EndpointEvent::Disconnected) => {
                        return OpenWait::Failed(EndpointErrorKind::Network);
                    }
                    // Too early to accept channels; let the cycle settle.
                    Some(EndpointEvent::Connection(mut channel)) => channel.close(),
                    None => return OpenWait::Failed(EndpointErrorKind::Socket),
                }
            }
        })
        .await;
        outcome.unwrap_or(OpenWait::TimedOut)
    }

    /// Wait for an inbound seeker while holding the slot.
    async fn await_inbound(
        holder: &mut T::Endpoint,
    ) -> HolderWait<<T::Endpoint as Endpoint>::Channel> {
        loop {
            match holder.next_event().await {
                Some(EndpointEvent::Connection(channel)) => return HolderWait::Inbound(channel),
                Some(EndpointEvent::Error(kind)) => return HolderWait::Lost(kind),
                Some(EndpointEvent::Disconnected) => {
                    return HolderWait::Lost(EndpointErrorKind::Network);
                }
                Some(EndpointEvent::Open { .. }) => continue,
                None => return HolderWait::Closed,
            }
        }
    }

    /// Wait for transport-level open on a freshly connected channel.
    async fn await_channel_open(channel: &mut <T::Endpoint as Endpoint>::Channel) -> bool {
        loop {
            match channel.next_event().await {
                Some(ChannelEvent::Open) => return true,
                Some(ChannelEvent::Data(_)) => continue,
                Some(ChannelEvent::Close) | Some(ChannelEvent::Error(_)) | None => return false,
            }
        }
    }

    /// Bound `want` by the time left until `deadline`.
    fn clamped(&self, want: Duration, deadline: Instant) -> Duration {
        want.min(deadline.saturating_duration_since(Instant::now()))
    }

    /// Sleep for `delay`, never past the deadline.
    async fn pause(&self, delay: Duration, deadline: Instant) {
        let delay = self.clamped(delay, deadline);
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}
