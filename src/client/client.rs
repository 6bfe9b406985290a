//! Chat client handle and driver task.
//!
//! [`ChatClient::start`] spawns one driver task that owns every moving part:
//! the session state machine, the rendezvous search task, the live channel,
//! the supervised endpoint and all timers. The handle only pushes
//! [`ChatCommand`]s into the driver; everything observable comes back out as
//! [`ChatEvent`]s. Single ownership in the driver means no locks and no
//! state shared with the caller.

use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, trace, warn};

use super::events::{CallEndReason, ChatCommand, ChatEvent};
use crate::backoff::BackoffPolicy;
use crate::core::constants;
use crate::core::SearchError;
use crate::identity::{unix_millis, IdentityProvider};
use crate::rendezvous::{Pairing, PairingRole, RendezvousConfig, RendezvousController};
use crate::session::{Session, SessionPhase, TeardownTrigger};
use crate::supervisor::{FailureVerdict, ReconnectionSupervisor};
use crate::transport::{Channel, ChannelEvent, Endpoint, EndpointEvent, Transport};
use crate::wire::WireMessage;

/// Error surfaced by [`ChatClient`] command methods.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The driver task has shut down and no longer accepts commands.
    #[error("client driver has shut down")]
    DriverGone,
}

/// Client configuration.
///
/// Defaults reproduce the standard protocol timings; every knob exists so
/// tests can compress the clock.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Prefix for freshly minted endpoint identifiers.
    pub id_prefix: String,
    /// The well-known rendezvous slot identifier.
    pub slot_id: String,
    /// Seeker probe timeout.
    pub seek_timeout: Duration,
    /// Holder rotation timeout.
    pub rotation_timeout: Duration,
    /// Pause between failed rendezvous cycles.
    pub retry_delay: Duration,
    /// How long a fresh endpoint may take to report open.
    pub endpoint_open_timeout: Duration,
    /// Wall-clock ceiling on one search.
    pub search_deadline: Duration,
    /// How long a latched candidate channel may take to open.
    pub handshake_open_timeout: Duration,
    /// Idle time after which the typing indicator auto-stops.
    pub typing_timeout: Duration,
    /// Whether teardown re-enters the search automatically.
    pub auto_requeue: bool,
    /// Pacing for endpoint recovery.
    pub reconnect_backoff: BackoffPolicy,
    /// Recovery attempt ceiling before giving up.
    pub max_reconnect_attempts: u32,
    /// Grace window for a lightweight reconnect before rebuilding.
    pub reconnect_grace: Duration,
    /// Outbound event channel capacity.
    pub event_buffer: usize,
    /// Inbound command channel capacity.
    pub command_buffer: usize,
}

impl ChatConfig {
    /// Defaults with identifiers derived from `prefix`.
    pub fn for_prefix(prefix: impl Into<String>) -> Self {
        let id_prefix = prefix.into();
        Self {
            slot_id: format!("{id_prefix}{}", constants::SLOT_SUFFIX),
            id_prefix,
            seek_timeout: constants::SEEK_TIMEOUT,
            rotation_timeout: constants::ROTATION_TIMEOUT,
            retry_delay: constants::RETRY_DELAY,
            endpoint_open_timeout: constants::ENDPOINT_OPEN_TIMEOUT,
            search_deadline: constants::SEARCH_DEADLINE,
            handshake_open_timeout: constants::HANDSHAKE_OPEN_TIMEOUT,
            typing_timeout: constants::TYPING_TIMEOUT,
            auto_requeue: true,
            reconnect_backoff: BackoffPolicy::default(),
            max_reconnect_attempts: constants::MAX_RECONNECT_ATTEMPTS,
            reconnect_grace: constants::RECONNECT_GRACE,
            event_buffer: 64,
            command_buffer: 16,
        }
    }

    /// Start building a configuration from the defaults.
    pub fn builder() -> ChatConfigBuilder {
        ChatConfigBuilder {
            config: Self::default(),
        }
    }

    fn rendezvous(&self) -> RendezvousConfig {
        RendezvousConfig {
            slot_id: self.slot_id.clone(),
            seek_timeout: self.seek_timeout,
            rotation_timeout: self.rotation_timeout,
            retry_delay: self.retry_delay,
            endpoint_open_timeout: self.endpoint_open_timeout,
            search_deadline: self.search_deadline,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::for_prefix(constants::DEFAULT_ID_PREFIX)
    }
}

/// Consuming builder for [`ChatConfig`].
#[derive(Debug, Clone)]
pub struct ChatConfigBuilder {
    config: ChatConfig,
}

impl ChatConfigBuilder {
    /// Identifier prefix; also re-derives the slot identifier.
    pub fn id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.id_prefix = prefix.into();
        self.config.slot_id = format!("{}{}", self.config.id_prefix, constants::SLOT_SUFFIX);
        self
    }

    /// Override the rendezvous slot identifier.
    pub fn slot_id(mut self, slot_id: impl Into<String>) -> Self {
        self.config.slot_id = slot_id.into();
        self
    }

    /// Seeker probe timeout.
    pub fn seek_timeout(mut self, timeout: Duration) -> Self {
        self.config.seek_timeout = timeout;
        self
    }

    /// Holder rotation timeout.
    pub fn rotation_timeout(mut self, timeout: Duration) -> Self {
        self.config.rotation_timeout = timeout;
        self
    }

    /// Wall-clock ceiling on one search.
    pub fn search_deadline(mut self, deadline: Duration) -> Self {
        self.config.search_deadline = deadline;
        self
    }

    /// How long a latched candidate channel may take to open.
    pub fn handshake_open_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_open_timeout = timeout;
        self
    }

    /// Idle time after which the typing indicator auto-stops.
    pub fn typing_timeout(mut self, timeout: Duration) -> Self {
        self.config.typing_timeout = timeout;
        self
    }

    /// Whether teardown re-enters the search automatically.
    pub fn auto_requeue(mut self, requeue: bool) -> Self {
        self.config.auto_requeue = requeue;
        self
    }

    /// Pacing for endpoint recovery.
    pub fn reconnect_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.config.reconnect_backoff = policy;
        self
    }

    /// Recovery attempt ceiling before giving up.
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Finish building.
    pub fn build(self) -> ChatConfig {
        self.config
    }
}

/// Receiving half of the client's event stream.
pub struct ChatEvents {
    receiver: mpsc::Receiver<ChatEvent>,
}

impl ChatEvents {
    /// Next event, or `None` once the driver has shut down.
    pub async fn recv(&mut self) -> Option<ChatEvent> {
        self.receiver.recv().await
    }
}

/// Handle to a running chat client.
///
/// Dropping the handle shuts the driver down.
pub struct ChatClient {
    commands: mpsc::Sender<ChatCommand>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ChatClient {
    /// Spawn the driver task on the current runtime.
    pub fn start<T: Transport>(transport: T, config: ChatConfig) -> (Self, ChatEvents) {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let driver = Driver::new(transport, config, event_tx);
        tokio::spawn(driver.run(command_rx, shutdown_rx));

        (
            Self {
                commands: command_tx,
                shutdown: Some(shutdown_tx),
            },
            ChatEvents { receiver: event_rx },
        )
    }

    /// Send a raw command to the driver.
    pub async fn command(&self, command: ChatCommand) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::DriverGone)
    }

    /// Enter the chat view and search for a partner.
    pub async fn start_search(&self) -> Result<(), ClientError> {
        self.command(ChatCommand::StartSearch).await
    }

    /// Leave the chat view and close everything.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.command(ChatCommand::Disconnect).await
    }

    /// Tell the current partner we left, then search again immediately.
    pub async fn new_chat(&self) -> Result<(), ClientError> {
        self.command(ChatCommand::NewChat).await
    }

    /// Send a chat message.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.command(ChatCommand::SendMessage { text: text.into() })
            .await
    }

    /// Report local input activity for the typing indicator.
    pub async fn input_activity(&self) -> Result<(), ClientError> {
        self.command(ChatCommand::InputActivity).await
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

type Chan<T> = <<T as Transport>::Endpoint as Endpoint>::Channel;

/// One step of the driver loop, decoupled from the select so handlers can
/// borrow the driver freely.
enum Step<T: Transport> {
    Shutdown,
    Command(Option<ChatCommand>),
    SearchDone(Result<Result<Pairing<T::Endpoint>, SearchError>, JoinError>),
    ChannelEvent(Option<ChannelEvent>),
    EndpointEvent(Option<EndpointEvent<Chan<T>>>),
    TimerFired,
}

struct Driver<T: Transport> {
    transport: T,
    config: ChatConfig,
    identities: IdentityProvider,
    rendezvous: RendezvousController<T>,
    session: Session,
    supervisor: ReconnectionSupervisor,
    events: mpsc::Sender<ChatEvent>,

    endpoint: Option<T::Endpoint>,
    channel: Option<Chan<T>>,
    role: Option<PairingRole>,
    search: Option<JoinHandle<Result<Pairing<T::Endpoint>, SearchError>>>,

    open_deadline: Option<Instant>,
    typing_stop_at: Option<Instant>,
    reconnect_at: Option<Instant>,
    grace_at: Option<Instant>,

    typing_sent: bool,
    call_pending: bool,
    connection_lost: bool,
}

impl<T: Transport> Driver<T> {
    fn new(transport: T, config: ChatConfig, events: mpsc::Sender<ChatEvent>) -> Self {
        let identities = IdentityProvider::new(config.id_prefix.clone());
        let rendezvous = RendezvousController::new(
            transport.clone(),
            identities.clone(),
            config.rendezvous(),
        );
        let supervisor = ReconnectionSupervisor::new(
            config.reconnect_backoff,
            config.max_reconnect_attempts,
            config.reconnect_grace,
        );
        let session = Session::new(config.auto_requeue);
        // Supervised from the start, even before the first search.
        let endpoint = transport.create(identities.fresh());

        Self {
            transport,
            config,
            identities,
            rendezvous,
            session,
            supervisor,
            events,
            endpoint: Some(endpoint),
            channel: None,
            role: None,
            search: None,
            open_deadline: None,
            typing_stop_at: None,
            reconnect_at: None,
            grace_at: None,
            typing_sent: false,
            call_pending: false,
            connection_lost: false,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ChatCommand>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            let timer = self.next_deadline();
            let searching = self.search.is_some();
            let has_channel = self.channel.is_some();
            let has_endpoint = self.endpoint.is_some();

            let step: Step<T> = {
                let Driver {
                    search,
                    channel,
                    endpoint,
                    ..
                } = &mut self;

                tokio::select! {
                    _ = &mut shutdown => Step::Shutdown,
                    command = commands.recv() => Step::Command(command),
                    outcome = async {
                        match search.as_mut() {
                            Some(handle) => handle.await,
                            None => std::future::pending().await,
                        }
                    }, if searching => Step::SearchDone(outcome),
                    event = async {
                        match channel.as_mut() {
                            Some(channel) => channel.next_event().await,
                            None => std::future::pending().await,
                        }
                    }, if has_channel => Step::ChannelEvent(event),
                    event = async {
                        match endpoint.as_mut() {
                            Some(endpoint) => endpoint.next_event().await,
                            None => std::future::pending().await,
                        }
                    }, if has_endpoint => Step::EndpointEvent(event),
                    _ = sleep_until(timer.unwrap_or_else(Instant::now)), if timer.is_some() => {
                        Step::TimerFired
                    }
                }
            };

            match step {
                Step::Shutdown | Step::Command(None) => break,
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::SearchDone(outcome) => {
                    self.search = None;
                    self.handle_search_outcome(outcome).await;
                }
                Step::ChannelEvent(event) => self.handle_channel_event(event).await,
                Step::EndpointEvent(event) => self.handle_endpoint_event(event).await,
                Step::TimerFired => self.handle_timers().await,
            }
        }

        self.release();
    }

    // ------------------------- commands -------------------------

    async fn handle_command(&mut self, command: ChatCommand) {
        trace!(?command, "handling command");
        match command {
            ChatCommand::StartSearch => self.start_search().await,
            ChatCommand::Disconnect => self.user_disconnect().await,
            ChatCommand::NewChat => self.new_chat().await,
            ChatCommand::SendMessage { text } => self.send_chat_message(text).await,
            ChatCommand::InputActivity => self.input_activity(),
            ChatCommand::SendReaction { message_id, emoji } => {
                self.send_if_connected(&WireMessage::Reaction { message_id, emoji });
            }
            ChatCommand::RemoveReaction { message_id, emoji } => {
                self.send_if_connected(&WireMessage::ReactionRemove { message_id, emoji });
            }
            ChatCommand::RequestCall { call_type } => {
                self.send_if_connected(&WireMessage::CallRequest { call_type });
            }
            ChatCommand::DeclineCall => {
                self.call_pending = false;
                self.send_if_connected(&WireMessage::CallDeclined);
            }
            ChatCommand::EndCall => {
                self.call_pending = false;
                self.send_if_connected(&WireMessage::CallEnd);
            }
        }
    }

    async fn start_search(&mut self) {
        self.session.set_chat_view(true);
        if let Err(err) = self.session.begin_search() {
            debug!(%err, "search request ignored");
            return;
        }
        self.emit(ChatEvent::PhaseChanged {
            phase: SessionPhase::Searching,
        })
        .await;
        self.spawn_search();
    }

    async fn user_disconnect(&mut self) {
        self.session.set_chat_view(false);
        if let Some(handle) = self.search.take() {
            handle.abort();
        }

        match self.session.phase() {
            SessionPhase::Connected => {
                let _ = self.session.begin_close();
                self.teardown(TeardownTrigger::Local).await;
            }
            SessionPhase::AwaitingHandshake | SessionPhase::Closing => {
                self.teardown(TeardownTrigger::Local).await;
            }
            SessionPhase::Searching => {
                let _ = self.session.cancel_search();
                self.emit(ChatEvent::PhaseChanged {
                    phase: SessionPhase::Idle,
                })
                .await;
            }
            SessionPhase::Idle => {}
        }

        // Explicit disconnect tears the endpoint down too and forgets any
        // recovery history.
        self.supervisor.on_ready();
        self.connection_lost = false;
        self.reconnect_at = None;
        self.grace_at = None;
        if let Some(mut endpoint) = self.endpoint.take() {
            endpoint.close();
        }
    }

    async fn new_chat(&mut self) {
        self.session.set_chat_view(true);
        if let Some(handle) = self.search.take() {
            handle.abort();
        }

        match self.session.phase() {
            SessionPhase::Connected => {
                // Courtesy notice so the partner lands in Idle instead of
                // silently requeueing.
                self.send_payload(&WireMessage::StrangerDisconnected);
                let _ = self.session.begin_close();
                self.drop_channel();
                let _ = self.session.teardown(TeardownTrigger::Local);
            }
            SessionPhase::AwaitingHandshake | SessionPhase::Closing => {
                self.drop_channel();
                let _ = self.session.teardown(TeardownTrigger::Local);
            }
            SessionPhase::Searching => {
                let _ = self.session.cancel_search();
            }
            SessionPhase::Idle => {}
        }

        self.supervisor.on_ready();
        self.connection_lost = false;
        self.reconnect_at = None;
        self.grace_at = None;

        if self.session.begin_search().is_ok() {
            self.emit(ChatEvent::PhaseChanged {
                phase: SessionPhase::Searching,
            })
            .await;
            self.spawn_search();
        }
    }

    async fn send_chat_message(&mut self, text: String) {
        if self.session.phase() != SessionPhase::Connected || text.trim().is_empty() {
            return;
        }
        let message_id = message_id();
        let timestamp = unix_millis();
        let sent = self.send_payload(&WireMessage::Message {
            text: text.clone(),
            message_id: message_id.clone(),
            timestamp,
        });
        if sent {
            self.emit(ChatEvent::MessageSent {
                message_id,
                text,
                timestamp,
            })
            .await;
        }
        // Sending a message always ends the typing indicator.
        if self.typing_sent {
            self.send_payload(&WireMessage::StopTyping);
            self.typing_sent = false;
        }
        self.typing_stop_at = None;
    }

    fn input_activity(&mut self) {
        if self.session.phase() != SessionPhase::Connected {
            return;
        }
        if !self.typing_sent && self.send_payload(&WireMessage::Typing) {
            self.typing_sent = true;
        }
        self.typing_stop_at = Some(Instant::now() + self.config.typing_timeout);
    }

    // ------------------------- search -------------------------

    fn spawn_search(&mut self) {
        // The race builds its own endpoints; the idle one would only shadow
        // the slot.
        if let Some(mut endpoint) = self.endpoint.take() {
            endpoint.close();
        }
        self.reconnect_at = None;
        self.grace_at = None;
        // Any recovery cycle scheduled for the closed endpoint is abandoned
        // with it.
        self.supervisor.cancel();

        let rendezvous = self.rendezvous.clone();
        self.search = Some(tokio::spawn(async move { rendezvous.search().await }));
    }

    async fn handle_search_outcome(
        &mut self,
        outcome: Result<Result<Pairing<T::Endpoint>, SearchError>, JoinError>,
    ) {
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                if err.is_cancelled() {
                    return;
                }
                error!(%err, "search task failed");
                if self.session.fail_search().is_ok() {
                    self.emit(ChatEvent::SearchFailed { attempts: 0 }).await;
                    self.emit(ChatEvent::PhaseChanged {
                        phase: SessionPhase::Idle,
                    })
                    .await;
                }
                self.ensure_endpoint();
                return;
            }
        };

        match result {
            Ok(pairing) => self.latch_pairing(pairing).await,
            Err(SearchError::Exhausted { attempts, elapsed }) => {
                debug!(attempts, ?elapsed, "search exhausted");
                if self.session.fail_search().is_ok() {
                    self.emit(ChatEvent::SearchFailed { attempts }).await;
                    self.emit(ChatEvent::PhaseChanged {
                        phase: SessionPhase::Idle,
                    })
                    .await;
                }
                self.ensure_endpoint();
            }
            Err(SearchError::Cancelled) => {}
        }
    }

    async fn latch_pairing(&mut self, pairing: Pairing<T::Endpoint>) {
        if let Err(rejection) = self.session.accept_candidate() {
            debug!(%rejection, "closing losing pairing");
            let Pairing {
                mut endpoint,
                mut channel,
                ..
            } = pairing;
            channel.close();
            endpoint.close();
            return;
        }

        self.session.record_attempts(pairing.attempts);
        self.role = Some(pairing.role);
        self.channel = Some(pairing.channel);
        self.endpoint = Some(pairing.endpoint);
        self.emit(ChatEvent::PhaseChanged {
            phase: SessionPhase::AwaitingHandshake,
        })
        .await;

        if pairing.channel_open {
            self.finalize_connected().await;
        } else {
            self.open_deadline = Some(Instant::now() + self.config.handshake_open_timeout);
        }
    }

    async fn finalize_connected(&mut self) {
        if self.session.channel_open().is_err() {
            return;
        }
        self.open_deadline = None;
        self.send_payload(&WireMessage::Handshake {
            timestamp: unix_millis(),
        });
        self.emit(ChatEvent::PhaseChanged {
            phase: SessionPhase::Connected,
        })
        .await;
        if let Some(role) = self.role {
            self.emit(ChatEvent::Connected { role }).await;
        }
    }

    // ------------------------- channel -------------------------

    async fn handle_channel_event(&mut self, event: Option<ChannelEvent>) {
        match event {
            Some(ChannelEvent::Open) => {
                if self.session.phase() == SessionPhase::AwaitingHandshake {
                    self.finalize_connected().await;
                }
            }
            Some(ChannelEvent::Data(message)) => self.handle_wire(message).await,
            Some(ChannelEvent::Close) | None => {
                self.teardown(TeardownTrigger::PeerClosed).await;
            }
            Some(ChannelEvent::Error(reason)) => {
                warn!(%reason, "channel error");
                self.teardown(TeardownTrigger::TransportError).await;
            }
        }
    }

    async fn handle_wire(&mut self, message: WireMessage) {
        match message {
            WireMessage::Handshake { .. } => {
                if self.session.on_handshake() {
                    self.send_payload(&WireMessage::HandshakeAck {
                        timestamp: unix_millis(),
                    });
                }
            }
            WireMessage::HandshakeAck { .. } => {
                trace!("handshake confirmed by peer");
            }
            WireMessage::Message {
                text,
                message_id,
                timestamp,
            } => {
                // Read receipt goes out before the UI even sees the message.
                self.send_payload(&WireMessage::MessageSeen {
                    message_id: message_id.clone(),
                });
                self.emit(ChatEvent::MessageReceived {
                    message_id,
                    text,
                    timestamp,
                })
                .await;
            }
            WireMessage::MessageSeen { message_id } => {
                self.emit(ChatEvent::MessageSeen { message_id }).await;
            }
            WireMessage::Typing => {
                self.emit(ChatEvent::PeerTyping { active: true }).await;
            }
            WireMessage::StopTyping => {
                self.emit(ChatEvent::PeerTyping { active: false }).await;
            }
            WireMessage::Reaction { message_id, emoji } => {
                self.emit(ChatEvent::ReactionAdded { message_id, emoji })
                    .await;
            }
            WireMessage::ReactionRemove { message_id, emoji } => {
                self.emit(ChatEvent::ReactionRemoved { message_id, emoji })
                    .await;
            }
            WireMessage::CallRequest { call_type } => {
                if self.call_pending {
                    // One call at a time; a second request is declined
                    // without consulting the user.
                    self.send_payload(&WireMessage::CallDeclined);
                } else {
                    self.call_pending = true;
                    self.emit(ChatEvent::IncomingCall { call_type }).await;
                }
            }
            WireMessage::CallEnd => {
                self.call_pending = false;
                self.emit(ChatEvent::CallEnded {
                    reason: CallEndReason::Ended,
                })
                .await;
            }
            WireMessage::CallDeclined => {
                self.call_pending = false;
                self.emit(ChatEvent::CallEnded {
                    reason: CallEndReason::Declined,
                })
                .await;
            }
            WireMessage::StrangerDisconnected => {
                self.session.note_peer_left();
                self.teardown(TeardownTrigger::PeerClosed).await;
            }
        }
    }

    /// Every end-of-session path converges here.
    async fn teardown(&mut self, trigger: TeardownTrigger) {
        if !matches!(
            self.session.phase(),
            SessionPhase::AwaitingHandshake | SessionPhase::Connected | SessionPhase::Closing
        ) {
            self.drop_channel();
            return;
        }

        self.drop_channel();
        let verdict = self.session.teardown(trigger);

        if trigger != TeardownTrigger::Local {
            self.emit(ChatEvent::PeerDisconnected {
                requeued: verdict.requeue,
                deliberate: verdict.peer_left,
            })
            .await;
        }

        if verdict.requeue {
            self.emit(ChatEvent::PhaseChanged {
                phase: SessionPhase::Searching,
            })
            .await;
            self.spawn_search();
        } else {
            self.emit(ChatEvent::PhaseChanged {
                phase: SessionPhase::Idle,
            })
            .await;
            self.ensure_endpoint();
        }
    }

    fn drop_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.role = None;
        self.open_deadline = None;
        self.typing_stop_at = None;
        self.typing_sent = false;
        self.call_pending = false;
    }

    // ------------------------- endpoint -------------------------

    async fn handle_endpoint_event(&mut self, event: Option<EndpointEvent<Chan<T>>>) {
        match event {
            Some(EndpointEvent::Open { id }) => {
                debug!(%id, "endpoint open");
                self.supervisor.on_ready();
                self.connection_lost = false;
                self.reconnect_at = None;
                self.grace_at = None;
            }
            Some(EndpointEvent::Connection(mut channel)) => {
                match self.session.accept_candidate() {
                    Ok(()) => {
                        if let Some(handle) = self.search.take() {
                            handle.abort();
                        }
                        self.role = Some(PairingRole::Holder);
                        self.channel = Some(channel);
                        self.open_deadline =
                            Some(Instant::now() + self.config.handshake_open_timeout);
                        self.emit(ChatEvent::PhaseChanged {
                            phase: SessionPhase::AwaitingHandshake,
                        })
                        .await;
                    }
                    Err(rejection) => {
                        debug!(%rejection, "rejecting inbound channel");
                        channel.close();
                    }
                }
            }
            Some(EndpointEvent::Error(kind)) => {
                if kind.is_recoverable() {
                    self.trigger_recovery().await;
                } else {
                    debug!(%kind, "unrecoverable endpoint error outside the race");
                }
            }
            Some(EndpointEvent::Disconnected) => {
                self.trigger_recovery().await;
            }
            None => {
                self.endpoint = None;
                self.trigger_recovery().await;
            }
        }
    }

    async fn trigger_recovery(&mut self) {
        // Fatal state is latched: the lost notice fires exactly once.
        if self.connection_lost {
            return;
        }
        match self.supervisor.on_failure() {
            FailureVerdict::Schedule { delay } => {
                self.reconnect_at = Some(Instant::now() + delay);
            }
            FailureVerdict::AlreadyRecovering => {}
            FailureVerdict::GiveUp => {
                error!(error = %self.supervisor.exhaustion_error(), "endpoint unrecoverable");
                self.connection_lost = true;
                self.reconnect_at = None;
                self.grace_at = None;
                self.emit(ChatEvent::ConnectionLost).await;
            }
        }
    }

    fn rebuild_endpoint(&mut self) {
        if let Some(mut endpoint) = self.endpoint.take() {
            endpoint.close();
        }
        self.endpoint = Some(self.transport.create(self.identities.fresh()));
    }

    fn ensure_endpoint(&mut self) {
        if self.endpoint.is_none() {
            self.endpoint = Some(self.transport.create(self.identities.fresh()));
        }
    }

    // ------------------------- timers -------------------------

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.open_deadline,
            self.typing_stop_at,
            self.reconnect_at,
            self.grace_at,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    async fn handle_timers(&mut self) {
        let now = Instant::now();

        if self.open_deadline.is_some_and(|at| at <= now) {
            self.open_deadline = None;
            if self.session.open_timed_out().is_ok() {
                debug!("candidate channel never opened, searching again");
                self.drop_channel();
                self.emit(ChatEvent::PhaseChanged {
                    phase: SessionPhase::Searching,
                })
                .await;
                self.spawn_search();
            }
        }

        if self.typing_stop_at.is_some_and(|at| at <= now) {
            self.typing_stop_at = None;
            if self.typing_sent {
                self.send_payload(&WireMessage::StopTyping);
                self.typing_sent = false;
            }
        }

        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            match self.endpoint.as_mut() {
                Some(endpoint) => {
                    // Lightweight reconnect first; rebuild only if the grace
                    // window passes without an open.
                    endpoint.reconnect();
                    self.grace_at = Some(now + self.supervisor.grace());
                }
                None => {
                    self.rebuild_endpoint();
                    self.supervisor.on_cycle_complete();
                }
            }
        }

        if self.grace_at.is_some_and(|at| at <= now) {
            self.grace_at = None;
            debug!("reconnect grace elapsed, rebuilding endpoint");
            self.rebuild_endpoint();
            self.supervisor.on_cycle_complete();
        }
    }

    // ------------------------- plumbing -------------------------

    fn send_if_connected(&mut self, message: &WireMessage) {
        if self.session.phase() == SessionPhase::Connected {
            self.send_payload(message);
        }
    }

    fn send_payload(&mut self, message: &WireMessage) -> bool {
        let Some(channel) = self.channel.as_ref() else {
            return false;
        };
        match channel.send(message) {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "channel send failed");
                false
            }
        }
    }

    async fn emit(&self, event: ChatEvent) {
        // A dropped receiver only mutes events; commands still drain until
        // the handle goes away.
        let _ = self.events.send(event).await;
    }

    fn release(&mut self) {
        if let Some(handle) = self.search.take() {
            handle.abort();
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        if let Some(mut endpoint) = self.endpoint.take() {
            endpoint.close();
        }
    }
}

/// Sender-assigned chat message identifier.
fn message_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("msg_{}_{}", unix_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_protocol_timings() {
        let config = ChatConfig::default();
        assert_eq!(config.slot_id, "rondo-chat-waiting");
        assert_eq!(config.seek_timeout, Duration::from_millis(150));
        assert_eq!(config.rotation_timeout, Duration::from_millis(300));
        assert_eq!(config.search_deadline, Duration::from_secs(30));
        assert!(config.auto_requeue);
    }

    #[test]
    fn test_builder_rederives_slot_from_prefix() {
        let config = ChatConfig::builder().id_prefix("lobby-").build();
        assert_eq!(config.slot_id, "lobby-waiting");
        assert_eq!(config.id_prefix, "lobby-");
    }

    #[test]
    fn test_builder_slot_override_wins() {
        let config = ChatConfig::builder()
            .id_prefix("lobby-")
            .slot_id("custom-slot")
            .build();
        assert_eq!(config.slot_id, "custom-slot");
    }

    #[test]
    fn test_message_ids_are_unique_and_shaped() {
        let a = message_id();
        let b = message_id();
        assert_ne!(a, b);
        assert!(a.starts_with("msg_"));
        assert_eq!(a.rsplit('_').next().map(str::len), Some(9));
    }

    #[cfg(feature = "memory-transport")]
    mod driver {
        use super::*;
        use crate::transport::MemoryTransport;

        fn test_config() -> ChatConfig {
            ChatConfig::builder()
                .id_prefix("test-")
                .search_deadline(Duration::from_secs(2))
                .build()
        }

        #[tokio::test(start_paused = true)]
        async fn test_lone_search_fails_once_then_goes_idle() {
            let transport = MemoryTransport::new();
            let (client, mut events) = ChatClient::start(transport, test_config());
            client.start_search().await.unwrap();

            assert_eq!(
                events.recv().await,
                Some(ChatEvent::PhaseChanged {
                    phase: SessionPhase::Searching
                })
            );
            match events.recv().await {
                Some(ChatEvent::SearchFailed { attempts }) => assert!(attempts > 0),
                other => panic!("expected search failure, got {other:?}"),
            }
            assert_eq!(
                events.recv().await,
                Some(ChatEvent::PhaseChanged {
                    phase: SessionPhase::Idle
                })
            );
        }

        #[tokio::test(start_paused = true)]
        async fn test_second_search_request_is_ignored_while_searching() {
            let transport = MemoryTransport::new();
            let (client, mut events) = ChatClient::start(transport, test_config());
            client.start_search().await.unwrap();
            client.start_search().await.unwrap();

            assert_eq!(
                events.recv().await,
                Some(ChatEvent::PhaseChanged {
                    phase: SessionPhase::Searching
                })
            );
            // Exactly one searching notification; the next event is the
            // deadline failure.
            assert!(matches!(
                events.recv().await,
                Some(ChatEvent::SearchFailed { .. })
            ));
        }

        #[tokio::test(start_paused = true)]
        async fn test_disconnect_while_searching_returns_to_idle() {
            let transport = MemoryTransport::new();
            let (client, mut events) = ChatClient::start(transport, test_config());
            client.start_search().await.unwrap();
            assert_eq!(
                events.recv().await,
                Some(ChatEvent::PhaseChanged {
                    phase: SessionPhase::Searching
                })
            );

            client.disconnect().await.unwrap();
            assert_eq!(
                events.recv().await,
                Some(ChatEvent::PhaseChanged {
                    phase: SessionPhase::Idle
                })
            );
        }

        #[tokio::test(start_paused = true)]
        async fn test_start_accepts_any_transport_impl() {
            // Instantiated generically so the driver's spawn bounds hold for
            // every Transport, not just the loopback one.
            fn start_generic<T: Transport>(transport: T) -> (ChatClient, ChatEvents) {
                ChatClient::start(transport, ChatConfig::builder().id_prefix("any-").build())
            }
            let (_client, _events) = start_generic(MemoryTransport::new());
        }

        #[tokio::test(start_paused = true)]
        async fn test_severed_idle_endpoint_reconnects() {
            let transport = MemoryTransport::new();
            let (_client, _events) = ChatClient::start(transport.clone(), test_config());

            let id = transport
                .registered_ids()
                .pop()
                .expect("idle endpoint registered at startup");
            transport.sever(&id);

            // Backoff starts at 500ms; the lightweight reconnect restores
            // the registration well before any rebuild.
            let mut restored = false;
            for _ in 0..30 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                if transport.is_registered(&id) {
                    restored = true;
                    break;
                }
            }
            assert!(restored, "reconnect never restored the registration");
        }

        #[tokio::test(start_paused = true)]
        async fn test_relay_outage_exhausts_reconnects_with_single_notice() {
            let transport = MemoryTransport::new();
            let config = ChatConfig::builder()
                .id_prefix("outage-")
                .max_reconnect_attempts(2)
                .build();
            let (_client, mut events) = ChatClient::start(transport.clone(), config);

            let id = transport
                .registered_ids()
                .pop()
                .expect("idle endpoint registered at startup");
            transport.set_offline(true);
            transport.sever(&id);

            tokio::time::timeout(Duration::from_secs(120), async {
                loop {
                    match events.recv().await {
                        Some(ChatEvent::ConnectionLost) => break,
                        Some(other) => panic!("unexpected event {other:?}"),
                        None => panic!("event stream ended"),
                    }
                }
            })
            .await
            .expect("connection-lost never surfaced");

            // The fatal notice is latched; further endpoint failures stay
            // silent.
            let quiet = tokio::time::timeout(Duration::from_secs(10), events.recv()).await;
            assert!(quiet.is_err(), "expected silence, got {quiet:?}");
        }
    }
}
