//! Connection-lifecycle state machine.
//!
//! One tagged [`SessionPhase`] value owns every lifecycle decision; all race
//! guards are matches on it, so there is no constellation of boolean flags to
//! fall out of sync. The machine is pure: the async driver feeds it events
//! and acts on its verdicts, which keeps every interleaving testable without
//! timers or I/O.
//!
//! Transitions:
//!
//! ```text
//! Idle -> Searching -> AwaitingHandshake -> Connected -> Closing -> Idle
//!            ^  |              |
//!            |  +-- retry      +-- open timeout -> Searching
//!            +------------------- teardown (auto-requeue)
//! ```

use thiserror::Error;

/// Lifecycle phase of the single active/attempted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session; user-actionable.
    Idle,
    /// The rendezvous race is running.
    Searching,
    /// A candidate channel is latched, waiting for transport-level open.
    AwaitingHandshake,
    /// Exactly one live peer channel.
    Connected,
    /// Local teardown in progress.
    Closing,
}

/// Why a candidate channel was turned away.
///
/// Not errors: losing channels are closed silently. This is the core defense
/// against duplicate pairing when a self-initiated and an externally-initiated
/// attempt resolve concurrently.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CandidateRejection {
    /// A session is already connected.
    #[error("already connected")]
    AlreadyConnected,
    /// The client is not presently searching.
    #[error("not searching")]
    NotSearching,
    /// The user-facing chat view is not active.
    #[error("chat view inactive")]
    ChatViewHidden,
}

/// What ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownTrigger {
    /// Explicit user disconnect or "new chat".
    Local,
    /// Peer-initiated close.
    PeerClosed,
    /// Transport error on the active channel.
    TransportError,
}

/// Verdict produced by [`Session::teardown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownVerdict {
    /// Whether the client should immediately re-enter the search.
    pub requeue: bool,
    /// Whether the peer deliberately left (suppressed the requeue).
    pub peer_left: bool,
}

/// Invalid state-machine transition.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid transition: {action} while {phase:?}")]
pub struct InvalidTransition {
    /// Phase the machine was in.
    pub phase: SessionPhase,
    /// Attempted action.
    pub action: &'static str,
}

/// The single active/attempted session.
#[derive(Debug, Clone)]
pub struct Session {
    phase: SessionPhase,
    auto_requeue: bool,
    chat_view_active: bool,
    search_attempts: u32,
    peer_left: bool,
    handshake_seen: bool,
}

impl Session {
    /// Create an idle session.
    ///
    /// `auto_requeue` controls whether teardown re-enters `Searching`
    /// automatically (except when the peer deliberately left).
    pub fn new(auto_requeue: bool) -> Self {
        Self {
            phase: SessionPhase::Idle,
            auto_requeue,
            chat_view_active: false,
            search_attempts: 0,
            peer_left: false,
            handshake_seen: false,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Seek/hold cycles recorded for the current search.
    pub fn search_attempts(&self) -> u32 {
        self.search_attempts
    }

    /// Record the attempt count reported by the rendezvous controller.
    pub fn record_attempts(&mut self, attempts: u32) {
        self.search_attempts = attempts;
    }

    /// Mark the user-facing chat view active or hidden.
    pub fn set_chat_view(&mut self, active: bool) {
        self.chat_view_active = active;
    }

    /// Start a search. `Idle -> Searching`.
    pub fn begin_search(&mut self) -> Result<(), InvalidTransition> {
        if self.phase != SessionPhase::Idle {
            return Err(self.invalid("begin_search"));
        }
        self.phase = SessionPhase::Searching;
        self.search_attempts = 0;
        self.peer_left = false;
        self.handshake_seen = false;
        Ok(())
    }

    /// Guard a candidate channel. `Searching -> AwaitingHandshake` on success.
    ///
    /// First candidate to pass wins; the machine latches and every later
    /// candidate is rejected without inspection.
    pub fn accept_candidate(&mut self) -> Result<(), CandidateRejection> {
        match self.phase {
            SessionPhase::Connected => Err(CandidateRejection::AlreadyConnected),
            SessionPhase::Searching if !self.chat_view_active => {
                Err(CandidateRejection::ChatViewHidden)
            }
            SessionPhase::Searching => {
                self.phase = SessionPhase::AwaitingHandshake;
                Ok(())
            }
            _ => Err(CandidateRejection::NotSearching),
        }
    }

    /// Transport-level open fired. `AwaitingHandshake -> Connected`.
    ///
    /// `Connected` implies exactly one live channel and zero pending
    /// connection attempts; the driver aborts the search task before calling
    /// this.
    pub fn channel_open(&mut self) -> Result<(), InvalidTransition> {
        if self.phase != SessionPhase::AwaitingHandshake {
            return Err(self.invalid("channel_open"));
        }
        self.phase = SessionPhase::Connected;
        Ok(())
    }

    /// The latched channel never opened. `AwaitingHandshake -> Searching`.
    pub fn open_timed_out(&mut self) -> Result<(), InvalidTransition> {
        if self.phase != SessionPhase::AwaitingHandshake {
            return Err(self.invalid("open_timed_out"));
        }
        self.phase = SessionPhase::Searching;
        self.search_attempts = 0;
        Ok(())
    }

    /// A `handshake` payload arrived. Returns whether to reply with
    /// `handshake-ack`.
    ///
    /// Idempotent: duplicates after the first are ignored and alter nothing.
    pub fn on_handshake(&mut self) -> bool {
        if self.phase == SessionPhase::Connected && !self.handshake_seen {
            self.handshake_seen = true;
            true
        } else {
            false
        }
    }

    /// A `stranger-disconnected` courtesy payload arrived.
    pub fn note_peer_left(&mut self) {
        if self.phase == SessionPhase::Connected {
            self.peer_left = true;
        }
    }

    /// Local disconnect requested. `Connected -> Closing`.
    pub fn begin_close(&mut self) -> Result<(), InvalidTransition> {
        if self.phase != SessionPhase::Connected {
            return Err(self.invalid("begin_close"));
        }
        self.phase = SessionPhase::Closing;
        Ok(())
    }

    /// Unified teardown. Every end-of-session path converges here.
    ///
    /// Re-enters `Searching` when the auto-requeue policy applies; otherwise
    /// lands in `Idle`. A deliberate peer departure (`stranger-disconnected`)
    /// suppresses the requeue for this cycle only.
    pub fn teardown(&mut self, trigger: TeardownTrigger) -> TeardownVerdict {
        let peer_left = self.peer_left;
        let requeue = self.auto_requeue
            && self.chat_view_active
            && trigger != TeardownTrigger::Local
            && !peer_left;

        self.peer_left = false;
        self.handshake_seen = false;
        self.search_attempts = 0;
        self.phase = if requeue {
            SessionPhase::Searching
        } else {
            SessionPhase::Idle
        };

        TeardownVerdict { requeue, peer_left }
    }

    /// The user abandoned the search. `Searching -> Idle`.
    pub fn cancel_search(&mut self) -> Result<(), InvalidTransition> {
        if self.phase != SessionPhase::Searching {
            return Err(self.invalid("cancel_search"));
        }
        self.phase = SessionPhase::Idle;
        self.search_attempts = 0;
        Ok(())
    }

    /// The search deadline elapsed. `Searching -> Idle`, exactly once.
    pub fn fail_search(&mut self) -> Result<(), InvalidTransition> {
        if self.phase != SessionPhase::Searching {
            return Err(self.invalid("fail_search"));
        }
        self.phase = SessionPhase::Idle;
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> InvalidTransition {
        InvalidTransition {
            phase: self.phase,
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn searching_session() -> Session {
        let mut session = Session::new(true);
        session.set_chat_view(true);
        session.begin_search().expect("begin_search from idle");
        session
    }

    fn connected_session() -> Session {
        let mut session = searching_session();
        session.accept_candidate().expect("candidate accepted");
        session.channel_open().expect("channel open");
        session
    }

    #[test]
    fn test_happy_path_reaches_connected() {
        let session = connected_session();
        assert_eq!(session.phase(), SessionPhase::Connected);
    }

    #[test]
    fn test_candidate_rejected_when_connected() {
        let mut session = connected_session();
        assert_eq!(
            session.accept_candidate(),
            Err(CandidateRejection::AlreadyConnected)
        );
        assert_eq!(session.phase(), SessionPhase::Connected);
    }

    #[test]
    fn test_candidate_rejected_when_not_searching() {
        let mut session = Session::new(true);
        session.set_chat_view(true);
        assert_eq!(
            session.accept_candidate(),
            Err(CandidateRejection::NotSearching)
        );
    }

    #[test]
    fn test_candidate_rejected_when_view_hidden() {
        let mut session = searching_session();
        session.set_chat_view(false);
        assert_eq!(
            session.accept_candidate(),
            Err(CandidateRejection::ChatViewHidden)
        );
    }

    #[test]
    fn test_first_candidate_latches_second_loses() {
        let mut session = searching_session();
        session.accept_candidate().expect("first candidate wins");
        assert_eq!(
            session.accept_candidate(),
            Err(CandidateRejection::NotSearching)
        );
    }

    #[test]
    fn test_at_most_one_connected_per_search() {
        // Whatever interleaving produced the candidates, only one channel
        // open can move the machine to Connected.
        let mut session = connected_session();
        assert!(session.channel_open().is_err());
        assert_eq!(session.phase(), SessionPhase::Connected);
    }

    #[test]
    fn test_handshake_is_idempotent() {
        let mut session = connected_session();
        assert!(session.on_handshake());
        assert!(!session.on_handshake());
        assert!(!session.on_handshake());
        assert_eq!(session.phase(), SessionPhase::Connected);
    }

    #[test]
    fn test_open_timeout_returns_to_searching() {
        let mut session = searching_session();
        session.accept_candidate().expect("candidate accepted");
        session.open_timed_out().expect("timeout valid");
        assert_eq!(session.phase(), SessionPhase::Searching);
    }

    #[test]
    fn test_transport_error_teardown_requeues() {
        let mut session = connected_session();
        let verdict = session.teardown(TeardownTrigger::TransportError);
        assert!(verdict.requeue);
        assert_eq!(session.phase(), SessionPhase::Searching);
    }

    #[test]
    fn test_peer_left_suppresses_requeue_once() {
        let mut session = connected_session();
        session.note_peer_left();
        let verdict = session.teardown(TeardownTrigger::PeerClosed);
        assert!(!verdict.requeue);
        assert!(verdict.peer_left);
        assert_eq!(session.phase(), SessionPhase::Idle);

        // Next cycle is back to normal policy.
        session.begin_search().expect("search restarts");
        session.accept_candidate().expect("candidate accepted");
        session.channel_open().expect("channel open");
        let verdict = session.teardown(TeardownTrigger::PeerClosed);
        assert!(verdict.requeue);
    }

    #[test]
    fn test_local_teardown_never_requeues() {
        let mut session = connected_session();
        session.begin_close().expect("closing");
        let verdict = session.teardown(TeardownTrigger::Local);
        assert!(!verdict.requeue);
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_requeue_disabled_by_policy() {
        let mut session = Session::new(false);
        session.set_chat_view(true);
        session.begin_search().expect("begin");
        session.accept_candidate().expect("accepted");
        session.channel_open().expect("open");
        let verdict = session.teardown(TeardownTrigger::TransportError);
        assert!(!verdict.requeue);
    }

    #[test]
    fn test_cancel_only_valid_while_searching() {
        let mut session = searching_session();
        session.cancel_search().expect("cancel while searching");
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.cancel_search().is_err());
    }

    #[test]
    fn test_search_fails_exactly_once() {
        let mut session = searching_session();
        session.fail_search().expect("first failure notice");
        assert!(session.fail_search().is_err());
        assert_eq!(session.phase(), SessionPhase::Idle);
    }
}
