//! Frontend-facing commands and events.
//!
//! The client is driven through [`ChatCommand`]s and reports back through
//! [`ChatEvent`]s; both are plain data so a UI layer can sit on any side of a
//! channel or FFI boundary.

use crate::rendezvous::PairingRole;
use crate::session::SessionPhase;
use crate::wire::CallType;

/// A request from the user-facing layer to the client driver.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Enter the chat view and search for a partner.
    StartSearch,
    /// Leave the chat view: close everything, no auto-requeue.
    Disconnect,
    /// Tell the current partner we left, then search again immediately.
    NewChat,
    /// Send a chat message.
    SendMessage {
        /// Message body.
        text: String,
    },
    /// Local input activity; drives the typing indicator.
    InputActivity,
    /// Attach an emoji reaction to a message.
    SendReaction {
        /// Reacted-to message.
        message_id: String,
        /// The emoji.
        emoji: String,
    },
    /// Remove a previously sent reaction.
    RemoveReaction {
        /// Reacted-to message.
        message_id: String,
        /// The emoji.
        emoji: String,
    },
    /// Ask the partner to start a call.
    RequestCall {
        /// Requested media kind.
        call_type: CallType,
    },
    /// Decline the pending incoming call.
    DeclineCall,
    /// End the active call.
    EndCall,
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEndReason {
    /// The peer ended the call.
    Ended,
    /// The peer declined the call.
    Declined,
}

/// A notification from the client driver to the user-facing layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// The session phase changed.
    PhaseChanged {
        /// New phase.
        phase: SessionPhase,
    },
    /// A partner was found and the channel is live.
    Connected {
        /// Which side of the rendezvous race we ended up on.
        role: PairingRole,
    },
    /// The search deadline elapsed; explicit user action resumes.
    SearchFailed {
        /// Seek/hold cycles completed before giving up.
        attempts: u32,
    },
    /// The session ended.
    PeerDisconnected {
        /// Whether a new search started automatically.
        requeued: bool,
        /// Whether the peer left deliberately ("new chat").
        deliberate: bool,
    },
    /// A local message went out on the channel.
    MessageSent {
        /// Assigned message identifier.
        message_id: String,
        /// Message body.
        text: String,
        /// Send time, milliseconds since the Unix epoch.
        timestamp: u64,
    },
    /// The partner sent a message.
    MessageReceived {
        /// Peer-assigned message identifier.
        message_id: String,
        /// Message body.
        text: String,
        /// Peer send time, milliseconds since the Unix epoch.
        timestamp: u64,
    },
    /// The partner saw one of our messages.
    MessageSeen {
        /// Identifier of the seen message.
        message_id: String,
    },
    /// The partner started or stopped typing.
    PeerTyping {
        /// Whether the partner is typing right now.
        active: bool,
    },
    /// The partner reacted to a message.
    ReactionAdded {
        /// Reacted-to message.
        message_id: String,
        /// The emoji.
        emoji: String,
    },
    /// The partner removed a reaction.
    ReactionRemoved {
        /// Reacted-to message.
        message_id: String,
        /// The emoji.
        emoji: String,
    },
    /// The partner wants to start a call.
    IncomingCall {
        /// Requested media kind.
        call_type: CallType,
    },
    /// The active or pending call ended.
    CallEnded {
        /// Why it ended.
        reason: CallEndReason,
    },
    /// Reconnect attempts are exhausted; a restart is required.
    ConnectionLost,
}
