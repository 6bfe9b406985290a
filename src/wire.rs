//! Channel wire messages.
//!
//! Every payload exchanged over an established channel is a small JSON object
//! with a `type` tag. The set is fire-and-forget: only `handshake`,
//! `handshake-ack` and `stranger-disconnected` feed the connection state
//! machine; the rest pass straight through to the session layer.

use serde::{Deserialize, Serialize};

/// Requested media kind for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    /// Audio-only call.
    Audio,
    /// Audio + video call.
    Video,
}

/// A payload carried on the peer channel.
///
/// Delivery is reliable and ordered per-channel; no cross-channel ordering is
/// guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireMessage {
    /// Application-level confirmation sent right after transport-level open.
    ///
    /// Observational: the channel is already considered connected when open
    /// fires; this is the first message both sides expect to exchange.
    #[serde(rename_all = "camelCase")]
    Handshake {
        /// Sender clock, milliseconds since the Unix epoch.
        timestamp: u64,
    },

    /// Reply to [`WireMessage::Handshake`].
    #[serde(rename_all = "camelCase")]
    HandshakeAck {
        /// Sender clock, milliseconds since the Unix epoch.
        timestamp: u64,
    },

    /// A chat message.
    #[serde(rename_all = "camelCase")]
    Message {
        /// Message body.
        text: String,
        /// Sender-assigned identifier, echoed back by `message-seen`.
        message_id: String,
        /// Sender clock, milliseconds since the Unix epoch.
        timestamp: u64,
    },

    /// Read receipt for a previously received message.
    #[serde(rename_all = "camelCase")]
    MessageSeen {
        /// Identifier of the message that was seen.
        message_id: String,
    },

    /// The peer started typing.
    Typing,

    /// The peer stopped typing.
    StopTyping,

    /// An emoji reaction attached to a message.
    #[serde(rename_all = "camelCase")]
    Reaction {
        /// Identifier of the reacted-to message.
        message_id: String,
        /// The reaction emoji.
        emoji: String,
    },

    /// A previously sent reaction was removed.
    #[serde(rename_all = "camelCase")]
    ReactionRemove {
        /// Identifier of the reacted-to message.
        message_id: String,
        /// The reaction emoji.
        emoji: String,
    },

    /// The peer wants to start a call.
    #[serde(rename_all = "camelCase")]
    CallRequest {
        /// Requested media kind.
        call_type: CallType,
    },

    /// The peer ended the active call.
    CallEnd,

    /// The peer declined an incoming call.
    CallDeclined,

    /// Courtesy notice that the peer deliberately left ("new chat").
    ///
    /// Suppresses auto-requeue on the receiving side for this cycle.
    StrangerDisconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_shape() {
        let msg = WireMessage::Message {
            text: "hi".into(),
            message_id: "m1".into(),
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "message",
                "text": "hi",
                "messageId": "m1",
                "timestamp": 1_700_000_000_000u64,
            })
        );
    }

    #[test]
    fn test_kebab_case_tags() {
        let seen = WireMessage::MessageSeen {
            message_id: "m1".into(),
        };
        let json = serde_json::to_value(&seen).unwrap();
        assert_eq!(json["type"], "message-seen");

        let left = WireMessage::StrangerDisconnected;
        let json = serde_json::to_value(&left).unwrap();
        assert_eq!(json["type"], "stranger-disconnected");
    }

    #[test]
    fn test_call_request_uses_lowercase_call_type() {
        let req = WireMessage::CallRequest {
            call_type: CallType::Video,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "call-request");
        assert_eq!(json["callType"], "video");
    }

    #[test]
    fn test_parses_foreign_handshake() {
        let msg: WireMessage =
            serde_json::from_str(r#"{"type":"handshake","timestamp":1234}"#).unwrap();
        assert_eq!(msg, WireMessage::Handshake { timestamp: 1234 });
    }
}
