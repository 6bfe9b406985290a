//! Protocol timing constants.
//!
//! The seek and rotation timeouts are empirically tuned for typical signaling
//! relay latency. Correctness (eventual pairing) does not depend on their
//! exact values, only pairing latency does, so every value here can be
//! overridden through [`ChatConfig`](crate::client::ChatConfig).

use std::time::Duration;

// =============================================================================
// RENDEZVOUS RACE
// =============================================================================

/// How long a seeker waits for its probe into the rendezvous slot to open
/// before it gives up and takes the holder role itself.
pub const SEEK_TIMEOUT: Duration = Duration::from_millis(150);

/// How long a holder stays discoverable at the rendezvous slot before
/// abandoning it and probing again as a seeker.
///
/// Deliberately asymmetric with [`SEEK_TIMEOUT`] so two clients that keep
/// missing each other fall out of lockstep.
pub const ROTATION_TIMEOUT: Duration = Duration::from_millis(300);

/// Pause between consecutive search cycles after a failed attempt.
pub const RETRY_DELAY: Duration = Duration::from_millis(50);

/// How long a freshly created endpoint may take to report open before the
/// search cycle rebuilds it.
pub const ENDPOINT_OPEN_TIMEOUT: Duration = Duration::from_secs(2);

/// Wall-clock ceiling on one search. Independent of the attempt count: after
/// this much elapsed time without a pairing, the search is surfaced as a
/// terminal, user-retriable failure.
pub const SEARCH_DEADLINE: Duration = Duration::from_secs(30);

/// Well-known suffix appended to the identity prefix to form the rendezvous
/// slot identifier.
pub const SLOT_SUFFIX: &str = "waiting";

/// Default identity prefix for endpoint identifiers and the rendezvous slot.
pub const DEFAULT_ID_PREFIX: &str = "rondo-chat-";

// =============================================================================
// CONNECTION STATE MACHINE
// =============================================================================

/// How long a latched channel may sit in `AwaitingHandshake` without the
/// transport reporting open before the client abandons it and searches again.
pub const HANDSHAKE_OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Idle time after the last local input activity before a `stop-typing`
/// notification is sent.
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// RECONNECTION SUPERVISOR
// =============================================================================

/// Backoff delay before the first reconnect attempt.
pub const RECONNECT_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Upper bound on the reconnect backoff delay.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Multiplier applied to the reconnect delay after each recovery cycle.
pub const RECONNECT_MULTIPLIER: f64 = 1.5;

/// Recovery attempts before the supervisor gives up and reports the endpoint
/// as lost.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Grace window for a lightweight `reconnect()` to report ready before the
/// supervisor rebuilds the endpoint under a fresh identity.
pub const RECONNECT_GRACE: Duration = Duration::from_secs(3);
