//! Exponential backoff policy.
//!
//! One policy object shared by the reconnection supervisor and the rendezvous
//! retry paths, instead of ad-hoc delay math at each call site.

use std::time::Duration;

use crate::core::constants;

/// Multiplicative backoff with an upper bound.
///
/// The delay sequence is `initial, initial * multiplier, ...`, saturating at
/// `cap`. It is monotonically non-decreasing for any `multiplier >= 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    initial: Duration,
    multiplier: f64,
    cap: Duration,
}

impl BackoffPolicy {
    /// Create a policy. `multiplier` values below 1.0 are clamped to 1.0.
    pub fn new(initial: Duration, multiplier: f64, cap: Duration) -> Self {
        Self {
            initial,
            multiplier: multiplier.max(1.0),
            cap,
        }
    }

    /// The first delay in the sequence.
    pub fn initial(&self) -> Duration {
        self.initial
    }

    /// The delay bound.
    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// The delay that follows `current` in the sequence.
    pub fn next_after(&self, current: Duration) -> Duration {
        let scaled = current.mul_f64(self.multiplier);
        scaled.min(self.cap)
    }

    /// Start a stateful delay sequence.
    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            current: self.initial,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            constants::RECONNECT_INITIAL_DELAY,
            constants::RECONNECT_MULTIPLIER,
            constants::RECONNECT_MAX_DELAY,
        )
    }
}

/// A running delay sequence produced by [`BackoffPolicy::start`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    /// The delay to wait before the next attempt. Advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.policy.next_after(self.current);
        delay
    }

    /// The delay the next call to [`next_delay`](Self::next_delay) will return.
    pub fn peek(&self) -> Duration {
        self.current
    }

    /// Reset the sequence to its initial delay.
    pub fn reset(&mut self) {
        self.current = self.policy.initial;
    }
}
