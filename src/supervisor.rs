//! Reconnection supervision for the signaling endpoint.
//!
//! Keeps the endpoint alive independent of chat state. The supervisor is a
//! pure policy object: the driver reports failures and readiness, and acts on
//! the verdicts (schedule a retry, try a lightweight `reconnect()` with a
//! grace window before rebuilding, or give up).

use std::time::Duration;

use tracing::{debug, warn};

use crate::backoff::{Backoff, BackoffPolicy};
use crate::core::constants;
use crate::core::SupervisorError;

/// Snapshot of one failure-recovery cycle's bookkeeping.
///
/// Reset to initial values whenever the endpoint reports ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectState {
    /// Recovery attempts since the last successful open.
    pub attempts: u32,
    /// Whether a recovery cycle is currently running.
    pub in_progress: bool,
}

/// Verdict for one reported endpoint failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// A recovery cycle is already running; this trigger coalesces into it.
    AlreadyRecovering,
    /// Schedule one retry after `delay`.
    Schedule {
        /// Backoff delay before the retry fires.
        delay: Duration,
    },
    /// The attempt ceiling is reached. Fatal for this process instance.
    GiveUp,
}

/// Watches endpoint health and paces recovery with exponential backoff.
#[derive(Debug)]
pub struct ReconnectionSupervisor {
    backoff: Backoff,
    policy: BackoffPolicy,
    max_attempts: u32,
    grace: Duration,
    attempts: u32,
    in_progress: bool,
}

impl ReconnectionSupervisor {
    /// Create a supervisor with the given pacing policy.
    pub fn new(policy: BackoffPolicy, max_attempts: u32, grace: Duration) -> Self {
        Self {
            backoff: policy.start(),
            policy,
            max_attempts,
            grace,
            attempts: 0,
            in_progress: false,
        }
    }

    /// An endpoint-level failure was observed.
    ///
    /// At most one recovery cycle runs at a time: overlapping triggers
    /// coalesce instead of stacking.
    pub fn on_failure(&mut self) -> FailureVerdict {
        if self.in_progress {
            debug!("recovery already in progress, coalescing trigger");
            return FailureVerdict::AlreadyRecovering;
        }
        if self.attempts >= self.max_attempts {
            warn!(attempts = self.attempts, "reconnect attempts exhausted");
            return FailureVerdict::GiveUp;
        }

        self.in_progress = true;
        self.attempts += 1;
        let delay = self.backoff.peek();
        debug!(
            attempt = self.attempts,
            max = self.max_attempts,
            ?delay,
            "scheduling reconnect"
        );
        FailureVerdict::Schedule { delay }
    }

    /// The scheduled retry ran (reconnect issued or endpoint rebuilt).
    ///
    /// Clears the in-progress flag and advances the backoff delay for the
    /// next cycle.
    pub fn on_cycle_complete(&mut self) {
        self.in_progress = false;
        let _ = self.backoff.next_delay();
    }

    /// The scheduled retry was abandoned before it ran.
    ///
    /// Clears the in-progress flag so the next failure can schedule a fresh
    /// cycle; the backoff delay stays where it was.
    pub fn cancel(&mut self) {
        if self.in_progress {
            debug!("abandoning scheduled recovery cycle");
            self.in_progress = false;
        }
    }

    /// The endpoint reported ready; recovery bookkeeping resets fully.
    pub fn on_ready(&mut self) {
        if self.attempts > 0 || self.in_progress {
            debug!("endpoint ready, resetting reconnect state");
        }
        self.attempts = 0;
        self.in_progress = false;
        self.backoff = self.policy.start();
    }

    /// Grace window for a lightweight reconnect before rebuilding.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// The error surfaced when [`FailureVerdict::GiveUp`] is returned.
    pub fn exhaustion_error(&self) -> SupervisorError {
        SupervisorError::AttemptsExhausted(self.max_attempts)
    }

    /// Current bookkeeping snapshot.
    pub fn state(&self) -> ReconnectState {
        ReconnectState {
            attempts: self.attempts,
            in_progress: self.in_progress,
        }
    }
}

impl Default for ReconnectionSupervisor {
    fn default() -> Self {
        Self::new(
            BackoffPolicy::default(),
            constants::MAX_RECONNECT_ATTEMPTS,
            constants::RECONNECT_GRACE,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_failure_schedules_initial_delay() {
        let mut supervisor = ReconnectionSupervisor::default();
        assert_eq!(
            supervisor.on_failure(),
            FailureVerdict::Schedule {
                delay: Duration::from_millis(500)
            }
        );
        assert!(supervisor.state().in_progress);
    }

    #[test]
    fn test_overlapping_triggers_coalesce() {
        let mut supervisor = ReconnectionSupervisor::default();
        supervisor.on_failure();
        assert_eq!(supervisor.on_failure(), FailureVerdict::AlreadyRecovering);
        assert_eq!(supervisor.state().attempts, 1);
    }

    #[test]
    fn test_delay_sequence_is_monotone_and_capped() {
        let mut supervisor = ReconnectionSupervisor::default();
        let mut previous = Duration::ZERO;
        for _ in 0..constants::MAX_RECONNECT_ATTEMPTS {
            let delay = match supervisor.on_failure() {
                FailureVerdict::Schedule { delay } => delay,
                other => panic!("expected schedule, got {other:?}"),
            };
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(30));
            previous = delay;
            supervisor.on_cycle_complete();
        }
    }

    #[test]
    fn test_gives_up_after_exactly_max_attempts() {
        let mut supervisor = ReconnectionSupervisor::default();
        for _ in 0..constants::MAX_RECONNECT_ATTEMPTS {
            assert!(matches!(
                supervisor.on_failure(),
                FailureVerdict::Schedule { .. }
            ));
            supervisor.on_cycle_complete();
        }
        assert_eq!(supervisor.on_failure(), FailureVerdict::GiveUp);
        assert_eq!(supervisor.on_failure(), FailureVerdict::GiveUp);
    }

    #[test]
    fn test_abandoned_cycle_does_not_block_recovery() {
        let mut supervisor = ReconnectionSupervisor::default();
        assert!(matches!(
            supervisor.on_failure(),
            FailureVerdict::Schedule { .. }
        ));

        supervisor.cancel();
        assert!(!supervisor.state().in_progress);

        // The next failure schedules again instead of coalescing into a
        // cycle that no longer exists.
        assert!(matches!(
            supervisor.on_failure(),
            FailureVerdict::Schedule { .. }
        ));
        assert_eq!(supervisor.state().attempts, 2);
    }

    #[test]
    fn test_ready_resets_counters_and_delay() {
        let mut supervisor = ReconnectionSupervisor::default();
        supervisor.on_failure();
        supervisor.on_cycle_complete();
        supervisor.on_failure();
        supervisor.on_cycle_complete();

        supervisor.on_ready();
        assert_eq!(supervisor.state().attempts, 0);
        assert!(!supervisor.state().in_progress);
        assert_eq!(
            supervisor.on_failure(),
            FailureVerdict::Schedule {
                delay: Duration::from_millis(500)
            }
        );
    }
}
