//! Error types for the RONDO protocol.
//!
//! Every transport-level failure is caught at the boundary and converted into
//! a state transition or a supervisor trigger; nothing here propagates as an
//! uncaught fault. Some entries in the taxonomy are protocol signals rather
//! than errors (an identity collision during the holder-bind race simply
//! means someone else got there first).

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by a search for a chat partner.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// The wall-clock search deadline elapsed with no pairing.
    ///
    /// Terminal but retriable: the caller decides whether to start a new
    /// search. Distinct from a crash.
    #[error("no partner found within {elapsed:?} ({attempts} attempts)")]
    Exhausted {
        /// Time spent searching.
        elapsed: Duration,
        /// Completed seek/hold cycles.
        attempts: u32,
    },

    /// The search was cancelled by its owner.
    #[error("search cancelled")]
    Cancelled,
}

/// Errors surfaced by the reconnection supervisor.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorError {
    /// The supervisor gave up after the configured attempt ceiling.
    ///
    /// Fatal for the current process instance; the user must restart.
    #[error("connection lost: gave up after {0} reconnect attempts")]
    AttemptsExhausted(u32),
}

/// Top-level RONDO errors.
#[derive(Debug, Error)]
pub enum RondoError {
    /// Search error.
    #[error("search error: {0}")]
    Search(#[from] SearchError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Supervisor error.
    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
