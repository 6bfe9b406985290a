//! Ephemeral endpoint identities.
//!
//! Every endpoint instance gets a freshly minted identity; identities are
//! never reused across instances, which keeps a stale registration at the
//! signaling relay from colliding with a live one. The single exception is
//! the well-known rendezvous slot identifier, which is deliberately shared
//! by every client.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of the random suffix appended to generated identifiers.
const SUFFIX_LEN: usize = 9;

/// An ephemeral endpoint identifier.
///
/// Owned exclusively by the endpoint instance it was issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// The identifier registered at the signaling relay.
    pub id: String,
    /// Creation time, in milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl Identity {
    /// Wrap a well-known identifier (the rendezvous slot) as an identity.
    pub fn well_known(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: unix_millis(),
        }
    }
}

/// Mints ephemeral endpoint identities.
///
/// Identifiers are `{prefix}{unix-millis}-{random alphanumeric}`: unique
/// within the practical collision window without any coordination. Pure
/// generation, no failure mode.
#[derive(Debug, Clone)]
pub struct IdentityProvider {
    prefix: String,
}

impl IdentityProvider {
    /// Create a provider that prefixes every identifier with `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Mint a fresh identity.
    pub fn fresh(&self) -> Identity {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SUFFIX_LEN)
            .map(|b| (b as char).to_ascii_lowercase())
            .collect();

        Identity {
            id: format!("{}{}-{}", self.prefix, unix_millis(), suffix),
            created_at: unix_millis(),
        }
    }

    /// The configured identifier prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_identities_are_unique() {
        let provider = IdentityProvider::new("test-");
        let a = provider.fresh();
        let b = provider.fresh();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_fresh_identity_carries_prefix() {
        let provider = IdentityProvider::new("rondo-chat-");
        let identity = provider.fresh();
        assert!(identity.id.starts_with("rondo-chat-"));
    }

    #[test]
    fn test_suffix_is_lowercase_alphanumeric() {
        let provider = IdentityProvider::new("p-");
        let identity = provider.fresh();
        let suffix = identity.id.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(!suffix.chars().any(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn test_well_known_keeps_exact_id() {
        let identity = Identity::well_known("rondo-chat-waiting");
        assert_eq!(identity.id, "rondo-chat-waiting");
    }
}
