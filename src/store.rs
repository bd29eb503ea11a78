use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use zeroize::Zeroize;

use crate::authority::ProxyAuthority;
use crate::errors::AuthError;

/// A proxy password held in memory. Zeroed on drop and redacted from `Debug`
/// so it cannot leak through logs or panic messages.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The plaintext, for handing to the host network stack when answering a
    /// challenge. Callers must not log or persist it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// One credential set, scoped to a proxy authority.
#[derive(Debug, Clone)]
pub struct Credential {
    pub authority: ProxyAuthority,
    pub username: String,
    pub secret: Secret,
}

impl Credential {
    pub fn new(
        authority: ProxyAuthority,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            authority,
            username: username.into(),
            secret: Secret::new(secret),
        }
    }
}

/// Immutable view of the credential set current at one instant. Resolutions
/// that began against one snapshot keep using it even if the store is
/// reloaded underneath them.
pub type Snapshot = Arc<HashMap<ProxyAuthority, Credential>>;

/// Holds the active credential set, keyed by authority. `load` replaces the
/// whole set atomically; readers take cheap `snapshot()`s. The write lock is
/// held only for the pointer swap, never across a suspension point.
#[derive(Clone, Default)]
pub struct CredentialStore {
    inner: Arc<RwLock<Snapshot>>,
}

impl CredentialStore {
    /// An empty store. Every resolution is a no-match until `load` is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire credential set. Rejects duplicate authority keys:
    /// rotation replaces, never appends, and a config naming the same
    /// authority twice is malformed rather than silently last-wins.
    pub fn load(&self, credentials: Vec<Credential>) -> Result<(), AuthError> {
        let mut set = HashMap::with_capacity(credentials.len());
        for credential in credentials {
            let authority = credential.authority.clone();
            if set.insert(authority.clone(), credential).is_some() {
                return Err(AuthError::MalformedCredentialConfig(format!(
                    "duplicate credential for {}",
                    authority
                )));
            }
        }
        let count = set.len();
        *self.inner.write().expect("credential store lock poisoned") = Arc::new(set);
        tracing::info!(credentials = count, "credential store loaded");
        Ok(())
    }

    /// The credential set current right now.
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.inner.read().expect("credential store lock poisoned"))
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
