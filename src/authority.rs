use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies *who* is asking for credentials: the proxy's host:port plus an
/// optional authentication realm.
///
/// Hosts are DNS names and are normalized to lowercase at construction, so
/// equality and hashing are case-insensitive for the host. Realms are opaque
/// strings and compare byte-for-byte. A stored authority with no realm acts
/// as a wildcard for that host:port; the matching policy lives in
/// `resolver::resolve`, not in `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyAuthority {
    host: String,
    port: u16,
    realm: Option<String>,
}

impl ProxyAuthority {
    /// Authority for a host:port with no realm (wildcard when stored,
    /// realm-less when requested).
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            port,
            realm: None,
        }
    }

    /// Authority qualified with an exact realm.
    pub fn with_realm(host: impl Into<String>, port: u16, realm: impl Into<String>) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            port,
            realm: Some(realm.into()),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    /// The realm-less key for this authority, used for wildcard lookup.
    pub fn without_realm(&self) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            realm: None,
        }
    }

    /// True when a credential stored under `self` may answer a challenge for
    /// `requested`: host:port must match exactly; a stored realm of `None`
    /// matches any requested realm, a stored realm only matches itself.
    pub fn matches(&self, requested: &ProxyAuthority) -> bool {
        if self.host != requested.host || self.port != requested.port {
            return false;
        }
        match &self.realm {
            None => true,
            Some(realm) => requested.realm.as_deref() == Some(realm.as_str()),
        }
    }
}

impl fmt::Display for ProxyAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)?;
        if let Some(realm) = &self.realm {
            write!(f, " (realm \"{}\")", realm)?;
        }
        Ok(())
    }
}
