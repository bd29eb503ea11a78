//! Pure lookup mapping a challenge's authority to a stored credential.

use crate::authority::ProxyAuthority;
use crate::store::{Credential, Snapshot};

/// Resolve the credential for `requested` against one store snapshot.
///
/// Exact host:port match is required. A realm-qualified entry only matches
/// its own realm; an entry with no realm matches any realm for that
/// host:port. When both exist, the realm-qualified entry wins. No mutation,
/// no I/O; safe to call from the challenge path.
pub fn resolve<'a>(snapshot: &'a Snapshot, requested: &ProxyAuthority) -> Option<&'a Credential> {
    if let Some(credential) = snapshot.get(requested) {
        return Some(credential);
    }
    // Fall back to the wildcard (realm-less) entry for this host:port.
    if requested.realm().is_some() {
        return snapshot.get(&requested.without_realm());
    }
    None
}
