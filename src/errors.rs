use thiserror::Error;

use crate::authority::ProxyAuthority;

/// Errors surfaced by the credential injection layer.
///
/// `NoCredentialConfigured` and `AuthoritySuppressed` are recovered locally
/// by the interceptor: the challenge is answered "no credentials" and the
/// outcome is audited. Only `MalformedCredentialConfig` is fatal, and only at
/// provisioning time: it must fail startup before any challenge is handled.
/// A double response to a single challenge is not an error value at all; it
/// is a programming bug and panics (see `interceptor::Responder`).
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential configured for {0}")]
    NoCredentialConfigured(ProxyAuthority),

    #[error("authority {0} suppressed by retry breaker")]
    AuthoritySuppressed(ProxyAuthority),

    #[error("malformed credential config: {0}")]
    MalformedCredentialConfig(String),
}
