use std::sync::Arc;

use regex::Regex;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::audit::{AuditLog, AuditRecord, Outcome};
use crate::authority::ProxyAuthority;
use crate::errors::AuthError;
use crate::guard::LoopGuard;
use crate::resolver;
use crate::store::{Credential, CredentialStore, Secret};

/// What the interceptor hands back to the host network stack for one
/// challenge. `NoCredentials` tells the stack to fall back to its default,
/// unauthenticated behavior.
#[derive(Debug)]
pub enum ChallengeResponse {
    Credentials { username: String, secret: Secret },
    NoCredentials,
}

/// One authentication-required event from the host network stack.
///
/// Created per 407/401-style response and destroyed once answered. `attempt`
/// increments each time the same logical connection re-challenges after a
/// rejected credential; 0 is the connection's first challenge.
pub struct AuthChallenge {
    id: Uuid,
    pub authority: ProxyAuthority,
    pub attempt: u32,
    pub url: String,
    responder: Responder,
}

impl AuthChallenge {
    /// Build a challenge and the receiver on which the host stack awaits the
    /// response. The id is unique per challenge instance.
    pub fn new(
        authority: ProxyAuthority,
        attempt: u32,
        url: impl Into<String>,
    ) -> (Self, oneshot::Receiver<ChallengeResponse>) {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        (
            Self {
                id,
                authority,
                attempt,
                url: url.into(),
                responder: Responder { id, tx: Some(tx) },
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Single-use handle that delivers the response for one challenge id.
///
/// `respond` consumes the handle, so answering a challenge twice cannot be
/// expressed through this API; the internal guard panics if that invariant
/// is ever broken anyway, because a silent double-respond would mask a
/// concurrency bug. A responder dropped without answering closes the
/// channel, which the host stack must treat as "no credentials"; it is
/// logged as a bug here, since the interceptor answers every challenge.
pub struct Responder {
    id: Uuid,
    tx: Option<oneshot::Sender<ChallengeResponse>>,
}

impl Responder {
    pub fn respond(mut self, response: ChallengeResponse) {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => panic!("challenge {}: second response attempted", self.id),
        };
        if tx.send(response).is_err() {
            // The stack abandoned the connection (deadline, teardown).
            tracing::warn!(challenge = %self.id, "response dropped: host stack no longer waiting");
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::error!(challenge = %self.id, "challenge dropped without a response");
        }
    }
}

/// Answers proxy authentication challenges with stored credentials.
///
/// Registered as the sole handler for the host stack's
/// "authentication required" notification: challenges arrive on an mpsc
/// channel, each is handled as an independent unit of work, and the response
/// goes back through the challenge's one-shot responder. Handling is fully
/// synchronous against in-memory state, so a challenge never waits on I/O
/// and never blocks another connection's challenge.
pub struct AuthChallengeInterceptor {
    store: CredentialStore,
    guard: Arc<LoopGuard>,
    audit: AuditLog,
    url_filter: Option<Regex>,
}

impl AuthChallengeInterceptor {
    /// Interceptor answering challenges for all URLs.
    pub fn new(store: CredentialStore, guard: Arc<LoopGuard>, audit: AuditLog) -> Self {
        Self {
            store,
            guard,
            audit,
            url_filter: None,
        }
    }

    /// Restrict handling to request URLs matching `pattern`. Challenges for
    /// other URLs are declined without touching breaker or audit state.
    pub fn with_url_filter(mut self, pattern: Regex) -> Self {
        self.url_filter = Some(pattern);
        self
    }

    /// Consume challenge notifications until the host stack closes the
    /// channel. Each challenge is handled on its own task.
    pub async fn run(self, mut challenges: mpsc::Receiver<AuthChallenge>) {
        let this = Arc::new(self);
        tracing::info!(
            url_filter = this.url_filter.as_ref().map(Regex::as_str).unwrap_or("<all urls>"),
            "registered for proxy authentication challenges"
        );
        while let Some(challenge) = challenges.recv().await {
            let this = Arc::clone(&this);
            tokio::spawn(async move { this.handle(challenge) });
        }
        tracing::info!("challenge channel closed, interceptor stopping");
    }

    /// Handle one challenge start to finish. Exposed for embedding without
    /// the channel loop (and for tests).
    pub fn handle(&self, challenge: AuthChallenge) {
        let AuthChallenge {
            id,
            authority,
            attempt,
            url,
            responder,
        } = challenge;

        if let Some(filter) = &self.url_filter {
            if !filter.is_match(&url) {
                // Never ours to answer; no audit record.
                tracing::debug!(challenge = %id, %url, "challenge outside url filter, declining");
                responder.respond(ChallengeResponse::NoCredentials);
                return;
            }
        }

        match self.decide(&authority, attempt) {
            Ok(credential) => {
                tracing::debug!(
                    challenge = %id,
                    %authority,
                    attempt,
                    username = %credential.username,
                    "answering challenge"
                );
                self.audit
                    .append(AuditRecord::now(id, authority, Outcome::Answered));
                responder.respond(ChallengeResponse::Credentials {
                    username: credential.username,
                    secret: credential.secret,
                });
            }
            Err(err) => {
                let outcome = match err {
                    AuthError::AuthoritySuppressed(_) => Outcome::Suppressed,
                    _ => Outcome::NoMatch,
                };
                tracing::warn!(challenge = %id, %authority, "{err}");
                self.audit.append(AuditRecord::now(id, authority, outcome));
                responder.respond(ChallengeResponse::NoCredentials);
            }
        }
    }

    /// Breaker check, failure accounting, then resolution. Failure recording
    /// happens after the breaker check: the challenge that trips the breaker
    /// is still answered, suppression starts with the next one.
    fn decide(&self, authority: &ProxyAuthority, attempt: u32) -> Result<Credential, AuthError> {
        if self.guard.is_tripped(authority) {
            return Err(AuthError::AuthoritySuppressed(authority.clone()));
        }
        // attempt > 0 means the credential supplied for the previous attempt
        // was rejected by the proxy.
        if attempt > 0 {
            self.guard.record_failure(authority);
        }
        let snapshot = self.store.snapshot();
        resolver::resolve(&snapshot, authority)
            .cloned()
            .ok_or_else(|| AuthError::NoCredentialConfigured(authority.clone()))
    }
}
