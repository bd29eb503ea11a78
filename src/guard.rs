use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::authority::ProxyAuthority;

/// Thresholds for the per-authority retry breaker.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Consecutive rejected attempts before the breaker opens.
    pub failure_threshold: u32,
    /// Failures older than this no longer count toward the threshold.
    pub failure_window: Duration,
    /// How long an open breaker stays open with no further challenges.
    pub cooldown: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(120),
        }
    }
}

/// Per-authority failure tracking. `last_seen` is the most recent breaker
/// activity: a recorded failure, or a challenge suppressed while open. The
/// cooldown runs from there, so it only elapses with no further challenges.
#[derive(Debug)]
struct FailureState {
    count: u32,
    window_start: Instant,
    last_seen: Instant,
    open_since: Option<Instant>,
}

/// Circuit breaker bounding repeated failed credential submissions.
///
/// A wrong or expired credential otherwise causes the host network stack to
/// re-challenge indefinitely. After `failure_threshold` rejections inside
/// `failure_window` the breaker opens and the interceptor stops supplying
/// the credential; it closes again on an external success signal or after
/// `cooldown` with no further challenges. State lives in a `DashMap` keyed
/// by authority, so updates are linearized per authority and two authorities
/// never contend with each other.
pub struct LoopGuard {
    states: DashMap<ProxyAuthority, FailureState>,
    config: GuardConfig,
}

impl LoopGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            states: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Whether challenges for this authority are currently suppressed.
    /// A suppressed challenge counts as breaker activity and pushes the
    /// cooldown out; once the cooldown elapses the breaker closes and the
    /// failure count starts over.
    pub fn is_tripped(&self, authority: &ProxyAuthority) -> bool {
        {
            let Some(mut state) = self.states.get_mut(authority) else {
                return false;
            };
            if state.open_since.is_none() {
                return false;
            }
            if state.last_seen.elapsed() < self.config.cooldown {
                state.last_seen = Instant::now();
                return true;
            }
        }
        // Cooldown elapsed: drop the entry entirely so the next failure
        // starts a fresh window.
        self.states.remove(authority);
        tracing::info!(%authority, "retry breaker closed after cooldown");
        false
    }

    /// Record a rejected credential submission. Called by the interceptor
    /// when a challenge recurs with an incremented attempt sequence, never
    /// on a connection's first attempt.
    pub fn record_failure(&self, authority: &ProxyAuthority) {
        let now = Instant::now();
        let mut state = self.states.entry(authority.clone()).or_insert(FailureState {
            count: 0,
            window_start: now,
            last_seen: now,
            open_since: None,
        });

        // Failures outside the sliding window start a fresh count.
        if state.open_since.is_none() && now.duration_since(state.window_start) > self.config.failure_window {
            state.count = 0;
            state.window_start = now;
        }

        state.count += 1;
        state.last_seen = now;

        if state.count >= self.config.failure_threshold && state.open_since.is_none() {
            state.open_since = Some(now);
            tracing::warn!(
                %authority,
                failures = state.count,
                "retry breaker OPENED: suppressing credential submission"
            );
        } else {
            tracing::debug!(%authority, failures = state.count, "auth failure recorded");
        }
    }

    /// External signal that a request through this authority completed
    /// without a further auth challenge. Resets the breaker immediately.
    pub fn on_success(&self, authority: &ProxyAuthority) {
        if let Some((_, state)) = self.states.remove(authority) {
            if state.open_since.is_some() {
                tracing::info!(%authority, "retry breaker closed: success signal");
            }
        }
    }

    /// Snapshot of all tracked authorities, for operator inspection.
    pub fn all_status(&self) -> Vec<BreakerStatus> {
        self.states
            .iter()
            .map(|entry| {
                let state = entry.value();
                let cooldown_remaining_secs = state.open_since.map(|_| {
                    let elapsed = state.last_seen.elapsed();
                    self.config.cooldown.saturating_sub(elapsed).as_secs()
                });
                BreakerStatus {
                    authority: entry.key().clone(),
                    open: state.open_since.is_some(),
                    failures: state.count,
                    cooldown_remaining_secs,
                }
            })
            .collect()
    }
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}

/// Operator-facing view of one authority's breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub authority: ProxyAuthority,
    pub open: bool,
    pub failures: u32,
    pub cooldown_remaining_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> ProxyAuthority {
        ProxyAuthority::new("proxy.example", 8080)
    }

    fn fast_config() -> GuardConfig {
        GuardConfig {
            failure_threshold: 3,
            failure_window: Duration::from_millis(200),
            cooldown: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_closed_until_threshold() {
        let guard = LoopGuard::default();
        let auth = authority();

        assert!(!guard.is_tripped(&auth));
        guard.record_failure(&auth);
        assert!(!guard.is_tripped(&auth));
        guard.record_failure(&auth);
        assert!(!guard.is_tripped(&auth));
    }

    #[test]
    fn test_opens_at_threshold() {
        let guard = LoopGuard::default();
        let auth = authority();

        for _ in 0..3 {
            guard.record_failure(&auth);
        }
        assert!(guard.is_tripped(&auth));
    }

    #[test]
    fn test_authorities_are_independent() {
        let guard = LoopGuard::default();
        let bad = ProxyAuthority::new("bad.example", 8080);
        let good = ProxyAuthority::new("good.example", 8080);

        for _ in 0..3 {
            guard.record_failure(&bad);
        }
        assert!(guard.is_tripped(&bad));
        assert!(!guard.is_tripped(&good));
    }

    #[test]
    fn test_success_signal_resets() {
        let guard = LoopGuard::default();
        let auth = authority();

        for _ in 0..3 {
            guard.record_failure(&auth);
        }
        assert!(guard.is_tripped(&auth));

        guard.on_success(&auth);
        assert!(!guard.is_tripped(&auth));

        // Count restarted: two more failures stay below the threshold.
        guard.record_failure(&auth);
        guard.record_failure(&auth);
        assert!(!guard.is_tripped(&auth));
    }

    #[test]
    fn test_cooldown_closes_breaker() {
        let guard = LoopGuard::new(fast_config());
        let auth = authority();

        for _ in 0..3 {
            guard.record_failure(&auth);
        }
        assert!(guard.is_tripped(&auth));

        std::thread::sleep(Duration::from_millis(60));
        assert!(!guard.is_tripped(&auth));
    }

    #[test]
    fn test_suppressed_challenge_extends_cooldown() {
        let guard = LoopGuard::new(fast_config());
        let auth = authority();

        for _ in 0..3 {
            guard.record_failure(&auth);
        }

        // Keep challenging every 30ms: each suppression renews the cooldown.
        for _ in 0..3 {
            std::thread::sleep(Duration::from_millis(30));
            assert!(guard.is_tripped(&auth));
        }

        std::thread::sleep(Duration::from_millis(60));
        assert!(!guard.is_tripped(&auth));
    }

    #[test]
    fn test_stale_failures_fall_out_of_window() {
        let guard = LoopGuard::new(fast_config());
        let auth = authority();

        guard.record_failure(&auth);
        guard.record_failure(&auth);
        std::thread::sleep(Duration::from_millis(250));

        // Window elapsed: this failure starts a fresh count of 1.
        guard.record_failure(&auth);
        assert!(!guard.is_tripped(&auth));
    }

    #[test]
    fn test_status_snapshot() {
        let guard = LoopGuard::default();
        let auth = authority();

        for _ in 0..3 {
            guard.record_failure(&auth);
        }
        let status = guard.all_status();
        assert_eq!(status.len(), 1);
        assert!(status[0].open);
        assert_eq!(status[0].failures, 3);
        assert!(status[0].cooldown_remaining_secs.is_some());
    }
}
