use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authority::ProxyAuthority;

/// How a challenge was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Credentials were supplied.
    Answered,
    /// No stored credential matched the authority.
    NoMatch,
    /// The retry breaker was open; credentials were withheld.
    Suppressed,
}

/// One challenge event, as seen by operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub challenge_id: Uuid,
    pub authority: ProxyAuthority,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn now(challenge_id: Uuid, authority: ProxyAuthority, outcome: Outcome) -> Self {
        Self {
            challenge_id,
            authority,
            outcome,
            timestamp: Utc::now(),
        }
    }
}

struct AuditBuf {
    records: VecDeque<AuditRecord>,
    evicted: u64,
}

/// Append-only, bounded record of challenge outcomes.
///
/// `append` never blocks the challenge path on I/O and never fails the
/// caller: the buffer is in memory, and when full the oldest records are
/// evicted (counted, and logged) rather than back-pressuring appenders.
/// Records for one authority are ordered by timestamp; ordering across
/// authorities under concurrency is not guaranteed.
#[derive(Clone)]
pub struct AuditLog {
    inner: Arc<Mutex<AuditBuf>>,
    capacity: usize,
}

pub const DEFAULT_AUDIT_CAPACITY: usize = 4096;

impl AuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AuditBuf {
                records: VecDeque::with_capacity(capacity.min(DEFAULT_AUDIT_CAPACITY)),
                evicted: 0,
            })),
            capacity: capacity.max(1),
        }
    }

    /// Append one record. Infallible by contract; the lock is only ever held
    /// for a push, never across a suspension point.
    pub fn append(&self, record: AuditRecord) {
        let mut buf = self.inner.lock().expect("audit log lock poisoned");
        if buf.records.len() == self.capacity {
            buf.records.pop_front();
            buf.evicted += 1;
            if buf.evicted % 100 == 1 {
                tracing::warn!(evicted = buf.evicted, "audit buffer full, evicting oldest records");
            }
        }
        buf.records.push_back(record);
    }

    /// Remove and return everything buffered so far.
    pub fn drain(&self) -> Vec<AuditRecord> {
        let mut buf = self.inner.lock().expect("audit log lock poisoned");
        buf.records.drain(..).collect()
    }

    /// Records for one authority inside an optional time range, oldest first.
    /// Leaves the buffer intact.
    pub fn query(
        &self,
        authority: &ProxyAuthority,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Vec<AuditRecord> {
        let buf = self.inner.lock().expect("audit log lock poisoned");
        buf.records
            .iter()
            .filter(|r| &r.authority == authority)
            .filter(|r| since.map_or(true, |s| r.timestamp >= s))
            .filter(|r| until.map_or(true, |u| r.timestamp < u))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("audit log lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records dropped to overflow since startup.
    pub fn evicted(&self) -> u64 {
        self.inner.lock().expect("audit log lock poisoned").evicted
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(authority: &ProxyAuthority, outcome: Outcome) -> AuditRecord {
        AuditRecord::now(Uuid::new_v4(), authority.clone(), outcome)
    }

    #[test]
    fn test_append_and_drain() {
        let log = AuditLog::new();
        let auth = ProxyAuthority::new("proxy.example", 8080);

        log.append(record(&auth, Outcome::Answered));
        log.append(record(&auth, Outcome::NoMatch));
        assert_eq!(log.len(), 2);

        let drained = log.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].outcome, Outcome::Answered);
        assert!(log.is_empty());
    }

    #[test]
    fn test_query_filters_by_authority() {
        let log = AuditLog::new();
        let a = ProxyAuthority::new("a.example", 8080);
        let b = ProxyAuthority::new("b.example", 8080);

        log.append(record(&a, Outcome::Answered));
        log.append(record(&b, Outcome::Suppressed));
        log.append(record(&a, Outcome::Answered));

        let for_a = log.query(&a, None, None);
        assert_eq!(for_a.len(), 2);
        assert!(for_a.iter().all(|r| r.authority == a));
        // Query does not consume.
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_query_time_range() {
        let log = AuditLog::new();
        let auth = ProxyAuthority::new("proxy.example", 8080);
        log.append(record(&auth, Outcome::Answered));

        let future = Utc::now() + Duration::hours(1);
        assert!(log.query(&auth, Some(future), None).is_empty());
        assert_eq!(log.query(&auth, None, Some(future)).len(), 1);
    }

    #[test]
    fn test_per_authority_order_is_monotonic() {
        let log = AuditLog::new();
        let auth = ProxyAuthority::new("proxy.example", 8080);
        for _ in 0..10 {
            log.append(record(&auth, Outcome::Answered));
        }
        let records = log.query(&auth, None, None);
        assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let log = AuditLog::with_capacity(2);
        let auth = ProxyAuthority::new("proxy.example", 8080);

        log.append(record(&auth, Outcome::Answered));
        log.append(record(&auth, Outcome::NoMatch));
        log.append(record(&auth, Outcome::Suppressed));

        assert_eq!(log.len(), 2);
        assert_eq!(log.evicted(), 1);
        let records = log.drain();
        assert_eq!(records[0].outcome, Outcome::NoMatch);
        assert_eq!(records[1].outcome, Outcome::Suppressed);
    }

    #[test]
    fn test_record_serializes_with_snake_case_outcome() {
        let auth = ProxyAuthority::new("proxy.example", 8080);
        let json = serde_json::to_value(record(&auth, Outcome::NoMatch)).unwrap();
        assert_eq!(json["outcome"], "no_match");
    }
}
