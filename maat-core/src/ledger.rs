//! Pending session reservations
//!
//! A reservation is recorded when the agent accepts a request and lives until
//! one of:
//! - its age reaches the TTL
//! - a live session of the same user started at or after its creation shows up
//!   (compared at whole-second resolution, minus a configurable slack, since OS
//!   process start times are truncated to the second)
//! - it is removed explicitly by id
//!
//! The ledger has no locking of its own; the agent keeps it behind a mutex.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use crate::snapshot::{PendingRequest, ProcessTable};

/// Outcome of one reconcile pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub expired: usize,
    pub fulfilled: usize,
}

impl ReconcileReport {
    pub fn removed(&self) -> usize {
        self.expired + self.fulfilled
    }
}

/// Tolerance on session start times when matching them to reservations
pub const DEFAULT_START_SLACK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RequestLedger {
    pending: BTreeMap<String, Vec<PendingRequest>>,
    last_update: Option<DateTime<Utc>>,
    start_slack: chrono::Duration,
}

impl Default for RequestLedger {
    fn default() -> Self {
        Self::with_start_slack(DEFAULT_START_SLACK)
    }
}

impl RequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session fulfils a reservation when it started no earlier than
    /// `slack` before the second the reservation was made in
    pub fn with_start_slack(slack: Duration) -> Self {
        Self {
            pending: BTreeMap::new(),
            last_update: None,
            start_slack: chrono::Duration::from_std(slack).unwrap_or(chrono::Duration::zero()),
        }
    }

    /// Record a reservation for `username` created now
    pub fn add(&mut self, username: &str) -> PendingRequest {
        self.add_at(username, Utc::now())
    }

    pub fn add_at(&mut self, username: &str, created_at: DateTime<Utc>) -> PendingRequest {
        let request = PendingRequest::new(username, created_at);
        self.pending
            .entry(username.to_owned())
            .or_default()
            .push(request.clone());
        self.last_update = Some(Utc::now());
        request
    }

    /// Drop one reservation by id. Returns false when it was already gone.
    pub fn remove(&mut self, username: &str, id: Uuid) -> bool {
        let Some(requests) = self.pending.get_mut(username) else {
            return false;
        };
        let before = requests.len();
        requests.retain(|r| r.id != id);
        let removed = requests.len() != before;
        if requests.is_empty() {
            self.pending.remove(username);
        }
        if removed {
            self.last_update = Some(Utc::now());
        }
        removed
    }

    pub fn count_for(&self, username: &str) -> usize {
        self.pending.get(username).map(Vec::len).unwrap_or(0)
    }

    pub fn total_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn pending(&self) -> &BTreeMap<String, Vec<PendingRequest>> {
        &self.pending
    }

    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.pending.keys().map(String::as_str)
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn reconcile(&mut self, live: &ProcessTable, ttl: Duration) -> ReconcileReport {
        self.reconcile_at(live, ttl, Utc::now())
    }

    /// Expire and fulfil reservations against the live process table.
    ///
    /// Requests are visited oldest first. Each live session fulfils at most
    /// one request per pass, so two reservations for the same user need two
    /// sessions to both disappear.
    pub fn reconcile_at(&mut self, live: &ProcessTable, ttl: Duration, now: DateTime<Utc>) -> ReconcileReport {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let slack = self.start_slack;
        let mut report = ReconcileReport::default();

        for (username, requests) in self.pending.iter_mut() {
            requests.sort_by_key(|r| r.created_at);
            let mut unused: Vec<DateTime<Utc>> = live
                .sessions_for(username)
                .iter()
                .map(|s| s.create_time)
                .collect();
            unused.sort();

            requests.retain(|request| {
                if now - request.created_at >= ttl {
                    report.expired += 1;
                    return false;
                }
                let earliest = request.created_at.trunc_subsecs(0) - slack;
                match unused.iter().position(|started| *started >= earliest) {
                    Some(idx) => {
                        unused.remove(idx);
                        report.fulfilled += 1;
                        false
                    }
                    None => true,
                }
            });
        }
        self.pending.retain(|_, requests| !requests.is_empty());

        if report.removed() > 0 {
            self.last_update = Some(now);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ProcessSession;

    const TTL: Duration = Duration::from_secs(30);

    #[test]
    fn test_add_and_count() {
        let mut ledger = RequestLedger::new();
        ledger.add("alice");
        ledger.add("alice");
        ledger.add("bob");

        assert_eq!(ledger.count_for("alice"), 2);
        assert_eq!(ledger.count_for("carol"), 0);
        assert_eq!(ledger.total_count(), 3);
        assert!(ledger.last_update().is_some());
    }

    #[test]
    fn test_remove_by_id() {
        let mut ledger = RequestLedger::new();
        let request = ledger.add("alice");

        assert!(ledger.remove("alice", request.id));
        assert!(!ledger.remove("alice", request.id));
        assert_eq!(ledger.users().count(), 0);
    }

    #[test]
    fn test_reconcile_expires_old_requests() {
        let now = Utc::now();
        let mut ledger = RequestLedger::new();
        ledger.add_at("alice", now - chrono::Duration::seconds(31));
        ledger.add_at("alice", now - chrono::Duration::seconds(30));
        ledger.add_at("alice", now - chrono::Duration::seconds(29));

        let report = ledger.reconcile_at(&ProcessTable::new(), TTL, now);
        assert_eq!(report, ReconcileReport { expired: 2, fulfilled: 0 });
        assert_eq!(ledger.count_for("alice"), 1);
    }

    #[test]
    fn test_reconcile_fulfils_matching_session() {
        let now = Utc::now();
        let created = now - chrono::Duration::seconds(5);
        let mut ledger = RequestLedger::new();
        ledger.add_at("alice", created);
        ledger.add_at("bob", created);

        let live = ProcessTable::from_sessions(vec![ProcessSession::new(
            "alice",
            100,
            created + chrono::Duration::seconds(1),
        )]);
        let report = ledger.reconcile_at(&live, TTL, now);

        assert_eq!(report.fulfilled, 1);
        assert_eq!(ledger.count_for("alice"), 0);
        assert_eq!(ledger.count_for("bob"), 1);
    }

    #[test]
    fn test_older_session_does_not_fulfil() {
        let now = Utc::now();
        let created = now - chrono::Duration::seconds(5);
        let mut ledger = RequestLedger::new();
        ledger.add_at("alice", created);

        let live = ProcessTable::from_sessions(vec![ProcessSession::new(
            "alice",
            100,
            created - chrono::Duration::seconds(60),
        )]);
        let report = ledger.reconcile_at(&live, TTL, now);

        assert_eq!(report.removed(), 0);
        assert_eq!(ledger.count_for("alice"), 1);
    }

    #[test]
    fn test_one_session_fulfils_one_request() {
        let now = Utc::now();
        let first = now - chrono::Duration::seconds(10);
        let second = now - chrono::Duration::seconds(8);
        let mut ledger = RequestLedger::new();
        ledger.add_at("alice", second);
        ledger.add_at("alice", first);

        let live = ProcessTable::from_sessions(vec![ProcessSession::new(
            "alice",
            7,
            now - chrono::Duration::seconds(2),
        )]);
        let report = ledger.reconcile_at(&live, TTL, now);

        assert_eq!(report.fulfilled, 1);
        let remaining = &ledger.pending()["alice"];
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].created_at, second);
    }

    #[test]
    fn test_whole_second_start_time_fulfils() {
        let now = Utc::now();
        let created = now - chrono::Duration::milliseconds(1500);
        let mut ledger = RequestLedger::new();
        ledger.add_at("alice", created);

        // OS start times carry no sub-second part
        let live = ProcessTable::from_sessions(vec![ProcessSession::new("alice", 100, created.trunc_subsecs(0))]);
        let report = ledger.reconcile_at(&live, TTL, now);

        assert_eq!(report.fulfilled, 1);
        assert_eq!(ledger.count_for("alice"), 0);
    }

    #[test]
    fn test_start_slack_bounds_matching() {
        let now = Utc::now().trunc_subsecs(0);
        let created = now - chrono::Duration::seconds(5);
        let live = ProcessTable::from_sessions(vec![ProcessSession::new(
            "alice",
            100,
            created - chrono::Duration::seconds(1),
        )]);

        let mut default_slack = RequestLedger::new();
        default_slack.add_at("alice", created);
        assert_eq!(default_slack.reconcile_at(&live, TTL, now).fulfilled, 1);

        let mut strict = RequestLedger::with_start_slack(Duration::ZERO);
        strict.add_at("alice", created);
        assert_eq!(strict.reconcile_at(&live, TTL, now).fulfilled, 0);
        assert_eq!(strict.count_for("alice"), 1);
    }
}
