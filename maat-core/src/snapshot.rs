//! Data exchanged between a monitoring agent and the balancer
//!
//! Everything here is plain serde data. The JSON shape of [`AgentSnapshot`]
//! is the body of `GET /v1/data`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire protocol version reported by `/info`
pub const PROTOCOL_VERSION: &str = "v1";

/// One live OS process belonging to a user session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSession {
    pub username: String,
    pub pid: u32,
    pub ppid: Option<u32>,
    pub name: String,
    pub create_time: DateTime<Utc>,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub memory_rss: u64,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub exe: Option<String>,
    #[serde(default)]
    pub cmdline: Vec<String>,
    #[serde(default)]
    pub num_threads: Option<u32>,
}

impl ProcessSession {
    /// Minimal session, used by sources that only know owner and start time
    pub fn new(username: impl Into<String>, pid: u32, create_time: DateTime<Utc>) -> Self {
        Self {
            username: username.into(),
            pid,
            ppid: None,
            name: String::new(),
            create_time,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            memory_rss: 0,
            cwd: None,
            exe: None,
            cmdline: Vec::new(),
            num_threads: None,
        }
    }
}

/// Live sessions grouped by username
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessTable {
    by_user: BTreeMap<String, Vec<ProcessSession>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sessions(sessions: impl IntoIterator<Item = ProcessSession>) -> Self {
        let mut table = Self::new();
        for session in sessions {
            table.insert(session);
        }
        table
    }

    pub fn insert(&mut self, session: ProcessSession) {
        self.by_user.entry(session.username.clone()).or_default().push(session);
    }

    pub fn sessions_for(&self, username: &str) -> &[ProcessSession] {
        self.by_user.get(username).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count_for(&self, username: &str) -> usize {
        self.sessions_for(username).len()
    }

    pub fn total(&self) -> usize {
        self.by_user.values().map(Vec::len).sum()
    }

    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.by_user.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ProcessSession])> {
        self.by_user.iter().map(|(user, sessions)| (user.as_str(), sessions.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }
}

/// Host-level resource usage, all zero when unknown
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HostMetrics {
    pub cpu_percent: f32,
    pub cpu_count: usize,
    pub memory_used: u64,
    pub memory_total: u64,
    pub memory_free: u64,
    pub memory_available: u64,
    pub memory_percent: f32,
    pub swap_total: u64,
    pub swap_free: u64,
    pub swap_used: u64,
    pub swap_percent: f32,
}

/// Slot reserved for a user whose process has not shown up yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl PendingRequest {
    pub fn new(username: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            created_at,
        }
    }
}

/// Agent view returned by `GET /v1/data`
///
/// `nb` is always `nb_process + nb_requests`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub processes: ProcessTable,
    pub nb_process: usize,
    pub processes_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processes_failed: bool,
    pub requests: BTreeMap<String, Vec<PendingRequest>>,
    pub nb_requests: usize,
    pub requests_timestamp: Option<DateTime<Utc>>,
    pub nb: usize,
    pub host: Option<HostMetrics>,
    pub host_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub host_failed: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

impl AgentSnapshot {
    pub fn sessions_for(&self, username: &str) -> &[ProcessSession] {
        self.processes.sessions_for(username)
    }

    pub fn session_count_for(&self, username: &str) -> usize {
        self.processes.count_for(username)
    }

    pub fn pending_for(&self, username: &str) -> usize {
        self.requests.get(username).map(Vec::len).unwrap_or(0)
    }

    /// Live sessions plus pending reservations for one user
    pub fn user_load(&self, username: &str) -> usize {
        self.session_count_for(username) + self.pending_for(username)
    }

    /// Users with a live session or a pending reservation
    pub fn users(&self) -> BTreeSet<String> {
        self.processes
            .usernames()
            .map(str::to_owned)
            .chain(self.requests.keys().cloned())
            .collect()
    }
}

/// Body of `GET /info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub process_name: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(user: &str, pid: u32) -> ProcessSession {
        ProcessSession::new(user, pid, Utc::now())
    }

    #[test]
    fn test_process_table_grouping() {
        let table = ProcessTable::from_sessions(vec![
            session("alice", 1),
            session("bob", 2),
            session("alice", 3),
        ]);

        assert_eq!(table.count_for("alice"), 2);
        assert_eq!(table.count_for("bob"), 1);
        assert_eq!(table.count_for("carol"), 0);
        assert_eq!(table.total(), 3);
        assert_eq!(table.usernames().collect::<Vec<_>>(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_default_snapshot_is_empty() {
        let snapshot = AgentSnapshot::default();
        assert_eq!(snapshot.nb, 0);
        assert!(snapshot.processes.is_empty());
        assert!(snapshot.host.is_none());
        assert!(snapshot.users().is_empty());
    }

    #[test]
    fn test_snapshot_users_and_load() {
        let mut snapshot = AgentSnapshot {
            processes: ProcessTable::from_sessions(vec![session("alice", 1)]),
            ..Default::default()
        };
        snapshot
            .requests
            .insert("bob".into(), vec![PendingRequest::new("bob", Utc::now())]);

        assert_eq!(snapshot.user_load("alice"), 1);
        assert_eq!(snapshot.user_load("bob"), 1);
        let users: Vec<_> = snapshot.users().into_iter().collect();
        assert_eq!(users, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = AgentSnapshot {
            processes: ProcessTable::from_sessions(vec![session("alice", 42)]),
            nb_process: 1,
            nb: 1,
            ..Default::default()
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["nb"], 1);
        assert_eq!(json["processes"]["alice"][0]["pid"], 42);

        let back: AgentSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }
}
