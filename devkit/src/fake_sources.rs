/*!
Sources factices pour tester un agent sans vrais processus

Remplace la lecture de la table des processus OS par une liste pilotée par le
test: on ajoute ou retire des sessions utilisateur, on simule une panne de la
source, et on compte les appels.
*/

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use maat_core::{HostMetrics, HostSource, ProcessSession, ProcessSource, ProcessTable};
use parking_lot::Mutex;

/// Table de processus contrôlée par le test
#[derive(Clone, Default)]
pub struct FakeProcessSource {
    sessions: Arc<Mutex<Vec<ProcessSession>>>,
    next_pid: Arc<AtomicU32>,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl FakeProcessSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Démarre une session pour `username`, retourne son pid
    pub fn add_session(&self, username: &str) -> u32 {
        self.add_session_at(username, Utc::now())
    }

    pub fn add_session_at(&self, username: &str, create_time: DateTime<Utc>) -> u32 {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst) + 1000;
        let mut session = ProcessSession::new(username, pid, create_time);
        session.name = "fake-session".to_string();
        self.sessions.lock().push(session);
        tracing::debug!(username, pid, "[fake] session started");
        pid
    }

    /// Termine la session `pid`, false si inconnue
    pub fn rm_session(&self, pid: u32) -> bool {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|s| s.pid != pid);
        sessions.len() != before
    }

    pub fn rm_user(&self, username: &str) {
        self.sessions.lock().retain(|s| s.username != username);
    }

    pub fn clear(&self) {
        self.sessions.lock().clear();
    }

    /// Fait échouer (ou non) les prochaines collectes
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

impl ProcessSource for FakeProcessSource {
    fn sessions(&self, _process_name: &str) -> anyhow::Result<ProcessTable> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("fake process source is down");
        }
        Ok(ProcessTable::from_sessions(self.sessions.lock().clone()))
    }
}

/// Métriques hôte fixées par le test
#[derive(Clone, Default)]
pub struct FakeHostSource {
    metrics: Arc<Mutex<HostMetrics>>,
    failing: Arc<AtomicBool>,
}

impl FakeHostSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hôte à `cpu_percent` avec `memory_total` octets dont `memory_used` occupés
    pub fn with_usage(cpu_percent: f32, memory_used: u64, memory_total: u64) -> Self {
        let source = Self::default();
        source.set(HostMetrics {
            cpu_percent,
            cpu_count: 4,
            memory_used,
            memory_total,
            memory_free: memory_total.saturating_sub(memory_used),
            memory_available: memory_total.saturating_sub(memory_used),
            memory_percent: if memory_total > 0 {
                memory_used as f32 / memory_total as f32 * 100.0
            } else {
                0.0
            },
            ..Default::default()
        });
        source
    }

    pub fn set(&self, metrics: HostMetrics) {
        *self.metrics.lock() = metrics;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl HostSource for FakeHostSource {
    fn metrics(&self) -> anyhow::Result<HostMetrics> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("fake host source is down");
        }
        Ok(*self.metrics.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_add_and_remove() {
        let source = FakeProcessSource::new();
        let pid = source.add_session("alice");
        source.add_session("alice");
        source.add_session("bob");

        let table = source.sessions("any").unwrap();
        assert_eq!(table.count_for("alice"), 2);
        assert_eq!(table.total(), 3);

        assert!(source.rm_session(pid));
        assert!(!source.rm_session(pid));
        source.rm_user("bob");
        assert_eq!(source.session_count(), 1);
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn test_failing_sources() {
        let processes = FakeProcessSource::new();
        processes.set_failing(true);
        assert!(processes.sessions("any").is_err());

        let host = FakeHostSource::with_usage(50.0, 1, 4);
        assert_eq!(host.metrics().unwrap().memory_percent, 25.0);
        host.set_failing(true);
        assert!(host.metrics().is_err());
    }
}
