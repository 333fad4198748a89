/*!
Harness de test pour agents Maat

Facilite l'écriture de tests avec:
- Agent de monitoring branché sur des sources factices
- Initialisation du logging tracing pour les tests
- Helpers pour démarrer des sessions et réconcilier les réservations
*/

use std::sync::Arc;
use std::time::Duration;

use maat_core::{AgentSnapshot, MonitoringAgent, MonitoringConfig, ReconcileReport};

use crate::fake_sources::{FakeHostSource, FakeProcessSource};

/// Active le logging des tests (une seule fois, `RUST_LOG` respecté)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Agent de monitoring avec des sources pilotées par le test
pub struct AgentFixture {
    pub agent: Arc<MonitoringAgent>,
    pub processes: FakeProcessSource,
    pub host: FakeHostSource,
}

impl AgentFixture {
    /// Agent par défaut: une session par utilisateur, TTL 30s
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_max_per_user(max_process_by_user: usize) -> Self {
        Self::with_config(MonitoringConfig {
            max_process_by_user,
            ..test_config()
        })
    }

    pub fn with_config(config: MonitoringConfig) -> Self {
        init_tracing();
        let processes = FakeProcessSource::new();
        let host = FakeHostSource::with_usage(10.0, 2 << 30, 8 << 30);
        let agent = Arc::new(MonitoringAgent::new(
            config,
            Arc::new(processes.clone()),
            Arc::new(host.clone()),
        ));
        Self { agent, processes, host }
    }

    /// Démarre `count` sessions pour `username`
    pub fn start_sessions(&self, username: &str, count: usize) -> Vec<u32> {
        (0..count).map(|_| self.processes.add_session(username)).collect()
    }

    /// Une itération de la boucle de l'agent (refresh + réconciliation)
    pub async fn settle(&self) -> ReconcileReport {
        self.agent.tick().await
    }

    pub async fn snapshot(&self) -> AgentSnapshot {
        self.agent.snapshot().await
    }
}

impl Default for AgentFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Config rapide pour tests: boucle à 20ms, caches à 10ms
pub fn test_config() -> MonitoringConfig {
    MonitoringConfig {
        process_name: "fake-session".to_string(),
        refresh_interval: Duration::from_millis(20),
        process_interval: Duration::from_millis(10),
        host_interval: Duration::from_millis(10),
        ..Default::default()
    }
}
