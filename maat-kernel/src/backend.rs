/**
 * BACKEND - Un hôte de sessions vu par le balancer
 *
 * Combine le service utilisateur (ServiceEndpoint) et l'agent de monitoring
 * (AgentClient). Toutes les valeurs dérivées viennent du dernier snapshot
 * de l'agent, donc peuvent être périmées d'au plus l'intervalle de son cache.
 */

use std::sync::Arc;

use chrono::{DateTime, Utc};
use maat_core::{AgentSnapshot, HostMetrics, ProcessSession};
use serde::Serialize;

use crate::client::AgentClient;
use crate::service::ServiceEndpoint;

pub struct BackendDescriptor {
    pub name: String,
    pub service: ServiceEndpoint,
    pub agent: Arc<dyn AgentClient>,
    pub max_sessions_per_user: usize,
}

/// Vue sérialisable d'un backend pour l'API
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub url: String,
    pub agent: String,
    pub available: bool,
    pub service_available: bool,
    pub agent_available: bool,
    pub nb: usize,
    pub nb_process: usize,
    pub nb_requests: usize,
    pub nb_users: usize,
    pub max_sessions_per_user: usize,
    pub host: Option<HostMetrics>,
    pub last_update: Option<DateTime<Utc>>,
}

impl BackendDescriptor {
    pub fn new(
        name: impl Into<String>,
        service: ServiceEndpoint,
        agent: Arc<dyn AgentClient>,
        max_sessions_per_user: usize,
    ) -> Self {
        Self {
            name: name.into(),
            service,
            agent,
            max_sessions_per_user,
        }
    }

    pub async fn snapshot(&self) -> AgentSnapshot {
        self.agent.get().await
    }

    /// Sessions vivantes sur l'hôte
    pub async fn session_count(&self) -> usize {
        self.snapshot().await.nb_process
    }

    pub async fn pending_count(&self) -> usize {
        self.snapshot().await.nb_requests
    }

    /// Charge totale: sessions vivantes + réservations
    pub async fn load(&self) -> usize {
        self.snapshot().await.nb
    }

    pub async fn user_sessions(&self, username: &str) -> Vec<ProcessSession> {
        self.snapshot().await.sessions_for(username).to_vec()
    }

    pub async fn user_session_count(&self, username: &str) -> usize {
        self.snapshot().await.session_count_for(username)
    }

    pub async fn user_pending_count(&self, username: &str) -> usize {
        self.snapshot().await.pending_for(username)
    }

    pub async fn user_load(&self, username: &str) -> usize {
        self.snapshot().await.user_load(username)
    }

    pub async fn nb_users(&self) -> usize {
        self.snapshot().await.users().len()
    }

    /// Vrai quand l'utilisateur dépasse strictement la limite par hôte
    pub async fn user_reached_limit(&self, username: &str) -> bool {
        self.user_session_count(username).await > self.max_sessions_per_user
    }

    /// Service et agent joignables (chacun selon son propre cache)
    pub async fn available(&self) -> bool {
        self.service.available().await && self.agent.available().await
    }

    pub async fn status(&self) -> BackendStatus {
        let service_available = self.service.available().await;
        let agent_available = self.agent.available().await;
        let snapshot = self.snapshot().await;
        BackendStatus {
            name: self.name.clone(),
            url: self.service.url().to_string(),
            agent: self.agent.describe(),
            available: service_available && agent_available,
            service_available,
            agent_available,
            nb: snapshot.nb,
            nb_process: snapshot.nb_process,
            nb_requests: snapshot.nb_requests,
            nb_users: snapshot.users().len(),
            max_sessions_per_user: self.max_sessions_per_user,
            host: snapshot.host,
            last_update: snapshot.timestamp,
        }
    }
}

impl std::fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("name", &self.name)
            .field("url", &self.service.url())
            .field("agent", &self.agent.describe())
            .field("max_sessions_per_user", &self.max_sessions_per_user)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DirectAgentClient;
    use maat_devkit::AgentFixture;

    fn backend(fixture: &AgentFixture, max: usize) -> (BackendDescriptor, Arc<DirectAgentClient>) {
        let client = Arc::new(DirectAgentClient::new(fixture.agent.clone()));
        let backend = BackendDescriptor::new(
            "node1",
            ServiceEndpoint::always_available("node1", "http://node1:8000"),
            client.clone(),
            max,
        );
        (backend, client)
    }

    #[tokio::test]
    async fn test_counts_from_snapshot() {
        let fixture = AgentFixture::with_max_per_user(5);
        fixture.start_sessions("alice", 2);
        fixture.start_sessions("bob", 1);
        fixture.settle().await;
        fixture.agent.add_process_request("carol", 3, false);
        let (backend, _) = backend(&fixture, 1);

        assert_eq!(backend.session_count().await, 3);
        assert_eq!(backend.pending_count().await, 1);
        assert_eq!(backend.load().await, 4);
        assert_eq!(backend.user_session_count("alice").await, 2);
        assert_eq!(backend.user_pending_count("carol").await, 1);
        assert_eq!(backend.user_load("carol").await, 1);
        assert_eq!(backend.nb_users().await, 3);
        assert_eq!(backend.user_sessions("bob").await.len(), 1);
    }

    #[tokio::test]
    async fn test_user_limit_is_strict() {
        let fixture = AgentFixture::with_max_per_user(5);
        fixture.start_sessions("alice", 1);
        fixture.start_sessions("bob", 2);
        fixture.settle().await;
        let (backend, _) = backend(&fixture, 1);

        assert!(!backend.user_reached_limit("alice").await);
        assert!(backend.user_reached_limit("bob").await);
    }

    #[tokio::test]
    async fn test_availability_follows_agent() {
        let fixture = AgentFixture::new();
        let (backend, client) = backend(&fixture, 1);
        assert!(backend.available().await);

        client.set_available(false);
        assert!(!backend.available().await);
        let status = backend.status().await;
        assert!(status.service_available);
        assert!(!status.agent_available);
        assert!(!status.available);
    }
}
