/**
 * BACKEND REGISTRY - Catalogue ordonné des backends du balancer
 *
 * RÔLE :
 * Ensemble nommé de BackendDescriptor, dans l'ordre d'insertion (l'ordre sert
 * à départager les backends de même charge).
 *
 * FONCTIONNEMENT :
 * - add/remove/get sous verrou court, jamais tenu pendant un appel agent
 * - agrégats par utilisateur et par backend sur les backends disponibles
 * - summary() : vue monitoring du cluster (CPU, mémoire, swap, sessions)
 */

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use indexmap::IndexMap;
use maat_core::{HostMetrics, ProcessSession};
use parking_lot::RwLock;
use serde::Serialize;

use crate::backend::BackendDescriptor;
use crate::client::{AgentError, HttpAgentClient, HttpAgentOptions};
use crate::config::KernelConfig;
use crate::service::ServiceEndpoint;

#[derive(Default)]
pub struct BackendRegistry {
    backends: RwLock<IndexMap<String, Arc<BackendDescriptor>>>,
}

/// Vue monitoring d'un backend
#[derive(Debug, Clone, Serialize)]
pub struct BackendSummary {
    pub name: String,
    pub host: Option<HostMetrics>,
    pub users: usize,
    pub processes: usize,
    pub requests: usize,
}

/// Totaux sur les backends vivants
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterTotals {
    /// Moyenne des CPU des hôtes
    pub cpu_percent: f32,
    pub cpu_count: usize,
    pub memory_used: u64,
    pub memory_total: u64,
    pub memory_percent: f32,
    pub swap_used: u64,
    pub swap_total: u64,
    pub swap_percent: f32,
    pub users: usize,
    pub processes: usize,
    pub requests: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub backends: Vec<BackendSummary>,
    pub total: ClusterTotals,
    pub dead_backends: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

fn percent(part: u64, total: u64) -> f32 {
    if total > 0 { part as f32 / total as f32 * 100.0 } else { 0.0 }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construit un backend HTTP par entrée de configuration
    pub fn from_config(config: &KernelConfig) -> Result<Self, AgentError> {
        let registry = Self::new();
        for conf in &config.backends {
            let agent = HttpAgentClient::new(
                &conf.agent_url,
                HttpAgentOptions {
                    timeout: conf.timeout(),
                    data_interval: conf.data_interval(),
                    ping_interval: conf.ping_interval(),
                },
            )?;
            let service = ServiceEndpoint::http(
                conf.name.clone(),
                conf.service_url.clone(),
                conf.ping_url(),
                conf.timeout(),
                conf.ping_interval(),
            )?;
            registry.add(BackendDescriptor::new(
                conf.name.clone(),
                service,
                Arc::new(agent),
                conf.max_sessions_per_user,
            ));
        }
        Ok(registry)
    }

    /// Ajoute (ou remplace à la même position) un backend
    pub fn add(&self, backend: BackendDescriptor) -> Option<Arc<BackendDescriptor>> {
        let name = backend.name.clone();
        let previous = self.backends.write().insert(name.clone(), Arc::new(backend));
        match &previous {
            Some(_) => tracing::info!(backend = %name, "backend replaced"),
            None => tracing::info!(backend = %name, "backend registered"),
        }
        previous
    }

    pub fn remove(&self, name: &str) -> Option<Arc<BackendDescriptor>> {
        self.backends.write().shift_remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<BackendDescriptor>> {
        self.backends.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.read().is_empty()
    }

    /// Copie ordonnée, le verrou est relâché avant tout appel réseau
    pub fn all(&self) -> Vec<Arc<BackendDescriptor>> {
        self.backends.read().values().cloned().collect()
    }

    pub async fn list(&self, include_unavailable: bool) -> Vec<Arc<BackendDescriptor>> {
        let backends = self.all();
        if include_unavailable {
            return backends;
        }
        let availability = join_all(backends.iter().map(|b| b.available())).await;
        backends
            .into_iter()
            .zip(availability)
            .filter_map(|(backend, up)| up.then_some(backend))
            .collect()
    }

    /// Sessions vivantes + réservations de l'utilisateur sur tous les backends disponibles
    pub async fn total_sessions_per_user(&self, username: &str) -> usize {
        self.user_load_by_backend(username).await.values().sum()
    }

    pub async fn user_load_by_backend(&self, username: &str) -> IndexMap<String, usize> {
        let backends = self.list(false).await;
        let loads = join_all(backends.iter().map(|b| b.user_load(username))).await;
        backends.iter().map(|b| b.name.clone()).zip(loads).collect()
    }

    /// Charge (`nb`) de chaque backend disponible
    pub async fn total_sessions_per_backend(&self) -> IndexMap<String, usize> {
        let backends = self.list(false).await;
        let loads = join_all(backends.iter().map(|b| b.load())).await;
        backends.iter().map(|b| b.name.clone()).zip(loads).collect()
    }

    /// Sessions vivantes de l'utilisateur, par backend disponible (backends sans session omis)
    pub async fn user_sessions(&self, username: &str) -> IndexMap<String, Vec<ProcessSession>> {
        let backends = self.list(false).await;
        let sessions = join_all(backends.iter().map(|b| b.user_sessions(username))).await;
        backends
            .iter()
            .map(|b| b.name.clone())
            .zip(sessions)
            .filter(|(_, s)| !s.is_empty())
            .collect()
    }

    /// Vue monitoring du cluster, éventuellement restreinte à un backend
    pub async fn summary(&self, filter: Option<&str>) -> ClusterSummary {
        let backends: Vec<_> = self
            .all()
            .into_iter()
            .filter(|b| filter.map_or(true, |name| b.name == name))
            .collect();
        let availability = join_all(backends.iter().map(|b| b.available())).await;

        let mut summaries = Vec::new();
        let mut dead_backends = Vec::new();
        let mut total = ClusterTotals::default();
        let mut users = BTreeSet::new();
        let mut cpu_sum = 0.0f32;
        let mut hosts = 0usize;

        for (backend, up) in backends.iter().zip(availability) {
            if !up {
                dead_backends.push(backend.name.clone());
                continue;
            }
            let snapshot = backend.snapshot().await;
            let backend_users = snapshot.users();

            if let Some(host) = snapshot.host {
                hosts += 1;
                cpu_sum += host.cpu_percent;
                total.cpu_count += host.cpu_count;
                total.memory_used += host.memory_used;
                total.memory_total += host.memory_total;
                total.swap_used += host.swap_used;
                total.swap_total += host.swap_total;
            }
            total.processes += snapshot.nb_process;
            total.requests += snapshot.nb_requests;

            summaries.push(BackendSummary {
                name: backend.name.clone(),
                host: snapshot.host,
                users: backend_users.len(),
                processes: snapshot.nb_process,
                requests: snapshot.nb_requests,
            });
            users.extend(backend_users);
        }

        if hosts > 0 {
            total.cpu_percent = cpu_sum / hosts as f32;
        }
        total.memory_percent = percent(total.memory_used, total.memory_total);
        total.swap_percent = percent(total.swap_used, total.swap_total);
        total.users = users.len();

        ClusterSummary {
            backends: summaries,
            total,
            dead_backends,
            generated_at: Utc::now(),
        }
    }
}
