/**
 * AGENT CLIENT - Accès du balancer aux agents de monitoring
 *
 * RÔLE :
 * Interface commune pour lire l'état d'un agent et lui demander une réservation,
 * que l'agent tourne dans le même processus ou sur un hôte distant.
 *
 * FONCTIONNEMENT :
 * - DirectAgentClient : appelle un MonitoringAgent local, interrupteur de disponibilité
 * - HttpAgentClient : GET /v1/data mis en cache, GET /ping mis en cache,
 *   GET /v1/new_requests/{u}/{k}/{0|1} sans cache à chaque demande
 * - Toute erreur réseau/HTTP devient un AgentError (jamais de panic)
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use maat_core::{AgentSnapshot, FailurePolicy, MonitoringAgent, RefreshingCache};
use reqwest::{StatusCode, Url};
use tracing::{debug, info_span, Instrument, Span};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("agent answered HTTP {0}")]
    Status(StatusCode),
    #[error("invalid agent URL {0}")]
    InvalidUrl(String),
    #[error("agent unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Dernier état connu de l'agent (éventuellement périmé)
    async fn get(&self) -> AgentSnapshot;

    /// Demande une réservation pour `username`; Ok(false) = refus de l'agent
    async fn add_request(&self, username: &str, known_value: i64, force: bool) -> Result<bool, AgentError>;

    async fn available(&self) -> bool;

    /// Identifiant lisible (URL ou nom de processus) pour les logs
    fn describe(&self) -> String;
}

/// Agent hébergé dans le même processus
pub struct DirectAgentClient {
    agent: Arc<MonitoringAgent>,
    available: AtomicBool,
}

impl DirectAgentClient {
    pub fn new(agent: Arc<MonitoringAgent>) -> Self {
        Self {
            agent,
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn agent(&self) -> &Arc<MonitoringAgent> {
        &self.agent
    }
}

#[async_trait]
impl AgentClient for DirectAgentClient {
    async fn get(&self) -> AgentSnapshot {
        self.agent.snapshot().await
    }

    async fn add_request(&self, username: &str, known_value: i64, force: bool) -> Result<bool, AgentError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(AgentError::Unavailable(self.describe()));
        }
        Ok(self.agent.add_process_request(username, known_value, force))
    }

    async fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn describe(&self) -> String {
        format!("direct:{}", self.agent.config().process_name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HttpAgentOptions {
    pub timeout: Duration,
    pub data_interval: Duration,
    pub ping_interval: Duration,
}

impl Default for HttpAgentOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            data_interval: Duration::from_secs(2),
            ping_interval: Duration::from_secs(5),
        }
    }
}

/// Agent distant joint en HTTP
pub struct HttpAgentClient {
    base: Url,
    http: reqwest::Client,
    data: RefreshingCache<AgentSnapshot>,
    ping: RefreshingCache<bool>,
    span: Span,
}

fn join(base: &Url, segments: &[&str]) -> Result<Url, AgentError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| AgentError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

impl HttpAgentClient {
    pub fn new(base_url: &str, options: HttpAgentOptions) -> Result<Self, AgentError> {
        let base = Url::parse(base_url).map_err(|_| AgentError::InvalidUrl(base_url.to_string()))?;
        let http = reqwest::Client::builder().timeout(options.timeout).build()?;
        let span = info_span!("agent_client", url = %base);

        let data_url = join(&base, &["v1", "data"])?;
        let client = http.clone();
        let data = RefreshingCache::builder(format!("{base} data"), AgentSnapshot::default(), move |_| {
            let client = client.clone();
            let url = data_url.clone();
            async move {
                let snapshot = client
                    .get(url)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<AgentSnapshot>()
                    .await?;
                Ok::<_, anyhow::Error>(snapshot)
            }
        })
        .interval(options.data_interval)
        .on_failure(FailurePolicy::ResetToDefault)
        .pass_previous(false)
        .build();

        let ping_url = join(&base, &["ping"])?;
        let client = http.clone();
        let ping = RefreshingCache::builder(format!("{base} ping"), false, move |_| {
            let client = client.clone();
            let url = ping_url.clone();
            async move {
                let response = client.get(url).send().await?;
                Ok::<_, anyhow::Error>(response.status().is_success())
            }
        })
        .interval(options.ping_interval)
        .on_failure(FailurePolicy::ResetToDefault)
        .pass_previous(false)
        .build();

        Ok(Self { base, http, data, ping, span })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn get(&self) -> AgentSnapshot {
        self.data.get().instrument(self.span.clone()).await
    }

    async fn add_request(&self, username: &str, known_value: i64, force: bool) -> Result<bool, AgentError> {
        let known = known_value.to_string();
        let force_flag = if force { "1" } else { "0" };
        let url = join(&self.base, &["v1", "new_requests", username, &known, force_flag])?;

        let response = self.http.get(url).send().instrument(self.span.clone()).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Status(status));
        }
        let accepted = response.json::<bool>().await?;
        debug!(parent: &self.span, username, known_value, force, accepted, "reservation answered");
        Ok(accepted)
    }

    async fn available(&self) -> bool {
        self.ping.get().await
    }

    fn describe(&self) -> String {
        self.base.to_string()
    }
}
