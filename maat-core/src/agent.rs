//! Per-host monitoring agent
//!
//! The agent owns two refreshing caches (live sessions and host metrics) and
//! the reservation ledger. It answers "can user U get a slot here?" by
//! comparing the caller's idea of the host load with its own, tolerating a
//! small difference instead of locking anything across hosts.
//!
//! A background loop refreshes both caches and reconciles the ledger every
//! `refresh_interval`. The loop is started with [`MonitoringAgent::spawn`] and
//! stopped through the returned [`AgentHandle`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::cache::{FailurePolicy, RefreshingCache};
use crate::ledger::{ReconcileReport, RequestLedger, DEFAULT_START_SLACK};
use crate::snapshot::{AgentInfo, AgentSnapshot, HostMetrics, ProcessTable, PROTOCOL_VERSION};
use crate::sources::{HostSource, ProcessSource};

/// Half-width of the accepted window around the agent's own load
pub const STALENESS_TOLERANCE: i64 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Name of the per-user process to count (e.g. `jupyterhub-singleuser`)
    pub process_name: String,
    pub max_process_by_user: usize,
    pub request_ttl: Duration,
    /// Pause between two background iterations
    pub refresh_interval: Duration,
    /// Staleness bound of the process cache
    pub process_interval: Duration,
    /// Staleness bound of the host metrics cache
    pub host_interval: Duration,
    /// Refresh stale caches when `/v1/data` is served
    pub refresh_on_read: bool,
    /// How much earlier than its reservation a session may appear to start
    pub start_time_slack: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            process_name: "jupyterhub-singleuser".to_string(),
            max_process_by_user: 1,
            request_ttl: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(5),
            process_interval: Duration::from_millis(2500),
            host_interval: Duration::from_secs(5),
            refresh_on_read: true,
            start_time_slack: DEFAULT_START_SLACK,
        }
    }
}

/// Why a reservation was accepted or refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    Forced,
    Accepted,
    UserLimitReached { load: usize, limit: usize },
    StaleKnowledge { known: i64, total: i64 },
}

impl RequestDecision {
    pub fn accepted(&self) -> bool {
        matches!(self, RequestDecision::Forced | RequestDecision::Accepted)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentLoopError {
    #[error("monitoring loop already running for {0}")]
    AlreadyRunning(String),
}

pub struct MonitoringAgent {
    config: MonitoringConfig,
    processes: RefreshingCache<ProcessTable>,
    host: RefreshingCache<HostMetrics>,
    ledger: Mutex<RequestLedger>,
    running: AtomicBool,
    span: Span,
}

impl MonitoringAgent {
    pub fn new(
        config: MonitoringConfig,
        process_source: Arc<dyn ProcessSource>,
        host_source: Arc<dyn HostSource>,
    ) -> Self {
        let span = info_span!("agent", process = %config.process_name);

        let process_name = config.process_name.clone();
        let processes = RefreshingCache::builder("processes", ProcessTable::default(), move |_| {
            let source = process_source.clone();
            let process_name = process_name.clone();
            async move { tokio::task::spawn_blocking(move || source.sessions(&process_name)).await? }
        })
        .interval(config.process_interval)
        .on_failure(FailurePolicy::ResetToDefault)
        .pass_previous(false)
        .refresh_on_read(config.refresh_on_read)
        .build();

        let host = RefreshingCache::builder("host", HostMetrics::default(), move |_| {
            let source = host_source.clone();
            async move { tokio::task::spawn_blocking(move || source.metrics()).await? }
        })
        .interval(config.host_interval)
        .on_failure(FailurePolicy::ResetToDefault)
        .pass_previous(false)
        .refresh_on_read(config.refresh_on_read)
        .build();

        let ledger = RequestLedger::with_start_slack(config.start_time_slack);
        Self {
            config,
            processes,
            host,
            ledger: Mutex::new(ledger),
            running: AtomicBool::new(false),
            span,
        }
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            process_name: self.config.process_name.clone(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Reserve a slot for `username`. See [`MonitoringAgent::decide_request`].
    pub fn add_process_request(&self, username: &str, known_value: i64, force: bool) -> bool {
        self.decide_request(username, known_value, force).accepted()
    }

    /// Accept or refuse a reservation and record it when accepted.
    ///
    /// Forced requests always pass. Otherwise the user must be under
    /// `max_process_by_user` (live + pending) and `known_value` must lie
    /// strictly within `STALENESS_TOLERANCE` of the agent's total load.
    pub fn decide_request(&self, username: &str, known_value: i64, force: bool) -> RequestDecision {
        let _enter = self.span.enter();
        let mut ledger = self.ledger.lock();
        let live = self.processes.peek();

        if force {
            let request = ledger.add(username);
            info!(username, id = %request.id, "forced reservation recorded");
            return RequestDecision::Forced;
        }

        let load = ledger.count_for(username) + live.count_for(username);
        let limit = self.config.max_process_by_user;
        if load >= limit {
            warn!(username, load, limit, "user limit reached, reservation refused");
            return RequestDecision::UserLimitReached { load, limit };
        }

        let total = (ledger.total_count() + live.total()) as i64;
        if total - STALENESS_TOLERANCE < known_value && known_value < total + STALENESS_TOLERANCE {
            let request = ledger.add(username);
            info!(username, known_value, total, id = %request.id, "reservation accepted");
            RequestDecision::Accepted
        } else {
            warn!(username, known_value, total, "caller load too far from ours, reservation refused");
            RequestDecision::StaleKnowledge { known: known_value, total }
        }
    }

    pub fn remove_request(&self, username: &str, id: Uuid) -> bool {
        self.ledger.lock().remove(username, id)
    }

    pub fn pending_count(&self) -> usize {
        self.ledger.lock().total_count()
    }

    /// Compose the current view, refreshing stale caches first
    pub async fn snapshot(&self) -> AgentSnapshot {
        let processes = self.processes.get().await;
        let host = self.host.get().await;
        let ledger = self.ledger.lock();

        let nb_process = processes.total();
        let nb_requests = ledger.total_count();
        AgentSnapshot {
            nb_process,
            processes_timestamp: self.processes.updated_at(),
            processes_failed: self.processes.failed(),
            processes,
            requests: ledger.pending().clone(),
            nb_requests,
            requests_timestamp: ledger.last_update(),
            nb: nb_process + nb_requests,
            host: self.host.updated_at().map(|_| host),
            host_timestamp: self.host.updated_at(),
            host_failed: self.host.failed(),
            timestamp: Some(Utc::now()),
        }
    }

    /// One background iteration: refresh both caches, then reconcile the ledger
    pub async fn tick(&self) -> ReconcileReport {
        let processes = self.processes.force_refresh().await;
        self.host.force_refresh().await;

        let report = self.ledger.lock().reconcile(&processes, self.config.request_ttl);
        if report.removed() > 0 {
            debug!(
                parent: &self.span,
                expired = report.expired,
                fulfilled = report.fulfilled,
                "reservations reconciled"
            );
        }
        report
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the background loop. Only one loop may run per agent.
    pub fn spawn(self: &Arc<Self>) -> Result<AgentHandle, AgentLoopError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AgentLoopError::AlreadyRunning(self.config.process_name.clone()));
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let agent = self.clone();
        let span = self.span.clone();
        let task = tokio::spawn(
            async move {
                info!(interval = ?agent.config.refresh_interval, "monitoring loop started");
                loop {
                    agent.tick().await;
                    if *stop_rx.borrow() {
                        break;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(agent.config.refresh_interval) => {}
                        changed = stop_rx.changed() => {
                            if changed.is_err() || *stop_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
                agent.running.store(false, Ordering::SeqCst);
                info!("monitoring loop stopped");
            }
            .instrument(span),
        );

        Ok(AgentHandle { stop_tx, task })
    }
}

/// Owner of a running monitoring loop
pub struct AgentHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AgentHandle {
    /// Signal the loop and wait until it has exited
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "monitoring loop ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
