//! Maat core - caches, reservations and the per-host monitoring agent
//!
//! Shared by the agent host (which serves a [`MonitoringAgent`] over HTTP) and
//! the balancer kernel (which can also embed an agent directly).

pub mod agent;
pub mod cache;
pub mod ledger;
pub mod snapshot;
pub mod sources;

pub use agent::{AgentHandle, AgentLoopError, MonitoringAgent, MonitoringConfig, RequestDecision};
pub use cache::{FailurePolicy, RefreshingCache};
pub use ledger::{ReconcileReport, RequestLedger, DEFAULT_START_SLACK};
pub use snapshot::{AgentInfo, AgentSnapshot, HostMetrics, PendingRequest, ProcessSession, ProcessTable};
pub use sources::{HostSource, NoHostMetrics, ProcessSource};
