/*!
# Maat Kernel - Balancer de sessions

Place les sessions utilisateur sur un ensemble de backends, chacun surveillé
par un agent maat (local ou distant), et expose l'état du cluster en JSON.
*/

pub mod backend;
pub mod client;
pub mod config;
pub mod http;
pub mod placer;
pub mod registry;
pub mod service;

pub use backend::{BackendDescriptor, BackendStatus};
pub use client::{AgentClient, AgentError, DirectAgentClient, HttpAgentClient, HttpAgentOptions};
pub use config::{load_config, load_config_from, BackendConf, ConfigError, KernelConfig};
pub use placer::{Placement, PlacementError, Placer};
pub use registry::{BackendRegistry, ClusterSummary};
pub use service::ServiceEndpoint;
