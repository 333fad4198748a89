//! Maat Agent Host - per-host session monitoring agent
//!
//! Counts the user sessions of one service on this host, reports host
//! resource usage, and hands out session reservations to balancers over HTTP.

pub mod config;
pub mod http;
pub mod metrics;

pub use config::AgentConfig;
pub use metrics::{SysinfoHostSource, SysinfoProcessSource};
