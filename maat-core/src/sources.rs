//! Data sources feeding a monitoring agent
//!
//! Collection is blocking (it walks the OS process table), so the agent calls
//! these from `spawn_blocking`.

use crate::snapshot::{HostMetrics, ProcessTable};

/// Enumerates live user sessions of the monitored service
pub trait ProcessSource: Send + Sync {
    /// Sessions whose process name matches `process_name`, grouped by user
    fn sessions(&self, process_name: &str) -> anyhow::Result<ProcessTable>;
}

/// Reports host resource usage
pub trait HostSource: Send + Sync {
    fn metrics(&self) -> anyhow::Result<HostMetrics>;
}

/// Host source for deployments that do not report resource usage
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHostMetrics;

impl HostSource for NoHostMetrics {
    fn metrics(&self) -> anyhow::Result<HostMetrics> {
        Ok(HostMetrics::default())
    }
}
