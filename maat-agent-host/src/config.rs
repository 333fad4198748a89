//! Agent host configuration
//!
//! Handles:
//! - HTTP listen address
//! - Monitored process name and per-user limit
//! - Reservation TTL and refresh cadence
//!
//! Read from `MAAT_AGENT_CONFIG` when set, otherwise from the OS config dir.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use maat_core::MonitoringConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "MAAT_AGENT_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub server: ServerConfig,
    pub monitoring: MonitoringSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSection {
    pub process_name: String,
    pub max_process_by_user: usize,
    pub request_ttl_secs: u64,
    pub refresh_interval_ms: u64,
    pub process_interval_ms: u64,
    pub host_interval_ms: u64,
    pub refresh_on_read: bool,
    /// Tolerance when matching session start times (whole seconds) to reservations
    pub start_time_slack_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 5005)),
        }
    }
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            process_name: "jupyterhub-singleuser".to_string(),
            max_process_by_user: 1,
            request_ttl_secs: 30,
            refresh_interval_ms: 5000,
            process_interval_ms: 2500,
            host_interval_ms: 5000,
            refresh_on_read: true,
            start_time_slack_ms: 1000,
        }
    }
}

impl MonitoringSection {
    pub fn to_monitoring_config(&self) -> MonitoringConfig {
        MonitoringConfig {
            process_name: self.process_name.clone(),
            max_process_by_user: self.max_process_by_user,
            request_ttl: Duration::from_secs(self.request_ttl_secs),
            refresh_interval: Duration::from_millis(self.refresh_interval_ms),
            process_interval: Duration::from_millis(self.process_interval_ms),
            host_interval: Duration::from_millis(self.host_interval_ms),
            refresh_on_read: self.refresh_on_read,
            start_time_slack: Duration::from_millis(self.start_time_slack_ms),
        }
    }
}

impl AgentConfig {
    /// Load config from `MAAT_AGENT_CONFIG` or the OS-specific location
    pub async fn load() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => Self::config_file_path()?,
        };
        Self::load_or_init(&path).await
    }

    /// First run: write the defaults to `path` so they can be edited
    pub async fn load_or_init(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load_from(path).await;
        }

        let config = Self::default();
        match config.save_to(path).await {
            Ok(()) => tracing::info!(path = %path.display(), "default agent config written"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not write default agent config"),
        }
        Ok(config)
    }

    /// Load from `path`, defaults when the file does not exist
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "no agent config file, using defaults");
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Invalid agent config {}", path.display()))?;
        Ok(config)
    }

    /// Save config to `path`, creating parent directories
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;

        path.push("maat-agent");
        path.push("config.toml");
        Ok(path)
    }
}
