/**
 * CONFIG KERNEL - Chargement de la configuration du balancer
 *
 * Fichier YAML désigné par MAAT_KERNEL_CONFIG (défaut: kernel.yaml).
 * Fichier absent ou vide => configuration par défaut (aucun backend).
 * Fichier invalide => erreur remontée au démarrage.
 */

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

pub const CONFIG_ENV: &str = "MAAT_KERNEL_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config invalide {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    pub listen: SocketAddr,
    /// Plafond global de sessions (vivantes + réservées) par utilisateur
    pub max_sessions_per_user: usize,
    /// Tentatives polies avant d'escalader en réservation forcée
    pub max_attempts: usize,
    pub backends: Vec<BackendConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BackendConf {
    pub name: String,
    /// URL publique du service (ex: http://node1:8000)
    pub service_url: String,
    #[serde(default = "default_ping_path")]
    pub ping_path: String,
    /// URL de l'agent maat sur l'hôte (ex: http://node1:5005)
    pub agent_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_data_interval_ms")]
    pub data_interval_ms: u64,
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: usize,
}

fn default_ping_path() -> String { "/".to_string() }
fn default_timeout_ms() -> u64 { 2000 }
fn default_ping_interval_ms() -> u64 { 5000 }
fn default_data_interval_ms() -> u64 { 2000 }
fn default_max_sessions_per_user() -> usize { 1 }

impl BackendConf {
    pub fn ping_url(&self) -> String {
        format!("{}/{}", self.service_url.trim_end_matches('/'), self.ping_path.trim_start_matches('/'))
    }

    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_ms) }
    pub fn ping_interval(&self) -> Duration { Duration::from_millis(self.ping_interval_ms) }
    pub fn data_interval(&self) -> Duration { Duration::from_millis(self.data_interval_ms) }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_sessions_per_user: 1,
            max_attempts: 3,
            backends: Vec::new(),
        }
    }
}

pub async fn load_config() -> Result<KernelConfig, ConfigError> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "kernel.yaml".into());
    load_config_from(&path).await
}

pub async fn load_config_from(path: impl AsRef<Path>) -> Result<KernelConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::warn!(path = %path.display(), "pas de config kernel, usage config par défaut");
        return Ok(KernelConfig::default());
    }

    let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(&txt).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = load_config_from(dir.path().join("nope.yaml")).await.unwrap();
        assert_eq!(missing, KernelConfig::default());

        let empty = dir.path().join("empty.yaml");
        tokio::fs::write(&empty, "  \n").await.unwrap();
        assert_eq!(load_config_from(&empty).await.unwrap(), KernelConfig::default());
    }

    #[tokio::test]
    async fn test_backends_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.yaml");
        tokio::fs::write(
            &path,
            r#"
max_attempts: 5
backends:
  - name: node1
    service_url: http://node1:8000/
    agent_url: http://node1:5005
  - name: node2
    service_url: http://node2:8000
    ping_path: /hub/api
    agent_url: http://node2:5005
    max_sessions_per_user: 2
"#,
        )
        .await
        .unwrap();

        let cfg = load_config_from(&path).await.unwrap();
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.max_sessions_per_user, 1);
        assert_eq!(cfg.backends.len(), 2);
        assert_eq!(cfg.backends[0].ping_url(), "http://node1:8000/");
        assert_eq!(cfg.backends[0].timeout(), Duration::from_secs(2));
        assert_eq!(cfg.backends[1].ping_url(), "http://node2:8000/hub/api");
        assert_eq!(cfg.backends[1].max_sessions_per_user, 2);
    }

    #[tokio::test]
    async fn test_invalid_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.yaml");
        tokio::fs::write(&path, "backends: [ { name: 1 ").await.unwrap();
        assert!(matches!(load_config_from(&path).await, Err(ConfigError::Parse { .. })));
    }
}
