//! Maat Agent Host binary
//!
//! Loads the configuration, starts the monitoring loop and serves the agent
//! HTTP routes until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use maat_agent_host::{http, AgentConfig, SysinfoHostSource, SysinfoProcessSource};
use maat_core::MonitoringAgent;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Maat Agent Host v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = AgentConfig::load().await.context("Failed to load agent configuration")?;
    let monitoring = config.monitoring.to_monitoring_config();
    info!(
        process = %monitoring.process_name,
        max_per_user = monitoring.max_process_by_user,
        "monitoring configured"
    );

    let agent = Arc::new(MonitoringAgent::new(
        monitoring,
        Arc::new(SysinfoProcessSource::new()),
        Arc::new(SysinfoHostSource::new()),
    ));
    let handle = agent.spawn().context("Failed to start monitoring loop")?;

    let listener = TcpListener::bind(config.server.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen))?;

    let served = http::serve(listener, agent, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    })
    .await;

    info!("shutting down monitoring loop");
    handle.stop().await;

    served.context("Agent HTTP server failed")?;
    Ok(())
}
