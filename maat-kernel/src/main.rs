/**
 * MAAT KERNEL - Point d'entrée du balancer
 *
 * RÔLE : Charge la configuration, construit le registre des backends et le
 * placer, puis sert l'API JSON jusqu'à Ctrl-C.
 */

use std::sync::Arc;

use anyhow::{Context, Result};
use maat_kernel::http::{self, AppState};
use maat_kernel::{load_config, BackendRegistry, Placer};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = load_config().await.context("Failed to load kernel configuration")?;

    let registry = Arc::new(BackendRegistry::from_config(&cfg).context("Invalid backend configuration")?);
    info!(backends = registry.len(), names = ?registry.names(), "backends registered");

    let placer = Arc::new(Placer::new(registry, cfg.max_sessions_per_user, cfg.max_attempts));
    let app_state = AppState::new(placer);
    if app_state.api_key.is_some() {
        info!("API key required on /api routes");
    }

    let app = http::build_router(app_state);
    let listener = TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.listen))?;
    info!("[kernel] listening on http://{}", cfg.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
        .context("Kernel HTTP server failed")?;

    info!("[kernel] stopped");
    Ok(())
}
