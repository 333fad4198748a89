//! HTTP surface of the monitoring agent
//!
//! Routes (all GET):
//! - `/ping`, `/v1/ping`: liveness
//! - `/v1/data`: current [`AgentSnapshot`]
//! - `/v1/new_requests/{username}/{known_value}[/{force}]`: reservation, JSON bool
//! - `/info`: process name and protocol version
//!
//! Malformed path parameters are rejected by the extractor with 400.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use maat_core::{AgentInfo, AgentSnapshot, MonitoringAgent};
use tokio::net::TcpListener;
use tracing::{debug, info};

pub fn build_router(agent: Arc<MonitoringAgent>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/v1/ping", get(ping))
        .route("/v1/data", get(data))
        .route("/v1/new_requests/{username}/{known_value}", get(new_request))
        .route("/v1/new_requests/{username}/{known_value}/{force}", get(new_request_forced))
        .route("/info", get(agent_info))
        .with_state(agent)
}

/// Serve the agent routes on `listener` until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    agent: Arc<MonitoringAgent>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("agent listening on http://{addr}");
    }
    axum::serve(listener, build_router(agent))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn ping() -> &'static str {
    "OK"
}

async fn data(State(agent): State<Arc<MonitoringAgent>>) -> Json<AgentSnapshot> {
    Json(agent.snapshot().await)
}

async fn new_request(
    State(agent): State<Arc<MonitoringAgent>>,
    Path((username, known_value)): Path<(String, i64)>,
) -> Json<bool> {
    debug!(username = %username, known_value, "GET /v1/new_requests");
    Json(agent.add_process_request(&username, known_value, false))
}

async fn new_request_forced(
    State(agent): State<Arc<MonitoringAgent>>,
    Path((username, known_value, force)): Path<(String, i64, i64)>,
) -> Json<bool> {
    debug!(username = %username, known_value, force, "GET /v1/new_requests (force flag)");
    Json(agent.add_process_request(&username, known_value, force > 0))
}

async fn agent_info(State(agent): State<Arc<MonitoringAgent>>) -> Json<AgentInfo> {
    Json(agent.info())
}

#[cfg(test)]
mod tests {
    use super::*;
    use maat_devkit::AgentFixture;
    use std::net::SocketAddr;

    async fn spawn_server(fixture: &AgentFixture) -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let agent = fixture.agent.clone();
        tokio::spawn(async move {
            serve(listener, agent, async move {
                let _ = rx.await;
            })
            .await
            .unwrap();
        });
        (addr, tx)
    }

    #[tokio::test]
    async fn test_ping_and_info() {
        let fixture = AgentFixture::new();
        let (addr, _stop) = spawn_server(&fixture).await;

        for path in ["ping", "v1/ping"] {
            let body = reqwest::get(format!("http://{addr}/{path}")).await.unwrap().text().await.unwrap();
            assert_eq!(body, "OK");
        }

        let info: AgentInfo = reqwest::get(format!("http://{addr}/info"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(info.process_name, "fake-session");
        assert_eq!(info.version, "v1");
    }

    #[tokio::test]
    async fn test_reservation_routes() {
        let fixture = AgentFixture::with_max_per_user(1);
        fixture.start_sessions("alice", 1);
        fixture.settle().await;
        let (addr, _stop) = spawn_server(&fixture).await;

        let get_bool = |path: String| async move {
            reqwest::get(format!("http://{addr}{path}"))
                .await
                .unwrap()
                .json::<bool>()
                .await
                .unwrap()
        };

        // alice already has a live session
        assert!(!get_bool("/v1/new_requests/alice/1".into()).await);
        assert!(get_bool("/v1/new_requests/bob/1/0".into()).await);
        assert!(get_bool("/v1/new_requests/alice/99/1".into()).await);

        let snapshot: AgentSnapshot = reqwest::get(format!("http://{addr}/v1/data"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(snapshot.nb_process, 1);
        assert_eq!(snapshot.nb_requests, 2);
        assert_eq!(snapshot.nb, 3);
    }

    #[tokio::test]
    async fn test_malformed_known_value_is_rejected() {
        let fixture = AgentFixture::new();
        let (addr, _stop) = spawn_server(&fixture).await;

        let response = reqwest::get(format!("http://{addr}/v1/new_requests/alice/abc"))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(fixture.agent.pending_count(), 0);
    }
}
