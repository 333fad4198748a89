/**
 * API REST MAAT - Serveur HTTP du balancer
 *
 * RÔLE :
 * Expose le placement de sessions et l'état des backends en JSON pour un
 * frontend externe (page d'accueil, redirections, tableau de bord).
 *
 * FONCTIONNEMENT :
 * - Routes : /health, /api/v1/backends, /api/v1/summary, /api/v1/users, /api/v1/sessions
 * - POST /api/v1/sessions/{username} : 200 placé, 409 limite utilisateur, 503 aucun backend
 *
 * SÉCURITÉ :
 * - Si MAAT_API_KEY est défini, header x-api-key obligatoire sauf sur /health
 * - Sans MAAT_API_KEY l'API est ouverte (déploiement derrière le frontend)
 */

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use indexmap::IndexMap;
use maat_core::ProcessSession;
use serde::Serialize;

use crate::backend::BackendStatus;
use crate::placer::{PlacementError, Placer};
use crate::registry::{BackendRegistry, ClusterSummary};

pub const API_KEY_ENV: &str = "MAAT_API_KEY";

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<BackendRegistry>,
    pub placer: Arc<Placer>,
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(placer: Arc<Placer>) -> Self {
        let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        Self {
            registry: placer.registry().clone(),
            placer,
            api_key,
        }
    }
}

#[derive(Debug, Serialize)]
struct PlacementView {
    backend: String,
    url: String,
    attempt: usize,
    forced: bool,
}

#[derive(Debug, Serialize)]
struct ErrorView {
    error: String,
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        tracing::warn!(path = %req.uri().path(), "rejected request without valid API key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/backends", get(list_backends))
        .route("/api/v1/backends/{name}", get(get_backend))
        .route("/api/v1/summary", get(get_summary))
        .route("/api/v1/summary/{name}", get(get_backend_summary))
        .route("/api/v1/users/{username}", get(get_user_sessions))
        .route("/api/v1/sessions/{username}", post(place_session))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /api/v1/backends (liste, disponibles ou non)
async fn list_backends(State(app): State<AppState>) -> Json<Vec<BackendStatus>> {
    let backends = app.registry.list(true).await;
    let statuses = futures::future::join_all(backends.iter().map(|b| b.status())).await;
    Json(statuses)
}

// GET /api/v1/backends/{name} (détail)
async fn get_backend(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<BackendStatus>, StatusCode> {
    let Some(backend) = app.registry.get(&name) else { return Err(StatusCode::NOT_FOUND); };
    Ok(Json(backend.status().await))
}

// GET /api/v1/summary (monitoring cluster)
async fn get_summary(State(app): State<AppState>) -> Json<ClusterSummary> {
    Json(app.registry.summary(None).await)
}

// GET /api/v1/summary/{name}
async fn get_backend_summary(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ClusterSummary>, StatusCode> {
    if app.registry.get(&name).is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(app.registry.summary(Some(&name)).await))
}

// GET /api/v1/users/{username} (sessions vivantes par backend)
async fn get_user_sessions(
    State(app): State<AppState>,
    Path(username): Path<String>,
) -> Json<IndexMap<String, Vec<ProcessSession>>> {
    Json(app.placer.user_sessions(&username).await)
}

// POST /api/v1/sessions/{username} (placement)
async fn place_session(State(app): State<AppState>, Path(username): Path<String>) -> Response {
    match app.placer.place(&username).await {
        Ok(placement) => Json(PlacementView {
            backend: placement.backend.name.clone(),
            url: placement.backend.service.url().to_string(),
            attempt: placement.attempt,
            forced: placement.forced,
        })
        .into_response(),
        Err(e) => {
            let status = match e {
                PlacementError::UserLimitReached { .. } => StatusCode::CONFLICT,
                PlacementError::NoSuitableBackend { .. } | PlacementError::PlacementExhausted { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            };
            (status, Json(ErrorView { error: e.to_string() })).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendDescriptor;
    use crate::client::DirectAgentClient;
    use crate::service::ServiceEndpoint;
    use maat_devkit::AgentFixture;
    use std::net::SocketAddr;

    async fn serve(state: AppState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        addr
    }

    fn state_with(fixtures: &[(&str, &AgentFixture)], api_key: Option<&str>) -> AppState {
        let registry = Arc::new(BackendRegistry::new());
        for (name, fixture) in fixtures {
            registry.add(BackendDescriptor::new(
                *name,
                ServiceEndpoint::always_available(*name, format!("http://{name}:8000")),
                Arc::new(DirectAgentClient::new(fixture.agent.clone())),
                1,
            ));
        }
        let placer = Arc::new(Placer::new(registry.clone(), 1, 3));
        AppState {
            registry,
            placer,
            api_key: api_key.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_place_then_conflict() {
        let node = AgentFixture::new();
        node.settle().await;
        let addr = serve(state_with(&[("node1", &node)], None)).await;
        let client = reqwest::Client::new();

        let first = client.post(format!("http://{addr}/api/v1/sessions/alice")).send().await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let body: serde_json::Value = first.json().await.unwrap();
        assert_eq!(body["backend"], "node1");
        assert_eq!(body["url"], "http://node1:8000");
        assert_eq!(body["attempt"], 1);

        let second = client.post(format!("http://{addr}/api/v1/sessions/alice")).send().await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_no_backend_is_unavailable() {
        let addr = serve(state_with(&[], None)).await;
        let response = reqwest::Client::new()
            .post(format!("http://{addr}/api/v1/sessions/alice"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_backend_views() {
        let node = AgentFixture::new();
        node.start_sessions("alice", 1);
        node.settle().await;
        let addr = serve(state_with(&[("node1", &node)], None)).await;

        let list: serde_json::Value = reqwest::get(format!("http://{addr}/api/v1/backends"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list[0]["name"], "node1");
        assert_eq!(list[0]["nb_process"], 1);

        let missing = reqwest::get(format!("http://{addr}/api/v1/backends/nope")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let users: serde_json::Value = reqwest::get(format!("http://{addr}/api/v1/users/alice"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(users["node1"][0]["username"], "alice");

        let summary: serde_json::Value = reqwest::get(format!("http://{addr}/api/v1/summary"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(summary["total"]["processes"], 1);
    }

    #[tokio::test]
    async fn test_api_key_required_when_configured() {
        let node = AgentFixture::new();
        let addr = serve(state_with(&[("node1", &node)], Some("secret"))).await;
        let client = reqwest::Client::new();

        let health = client.get(format!("http://{addr}/health")).send().await.unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let denied = client.get(format!("http://{addr}/api/v1/backends")).send().await.unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = client
            .get(format!("http://{addr}/api/v1/backends"))
            .header("x-api-key", "secret")
            .send()
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }
}
