//! Optional HTTP status endpoint.
//!
//! Exposes live counters for load balancers and operators. It runs beside the
//! TCP relay and never touches client traffic.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::state::{RelayState, RelayStats};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: String,
    #[serde(flatten)]
    pub stats: RelayStats,
}

/// GET /health
pub async fn health(State(state): State<Arc<RelayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backend: state.backend.name().to_string(),
        stats: state.stats().await,
    })
}

pub fn status_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the status endpoint until `shutdown` flips
pub async fn serve_status(
    addr: SocketAddr,
    state: Arc<RelayState>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Status endpoint on http://{}/health", listener.local_addr()?);

    axum::serve(listener, status_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    #[tokio::test]
    async fn test_health_reports_counters() {
        let state = Arc::new(RelayState::from_config(RelayConfig::default()).unwrap());
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let session = state
            .sessions
            .create("127.0.0.1:8000".parse().unwrap(), tx)
            .await;
        state.rooms.join("R", &session).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, status_router(state)).await.unwrap();
        });

        let body: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "status": "ok",
                "backend": "memory",
                "sessions": 1,
                "authenticated": 0,
                "rooms": 1
            })
        );
    }
}
