//! HTTP surface: liveness, health probe and Prometheus metrics.
//!
//! Runs on a separate tokio task next to the WebSocket gateway.

use crate::state::Matrix;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    server: String,
    database: &'static str,
    online: usize,
    since: chrono::DateTime<chrono::Utc>,
}

/// Handler for GET / - plain liveness text.
async fn root_handler(State(matrix): State<Arc<Matrix>>) -> String {
    format!("{} is running\n", matrix.server_info.name)
}

/// Handler for GET /health - checks that the store answers.
async fn health_handler(State(matrix): State<Arc<Matrix>>) -> impl IntoResponse {
    let db_ok = match matrix.db.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health probe: database unreachable");
            false
        }
    };

    let body = Health {
        status: if db_ok { "ok" } else { "degraded" },
        server: matrix.server_info.name.clone(),
        database: if db_ok { "connected" } else { "unreachable" },
        online: matrix.sessions.len(),
        since: matrix.server_info.started_at,
    };
    let code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

pub fn router(matrix: Arc<Matrix>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(matrix)
}

/// Run the HTTP server.
///
/// Binds to `0.0.0.0:port`. This is a long-running task that should be
/// spawned in the background.
pub async fn run_http_server(port: u16, matrix: Arc<Matrix>) {
    let app = router(matrix);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind HTTP server");
            return;
        }
    };
    tracing::info!(%addr, "HTTP server listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "HTTP server error");
    }
}
