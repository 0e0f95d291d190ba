//! Health check endpoint

use std::sync::Arc;

use axum::extract::Extension;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use drawpile_server::Server;
use serde::Serialize;

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: usize,
    pub connections: u32,
}

async fn health_check(Extension(server): Extension<Arc<Server>>) -> Json<HealthResponse> {
    let status = server.status();
    Json(HealthResponse {
        status: if status.shutting_down { "shutting_down" } else { "healthy" },
        version: env!("CARGO_PKG_VERSION"),
        sessions: status.sessions,
        connections: status.connections,
    })
}

/// Create health routes
pub fn health_routes() -> Router {
    Router::new().route("/health", get(health_check))
}
