//! HTTP API module for drawpile-srv
//!
//! Provides REST endpoints for:
//! - Health checks
//! - Administration (`/api/<path>` mapped onto the server's admin interface)

pub mod admin;
pub mod health;

use std::sync::Arc;

use axum::{Extension, Router};
use drawpile_server::Server;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use admin::admin_routes;
pub use health::health_routes;

/// Create the HTTP router with all endpoints
pub fn router(server: Arc<Server>) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(admin_routes())
        .layer(Extension(server))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
