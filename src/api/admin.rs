//! Admin API endpoints
//!
//! `/api/<path>` forwards to the server's admin interface. The HTTP method
//! selects the admin method:
//!
//! | HTTP | Admin |
//! | --- | --- |
//! | GET | Get |
//! | POST | Create |
//! | PUT, PATCH | Update |
//! | DELETE | Delete |

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::any,
    Router,
};
use drawpile_server::{AdminMethod, AdminRequest, AdminStatus, Server};
use serde_json::{json, Value};

fn admin_method(method: &Method) -> Option<AdminMethod> {
    match *method {
        Method::GET => Some(AdminMethod::Get),
        Method::POST => Some(AdminMethod::Create),
        Method::PUT | Method::PATCH => Some(AdminMethod::Update),
        Method::DELETE => Some(AdminMethod::Delete),
        _ => None,
    }
}

fn http_status(status: AdminStatus) -> StatusCode {
    match status {
        AdminStatus::Ok => StatusCode::OK,
        AdminStatus::BadRequest => StatusCode::BAD_REQUEST,
        AdminStatus::NotFound => StatusCode::NOT_FOUND,
        AdminStatus::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn admin_request(
    method: Method,
    Extension(server): Extension<Arc<Server>>,
    Path(path): Path<String>,
    body: Bytes,
) -> Response {
    let Some(method) = admin_method(&method) else {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };
    let body: Value = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(body) => body,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("invalid JSON body: {e}") })),
                )
                    .into_response()
            }
        }
    };

    let result = server.call_admin(AdminRequest::new(method, path, body)).await;
    (http_status(result.status), Json(result.body)).into_response()
}

/// Create admin routes
pub fn admin_routes() -> Router {
    Router::new().route("/api/*path", any(admin_request))
}
