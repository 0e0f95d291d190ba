//! Administrative interface
//!
//! Requests name a method and a slash-separated path. Results carry a
//! status and a JSON body. [`Server::call_admin`] answers directly;
//! [`Server::call_admin_async`] publishes the result on a broadcast channel
//! tagged with the caller's request id.
//!
//! | Path | Methods |
//! | --- | --- |
//! | `server` | Get |
//! | `status` | Get |
//! | `sessions` | Get |
//! | `sessions/<id>` | Get, Update, Delete |
//! | `sessions/<id>/<ctx>` | Get, Delete |
//! | `banlist` | Get, Create |
//! | `banlist/<id>` | Delete |
//! | `accounts` | Get, Create |
//! | `accounts/<id>` | Update, Delete |
//! | `log` | Get |

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::Error;
use crate::events::ServerEvent;
use crate::server::Server;
use crate::session::SessionUpdate;
use crate::store::{AccountUpdate, NewAccount, NewBan};

/// Request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminMethod {
    /// Read
    Get,
    /// Create a new entry
    Create,
    /// Modify an entry
    Update,
    /// Remove an entry
    Delete,
}

/// An admin request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminRequest {
    /// Method
    pub method: AdminMethod,
    /// Path such as `sessions/abc`
    pub path: String,
    /// Request body
    #[serde(default)]
    pub body: Value,
}

impl AdminRequest {
    /// Create a request
    #[must_use]
    pub fn new(method: AdminMethod, path: impl Into<String>, body: Value) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }

    /// Create a `Get` request without a body
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(AdminMethod::Get, path, Value::Null)
    }
}

/// Result status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminStatus {
    /// Success
    Ok,
    /// Malformed request or unsupported method
    BadRequest,
    /// Unknown path or entry
    NotFound,
    /// Server-side failure
    InternalError,
}

/// An admin result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminResult {
    /// Status
    pub status: AdminStatus,
    /// Result body
    pub body: Value,
}

impl AdminResult {
    /// Successful result
    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self {
            status: AdminStatus::Ok,
            body,
        }
    }

    /// Serialize a value into a successful result
    pub fn from_value<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(body) => Self::ok(body),
            Err(e) => Self::error(AdminStatus::InternalError, e.to_string()),
        }
    }

    /// Error result with a message body
    #[must_use]
    pub fn error(status: AdminStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }

    /// Unknown path or entry
    #[must_use]
    pub fn not_found() -> Self {
        Self::error(AdminStatus::NotFound, "not found")
    }

    /// Method not supported on this path
    #[must_use]
    pub fn bad_method(method: AdminMethod) -> Self {
        Self::error(AdminStatus::BadRequest, format!("method {method:?} not supported"))
    }
}

impl From<Error> for AdminResult {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::BadRequest(_) | Error::Codec(_) => AdminStatus::BadRequest,
            Error::SessionNotFound(_) | Error::SessionClosed => AdminStatus::NotFound,
            _ => AdminStatus::InternalError,
        };
        Self::error(status, e.to_string())
    }
}

/// Result of an asynchronous admin call
#[derive(Debug, Clone, Serialize)]
pub struct AdminResponse {
    /// Caller-supplied request id
    pub request_id: String,
    /// Result
    pub result: AdminResult,
}

#[derive(Debug, Default, Deserialize)]
struct KickBody {
    #[serde(default)]
    ban: bool,
}

#[derive(Debug, Default, Deserialize)]
struct LogQuery {
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

fn parse_body<T: DeserializeOwned + Default>(body: &Value) -> Result<T, AdminResult> {
    if body.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(body.clone())
        .map_err(|e| AdminResult::error(AdminStatus::BadRequest, e.to_string()))
}

fn require_body<T: DeserializeOwned>(body: &Value) -> Result<T, AdminResult> {
    serde_json::from_value(body.clone())
        .map_err(|e| AdminResult::error(AdminStatus::BadRequest, e.to_string()))
}

fn parse_id<T: std::str::FromStr>(raw: &str) -> Result<T, AdminResult> {
    raw.parse()
        .map_err(|_| AdminResult::error(AdminStatus::BadRequest, format!("invalid id '{raw}'")))
}

impl Server {
    /// Answer an admin request
    pub async fn call_admin(&self, request: AdminRequest) -> AdminResult {
        let path: Vec<&str> = request.path.split('/').filter(|p| !p.is_empty()).collect();
        debug!(method = ?request.method, path = %request.path, "Admin request");

        let result = match path.as_slice() {
            ["server"] => self.admin_server(request.method),
            ["status"] => self.admin_status(request.method),
            ["sessions"] => self.admin_sessions(request.method).await,
            ["sessions", id] => self.admin_session(request.method, id, &request.body).await,
            ["sessions", id, ctx] => self.admin_user(request.method, id, ctx, &request.body).await,
            ["banlist"] => self.admin_banlist(request.method, &request.body).await,
            ["banlist", id] => self.admin_ban(request.method, id).await,
            ["accounts"] => self.admin_accounts(request.method, &request.body).await,
            ["accounts", id] => self.admin_account(request.method, id, &request.body).await,
            ["log"] => self.admin_log(request.method, &request.body),
            _ => Err(AdminResult::not_found()),
        };
        result.unwrap_or_else(|e| e)
    }

    /// Answer an admin request in the background
    ///
    /// The result is published to [`Server::subscribe_admin`] receivers.
    pub fn call_admin_async(self: &Arc<Self>, request_id: impl Into<String>, request: AdminRequest) {
        let server = Arc::clone(self);
        let request_id = request_id.into();
        tokio::spawn(async move {
            let result = server.call_admin(request).await;
            let _ = server.admin_tx.send(AdminResponse { request_id, result });
        });
    }

    /// Receive results of [`Server::call_admin_async`]
    #[must_use]
    pub fn subscribe_admin(&self) -> broadcast::Receiver<AdminResponse> {
        self.admin_tx.subscribe()
    }

    fn admin_server(&self, method: AdminMethod) -> Result<AdminResult, AdminResult> {
        match method {
            AdminMethod::Get => Ok(AdminResult::from_value(self.config())),
            other => Err(AdminResult::bad_method(other)),
        }
    }

    fn admin_status(&self, method: AdminMethod) -> Result<AdminResult, AdminResult> {
        match method {
            AdminMethod::Get => Ok(AdminResult::from_value(&self.status())),
            other => Err(AdminResult::bad_method(other)),
        }
    }

    async fn admin_sessions(&self, method: AdminMethod) -> Result<AdminResult, AdminResult> {
        match method {
            AdminMethod::Get => Ok(AdminResult::from_value(&self.sessions().await)),
            other => Err(AdminResult::bad_method(other)),
        }
    }

    async fn admin_session(
        &self,
        method: AdminMethod,
        id: &str,
        body: &Value,
    ) -> Result<AdminResult, AdminResult> {
        let handle = self.session(id).ok_or_else(AdminResult::not_found)?;
        match method {
            AdminMethod::Get => Ok(AdminResult::from_value(&handle.info().await?)),
            AdminMethod::Update => {
                let update: SessionUpdate = require_body(body)?;
                Ok(AdminResult::from_value(&handle.update(update).await?))
            }
            AdminMethod::Delete => {
                info!(session = %id, "Terminating session by admin request");
                handle.terminate().await;
                Ok(AdminResult::ok(json!({ "terminated": id })))
            }
            other => Err(AdminResult::bad_method(other)),
        }
    }

    async fn admin_user(
        &self,
        method: AdminMethod,
        id: &str,
        ctx: &str,
        body: &Value,
    ) -> Result<AdminResult, AdminResult> {
        let handle = self.session(id).ok_or_else(AdminResult::not_found)?;
        let ctx: u8 = parse_id(ctx)?;
        match method {
            AdminMethod::Get => {
                let info = handle.info().await?;
                let user = info
                    .users
                    .into_iter()
                    .find(|u| u.context_id == ctx)
                    .ok_or_else(AdminResult::not_found)?;
                Ok(AdminResult::from_value(&user))
            }
            AdminMethod::Delete => {
                let KickBody { ban } = parse_body(body)?;
                handle.kick(ctx, ban).await?;
                Ok(AdminResult::ok(json!({ "kicked": ctx, "banned": ban })))
            }
            other => Err(AdminResult::bad_method(other)),
        }
    }

    async fn admin_banlist(&self, method: AdminMethod, body: &Value) -> Result<AdminResult, AdminResult> {
        match method {
            AdminMethod::Get => Ok(AdminResult::from_value(&self.store().list_bans().await?)),
            AdminMethod::Create => {
                let ban: NewBan = require_body(body)?;
                let entry = self.store().add_ban(&ban).await?;
                self.events()
                    .push(ServerEvent::warn(format!("banned {} ({})", entry.address, entry.reason)));
                Ok(AdminResult::from_value(&entry))
            }
            other => Err(AdminResult::bad_method(other)),
        }
    }

    async fn admin_ban(&self, method: AdminMethod, id: &str) -> Result<AdminResult, AdminResult> {
        let id: i64 = parse_id(id)?;
        match method {
            AdminMethod::Delete => {
                if self.store().delete_ban(id).await? {
                    self.events().push(ServerEvent::info(format!("ban {id} removed")));
                    Ok(AdminResult::ok(json!({ "deleted": id })))
                } else {
                    Err(AdminResult::not_found())
                }
            }
            other => Err(AdminResult::bad_method(other)),
        }
    }

    async fn admin_accounts(&self, method: AdminMethod, body: &Value) -> Result<AdminResult, AdminResult> {
        match method {
            AdminMethod::Get => Ok(AdminResult::from_value(&self.store().list_accounts().await?)),
            AdminMethod::Create => {
                let account: NewAccount = require_body(body)?;
                Ok(AdminResult::from_value(&self.store().add_account(&account).await?))
            }
            other => Err(AdminResult::bad_method(other)),
        }
    }

    async fn admin_account(
        &self,
        method: AdminMethod,
        id: &str,
        body: &Value,
    ) -> Result<AdminResult, AdminResult> {
        let id: i64 = parse_id(id)?;
        match method {
            AdminMethod::Update => {
                let update: AccountUpdate = require_body(body)?;
                let account = self
                    .store()
                    .update_account(id, &update)
                    .await?
                    .ok_or_else(AdminResult::not_found)?;
                Ok(AdminResult::from_value(&account))
            }
            AdminMethod::Delete => {
                if self.store().delete_account(id).await? {
                    Ok(AdminResult::ok(json!({ "deleted": id })))
                } else {
                    Err(AdminResult::not_found())
                }
            }
            other => Err(AdminResult::bad_method(other)),
        }
    }

    fn admin_log(&self, method: AdminMethod, body: &Value) -> Result<AdminResult, AdminResult> {
        match method {
            AdminMethod::Get => {
                let LogQuery { session, limit } = parse_body(body)?;
                let events = self.events().recent(session.as_deref(), limit.unwrap_or(100));
                Ok(AdminResult::from_value(&events))
            }
            other => Err(AdminResult::bad_method(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::shutdown::ShutdownController;
    use crate::store::ServerStore;

    async fn server() -> Arc<Server> {
        let store = ServerStore::in_memory().await.unwrap();
        Server::new(ServerConfig::default(), store, ShutdownController::new())
    }

    #[tokio::test]
    async fn test_status_and_unknown_path() {
        let server = server().await;
        let result = server.call_admin(AdminRequest::get("status")).await;
        assert_eq!(result.status, AdminStatus::Ok);
        assert_eq!(result.body["sessions"], 0);

        let result = server.call_admin(AdminRequest::get("nope")).await;
        assert_eq!(result.status, AdminStatus::NotFound);

        let result = server
            .call_admin(AdminRequest::new(AdminMethod::Delete, "status", Value::Null))
            .await;
        assert_eq!(result.status, AdminStatus::BadRequest);
    }

    #[tokio::test]
    async fn test_banlist_crud() {
        let server = server().await;
        let created = server
            .call_admin(AdminRequest::new(
                AdminMethod::Create,
                "banlist",
                json!({ "address": "10.0.0.0/8", "reason": "spam" }),
            ))
            .await;
        assert_eq!(created.status, AdminStatus::Ok);
        let id = created.body["id"].as_i64().unwrap();

        let list = server.call_admin(AdminRequest::get("banlist")).await;
        assert_eq!(list.body.as_array().unwrap().len(), 1);

        let deleted = server
            .call_admin(AdminRequest::new(AdminMethod::Delete, format!("banlist/{id}"), Value::Null))
            .await;
        assert_eq!(deleted.status, AdminStatus::Ok);

        let again = server
            .call_admin(AdminRequest::new(AdminMethod::Delete, format!("banlist/{id}"), Value::Null))
            .await;
        assert_eq!(again.status, AdminStatus::NotFound);

        let log = server.call_admin(AdminRequest::get("log")).await;
        assert!(log.body[1]["message"].as_str().unwrap().starts_with("banned 10.0.0.0/8"));
    }

    #[tokio::test]
    async fn test_bad_body() {
        let server = server().await;
        let result = server
            .call_admin(AdminRequest::new(AdminMethod::Create, "banlist", json!({ "reason": 1 })))
            .await;
        assert_eq!(result.status, AdminStatus::BadRequest);

        let result = server
            .call_admin(AdminRequest::new(
                AdminMethod::Create,
                "banlist",
                json!({ "address": "not-an-ip" }),
            ))
            .await;
        assert_eq!(result.status, AdminStatus::BadRequest);
    }

    #[tokio::test]
    async fn test_accounts() {
        let server = server().await;
        let created = server
            .call_admin(AdminRequest::new(
                AdminMethod::Create,
                "accounts",
                json!({ "username": "mod", "password": "pw", "moderator": true }),
            ))
            .await;
        assert_eq!(created.status, AdminStatus::Ok);
        assert!(created.body.get("password_hash").is_none());
        let id = created.body["id"].as_i64().unwrap();

        let updated = server
            .call_admin(AdminRequest::new(
                AdminMethod::Update,
                format!("accounts/{id}"),
                json!({ "locked": true }),
            ))
            .await;
        assert_eq!(updated.body["locked"], true);
    }

    #[tokio::test]
    async fn test_async_call_tagged_by_request_id() {
        let server = server().await;
        let mut results = server.subscribe_admin();
        server.call_admin_async("req-7", AdminRequest::get("sessions"));

        let response = results.recv().await.unwrap();
        assert_eq!(response.request_id, "req-7");
        assert_eq!(response.result.status, AdminStatus::Ok);
        assert_eq!(response.result.body, json!([]));
    }

    #[tokio::test]
    async fn test_missing_session() {
        let server = server().await;
        let result = server.call_admin(AdminRequest::get("sessions/none")).await;
        assert_eq!(result.status, AdminStatus::NotFound);
    }
}
