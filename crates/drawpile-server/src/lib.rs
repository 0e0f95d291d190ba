//! Drawpile Server - collaborative drawing session server
//!
//! This crate hosts shared drawing sessions over TCP:
//! - Codec: length-prefixed message framing for `tokio_util::codec`
//! - Log: the session's ordered message history and catch-up generation
//! - Session: one actor task per session, owning canvas state and clients
//! - Server: listener, login handshake and the session registry
//! - Store: SQLite ban list and user accounts
//! - Admin: method/path administrative requests with JSON bodies
//! - Events: bounded in-memory server event log
//! - Shutdown: graceful shutdown with connection draining

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod log;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod store;

// Re-export main types
pub use admin::{AdminMethod, AdminRequest, AdminResponse, AdminResult, AdminStatus};
pub use codec::MessageCodec;
pub use config::ServerConfig;
pub use error::{Error, Result};
pub use events::{EventLevel, EventLog, ServerEvent};
pub use log::{CatchUp, PresentUser, SeqNum, SessionLog};
pub use server::{is_valid_session_id, Server, ServerStatus};
pub use session::{
    JoinRequest, Joined, Outbound, Session, SessionBan, SessionHandle, SessionInfo, SessionSettings,
    SessionUpdate, UserInfo,
};
pub use shutdown::{wait_for_shutdown_signal, ConnectionGuard, ShutdownController, ShutdownPhase};
pub use store::{
    hash_password, verify_password, Account, AccountCheck, AccountUpdate, BanEntry, IpRange, NewAccount,
    NewBan, ServerStore,
};
