//! Error types for drawpile-server

use drawpile_canvas::{AclError, CanvasError};
use drawpile_msg::CodecError;
use drawpile_record::RecordError;
use thiserror::Error;

/// Server error type
#[derive(Debug, Error)]
pub enum Error {
    /// Socket or file I/O failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed wire data
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Command refused by access control
    #[error("permission denied: {0}")]
    Acl(#[from] AclError),

    /// Command conflicts with the current canvas
    #[error("conflict: {0}")]
    Canvas(#[from] CanvasError),

    /// Recording could not be read or written
    #[error("recording error: {0}")]
    Record(#[from] RecordError),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Login refused
    #[error("login rejected ({code}): {message}")]
    Rejected {
        /// Machine readable reason
        code: &'static str,
        /// Human readable explanation
        message: String,
    },

    /// Session does not exist
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Session actor has stopped
    #[error("session closed")]
    SessionClosed,

    /// Invalid request
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a login rejection
    pub fn rejected(code: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }

    /// Error code reported to clients
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Codec(e) => e.code(),
            Self::Acl(e) => e.code(),
            Self::Canvas(e) => e.code(),
            Self::Rejected { code, .. } => code,
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionClosed => "session_closed",
            Self::BadRequest(_) => "malformed",
            Self::Io(_) | Self::Record(_) | Self::Database(_) | Self::Internal(_) => "internal",
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
