//! Error types for drawpile-record

use drawpile_msg::{CodecError, TextError};
use thiserror::Error;

/// Recording error
#[derive(Debug, Error)]
pub enum RecordError {
    /// File system error
    #[error("recording I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input is neither a binary nor a text recording
    #[error("not a recording")]
    BadMagic,

    /// Header could not be read
    #[error("invalid recording header: {0}")]
    BadHeader(String),

    /// A complete binary frame failed to decode
    #[error("corrupt recording: {0}")]
    Codec(#[from] CodecError),

    /// Text recording failed to parse
    #[error("corrupt text recording: {0}")]
    Text(#[from] TextError),

    /// The background writer has stopped
    #[error("recording writer closed")]
    Closed,
}

impl From<serde_json::Error> for RecordError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadHeader(err.to_string())
    }
}

/// Result type alias for recording operations
pub type Result<T> = std::result::Result<T, RecordError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_conversions() {
        let err: RecordError = CodecError::UnknownType(5).into();
        assert!(err.to_string().contains("unknown message type 5"));

        let json: std::result::Result<i32, serde_json::Error> = serde_json::from_str("{");
        let err: RecordError = json.unwrap_err().into();
        assert!(matches!(err, RecordError::BadHeader(_)));
    }
}
