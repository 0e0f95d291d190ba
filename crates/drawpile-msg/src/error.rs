//! Error types for drawpile-msg
//!
//! Binary decoding and text parsing have separate error types. Both map
//! onto the `malformed` rejection code that is reported back to clients.

use thiserror::Error;

/// Binary codec error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Fewer bytes than the header or the declared payload length
    #[error("truncated message: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required to finish the frame
        needed: usize,
        /// Bytes actually available
        available: usize,
    },

    /// More bytes than the header declared
    #[error("trailing bytes: frame is {expected} bytes, got {actual}")]
    TrailingBytes {
        /// Frame length declared by the header
        expected: usize,
        /// Bytes supplied
        actual: usize,
    },

    /// Type byte outside the command taxonomy
    #[error("unknown message type {0}")]
    UnknownType(u8),

    /// Payload does not match the layout of its type
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload {
        /// Text name of the message type
        kind: &'static str,
        /// What was wrong
        reason: String,
    },

    /// Encoded payload would not fit the 16-bit length field
    #[error("{kind} payload too long: {len} bytes")]
    PayloadTooLong {
        /// Text name of the message type
        kind: &'static str,
        /// Payload length that was attempted
        len: usize,
    },
}

impl CodecError {
    /// Create an invalid payload error
    #[must_use]
    pub fn invalid(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            kind,
            reason: reason.into(),
        }
    }

    /// Get error code for rejection replies
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::PayloadTooLong { .. } => "payload_too_long",
            Self::Truncated { .. }
            | Self::TrailingBytes { .. }
            | Self::UnknownType(_)
            | Self::InvalidPayload { .. } => "malformed",
        }
    }
}

/// Text form parse error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TextError {
    /// The message line could not be split into context id and name
    #[error("line {line}: malformed message line")]
    MalformedLine {
        /// 1-based line number
        line: usize,
    },

    /// Unknown message name
    #[error("line {line}: unknown message type '{name}'")]
    UnknownName {
        /// 1-based line number
        line: usize,
        /// The offending name
        name: String,
    },

    /// A required field is absent
    #[error("line {line}: missing field '{key}'")]
    MissingField {
        /// 1-based line number
        line: usize,
        /// Field name
        key: String,
    },

    /// A field value did not parse
    #[error("line {line}: bad value for '{key}': {reason}")]
    BadValue {
        /// 1-based line number
        line: usize,
        /// Field name
        key: String,
        /// What was wrong
        reason: String,
    },

    /// A multiline block was never closed
    #[error("line {line}: unterminated block")]
    UnterminatedBlock {
        /// 1-based line number where the block started
        line: usize,
    },

    /// The parsed message does not encode
    #[error("line {line}: {source}")]
    Codec {
        /// 1-based line number
        line: usize,
        /// Underlying codec error
        source: CodecError,
    },
}

impl TextError {
    /// Get error code for rejection replies
    #[must_use]
    pub fn code(&self) -> &'static str {
        "malformed"
    }
}

/// Session URL error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    /// Not a URL at all
    #[error("invalid session URL: {0}")]
    Invalid(String),

    /// Scheme other than `drawpile`
    #[error("unsupported scheme '{0}'")]
    WrongScheme(String),

    /// No host part
    #[error("session URL has no host")]
    MissingHost,
}

impl From<url::ParseError> for UrlError {
    fn from(err: url::ParseError) -> Self {
        Self::Invalid(err.to_string())
    }
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CodecError::UnknownType(9).code(), "malformed");
        assert_eq!(
            CodecError::Truncated {
                needed: 4,
                available: 2
            }
            .code(),
            "malformed"
        );
        assert_eq!(
            CodecError::PayloadTooLong {
                kind: "putimage",
                len: 70000
            }
            .code(),
            "payload_too_long"
        );
    }

    #[test]
    fn test_error_display() {
        let err = CodecError::invalid("layerorder", "odd length");
        assert_eq!(err.to_string(), "invalid layerorder payload: odd length");

        let err = TextError::MissingField {
            line: 3,
            key: "id".to_string(),
        };
        assert!(err.to_string().contains("missing field 'id'"));
    }
}
