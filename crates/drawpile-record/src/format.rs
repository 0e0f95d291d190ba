//! Recording file format
//!
//! Binary recordings start with [`MAGIC`], a big-endian `u16` header length
//! and a JSON [`RecordingHeader`], followed by binary message frames. Text
//! recordings carry the same header as `!key=value` lines, a blank line, and
//! the text form of each message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{RecordError, Result};

/// Magic bytes at the start of a binary recording
pub const MAGIC: &[u8; 6] = b"DPREC\0";

/// Current recording format version
pub const FORMAT_VERSION: u32 = 1;

/// Recording flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingFormat {
    /// Binary wire frames
    #[default]
    Binary,
    /// Human-readable text form
    Text,
}

impl RecordingFormat {
    /// File extension, without the dot
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Binary => "dprec",
            Self::Text => "dptxt",
        }
    }
}

/// Recording metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingHeader {
    /// Format version
    pub version: u32,
    /// Session id or alias the recording belongs to
    pub session: String,
    /// When recording started
    pub started_at: DateTime<Utc>,
}

impl RecordingHeader {
    /// Header for a recording starting now
    #[must_use]
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            version: FORMAT_VERSION,
            session: session.into(),
            started_at: Utc::now(),
        }
    }

    /// Header as text recording `(key, value)` pairs
    #[must_use]
    pub fn text_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("version", self.version.to_string()),
            ("session", self.session.clone()),
            ("started_at", self.started_at.to_rfc3339()),
        ]
    }

    /// Rebuild a header from text recording fields
    pub fn from_text_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            fields
                .get(key)
                .ok_or_else(|| RecordError::BadHeader(format!("missing '{key}'")))
        };
        Ok(Self {
            version: get("version")?
                .parse()
                .map_err(|_| RecordError::BadHeader("bad version".to_string()))?,
            session: get("session")?.clone(),
            started_at: DateTime::parse_from_rfc3339(get("started_at")?)
                .map_err(|e| RecordError::BadHeader(e.to_string()))?
                .with_timezone(&Utc),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_fields_roundtrip() {
        let header = RecordingHeader::new("sketch");
        let fields: BTreeMap<String, String> = header
            .text_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(RecordingHeader::from_text_fields(&fields).unwrap(), header);
    }

    #[test]
    fn test_missing_field() {
        let fields = BTreeMap::new();
        assert!(matches!(
            RecordingHeader::from_text_fields(&fields),
            Err(RecordError::BadHeader(_))
        ));
    }

    #[test]
    fn test_extensions() {
        assert_eq!(RecordingFormat::Binary.extension(), "dprec");
        assert_eq!(RecordingFormat::Text.extension(), "dptxt");
    }
}
