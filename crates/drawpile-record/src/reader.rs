//! Recording reader
//!
//! Recordings are written incrementally and may end mid-message when the
//! server stopped abruptly. The reader keeps every complete message and
//! reports the cut-off through [`Recording::truncated`].

use std::path::Path;

use drawpile_msg::{decode_stream, parse_header, parse_text, Message, TextError};

use crate::error::{RecordError, Result};
use crate::format::{RecordingFormat, RecordingHeader, MAGIC};

/// A loaded recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    /// Metadata
    pub header: RecordingHeader,
    /// Binary or text
    pub format: RecordingFormat,
    /// Every complete message, in order
    pub messages: Vec<Message>,
    /// Whether an incomplete trailing message was dropped
    pub truncated: bool,
}

/// Read a recording file
pub async fn read_file(path: &Path) -> Result<Recording> {
    let bytes = tokio::fs::read(path).await?;
    parse_recording(&bytes)
}

/// Parse a recording held in memory
pub fn parse_recording(bytes: &[u8]) -> Result<Recording> {
    if bytes.starts_with(MAGIC) {
        parse_binary(&bytes[MAGIC.len()..])
    } else if bytes.starts_with(b"!") {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| RecordError::BadHeader("text recording is not UTF-8".to_string()))?;
        parse_text_recording(text)
    } else {
        Err(RecordError::BadMagic)
    }
}

fn parse_binary(bytes: &[u8]) -> Result<Recording> {
    if bytes.len() < 2 {
        return Err(RecordError::BadHeader("truncated header".to_string()));
    }
    let len = usize::from(u16::from_be_bytes([bytes[0], bytes[1]]));
    let json = bytes
        .get(2..2 + len)
        .ok_or_else(|| RecordError::BadHeader("truncated header".to_string()))?;
    let header: RecordingHeader = serde_json::from_slice(json)?;

    let body = &bytes[2 + len..];
    let (messages, consumed) = decode_stream(body)?;
    Ok(Recording {
        header,
        format: RecordingFormat::Binary,
        messages,
        truncated: consumed < body.len(),
    })
}

fn parse_text_recording(text: &str) -> Result<Recording> {
    let header = RecordingHeader::from_text_fields(&parse_header(text))?;

    let mut body = text;
    let mut truncated = false;
    if !body.ends_with('\n') {
        body = body.rfind('\n').map_or("", |end| &body[..=end]);
        truncated = true;
    }

    let messages = match parse_text(body) {
        Ok(messages) => messages,
        Err(TextError::UnterminatedBlock { line }) => {
            // an open block can only be the last message
            let complete: String = body
                .split_inclusive('\n')
                .take(line - 1)
                .collect();
            truncated = true;
            parse_text(&complete)?
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Recording {
        header,
        format: RecordingFormat::Text,
        messages,
        truncated,
    })
}
