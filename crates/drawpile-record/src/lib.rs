//! Drawpile Record - session recordings
//!
//! - Format: file magic, header and the binary/text flavours
//! - Writer: `RecordingSink` trait, synchronous writer and background recorder
//! - Reader: loads binary and text recordings, tolerating a cut-off tail

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod format;
pub mod reader;
pub mod writer;

// Re-export main types
pub use error::{RecordError, Result};
pub use format::{RecordingFormat, RecordingHeader, FORMAT_VERSION, MAGIC};
pub use reader::{parse_recording, read_file, Recording};
pub use writer::{create_file, BackgroundRecorder, RecordingSink, RecordingWriter};
