//! Recording writers
//!
//! [`RecordingWriter`] writes a recording to any `std::io::Write`.
//! [`BackgroundRecorder`] moves the writing onto a blocking task so the
//! caller only pays for a channel send; a write failure stops the task and
//! every later `write` returns [`RecordError::Closed`].

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use drawpile_msg::{encode, write_header, write_message, Message};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{RecordError, Result};
use crate::format::{RecordingFormat, RecordingHeader, MAGIC};

/// Destination for accepted messages
#[cfg_attr(test, mockall::automock)]
pub trait RecordingSink: Send {
    /// Append one message
    fn write(&mut self, message: &Message) -> Result<()>;

    /// Push buffered data to storage
    fn flush(&mut self) -> Result<()>;
}

/// Synchronous recording writer
pub struct RecordingWriter<W: Write> {
    out: W,
    format: RecordingFormat,
}

impl<W: Write> RecordingWriter<W> {
    /// Start a recording by writing its header
    pub fn new(mut out: W, format: RecordingFormat, header: &RecordingHeader) -> Result<Self> {
        match format {
            RecordingFormat::Binary => {
                let json = serde_json::to_vec(header)?;
                let len = u16::try_from(json.len())
                    .map_err(|_| RecordError::BadHeader("header too long".to_string()))?;
                out.write_all(MAGIC)?;
                out.write_all(&len.to_be_bytes())?;
                out.write_all(&json)?;
            }
            RecordingFormat::Text => {
                let fields = header.text_fields();
                let text = write_header(fields.iter().map(|(k, v)| (*k, v.as_str())));
                out.write_all(text.as_bytes())?;
            }
        }
        Ok(Self { out, format })
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> RecordingSink for RecordingWriter<W> {
    fn write(&mut self, message: &Message) -> Result<()> {
        match self.format {
            RecordingFormat::Binary => self.out.write_all(&encode(message)?)?,
            RecordingFormat::Text => self.out.write_all(write_message(message).as_bytes())?,
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Create a recording file named after the session and start time
pub fn create_file(
    dir: &Path,
    format: RecordingFormat,
    header: &RecordingHeader,
) -> Result<(PathBuf, RecordingWriter<BufWriter<File>>)> {
    std::fs::create_dir_all(dir)?;
    let name = format!(
        "{}-{}.{}",
        header.session,
        header.started_at.format("%Y%m%d-%H%M%S"),
        format.extension()
    );
    let path = dir.join(name);
    let file = File::create(&path)?;
    let writer = RecordingWriter::new(BufWriter::new(file), format, header)?;
    Ok((path, writer))
}

/// Sink that writes on a background blocking task
pub struct BackgroundRecorder {
    tx: Option<mpsc::UnboundedSender<Message>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundRecorder {
    /// Spawn the writer task; must be called inside a tokio runtime
    pub fn spawn<S>(mut sink: S) -> Self
    where
        S: RecordingSink + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let handle = tokio::task::spawn_blocking(move || {
            while let Some(message) = rx.blocking_recv() {
                if let Err(e) = sink.write(&message) {
                    error!(error = %e, "recording write failed, stopping recorder");
                    return;
                }
            }
            if let Err(e) = sink.flush() {
                error!(error = %e, "recording flush failed");
            }
            debug!("recorder finished");
        });
        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    /// Stop accepting messages and wait for the writer to drain
    pub async fn finish(mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl RecordingSink for BackgroundRecorder {
    fn write(&mut self, message: &Message) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(RecordError::Closed)?;
        tx.send(message.clone()).map_err(|_| RecordError::Closed)
    }

    fn flush(&mut self) -> Result<()> {
        match &self.tx {
            Some(tx) if !tx.is_closed() => Ok(()),
            _ => Err(RecordError::Closed),
        }
    }
}
