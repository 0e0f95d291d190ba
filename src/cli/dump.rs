//! Recording dump command

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use drawpile_msg::{write_header, write_messages};
use drawpile_record::{read_file, Recording};
use tracing::warn;

/// Arguments for `dump`
#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Recording file (binary or text)
    pub path: PathBuf,
}

/// Render a recording in the text recording form
pub fn render(recording: &Recording) -> String {
    let fields = recording.header.text_fields();
    let mut out = write_header(fields.iter().map(|(k, v)| (*k, v.as_str())));
    out.push_str(&write_messages(&recording.messages));
    out
}

/// Print a recording to stdout
pub async fn run(args: DumpArgs) -> Result<()> {
    let recording = read_file(&args.path)
        .await
        .with_context(|| format!("Failed to read recording {}", args.path.display()))?;
    if recording.truncated {
        warn!(path = %args.path.display(), "Recording ends with an incomplete message");
    }

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(render(&recording).as_bytes())
        .context("Failed to write output")?;
    Ok(())
}
