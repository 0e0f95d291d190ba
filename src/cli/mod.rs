//! CLI module for drawpile-srv
//!
//! Provides commands:
//! - `serve`: Run the session server, with command-line overrides
//! - `dump`: Print a recording in text form

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use drawpile_record::RecordingFormat;
use tracing::info;

use crate::server::config::AppConfig;

pub mod dump;

/// Drawpile session server CLI
#[derive(Parser, Debug)]
#[command(name = "drawpile-srv")]
#[command(about = "Collaborative drawing session server")]
#[command(version)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server
    Serve(ServeArgs),
    /// Print a recording as text
    Dump(dump::DumpArgs),
}

/// Overrides applied on top of the loaded configuration
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Listening address
    #[arg(long)]
    pub host: Option<String>,
    /// Listening port
    #[arg(short, long)]
    pub port: Option<u16>,
    /// HTTP admin API port, 0 disables it
    #[arg(long)]
    pub admin_port: Option<u16>,
    /// SQLite database for bans and accounts
    #[arg(long)]
    pub database: Option<PathBuf>,
    /// Record sessions into this directory
    #[arg(long)]
    pub record_dir: Option<PathBuf>,
    /// Write text recordings instead of binary
    #[arg(long)]
    pub text_recordings: bool,
    /// Directory of session templates
    #[arg(long)]
    pub template_dir: Option<PathBuf>,
    /// Stop once the last session closes
    #[arg(long)]
    pub auto_stop: bool,
}

impl ServeArgs {
    /// Apply the overrides that were given
    pub fn apply(self, config: &mut AppConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(port) = self.admin_port {
            config.admin.port = port;
        }
        if let Some(path) = self.database {
            config.database.path = Some(path);
        }
        if let Some(dir) = self.record_dir {
            config.server.recording_dir = Some(dir);
        }
        if self.text_recordings {
            config.server.recording_format = RecordingFormat::Text;
        }
        if let Some(dir) = self.template_dir {
            config.server.template_dir = Some(dir);
        }
        if self.auto_stop {
            config.server.auto_stop = true;
        }
    }
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve(args)) => {
            info!("Starting Drawpile server v{}", env!("CARGO_PKG_VERSION"));
            let mut config = crate::server::load_config()?;
            args.apply(&mut config);
            crate::server::run(config).await
        }
        Some(Commands::Dump(args)) => dump::run(args).await,
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
