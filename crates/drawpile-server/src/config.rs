//! Server settings

use std::path::PathBuf;

use drawpile_msg::DEFAULT_PORT;
use drawpile_record::RecordingFormat;
use serde::{Deserialize, Serialize};

/// Session server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening address
    pub host: String,
    /// Listening port, 0 picks a free one
    pub port: u16,
    /// Directory for session recordings, none disables recording
    pub recording_dir: Option<PathBuf>,
    /// Recording flavour
    pub recording_format: RecordingFormat,
    /// Directory searched for `<session>.dprec` / `<session>.dptxt` templates
    pub template_dir: Option<PathBuf>,
    /// Stop the server after the last session closes
    pub auto_stop: bool,
    /// Whether clients may create new sessions
    pub allow_session_creation: bool,
    /// Largest number of concurrent sessions
    pub max_sessions: usize,
    /// Largest number of users in one session
    pub max_users: usize,
    /// Outbound queue length per client
    pub queue_capacity: usize,
    /// Malformed messages tolerated before a client is dropped
    pub max_decode_errors: u32,
    /// Seconds a new connection has to send its login
    pub login_timeout_secs: u64,
    /// Seconds one write to a client may block before it is disconnected
    pub write_timeout_secs: u64,
    /// Seconds allowed for clients to disconnect on shutdown
    pub drain_timeout_secs: u64,
    /// Retained server log events
    pub event_log_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            recording_dir: None,
            recording_format: RecordingFormat::Binary,
            template_dir: None,
            auto_stop: false,
            allow_session_creation: true,
            max_sessions: 20,
            max_users: 32,
            queue_capacity: 4096,
            max_decode_errors: 10,
            login_timeout_secs: 30,
            write_timeout_secs: 30,
            drain_timeout_secs: 10,
            event_log_capacity: 1000,
        }
    }
}

impl ServerConfig {
    /// `host:port` listen address
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
