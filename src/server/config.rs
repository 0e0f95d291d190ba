//! Application configuration types

use std::path::PathBuf;

use drawpile_server::ServerConfig;
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Session server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// HTTP admin API
    #[serde(default)]
    pub admin: AdminApiConfig,
    /// Ban list and account storage
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// HTTP admin API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminApiConfig {
    pub host: String,
    /// 0 disables the admin API
    pub port: u16,
}

impl Default for AdminApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 27780,
        }
    }
}

impl AdminApiConfig {
    pub fn enabled(&self) -> bool {
        self.port != 0
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// SQLite settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file, in-memory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}
