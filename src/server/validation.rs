//! Configuration validation
//!
//! Rejects settings the server cannot run with and warns about risky ones.

use super::config::AppConfig;
use anyhow::{bail, Result};
use tracing::warn;

/// Validate configuration before startup
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let server = &config.server;
    if server.max_users == 0 {
        bail!("server.max_users must be at least 1");
    }
    if server.max_sessions == 0 {
        bail!("server.max_sessions must be at least 1");
    }
    if server.queue_capacity == 0 {
        bail!("server.queue_capacity must be at least 1");
    }
    if config.admin.enabled() && server.port == config.admin.port && server.host == config.admin.host {
        bail!("admin API and session server cannot share {}", config.admin.listen_addr());
    }

    if config.admin.enabled() && config.admin.host != "127.0.0.1" && config.admin.host != "localhost" {
        warn!(
            "SECURITY WARNING: Admin API is exposed on {} without authentication. \
             Consider binding it to 127.0.0.1.",
            config.admin.host
        );
    }
    if config.database.path.is_none() {
        warn!("No database configured; bans and accounts will not persist");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_zero_limits() {
        let mut config = AppConfig::default();
        config.server.max_users = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_shared_port() {
        let mut config = AppConfig::default();
        config.server.host = config.admin.host.clone();
        config.server.port = config.admin.port;
        assert!(validate_config(&config).is_err());

        config.admin.port = 0;
        assert!(validate_config(&config).is_ok());
    }
}
