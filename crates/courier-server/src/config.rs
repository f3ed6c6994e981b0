//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket (axum) server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Explicit SQLite database path. When unset, the platform data
    /// directory is used.
    /// Env: `DB_PATH`
    pub db_path: Option<PathBuf>,

    /// Scheduled-release sweeper tick interval in seconds.
    /// Env: `RELEASE_INTERVAL_SECS`
    /// Default: `30`
    pub release_interval_secs: u64,

    /// Retention sweeper tick interval in seconds.
    /// Env: `RETENTION_INTERVAL_SECS`
    /// Default: `3600`
    pub retention_interval_secs: u64,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Courier"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            db_path: None,
            release_interval_secs: 30,
            retention_interval_secs: 3600,
            instance_name: "Courier".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Ok(val) = std::env::var("RELEASE_INTERVAL_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.release_interval_secs = n.max(1);
            }
        }

        if let Ok(val) = std::env::var("RETENTION_INTERVAL_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.retention_interval_secs = n.max(1);
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.release_interval_secs, 30);
        assert_eq!(config.retention_interval_secs, 3600);
        assert!(config.db_path.is_none());
    }
}
