//! Server configuration.
//!
//! Configuration is loaded from a TOML file (`chat_hub.toml` by default,
//! or the path given on the command line). Missing fields fall back to
//! defaults; `CHAT_HUB_HOST` and `CHAT_HUB_PORT` override the defaults
//! for the listen address.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::{ClientConfig, MIN_HEARTBEAT_INTERVAL};
use crate::hub::HubConfig;

/// Default config file, looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "chat_hub.toml";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Rooms created at startup.
    #[serde(default = "default_rooms")]
    pub rooms: Vec<String>,

    /// Hub settings.
    #[serde(default)]
    pub hub: HubSection,

    /// Per-connection settings.
    #[serde(default)]
    pub client: ClientSection,
}

/// `[hub]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSection {
    /// Command queue capacity of each room.
    #[serde(default = "default_room_queue_capacity")]
    pub room_queue_capacity: usize,

    /// Grace period for room teardown on shutdown, in milliseconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

/// `[client]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    /// Mailbox capacity per connection.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
}

fn default_host() -> String {
    std::env::var("CHAT_HUB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("CHAT_HUB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_rooms() -> Vec<String> {
    vec!["lobby".to_string()]
}

fn default_room_queue_capacity() -> usize {
    256
}

fn default_shutdown_grace() -> u64 {
    5_000
}

fn default_mailbox_capacity() -> usize {
    32
}

fn default_heartbeat_interval() -> u64 {
    54_000 // 54 seconds
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            rooms: default_rooms(),
            hub: HubSection::default(),
            client: ClientSection::default(),
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            room_queue_capacity: default_room_queue_capacity(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            heartbeat_interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or the default file, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file is missing, or if any
    /// config file that exists cannot be parsed.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            room_queue_capacity: self.hub.room_queue_capacity.max(1),
            shutdown_grace: Duration::from_millis(self.hub.shutdown_grace_ms),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut mailbox_capacity = self.client.mailbox_capacity;
        if mailbox_capacity == 0 {
            warn!("client.mailbox_capacity = 0 is not supported, using 1");
            mailbox_capacity = 1;
        }
        let mut heartbeat_interval_ms = self.client.heartbeat_interval_ms;
        if heartbeat_interval_ms == 0 {
            warn!(
                "client.heartbeat_interval_ms = 0 is not supported, using {}",
                MIN_HEARTBEAT_INTERVAL.as_millis()
            );
            heartbeat_interval_ms = MIN_HEARTBEAT_INTERVAL.as_millis() as u64;
        }
        ClientConfig {
            mailbox_capacity,
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.rooms, vec!["lobby".to_string()]);
        assert_eq!(config.hub.room_queue_capacity, 256);
        assert_eq!(config.client.mailbox_capacity, 32);
        assert_eq!(
            config.client_config().heartbeat_interval,
            Duration::from_secs(54)
        );
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000
            rooms = ["general", "random"]

            [client]
            mailbox_capacity = 0
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.rooms.len(), 2);
        assert_eq!(config.hub.shutdown_grace_ms, 5_000);
        assert_eq!(config.client_config().mailbox_capacity, 1);
        assert_eq!(config.bind_addr().unwrap().port(), 9000);
    }

    #[test]
    fn test_zero_heartbeat_is_raised() {
        let config: Config = toml::from_str("[client]\nheartbeat_interval_ms = 0").unwrap();
        assert_eq!(
            config.client_config().heartbeat_interval,
            MIN_HEARTBEAT_INTERVAL
        );
    }

    #[test]
    fn test_invalid_bind_addr() {
        let config = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(Config::load(Some("/nonexistent/chat_hub.toml")).is_err());
    }
}
