//! Configuration management for the Loxone WebSocket client

pub mod credentials;

use crate::error::{LoxoneError, Result};
use credentials::{create_credentials, LoxoneCredentials};
use serde::{Deserialize, Serialize};
use std::{env, path::Path, time::Duration};
use url::Url;

/// Path of the Miniserver WebSocket endpoint
pub const WEBSOCKET_PATH: &str = "/ws/rfc6455";

/// WebSocket sub-protocol token required by the Miniserver
pub const WEBSOCKET_PROTOCOL: &str = "remotecontrol";

/// The Miniserver drops idle sessions after roughly five minutes
pub const SERVER_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientConfig {
    /// Loxone Miniserver configuration
    #[serde(default)]
    pub loxone: LoxoneConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Loxone Miniserver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoxoneConfig {
    /// Miniserver host name or IP address
    pub host: String,

    /// Miniserver HTTP/WebSocket port
    pub port: u16,

    /// Username for authentication, paired with a password by [`LoxoneConfig::credentials`]
    pub username: String,

    /// Transport connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// WebSocket configuration
    pub websocket: WebSocketConfig,
}

/// WebSocket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Connection keep-alive interval, must stay below the server idle timeout
    #[serde(with = "humantime_serde")]
    pub keepalive_interval: Duration,

    /// Maximum accepted binary message size in KB
    pub max_binary_message_kb: usize,

    /// Maximum accepted text message size in KB
    pub max_text_message_kb: usize,

    /// Capacity of the event queue shared with the consumer
    pub event_queue_capacity: usize,

    /// How long `send_action_and_wait` waits for the Miniserver response
    #[serde(with = "humantime_serde")]
    pub response_timeout: Duration,

    /// How long a client-initiated close waits for the server to confirm
    #[serde(with = "humantime_serde")]
    pub close_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable structured JSON logging
    pub json_format: bool,

    /// Log to file (path)
    pub file: Option<String>,
}

impl Default for LoxoneConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 80,
            username: "admin".to_string(),
            connect_timeout: Duration::from_secs(10),
            websocket: WebSocketConfig::default(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(240),
            max_binary_message_kb: 3072,
            max_text_message_kb: 512,
            event_queue_capacity: 1024,
            response_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file: None,
        }
    }
}

impl WebSocketConfig {
    /// Maximum binary message size in bytes
    pub fn max_binary_message_bytes(&self) -> usize {
        self.max_binary_message_kb.saturating_mul(1024)
    }

    /// Maximum text message size in bytes
    pub fn max_text_message_bytes(&self) -> usize {
        self.max_text_message_kb.saturating_mul(1024)
    }
}

impl LoxoneConfig {
    /// Credentials for the configured user; the password is never part of the config
    pub fn credentials(&self, password: impl Into<String>) -> LoxoneCredentials {
        create_credentials(self.username.clone(), password)
    }

    /// Build the WebSocket endpoint URL for this Miniserver
    pub fn websocket_url(&self) -> Result<Url> {
        let raw = format!("ws://{}:{}{}", self.host, self.port, WEBSOCKET_PATH);
        Url::parse(&raw)
            .map_err(|e| LoxoneError::config(format!("Invalid Miniserver address {raw}: {e}")))
    }

    /// Validate the connection settings
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(LoxoneError::config("Miniserver host must not be empty"));
        }
        if self.port == 0 {
            return Err(LoxoneError::config("Miniserver port must not be 0"));
        }

        let keepalive = self.websocket.keepalive_interval;
        if keepalive.is_zero() {
            return Err(LoxoneError::config("Keep-alive interval must not be zero"));
        }
        if keepalive >= SERVER_IDLE_TIMEOUT {
            return Err(LoxoneError::config(format!(
                "Keep-alive interval {}s must be below the Miniserver idle timeout of {}s",
                keepalive.as_secs(),
                SERVER_IDLE_TIMEOUT.as_secs()
            )));
        }

        if self.websocket.max_binary_message_kb == 0 || self.websocket.max_text_message_kb == 0 {
            return Err(LoxoneError::config("Maximum message sizes must not be zero"));
        }
        if self.websocket.event_queue_capacity == 0 {
            return Err(LoxoneError::config("Event queue capacity must not be zero"));
        }

        self.websocket_url().map(|_| ())
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            LoxoneError::config(format!("Invalid config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override settings from environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = env::var("LOXONE_HOST") {
            // Accept "http://host:port" as well as a bare host
            let stripped = host
                .trim_start_matches("http://")
                .trim_start_matches("ws://")
                .trim_end_matches('/');
            match stripped.rsplit_once(':') {
                Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
                    self.loxone.host = host.to_string();
                    self.loxone.port = port
                        .parse()
                        .map_err(|e| LoxoneError::config(format!("Invalid LOXONE_HOST: {e}")))?;
                }
                _ => self.loxone.host = stripped.to_string(),
            }
        }

        if let Ok(port) = env::var("LOXONE_PORT") {
            self.loxone.port = port
                .parse()
                .map_err(|e| LoxoneError::config(format!("Invalid LOXONE_PORT: {}", e)))?;
        }

        if let Ok(username) = env::var("LOXONE_USER") {
            self.loxone.username = username;
        }

        if let Ok(secs) = env::var("LOXONE_KEEPALIVE_SECS") {
            self.loxone.websocket.keepalive_interval = Duration::from_secs(secs.parse().map_err(
                |e| LoxoneError::config(format!("Invalid LOXONE_KEEPALIVE_SECS: {}", e)),
            )?);
        }

        if let Ok(kb) = env::var("LOXONE_MAX_BINARY_MSG_KB") {
            self.loxone.websocket.max_binary_message_kb = kb.parse().map_err(|e| {
                LoxoneError::config(format!("Invalid LOXONE_MAX_BINARY_MSG_KB: {}", e))
            })?;
        }

        if let Ok(kb) = env::var("LOXONE_MAX_TEXT_MSG_KB") {
            self.loxone.websocket.max_text_message_kb = kb.parse().map_err(|e| {
                LoxoneError::config(format!("Invalid LOXONE_MAX_TEXT_MSG_KB: {}", e))
            })?;
        }

        if let Ok(level) = env::var("RUST_LOG") {
            self.logging.level = level;
        }

        if let Ok(file) = env::var("LOXONE_LOG_FILE") {
            self.logging.file = Some(file);
        }

        Ok(())
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        self.loxone.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.loxone.websocket.keepalive_interval,
            Duration::from_secs(240)
        );
        assert_eq!(config.loxone.websocket.max_binary_message_bytes(), 3072 * 1024);
        assert_eq!(config.loxone.websocket.max_text_message_bytes(), 512 * 1024);
    }

    #[test]
    fn test_message_limits_saturate() {
        let mut config = LoxoneConfig::default();
        config.websocket.max_binary_message_kb = usize::MAX;
        config.websocket.max_text_message_kb = usize::MAX / 512;
        assert_eq!(config.websocket.max_binary_message_bytes(), usize::MAX);
        assert_eq!(config.websocket.max_text_message_bytes(), usize::MAX);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_credentials_use_configured_user() {
        let config = LoxoneConfig {
            username: "operator".to_string(),
            ..Default::default()
        };
        assert_eq!(config.credentials("secret"), create_credentials("operator", "secret"));
    }

    #[test]
    fn test_websocket_url() {
        let config = LoxoneConfig {
            host: "192.168.1.77".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(
            config.websocket_url().unwrap().as_str(),
            "ws://192.168.1.77:8080/ws/rfc6455"
        );
    }

    #[test]
    fn test_keepalive_must_stay_below_idle_timeout() {
        let mut config = LoxoneConfig::default();
        config.websocket.keepalive_interval = Duration::from_secs(300);
        assert!(matches!(config.validate(), Err(LoxoneError::Config(_))));

        config.websocket.keepalive_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        config.websocket.keepalive_interval = Duration::from_secs(299);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_host_and_zero_sizes() {
        let mut config = LoxoneConfig {
            host: " ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.host = "miniserver".to_string();
        config.websocket.event_queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        temp_env::with_vars(
            [
                ("LOXONE_HOST", Some("http://10.0.0.5:8080")),
                ("LOXONE_USER", Some("operator")),
                ("LOXONE_KEEPALIVE_SECS", Some("120")),
                ("LOXONE_PORT", None),
                ("LOXONE_MAX_TEXT_MSG_KB", Some("256")),
            ],
            || {
                let config = ClientConfig::from_env().unwrap();
                assert_eq!(config.loxone.host, "10.0.0.5");
                assert_eq!(config.loxone.port, 8080);
                assert_eq!(config.loxone.username, "operator");
                assert_eq!(
                    config.loxone.websocket.keepalive_interval,
                    Duration::from_secs(120)
                );
                assert_eq!(config.loxone.websocket.max_text_message_kb, 256);
            },
        );
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_port() {
        temp_env::with_vars(
            [("LOXONE_HOST", None), ("LOXONE_PORT", Some("eighty"))],
            || {
                assert!(matches!(
                    ClientConfig::from_env(),
                    Err(LoxoneError::Config(_))
                ));
            },
        );
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loxone.toml");
        std::fs::write(
            &path,
            r#"
[loxone]
host = "miniserver.local"
port = 8081
username = "ha"

[loxone.websocket]
keepalive_interval = "3m"
max_binary_message_kb = 4096

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.loxone.host, "miniserver.local");
        assert_eq!(config.loxone.port, 8081);
        assert_eq!(
            config.loxone.websocket.keepalive_interval,
            Duration::from_secs(180)
        );
        assert_eq!(config.loxone.websocket.max_binary_message_kb, 4096);
        assert_eq!(config.loxone.websocket.max_text_message_kb, 512);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }
}
