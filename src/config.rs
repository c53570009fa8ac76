//! # Configuration Management
//!
//! Centralized configuration for the relay and its peers.
//!
//! The relay itself only needs a listen address; a peer only needs the relay's host and
//! port. The remaining knobs guard the codec against oversized frames and tune the accept
//! loop and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - TOML strings via `from_toml()`
//! - Environment variables via `from_env()`
//! - Direct instantiation with defaults

use crate::error::{ConnectionError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Type tag of [`crate::core::packet::Packet::Message`] on the wire
pub const PACKET_TYPE_MESSAGE: u8 = 0;

/// Bytes of fixed framing around a message: tag + two u32 length prefixes
pub const FRAME_HEADER_LEN: usize = 1 + 4 + 4;

/// Max allowed length of a single frame field (16 MB)
pub const MAX_FIELD_SIZE: usize = 16 * 1024 * 1024;

/// Port the relay listens on when nothing else is configured
pub const DEFAULT_PORT: u16 = 7700;

/// Pause after a transient accept error before accepting again
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Relay-side configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Peer-side configuration
    #[serde(default)]
    pub peer: PeerConfig,

    /// Framing and socket options shared by both sides
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ConnectionError::Config(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ConnectionError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ConnectionError::Config(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup (env-style keys)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("CHANNEL_RELAY_ADDRESS") {
            config.server.address = addr;
        }

        if let Some(host) = lookup("CHANNEL_RELAY_HOST") {
            config.peer.host = host;
        }

        if let Some(port) = lookup("CHANNEL_RELAY_PORT") {
            config.peer.port = port.parse::<u16>().map_err(|_| {
                ConnectionError::Config(format!("CHANNEL_RELAY_PORT is not a port: '{port}'"))
            })?;
        }

        if let Some(size) = lookup("CHANNEL_RELAY_MAX_FIELD_SIZE") {
            config.transport.max_field_size = size.parse::<usize>().map_err(|_| {
                ConnectionError::Config(format!(
                    "CHANNEL_RELAY_MAX_FIELD_SIZE is not a size: '{size}'"
                ))
            })?;
        }

        if let Some(level) = lookup("CHANNEL_RELAY_LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                ConnectionError::Config(format!("Invalid log level: '{level}'"))
            })?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConnectionError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ConnectionError::Config(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.peer.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConnectionError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Relay-side configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Relay listen address (e.g., "0.0.0.0:7700")
    pub address: String,

    /// Pause after a transient accept error
    #[serde(with = "duration_serde")]
    pub accept_backoff: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{DEFAULT_PORT}"),
            accept_backoff: ACCEPT_BACKOFF,
        }
    }
}

impl ServerConfig {
    /// Validate relay configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:7700')",
                self.address
            ));
        }

        if self.accept_backoff.as_secs() > 10 {
            errors.push("Accept backoff too long (maximum: 10s)".to_string());
        }

        errors
    }
}

/// Peer-side configuration: where the relay lives
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Relay host name or IP
    pub host: String,

    /// Relay port
    pub port: u16,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: DEFAULT_PORT,
        }
    }
}

impl PeerConfig {
    /// Validate peer configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.host.trim().is_empty() {
            errors.push("Peer host cannot be empty".to_string());
        }

        if self.port == 0 {
            errors.push("Peer port cannot be 0".to_string());
        }

        errors
    }
}

/// Framing and socket options
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest channel or body field accepted by the codec, in bytes
    pub max_field_size: usize,

    /// Disable Nagle's algorithm on accepted and outgoing sockets
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_field_size: MAX_FIELD_SIZE,
            nodelay: true,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_field_size == 0 {
            errors.push("Max field size cannot be 0".to_string());
        } else if self.max_field_size < 1024 {
            errors.push("Max field size too small (minimum: 1 KB)".to_string());
        } else if self.max_field_size > u32::MAX as usize {
            errors.push(format!(
                "Max field size too large: {} bytes (length prefixes are 32-bit)",
                self.max_field_size
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("channel-relay"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
