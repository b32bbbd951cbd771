//! # Configuration Management
//!
//! Centralized configuration for hosts and channels.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables via `from_env()` (`WIRECALL_*`)
//! - Direct instantiation with defaults
//!
//! ## Compression
//! Compression is off by default. When enabled on a host, every parameter or return value
//! whose serialized size reaches `compression_threshold` is compressed. The threshold is
//! clamped to [`MIN_COMPRESSION_THRESHOLD`].

use crate::core::serialization::SerializationFormat;
use crate::error::{RpcError, Result};
use crate::utils::compression::CompressionKind;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Max allowed frame payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Whether to enable compression by default
pub const ENABLE_COMPRESSION: bool = false;

/// Default per-parameter compression threshold (128 KB)
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 128 * 1024;

/// Smallest accepted compression threshold
pub const MIN_COMPRESSION_THRESHOLD: usize = 1024;

/// Clamp a requested compression threshold to the supported floor.
pub fn clamp_compression_threshold(requested: usize) -> usize {
    requested.max(MIN_COMPRESSION_THRESHOLD)
}

/// Top-level configuration containing all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RpcConfig {
    /// Host-side configuration
    #[serde(default)]
    pub host: HostConfig,

    /// Channel (client) configuration
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RpcConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| RpcError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| RpcError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| RpcError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("WIRECALL_HOST_ADDRESS") {
            config.host.address = addr;
        }

        if let Ok(addr) = std::env::var("WIRECALL_CHANNEL_ADDRESS") {
            config.channel.address = addr;
        }

        if let Ok(flag) = std::env::var("WIRECALL_USE_COMPRESSION") {
            config.host.use_compression = parse_bool("WIRECALL_USE_COMPRESSION", &flag)?;
        }

        if let Ok(threshold) = std::env::var("WIRECALL_COMPRESSION_THRESHOLD") {
            let val = threshold.parse::<usize>().map_err(|e| {
                RpcError::ConfigError(format!("WIRECALL_COMPRESSION_THRESHOLD: {e}"))
            })?;
            config.host.compression_threshold = val;
        }

        if let Ok(timeout) = std::env::var("WIRECALL_CONNECT_TIMEOUT_MS") {
            let val = timeout.parse::<u64>().map_err(|e| {
                RpcError::ConfigError(format!("WIRECALL_CONNECT_TIMEOUT_MS: {e}"))
            })?;
            config.channel.connect_timeout = Duration::from_millis(val);
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
            .map_err(|e| RpcError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| RpcError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.host.validate());
        errors.extend(self.channel.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RpcError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(RpcError::ConfigError(format!(
            "{name}: expected a boolean, got '{other}'"
        ))),
    }
}

/// Host-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    /// Listen address (e.g., "127.0.0.1:8098")
    pub address: String,

    /// Compress large parameters and return values of every registered service
    pub use_compression: bool,

    /// Serialized size (bytes) from which a value is compressed; raised to 1024 if lower
    pub compression_threshold: usize,

    /// Algorithm used when this side compresses
    pub compression_kind: CompressionKind,

    /// Object serializer for parameters and return values
    pub serialization: SerializationFormat,

    /// Maximum accepted frame payload in bytes
    pub max_payload_size: usize,

    /// Time allowed for in-flight connections to finish after shutdown is requested
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:8098"),
            use_compression: ENABLE_COMPRESSION,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            compression_kind: CompressionKind::default(),
            serialization: SerializationFormat::default(),
            max_payload_size: MAX_PAYLOAD_SIZE,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl HostConfig {
    /// The threshold actually applied, after clamping
    pub fn effective_compression_threshold(&self) -> usize {
        clamp_compression_threshold(self.compression_threshold)
    }

    /// Validate host configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(validate_address("Host", &self.address, "0.0.0.0:8098"));

        errors.extend(validate_payload_size(self.max_payload_size));

        if self.compression_threshold > i32::MAX as usize {
            errors.push(format!(
                "Compression threshold too large: {} (must fit in a signed 32-bit integer)",
                self.compression_threshold
            ));
        }

        if self.use_compression && self.effective_compression_threshold() > self.max_payload_size
        {
            errors.push(
                "Compression threshold cannot be larger than max payload size".to_string(),
            );
        }

        if self.shutdown_timeout.as_millis() < 100 {
            errors.push("Shutdown timeout too short (minimum: 100ms)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Channel (client) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Target host address
    pub address: String,

    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Object serializer; must match the host's
    pub serialization: SerializationFormat,

    /// Algorithm used when this side compresses
    pub compression_kind: CompressionKind,

    /// Maximum accepted frame payload in bytes
    pub max_payload_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:8098"),
            connect_timeout: timeout::DEFAULT_CONNECT_TIMEOUT,
            serialization: SerializationFormat::default(),
            compression_kind: CompressionKind::default(),
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl ChannelConfig {
    /// Validate channel configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(validate_address("Channel", &self.address, "127.0.0.1:8098"));

        if self.connect_timeout.as_millis() < 10 {
            errors.push("Connect timeout too short (minimum: 10ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        errors.extend(validate_payload_size(self.max_payload_size));

        errors
    }
}

/// Transport an address string refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// `host:port`
    Tcp,
    /// Filesystem path of a Unix domain socket
    Unix,
}

impl AddressKind {
    /// Anything containing a path separator is a socket path; `host:port` never does.
    pub fn of(address: &str) -> Self {
        if address.contains('/') {
            AddressKind::Unix
        } else {
            AddressKind::Tcp
        }
    }
}

fn validate_address(role: &str, address: &str, example: &str) -> Option<String> {
    if address.is_empty() {
        return Some(format!("{role} address cannot be empty"));
    }
    match AddressKind::of(address) {
        AddressKind::Unix => Path::new(address)
            .file_name()
            .is_none()
            .then(|| format!("{role} socket path '{address}' does not name a file")),
        AddressKind::Tcp => {
            let valid = match address.rsplit_once(':') {
                Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
                None => false,
            };
            (!valid).then(|| {
                format!(
                    "Invalid {} address format: '{address}' (expected format: '{example}' or a socket path)",
                    role.to_ascii_lowercase()
                )
            })
        }
    }
}

fn validate_payload_size(size: usize) -> Vec<String> {
    let mut errors = Vec::new();
    if size == 0 {
        errors.push("Max payload size cannot be 0".to_string());
    } else if size < 1024 {
        errors.push("Max payload size too small (minimum: 1 KB)".to_string());
    } else if size > 100 * 1024 * 1024 {
        errors.push(format!(
            "Max payload size too large: {size} bytes (maximum recommended: 100 MB)"
        ));
    }
    errors
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

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("wirecall"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
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

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
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
