//! # Configuration Management
//!
//! Centralized configuration for a protocol session.
//!
//! Covers the values the client announces during `admin/init`, the timer
//! intervals the driver runs on and the logging setup.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! Durations are written in milliseconds.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Client version announced in `admin/init`.
pub const CLIENT_VERSION: [u32; 3] = [0, 4, 315];

/// Default capacity of the session event channel.
pub const EVENT_BUFFER: usize = 64;

/// Top-level session configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct SessionConfig {
    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `WA_PROTOCOL_*` environment overrides on top of `self`.
    ///
    /// Unset variables leave the current value alone; a set but unparsable
    /// variable is an error.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(ms) = env_millis("WA_PROTOCOL_KEEPALIVE_INTERVAL_MS")? {
            self.client.keepalive_interval = ms;
        }
        if let Some(ms) = env_millis("WA_PROTOCOL_RESPONSE_TIMEOUT_MS")? {
            self.client.response_timeout = ms;
        }
        if let Ok(level) = std::env::var("WA_PROTOCOL_LOG_LEVEL") {
            self.logging.log_level = level.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid WA_PROTOCOL_LOG_LEVEL: {level}"))
            })?;
        }
        Ok(())
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
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.client.validate();
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_millis(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ProtocolError::ConfigError(format!("Invalid {name}: {raw}"))),
        Err(_) => Ok(None),
    }
}

/// Browser identity announced in `admin/init`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BrowserDescriptor {
    pub os: String,
    pub name: String,
    pub version: String,
}

impl Default for BrowserDescriptor {
    fn default() -> Self {
        Self {
            os: String::from("Windows"),
            name: String::from("Chrome"),
            version: String::from("10"),
        }
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Version triple sent in `admin/init`
    pub client_version: [u32; 3],

    /// Browser descriptor sent in `admin/init`
    pub browser: BrowserDescriptor,

    /// Interval between keepalive probes once the session is connected
    #[serde(with = "duration_serde")]
    pub keepalive_interval: Duration,

    /// How long a tagged request waits for its reply
    #[serde(with = "duration_serde")]
    pub response_timeout: Duration,

    /// How often pending requests are checked for expiry
    #[serde(with = "duration_serde")]
    pub timeout_sweep_interval: Duration,

    /// Bound on a single transport send
    #[serde(with = "duration_serde")]
    pub send_timeout: Duration,

    /// Capacity of the event channel handed to the application
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_version: CLIENT_VERSION,
            browser: BrowserDescriptor::default(),
            keepalive_interval: timeout::KEEPALIVE_INTERVAL,
            response_timeout: timeout::RESPONSE_TIMEOUT,
            timeout_sweep_interval: timeout::SWEEP_INTERVAL,
            send_timeout: timeout::DEFAULT_TIMEOUT,
            event_buffer: EVENT_BUFFER,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (label, value) in [
            ("Browser OS", &self.browser.os),
            ("Browser name", &self.browser.name),
            ("Browser version", &self.browser.version),
        ] {
            if value.is_empty() {
                errors.push(format!("{label} cannot be empty"));
            } else if value.contains('"') || value.contains('\\') {
                errors.push(format!("{label} contains a quote or backslash: '{value}'"));
            }
        }

        if self.keepalive_interval.as_millis() < 100 {
            errors.push("Keepalive interval too short (minimum: 100ms)".to_string());
        } else if self.keepalive_interval.as_secs() > 3600 {
            errors.push("Keepalive interval too long (maximum: 1 hour)".to_string());
        }

        if self.response_timeout.as_millis() < 100 {
            errors.push("Response timeout too short (minimum: 100ms)".to_string());
        }

        if self.timeout_sweep_interval.as_millis() < 10 {
            errors.push("Timeout sweep interval too short (minimum: 10ms)".to_string());
        } else if self.timeout_sweep_interval > self.response_timeout {
            errors.push("Timeout sweep interval cannot exceed the response timeout".to_string());
        }

        if self.send_timeout.as_millis() < 10 {
            errors.push("Send timeout too short (minimum: 10ms)".to_string());
        }

        if self.event_buffer == 0 {
            errors.push("Event buffer must be greater than 0".to_string());
        } else if self.event_buffer > 1_000_000 {
            errors.push(format!(
                "Event buffer too large: {} (max recommended: 1,000,000)",
                self.event_buffer
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
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
            app_name: String::from("wa-web-protocol"),
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
