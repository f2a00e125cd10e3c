//! Configuration management.

use anyhow::{Context, Result};
use rccar_hw::{Backoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Reply with an error instead of "OKAY" when a frame could not be sent
    #[serde(default)]
    pub report_send_errors: bool,

    /// How long getSonic waits for the controller, in milliseconds (0 = forever)
    #[serde(default = "default_sonic_timeout")]
    pub sonic_timeout_ms: u64,

    /// Serial port configuration
    #[serde(default)]
    pub serial: SerialConfig,

    /// Reconnect policy
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// D-Bus configuration
    #[serde(default)]
    pub dbus: DbusConfig,

    /// Top-level device path key used by older deployments; wins over `serial.device`
    #[serde(
        default,
        rename = "arduinoSerialPort",
        skip_serializing_if = "Option::is_none"
    )]
    pub arduino_serial_port: Option<String>,
}

/// Serial port configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial device path
    #[serde(default = "default_device", alias = "arduinoSerialPort")]
    pub device: String,

    /// Baud rate
    #[serde(default = "default_baud")]
    pub baud: u32,

    /// Drop and reopen the port when a write fails
    #[serde(default)]
    pub reconnect_on_write_error: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud: default_baud(),
            reconnect_on_write_error: false,
        }
    }
}

/// Reconnect policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the next open attempt, in milliseconds
    #[serde(default = "default_reconnect_delay")]
    pub delay_ms: u64,

    /// "fixed" or "exponential"
    #[serde(default)]
    pub backoff: Backoff,

    /// Upper bound for exponential backoff, in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Give up after this many failed attempts (0 = never)
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_reconnect_delay(),
            backoff: Backoff::default(),
            max_delay_ms: default_max_delay(),
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Converts to the link's retry policy.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_millis(self.delay_ms),
            backoff: self.backoff,
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
        }
    }
}

/// D-Bus bus selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbusBusType {
    /// Session bus (user services)
    Session,
    /// System bus (system services)
    System,
    /// Try session bus first, fall back to system bus
    #[default]
    Auto,
}

impl From<DbusBusType> for rccar_client::BusType {
    fn from(bus: DbusBusType) -> Self {
        match bus {
            DbusBusType::Session => Self::Session,
            DbusBusType::System => Self::System,
            DbusBusType::Auto => Self::Auto,
        }
    }
}

/// D-Bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DbusConfig {
    /// Bus to register on
    #[serde(default)]
    pub bus: DbusBusType,
}

// Default value functions
fn default_sonic_timeout() -> u64 {
    10000
}

fn default_device() -> String {
    rccar_hw::DEFAULT_DEVICE.to_string()
}

fn default_baud() -> u32 {
    rccar_hw::BAUD_RATE
}

fn default_reconnect_delay() -> u64 {
    3000
}

fn default_max_delay() -> u64 {
    30000
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read configuration file")?;
        Self::parse(&content)
    }

    /// Parses configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).context("Failed to parse configuration")?;
        if let Some(device) = config.arduino_serial_port.take() {
            config.serial.device = device;
        }
        Ok(config)
    }

    /// Sensor wait limit, `None` meaning wait forever.
    pub fn sonic_timeout(&self) -> Option<Duration> {
        (self.sonic_timeout_ms > 0).then(|| Duration::from_millis(self.sonic_timeout_ms))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            report_send_errors: false,
            sonic_timeout_ms: default_sonic_timeout(),
            serial: SerialConfig::default(),
            reconnect: ReconnectConfig::default(),
            dbus: DbusConfig::default(),
            arduino_serial_port: None,
        }
    }
}
