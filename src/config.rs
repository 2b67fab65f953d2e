//! System configuration parameters
//!
//! All tunable parameters for the Bioinfo device, plus the persistence
//! port and the line-oriented text format used on flash:
//!
//! ```text
//! # bioinfo.conf
//! name bioinfo-kitchen
//! debug true
//! update_interval_ms 2000
//! ```

use core::fmt;

use embassy_time::Duration;
use log::{LevelFilter, warn};
use serde::{Deserialize, Serialize};

/// Longest device name that still fits the advertising payload.
pub const DEVICE_NAME_CAP: usize = 24;

pub type DeviceName = heapless::String<DEVICE_NAME_CAP>;

pub const DEFAULT_DEVICE_NAME: &str = "bioinfo";

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    // --- Identity ---
    /// Name advertised to centrals
    pub device_name: DeviceName,
    /// Verbose logging
    pub debug: bool,

    // --- BLE ---
    /// Wait for the greeting write after connect (milliseconds)
    pub handshake_timeout_ms: u32,
    /// Wait for an indication acknowledgment (milliseconds)
    pub indicate_timeout_ms: u32,

    // --- Telemetry ---
    /// Bioinfo push period while in data mode (milliseconds)
    pub update_interval_ms: u32,
    /// Decoder cycle period, also the paused-cycle sleep (milliseconds)
    pub sensor_interval_ms: u32,
    /// Byte-wait retries before a transport resync
    pub sensor_retry_budget: u8,
    /// Sleep between byte-wait retries (milliseconds)
    pub sensor_retry_interval_ms: u32,

    // --- Lifecycle ---
    /// Cooperative shutdown window before forced cancellation (milliseconds)
    pub shutdown_timeout_ms: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let mut device_name = DeviceName::new();
        // Fits: DEFAULT_DEVICE_NAME is shorter than DEVICE_NAME_CAP.
        let _ = device_name.push_str(DEFAULT_DEVICE_NAME);
        Self {
            device_name,
            debug: false,

            handshake_timeout_ms: 1000,
            indicate_timeout_ms: 1000,

            update_interval_ms: 1000,
            sensor_interval_ms: 1000,
            sensor_retry_budget: 5,
            sensor_retry_interval_ms: 300,

            shutdown_timeout_ms: 10_000,
        }
    }
}

impl SystemConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms.into())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms.into())
    }

    pub fn indicate_timeout(&self) -> Duration {
        Duration::from_millis(self.indicate_timeout_ms.into())
    }

    pub fn sensor_interval(&self) -> Duration {
        Duration::from_millis(self.sensor_interval_ms.into())
    }

    pub fn sensor_retry_interval(&self) -> Duration {
        Duration::from_millis(self.sensor_retry_interval_ms.into())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms.into())
    }

    /// Maximum log level the process boundary should install.
    pub fn log_level(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }

    /// Replace the device name after checking it fits the advertising payload.
    pub fn set_device_name(&mut self, name: &str) -> Result<(), ConfigError> {
        self.device_name = parse_name(name)?;
        Ok(())
    }

    /// Range-check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_name.is_empty() {
            return Err(ConfigError::ValidationFailed("name must not be empty"));
        }
        if self.update_interval_ms == 0 || self.sensor_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("intervals must be non-zero"));
        }
        if self.handshake_timeout_ms == 0
            || self.indicate_timeout_ms == 0
            || self.shutdown_timeout_ms == 0
        {
            return Err(ConfigError::ValidationFailed("timeouts must be non-zero"));
        }
        if self.sensor_retry_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("retry interval must be non-zero"));
        }
        Ok(())
    }

    /// Parse the `key value` text format.  Keys that are absent keep
    /// their default; unknown keys are skipped with a warning.
    pub fn from_lines(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((key, value)) => (key, value.trim()),
                None => (line, ""),
            };
            match key {
                "name" => config.device_name = parse_name(value)?,
                "debug" => config.debug = parse_bool(value)?,
                "handshake_timeout_ms" => config.handshake_timeout_ms = parse_num(value)?,
                "indicate_timeout_ms" => config.indicate_timeout_ms = parse_num(value)?,
                "update_interval_ms" => config.update_interval_ms = parse_num(value)?,
                "sensor_interval_ms" => config.sensor_interval_ms = parse_num(value)?,
                "sensor_retry_budget" => config.sensor_retry_budget = parse_num(value)?,
                "sensor_retry_interval_ms" => config.sensor_retry_interval_ms = parse_num(value)?,
                "shutdown_timeout_ms" => config.shutdown_timeout_ms = parse_num(value)?,
                other => warn!("Config: ignoring unknown key '{}'", other),
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Serialize every key, one per line, in the order `from_lines` documents.
    pub fn to_lines(&self) -> String {
        format!(
            "name {}\n\
             debug {}\n\
             handshake_timeout_ms {}\n\
             indicate_timeout_ms {}\n\
             update_interval_ms {}\n\
             sensor_interval_ms {}\n\
             sensor_retry_budget {}\n\
             sensor_retry_interval_ms {}\n\
             shutdown_timeout_ms {}\n",
            self.device_name,
            self.debug,
            self.handshake_timeout_ms,
            self.indicate_timeout_ms,
            self.update_interval_ms,
            self.sensor_interval_ms,
            self.sensor_retry_budget,
            self.sensor_retry_interval_ms,
            self.shutdown_timeout_ms,
        )
    }
}

fn parse_name(value: &str) -> Result<DeviceName, ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::ValidationFailed("name must not be empty"));
    }
    if value.chars().any(char::is_control) {
        return Err(ConfigError::ValidationFailed("name contains control characters"));
    }
    let mut name = DeviceName::new();
    name.push_str(value)
        .map_err(|_| ConfigError::ValidationFailed("name longer than 24 bytes"))?;
    Ok(name)
}

fn parse_bool(value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "1" | "on" => Ok(true),
        "false" | "0" | "off" => Ok(false),
        _ => Err(ConfigError::Corrupted),
    }
}

fn parse_num<T: core::str::FromStr>(value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Corrupted)
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// Implementations MUST validate before persisting; invalid values are
/// rejected with [`ConfigError::ValidationFailed`], never clamped.
pub trait ConfigPort {
    /// Load configuration.  Returns [`SystemConfig::default()`] if nothing is stored.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config could not be parsed.
    Corrupted,
    /// A field failed range validation.
    ValidationFailed(&'static str),
    /// Underlying storage failed.
    IoError,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl From<ConfigError> for crate::error::Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Corrupted => Self::Config("stored config corrupted"),
            ConfigError::ValidationFailed(msg) => Self::Config(msg),
            ConfigError::IoError => Self::Config("config storage I/O error"),
        }
    }
}
