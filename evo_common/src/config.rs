//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! for the controller manager.
//!
//! # Usage
//!
//! ```rust,no_run
//! use evo_common::config::{ConfigLoader, ConfigError, ManagerConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = ManagerConfig::load(Path::new("controller_manager.toml"))?;
//!     config.validate()?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use crate::consts::{
    DEFAULT_SERVICE_NAME, DEFAULT_SWITCH_POLL_INTERVAL_US, DEFAULT_UPDATE_RATE_HZ,
    MAX_UPDATE_RATE_HZ,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
///
/// This enum represents all possible errors that can occur when loading
/// configuration files.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Represents the verbosity level of logging output.
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Common configuration fields shared by EVO services.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "evo-cm-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `service_name` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

/// `[manager]` section: loop timing and switch defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerSection {
    /// Real-time loop frequency [Hz].
    #[serde(default = "default_update_rate_hz")]
    pub update_rate_hz: u32,

    /// Registry busy-wait poll interval [µs].
    #[serde(default = "default_switch_poll_interval_us")]
    pub switch_poll_interval_us: u64,

    /// Default switch timeout [ms]; 0 waits forever.
    #[serde(default)]
    pub switch_timeout_ms: u64,
}

fn default_update_rate_hz() -> u32 {
    DEFAULT_UPDATE_RATE_HZ
}

fn default_switch_poll_interval_us() -> u64 {
    DEFAULT_SWITCH_POLL_INTERVAL_US
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            update_rate_hz: DEFAULT_UPDATE_RATE_HZ,
            switch_poll_interval_us: DEFAULT_SWITCH_POLL_INTERVAL_US,
            switch_timeout_ms: 0,
        }
    }
}

/// One `[[controllers]]` entry: maps a controller name to its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerEntry {
    /// Unique controller name.
    pub name: String,

    /// Plugin type name passed to the factory.
    #[serde(rename = "type")]
    pub type_name: String,

    /// Start the controller right after loading.
    #[serde(default)]
    pub autostart: bool,
}

/// Top-level controller manager configuration.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// service_name = "evo_controller_manager"
///
/// [manager]
/// update_rate_hz = 100
///
/// [[controllers]]
/// name = "heartbeat"
/// type = "heartbeat"
/// autostart = true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerConfig {
    /// Shared service fields.
    #[serde(default)]
    pub shared: SharedConfig,

    /// Loop timing and switch defaults.
    #[serde(default)]
    pub manager: ManagerSection,

    /// Controllers known by name.
    #[serde(default)]
    pub controllers: Vec<ControllerEntry>,
}

impl ManagerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `service_name` is empty
    /// - `update_rate_hz` is 0 or above `MAX_UPDATE_RATE_HZ`
    /// - `switch_poll_interval_us` is 0
    /// - a controller name or type is empty, or a name is repeated
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let rate = self.manager.update_rate_hz;
        if rate == 0 || rate > MAX_UPDATE_RATE_HZ {
            return Err(ConfigError::ValidationError(format!(
                "update_rate_hz must be in 1..={MAX_UPDATE_RATE_HZ}, got {rate}"
            )));
        }
        if self.manager.switch_poll_interval_us == 0 {
            return Err(ConfigError::ValidationError(
                "switch_poll_interval_us cannot be 0".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for entry in &self.controllers {
            if entry.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "controller name cannot be empty".to_string(),
                ));
            }
            if entry.type_name.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "controller '{}' has an empty type",
                    entry.name
                )));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate controller name: {}",
                    entry.name
                )));
            }
        }
        Ok(())
    }

    /// Configured type of the named controller.
    pub fn controller_type(&self, name: &str) -> Option<&str> {
        self.controllers
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.type_name.as_str())
    }

    /// Names of controllers flagged `autostart`, in file order.
    pub fn autostart_controllers(&self) -> Vec<String> {
        self.controllers
            .iter()
            .filter(|entry| entry.autostart)
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Real-time loop period derived from `update_rate_hz`.
    pub fn update_period(&self) -> Duration {
        Duration::from_secs(1) / self.manager.update_rate_hz.max(1)
    }

    /// Registry poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.manager.switch_poll_interval_us)
    }

    /// Default switch timeout (`Duration::ZERO` = infinite).
    pub fn default_switch_timeout(&self) -> Duration {
        Duration::from_millis(self.manager.switch_timeout_ms)
    }
}

/// Trait for loading configuration from TOML files.
///
/// This trait provides a default implementation that works with any type
/// implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
