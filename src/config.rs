//! Configuration.
//!
//! Loaded from TOML. Every field is optional; the defaults target the stock
//! EZ-GPIO firmware.
//!
//! ```toml
//! [device]
//! vendor_id = 0x6666
//! product_id = 0x6910
//! report_id = 0
//! trace_reports = false
//!
//! [hid]
//! read_timeout_ms = 10
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```

use crate::device::DeviceFilter;
use crate::error::ConfigError;
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub device: DeviceConfig,
    pub hid: HidConfig,
    pub logging: LoggingConfig,
}

/// Which device to select and how to talk to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    pub report_id: u8,
    /// Trace every raw report of the open device.
    pub trace_reports: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: DeviceFilter::EZ_GPIO.vendor_id,
            product_id: DeviceFilter::EZ_GPIO.product_id,
            report_id: 0,
            trace_reports: false,
        }
    }
}

/// hidapi backend tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HidConfig {
    /// How long the reader thread blocks per read before re-checking for shutdown.
    pub read_timeout_ms: u64,
}

impl Default for HidConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `"info"` or `"ezgpio=debug"`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl GpioConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn filter(&self) -> DeviceFilter {
        DeviceFilter {
            vendor_id: self.device.vendor_id,
            product_id: self.device.product_id,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            filter: self.filter(),
            report_id: self.device.report_id,
            trace_reports: self.device.trace_reports,
        }
    }
}
