//! Configuration for a message bus, loaded with Figment.
//!
//! Configuration is loaded from:
//! 1. A TOML file (base configuration)
//! 2. Environment variables prefixed with `DAQ_MSGBUS_`, nested keys separated by `__`
//!
//! # Example
//! ```no_run
//! use daq_msgbus::config::BusConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BusConfig::load_from("msgbus.toml")?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok(())
//! # }
//! ```
//!
//! ```toml
//! [application]
//! name = "prior-stage"
//! log_level = "debug"
//!
//! [transport]
//! kind = "serial"
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//!
//! [bus]
//! termination_character = "\r"
//! timeout_ms = 1000
//!
//! [[properties]]
//! name = "position"
//! get = "PS"
//! scalar_type = "int"
//! ```

use crate::error::{BusError, BusResult};
use crate::property_table::PropertySpec;
use crate::transport::LineSettings;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides, e.g. `DAQ_MSGBUS_BUS__TIMEOUT_MS=500`.
pub const ENV_PREFIX: &str = "DAQ_MSGBUS_";

/// Top-level bus configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Physical link; absent when the transport is chosen elsewhere (e.g. CLI flags)
    #[serde(default)]
    pub transport: Option<TransportConfig>,
    /// Line framing and query behaviour
    #[serde(default)]
    pub bus: BusSettings,
    /// Declarative property table
    #[serde(default)]
    pub properties: Vec<PropertySpec>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Which byte stream the bus runs over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Local serial port (needs the `serial` feature at runtime)
    Serial(SerialSettings),
    /// TCP socket, e.g. an Ethernet-to-serial bridge
    Tcp { address: String },
}

/// Serial line parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    /// Line speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// 5, 6, 7 or 8
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Parity bit
    #[serde(default)]
    pub parity: Parity,
    /// 1 or 2
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Handshake mode
    #[serde(default)]
    pub flow_control: FlowControl,
}

impl SerialSettings {
    /// 8N1, no flow control.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            data_bits: default_data_bits(),
            parity: Parity::default(),
            stop_bits: default_stop_bits(),
            flow_control: FlowControl::default(),
        }
    }
}

/// Serial parity bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Serial handshake mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    /// No handshake
    #[default]
    None,
    /// XON/XOFF
    Software,
    /// RTS/CTS
    Hardware,
}

/// Framing and query behaviour shared by every transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusSettings {
    /// Appended to each command and expected at the end of each reply line
    #[serde(default = "default_termination_character")]
    pub termination_character: String,
    /// Marker ending multi-line replies
    #[serde(default)]
    pub termination_line: Option<String>,
    /// Per-read timeout in milliseconds, 1000 by default; `0` waits forever
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: Option<u64>,
    /// Discard stale input before every query
    #[serde(default = "default_flush_on_query")]
    pub flush_on_query: bool,
    /// Pause between writing a query and reading its reply
    #[serde(default)]
    pub write_read_delay_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            termination_character: default_termination_character(),
            termination_line: None,
            timeout_ms: default_timeout_ms(),
            flush_on_query: default_flush_on_query(),
            write_read_delay_ms: 0,
        }
    }
}

impl BusSettings {
    /// Read timeout, or `None` to block until a line arrives.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }

    /// Pause between write and read.
    pub fn write_read_delay(&self) -> Duration {
        Duration::from_millis(self.write_read_delay_ms)
    }

    /// Framing for a stream transport.
    pub fn line_settings(&self) -> LineSettings {
        let settings =
            LineSettings::default().with_termination_character(&self.termination_character);
        match &self.termination_line {
            Some(marker) => settings.with_termination_line(marker),
            None => settings,
        }
    }
}

// Default value functions
fn default_name() -> String {
    "msgbus".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_termination_character() -> String {
    "\n".to_string()
}

fn default_timeout_ms() -> Option<u64> {
    Some(1000)
}

fn default_flush_on_query() -> bool {
    true
}

impl BusConfig {
    /// Load configuration from a TOML file and `DAQ_MSGBUS_` environment variables.
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> BusResult<Self> {
        Self::from_figment(Figment::new().merge(Toml::file(path.as_ref())))
    }

    /// Load configuration from TOML text and the environment.
    pub fn from_toml_str(toml: &str) -> BusResult<Self> {
        Self::from_figment(Figment::new().merge(Toml::string(toml)))
    }

    fn from_figment(figment: Figment) -> BusResult<Self> {
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> BusResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(BusError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.bus.termination_character.is_empty() {
            return Err(BusError::Configuration(
                "termination_character must not be empty".to_string(),
            ));
        }

        if let Some(TransportConfig::Serial(serial)) = &self.transport {
            if !(5..=8).contains(&serial.data_bits) {
                return Err(BusError::Configuration(format!(
                    "Invalid data_bits {}. Must be 5-8",
                    serial.data_bits
                )));
            }
            if !matches!(serial.stop_bits, 1 | 2) {
                return Err(BusError::Configuration(format!(
                    "Invalid stop_bits {}. Must be 1 or 2",
                    serial.stop_bits
                )));
            }
        }

        let mut names = HashSet::new();
        for spec in &self.properties {
            if !names.insert(spec.name.as_str()) {
                return Err(BusError::Configuration(format!(
                    "Duplicate property name: {}",
                    spec.name
                )));
            }
            spec.validate()?;
        }

        Ok(())
    }
}
