//! Tracing setup for applications built on the bus.
//!
//! Uses `tracing-subscriber` with an [`EnvFilter`], so `RUST_LOG` always wins over the
//! configured level. Bus traffic is logged at `debug` (commands and replies) and `trace`
//! (individual lines of multi-line replies):
//!
//! ```text
//! RUST_LOG=daq_msgbus=debug msgbus --tcp 10.0.0.5:4001 query "*IDN?"
//! ```
//!
//! # Example
//! ```no_run
//! use daq_msgbus::logging::{self, LoggingConfig, OutputFormat};
//! use tracing::Level;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! logging::init(LoggingConfig::new(Level::DEBUG).with_format(OutputFormat::Json))?;
//! # Ok(())
//! # }
//! ```

use crate::config::BusConfig;
use crate::error::{BusError, BusResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer,
};

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, colored (for development)
    #[default]
    Pretty,
    /// One line per event, no colors
    Compact,
    /// JSON objects (for log aggregation)
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "Invalid log format '{other}'. Must be one of: pretty, compact, json"
            )),
        }
    }
}

/// Logging options
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level used when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Emit span NEW/CLOSE events
    pub with_span_events: bool,
    /// Include source file and line
    pub with_file_and_line: bool,
    /// ANSI colors (Pretty only)
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Config at `level` with the default format.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Level from the `[application]` section.
    pub fn from_bus_config(config: &BusConfig) -> BusResult<Self> {
        Ok(Self::new(parse_log_level(&config.application.log_level)?))
    }

    /// Set the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Log span open and close events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable ANSI colours.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize logging from a loaded configuration.
pub fn init_from_config(config: &BusConfig) -> BusResult<()> {
    init(LoggingConfig::from_bus_config(config)?)
}

/// Install the global subscriber.
///
/// Idempotent: if a global subscriber is already set (tests, embedding applications) this
/// returns `Ok(())`.
pub fn init(config: LoggingConfig) -> BusResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));
    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let result = match config.format {
        OutputFormat::Pretty => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .pretty()
                    .with_span_events(span_events)
                    .with_file(config.with_file_and_line)
                    .with_line_number(config.with_file_and_line)
                    .with_ansi(config.with_ansi)
                    .with_filter(env_filter),
            )
            .try_init(),
        OutputFormat::Compact => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .compact()
                    .with_span_events(span_events)
                    .with_file(config.with_file_and_line)
                    .with_line_number(config.with_file_and_line)
                    .with_ansi(false)
                    .with_filter(env_filter),
            )
            .try_init(),
        OutputFormat::Json => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(span_events)
                    .with_file(config.with_file_and_line)
                    .with_line_number(config.with_file_and_line)
                    .with_filter(env_filter),
            )
            .try_init(),
    };
    result.or_else(already_initialized)
}

fn already_initialized(e: TryInitError) -> BusResult<()> {
    // Expected in tests and when several components try to init tracing
    if e.to_string()
        .contains("a global default trace dispatcher has already been set")
    {
        Ok(())
    } else {
        Err(BusError::Configuration(format!(
            "Failed to initialize tracing: {e}"
        )))
    }
}

/// Parse a log level name, case-insensitively.
pub fn parse_log_level(level: &str) -> BusResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(BusError::Configuration(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("warn").unwrap(), Level::WARN);
        assert_eq!(parse_log_level("Debug").unwrap(), Level::DEBUG);
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(
            "compact".parse::<OutputFormat>().unwrap(),
            OutputFormat::Compact
        );
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_config_from_bus_config() {
        let mut bus_config = BusConfig::default();
        bus_config.application.log_level = "debug".into();
        let config = LoggingConfig::from_bus_config(&bus_config).unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, OutputFormat::Pretty);
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::new(Level::WARN).with_format(OutputFormat::Compact);
        assert!(init(config.clone()).is_ok());
        assert!(init(config).is_ok());
    }
}
