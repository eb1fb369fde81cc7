//! Tracing setup for the `iio-service` binary and embedding applications.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the process. [`init`] installs a formatting layer filtered by
//! `RUST_LOG` when set, otherwise by the configured level.
//!
//! # Example
//! ```no_run
//! use iio_service::{config::ServiceConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServiceConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!(device_id = 0, "Engine starting");
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::ServiceConfig;

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Multi-line, colored (for development)
    #[default]
    Pretty,
    /// Single-line, no colors (for journald and pipes)
    Compact,
    /// One JSON object per event (for log aggregation)
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Invalid log format '{s}'. Must be one of: pretty, compact, json"
            )),
        }
    }
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level used when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to log span creation and close
    pub with_span_events: bool,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to include thread names; the engine thread is named
    pub with_thread_names: bool,
    /// Whether to enable ANSI colors (Pretty only)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Create tracing config with the given level
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Create tracing config from the service configuration
    pub fn from_service_config(config: &ServiceConfig) -> Result<Self, String> {
        Ok(Self::new(parse_log_level(&config.application.log_level)?))
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span events
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from the service configuration
pub fn init_from_config(config: &ServiceConfig) -> Result<(), String> {
    init(TracingConfig::from_service_config(config)?)
}

/// Initialize tracing.
///
/// Idempotent: if a global subscriber is already installed this returns
/// `Ok(())`, which makes it safe to call from tests.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(config.with_ansi)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(false)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .try_init()
        .or_else(|e| {
            // Already initialized by another component or test
            if e
                .to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {e}"))
            }
        })
}

/// Parse a log level name, case-insensitively.
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        )),
    }
}

fn level_to_filter_string(level: Level) -> String {
    level.as_str().to_lowercase()
}
