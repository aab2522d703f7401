//! Logging setup for ctxlab binaries and experiments.
//!
//! Installs a global `tracing` subscriber with an [`EnvFilter`] taken from
//! `RUST_LOG` (falling back to a default directive) and either a
//! human-readable or a JSON formatter.
//!
//! # Example
//!
//! ```rust,ignore
//! ctxlab_telemetry::init_telemetry("rerank-experiment")?;
//! tracing::info!("experiment started");
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber is already installed.
    #[error("Telemetry already initialized: {0}")]
    AlreadyInitialized(String),

    /// The filter directives could not be parsed.
    #[error("Invalid log filter '{directives}': {message}")]
    InvalidFilter {
        /// The rejected directives.
        directives: String,
        /// Parser detail.
        message: String,
    },

    /// The log format name is not recognised.
    #[error("Unknown log format '{0}' (valid: pretty, json)")]
    UnknownFormat(String),
}

/// A convenience result type for telemetry setup.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        })
    }
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(TelemetryError::UnknownFormat(other.to_string())),
        }
    }
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Name recorded on the startup event.
    pub service_name: String,
    /// Line format.
    pub format: LogFormat,
    /// Directives used when `RUST_LOG` is unset.
    pub default_directives: String,
}

impl TelemetryConfig {
    /// Pretty output at `info` for `service_name`.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            format: LogFormat::Pretty,
            default_directives: "info".to_string(),
        }
    }

    /// Set the line format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the directives used when `RUST_LOG` is unset.
    pub fn with_default_directives(mut self, directives: impl Into<String>) -> Self {
        self.default_directives = directives.into();
        self
    }
}

/// Parse filter directives such as `info,ctxlab_rag=debug`.
pub fn parse_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives).map_err(|e| TelemetryError::InvalidFilter {
        directives: directives.to_string(),
        message: e.to_string(),
    })
}

fn filter_for(config: &TelemetryConfig) -> Result<EnvFilter> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => parse_filter(&directives),
        _ => parse_filter(&config.default_directives),
    }
}

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// Returns [`TelemetryError::AlreadyInitialized`] if a subscriber is already
/// installed, and [`TelemetryError::InvalidFilter`] for bad directives.
pub fn init_with_config(config: &TelemetryConfig) -> Result<()> {
    let filter = filter_for(config)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Pretty => {
            registry.with(tracing_subscriber::fmt::layer().with_target(true)).try_init()
        }
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    };
    installed.map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        service.name = %config.service_name,
        format = %config.format,
        "telemetry initialized"
    );
    Ok(())
}

/// Install human-readable logging for `service_name`.
pub fn init_telemetry(service_name: impl Into<String>) -> Result<()> {
    init_with_config(&TelemetryConfig::new(service_name))
}

/// Install JSON logging for `service_name`.
pub fn init_json(service_name: impl Into<String>) -> Result<()> {
    init_with_config(&TelemetryConfig::new(service_name).with_format(LogFormat::Json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_formats() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!(matches!("xml".parse::<LogFormat>(), Err(TelemetryError::UnknownFormat(_))));
    }

    #[test]
    fn rejects_bad_directives() {
        assert!(parse_filter("info,ctxlab_rag=debug").is_ok());
        let err = parse_filter("ctxlab_rag=loud").unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidFilter { .. }));
    }

    #[test]
    fn config_builder_sets_fields() {
        let config = TelemetryConfig::new("svc")
            .with_format(LogFormat::Json)
            .with_default_directives("warn");
        assert_eq!(config.service_name, "svc");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.default_directives, "warn");
    }
}
