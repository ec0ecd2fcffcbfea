//! Subscriber setup for the core's own diagnostics
//!
//! The core reports its state changes (circuit transitions, failed
//! deliveries, degraded health) through `tracing`. Hosts that do not install
//! a subscriber of their own can use [`DiagnosticsConfig::initialize`].

use crate::{ObservabilityError, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    Stderr,
}

/// Global subscriber settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Filter used when `RUST_LOG` is not set
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            output: LogOutput::Stderr,
        }
    }
}

impl DiagnosticsConfig {
    /// Install the global `tracing` subscriber
    ///
    /// Fails if the filter is invalid or a global subscriber is already set.
    pub fn initialize(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .map_err(|e| ObservabilityError::Config(format!("Invalid log level: {e}")))?;

        let writer = match self.output {
            LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        };

        let registry = tracing_subscriber::registry().with(filter);
        let result = match self.format {
            LogFormat::Json => registry
                .with(fmt::layer().json().with_writer(writer))
                .try_init(),
            LogFormat::Pretty => registry
                .with(fmt::layer().pretty().with_writer(writer))
                .try_init(),
            LogFormat::Compact => registry
                .with(fmt::layer().compact().with_writer(writer))
                .try_init(),
        };

        result.map_err(|e| ObservabilityError::Tracing(e.to_string()))
    }
}
