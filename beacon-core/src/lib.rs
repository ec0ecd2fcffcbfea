//! Embedded observability core
//!
//! This crate provides the self-contained observability layer of an
//! application, including:
//! - Structured logging with deduplication and level gating
//! - A circuit breaker isolating the application from a failing sink
//! - Size- and time-triggered batching of log records and telemetry
//! - Rolling performance statistics and periodic health checks
//! - A registry for fleet-wide health across instances
//!
//! # Example
//!
//! ```rust,no_run
//! use beacon_core::{ObservabilityConfig, ObservabilityCore, TracingSink};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> beacon_core::Result<()> {
//!     let core = ObservabilityCore::start(
//!         ObservabilityConfig::default(),
//!         Arc::new(TracingSink::new()),
//!         None,
//!     )?;
//!
//!     core.info("lesson", "Lesson opened", Some(serde_json::json!({"lesson": 3})));
//!     core.warn("canvas", "Frame took too long", None);
//!
//!     let report = core.health();
//!     println!("healthy: {}", report.healthy);
//!
//!     core.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod buffer;
pub mod circuit_breaker;
pub mod config;
pub mod dedup;
#[cfg(feature = "stdio-logging")]
pub mod diagnostics;
pub mod facade;
pub mod health;
pub mod performance;
pub mod record;
pub mod registry;
pub mod sanitization;
pub mod sink;
pub mod structured;

// Re-export main types for convenience
pub use buffer::{BufferAggregator, FlushReason};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState, CircuitState};
pub use config::{
    BufferConfig, CircuitBreakerConfig, DedupConfig, HealthConfig, HealthThresholds,
    ObservabilityConfig, SanitizationConfig,
};
pub use dedup::{DedupKey, DeduplicationFilter};
#[cfg(feature = "stdio-logging")]
pub use diagnostics::{DiagnosticsConfig, LogFormat, LogOutput};
pub use facade::{CoreStats, ObservabilityCore};
pub use health::{HealthMonitor, HealthReport};
pub use performance::{OperationStats, PerformanceSample, PerformanceTracker};
pub use record::{EventType, Level, LevelSet, LogRecord, TelemetryEvent};
pub use registry::{FleetReport, HealthSource, InstanceRegistry};
pub use sanitization::PayloadSanitizer;
pub use sink::{LogSink, MemorySink, SinkError, TracingSink};
pub use structured::{InstanceIdentity, StructuredEntryBuilder, generate_correlation_id};

/// Result type for core construction and configuration
pub type Result<T> = std::result::Result<T, ObservabilityError>;

/// Errors raised while configuring or starting a core
///
/// The logging and telemetry paths never return these.
#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Tracing error: {0}")]
    Tracing(String),
}

/// Lock a component mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod lib_tests;
