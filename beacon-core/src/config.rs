//! Core configuration
//!
//! Every option has a default, so hosts only override what they need.
//! Durations are expressed in milliseconds.

use crate::record::Level;
use crate::{ObservabilityError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for an [`ObservabilityCore`](crate::ObservabilityCore)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Least severe level that is emitted
    pub level: Level,

    /// Deduplication of repeated log records
    pub dedup: DedupConfig,

    /// Buffer for structured log records
    pub log_buffer: BufferConfig,

    /// Buffer for telemetry events
    pub telemetry_buffer: BufferConfig,

    /// Circuit breaker guarding the sink
    pub circuit_breaker: CircuitBreakerConfig,

    /// Periodic health checks
    pub health: HealthConfig,

    /// Heartbeat interval for performance summaries
    pub heartbeat_interval_ms: u64,

    /// Number of raw performance samples retained
    pub performance_window: usize,

    /// Payload bounding and redaction
    pub sanitization: SanitizationConfig,

    /// Capacity of the queue between flushes and the sink dispatcher
    pub dispatch_queue_capacity: usize,

    /// Mirror every accepted log record into the telemetry stream
    pub mirror_logs_to_telemetry: bool,
}

/// Deduplication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    pub cooldown_ms: u64,
    pub max_keys: usize,
}

/// Flush thresholds for one buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Flush once this many entries are buffered
    pub size_threshold: usize,

    /// Flush once this long has passed since the last flush
    pub time_threshold_ms: u64,

    /// The buffer never holds more than this many entries
    pub hard_max: usize,
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub max_failures: u32,
    pub recovery_timeout_ms: u64,
}

/// Health check period and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub check_interval_ms: u64,

    /// Sample process memory with sysinfo
    pub track_memory: bool,

    pub thresholds: HealthThresholds,
}

/// Limits above which an instance is reported unhealthy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Error-level records per second since start
    pub max_error_rate: f64,
    pub max_memory_mb: f64,
    pub max_buffer_occupancy_percent: f64,
    pub max_average_operation_ms: f64,
}

/// Payload sanitization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizationConfig {
    /// Strings longer than this (in chars) are truncated
    pub max_string_length: usize,

    /// Nesting deeper than this is replaced by a marker
    pub max_depth: usize,

    /// Redact credential-looking keys and values
    pub redact_sensitive: bool,

    /// Replacement for redacted values
    pub replacement: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            dedup: DedupConfig::default(),
            log_buffer: BufferConfig {
                size_threshold: 100,
                time_threshold_ms: 5_000,
                hard_max: 1_000,
            },
            telemetry_buffer: BufferConfig {
                size_threshold: 50,
                time_threshold_ms: 10_000,
                hard_max: 1_000,
            },
            circuit_breaker: CircuitBreakerConfig::default(),
            health: HealthConfig::default(),
            heartbeat_interval_ms: 60_000,
            performance_window: 100,
            sanitization: SanitizationConfig::default(),
            dispatch_queue_capacity: 64,
            mirror_logs_to_telemetry: false,
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_ms: 5_000,
            max_keys: 1_000,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            size_threshold: 100,
            time_threshold_ms: 5_000,
            hard_max: 1_000,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            recovery_timeout_ms: 30_000,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 30_000,
            track_memory: true,
            thresholds: HealthThresholds::default(),
        }
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_error_rate: 1.0,
            max_memory_mb: 512.0,
            max_buffer_occupancy_percent: 80.0,
            max_average_operation_ms: 100.0,
        }
    }
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            max_string_length: 1_000,
            max_depth: 5,
            redact_sensitive: true,
            replacement: "[REDACTED]".to_string(),
        }
    }
}

impl DedupConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl BufferConfig {
    pub fn time_threshold(&self) -> Duration {
        Duration::from_millis(self.time_threshold_ms)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.size_threshold == 0 {
            return Err(ObservabilityError::Config(format!(
                "{name}.size_threshold must be greater than zero"
            )));
        }
        if self.hard_max == 0 {
            return Err(ObservabilityError::Config(format!(
                "{name}.hard_max must be greater than zero"
            )));
        }
        if self.time_threshold_ms == 0 {
            return Err(ObservabilityError::Config(format!(
                "{name}.time_threshold_ms must be greater than zero"
            )));
        }
        Ok(())
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

impl ObservabilityConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Check that the configuration can drive a running core
    pub fn validate(&self) -> Result<()> {
        self.log_buffer.validate("log_buffer")?;
        self.telemetry_buffer.validate("telemetry_buffer")?;

        if self.dedup.enabled && self.dedup.max_keys == 0 {
            return Err(ObservabilityError::Config(
                "dedup.max_keys must be greater than zero".to_string(),
            ));
        }
        if self.circuit_breaker.max_failures == 0 {
            return Err(ObservabilityError::Config(
                "circuit_breaker.max_failures must be greater than zero".to_string(),
            ));
        }
        if self.health.check_interval_ms == 0 || self.heartbeat_interval_ms == 0 {
            return Err(ObservabilityError::Config(
                "health and heartbeat intervals must be greater than zero".to_string(),
            ));
        }
        if self.performance_window == 0 {
            return Err(ObservabilityError::Config(
                "performance_window must be greater than zero".to_string(),
            ));
        }
        if self.dispatch_queue_capacity == 0 {
            return Err(ObservabilityError::Config(
                "dispatch_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.sanitization.max_depth == 0 {
            return Err(ObservabilityError::Config(
                "sanitization.max_depth must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
