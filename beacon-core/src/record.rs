//! Immutable record types flowing through the pipeline
//!
//! A [`LogRecord`] or [`TelemetryEvent`] is created once by the
//! [`StructuredEntryBuilder`](crate::structured::StructuredEntryBuilder) and
//! never changes afterwards: fields are private and only exposed through
//! accessors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Log severity, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    /// All levels ordered from most to least severe
    pub const ALL: [Level; 5] = [
        Level::Error,
        Level::Warn,
        Level::Info,
        Level::Debug,
        Level::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Trace => "trace",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Level::Error),
            "warn" | "warning" => Ok(Level::Warn),
            "info" => Ok(Level::Info),
            "debug" => Ok(Level::Debug),
            "trace" => Ok(Level::Trace),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

/// Returned when a level or event type string is not recognized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);

/// Compact set of enabled levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LevelSet(u8);

impl LevelSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// `level` and every more severe level
    pub fn up_to(level: Level) -> Self {
        Level::ALL
            .iter()
            .filter(|l| **l <= level)
            .fold(Self::empty(), |set, l| set.with(*l))
    }

    pub fn with(self, level: Level) -> Self {
        Self(self.0 | level.bit())
    }

    pub fn without(self, level: Level) -> Self {
        Self(self.0 & !level.bit())
    }

    pub fn contains(&self, level: Level) -> bool {
        self.0 & level.bit() != 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0b1_1111)
    }
}

/// A single structured log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    level: Level,
    context: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    timestamp: DateTime<Utc>,
    correlation_id: String,
    instance_id: String,
    session_id: String,
}

impl LogRecord {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        level: Level,
        context: String,
        message: String,
        payload: Option<Value>,
        timestamp: DateTime<Utc>,
        correlation_id: String,
        instance_id: String,
        session_id: String,
    ) -> Self {
        Self {
            level,
            context,
            message,
            payload,
            timestamp,
            correlation_id,
            instance_id,
            session_id,
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Kinds of telemetry event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    LogEvent,
    PerformanceMetric,
    ErrorEvent,
    HealthCheck,
    BufferFlush,
    CircuitBreakerChange,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::LogEvent => "log_event",
            EventType::PerformanceMetric => "performance_metric",
            EventType::ErrorEvent => "error_event",
            EventType::HealthCheck => "health_check",
            EventType::BufferFlush => "buffer_flush",
            EventType::CircuitBreakerChange => "circuit_breaker_change",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept both snake_case and the CamelCase variant names
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "logevent" => Ok(EventType::LogEvent),
            "performancemetric" => Ok(EventType::PerformanceMetric),
            "errorevent" => Ok(EventType::ErrorEvent),
            "healthcheck" => Ok(EventType::HealthCheck),
            "bufferflush" => Ok(EventType::BufferFlush),
            "circuitbreakerchange" => Ok(EventType::CircuitBreakerChange),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

/// A single telemetry event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    event_type: EventType,
    timestamp: DateTime<Utc>,
    instance_id: String,
    session_id: String,
    correlation_id: String,
    data: Value,
}

impl TelemetryEvent {
    pub(crate) fn new(
        event_type: EventType,
        timestamp: DateTime<Utc>,
        instance_id: String,
        session_id: String,
        correlation_id: String,
        data: Value,
    ) -> Self {
        Self {
            event_type,
            timestamp,
            instance_id,
            session_id,
            correlation_id,
            data,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn data(&self) -> &Value {
        &self.data
    }
}
