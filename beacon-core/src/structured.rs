//! Structured entry construction
//!
//! The [`StructuredEntryBuilder`] turns a raw logging call into an immutable
//! [`LogRecord`] or [`TelemetryEvent`], stamping it with:
//! - the wall-clock timestamp
//! - the instance and session identity
//! - the active correlation ID, or a fresh one
//! - a sanitized payload

use crate::record::{EventType, Level, LogRecord, TelemetryEvent};
use crate::sanitization::PayloadSanitizer;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Identity shared by every entry an instance produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub instance_id: String,
    pub session_id: String,
}

impl InstanceIdentity {
    pub fn generate() -> Self {
        Self {
            instance_id: generate_instance_id(),
            session_id: generate_session_id(),
        }
    }
}

/// Builds records and events for one instance
#[derive(Debug, Clone)]
pub struct StructuredEntryBuilder {
    identity: InstanceIdentity,
    sanitizer: PayloadSanitizer,
}

impl StructuredEntryBuilder {
    pub fn new(identity: InstanceIdentity, sanitizer: PayloadSanitizer) -> Self {
        Self {
            identity,
            sanitizer,
        }
    }

    pub fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    pub fn sanitizer(&self) -> &PayloadSanitizer {
        &self.sanitizer
    }

    /// Build a log record; `correlation_id` of `None` gets a fresh ID
    pub fn build_record(
        &self,
        level: Level,
        context: &str,
        message: &str,
        payload: Option<&Value>,
        correlation_id: Option<&str>,
    ) -> LogRecord {
        let payload = payload.map(|p| self.sanitizer.sanitize_value(p));
        self.assemble_record(level, context, message, payload, correlation_id)
    }

    /// Build a log record from any serializable payload
    pub fn build_record_with<P: Serialize + ?Sized>(
        &self,
        level: Level,
        context: &str,
        message: &str,
        payload: &P,
        correlation_id: Option<&str>,
    ) -> LogRecord {
        let payload = self.sanitizer.sanitize_serializable(payload);
        self.assemble_record(level, context, message, Some(payload), correlation_id)
    }

    fn assemble_record(
        &self,
        level: Level,
        context: &str,
        message: &str,
        payload: Option<Value>,
        correlation_id: Option<&str>,
    ) -> LogRecord {
        LogRecord::new(
            level,
            context.to_string(),
            self.sanitizer.sanitize_text(message),
            payload,
            Utc::now(),
            correlation_id.map_or_else(generate_correlation_id, str::to_string),
            self.identity.instance_id.clone(),
            self.identity.session_id.clone(),
        )
    }

    /// Build a telemetry event; `correlation_id` of `None` gets a fresh ID
    pub fn build_event(
        &self,
        event_type: EventType,
        data: &Value,
        correlation_id: Option<&str>,
    ) -> TelemetryEvent {
        TelemetryEvent::new(
            event_type,
            Utc::now(),
            self.identity.instance_id.clone(),
            self.identity.session_id.clone(),
            correlation_id.map_or_else(generate_correlation_id, str::to_string),
            self.sanitizer.sanitize_value(data),
        )
    }
}

/// Generate a correlation ID for grouping related entries
pub fn generate_correlation_id() -> String {
    let uuid = Uuid::new_v4();
    hex::encode(&uuid.as_bytes()[..12]) // 24 character hex string
}

/// Generate an instance ID
fn generate_instance_id() -> String {
    let uuid = Uuid::new_v4();
    hex::encode(&uuid.as_bytes()[..6]) // 12 character hex string
}

fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
#[path = "structured_tests.rs"]
mod structured_tests;
