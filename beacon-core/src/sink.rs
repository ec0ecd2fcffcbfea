//! Sink boundary
//!
//! The core never performs output itself. Records are handed to an injected
//! [`LogSink`]: once per record through [`LogSink::emit`] on the caller's
//! thread, and in batches through [`LogSink::send`] from the dispatcher task
//! when a buffer is flushed.

use crate::record::{LogRecord, Level, TelemetryEvent};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Errors reported by a sink
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Sink rejected batch: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Destination for records and telemetry
///
/// Failures from either path count against the circuit breaker; only a
/// successful batch delivery resets it.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Deliver a flushed batch of log records
    async fn send(&self, batch: Vec<LogRecord>) -> Result<(), SinkError>;

    /// Deliver a flushed batch of telemetry events
    async fn send_telemetry(&self, batch: Vec<TelemetryEvent>) -> Result<(), SinkError>;

    /// Immediate per-record emission; must not block
    fn emit(&self, _record: &LogRecord) -> Result<(), SinkError> {
        Ok(())
    }

    /// Immediate per-event emission; must not block
    fn emit_telemetry(&self, _event: &TelemetryEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes every record as a `tracing` event
///
/// Records are written when they are emitted; flushed batches are only
/// acknowledged, so nothing is written twice.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LogSink for TracingSink {
    async fn send(&self, batch: Vec<LogRecord>) -> Result<(), SinkError> {
        tracing::trace!(target: "beacon::sink", records = batch.len(), "Log batch flushed");
        Ok(())
    }

    async fn send_telemetry(&self, batch: Vec<TelemetryEvent>) -> Result<(), SinkError> {
        tracing::trace!(target: "beacon::sink", events = batch.len(), "Telemetry batch flushed");
        Ok(())
    }

    fn emit(&self, record: &LogRecord) -> Result<(), SinkError> {
        let payload = record.payload().map(|p| p.to_string());
        let payload = payload.as_deref().unwrap_or("");

        macro_rules! write_record {
            ($macro:ident) => {
                tracing::$macro!(
                    target: "beacon",
                    context = record.context(),
                    correlation_id = record.correlation_id(),
                    instance_id = record.instance_id(),
                    payload,
                    "{}",
                    record.message()
                )
            };
        }

        match record.level() {
            Level::Error => write_record!(error),
            Level::Warn => write_record!(warn),
            Level::Info => write_record!(info),
            Level::Debug => write_record!(debug),
            Level::Trace => write_record!(trace),
        }
        Ok(())
    }

    fn emit_telemetry(&self, event: &TelemetryEvent) -> Result<(), SinkError> {
        tracing::debug!(
            target: "beacon::telemetry",
            event_type = event.event_type().as_str(),
            correlation_id = event.correlation_id(),
            instance_id = event.instance_id(),
            data = %event.data(),
            "Telemetry event"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemorySinkState {
    emitted: Vec<LogRecord>,
    emitted_events: Vec<TelemetryEvent>,
    batches: Vec<Vec<LogRecord>>,
    telemetry_batches: Vec<Vec<TelemetryEvent>>,
}

/// Collects everything it receives in memory
///
/// Switching the sink to failing makes every call return
/// [`SinkError::Unavailable`] without recording anything.
#[derive(Debug, Default)]
pub struct MemorySink {
    failing: AtomicBool,
    state: Mutex<MemorySinkState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), SinkError> {
        if self.is_failing() {
            Err(SinkError::Unavailable("memory sink set to fail".to_string()))
        } else {
            Ok(())
        }
    }

    /// Records passed to [`LogSink::emit`]
    pub fn emitted(&self) -> Vec<LogRecord> {
        crate::lock(&self.state).emitted.clone()
    }

    pub fn emitted_events(&self) -> Vec<TelemetryEvent> {
        crate::lock(&self.state).emitted_events.clone()
    }

    /// Log batches delivered by flushes, in delivery order
    pub fn batches(&self) -> Vec<Vec<LogRecord>> {
        crate::lock(&self.state).batches.clone()
    }

    pub fn telemetry_batches(&self) -> Vec<Vec<TelemetryEvent>> {
        crate::lock(&self.state).telemetry_batches.clone()
    }

    /// All flushed records, flattened
    pub fn records(&self) -> Vec<LogRecord> {
        crate::lock(&self.state)
            .batches
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// All flushed telemetry events, flattened
    pub fn events(&self) -> Vec<TelemetryEvent> {
        crate::lock(&self.state)
            .telemetry_batches
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        *crate::lock(&self.state) = MemorySinkState::default();
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn send(&self, batch: Vec<LogRecord>) -> Result<(), SinkError> {
        self.check()?;
        crate::lock(&self.state).batches.push(batch);
        Ok(())
    }

    async fn send_telemetry(&self, batch: Vec<TelemetryEvent>) -> Result<(), SinkError> {
        self.check()?;
        crate::lock(&self.state).telemetry_batches.push(batch);
        Ok(())
    }

    fn emit(&self, record: &LogRecord) -> Result<(), SinkError> {
        self.check()?;
        crate::lock(&self.state).emitted.push(record.clone());
        Ok(())
    }

    fn emit_telemetry(&self, event: &TelemetryEvent) -> Result<(), SinkError> {
        self.check()?;
        crate::lock(&self.state).emitted_events.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EventType;
    use crate::structured::{InstanceIdentity, StructuredEntryBuilder};
    use crate::sanitization::PayloadSanitizer;
    use serde_json::json;

    fn builder() -> StructuredEntryBuilder {
        StructuredEntryBuilder::new(InstanceIdentity::generate(), PayloadSanitizer::default())
    }

    #[tokio::test]
    async fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        let builder = builder();
        let record = builder.build_record(Level::Info, "ctx", "hello", None, None);
        let event = builder.build_event(EventType::HealthCheck, &json!({"ok": true}), None);

        sink.emit(&record).unwrap();
        sink.send(vec![record.clone(), record.clone()]).await.unwrap();
        sink.send_telemetry(vec![event]).await.unwrap();

        assert_eq!(sink.emitted().len(), 1);
        assert_eq!(sink.batches().len(), 1);
        assert_eq!(sink.records().len(), 2);
        assert_eq!(sink.events()[0].event_type(), EventType::HealthCheck);
    }

    #[tokio::test]
    async fn test_memory_sink_failing() {
        let sink = MemorySink::new();
        let record = builder().build_record(Level::Warn, "ctx", "msg", None, None);
        sink.set_failing(true);

        assert!(matches!(sink.emit(&record), Err(SinkError::Unavailable(_))));
        assert!(sink.send(vec![record.clone()]).await.is_err());
        assert!(sink.records().is_empty());

        sink.set_failing(false);
        assert!(sink.send(vec![record]).await.is_ok());
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_everything() {
        let sink = TracingSink::new();
        let builder = builder();
        for level in Level::ALL {
            let record = builder.build_record(level, "ctx", "msg", Some(&json!({"k": 1})), None);
            assert!(sink.emit(&record).is_ok());
        }
        let event = builder.build_event(EventType::BufferFlush, &json!({}), None);
        assert!(sink.emit_telemetry(&event).is_ok());
        assert!(sink.send(Vec::new()).await.is_ok());
        assert!(sink.send_telemetry(vec![event]).await.is_ok());
    }

    #[test]
    fn test_sink_error_display() {
        let err = SinkError::Rejected("too large".to_string());
        assert_eq!(err.to_string(), "Sink rejected batch: too large");
    }
}
