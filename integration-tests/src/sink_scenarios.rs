//! Custom sinks plugged into the core

use crate::test_utils::*;
use async_trait::async_trait;
use beacon_core::{
    CircuitState, Level, LogRecord, LogSink, ObservabilityConfig, ObservabilityCore, SinkError,
    TelemetryEvent,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Rejects per-record emission for one context and keeps the rest
#[derive(Debug, Default)]
struct SelectiveSink {
    blocked_context: String,
    emit_calls: AtomicU64,
    accepted: Mutex<Vec<String>>,
}

impl SelectiveSink {
    fn new(blocked_context: &str) -> Self {
        Self {
            blocked_context: blocked_context.to_string(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl LogSink for SelectiveSink {
    async fn send(&self, _batch: Vec<LogRecord>) -> Result<(), SinkError> {
        Ok(())
    }

    async fn send_telemetry(&self, _batch: Vec<TelemetryEvent>) -> Result<(), SinkError> {
        Ok(())
    }

    fn emit(&self, record: &LogRecord) -> Result<(), SinkError> {
        self.emit_calls.fetch_add(1, Ordering::SeqCst);
        if record.context() == self.blocked_context {
            return Err(SinkError::Rejected(format!(
                "context {} is not accepted",
                record.context()
            )));
        }
        self.accepted
            .lock()
            .unwrap()
            .push(record.message().to_string());
        Ok(())
    }
}

/// Takes a while to accept each batch
#[derive(Debug, Default)]
struct SlowSink {
    batches: AtomicU64,
}

#[async_trait]
impl LogSink for SlowSink {
    async fn send(&self, _batch: Vec<LogRecord>) -> Result<(), SinkError> {
        tokio::time::sleep(Duration::from_millis(250)).await;
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_telemetry(&self, _batch: Vec<TelemetryEvent>) -> Result<(), SinkError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_rejected_records_are_dropped_and_counted() {
    let sink = Arc::new(SelectiveSink::new("ads"));
    let core = ObservabilityCore::start(test_config(), sink.clone(), None).unwrap();

    core.info("lesson", "opened", None);
    core.info("ads", "banner shown", None);
    core.info("lesson", "closed", None);

    assert_eq!(sink.emit_calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        *sink.accepted.lock().unwrap(),
        vec!["opened".to_string(), "closed".to_string()]
    );

    let stats = core.stats();
    assert_eq!(stats.total_logs, 2);
    assert_eq!(stats.sink_failures, 1);
    assert_eq!(stats.log_buffer_len, 2);
    assert_eq!(core.health().failure_count, 1);
    assert_eq!(core.circuit_state(), CircuitState::Closed);

    // A delivered batch resets the count
    core.flush_all().await;
    assert_eq!(core.health().failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_sink_does_not_block_logging() {
    let sink = Arc::new(SlowSink::default());
    let config = ObservabilityConfig {
        log_buffer: beacon_core::BufferConfig {
            size_threshold: 2,
            time_threshold_ms: 60_000,
            hard_max: 100,
        },
        ..test_config()
    };
    let core = ObservabilityCore::start(config, sink.clone(), None).unwrap();

    let before = tokio::time::Instant::now();
    for i in 0..6 {
        core.log(Level::Info, "feed", &format!("item {}", i), None);
    }
    // Logging is synchronous and never waits on the sink
    assert_eq!(tokio::time::Instant::now(), before);
    assert_eq!(core.stats().log_flushes, 3);
    assert_eq!(sink.batches.load(Ordering::SeqCst), 0);

    core.flush_all().await;
    assert_eq!(sink.batches.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_collector_opens_circuit() {
    // Only batch delivery is implemented, and it never succeeds
    let sink = Arc::new(FlakySink::new(u64::MAX));
    let config = ObservabilityConfig {
        log_buffer: beacon_core::BufferConfig {
            size_threshold: 2,
            time_threshold_ms: 60_000,
            hard_max: 100,
        },
        circuit_breaker: beacon_core::CircuitBreakerConfig {
            max_failures: 3,
            recovery_timeout_ms: 60_000,
        },
        ..test_config()
    };
    let core = ObservabilityCore::start(config, sink.clone(), None).unwrap();

    for i in 0..40 {
        core.info("sync", &format!("record {}", i), None);
        tokio::task::yield_now().await;
    }

    assert_eq!(core.circuit_state(), CircuitState::Open);
    assert_eq!(sink.send_calls(), 3);
    assert!(sink.delivered().is_empty());

    let report = core.health();
    assert!(!report.healthy);
    assert_eq!(report.circuit_breaker_state, CircuitState::Open);

    let stats = core.stats();
    assert_eq!(stats.dropped_records, 6);
    assert_eq!(stats.circuit_rejected, 34);

    // Batches flushed while open never reach the collector
    core.flush_all().await;
    assert_eq!(sink.send_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_flaky_sink_batches_are_not_retried() {
    let sink = Arc::new(FlakySink::new(1));
    let core = ObservabilityCore::start(test_config(), sink.clone(), None).unwrap();

    core.info("sync", "lost with the first batch", None);
    core.flush_all().await;
    core.info("sync", "delivered with the second", None);
    core.flush_all().await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].message(), "delivered with the second");
    assert_eq!(core.stats().dropped_records, 1);
}
