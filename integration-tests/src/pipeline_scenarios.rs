//! End-to-end scenarios through a single core instance

use crate::test_utils::*;
use beacon_core::config::{BufferConfig, SanitizationConfig};
use beacon_core::{
    CircuitState, EventType, Level, MemorySink, ObservabilityConfig, ObservabilityCore,
    TelemetryEvent,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn count_events(events: &[TelemetryEvent], event_type: EventType) -> usize {
    events
        .iter()
        .filter(|e| e.event_type() == event_type)
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_lesson_session_end_to_end() {
    let sink = Arc::new(MemorySink::new());
    let core = ObservabilityCore::start(test_config(), sink.clone(), None).unwrap();

    core.set_correlation_id("lesson-42");
    for step in 0..12 {
        core.info("lesson", &format!("step {} shown", step), Some(json!({"step": step})));
    }
    core.error("quiz", "answer could not be scored", None);
    for fps in [58, 60, 59] {
        core.emit_telemetry("performance_metric", json!({"fps": fps}));
    }

    core.shutdown().await;

    let records = sink.records();
    assert_eq!(records.len(), 13);
    assert!(records.iter().all(|r| r.correlation_id() == "lesson-42"));
    assert_eq!(records[0].payload().unwrap()["step"], 0);

    // One size-triggered batch, then the remainder at shutdown
    let batches = sink.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), 10);
    assert_eq!(batches[1].len(), 3);

    let events = sink.events();
    assert_eq!(count_events(&events, EventType::PerformanceMetric), 3);
    assert_eq!(count_events(&events, EventType::ErrorEvent), 1);
    assert_eq!(count_events(&events, EventType::BufferFlush), 2);

    let stats = core.stats();
    assert_eq!(stats.total_logs, 13);
    assert_eq!(stats.total_errors, 1);
    assert_eq!(stats.total_events, 3);
    assert_eq!(stats.dropped_records, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failing_deliveries_open_then_recover() {
    let sink = Arc::new(FlakySink::new(2));
    let config = ObservabilityConfig {
        circuit_breaker: beacon_core::CircuitBreakerConfig {
            max_failures: 2,
            recovery_timeout_ms: 1_000,
        },
        ..test_config()
    };
    let core = ObservabilityCore::start(config, sink.clone(), None).unwrap();

    for i in 0..10 {
        core.info("sync", &format!("record {}", i), None);
    }
    core.flush_all().await;

    assert_eq!(core.circuit_state(), CircuitState::Open);
    assert_eq!(core.stats().dropped_records, 11);

    core.info("sync", "rejected while open", None);
    assert_eq!(core.stats().circuit_rejected, 1);

    tokio::time::sleep(Duration::from_millis(1_001)).await;
    core.info("sync", "recovered", None);
    assert_eq!(core.circuit_state(), CircuitState::HalfOpen);

    core.flush_all().await;
    assert_eq!(core.circuit_state(), CircuitState::Closed);
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].message(), "recovered");
    assert_eq!(sink.send_calls(), 4);

    // HalfOpen -> Closed was recorded while the probe was delivered
    core.flush_all().await;
    assert_eq!(sink.send_calls(), 5);
    let changes = count_events(&sink.delivered_events(), EventType::CircuitBreakerChange);
    assert_eq!(changes, 3);
}

#[tokio::test(start_paused = true)]
async fn test_hard_max_forces_overflow_flush() {
    let sink = Arc::new(MemorySink::new());
    let config = ObservabilityConfig {
        log_buffer: BufferConfig {
            size_threshold: 50,
            time_threshold_ms: 60_000,
            hard_max: 5,
        },
        ..test_config()
    };
    let core = ObservabilityCore::start(config, sink.clone(), None).unwrap();

    for i in 0..12 {
        core.info("canvas", &format!("frame {}", i), None);
        assert!(core.stats().log_buffer_len <= 5);
    }

    let stats = core.stats();
    assert_eq!(stats.log_flushes, 2);
    assert_eq!(stats.log_buffer_len, 2);
    assert_eq!(core.health().buffer_occupancy_percent, 40.0);

    core.flush_all().await;
    let reasons: Vec<String> = sink
        .events()
        .iter()
        .filter(|e| e.event_type() == EventType::BufferFlush)
        .map(|e| e.data()["reason"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(reasons, vec!["overflow", "overflow", "manual"]);
    assert_eq!(sink.records().len(), 12);
}

#[tokio::test(start_paused = true)]
async fn test_payloads_bounded_and_redacted() {
    let sink = Arc::new(MemorySink::new());
    let config = ObservabilityConfig {
        sanitization: SanitizationConfig {
            max_string_length: 8,
            max_depth: 2,
            ..Default::default()
        },
        ..test_config()
    };
    let core = ObservabilityCore::start(config, sink.clone(), None).unwrap();

    core.warn(
        "auth",
        "refresh failed token=abc123",
        Some(json!({
            "user": "student-0042",
            "password": "hunter2",
            "outer": {"inner": {"deep": 1}},
        })),
    );

    let record = &sink.emitted()[0];
    assert!(record.message().starts_with("refresh "));
    assert!(!record.message().contains("abc123"));

    let payload = record.payload().unwrap();
    assert_eq!(payload["user"], "student-…[truncated]");
    assert_eq!(payload["password"], "[REDACTED]");
    assert_eq!(payload["outer"]["inner"], "[max depth exceeded]");
}

#[tokio::test(start_paused = true)]
async fn test_level_changes_apply_immediately() {
    let sink = Arc::new(MemorySink::new());
    let core = ObservabilityCore::start(test_config(), sink.clone(), None).unwrap();

    core.debug("render", "layout pass", None);
    core.set_level(Level::Trace);
    core.trace("render", "paint pass", None);
    core.set_level(Level::Error);
    core.warn("render", "slow paint", None);
    core.error("render", "paint failed", None);

    let levels: Vec<Level> = sink.emitted().iter().map(|r| r.level()).collect();
    assert_eq!(levels, vec![Level::Trace, Level::Error]);
    assert_eq!(core.stats().level_filtered, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers() {
    let sink = Arc::new(MemorySink::new());
    let config = ObservabilityConfig {
        log_buffer: BufferConfig {
            size_threshold: 50,
            time_threshold_ms: 1_000,
            hard_max: 1_000,
        },
        ..test_config()
    };
    let core = ObservabilityCore::start(config, sink.clone(), None).unwrap();

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let core = core.clone();
            tokio::spawn(async move {
                for i in 0..250 {
                    core.info("worker", &format!("producer {} item {}", producer, i), None);
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();
    for result in futures::future::join_all(producers).await {
        result.unwrap();
    }

    core.shutdown().await;

    let stats = core.stats();
    assert_eq!(stats.total_logs, 1_000);
    assert_eq!(stats.suppressed, 0);
    assert_eq!(
        sink.records().len() as u64 + stats.dropped_records,
        1_000,
        "every record is either delivered or counted as dropped"
    );
}

#[tokio::test]
async fn test_wait_for_background_time_flush() {
    let sink = Arc::new(MemorySink::new());
    let config = ObservabilityConfig {
        log_buffer: BufferConfig {
            size_threshold: 100,
            time_threshold_ms: 50,
            hard_max: 1_000,
        },
        ..test_config()
    };
    let core = ObservabilityCore::start(config, sink.clone(), None).unwrap();

    core.info("nav", "page shown", None);
    wait_for_condition(
        || !sink.records().is_empty(),
        Duration::from_secs(5),
        Duration::from_millis(10),
    )
    .await
    .unwrap();

    assert_eq!(sink.records()[0].message(), "page shown");
    core.shutdown().await;
}
