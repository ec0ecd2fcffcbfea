//! Unit tests for the observability facade

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::{BufferConfig, CircuitBreakerConfig, DedupConfig, HealthConfig};
    use crate::sink::MemorySink;
    use assert_matches::assert_matches;

    fn test_config() -> ObservabilityConfig {
        ObservabilityConfig {
            health: HealthConfig {
                track_memory: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn start(config: ObservabilityConfig) -> (ObservabilityCore, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let core = ObservabilityCore::start(config, sink.clone(), None).unwrap();
        (core, sink)
    }

    fn events_of(sink: &MemorySink, event_type: EventType) -> Vec<TelemetryEvent> {
        sink.events()
            .into_iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_warning_suppressed_within_cooldown() {
        let (core, sink) = start(ObservabilityConfig {
            dedup: DedupConfig {
                enabled: true,
                cooldown_ms: 5_000,
                max_keys: 100,
            },
            ..test_config()
        });

        core.warn("ctx", "same msg", None);
        tokio::time::sleep(Duration::from_millis(100)).await;
        core.warn("ctx", "same msg", None);

        assert_eq!(sink.emitted().len(), 1);
        assert_eq!(core.stats().total_logs, 1);
        assert_eq!(core.stats().suppressed, 1);

        tokio::time::sleep(Duration::from_millis(5_001)).await;
        core.warn("ctx", "same msg", None);

        assert_eq!(sink.emitted().len(), 2);
        assert_eq!(core.stats().total_logs, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_threshold_flushes_one_batch() {
        let (core, sink) = start(ObservabilityConfig {
            log_buffer: BufferConfig {
                size_threshold: 3,
                time_threshold_ms: 60_000,
                hard_max: 100,
            },
            ..test_config()
        });

        core.info("quiz", "first", None);
        core.info("quiz", "second", None);
        core.info("quiz", "third", None);
        assert_eq!(core.stats().log_buffer_len, 0);
        assert_eq!(core.stats().log_flushes, 1);

        core.flush_all().await;

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[0][0].message(), "first");

        let flushes = events_of(&sink, EventType::BufferFlush);
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].data()["buffer"], "logs");
        assert_eq!(flushes[0].data()["batch_size"], 3);
        assert_eq!(flushes[0].data()["reason"], "size");
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_and_recovers() {
        let (core, sink) = start(ObservabilityConfig {
            circuit_breaker: CircuitBreakerConfig {
                max_failures: 3,
                recovery_timeout_ms: 1_000,
            },
            ..test_config()
        });

        sink.set_failing(true);
        for i in 0..3 {
            core.error("render", &format!("failure {i}"), None);
        }

        let report = core.health();
        assert_eq!(report.circuit_breaker_state, CircuitState::Open);
        assert_eq!(report.failure_count, 3);
        assert!(!report.healthy);

        // Open circuit: the call is skipped without touching the sink
        core.error("render", "while open", None);
        assert_eq!(core.stats().circuit_rejected, 1);
        assert_eq!(core.stats().total_logs, 0);

        tokio::time::sleep(Duration::from_millis(1_001)).await;
        sink.set_failing(false);
        core.info("render", "recovered", None);

        // The probe record travels as its own batch and settles the circuit
        assert_eq!(core.circuit_state(), CircuitState::HalfOpen);
        assert_eq!(core.stats().total_logs, 1);
        core.flush_all().await;

        assert_eq!(core.circuit_state(), CircuitState::Closed);
        assert_eq!(core.health().failure_count, 0);
        assert_eq!(sink.records()[0].message(), "recovered");
        let flushes = events_of(&sink, EventType::BufferFlush);
        assert_eq!(flushes[0].data()["reason"], "probe");

        // The closing transition was buffered during delivery
        core.flush_all().await;
        let transitions: Vec<(String, String)> = events_of(&sink, EventType::CircuitBreakerChange)
            .iter()
            .map(|e| {
                (
                    e.data()["from"].as_str().unwrap_or_default().to_string(),
                    e.data()["to"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                ("Closed".to_string(), "Open".to_string()),
                ("Open".to_string(), "HalfOpen".to_string()),
                ("HalfOpen".to_string(), "Closed".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens_circuit() {
        let (core, sink) = start(ObservabilityConfig {
            circuit_breaker: CircuitBreakerConfig {
                max_failures: 1,
                recovery_timeout_ms: 500,
            },
            ..test_config()
        });

        sink.set_failing(true);
        core.info("ctx", "first", None);
        assert_eq!(core.circuit_state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(500)).await;
        core.info("ctx", "probe", None);
        assert_eq!(core.circuit_state(), CircuitState::Open);
        assert_eq!(core.health().failure_count, 1);
        assert_eq!(core.stats().total_logs, 0);
    }

    /// Implements only batch delivery, and every delivery fails
    #[derive(Debug, Default)]
    struct UnreachableCollector {
        sends: AtomicU64,
    }

    impl UnreachableCollector {
        fn sends(&self) -> u64 {
            self.sends.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl LogSink for UnreachableCollector {
        async fn send(&self, _batch: Vec<LogRecord>) -> std::result::Result<(), SinkError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::Unavailable("collector unreachable".to_string()))
        }

        async fn send_telemetry(
            &self,
            _batch: Vec<TelemetryEvent>,
        ) -> std::result::Result<(), SinkError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::Unavailable("collector unreachable".to_string()))
        }
    }

    fn start_unreachable(config: ObservabilityConfig) -> (ObservabilityCore, Arc<UnreachableCollector>) {
        let sink = Arc::new(UnreachableCollector::default());
        let core = ObservabilityCore::start(config, sink.clone(), None).unwrap();
        (core, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_batch_delivery_opens_circuit() {
        let (core, sink) = start_unreachable(ObservabilityConfig {
            log_buffer: BufferConfig {
                size_threshold: 2,
                time_threshold_ms: 60_000,
                hard_max: 100,
            },
            circuit_breaker: CircuitBreakerConfig {
                max_failures: 3,
                recovery_timeout_ms: 60_000,
            },
            ..test_config()
        });

        // Successful per-record emission in between must not reset the count
        for i in 0..40 {
            core.info("sync", &format!("record {i}"), None);
            tokio::task::yield_now().await;
        }

        assert_eq!(core.circuit_state(), CircuitState::Open);
        assert_eq!(sink.sends(), 3);

        let stats = core.stats();
        assert_eq!(stats.total_logs, 6);
        assert_eq!(stats.circuit_rejected, 34);
        assert_eq!(stats.dropped_records, 6);

        let report = core.health();
        assert!(!report.healthy);
        assert_eq!(report.failure_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_is_a_batch_delivery() {
        let (core, sink) = start_unreachable(ObservabilityConfig {
            circuit_breaker: CircuitBreakerConfig {
                max_failures: 1,
                recovery_timeout_ms: 1_000,
            },
            ..test_config()
        });

        core.info("sync", "lost", None);
        core.flush_all().await;
        assert_eq!(core.circuit_state(), CircuitState::Open);
        // The telemetry batch queued behind the failed one never reached the sink
        assert_eq!(sink.sends(), 1);
        assert_eq!(core.stats().dropped_records, 2);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        core.info("sync", "probe", None);
        assert_eq!(core.circuit_state(), CircuitState::HalfOpen);

        core.flush_all().await;
        assert_eq!(sink.sends(), 2);
        assert_eq!(core.circuit_state(), CircuitState::Open);
        assert_eq!(core.health().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_not_postponed_by_periodic_flushes() {
        let (core, sink) = start_unreachable(ObservabilityConfig {
            circuit_breaker: CircuitBreakerConfig {
                max_failures: 1,
                recovery_timeout_ms: 1_000,
            },
            telemetry_buffer: BufferConfig {
                size_threshold: 100,
                time_threshold_ms: 100,
                hard_max: 1_000,
            },
            health: HealthConfig {
                check_interval_ms: 50,
                track_memory: false,
                ..Default::default()
            },
            heartbeat_interval_ms: 50,
            ..test_config()
        });

        core.info("sync", "lost", None);
        core.flush_all().await;
        let tripped_at = Instant::now();
        assert_eq!(core.circuit_state(), CircuitState::Open);
        let retry_at = core.shared.breaker.snapshot().next_retry_at;
        assert_eq!(retry_at, Some(tripped_at + Duration::from_millis(1_000)));

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(core.stats().telemetry_flushes > 1);
        assert_eq!(sink.sends(), 1);
        assert_eq!(core.shared.breaker.snapshot().next_retry_at, retry_at);
        assert_eq!(core.circuit_state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(1)).await;
        core.info("sync", "probe", None);
        assert_eq!(core.circuit_state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_threshold_flush_by_background_task() {
        let (core, sink) = start(ObservabilityConfig {
            log_buffer: BufferConfig {
                size_threshold: 100,
                time_threshold_ms: 1_000,
                hard_max: 1_000,
            },
            ..test_config()
        });

        core.info("nav", "page shown", None);
        tokio::time::sleep(Duration::from_millis(1_001)).await;
        assert_eq!(core.stats().log_buffer_len, 0);

        core.flush_all().await;
        assert_eq!(sink.records().len(), 1);

        let flushes = events_of(&sink, EventType::BufferFlush);
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].data()["reason"], "time");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_time_flush_is_silent() {
        let (core, sink) = start(ObservabilityConfig {
            log_buffer: BufferConfig {
                size_threshold: 10,
                time_threshold_ms: 200,
                hard_max: 100,
            },
            telemetry_buffer: BufferConfig {
                size_threshold: 10,
                time_threshold_ms: 200,
                hard_max: 100,
            },
            ..test_config()
        });

        tokio::time::sleep(Duration::from_millis(1_000)).await;

        let stats = core.stats();
        assert_eq!(stats.log_flushes, 0);
        assert_eq!(stats.telemetry_flushes, 0);
        assert_eq!(stats.internal_errors, 0);
        assert!(sink.batches().is_empty());
        assert!(sink.telemetry_batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_level_gate() {
        let (core, sink) = start(test_config());

        core.debug("ctx", "hidden", None);
        core.trace("ctx", "hidden", None);
        assert!(sink.emitted().is_empty());
        assert_eq!(core.stats().level_filtered, 2);

        core.set_level(Level::Debug);
        core.debug("ctx", "visible", None);
        assert_eq!(sink.emitted().len(), 1);

        core.disable_level(Level::Warn);
        assert!(!core.is_enabled(Level::Warn));
        core.warn("ctx", "muted", None);
        assert_eq!(sink.emitted().len(), 1);

        core.enable_level(Level::Warn);
        core.warn("ctx", "unmuted", None);
        assert_eq!(sink.emitted().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_records_enqueue_error_events() {
        let (core, sink) = start(test_config());

        core.error("storage", "quota exceeded", Some(json!({"used": 10})));
        core.info("storage", "saved", None);
        core.flush_all().await;

        let errors = events_of(&sink, EventType::ErrorEvent);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].data()["context"], "storage");
        assert_eq!(errors[0].data()["message"], "quota exceeded");
        assert!(events_of(&sink, EventType::LogEvent).is_empty());
        assert_eq!(core.stats().total_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mirror_logs_to_telemetry() {
        let (core, sink) = start(ObservabilityConfig {
            mirror_logs_to_telemetry: true,
            ..test_config()
        });

        core.info("nav", "next page", None);
        core.warn("nav", "slow", None);
        core.flush_all().await;

        let mirrored = events_of(&sink, EventType::LogEvent);
        assert_eq!(mirrored.len(), 2);
        assert_eq!(mirrored[1].data()["level"], "warn");
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_telemetry_by_name() {
        let (core, sink) = start(test_config());

        core.emit_telemetry("performance_metric", json!({"fps": 60}));
        core.emit_telemetry("no_such_event", json!({}));
        core.emit_event(EventType::HealthCheck, json!({"ok": true}));

        let stats = core.stats();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.internal_errors, 1);
        assert_eq!(sink.emitted_events().len(), 2);

        core.flush_all().await;
        let metrics = events_of(&sink, EventType::PerformanceMetric);
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].data()["fps"], 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_not_deduplicated() {
        let (core, sink) = start(test_config());

        core.emit_event(EventType::LogEvent, json!({"same": true}));
        core.emit_event(EventType::LogEvent, json!({"same": true}));
        assert_eq!(sink.emitted_events().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_correlation_id_applied() {
        let (core, sink) = start(test_config());

        core.set_correlation_id("lesson-7");
        core.info("quiz", "opened", None);
        core.emit_event(EventType::LogEvent, json!({}));
        assert_eq!(core.correlation_id().as_deref(), Some("lesson-7"));

        core.clear_correlation_id();
        core.info("quiz", "closed", None);

        let emitted = sink.emitted();
        assert_eq!(emitted[0].correlation_id(), "lesson-7");
        assert_eq!(sink.emitted_events()[0].correlation_id(), "lesson-7");
        assert_ne!(emitted[1].correlation_id(), "lesson-7");
        assert_eq!(emitted[1].correlation_id().len(), 24);
    }

    #[derive(serde::Serialize)]
    struct Answer {
        question: u32,
        correct: bool,
        password: &'static str,
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_with_serializable_payload() {
        let (core, sink) = start(test_config());

        core.log_with(
            Level::Info,
            "quiz",
            "answered",
            &Answer {
                question: 2,
                correct: true,
                password: "hunter2",
            },
        );

        let record = &sink.emitted()[0];
        let payload = record.payload().unwrap();
        assert_eq!(payload["question"], 2);
        assert_eq!(payload["correct"], true);
        assert_eq!(payload["password"], "[REDACTED]");
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_dispatch_queue_drops_batches() {
        let (core, _sink) = start(ObservabilityConfig {
            log_buffer: BufferConfig {
                size_threshold: 1,
                time_threshold_ms: 60_000,
                hard_max: 10,
            },
            dispatch_queue_capacity: 1,
            ..test_config()
        });

        // The dispatcher cannot run until this task yields
        core.info("ctx", "one", None);
        core.info("ctx", "two", None);
        core.info("ctx", "three", None);

        let stats = core.stats();
        assert_eq!(stats.dropped_records, 2);
        assert_eq!(stats.internal_errors, 2);
        assert_eq!(stats.total_logs, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_delivery_failure_counts_against_circuit() {
        let (core, sink) = start(test_config());

        core.info("ctx", "a", None);
        core.info("ctx", "b", None);
        sink.set_failing(true);
        core.flush_all().await;

        let stats = core.stats();
        // Two log records plus the buffer flush event
        assert_eq!(stats.dropped_records, 3);
        assert_eq!(core.health().failure_count, 2);
        assert!(sink.records().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_health_check_and_heartbeat() {
        let (core, sink) = start(ObservabilityConfig {
            health: HealthConfig {
                check_interval_ms: 1_000,
                track_memory: false,
                ..Default::default()
            },
            heartbeat_interval_ms: 1_000,
            ..test_config()
        });

        assert!(core.last_health().is_none());
        core.info("ctx", "tick", None);
        tokio::time::sleep(Duration::from_millis(1_001)).await;

        let report = core.last_health().unwrap();
        assert!(report.healthy);
        assert_eq!(report.total_logs, 1);

        core.flush_all().await;
        let checks = events_of(&sink, EventType::HealthCheck);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].data()["healthy"], true);

        let heartbeats = events_of(&sink, EventType::PerformanceMetric);
        assert_eq!(heartbeats.len(), 1);
        assert_eq!(heartbeats[0].data()["operations"][0]["operation"], "log");
    }

    #[tokio::test(start_paused = true)]
    async fn test_performance_recorded_per_call() {
        let (core, _sink) = start(test_config());

        core.info("ctx", "a", None);
        core.info("ctx", "b", None);
        core.emit_event(EventType::LogEvent, json!({}));

        let summary = core.performance();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].operation, "log");
        assert_eq!(summary[0].count, 2);
        assert_eq!(summary[1].operation, "telemetry");
        assert_eq!(summary[1].count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_and_goes_quiet() {
        let registry = InstanceRegistry::new();
        let sink = Arc::new(MemorySink::new());
        let core = ObservabilityCore::start(test_config(), sink.clone(), Some(registry.clone()))
            .unwrap();
        assert!(registry.contains(core.instance_id()));

        core.info("ctx", "before shutdown", None);
        core.error("ctx", "also before", None);
        core.shutdown().await;

        assert!(core.is_shut_down());
        assert!(registry.is_empty());
        assert_eq!(sink.records().len(), 2);
        assert_eq!(sink.batches()[0][0].message(), "before shutdown");
        let flushes = events_of(&sink, EventType::BufferFlush);
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].data()["reason"], "shutdown");

        core.info("ctx", "after shutdown", None);
        core.emit_telemetry("log_event", json!({}));
        core.flush_all().await;
        core.shutdown().await;

        assert_eq!(sink.emitted().len(), 2);
        assert_eq!(core.stats().total_logs, 2);
        assert_eq!(core.stats().internal_errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_buffered_after_shutdown_are_counted() {
        let (core, sink) = start(test_config());
        core.info("ctx", "delivered", None);
        core.shutdown().await;
        assert_eq!(core.stats().dropped_records, 0);

        // A call that passed the closed check just before shutdown appends late
        let late = core
            .shared
            .builder
            .build_record(Level::Info, "ctx", "late", None, None);
        core.shared.buffer_record(late);

        let stats = core.stats();
        assert_eq!(stats.log_buffer_len, 0);
        assert_eq!(stats.dropped_records, 1);
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_instance() {
        let (core, sink) = start(test_config());
        let clone = core.clone();

        clone.info("ctx", "from clone", None);
        assert_eq!(core.stats().total_logs, 1);
        assert_eq!(core.instance_id(), clone.instance_id());
        assert_eq!(core.session_id(), clone.session_id());
        assert_eq!(sink.emitted()[0].instance_id(), core.instance_id());
    }

    #[test]
    fn test_start_requires_runtime() {
        let result = ObservabilityCore::start(test_config(), Arc::new(MemorySink::new()), None);
        assert_matches!(result, Err(ObservabilityError::Runtime(_)));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let config = ObservabilityConfig {
            dispatch_queue_capacity: 0,
            ..test_config()
        };
        let result = ObservabilityCore::start(config, Arc::new(MemorySink::new()), None);
        assert_matches!(result, Err(ObservabilityError::Config(_)));
    }
}
