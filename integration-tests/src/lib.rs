//! Integration tests for the beacon observability core
//!
//! This crate exercises the core end to end: several components of one
//! instance working together, custom sinks, and fleets of instances sharing
//! a registry.

#![allow(unused_imports)] // Allow unused imports in integration tests
#![allow(clippy::uninlined_format_args)] // Allow traditional format strings in tests

pub mod fleet_scenarios;
pub mod pipeline_scenarios;
pub mod sink_scenarios;

/// Common test utilities for integration tests
pub mod test_utils {
    use async_trait::async_trait;
    use beacon_core::config::{BufferConfig, HealthConfig};
    use beacon_core::{LogRecord, LogSink, ObservabilityConfig, SinkError, TelemetryEvent};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// Create a test-friendly config: no memory sampling, small buffers
    pub fn test_config() -> ObservabilityConfig {
        ObservabilityConfig {
            log_buffer: BufferConfig {
                size_threshold: 10,
                time_threshold_ms: 1_000,
                hard_max: 100,
            },
            telemetry_buffer: BufferConfig {
                size_threshold: 10,
                time_threshold_ms: 2_000,
                hard_max: 100,
            },
            health: HealthConfig {
                track_memory: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Sink whose batch delivery fails for the first `failures` calls
    #[derive(Debug, Default)]
    pub struct FlakySink {
        remaining_failures: AtomicU64,
        send_calls: AtomicU64,
        delivered: Mutex<Vec<LogRecord>>,
        delivered_events: Mutex<Vec<TelemetryEvent>>,
    }

    impl FlakySink {
        pub fn new(failures: u64) -> Self {
            Self {
                remaining_failures: AtomicU64::new(failures),
                ..Default::default()
            }
        }

        pub fn send_calls(&self) -> u64 {
            self.send_calls.load(Ordering::SeqCst)
        }

        pub fn delivered(&self) -> Vec<LogRecord> {
            self.delivered.lock().unwrap().clone()
        }

        pub fn delivered_events(&self) -> Vec<TelemetryEvent> {
            self.delivered_events.lock().unwrap().clone()
        }

        fn should_fail(&self) -> bool {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            self.remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl LogSink for FlakySink {
        async fn send(&self, batch: Vec<LogRecord>) -> Result<(), SinkError> {
            if self.should_fail() {
                return Err(SinkError::Unavailable("collector offline".to_string()));
            }
            self.delivered.lock().unwrap().extend(batch);
            Ok(())
        }

        async fn send_telemetry(&self, batch: Vec<TelemetryEvent>) -> Result<(), SinkError> {
            if self.should_fail() {
                return Err(SinkError::Unavailable("collector offline".to_string()));
            }
            self.delivered_events.lock().unwrap().extend(batch);
            Ok(())
        }
    }

    /// Wait for a condition with timeout
    pub async fn wait_for_condition<F>(
        mut condition: F,
        timeout_duration: Duration,
        check_interval: Duration,
    ) -> anyhow::Result<()>
    where
        F: FnMut() -> bool,
    {
        let start = tokio::time::Instant::now();
        while start.elapsed() < timeout_duration {
            if condition() {
                return Ok(());
            }
            tokio::time::sleep(check_interval).await;
        }
        anyhow::bail!("Condition timeout")
    }
}
