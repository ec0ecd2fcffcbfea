//! Composite health assessment
//!
//! The [`HealthMonitor`] folds the core's counters into a single
//! [`HealthReport`]. An instance is unhealthy when its circuit breaker is
//! open or when any metric exceeds its configured threshold; every exceeded
//! threshold is named in [`HealthReport::issues`].

use crate::circuit_breaker::CircuitState;
use crate::config::{HealthConfig, HealthThresholds};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::{Pid, System};

/// Result of one health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    /// Error-level records per second since the instance started
    pub error_rate: f64,
    pub memory_usage_mb: f64,
    /// Fill level of the fuller of the two buffers
    pub buffer_occupancy_percent: f64,
    pub average_operation_ms: f64,
    pub circuit_breaker_state: CircuitState,
    pub timestamp: DateTime<Utc>,

    pub instance_id: String,
    pub uptime_secs: f64,
    pub total_logs: u64,
    pub total_errors: u64,
    pub total_flushes: u64,
    pub internal_errors: u64,
    pub dropped_records: u64,
    pub failure_count: u32,
    pub issues: Vec<String>,
}

/// Raw figures gathered from an instance for a health check
#[derive(Debug, Clone)]
pub struct HealthInputs {
    pub instance_id: String,
    pub uptime: Duration,
    pub total_logs: u64,
    pub total_errors: u64,
    pub total_flushes: u64,
    pub internal_errors: u64,
    pub dropped_records: u64,
    pub buffer_occupancy_percent: f64,
    pub average_operation_ms: f64,
    pub circuit_breaker_state: CircuitState,
    pub failure_count: u32,
}

/// Resident memory of the current process
#[derive(Debug)]
struct MemoryProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl MemoryProbe {
    fn new() -> Self {
        Self {
            pid: sysinfo::get_current_pid().ok(),
            system: Mutex::new(System::new()),
        }
    }

    fn resident_mb(&self) -> f64 {
        let Some(pid) = self.pid else {
            return 0.0;
        };
        let mut system = crate::lock(&self.system);
        if !system.refresh_process(pid) {
            return 0.0;
        }
        system
            .process(pid)
            .map_or(0.0, |process| process.memory() as f64 / (1024.0 * 1024.0))
    }
}

/// Evaluates instance metrics against the configured thresholds
#[derive(Debug)]
pub struct HealthMonitor {
    thresholds: HealthThresholds,
    memory: Option<MemoryProbe>,
    last_report: Mutex<Option<HealthReport>>,
}

impl HealthMonitor {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            thresholds: config.thresholds.clone(),
            memory: config.track_memory.then(MemoryProbe::new),
            last_report: Mutex::new(None),
        }
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Evaluate `inputs` and cache the resulting report
    pub fn check(&self, inputs: HealthInputs) -> HealthReport {
        let memory_usage_mb = self.memory.as_ref().map_or(0.0, MemoryProbe::resident_mb);
        let report = evaluate(&self.thresholds, inputs, memory_usage_mb);
        *crate::lock(&self.last_report) = Some(report.clone());
        report
    }

    /// Most recent report, if a check has run
    pub fn last_report(&self) -> Option<HealthReport> {
        crate::lock(&self.last_report).clone()
    }
}

/// Errors per second, with uptime floored at one second
pub fn error_rate(total_errors: u64, uptime: Duration) -> f64 {
    total_errors as f64 / uptime.as_secs_f64().max(1.0)
}

fn evaluate(thresholds: &HealthThresholds, inputs: HealthInputs, memory_usage_mb: f64) -> HealthReport {
    let error_rate = error_rate(inputs.total_errors, inputs.uptime);
    let mut issues = Vec::new();

    if inputs.circuit_breaker_state == CircuitState::Open {
        issues.push("circuit breaker open".to_string());
    }
    if error_rate > thresholds.max_error_rate {
        issues.push(format!(
            "error rate {error_rate:.2}/s exceeds {:.2}/s",
            thresholds.max_error_rate
        ));
    }
    if memory_usage_mb > thresholds.max_memory_mb {
        issues.push(format!(
            "memory usage {memory_usage_mb:.1}MB exceeds {:.1}MB",
            thresholds.max_memory_mb
        ));
    }
    if inputs.buffer_occupancy_percent > thresholds.max_buffer_occupancy_percent {
        issues.push(format!(
            "buffer occupancy {:.1}% exceeds {:.1}%",
            inputs.buffer_occupancy_percent, thresholds.max_buffer_occupancy_percent
        ));
    }
    if inputs.average_operation_ms > thresholds.max_average_operation_ms {
        issues.push(format!(
            "average operation time {:.2}ms exceeds {:.2}ms",
            inputs.average_operation_ms, thresholds.max_average_operation_ms
        ));
    }

    HealthReport {
        healthy: issues.is_empty(),
        error_rate,
        memory_usage_mb,
        buffer_occupancy_percent: inputs.buffer_occupancy_percent,
        average_operation_ms: inputs.average_operation_ms,
        circuit_breaker_state: inputs.circuit_breaker_state,
        timestamp: Utc::now(),
        instance_id: inputs.instance_id,
        uptime_secs: inputs.uptime.as_secs_f64(),
        total_logs: inputs.total_logs,
        total_errors: inputs.total_errors,
        total_flushes: inputs.total_flushes,
        internal_errors: inputs.internal_errors,
        dropped_records: inputs.dropped_records,
        failure_count: inputs.failure_count,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> HealthInputs {
        HealthInputs {
            instance_id: "abc123".to_string(),
            uptime: Duration::from_secs(10),
            total_logs: 40,
            total_errors: 2,
            total_flushes: 3,
            internal_errors: 0,
            dropped_records: 0,
            buffer_occupancy_percent: 10.0,
            average_operation_ms: 0.5,
            circuit_breaker_state: CircuitState::Closed,
            failure_count: 0,
        }
    }

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(&HealthConfig {
            track_memory: false,
            ..Default::default()
        })
    }

    #[test]
    fn test_healthy_within_thresholds() {
        let report = monitor().check(inputs());

        assert!(report.healthy);
        assert!(report.issues.is_empty());
        assert_eq!(report.error_rate, 0.2);
        assert_eq!(report.memory_usage_mb, 0.0);
        assert_eq!(report.uptime_secs, 10.0);
        assert_eq!(report.instance_id, "abc123");
    }

    #[test]
    fn test_open_circuit_is_unhealthy() {
        let report = monitor().check(HealthInputs {
            circuit_breaker_state: CircuitState::Open,
            failure_count: 5,
            ..inputs()
        });

        assert!(!report.healthy);
        assert_eq!(report.circuit_breaker_state, CircuitState::Open);
        assert_eq!(report.issues, vec!["circuit breaker open".to_string()]);
    }

    #[test]
    fn test_half_open_alone_is_healthy() {
        let report = monitor().check(HealthInputs {
            circuit_breaker_state: CircuitState::HalfOpen,
            ..inputs()
        });
        assert!(report.healthy);
    }

    #[test]
    fn test_each_threshold_reported() {
        let report = monitor().check(HealthInputs {
            total_errors: 50,
            buffer_occupancy_percent: 95.0,
            average_operation_ms: 250.0,
            ..inputs()
        });

        assert!(!report.healthy);
        assert_eq!(report.issues.len(), 3);
        assert!(report.issues[0].starts_with("error rate"));
        assert!(report.issues[1].starts_with("buffer occupancy"));
        assert!(report.issues[2].starts_with("average operation time"));
    }

    #[test]
    fn test_error_rate_floors_uptime() {
        assert_eq!(error_rate(3, Duration::from_millis(10)), 3.0);
        assert_eq!(error_rate(0, Duration::ZERO), 0.0);
        assert_eq!(error_rate(30, Duration::from_secs(60)), 0.5);
    }

    #[test]
    fn test_last_report_cached() {
        let monitor = monitor();
        assert!(monitor.last_report().is_none());

        let report = monitor.check(inputs());
        assert_eq!(monitor.last_report(), Some(report));
    }

    #[test]
    fn test_memory_probe_reads_current_process() {
        let monitor = HealthMonitor::new(&HealthConfig::default());
        let report = monitor.check(inputs());
        assert!(report.memory_usage_mb >= 0.0);
    }

    #[test]
    fn test_report_serializes() {
        let report = monitor().check(inputs());
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["healthy"], true);
        assert_eq!(json["circuit_breaker_state"], "Closed");
        assert_eq!(json["total_logs"], 40);
    }
}
