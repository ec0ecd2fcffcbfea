//! Rolling operation timings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// One timed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub operation: String,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate timings for one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub operation: String,
    pub count: u64,
    pub mean_ms: f64,
    pub last_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl OperationStats {
    fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            count: 0,
            mean_ms: 0.0,
            last_ms: 0.0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
        }
    }

    fn observe(&mut self, duration_ms: f64) {
        self.count += 1;
        self.mean_ms += (duration_ms - self.mean_ms) / self.count as f64;
        self.last_ms = duration_ms;
        self.min_ms = self.min_ms.min(duration_ms);
        self.max_ms = self.max_ms.max(duration_ms);
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    samples: VecDeque<PerformanceSample>,
    operations: HashMap<String, OperationStats>,
}

/// Records operation durations with a bounded sample window
#[derive(Debug)]
pub struct PerformanceTracker {
    window: usize,
    state: Mutex<TrackerState>,
}

impl PerformanceTracker {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            state: Mutex::new(TrackerState {
                samples: VecDeque::with_capacity(window),
                ..Default::default()
            }),
        }
    }

    pub fn record(&self, operation: &str, duration_ms: f64) {
        let sample = PerformanceSample {
            operation: operation.to_string(),
            duration_ms,
            timestamp: Utc::now(),
        };

        let mut state = crate::lock(&self.state);
        state.samples.push_back(sample);
        while state.samples.len() > self.window {
            state.samples.pop_front();
        }

        match state.operations.get_mut(operation) {
            Some(stats) => stats.observe(duration_ms),
            None => {
                let mut stats = OperationStats::new(operation);
                stats.observe(duration_ms);
                state.operations.insert(operation.to_string(), stats);
            }
        }
    }

    /// Cumulative mean for `operation`, 0 if never recorded
    pub fn average_for(&self, operation: &str) -> f64 {
        crate::lock(&self.state)
            .operations
            .get(operation)
            .map_or(0.0, |stats| stats.mean_ms)
    }

    /// Mean of the samples currently in the window, 0 if empty
    pub fn recent_average(&self) -> f64 {
        let state = crate::lock(&self.state);
        if state.samples.is_empty() {
            return 0.0;
        }
        state.samples.iter().map(|s| s.duration_ms).sum::<f64>() / state.samples.len() as f64
    }

    pub fn recent_samples(&self) -> Vec<PerformanceSample> {
        crate::lock(&self.state).samples.iter().cloned().collect()
    }

    pub fn sample_count(&self) -> usize {
        crate::lock(&self.state).samples.len()
    }

    /// Per-operation statistics sorted by operation name
    pub fn summary(&self) -> Vec<OperationStats> {
        let state = crate::lock(&self.state);
        let mut stats: Vec<OperationStats> = state.operations.values().cloned().collect();
        stats.sort_by(|a, b| a.operation.cmp(&b.operation));
        stats
    }
}
