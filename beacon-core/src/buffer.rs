//! Size- and time-triggered batching
//!
//! [`BufferAggregator`] is generic over the entry type and is instantiated
//! once for log records and once for telemetry events. Draining is a swap of
//! the entry vector under the buffer's lock, so an entry is either in the
//! drained batch or still buffered, never both. The aggregator does no I/O:
//! drained batches are returned to the caller, which hands them to the sink
//! dispatcher.

use crate::config::BufferConfig;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Why a buffer was drained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    /// The size threshold was reached
    Size,
    /// The time threshold elapsed
    Time,
    /// The next append would have exceeded the hard maximum
    Overflow,
    /// Explicit flush request
    Manual,
    /// Final flush during shutdown
    Shutdown,
    /// Sent right away to test a half-open circuit
    Probe,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Size => "size",
            FlushReason::Time => "time",
            FlushReason::Overflow => "overflow",
            FlushReason::Manual => "manual",
            FlushReason::Shutdown => "shutdown",
            FlushReason::Probe => "probe",
        }
    }
}

/// Entries removed from a buffer in one drain
#[derive(Debug)]
pub struct DrainedBatch<T> {
    pub entries: Vec<T>,
    pub reason: FlushReason,
}

impl<T> DrainedBatch<T> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of an append
#[derive(Debug)]
pub enum AppendOutcome<T> {
    /// The entry is buffered; any batches drained around it are returned
    Buffered(Vec<DrainedBatch<T>>),
    /// The buffer could not make room; the entry was dropped
    Rejected(T),
}

#[derive(Debug)]
struct BufferState<T> {
    entries: Vec<T>,
    last_flush_at: Instant,
}

/// Bounded batching buffer drained on size, time or overflow
#[derive(Debug)]
pub struct BufferAggregator<T> {
    name: &'static str,
    size_threshold: usize,
    time_threshold: Duration,
    hard_max: usize,
    state: Mutex<BufferState<T>>,
    flushes: AtomicU64,
    flushed_entries: AtomicU64,
}

impl<T> BufferAggregator<T> {
    pub fn new(name: &'static str, config: &BufferConfig) -> Self {
        Self::new_at(name, config, Instant::now())
    }

    pub fn new_at(name: &'static str, config: &BufferConfig, now: Instant) -> Self {
        let hard_max = config.hard_max.max(1);
        Self {
            name,
            size_threshold: config.size_threshold.max(1),
            time_threshold: config.time_threshold(),
            hard_max,
            state: Mutex::new(BufferState {
                entries: Vec::with_capacity(config.size_threshold.min(hard_max)),
                last_flush_at: now,
            }),
            flushes: AtomicU64::new(0),
            flushed_entries: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn append(&self, entry: T) -> AppendOutcome<T> {
        self.append_at(entry, Instant::now())
    }

    /// Append an entry, draining before it on overflow and after it when a
    /// threshold is reached
    pub fn append_at(&self, entry: T, now: Instant) -> AppendOutcome<T> {
        let mut state = crate::lock(&self.state);
        let mut drained = Vec::new();

        if state.entries.len() + 1 > self.hard_max {
            drained.push(self.drain_locked(&mut state, now, FlushReason::Overflow));
        }
        if state.entries.len() >= self.hard_max {
            return AppendOutcome::Rejected(entry);
        }

        state.entries.push(entry);

        if state.entries.len() >= self.size_threshold {
            drained.push(self.drain_locked(&mut state, now, FlushReason::Size));
        } else if now.saturating_duration_since(state.last_flush_at) >= self.time_threshold {
            drained.push(self.drain_locked(&mut state, now, FlushReason::Time));
        }

        AppendOutcome::Buffered(drained)
    }

    /// Drain unconditionally
    pub fn flush(&self, reason: FlushReason) -> DrainedBatch<T> {
        self.flush_at(Instant::now(), reason)
    }

    pub fn flush_at(&self, now: Instant, reason: FlushReason) -> DrainedBatch<T> {
        let mut state = crate::lock(&self.state);
        self.drain_locked(&mut state, now, reason)
    }

    /// Drain if the time threshold has elapsed since the last flush
    pub fn flush_if_due_at(&self, now: Instant) -> Option<DrainedBatch<T>> {
        let mut state = crate::lock(&self.state);
        if now.saturating_duration_since(state.last_flush_at) >= self.time_threshold {
            Some(self.drain_locked(&mut state, now, FlushReason::Time))
        } else {
            None
        }
    }

    fn drain_locked(
        &self,
        state: &mut BufferState<T>,
        now: Instant,
        reason: FlushReason,
    ) -> DrainedBatch<T> {
        let capacity = self.size_threshold.min(self.hard_max);
        let entries = std::mem::replace(&mut state.entries, Vec::with_capacity(capacity));
        state.last_flush_at = now;
        if !entries.is_empty() {
            self.flushes.fetch_add(1, Ordering::Relaxed);
            self.flushed_entries
                .fetch_add(entries.len() as u64, Ordering::Relaxed);
        }
        DrainedBatch { entries, reason }
    }

    pub fn len(&self) -> usize {
        crate::lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill level relative to the hard maximum, in percent
    pub fn occupancy_percent(&self) -> f64 {
        self.len() as f64 / self.hard_max as f64 * 100.0
    }

    /// Number of drains that carried at least one entry
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn flushed_entries(&self) -> u64 {
        self.flushed_entries.load(Ordering::Relaxed)
    }

    pub fn last_flush_at(&self) -> Instant {
        crate::lock(&self.state).last_flush_at
    }

    pub fn time_threshold(&self) -> Duration {
        self.time_threshold
    }
}
