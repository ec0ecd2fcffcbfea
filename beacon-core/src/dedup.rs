//! Suppression of repeated log records
//!
//! Records are keyed by level, context and message. A key seen again within
//! the cooldown window is suppressed, and every sighting (suppressed or not)
//! restarts that key's cooldown. The table is bounded: when it grows past
//! `max_keys` the least recently seen key is evicted.

use crate::config::DedupConfig;
use crate::record::Level;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Composite key of a log call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    level: Level,
    context: String,
    message: String,
}

impl DedupKey {
    pub fn new(level: Level, context: &str, message: &str) -> Self {
        Self {
            level,
            context: context.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct DedupTable {
    last_seen: HashMap<DedupKey, Instant>,
}

impl DedupTable {
    fn evict_least_recent(&mut self) {
        let oldest = self
            .last_seen
            .iter()
            .min_by_key(|(_, seen)| **seen)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.last_seen.remove(&key);
        }
    }
}

/// Cooldown-based deduplication filter
#[derive(Debug)]
pub struct DeduplicationFilter {
    enabled: bool,
    cooldown: Duration,
    max_keys: usize,
    table: Mutex<DedupTable>,
    suppressed: AtomicU64,
    evicted: AtomicU64,
}

impl DeduplicationFilter {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            enabled: config.enabled,
            cooldown: config.cooldown(),
            max_keys: config.max_keys,
            table: Mutex::new(DedupTable::default()),
            suppressed: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Check a log call against the filter at the current instant
    pub fn should_suppress(&self, key: &DedupKey) -> bool {
        self.should_suppress_at(key, Instant::now())
    }

    /// Check a log call against the filter at `now`
    ///
    /// Returns true iff the key was seen less than one cooldown ago. The
    /// key's last-seen time is updated either way. `Error` records are never
    /// tracked or suppressed.
    pub fn should_suppress_at(&self, key: &DedupKey, now: Instant) -> bool {
        if !self.enabled || key.level == Level::Error {
            return false;
        }

        let mut table = crate::lock(&self.table);
        let suppress = table
            .last_seen
            .get(key)
            .is_some_and(|seen| now.saturating_duration_since(*seen) < self.cooldown);

        if table.last_seen.insert(key.clone(), now).is_none()
            && table.last_seen.len() > self.max_keys
        {
            table.evict_least_recent();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        drop(table);

        if suppress {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
        }
        suppress
    }

    /// Drop keys whose cooldown has expired
    pub fn prune_at(&self, now: Instant) -> usize {
        let mut table = crate::lock(&self.table);
        let before = table.last_seen.len();
        let cooldown = self.cooldown;
        table
            .last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) < cooldown);
        before - table.last_seen.len()
    }

    pub fn tracked_keys(&self) -> usize {
        crate::lock(&self.table).last_seen.len()
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}
