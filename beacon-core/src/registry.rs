//! Registry of live core instances
//!
//! An [`InstanceRegistry`] is an explicit handle shared by every core that
//! should appear in a fleet-wide report. It holds weak references only, so a
//! registered instance that is dropped without shutting down is pruned on
//! the next aggregation instead of being kept alive.

use crate::health::HealthReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Something that can report its own health
pub trait HealthSource: Send + Sync {
    /// Key the instance is registered under
    fn instance_id(&self) -> &str;

    /// Run a fresh health check
    fn check_health(&self) -> HealthReport;
}

/// Registry entry for one instance
#[derive(Clone)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub registered_at: DateTime<Utc>,
    handle: Weak<dyn HealthSource>,
}

impl InstanceRecord {
    pub fn is_alive(&self) -> bool {
        self.handle.strong_count() > 0
    }
}

impl std::fmt::Debug for InstanceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRecord")
            .field("instance_id", &self.instance_id)
            .field("registered_at", &self.registered_at)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Aggregated health across every registered instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetReport {
    pub instance_count: usize,
    pub unhealthy_count: usize,
    pub total_logs: u64,
    pub total_errors: u64,
    pub total_flushes: u64,
    pub average_uptime_secs: f64,
    pub reports: Vec<HealthReport>,
    pub timestamp: DateTime<Utc>,
}

impl FleetReport {
    pub fn all_healthy(&self) -> bool {
        self.unhealthy_count == 0
    }
}

#[derive(Clone, Default)]
pub struct InstanceRegistry {
    instances: Arc<Mutex<HashMap<String, InstanceRecord>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, source: &Arc<dyn HealthSource>) {
        let instance_id = source.instance_id().to_string();
        let record = InstanceRecord {
            instance_id: instance_id.clone(),
            registered_at: Utc::now(),
            handle: Arc::downgrade(source),
        };
        crate::lock(&self.instances).insert(instance_id, record);
    }

    /// Remove an instance; returns whether it was registered
    pub fn unregister(&self, instance_id: &str) -> bool {
        crate::lock(&self.instances).remove(instance_id).is_some()
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        crate::lock(&self.instances).contains_key(instance_id)
    }

    pub fn len(&self) -> usize {
        crate::lock(&self.instances).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered instance ids, sorted
    pub fn instance_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = crate::lock(&self.instances).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn records(&self) -> Vec<InstanceRecord> {
        crate::lock(&self.instances).values().cloned().collect()
    }

    /// Check every live instance and fold the results
    pub fn aggregate_report(&self) -> FleetReport {
        let live: Vec<Arc<dyn HealthSource>> = {
            let mut instances = crate::lock(&self.instances);
            instances.retain(|_, record| record.is_alive());
            instances
                .values()
                .filter_map(|record| record.handle.upgrade())
                .collect()
        };

        // Checks run outside the registry lock
        let mut reports: Vec<HealthReport> = live.iter().map(|s| s.check_health()).collect();
        reports.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));

        let instance_count = reports.len();
        let average_uptime_secs = if instance_count == 0 {
            0.0
        } else {
            reports.iter().map(|r| r.uptime_secs).sum::<f64>() / instance_count as f64
        };

        FleetReport {
            instance_count,
            unhealthy_count: reports.iter().filter(|r| !r.healthy).count(),
            total_logs: reports.iter().map(|r| r.total_logs).sum(),
            total_errors: reports.iter().map(|r| r.total_errors).sum(),
            total_flushes: reports.iter().map(|r| r.total_flushes).sum(),
            average_uptime_secs,
            reports,
            timestamp: Utc::now(),
        }
    }
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("instances", &self.instance_ids())
            .finish()
    }
}
