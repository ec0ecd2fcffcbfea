//! Several core instances sharing one registry

use crate::test_utils::*;
use beacon_core::{
    CircuitBreakerConfig, CircuitState, InstanceRegistry, MemorySink, ObservabilityConfig,
    ObservabilityCore,
};
use std::sync::Arc;
use std::time::Duration;

fn start_instance(
    registry: &InstanceRegistry,
    config: ObservabilityConfig,
) -> (ObservabilityCore, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let core = ObservabilityCore::start(config, sink.clone(), Some(registry.clone())).unwrap();
    (core, sink)
}

#[tokio::test(start_paused = true)]
async fn test_fleet_report_aggregates_instances() {
    let registry = InstanceRegistry::new();
    let (editor, _) = start_instance(&registry, test_config());
    let (viewer, _) = start_instance(&registry, test_config());
    let (player, player_sink) = start_instance(
        &registry,
        ObservabilityConfig {
            circuit_breaker: CircuitBreakerConfig {
                max_failures: 1,
                recovery_timeout_ms: 60_000,
            },
            ..test_config()
        },
    );

    assert_eq!(registry.len(), 3);

    editor.info("editor", "document opened", None);
    editor.error("editor", "autosave failed", None);
    viewer.info("viewer", "page rendered", None);
    player_sink.set_failing(true);
    player.info("player", "media missing", None);
    assert_eq!(player.circuit_state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let report = registry.aggregate_report();

    assert_eq!(report.instance_count, 3);
    assert_eq!(report.unhealthy_count, 1);
    assert!(!report.all_healthy());
    assert_eq!(report.total_logs, 3);
    assert_eq!(report.total_errors, 1);
    assert_eq!(report.average_uptime_secs, 10.0);

    let unhealthy: Vec<&str> = report
        .reports
        .iter()
        .filter(|r| !r.healthy)
        .map(|r| r.instance_id.as_str())
        .collect();
    assert_eq!(unhealthy, vec![player.instance_id()]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_leaves_the_fleet() {
    let registry = InstanceRegistry::new();
    let (first, _) = start_instance(&registry, test_config());
    let (second, _) = start_instance(&registry, test_config());

    first.shutdown().await;

    assert_eq!(registry.instance_ids(), vec![second.instance_id().to_string()]);
    assert_eq!(registry.aggregate_report().instance_count, 1);

    second.shutdown().await;
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_instance_pruned_from_report() {
    let registry = InstanceRegistry::new();
    let (kept, _) = start_instance(&registry, test_config());
    {
        let (dropped, _) = start_instance(&registry, test_config());
        dropped.info("temp", "short lived", None);
    }

    // Let the dropped instance's background tasks notice and exit
    tokio::task::yield_now().await;

    let report = registry.aggregate_report();
    assert_eq!(report.instance_count, 1);
    assert_eq!(report.reports[0].instance_id, kept.instance_id());
    assert_eq!(registry.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_instances_have_distinct_identities() {
    let registry = InstanceRegistry::new();
    let (a, sink_a) = start_instance(&registry, test_config());
    let (b, sink_b) = start_instance(&registry, test_config());

    assert_ne!(a.instance_id(), b.instance_id());
    assert_ne!(a.session_id(), b.session_id());

    a.info("shared", "same message", None);
    b.info("shared", "same message", None);

    // Deduplication is per instance
    assert_eq!(sink_a.emitted().len(), 1);
    assert_eq!(sink_b.emitted().len(), 1);
    assert_eq!(sink_a.emitted()[0].instance_id(), a.instance_id());
}
