//! Scheduling state machine tests

use std::collections::BTreeSet;

use measure_engine::MeasureProperty;
use measure_engine::store::MeasurementStore;
use pretty_assertions::assert_eq;

use crate::helpers::{engine, eventually, local_instance, remote_instance};

#[tokio::test]
async fn unusable_scheduling_expressions_reject_without_side_effects() {
    let engine = engine();

    for expression in [None, Some(""), Some("0"), Some("abc"), Some("5s"), Some("-1")] {
        let instance = local_instance(1, "fixed", expression);
        assert!(
            !engine.scheduler.schedule_measure(&instance).await,
            "expression {expression:?} should reject"
        );
        assert!(!engine.scheduler.is_scheduled(1).await);
    }

    // No job bookkeeping means no executions and no measurements.
    assert!(engine.measurements.is_empty().await);
}

#[tokio::test]
async fn unscheduled_flag_rejects() {
    let engine = engine();
    let mut instance = local_instance(1, "fixed", Some("5000"));
    instance.scheduled = false;

    assert!(!engine.scheduler.schedule_measure(&instance).await);
    assert!(!engine.scheduler.is_scheduled(1).await);
}

#[tokio::test]
async fn unresolvable_measure_rejects() {
    let engine = engine();
    let instance = local_instance(1, "no-such-measure", Some("5000"));

    assert!(!engine.scheduler.schedule_measure(&instance).await);
    assert!(!engine.scheduler.is_scheduled(1).await);
}

#[tokio::test]
async fn local_schedule_runs_and_persists() {
    let engine = engine();
    let instance = local_instance(1, "fixed", Some("5000"));

    assert!(engine.scheduler.schedule_measure(&instance).await);
    assert!(engine.scheduler.is_scheduled(1).await);

    // The first tick fires immediately; the log is recorded after the
    // measurement is persisted.
    let logs = engine.logs.clone();
    assert!(
        eventually(|| {
            let logs = logs.clone();
            async move { !logs.recent(1).await.is_empty() }
        })
        .await,
        "first tick never completed"
    );

    let stored = engine.measurements.query("inst-1", 10, None).await.unwrap();
    assert_eq!(stored[0].get("value"), Some(&serde_json::json!(42)));

    let logs = engine.logs.recent(10).await;
    assert!(logs[0].success);
    assert_eq!(logs[0].instance_name, "inst-1");

    // Still scheduled after a successful cycle.
    assert!(engine.scheduler.is_scheduled(1).await);

    engine.scheduler.remove_measure(1).await;
    assert!(!engine.scheduler.is_scheduled(1).await);
}

#[tokio::test]
async fn first_failure_unschedules_the_job() {
    let engine = engine();
    let instance = local_instance(1, "broken", Some("1000"));

    assert!(engine.scheduler.schedule_measure(&instance).await);

    let scheduler = engine.scheduler.clone();
    assert!(
        eventually(|| {
            let scheduler = scheduler.clone();
            async move { !scheduler.is_scheduled(1).await }
        })
        .await,
        "failed job was never unscheduled"
    );

    let logs = engine.logs.recent(10).await;
    assert_eq!(logs.len(), 1, "one failure is fatal: no retry ticks");
    assert!(!logs[0].success);
    assert_eq!(logs[0].error.as_deref(), Some("probe is broken"));
}

#[tokio::test]
async fn remove_measure_is_idempotent() {
    let engine = engine();

    // Removing an id that never had a job is a no-op returning true.
    assert!(engine.scheduler.remove_measure(123).await);

    let instance = local_instance(5, "fixed", Some("5000"));
    assert!(engine.scheduler.schedule_measure(&instance).await);
    assert!(engine.scheduler.remove_measure(5).await);
    assert!(engine.scheduler.remove_measure(5).await);
    assert!(!engine.scheduler.is_scheduled(5).await);
}

#[tokio::test]
async fn remote_schedule_requires_a_live_agent() {
    let engine = engine();
    let instance = remote_instance(2, "fixed", "agent1");

    // agent1 is not registered: reject, no assignment created.
    assert!(!engine.scheduler.schedule_measure(&instance).await);
    assert!(engine.scheduler.assignments("agent1").await.is_empty());

    engine
        .registry
        .register_agent("agent1", BTreeSet::from(["fixed".to_string()]))
        .await;

    assert!(engine.scheduler.schedule_measure(&instance).await);
    assert!(engine.scheduler.is_scheduled(2).await);
}

#[tokio::test]
async fn assignments_rehydrate_unmasked_properties() {
    let engine = engine();
    engine.instances.insert(remote_instance(3, "fixed", "agent1")).await;
    engine
        .properties
        .insert(MeasureProperty::secret(3, "token", "hunter2"))
        .await;
    engine
        .properties
        .insert(MeasureProperty::plain(3, "url", "http://example"))
        .await;

    engine
        .registry
        .register_agent("agent1", BTreeSet::from(["fixed".to_string()]))
        .await;
    let instance = remote_instance(3, "fixed", "agent1");
    assert!(engine.scheduler.schedule_measure(&instance).await);

    let specs = engine.scheduler.assignments("agent1").await;
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].instance_id, 3);
    assert_eq!(specs[0].measure_name, "fixed");

    // The agent needs real credentials: nothing is masked here.
    assert_eq!(
        specs[0].properties.get("token"),
        Some(&"hunter2".to_string())
    );
    assert_eq!(
        specs[0].properties.get("url"),
        Some(&"http://example".to_string())
    );
}

#[tokio::test]
async fn dead_agent_assignment_reports_unscheduled_without_purge() {
    let engine = engine();
    engine
        .registry
        .register_agent("agent1", BTreeSet::from(["fixed".to_string()]))
        .await;

    let instance = remote_instance(4, "fixed", "agent1");
    engine.instances.insert(instance.clone()).await;
    assert!(engine.scheduler.schedule_measure(&instance).await);
    assert!(engine.scheduler.is_scheduled(4).await);

    // The agent dies. The assignment stays (only the sweep purges), but the
    // instance reports unscheduled.
    engine.registry.unregister("agent1").await;
    assert!(!engine.scheduler.is_scheduled(4).await);
    assert_eq!(engine.scheduler.assignments("agent1").await.len(), 1);
}

#[tokio::test]
async fn remove_measure_drops_remote_assignments() {
    let engine = engine();
    engine
        .registry
        .register_agent("agent1", BTreeSet::from(["fixed".to_string()]))
        .await;

    let instance = remote_instance(6, "fixed", "agent1");
    assert!(engine.scheduler.schedule_measure(&instance).await);
    assert!(engine.scheduler.remove_measure(6).await);

    assert!(!engine.scheduler.is_scheduled(6).await);
    assert!(engine.scheduler.assignments("agent1").await.is_empty());
}
