//! Agent liveness and eviction cascade tests

use std::collections::BTreeSet;
use std::time::Duration;

use measure_engine::agents::LivenessSweeper;
use pretty_assertions::assert_eq;

use crate::helpers::{engine, local_instance, remote_instance};

/// Short sweep period so tests age agents quickly; the staleness threshold
/// equals the period.
const SWEEP_PERIOD: Duration = Duration::from_millis(100);

#[tokio::test]
async fn sweep_leaves_fresh_agents_alone() {
    let engine = engine();
    let sweeper = LivenessSweeper::spawn(
        engine.registry.clone(),
        engine.scheduler.clone(),
        engine.instances.clone(),
        SWEEP_PERIOD,
    );

    engine
        .registry
        .register_agent("agent1", BTreeSet::from(["fixed".to_string()]))
        .await;

    let evicted = sweeper.sweep_now().await.unwrap();
    assert_eq!(evicted, 0);
    assert!(engine.registry.is_alive("agent1").await);

    sweeper.shutdown().await;
}

#[tokio::test]
async fn heartbeats_keep_an_agent_registered() {
    let engine = engine();
    let sweeper = LivenessSweeper::spawn(
        engine.registry.clone(),
        engine.scheduler.clone(),
        engine.instances.clone(),
        SWEEP_PERIOD,
    );

    engine
        .registry
        .register_agent("agent1", BTreeSet::from(["fixed".to_string()]))
        .await;

    for _ in 0..4 {
        tokio::time::sleep(SWEEP_PERIOD / 2).await;
        assert!(engine.registry.register_life_sign("agent1").await);
    }

    let evicted = sweeper.sweep_now().await.unwrap();
    assert_eq!(evicted, 0);
    assert!(engine.registry.is_alive("agent1").await);

    sweeper.shutdown().await;
}

#[tokio::test]
async fn eviction_cascades_across_the_whole_population() {
    let engine = engine();
    let sweeper = LivenessSweeper::spawn(
        engine.registry.clone(),
        engine.scheduler.clone(),
        engine.instances.clone(),
        SWEEP_PERIOD,
    );

    engine
        .registry
        .register_agent("agent1", BTreeSet::from(["fixed".to_string()]))
        .await;

    // A remote instance assigned to agent1, plus a *local* instance of the
    // same measure: the cascade matches by measure name across the whole
    // population, not just the agent's own assignments.
    let assigned = remote_instance(1, "fixed", "agent1");
    engine.instances.insert(assigned.clone()).await;
    assert!(engine.scheduler.schedule_measure(&assigned).await);

    let unrelated_local = local_instance(2, "fixed", Some("60000"));
    engine.instances.insert(unrelated_local.clone()).await;
    assert!(engine.scheduler.schedule_measure(&unrelated_local).await);

    // A local instance of a different measure survives the cascade.
    let other_measure = local_instance(3, "aggregate", Some("60000"));
    engine.instances.insert(other_measure.clone()).await;
    assert!(engine.scheduler.schedule_measure(&other_measure).await);

    // Let the agent's life sign expire, then force a sweep. (A periodic
    // tick may have evicted it already; the outcome is the same.)
    tokio::time::sleep(SWEEP_PERIOD * 2).await;
    sweeper.sweep_now().await.unwrap();

    assert!(!engine.registry.is_alive("agent1").await);
    assert!(!engine.scheduler.is_scheduled(1).await);
    assert!(engine.scheduler.assignments("agent1").await.is_empty());
    assert!(
        !engine.scheduler.is_scheduled(2).await,
        "population-wide cascade unschedules local instances of the same measure"
    );
    assert!(
        engine.scheduler.is_scheduled(3).await,
        "instances of measures the agent never provided keep running"
    );

    sweeper.shutdown().await;
}

#[tokio::test]
async fn periodic_sweep_evicts_without_manual_trigger() {
    let engine = engine();
    let sweeper = LivenessSweeper::spawn(
        engine.registry.clone(),
        engine.scheduler.clone(),
        engine.instances.clone(),
        SWEEP_PERIOD,
    );

    engine
        .registry
        .register_agent("agent1", BTreeSet::from(["fixed".to_string()]))
        .await;

    // is_alive does not enforce the threshold itself: past the threshold but
    // before the sweep, the agent still reports alive.
    tokio::time::sleep(SWEEP_PERIOD + Duration::from_millis(20)).await;
    // (May or may not still be alive depending on sweep timing; after
    // several periods it must be gone.)
    tokio::time::sleep(SWEEP_PERIOD * 3).await;
    assert!(!engine.registry.is_alive("agent1").await);

    sweeper.shutdown().await;
}
