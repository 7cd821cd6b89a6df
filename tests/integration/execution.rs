//! On-demand execution tests: immediate, external and dry-run modes

use chrono::{TimeZone, Utc};
use measure_engine::logging::ExecutionLogSink;
use measure_engine::store::{MeasurementStore, PropertyStore};
use measure_engine::{MASKED_VALUE, MeasureProperty, MeasureReference, Measurement};
use pretty_assertions::assert_eq;

use crate::helpers::{engine, local_instance};

#[tokio::test]
async fn immediate_execution_persists_and_reports() {
    let engine = engine();
    engine.instances.insert(local_instance(1, "fixed", Some("5000"))).await;

    let log = engine.executor.execute_by_id(1).await.unwrap();
    assert!(log.success);
    assert_eq!(log.measurements.len(), 1);

    let stored = engine.measurements.query("inst-1", 10, None).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get("value"), Some(&serde_json::json!(42)));
}

#[tokio::test]
async fn external_execution_stamps_the_date_field() {
    let engine = engine();
    engine.instances.insert(local_instance(1, "fixed", Some("5000"))).await;

    let timestamp = Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap();
    let log = engine
        .executor
        .execute_external(1, timestamp, "observed_at")
        .await
        .unwrap();

    assert!(log.success);
    assert_eq!(log.executed_at, timestamp);

    let stored = engine.measurements.query("inst-1", 10, None).await.unwrap();
    assert_eq!(
        stored[0].get("observed_at"),
        Some(&serde_json::json!(timestamp.to_rfc3339()))
    );
    // The original payload survives next to the stamp.
    assert_eq!(stored[0].get("value"), Some(&serde_json::json!(42)));
}

#[tokio::test]
async fn dry_run_persists_nothing() {
    let engine = engine();
    engine.instances.insert(local_instance(1, "fixed", Some("5000"))).await;
    engine
        .properties
        .insert(MeasureProperty::plain(1, "cursor", "initial"))
        .await;

    let log = engine.executor.test_measure(1).await.unwrap();
    assert!(log.success);
    assert_eq!(log.measurements.len(), 1);

    // No measurement was stored, no property was written back.
    assert!(engine.measurements.is_empty().await);
    let props = engine.properties.by_instance(1).await.unwrap();
    assert_eq!(props[0].value, "initial");
}

#[tokio::test]
async fn derived_execution_end_to_end() {
    let engine = engine();

    // A source stream with three samples.
    for value in [10, 20, 30] {
        engine
            .measurements
            .put("probe-a", Measurement::new().with_value("value", value))
            .await
            .unwrap();
    }

    // A derived instance averaging the two most recent samples.
    engine.instances.insert(local_instance(2, "aggregate", Some("5000"))).await;
    engine
        .properties
        .insert(MeasureProperty::plain(2, "function", "avg"))
        .await;
    engine
        .references
        .add(MeasureReference {
            instance_id: 2,
            role: "operand".to_string(),
            referenced_instance: "probe-a".to_string(),
            max_values: 2,
            filter: None,
        })
        .await;

    let log = engine.executor.execute_by_id(2).await.unwrap();
    assert!(log.success, "log: {log:?}");

    // Inputs recorded: the two newest samples (30 and 20).
    assert_eq!(log.inputs.len(), 2);
    assert_eq!(log.measurements[0].get("avg"), Some(&serde_json::json!(25.0)));

    let stored = engine.measurements.query("inst-2", 10, None).await.unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn logs_never_leak_secret_values() {
    let engine = engine();
    engine.instances.insert(local_instance(1, "fixed", Some("5000"))).await;
    engine
        .properties
        .insert(MeasureProperty::secret(1, "api_key", "s3cret-value"))
        .await;

    let log = engine.executor.execute_by_id(1).await.unwrap();
    engine.logs.record(log).await;

    let recorded = engine.logs.recent(1).await;
    let serialized = serde_json::to_string(&recorded[0]).unwrap();
    assert!(!serialized.contains("s3cret-value"));

    let parameter = recorded[0]
        .parameters
        .iter()
        .find(|p| p.name == "api_key")
        .unwrap();
    assert_eq!(parameter.value, MASKED_VALUE);
}
