//! Test helpers and fixtures for the engine integration tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use measure_engine::{
    MeasureInstance, Measurement,
    agents::AgentRegistry,
    catalog::{DirectMeasure, MeasureCatalog, MeasureImplementation, PropertyBag},
    executor::Executor,
    logging::MemoryLogSink,
    measures::BuiltinCatalog,
    scheduler::Scheduler,
    store::memory::{
        MemoryInstanceDirectory, MemoryMeasurementStore, MemoryPropertyStore, MemoryReferenceStore,
    },
};

/// Direct measure producing a single fixed-value measurement.
pub struct FixedValueMeasure {
    pub value: i64,
}

#[async_trait]
impl DirectMeasure for FixedValueMeasure {
    async fn read(&mut self, _: &mut PropertyBag) -> anyhow::Result<Vec<Measurement>> {
        Ok(vec![Measurement::new().with_value("value", self.value)])
    }
}

/// Direct measure that fails on every cycle.
pub struct AlwaysFailsMeasure;

#[async_trait]
impl DirectMeasure for AlwaysFailsMeasure {
    async fn read(&mut self, _: &mut PropertyBag) -> anyhow::Result<Vec<Measurement>> {
        anyhow::bail!("probe is broken")
    }
}

/// A fully wired engine on in-memory stores.
pub struct Engine {
    pub instances: Arc<MemoryInstanceDirectory>,
    pub properties: Arc<MemoryPropertyStore>,
    pub references: Arc<MemoryReferenceStore>,
    pub measurements: Arc<MemoryMeasurementStore>,
    pub registry: Arc<AgentRegistry>,
    pub logs: Arc<MemoryLogSink>,
    pub executor: Arc<Executor>,
    pub scheduler: Arc<Scheduler>,
}

/// Build an engine whose catalog carries the built-in measures plus
/// `fixed` (produces `{value: 42}`) and `broken` (always fails).
pub fn engine() -> Engine {
    let mut catalog = BuiltinCatalog::with_defaults();
    catalog.register(None, "fixed", || {
        MeasureImplementation::direct(FixedValueMeasure { value: 42 })
    });
    catalog.register(None, "broken", || {
        MeasureImplementation::direct(AlwaysFailsMeasure)
    });
    let catalog: Arc<dyn MeasureCatalog> = Arc::new(catalog);

    let instances = Arc::new(MemoryInstanceDirectory::new());
    let properties = Arc::new(MemoryPropertyStore::new());
    let references = Arc::new(MemoryReferenceStore::new());
    let measurements = Arc::new(MemoryMeasurementStore::new());
    let registry = Arc::new(AgentRegistry::new());
    let logs = Arc::new(MemoryLogSink::new());

    let executor = Arc::new(Executor::new(
        catalog.clone(),
        instances.clone(),
        properties.clone(),
        references.clone(),
        measurements.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(
        executor.clone(),
        catalog,
        instances.clone(),
        properties.clone(),
        registry.clone(),
        logs.clone(),
    ));

    Engine {
        instances,
        properties,
        references,
        measurements,
        registry,
        logs,
        executor,
        scheduler,
    }
}

/// Create a local measure instance with the given scheduling expression.
pub fn local_instance(
    id: i64,
    measure_name: &str,
    scheduling_expression: Option<&str>,
) -> MeasureInstance {
    MeasureInstance {
        id,
        instance_name: format!("inst-{id}"),
        measure_name: measure_name.to_string(),
        measure_version: "1.0".to_string(),
        application_type: None,
        scheduling_expression: scheduling_expression.map(str::to_string),
        scheduled: true,
        remote: false,
        remote_label: None,
    }
}

/// Create a remote measure instance assigned to the given agent.
pub fn remote_instance(id: i64, measure_name: &str, agent_label: &str) -> MeasureInstance {
    MeasureInstance {
        remote: true,
        remote_label: Some(agent_label.to_string()),
        ..local_instance(id, measure_name, Some("5000"))
    }
}

/// Poll a condition until it holds or the timeout expires.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..150 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
