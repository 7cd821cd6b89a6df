//! In-memory store implementations
//!
//! These back tests and the default runtime when no persistent backend is
//! configured. Measurement streams are bounded ring buffers per instance;
//! when a buffer is full, oldest measurements are evicted.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{InstanceId, MeasureInstance, MeasureProperty, MeasureReference, Measurement};

use super::backend::{InstanceDirectory, MeasurementStore, PropertyStore, ReferenceStore};
use super::error::StoreResult;

/// Maximum measurements to keep in memory per instance
const MAX_MEASUREMENTS_PER_INSTANCE: usize = 1000;

/// Returns true when the measurement matches the filter expression.
///
/// Backends interpret the opaque filter as a regex over the measurement's
/// JSON serialization; no filter, or one that fails to parse, matches all.
fn matches_filter(measurement: &Measurement, filter: Option<&Regex>) -> bool {
    match filter {
        Some(re) => match serde_json::to_string(measurement) {
            Ok(json) => re.is_match(&json),
            Err(_) => false,
        },
        None => true,
    }
}

fn compile_filter(filter: Option<&str>) -> Option<Regex> {
    let expr = filter?;
    match Regex::new(expr) {
        Ok(re) => Some(re),
        Err(e) => {
            debug!("ignoring unparsable filter expression {expr:?}: {e}");
            None
        }
    }
}

/// In-memory measurement store
///
/// Streams are kept newest-last; queries walk them in reverse.
#[derive(Default)]
pub struct MemoryMeasurementStore {
    streams: RwLock<HashMap<String, VecDeque<Measurement>>>,
}

impl MemoryMeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total measurements currently retained, across all instances.
    pub async fn len(&self) -> usize {
        self.streams.read().await.values().map(VecDeque::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MeasurementStore for MemoryMeasurementStore {
    async fn put(&self, instance_name: &str, measurement: Measurement) -> StoreResult<()> {
        let mut streams = self.streams.write().await;
        let stream = streams.entry(instance_name.to_string()).or_default();

        if stream.len() >= MAX_MEASUREMENTS_PER_INSTANCE {
            stream.pop_front();
        }
        stream.push_back(measurement);

        Ok(())
    }

    async fn query(
        &self,
        instance_name: &str,
        max_values: usize,
        filter: Option<&str>,
    ) -> StoreResult<Vec<Measurement>> {
        let re = compile_filter(filter);
        let streams = self.streams.read().await;

        let measurements = streams
            .get(instance_name)
            .map(|stream| {
                stream
                    .iter()
                    .rev()
                    .filter(|m| matches_filter(m, re.as_ref()))
                    .take(max_values)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(measurements)
    }
}

/// In-memory property store
#[derive(Default)]
pub struct MemoryPropertyStore {
    properties: RwLock<HashMap<InstanceId, Vec<MeasureProperty>>>,
}

impl MemoryPropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a property, replacing any stored one with the same name.
    pub async fn insert(&self, property: MeasureProperty) {
        let mut properties = self.properties.write().await;
        let entries = properties.entry(property.instance_id).or_default();
        match entries.iter_mut().find(|p| p.name == property.name) {
            Some(existing) => *existing = property,
            None => entries.push(property),
        }
    }
}

#[async_trait]
impl PropertyStore for MemoryPropertyStore {
    async fn by_instance(&self, instance_id: InstanceId) -> StoreResult<Vec<MeasureProperty>> {
        let properties = self.properties.read().await;
        Ok(properties.get(&instance_id).cloned().unwrap_or_default())
    }

    async fn save(&self, property: MeasureProperty) -> StoreResult<()> {
        self.insert(property).await;
        Ok(())
    }
}

/// In-memory reference store
#[derive(Default)]
pub struct MemoryReferenceStore {
    references: RwLock<HashMap<InstanceId, Vec<MeasureReference>>>,
}

impl MemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, reference: MeasureReference) {
        let mut references = self.references.write().await;
        references
            .entry(reference.instance_id)
            .or_default()
            .push(reference);
    }
}

#[async_trait]
impl ReferenceStore for MemoryReferenceStore {
    async fn by_instance(&self, instance_id: InstanceId) -> StoreResult<Vec<MeasureReference>> {
        let references = self.references.read().await;
        Ok(references.get(&instance_id).cloned().unwrap_or_default())
    }
}

/// In-memory instance directory
#[derive(Default)]
pub struct MemoryInstanceDirectory {
    instances: RwLock<HashMap<InstanceId, MeasureInstance>>,
}

impl MemoryInstanceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, instance: MeasureInstance) {
        self.instances.write().await.insert(instance.id, instance);
    }
}

#[async_trait]
impl InstanceDirectory for MemoryInstanceDirectory {
    async fn find(&self, id: InstanceId) -> StoreResult<Option<MeasureInstance>> {
        Ok(self.instances.read().await.get(&id).cloned())
    }

    async fn by_measure_name(&self, measure_name: &str) -> StoreResult<Vec<MeasureInstance>> {
        let instances = self.instances.read().await;
        let mut matching: Vec<_> = instances
            .values()
            .filter(|i| i.measure_name == measure_name)
            .cloned()
            .collect();
        matching.sort_by_key(|i| i.id);
        Ok(matching)
    }
}
