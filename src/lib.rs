pub mod agents;
pub mod api;
pub mod catalog;
pub mod config;
pub mod executor;
pub mod logging;
pub mod measures;
pub mod scheduler;
pub mod store;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a measure instance, assigned by the owning catalog layer.
pub type InstanceId = i64;

/// Placeholder written into execution logs in place of secret property values.
pub const MASKED_VALUE: &str = "**********";

/// A configured, named unit of periodic work bound to a measure definition.
///
/// Owned by the catalog/persistence layer; the engine reads it and writes
/// back mutated properties, nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureInstance {
    pub id: InstanceId,
    pub instance_name: String,
    pub measure_name: String,
    pub measure_version: String,
    pub application_type: Option<String>,
    /// Expected to parse as a positive integer period in milliseconds.
    pub scheduling_expression: Option<String>,
    /// Whether the owner wants this instance scheduled at all.
    pub scheduled: bool,
    pub remote: bool,
    /// Label of the executing agent. Set iff `remote`.
    pub remote_label: Option<String>,
}

/// Kind of a configuration property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Plain,
    Secret,
}

/// A named, typed configuration value attached to a measure instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureProperty {
    pub instance_id: InstanceId,
    pub name: String,
    pub value: String,
    pub kind: PropertyKind,
}

impl MeasureProperty {
    pub fn plain(instance_id: InstanceId, name: &str, value: &str) -> Self {
        Self {
            instance_id,
            name: name.to_string(),
            value: value.to_string(),
            kind: PropertyKind::Plain,
        }
    }

    pub fn secret(instance_id: InstanceId, name: &str, value: &str) -> Self {
        Self {
            instance_id,
            name: name.to_string(),
            value: value.to_string(),
            kind: PropertyKind::Secret,
        }
    }
}

/// A configured link from a derived measure to a source measurement stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureReference {
    /// Instance owning this reference (the derived one).
    pub instance_id: InstanceId,
    /// Role under which pulled measurements are fed into the implementation.
    pub role: String,
    /// Instance name of the referenced measurement stream.
    pub referenced_instance: String,
    /// Maximum number of historical values to pull.
    pub max_values: usize,
    /// Opaque filter expression, interpreted by the measurement store.
    pub filter: Option<String>,
}

/// A single produced measurement: an ordered map of field name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Measurement {
    pub values: BTreeMap<String, serde_json::Value>,
}

impl Measurement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<serde_json::Value>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.values.get(name)
    }
}

/// Snapshot of one property as it entered an execution, secrets masked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogParameter {
    pub name: String,
    pub value: String,
}

/// One reference input consumed by a derived execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogInput {
    pub role: String,
    pub measurement: Measurement,
}

/// Structured record of one execution cycle.
///
/// Created fresh on every cycle and never mutated afterwards. The parameter
/// snapshot is masked; the live execution always sees real values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub instance_name: String,
    pub measure_name: String,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub parameters: Vec<LogParameter>,
    pub inputs: Vec<LogInput>,
    pub measurements: Vec<Measurement>,
}

impl ExecutionLog {
    /// Start a log for the given instance, stamped now.
    pub fn started(instance: &MeasureInstance) -> Self {
        Self {
            instance_name: instance.instance_name.clone(),
            measure_name: instance.measure_name.clone(),
            executed_at: Utc::now(),
            duration_ms: 0,
            success: false,
            error: None,
            parameters: Vec::new(),
            inputs: Vec::new(),
            measurements: Vec::new(),
        }
    }
}

/// Work description pulled by a remote agent.
///
/// Carries the full, unmasked property set: the agent needs real credentials
/// to execute the measure on its side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteJobSpec {
    pub instance_id: InstanceId,
    pub instance_name: String,
    pub measure_name: String,
    pub measure_version: String,
    pub scheduling_expression: Option<String>,
    pub properties: BTreeMap<String, String>,
}
