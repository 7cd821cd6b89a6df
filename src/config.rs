use std::path::PathBuf;

use tracing::trace;

use crate::{InstanceId, MeasureInstance, MeasureProperty, MeasureReference, PropertyKind};

/// Measurement storage configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory measurement streams (no persistence)
    Memory,

    /// SQLite database
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./measurements.db")
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Measure instances scheduled at startup
    pub instances: Option<Vec<InstanceConfig>>,

    /// Storage configuration (optional - defaults to in-memory)
    pub storage: Option<StorageConfig>,

    /// Agent liveness sweep period in seconds. The staleness threshold
    /// equals the period.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How many execution logs the in-memory sink retains
    #[serde(default = "default_retained_logs")]
    pub retained_logs: usize,

    /// REST surface configuration (optional - no API when absent)
    pub api: Option<ApiSection>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_api_bind")]
    pub bind: std::net::SocketAddr,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct InstanceConfig {
    pub id: InstanceId,
    pub instance_name: String,
    pub measure_name: String,
    #[serde(default = "default_measure_version")]
    pub measure_version: String,
    pub application_type: Option<String>,
    /// Period in milliseconds, as a string (the platform's scheduling
    /// expression format).
    pub scheduling_expression: Option<String>,
    #[serde(default = "default_true")]
    pub scheduled: bool,
    #[serde(default)]
    pub remote: bool,
    pub remote_label: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
    #[serde(default)]
    pub references: Vec<ReferenceConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PropertyConfig {
    pub name: String,
    pub value: String,
    #[serde(default = "default_property_kind")]
    pub kind: PropertyKind,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ReferenceConfig {
    pub role: String,
    /// Instance name of the referenced measurement stream
    pub instance: String,
    #[serde(default = "default_max_values")]
    pub max_values: usize,
    pub filter: Option<String>,
}

impl InstanceConfig {
    pub fn to_instance(&self) -> MeasureInstance {
        MeasureInstance {
            id: self.id,
            instance_name: self.instance_name.clone(),
            measure_name: self.measure_name.clone(),
            measure_version: self.measure_version.clone(),
            application_type: self.application_type.clone(),
            scheduling_expression: self.scheduling_expression.clone(),
            scheduled: self.scheduled,
            remote: self.remote,
            remote_label: self.remote_label.clone(),
        }
    }

    pub fn to_properties(&self) -> Vec<MeasureProperty> {
        self.properties
            .iter()
            .map(|p| MeasureProperty {
                instance_id: self.id,
                name: p.name.clone(),
                value: p.value.clone(),
                kind: p.kind,
            })
            .collect()
    }

    pub fn to_references(&self) -> Vec<MeasureReference> {
        self.references
            .iter()
            .map(|r| MeasureReference {
                instance_id: self.id,
                role: r.role.clone(),
                referenced_instance: r.instance.clone(),
                max_values: r.max_values,
                filter: r.filter.clone(),
            })
            .collect()
    }
}

fn default_sweep_interval_secs() -> u64 {
    20
}

fn default_retained_logs() -> usize {
    256
}

fn default_measure_version() -> String {
    String::from("1.0.0")
}

fn default_max_values() -> usize {
    10
}

fn default_property_kind() -> PropertyKind {
    PropertyKind::Plain
}

fn default_api_bind() -> std::net::SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

fn default_true() -> bool {
    true
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("invalid configuration file: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
