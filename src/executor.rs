//! Measure execution cycles
//!
//! One execution cycle merges stored properties into the resolved
//! implementation, runs the direct or derived logic, persists produced
//! measurements and writes back mutated properties. Whatever happens, the
//! caller gets a structured [`ExecutionLog`] back: failures are converted at
//! this boundary, never propagated to the scheduling layer.
//!
//! Besides the scheduled cycle there are three on-demand entry points:
//! immediate execution by instance id, external execution (an explicit
//! timestamp stamped onto every produced measurement, for back-dated
//! ingestion), and a dry run that computes without persisting anything.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::catalog::{MeasureCatalog, MeasureImplementation, MeasureKind};
use crate::store::{
    InstanceDirectory, MeasurementStore, PropertyStore, ReferenceStore, StoreError,
};
use crate::{
    ExecutionLog, InstanceId, LogInput, LogParameter, MASKED_VALUE, MeasureInstance,
    MeasureProperty, PropertyKind,
};

/// Distinguished failure message for an unreachable measurement store.
pub const STORE_UNAVAILABLE_MESSAGE: &str = "The measurement store is not available";

/// Internal cycle failure, before conversion into a log message.
enum CycleError {
    /// The measurement store itself failed; an unreachable one gets the
    /// distinguished message.
    MeasurementStore(StoreError),
    /// Any other collaborator store failed.
    Store(StoreError),
    Other(anyhow::Error),
}

impl CycleError {
    fn into_message(self) -> String {
        match self {
            CycleError::MeasurementStore(StoreError::Unavailable(_)) => {
                STORE_UNAVAILABLE_MESSAGE.to_string()
            }
            CycleError::MeasurementStore(err) | CycleError::Store(err) => err.to_string(),
            CycleError::Other(err) => {
                let message = err.to_string();
                if message.is_empty() {
                    format!("{err:?}")
                } else {
                    message
                }
            }
        }
    }
}

impl From<StoreError> for CycleError {
    fn from(err: StoreError) -> Self {
        CycleError::Store(err)
    }
}

/// Runs execution cycles against the collaborator stores.
pub struct Executor {
    catalog: Arc<dyn MeasureCatalog>,
    instances: Arc<dyn InstanceDirectory>,
    properties: Arc<dyn PropertyStore>,
    references: Arc<dyn ReferenceStore>,
    measurements: Arc<dyn MeasurementStore>,
}

impl Executor {
    pub fn new(
        catalog: Arc<dyn MeasureCatalog>,
        instances: Arc<dyn InstanceDirectory>,
        properties: Arc<dyn PropertyStore>,
        references: Arc<dyn ReferenceStore>,
        measurements: Arc<dyn MeasurementStore>,
    ) -> Self {
        Self {
            catalog,
            instances,
            properties,
            references,
            measurements,
        }
    }

    /// Run one persisting cycle with an already-resolved implementation.
    ///
    /// This is the scheduled path: the scheduler resolves the implementation
    /// once at schedule time and reuses it every tick.
    #[instrument(skip(self, implementation), fields(instance = %instance.instance_name))]
    pub async fn execute(
        &self,
        instance: &MeasureInstance,
        implementation: &mut MeasureImplementation,
    ) -> ExecutionLog {
        let mut log = ExecutionLog::started(instance);
        let outcome = self
            .run_cycle(instance, implementation, &mut log, true, None)
            .await;
        self.finish(log, outcome)
    }

    /// Resolve the instance and its implementation fresh, then run one
    /// persisting cycle.
    ///
    /// Fails only when the instance id itself is unknown; measure and store
    /// failures still come back as a log with `success == false`.
    pub async fn execute_by_id(&self, id: InstanceId) -> anyhow::Result<ExecutionLog> {
        let instance = self.load_instance(id).await?;
        Ok(self.execute_resolved(&instance, true, None).await)
    }

    /// External execution: persist with `date_field` stamped to `timestamp`
    /// on every produced measurement.
    pub async fn execute_external(
        &self,
        id: InstanceId,
        timestamp: DateTime<Utc>,
        date_field: &str,
    ) -> anyhow::Result<ExecutionLog> {
        let instance = self.load_instance(id).await?;
        let mut log = self
            .execute_resolved(&instance, true, Some((date_field, timestamp)))
            .await;
        log.executed_at = timestamp;
        Ok(log)
    }

    /// Dry run: same computation, but nothing is persisted and no property
    /// write-back happens. Used to validate configuration before scheduling.
    pub async fn test_measure(&self, id: InstanceId) -> anyhow::Result<ExecutionLog> {
        let instance = self.load_instance(id).await?;
        Ok(self.execute_resolved(&instance, false, None).await)
    }

    async fn load_instance(&self, id: InstanceId) -> anyhow::Result<MeasureInstance> {
        self.instances
            .find(id)
            .await
            .with_context(|| format!("failed to look up measure instance {id}"))?
            .with_context(|| format!("no measure instance with id {id}"))
    }

    async fn execute_resolved(
        &self,
        instance: &MeasureInstance,
        persist: bool,
        stamp: Option<(&str, DateTime<Utc>)>,
    ) -> ExecutionLog {
        let mut log = ExecutionLog::started(instance);

        let mut implementation = match self
            .catalog
            .resolve(instance.application_type.as_deref(), &instance.measure_name)
            .await
        {
            Ok(implementation) => implementation,
            Err(e) => {
                log.error = Some(e.to_string());
                return log;
            }
        };

        let outcome = self
            .run_cycle(instance, &mut implementation, &mut log, persist, stamp)
            .await;
        self.finish(log, outcome)
    }

    fn finish(&self, mut log: ExecutionLog, outcome: Result<(), CycleError>) -> ExecutionLog {
        if let Err(e) = outcome {
            log.success = false;
            log.error = Some(e.into_message());
            warn!(
                instance = %log.instance_name,
                error = log.error.as_deref().unwrap_or_default(),
                "measure execution failed"
            );
        }
        log
    }

    /// The cycle itself. On success the log carries duration, inputs and
    /// produced measurements with `success == true`.
    async fn run_cycle(
        &self,
        instance: &MeasureInstance,
        implementation: &mut MeasureImplementation,
        log: &mut ExecutionLog,
        persist: bool,
        stamp: Option<(&str, DateTime<Utc>)>,
    ) -> Result<(), CycleError> {
        let stored = self.properties.by_instance(instance.id).await?;
        let snapshot = self.merge_properties(&stored, implementation, log);

        let start = Instant::now();
        let MeasureImplementation { properties, kind } = &mut *implementation;

        let mut produced = match kind {
            MeasureKind::Direct(measure) => measure
                .read(properties)
                .await
                .map_err(CycleError::Other)?,
            MeasureKind::Derived(measure) => {
                // Drop inputs accumulated by earlier cycles before feeding
                // this cycle's references.
                measure.clear_inputs();

                let references = self.references.by_instance(instance.id).await?;
                for reference in &references {
                    let history = self
                        .measurements
                        .query(
                            &reference.referenced_instance,
                            reference.max_values,
                            reference.filter.as_deref(),
                        )
                        .await
                        .map_err(CycleError::MeasurementStore)?;

                    for measurement in history {
                        measure.add_input(
                            &reference.referenced_instance,
                            &reference.role,
                            measurement.clone(),
                        );
                        log.inputs.push(LogInput {
                            role: reference.role.clone(),
                            measurement,
                        });
                    }
                }

                measure
                    .compute(properties)
                    .await
                    .map_err(CycleError::Other)?
            }
        };

        if let Some((date_field, timestamp)) = stamp {
            for measurement in &mut produced {
                measurement.insert(date_field, timestamp.to_rfc3339());
            }
        }

        if persist {
            for measurement in &produced {
                self.measurements
                    .put(&instance.instance_name, measurement.clone())
                    .await
                    .map_err(CycleError::MeasurementStore)?;
            }
            self.write_back_properties(&stored, &snapshot, implementation)
                .await?;
        }

        log.duration_ms = start.elapsed().as_millis() as u64;
        log.measurements = produced;
        log.success = true;

        Ok(())
    }

    /// Merge stored properties into the implementation's bag, snapshotting
    /// the pre-execution values and recording the masked view into the log.
    fn merge_properties(
        &self,
        stored: &[MeasureProperty],
        implementation: &mut MeasureImplementation,
        log: &mut ExecutionLog,
    ) -> HashMap<String, String> {
        let mut snapshot = HashMap::new();

        for property in stored {
            snapshot.insert(property.name.clone(), property.value.clone());
            implementation
                .properties
                .insert(property.name.clone(), property.value.clone());

            // Masking applies to the log only; the live bag keeps the real
            // value.
            let logged = match property.kind {
                PropertyKind::Secret => MASKED_VALUE.to_string(),
                PropertyKind::Plain => property.value.clone(),
            };
            log.parameters.push(LogParameter {
                name: property.name.clone(),
                value: logged,
            });
        }

        snapshot
    }

    /// Persist only properties whose value the implementation changed, so
    /// concurrently edited untouched properties are never clobbered.
    async fn write_back_properties(
        &self,
        stored: &[MeasureProperty],
        snapshot: &HashMap<String, String>,
        implementation: &MeasureImplementation,
    ) -> Result<(), CycleError> {
        for property in stored {
            let Some(current) = implementation.properties.get(&property.name) else {
                continue;
            };
            if current.is_empty() || snapshot.get(&property.name) == Some(current) {
                continue;
            }

            debug!(property = %property.name, "persisting mutated property");
            let mut updated = property.clone();
            updated.value = current.clone();
            self.properties.save(updated).await?;
        }

        Ok(())
    }
}
