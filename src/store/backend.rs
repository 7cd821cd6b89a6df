//! Store trait definitions
//!
//! These traits are the engine's view onto the platform's persistence layer.
//! All of them are:
//!
//! - **Async**: methods are async for compatibility with Tokio
//! - **Fallible**: methods return `StoreResult<T>`, and a failing store only
//!   ever fails the execution cycle that touched it
//!
//! ## Thread Safety
//!
//! Implementations must be `Send + Sync`; they are shared across job tasks.

use async_trait::async_trait;

use crate::{InstanceId, MeasureInstance, MeasureProperty, MeasureReference, Measurement};

use super::error::StoreResult;

/// Append-only, time-ordered store of measurements per instance name.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    /// Append one measurement to the instance's stream.
    async fn put(&self, instance_name: &str, measurement: Measurement) -> StoreResult<()>;

    /// Query up to `max_values` most recent measurements matching `filter`,
    /// newest first.
    ///
    /// The filter expression is opaque at this level; the shipped backends
    /// treat it as a regular expression matched against each measurement's
    /// JSON serialization, and an absent or unparsable filter matches all.
    async fn query(
        &self,
        instance_name: &str,
        max_values: usize,
        filter: Option<&str>,
    ) -> StoreResult<Vec<Measurement>>;
}

/// Per-instance configuration properties.
#[async_trait]
pub trait PropertyStore: Send + Sync {
    async fn by_instance(&self, instance_id: InstanceId) -> StoreResult<Vec<MeasureProperty>>;

    /// Persist one property, replacing the stored value with the same name.
    async fn save(&self, property: MeasureProperty) -> StoreResult<()>;
}

/// References configured on derived measure instances.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn by_instance(&self, instance_id: InstanceId) -> StoreResult<Vec<MeasureReference>>;
}

/// Read access to the measure instance population.
#[async_trait]
pub trait InstanceDirectory: Send + Sync {
    async fn find(&self, id: InstanceId) -> StoreResult<Option<MeasureInstance>>;

    /// Every instance bound to the given measure definition name.
    ///
    /// This is the reverse lookup the liveness sweep cascades through.
    async fn by_measure_name(&self, measure_name: &str) -> StoreResult<Vec<MeasureInstance>>;
}
