//! Measure catalog contracts
//!
//! The catalog resolves the executable implementation of a measure by
//! (application type, measure name). An implementation carries a mutable
//! property bag and is either *direct* (reads a live source) or *derived*
//! (computes from referenced measurement streams). The two kinds are an
//! explicit tagged variant so the executor never inspects concrete types.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use crate::Measurement;

/// Mutable configuration bag handed to a measure implementation.
///
/// The executor merges stored properties into it before execution and diffs
/// it afterwards to detect values the implementation changed.
pub type PropertyBag = HashMap<String, String>;

/// Result type alias for catalog resolution
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors that can occur while resolving a measure implementation
#[derive(Debug)]
pub enum CatalogError {
    /// No implementation is registered under (application type, measure name)
    NotFound {
        application_type: Option<String>,
        measure_name: String,
    },
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::NotFound {
                application_type,
                measure_name,
            } => match application_type {
                Some(app) => write!(f, "no measure '{measure_name}' for application '{app}'"),
                None => write!(f, "no measure '{measure_name}' in the catalog"),
            },
        }
    }
}

impl std::error::Error for CatalogError {}

/// A measure producing measurements from a live external source,
/// with no dependency on other measurements.
#[async_trait]
pub trait DirectMeasure: Send + Sync {
    /// Perform one read cycle.
    ///
    /// The property bag is live configuration: implementations may mutate it
    /// (cursor positions, rotated tokens) and mutations are persisted by the
    /// executor after the cycle.
    async fn read(&mut self, properties: &mut PropertyBag) -> anyhow::Result<Vec<Measurement>>;
}

/// A measure computing new measurements from referenced measurement streams.
///
/// Inputs are accumulated via [`DerivedMeasure::add_input`] before each
/// compute call; the executor clears them first, so no input ever leaks from
/// one cycle into the next.
#[async_trait]
pub trait DerivedMeasure: Send + Sync {
    /// Drop all previously accumulated inputs.
    fn clear_inputs(&mut self);

    /// Feed one historical measurement, keyed by (source instance, role).
    fn add_input(&mut self, source_instance: &str, role: &str, measurement: Measurement);

    /// Compute the derived measurements from the accumulated inputs.
    async fn compute(&mut self, properties: &mut PropertyBag) -> anyhow::Result<Vec<Measurement>>;
}

/// Tagged implementation kind, selected at resolution time.
pub enum MeasureKind {
    Direct(Box<dyn DirectMeasure>),
    Derived(Box<dyn DerivedMeasure>),
}

impl fmt::Debug for MeasureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasureKind::Direct(_) => write!(f, "Direct"),
            MeasureKind::Derived(_) => write!(f, "Derived"),
        }
    }
}

/// A resolved, executable measure implementation.
#[derive(Debug)]
pub struct MeasureImplementation {
    /// Live property bag. Seeded from the instance's stored properties.
    pub properties: PropertyBag,
    pub kind: MeasureKind,
}

impl MeasureImplementation {
    pub fn direct(measure: impl DirectMeasure + 'static) -> Self {
        Self {
            properties: PropertyBag::new(),
            kind: MeasureKind::Direct(Box::new(measure)),
        }
    }

    pub fn derived(measure: impl DerivedMeasure + 'static) -> Self {
        Self {
            properties: PropertyBag::new(),
            kind: MeasureKind::Derived(Box::new(measure)),
        }
    }
}

/// Resolves executable measure implementations.
///
/// Implementations must return a *fresh* `MeasureImplementation` per call:
/// resolved implementations are stateful (property bags, accumulated inputs)
/// and are owned by a single schedule or execution.
#[async_trait]
pub trait MeasureCatalog: Send + Sync {
    async fn resolve(
        &self,
        application_type: Option<&str>,
        measure_name: &str,
    ) -> CatalogResult<MeasureImplementation>;
}
