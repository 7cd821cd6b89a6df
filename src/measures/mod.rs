//! Built-in measure implementations
//!
//! The engine normally consumes an external measure catalog; the built-ins
//! here give the default runtime (and the tests) a working one. Each entry
//! is a factory producing a fresh implementation per resolution, since
//! implementations are stateful.

pub mod aggregate;
pub mod system;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::catalog::{CatalogError, CatalogResult, MeasureCatalog, MeasureImplementation};

type Factory = Box<dyn Fn() -> MeasureImplementation + Send + Sync>;

/// Catalog of built-in measures keyed by (application type, measure name).
///
/// An entry registered without an application type resolves for any
/// application; an entry with one shadows it for that application.
#[derive(Default)]
pub struct BuiltinCatalog {
    factories: HashMap<(Option<String>, String), Factory>,
}

impl BuiltinCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock catalog: the sysinfo snapshot measure and the numeric
    /// aggregation measure.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();
        catalog.register(None, "system-resources", || {
            MeasureImplementation::direct(system::SystemResourcesMeasure)
        });
        catalog.register(None, "aggregate", || {
            MeasureImplementation::derived(aggregate::AggregateMeasure::default())
        });
        catalog
    }

    pub fn register(
        &mut self,
        application_type: Option<&str>,
        measure_name: &str,
        factory: impl Fn() -> MeasureImplementation + Send + Sync + 'static,
    ) {
        self.factories.insert(
            (
                application_type.map(str::to_string),
                measure_name.to_string(),
            ),
            Box::new(factory),
        );
    }
}

#[async_trait]
impl MeasureCatalog for BuiltinCatalog {
    async fn resolve(
        &self,
        application_type: Option<&str>,
        measure_name: &str,
    ) -> CatalogResult<MeasureImplementation> {
        let exact = (
            application_type.map(str::to_string),
            measure_name.to_string(),
        );
        if let Some(factory) = self.factories.get(&exact) {
            return Ok(factory());
        }

        // Fall back to the application-agnostic registration.
        if application_type.is_some() {
            let agnostic = (None, measure_name.to_string());
            if let Some(factory) = self.factories.get(&agnostic) {
                return Ok(factory());
            }
        }

        Err(CatalogError::NotFound {
            application_type: application_type.map(str::to_string),
            measure_name: measure_name.to_string(),
        })
    }
}
