//! Numeric aggregation over referenced measurement streams
//!
//! A derived measure computing one aggregate (average, sum, min, max or
//! count) of a numeric field across all inputs fed in for the cycle.
//!
//! Configuration properties:
//! - `function`: `avg` (default), `sum`, `min`, `max` or `count`
//! - `field`: source field name, default `value`

use async_trait::async_trait;

use crate::Measurement;
use crate::catalog::{DerivedMeasure, PropertyBag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregateFunction {
    Average,
    Sum,
    Min,
    Max,
    Count,
}

impl AggregateFunction {
    fn parse(name: &str) -> anyhow::Result<Self> {
        match name {
            "avg" => Ok(Self::Average),
            "sum" => Ok(Self::Sum),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            other => anyhow::bail!("unknown aggregate function '{other}'"),
        }
    }

    fn output_field(self) -> &'static str {
        match self {
            Self::Average => "avg",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        }
    }
}

/// Derived measure aggregating one numeric field of its inputs.
#[derive(Default)]
pub struct AggregateMeasure {
    inputs: Vec<Measurement>,
}

#[async_trait]
impl DerivedMeasure for AggregateMeasure {
    fn clear_inputs(&mut self) {
        self.inputs.clear();
    }

    fn add_input(&mut self, _source_instance: &str, _role: &str, measurement: Measurement) {
        self.inputs.push(measurement);
    }

    async fn compute(&mut self, properties: &mut PropertyBag) -> anyhow::Result<Vec<Measurement>> {
        let function = match properties.get("function") {
            Some(name) => AggregateFunction::parse(name)?,
            None => AggregateFunction::Average,
        };
        let field = properties
            .get("field")
            .map(String::as_str)
            .unwrap_or("value");

        let values: Vec<f64> = self
            .inputs
            .iter()
            .filter_map(|m| m.get(field).and_then(|v| v.as_f64()))
            .collect();

        if function == AggregateFunction::Count {
            return Ok(vec![
                Measurement::new()
                    .with_value("count", values.len() as u64)
                    .with_value("samples", self.inputs.len() as u64),
            ]);
        }

        // Nothing to aggregate; produce nothing rather than a fabricated
        // zero.
        if values.is_empty() {
            return Ok(Vec::new());
        }

        let result = match function {
            AggregateFunction::Average => values.iter().sum::<f64>() / values.len() as f64,
            AggregateFunction::Sum => values.iter().sum(),
            AggregateFunction::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            AggregateFunction::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            AggregateFunction::Count => unreachable!(),
        };

        Ok(vec![
            Measurement::new()
                .with_value(function.output_field(), result)
                .with_value("samples", values.len() as u64),
        ])
    }
}
