//! Static registry of the metrics the engine knows how to aggregate and sync.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};

/// Unit a quantity sample is expressed in.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Unit {
    Count,
    Meters,
}

/// How samples within a bucket, and buckets within a week, are combined.
///
/// `Sum` fits cumulative counters (steps, distance). `MostRecent` fits
/// point-in-time test measurements where the latest reading is the answer.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AggregationPolicy {
    Sum,
    MostRecent,
}

/// One catalog entry: everything the engine needs to query and sync a metric.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub id: String,
    /// Human-readable name for status text.
    pub name: String,
    pub unit: Unit,
    pub policy: AggregationPolicy,
    pub remote_column: String,
    /// Integral columns receive a rounded integer; fractional columns keep
    /// full precision.
    pub integral: bool,
}

/// Lookup table from metric id to descriptor. Built once at startup, never
/// mutated afterwards.
#[derive(Clone, Debug, Default)]
pub struct MetricCatalog {
    metrics: HashMap<String, MetricDescriptor>,
}

impl MetricCatalog {
    /// Build a catalog from descriptors. A duplicate id is a configuration
    /// error worth failing at startup.
    pub fn new(descriptors: Vec<MetricDescriptor>) -> EngineResult<Self> {
        let mut metrics = HashMap::with_capacity(descriptors.len());
        for d in descriptors {
            if let Some(dup) = metrics.insert(d.id.clone(), d) {
                return Err(EngineError::Catalog(format!("duplicate metric id {}", dup.id)));
            }
        }
        Ok(Self { metrics })
    }

    /// The built-in catalog matching the Patient table columns.
    pub fn builtin() -> Self {
        let descriptors = vec![
            MetricDescriptor {
                id: "stepCount".into(),
                name: "Steps".into(),
                unit: Unit::Count,
                policy: AggregationPolicy::Sum,
                remote_column: "stepCount".into(),
                integral: true,
            },
            MetricDescriptor {
                id: "distanceWalkingRunning".into(),
                name: "Walking + Running Distance".into(),
                unit: Unit::Meters,
                policy: AggregationPolicy::Sum,
                remote_column: "walkingDistanceMeters".into(),
                integral: false,
            },
            MetricDescriptor {
                id: "sixMinuteWalkTestDistance".into(),
                name: "Six-Minute Walk".into(),
                unit: Unit::Meters,
                policy: AggregationPolicy::MostRecent,
                remote_column: "sixMinuteWalkMeters".into(),
                integral: false,
            },
        ];
        // Ids above are distinct by construction.
        Self::new(descriptors).expect("builtin catalog is well-formed")
    }

    pub fn get(&self, metric_id: &str) -> Option<&MetricDescriptor> {
        self.metrics.get(metric_id)
    }

    /// Descriptor lookup that rejects unknown metrics.
    pub fn require(&self, metric_id: &str) -> EngineResult<&MetricDescriptor> {
        self.get(metric_id)
            .ok_or_else(|| EngineError::UnknownMetric(metric_id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
