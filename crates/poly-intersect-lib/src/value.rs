//! Computation results flowing between graph nodes

use crate::FeatureCollection;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Area or percentage statistics, optionally grouped by one or two fields
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(untagged))]
pub enum Statistic {
    Scalar(f64),
    Grouped(BTreeMap<String, f64>),
    Nested(BTreeMap<String, BTreeMap<String, f64>>),
}

impl Statistic {
    /// The scalar value, if this is an ungrouped statistic
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Statistic::Scalar(value) => Some(*value),
            _ => None,
        }
    }

    /// Read a statistic back from its JSON form (number, map of numbers, map of maps)
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(number) => number.as_f64().map(Statistic::Scalar),
            JsonValue::Object(object) => {
                if object.values().all(JsonValue::is_number) {
                    let grouped = object
                        .iter()
                        .map(|(key, value)| value.as_f64().map(|v| (key.clone(), v)))
                        .collect::<Option<BTreeMap<_, _>>>()?;
                    return Some(Statistic::Grouped(grouped));
                }
                let nested = object
                    .iter()
                    .map(|(key, value)| match Statistic::from_json(value)? {
                        Statistic::Grouped(inner) => Some((key.clone(), inner)),
                        _ => None,
                    })
                    .collect::<Option<BTreeMap<_, _>>>()?;
                Some(Statistic::Nested(nested))
            }
            _ => None,
        }
    }

    /// JSON form: a number, a map of numbers or a map of maps (non-finite values are null)
    pub fn to_json(&self) -> JsonValue {
        fn object(map: &BTreeMap<String, f64>) -> JsonValue {
            JsonValue::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), JsonValue::from(*value)))
                    .collect::<Map<_, _>>(),
            )
        }

        match self {
            Statistic::Scalar(value) => JsonValue::from(*value),
            Statistic::Grouped(map) => object(map),
            Statistic::Nested(nested) => JsonValue::Object(
                nested
                    .iter()
                    .map(|(key, inner)| (key.clone(), object(inner)))
                    .collect(),
            ),
        }
    }
}

/// Result of evaluating one graph node
///
/// Cloning is cheap: feature collections and histograms are shared behind `Arc`.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Features(Arc<FeatureCollection>),
    Statistic(Statistic),
    /// Raw histogram counts from a raster source
    Histogram(Arc<Vec<f64>>),
}

impl Value {
    pub fn features(fc: FeatureCollection) -> Self {
        Value::Features(Arc::new(fc))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Features(_) => "feature collection",
            Value::Statistic(_) => "statistic",
            Value::Histogram(_) => "histogram",
        }
    }

    /// Wire representation: collections go through the GeoJSON adapter,
    /// statistics and histograms pass through unchanged.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Features(fc) => crate::wire::serialize(fc),
            Value::Statistic(statistic) => statistic.to_json(),
            Value::Histogram(counts) => JsonValue::from(counts.as_slice().to_vec()),
        }
    }
}
