//! Core operations
//!
//! Pure functions over [`FeatureCollection`]s: every operation borrows its inputs and
//! returns a fresh collection or statistic.
//!
//! - [`dissolve`]: union features, optionally one output per value of a field
//! - [`intersect`] / [`erase`]: index-accelerated overlay of two collections
//! - [`buffer_to_distance`]: metric buffer, local CRS only
//! - [`get_area`] / [`get_area_percent`]: hectare statistics

mod buffer;
mod dissolve;
mod overlay;
mod stats;

pub use buffer::buffer_to_distance;
pub use dissolve::dissolve;
pub use overlay::{erase, intersect};
pub use stats::{get_area, get_area_percent};

use crate::{Error, FeatureCollection, Result};
use geo::{BooleanOps, MultiPolygon, Validation};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Square meters per hectare
pub const M2_PER_HECTARE: f64 = 10_000.0;

/// Grouping key of a property value
///
/// Values group by what they are, not by how they print: `1` and `1.0` share a key,
/// `1` and `"1"` do not. Missing and `null` values share the [`CategoryKey::Missing`] key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum CategoryKey {
    Missing,
    Bool(bool),
    /// Canonical decimal text, integral values without a fraction
    Number(String),
    Text(String),
    /// Arrays and objects, by their compact JSON text
    Composite(String),
}

impl CategoryKey {
    pub(crate) fn of(value: Option<&JsonValue>) -> Self {
        match value {
            None | Some(JsonValue::Null) => CategoryKey::Missing,
            Some(JsonValue::Bool(flag)) => CategoryKey::Bool(*flag),
            Some(JsonValue::Number(number)) => CategoryKey::Number(canonical_number(number)),
            Some(JsonValue::String(text)) => CategoryKey::Text(text.clone()),
            Some(other) => CategoryKey::Composite(other.to_string()),
        }
    }

    /// Text used for this key in statistic mappings
    pub(crate) fn label(&self) -> String {
        match self {
            CategoryKey::Missing => "null".to_string(),
            CategoryKey::Bool(flag) => flag.to_string(),
            CategoryKey::Number(text) | CategoryKey::Text(text) | CategoryKey::Composite(text) => {
                text.clone()
            }
        }
    }
}

fn canonical_number(number: &serde_json::Number) -> String {
    if let Some(integer) = number.as_i64() {
        return integer.to_string();
    }
    if let Some(integer) = number.as_u64() {
        return integer.to_string();
    }
    match number.as_f64() {
        // Exactly representable integers print like their integer form
        Some(float) if float.fract() == 0.0 && float.abs() < 9.0e15 => (float as i64).to_string(),
        Some(float) => float.to_string(),
        None => number.to_string(),
    }
}

/// Render grouped keys as labels
///
/// Distinct keys printing the same way (`1` and `"1"`) cannot share a mapping entry and
/// are a [`Error::CategoryCardinality`] error.
pub(crate) fn labelled<V>(
    field: &str,
    groups: BTreeMap<CategoryKey, V>,
) -> Result<BTreeMap<String, V>> {
    let mut labels = BTreeMap::new();
    for (key, value) in groups {
        let label = key.label();
        if labels.insert(label.clone(), value).is_some() {
            return Err(Error::CategoryCardinality {
                field: field.to_string(),
                reason: format!("values of different types both read as '{label}'"),
            });
        }
    }
    Ok(labels)
}

/// Fail unless both collections live in the same coordinate system
pub(crate) fn require_same_crs(
    operation: &'static str,
    a: &FeatureCollection,
    b: &FeatureCollection,
) -> Result<()> {
    if a.same_crs(b) {
        Ok(())
    } else {
        Err(Error::CrsMismatch { operation })
    }
}

/// Return a valid version of the geometry
///
/// Invalid input (self-intersections, bad ring orientation) is rebuilt by unioning it
/// with nothing, which resolves it through the overlay engine like a zero-width buffer.
pub(crate) fn repair(geometry: MultiPolygon<f64>) -> MultiPolygon<f64> {
    if geometry.is_valid() {
        return geometry;
    }
    tracing::warn!(
        "Repairing invalid geometry with {} parts before overlay",
        geometry.0.len()
    );
    geometry.union(&MultiPolygon::new(vec![]))
}
