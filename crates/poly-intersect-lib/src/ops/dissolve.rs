use super::{CategoryKey, repair};
use crate::feature::Properties;
use crate::{Areal, Feature, FeatureCollection, Result};
use geo::{BooleanOps, MultiPolygon};
use rayon::prelude::*;
use serde_json::Value as JsonValue;

/// Union features into one feature, or one feature per distinct value of `field`
///
/// Groups are keyed by value equality (`1` and `1.0` match, `1` and `"1"` do not) and
/// emitted in order of first occurrence, carrying the first member's value. Features
/// lacking the field are grouped under `null`. Without a field the single
/// output feature has an empty property map. Zero input features give zero outputs.
pub fn dissolve(fc: &FeatureCollection, field: Option<&str>) -> Result<FeatureCollection> {
    #[cfg(feature = "profiling")]
    profiling::scope!("ops::dissolve");

    if fc.is_empty() {
        return Ok(FeatureCollection::new(Vec::new(), fc.crs));
    }

    let Some(field) = field else {
        let merged = union_all(fc.features.iter().map(|f| f.geometry.to_multi()).collect());
        let feature = Feature::new(Areal::from_multi(merged), Properties::new());
        return Ok(FeatureCollection::new(vec![feature], fc.crs));
    };

    // (key, value, member geometries), in order of first occurrence
    let mut groups: Vec<(CategoryKey, JsonValue, Vec<MultiPolygon<f64>>)> = Vec::new();
    for feature in &fc.features {
        let value = feature.property(field).cloned().unwrap_or(JsonValue::Null);
        let key = CategoryKey::of(Some(&value));
        let geometry = feature.geometry.to_multi();
        match groups.iter_mut().find(|(existing, _, _)| *existing == key) {
            Some((_, _, members)) => members.push(geometry),
            None => groups.push((key, value, vec![geometry])),
        }
    }

    tracing::debug!(
        "Dissolving {} features into {} groups by '{}'",
        fc.len(),
        groups.len(),
        field
    );

    let features = groups
        .into_par_iter()
        .map(|(_, value, members)| {
            let mut properties = Properties::new();
            properties.insert(field.to_string(), value);
            Feature::new(Areal::from_multi(union_all(members)), properties)
        })
        .collect();

    Ok(FeatureCollection::new(features, fc.crs))
}

/// Cascaded union as a parallel tree reduction
pub(crate) fn union_all(parts: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    parts
        .into_par_iter()
        .map(repair)
        .reduce(
            || MultiPolygon::new(Vec::new()),
            |a, b| {
                if a.0.is_empty() {
                    b
                } else if b.0.is_empty() {
                    a
                } else {
                    a.union(&b)
                }
            },
        )
}
