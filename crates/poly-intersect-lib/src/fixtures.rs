//! Shared polygon fixtures for unit tests

use crate::feature::Properties;
use crate::{Areal, Feature, FeatureCollection};
use geo::{LineString, Polygon};
use serde_json::Value as JsonValue;

/// Axis-aligned rectangle with its lower-left corner at (x, y)
pub fn rect(x: f64, y: f64, width: f64, height: f64) -> Areal {
    Areal::Polygon(Polygon::new(
        LineString::from(vec![
            (x, y),
            (x + width, y),
            (x + width, y + height),
            (x, y + height),
            (x, y),
        ]),
        vec![],
    ))
}

pub fn square(x: f64, y: f64, size: f64) -> Areal {
    rect(x, y, size, size)
}

/// Untagged collection with sequential `id` properties
pub fn collection(geometries: Vec<Areal>) -> FeatureCollection {
    let features = geometries
        .into_iter()
        .enumerate()
        .map(|(index, geometry)| {
            let mut properties = Properties::new();
            properties.insert("id".into(), JsonValue::from(index));
            Feature::new(geometry, properties)
        })
        .collect();
    FeatureCollection::new(features, None)
}

/// Untagged collection whose features carry one extra property
pub fn tagged(field: &str, items: Vec<(Areal, JsonValue)>) -> FeatureCollection {
    let features = items
        .into_iter()
        .enumerate()
        .map(|(index, (geometry, value))| {
            let mut properties = Properties::new();
            properties.insert("id".into(), JsonValue::from(index));
            properties.insert(field.to_string(), value);
            Feature::new(geometry, properties)
        })
        .collect();
    FeatureCollection::new(features, None)
}

/// A GeoJSON wire document for a single square (degrees)
pub fn square_geojson(x: f64, y: f64, size: f64) -> JsonValue {
    serde_json::json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": {},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [x, y], [x + size, y], [x + size, y + size], [x, y + size], [x, y]
                ]]
            }
        }]
    })
}
