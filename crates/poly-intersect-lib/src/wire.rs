//! GeoJSON wire format adapter
//!
//! Converts between GeoJSON-like feature collections and [`FeatureCollection`].
//! Only Polygon and MultiPolygon geometries are accepted; anything else is rejected
//! as a [`Error::Format`] for the whole document.
//!
//! The CRS tag travels as a named CRS block:
//!
//! ```json
//! "crs": {"type": "name", "properties": {"name": "local", "centroid": [lon, lat], "projection": "aeqd"}}
//! ```

use crate::{Areal, Crs, Error, Feature, FeatureCollection, ProjectionKind, Result};
use geo::Coord;
use geojson::JsonObject;
use serde_json::{Value as JsonValue, json};

/// CRS names accepted as plain WGS84
const GLOBAL_CRS_NAMES: [&str; 4] = [
    "global",
    "EPSG:4326",
    "urn:ogc:def:crs:OGC:1.3:CRS84",
    "urn:ogc:def:crs:EPSG::4326",
];

/// Parse a feature collection from its string encoding
pub fn parse_str(input: &str) -> Result<FeatureCollection> {
    let value: JsonValue = serde_json::from_str(input)
        .map_err(|e| Error::Format(format!("invalid JSON input: {e}")))?;
    parse_value(value)
}

/// Parse a feature collection from a JSON value (or a JSON string holding one)
///
/// Every feature without an `id` property, or with a null one, receives its 0-based
/// input position as `id`.
pub fn parse_value(value: JsonValue) -> Result<FeatureCollection> {
    let mut object = match value {
        JsonValue::String(encoded) => return parse_str(&encoded),
        JsonValue::Object(object) => object,
        other => {
            return Err(Error::Format(format!(
                "expected a FeatureCollection object, got {}",
                json_type_name(&other)
            )));
        }
    };

    let features = match object.remove("features") {
        Some(JsonValue::Array(features)) => features,
        _ => {
            return Err(Error::Format(
                "top-level object lacks a \"features\" sequence".to_string(),
            ));
        }
    };

    let crs = match object.remove("crs") {
        None | Some(JsonValue::Null) => None,
        Some(block) => Some(parse_crs(&block)?),
    };

    let features = features
        .into_iter()
        .enumerate()
        .map(|(index, raw)| parse_feature(index, raw))
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!("Parsed {} features (crs: {:?})", features.len(), crs);
    Ok(FeatureCollection::new(features, crs))
}

fn parse_feature(index: usize, raw: JsonValue) -> Result<Feature> {
    let feature: geojson::Feature = serde_json::from_value(raw)
        .map_err(|e| Error::Format(format!("feature {index} is not a valid GeoJSON feature: {e}")))?;

    let geometry = feature
        .geometry
        .ok_or_else(|| Error::Format(format!("feature {index} has no geometry")))?;

    let geometry = match geo::Geometry::<f64>::try_from(geometry) {
        Ok(geo::Geometry::Polygon(polygon)) => Areal::Polygon(polygon),
        Ok(geo::Geometry::MultiPolygon(multi)) => Areal::MultiPolygon(multi),
        Ok(other) => {
            return Err(Error::Format(format!(
                "feature {index} is a {}, not a Polygon or MultiPolygon",
                geometry_type_name(&other)
            )));
        }
        Err(e) => {
            return Err(Error::Format(format!(
                "feature {index} has an unreadable geometry: {e}"
            )));
        }
    };

    let mut properties = feature.properties.unwrap_or_default();
    if matches!(properties.get("id"), None | Some(JsonValue::Null)) {
        properties.insert("id".to_string(), JsonValue::from(index));
    }

    Ok(Feature::new(geometry, properties))
}

fn parse_crs(block: &JsonValue) -> Result<Crs> {
    let properties = block
        .get("properties")
        .and_then(JsonValue::as_object)
        .ok_or_else(|| Error::Format("CRS block lacks properties".to_string()))?;
    let name = properties
        .get("name")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| Error::Format("CRS block lacks a name".to_string()))?;

    if GLOBAL_CRS_NAMES.contains(&name) {
        return Ok(Crs::Global);
    }
    if name != "local" {
        return Err(Error::Format(format!("unknown CRS '{name}'")));
    }

    let centroid = properties
        .get("centroid")
        .and_then(JsonValue::as_array)
        .and_then(|pair| match pair.as_slice() {
            [lon, lat] => Some(Coord {
                x: lon.as_f64()?,
                y: lat.as_f64()?,
            }),
            _ => None,
        })
        .ok_or_else(|| Error::Format("local CRS block without a [lon, lat] centroid".to_string()))?;

    let kind = match properties.get("projection").and_then(JsonValue::as_str) {
        None => ProjectionKind::default(),
        Some(name) => ProjectionKind::from_name(name)
            .ok_or_else(|| Error::Format(format!("unknown local projection '{name}'")))?,
    };

    Ok(Crs::Local { centroid, kind })
}

/// Serialize a collection to its wire representation
pub fn serialize(fc: &FeatureCollection) -> JsonValue {
    let features: Vec<JsonValue> = fc
        .features
        .iter()
        .map(|feature| {
            let value = match &feature.geometry {
                Areal::Polygon(polygon) => geojson::Value::from(polygon),
                Areal::MultiPolygon(multi) => geojson::Value::from(multi),
            };
            let geometry = geojson::Geometry::new(value);
            json!({
                "type": "Feature",
                "properties": JsonValue::Object(feature.properties.clone()),
                "geometry": JsonValue::Object(JsonObject::from(&geometry)),
            })
        })
        .collect();

    let mut object = JsonObject::new();
    object.insert("type".to_string(), JsonValue::from("FeatureCollection"));
    object.insert("features".to_string(), JsonValue::Array(features));
    if let Some(crs) = &fc.crs {
        object.insert("crs".to_string(), crs_block(crs));
    }
    JsonValue::Object(object)
}

/// Serialize a collection to a JSON string
pub fn to_string(fc: &FeatureCollection) -> Result<String> {
    Ok(serde_json::to_string(&serialize(fc))?)
}

fn crs_block(crs: &Crs) -> JsonValue {
    match crs {
        Crs::Global => json!({"type": "name", "properties": {"name": "global"}}),
        Crs::Local { centroid, kind } => json!({
            "type": "name",
            "properties": {
                "name": "local",
                "centroid": [centroid.x, centroid.y],
                "projection": kind.name(),
            }
        }),
    }
}

fn geometry_type_name(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::Line(_) | geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        _ => "non-areal geometry",
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
