//! Canned overlap analyses
//!
//! Ready-made pipelines over the core operations for the common question "how much of
//! my area, and of the land around it, is covered by this layer?".

use crate::feature::Properties;
use crate::{
    Config, Context, Crs, Executor, Feature, FeatureCollection, Graph, ProjectionKind, Result, ops,
    projection,
};
use serde_json::{Map, Value as JsonValue, json};
use std::collections::BTreeMap;

/// Label used for a buffer distance in output keys, e.g. `10km`
pub fn distance_label(distance_km: f64) -> String {
    format!("{distance_km}km")
}

/// Overlap of an AOI and its buffers with a reference layer
///
/// The AOI is dissolved and projected into a local frame centred on it, then buffered by
/// every distance in [`Config::buffer_distances_km`]. The dissolved reference layer is
/// projected into the same frame and intersected with the AOI and each buffer. The result
/// maps:
///
/// - `areaHa_user`, `areaHa_<d>km`: areas in hectares
/// - `pct_overlap_user`, `pct_overlap_<d>km`: percentage covered by the reference
/// - `intersect_geom_user`, `intersect_geom_<d>km`: the intersections in WGS84, only when
///   `include_geometry` is set
///
/// The computation is expressed as a graph and evaluated by the [`Executor`].
pub fn overlap_report(
    aoi: &FeatureCollection,
    reference: &FeatureCollection,
    config: &Config,
    include_geometry: bool,
) -> Result<BTreeMap<String, JsonValue>> {
    let (graph, outputs) = overlap_graph(aoi, reference, &config.buffer_distances_km, include_geometry);
    let graph = Graph::from_value(graph)?;
    let outputs: Vec<&str> = outputs.iter().map(String::as_str).collect();

    tracing::info!(
        "Computing overlap of {} AOI features with {} reference features at {} buffer distances",
        aoi.len(),
        reference.len(),
        config.buffer_distances_km.len()
    );
    Executor::new(Context::new(config.clone())).run(&graph, &outputs)
}

/// The graph description behind [`overlap_report`] and its output node names
pub fn overlap_graph(
    aoi: &FeatureCollection,
    reference: &FeatureCollection,
    distances_km: &[f64],
    include_geometry: bool,
) -> (JsonValue, Vec<String>) {
    let mut nodes = Map::new();
    let mut outputs = Vec::new();

    nodes.insert("input_aoi".into(), json!(["geojson", crate::wire::serialize(aoi)]));
    nodes.insert(
        "input_reference".into(),
        json!(["geojson", crate::wire::serialize(reference)]),
    );
    nodes.insert("aoi_dissolved".into(), json!(["dissolve", "input_aoi"]));
    nodes.insert("aoi_local".into(), json!(["project_local", "aoi_dissolved"]));
    nodes.insert("reference_dissolved".into(), json!(["dissolve", "input_reference"]));
    nodes.insert(
        "reference_local".into(),
        json!(["project_local", "reference_dissolved", "aoi_local"]),
    );

    let mut zones = vec![("user".to_string(), "aoi_local".to_string())];
    for distance in distances_km {
        let label = distance_label(*distance);
        let zone = format!("buffer_{label}");
        nodes.insert(zone.clone(), json!(["buffer_to_dist", "aoi_local", distance]));
        zones.push((label, zone));
    }

    for (label, zone) in zones {
        let area = format!("areaHa_{label}");
        let overlap = format!("intersection_{label}");
        let pct = format!("pct_overlap_{label}");
        nodes.insert(area.clone(), json!(["get_area", zone]));
        nodes.insert(overlap.clone(), json!(["intersect", zone, "reference_local"]));
        nodes.insert(pct.clone(), json!(["get_area_percent", overlap, area]));
        outputs.push(area);
        outputs.push(pct);

        if include_geometry {
            let geometry = format!("intersect_geom_{label}");
            nodes.insert(geometry.clone(), json!(["project_global", overlap]));
            outputs.push(geometry);
        }
    }

    (JsonValue::Object(nodes), outputs)
}

/// The dissolved AOI plus one buffer per distance, in WGS84
///
/// Features are named by their `name` property: `user_poly`, then `buffer_<d>km`.
pub fn dissolve_and_buffer(aoi: &FeatureCollection, distances_km: &[f64]) -> Result<FeatureCollection> {
    #[cfg(feature = "profiling")]
    profiling::scope!("analysis::dissolve_and_buffer");

    let dissolved = ops::dissolve(aoi, None)?;
    let local = projection::project_local(&dissolved, ProjectionKind::Equidistant)?;

    let mut features = Vec::with_capacity(distances_km.len() + 1);
    features.extend(
        dissolved
            .features
            .into_iter()
            .map(|feature| named(feature, "user_poly".to_string())),
    );
    for distance in distances_km {
        let buffered = ops::buffer_to_distance(&local, *distance)?;
        let global = projection::project_global(&buffered)?;
        let name = format!("buffer_{}", distance_label(*distance));
        features.extend(
            global
                .features
                .into_iter()
                .map(|feature| named(feature, name.clone())),
        );
    }

    Ok(FeatureCollection::new(features, Some(Crs::Global)))
}

fn named(feature: Feature, name: String) -> Feature {
    let mut properties = Properties::new();
    properties.insert("name".into(), JsonValue::String(name));
    Feature::new(feature.geometry, properties)
}
