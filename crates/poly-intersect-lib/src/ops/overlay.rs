use super::dissolve::union_all;
use super::{repair, require_same_crs};
use crate::{Areal, Feature, FeatureCollection, Quadtree, Result};
use geo::{BooleanOps, BoundingRect, Intersects, MultiPolygon};
use rayon::prelude::*;

/// Pairwise intersection of two collections
///
/// For each feature of `a` (outer loop, input order) the candidates of `b` come from a
/// bounding-box index and are confirmed with an exact test. Each intersecting pair emits
/// one feature carrying `b`'s properties overridden by `a`'s. Pieces that only touch along
/// an edge or a point produce no output.
pub fn intersect(a: &FeatureCollection, b: &FeatureCollection) -> Result<FeatureCollection> {
    #[cfg(feature = "profiling")]
    profiling::scope!("ops::intersect");

    require_same_crs("intersect", a, b)?;

    let index = Quadtree::build(b);
    let others = repaired_geometries(b);

    let features: Vec<Feature> = a
        .features
        .par_iter()
        .map(|feature| {
            let geometry = repair(feature.geometry.to_multi());
            let Some(envelope) = geometry.bounding_rect() else {
                return Vec::new();
            };

            index
                .query(envelope)
                .into_iter()
                .filter(|&position| geometry.intersects(&others[position]))
                .filter_map(|position| {
                    let piece = geometry.intersection(&others[position]);
                    if piece.0.is_empty() {
                        return None;
                    }
                    let mut properties = b.features[position].properties.clone();
                    properties.extend(feature.properties.clone());
                    Some(Feature::new(Areal::from_multi(piece), properties))
                })
                .collect()
        })
        .flatten()
        .collect();

    tracing::debug!(
        "Intersected {} x {} features into {} pieces",
        a.len(),
        b.len(),
        features.len()
    );
    Ok(FeatureCollection::new(features, a.crs))
}

/// Remove from every feature of `fc` the parts covered by `other`
///
/// Features keep their own properties; features erased completely are dropped.
pub fn erase(fc: &FeatureCollection, other: &FeatureCollection) -> Result<FeatureCollection> {
    #[cfg(feature = "profiling")]
    profiling::scope!("ops::erase");

    require_same_crs("erase", fc, other)?;

    let index = Quadtree::build(other);
    let others = repaired_geometries(other);

    let features: Vec<Feature> = fc
        .features
        .par_iter()
        .filter_map(|feature| {
            let geometry = repair(feature.geometry.to_multi());
            let overlapping: Vec<MultiPolygon<f64>> = match geometry.bounding_rect() {
                Some(envelope) => index
                    .query(envelope)
                    .into_iter()
                    .filter(|&position| geometry.intersects(&others[position]))
                    .map(|position| others[position].clone())
                    .collect(),
                None => Vec::new(),
            };

            let remainder = if overlapping.is_empty() {
                geometry
            } else {
                geometry.difference(&union_all(overlapping))
            };
            if remainder.0.is_empty() {
                return None;
            }
            Some(Feature::new(
                Areal::from_multi(remainder),
                feature.properties.clone(),
            ))
        })
        .collect();

    Ok(FeatureCollection::new(features, fc.crs))
}

fn repaired_geometries(fc: &FeatureCollection) -> Vec<MultiPolygon<f64>> {
    fc.features
        .par_iter()
        .map(|feature| repair(feature.geometry.to_multi()))
        .collect()
}
