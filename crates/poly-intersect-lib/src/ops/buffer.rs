use crate::{Areal, Error, Feature, FeatureCollection, Result};
use geo::Buffer;
use rayon::prelude::*;

/// Buffer every feature by `distance_km` kilometers
///
/// Requires a locally projected collection since distances are only meaningful in meters.
/// The CRS tag and properties are preserved.
pub fn buffer_to_distance(fc: &FeatureCollection, distance_km: f64) -> Result<FeatureCollection> {
    #[cfg(feature = "profiling")]
    profiling::scope!("ops::buffer_to_distance");

    if !fc.is_local() {
        return Err(Error::ProjectionRequired {
            operation: "buffer_to_dist",
        });
    }
    if !distance_km.is_finite() {
        return Err(Error::InvalidArgument {
            operation: "buffer_to_dist",
            index: 1,
            reason: format!("distance must be a finite number of kilometers, got {distance_km}"),
        });
    }

    let distance_m = distance_km * 1000.0;
    let features = fc
        .features
        .par_iter()
        .map(|feature| {
            let buffered = feature.geometry.to_multi().buffer(distance_m);
            Feature::new(Areal::from_multi(buffered), feature.properties.clone())
        })
        .collect();

    Ok(FeatureCollection::new(features, fc.crs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{collection, square};
    use crate::{Crs, ProjectionKind};
    use geo::{Area, Coord};

    fn local(mut fc: FeatureCollection) -> FeatureCollection {
        fc.crs = Some(Crs::Local {
            centroid: Coord { x: -67.0, y: -13.0 },
            kind: ProjectionKind::Equidistant,
        });
        fc
    }

    #[test]
    fn test_buffer_requires_local_projection() {
        let fc = collection(vec![square(0.0, 0.0, 1.0)]);
        assert!(matches!(
            buffer_to_distance(&fc, 10.0),
            Err(Error::ProjectionRequired { .. })
        ));

        let mut global = fc.clone();
        global.crs = Some(Crs::Global);
        assert!(matches!(
            buffer_to_distance(&global, 10.0),
            Err(Error::ProjectionRequired { .. })
        ));
    }

    #[test]
    fn test_buffer_grows_every_feature() {
        let fc = local(collection(vec![
            square(0.0, 0.0, 1000.0),
            square(50_000.0, 0.0, 200.0),
        ]));
        let buffered = buffer_to_distance(&fc, 1.0).unwrap();
        assert_eq!(buffered.len(), 2);
        assert_eq!(buffered.crs, fc.crs);

        for (before, after) in fc.features.iter().zip(&buffered.features) {
            assert!(
                after.geometry.to_multi().unsigned_area() >= before.geometry.to_multi().unsigned_area()
            );
            assert_eq!(after.properties, before.properties);
        }

        // 1 km square grown by 1 km: square, four side strips and four quarter circles
        let area = buffered.features[0].geometry.to_multi().unsigned_area();
        let exact = 1.0e6 + 4.0 * 1.0e6 + std::f64::consts::PI * 1.0e6;
        assert!(area > 7.9e6 && area < exact * 1.01, "{area}");
    }

    #[test]
    fn test_buffer_rejects_non_finite_distance() {
        let fc = local(collection(vec![square(0.0, 0.0, 1.0)]));
        assert!(matches!(
            buffer_to_distance(&fc, f64::NAN),
            Err(Error::InvalidArgument { index: 1, .. })
        ));
    }
}
