//! Local metric projections and CRS bookkeeping
//!
//! Distances and areas are only meaningful in meters, so collections are moved into a
//! projection centred on their own data before buffering or measuring. Two spherical
//! azimuthal projections are provided:
//!
//! - azimuthal equidistant (default): true distances from the centre
//! - Lambert azimuthal equal-area: true areas everywhere
//!
//! Both use the WGS84 semi-major axis as sphere radius.

use crate::feature::Areal;
use crate::{Crs, Error, Feature, FeatureCollection, ProjectionKind, Result};
use geo::{Centroid, Coord, MapCoords};

/// WGS84 semi-major axis in meters
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Angular distances below this are treated as the projection centre
const CENTRE_EPSILON: f64 = 1e-15;

/// A spherical azimuthal projection centred on a WGS84 coordinate
#[derive(Clone, Copy, Debug)]
pub struct LocalProjection {
    /// Centre longitude in radians
    lon0: f64,
    /// Centre latitude in radians
    lat0: f64,
    /// Precomputed sin/cos of the centre latitude
    sin_lat0: f64,
    cos_lat0: f64,
    kind: ProjectionKind,
}

impl LocalProjection {
    /// Create a projection centred on `centre` (x = lon, y = lat, degrees)
    pub fn new(centre: Coord<f64>, kind: ProjectionKind) -> Self {
        let lat0 = centre.y.to_radians();
        Self {
            lon0: centre.x.to_radians(),
            lat0,
            sin_lat0: lat0.sin(),
            cos_lat0: lat0.cos(),
            kind,
        }
    }

    /// WGS84 degrees to local meters
    #[inline]
    pub fn forward(&self, coord: Coord<f64>) -> Coord<f64> {
        let lat = coord.y.to_radians();
        let delta_lon = coord.x.to_radians() - self.lon0;
        let (sin_lat, cos_lat) = lat.sin_cos();
        let cos_delta = delta_lon.cos();

        let cos_c = (self.sin_lat0 * sin_lat + self.cos_lat0 * cos_lat * cos_delta).clamp(-1.0, 1.0);
        let scale = match self.kind {
            ProjectionKind::Equidistant => {
                let c = cos_c.acos();
                if c.abs() < CENTRE_EPSILON { 1.0 } else { c / c.sin() }
            }
            ProjectionKind::EqualArea => (2.0 / (1.0 + cos_c)).sqrt(),
        };

        Coord {
            x: EARTH_RADIUS_M * scale * cos_lat * delta_lon.sin(),
            y: EARTH_RADIUS_M
                * scale
                * (self.cos_lat0 * sin_lat - self.sin_lat0 * cos_lat * cos_delta),
        }
    }

    /// Local meters back to WGS84 degrees
    #[inline]
    pub fn inverse(&self, coord: Coord<f64>) -> Coord<f64> {
        let rho = coord.x.hypot(coord.y);
        if rho < CENTRE_EPSILON {
            return Coord {
                x: self.lon0.to_degrees(),
                y: self.lat0.to_degrees(),
            };
        }

        let c = match self.kind {
            ProjectionKind::Equidistant => rho / EARTH_RADIUS_M,
            ProjectionKind::EqualArea => 2.0 * (rho / (2.0 * EARTH_RADIUS_M)).clamp(-1.0, 1.0).asin(),
        };
        let (sin_c, cos_c) = c.sin_cos();

        let lat = (cos_c * self.sin_lat0 + coord.y * sin_c * self.cos_lat0 / rho)
            .clamp(-1.0, 1.0)
            .asin();
        let lon = self.lon0
            + (coord.x * sin_c).atan2(rho * self.cos_lat0 * cos_c - coord.y * self.sin_lat0 * sin_c);

        Coord {
            x: normalize_longitude(lon.to_degrees()),
            y: lat.to_degrees(),
        }
    }
}

/// Wrap a longitude into [-180, 180]
#[inline]
fn normalize_longitude(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        lon
    } else {
        (lon + 180.0).rem_euclid(360.0) - 180.0
    }
}

/// Arithmetic mean of every feature's own centroid (not the centroid of the union)
pub fn mean_centroid(fc: &FeatureCollection) -> Result<Coord<f64>> {
    let centroids: Vec<Coord<f64>> = fc
        .features
        .iter()
        .filter_map(|feature| match &feature.geometry {
            Areal::Polygon(polygon) => polygon.centroid(),
            Areal::MultiPolygon(multi) => multi.centroid(),
        })
        .map(|point| point.0)
        .collect();

    if centroids.is_empty() {
        return Err(Error::EmptyInput {
            operation: "project_local",
        });
    }

    let n = centroids.len() as f64;
    let sum = centroids
        .iter()
        .fold(Coord { x: 0.0, y: 0.0 }, |acc, c| Coord {
            x: acc.x + c.x,
            y: acc.y + c.y,
        });
    Ok(Coord {
        x: sum.x / n,
        y: sum.y / n,
    })
}

/// Move a global collection into a projection centred on its mean centroid
pub fn project_local(fc: &FeatureCollection, kind: ProjectionKind) -> Result<FeatureCollection> {
    if fc.is_local() {
        return Err(Error::AlreadyProjected);
    }
    let centroid = mean_centroid(fc)?;
    tracing::debug!(
        "Projecting {} features to local {} at ({:.6}, {:.6})",
        fc.len(),
        kind.name(),
        centroid.x,
        centroid.y
    );
    Ok(reproject(fc, centroid, kind, Direction::ToLocal))
}

/// Move a global collection into the local frame carried by `frame`
///
/// Lets two collections share one metric CRS so they can be overlaid and compared.
pub fn project_local_in_frame(
    fc: &FeatureCollection,
    frame: &FeatureCollection,
) -> Result<FeatureCollection> {
    if fc.is_local() {
        return Err(Error::AlreadyProjected);
    }
    let (centroid, kind) = frame.local_frame().ok_or(Error::MissingCrs)?;
    Ok(reproject(fc, centroid, kind, Direction::ToLocal))
}

/// Move a local collection back to WGS84
pub fn project_global(fc: &FeatureCollection) -> Result<FeatureCollection> {
    match fc.crs {
        Some(Crs::Global) => Err(Error::AlreadyGlobal),
        None => Err(Error::MissingCrs),
        Some(Crs::Local { centroid, kind }) => {
            Ok(reproject(fc, centroid, kind, Direction::ToGlobal))
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    ToLocal,
    ToGlobal,
}

fn reproject(
    fc: &FeatureCollection,
    centroid: Coord<f64>,
    kind: ProjectionKind,
    direction: Direction,
) -> FeatureCollection {
    #[cfg(feature = "profiling")]
    profiling::scope!("projection::reproject");

    let projection = LocalProjection::new(centroid, kind);
    let transform = |coord: Coord<f64>| match direction {
        Direction::ToLocal => projection.forward(coord),
        Direction::ToGlobal => projection.inverse(coord),
    };

    let features = fc
        .features
        .iter()
        .map(|feature| {
            let geometry = match &feature.geometry {
                Areal::Polygon(polygon) => Areal::Polygon(polygon.map_coords(transform)),
                Areal::MultiPolygon(multi) => Areal::MultiPolygon(multi.map_coords(transform)),
            };
            Feature::new(geometry, feature.properties.clone())
        })
        .collect();

    let crs = match direction {
        Direction::ToLocal => Crs::Local { centroid, kind },
        Direction::ToGlobal => Crs::Global,
    };
    FeatureCollection::new(features, Some(crs))
}
