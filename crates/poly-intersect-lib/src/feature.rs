//! Feature storage module
//!
//! This module provides the in-memory representation shared by every operation:
//! areal geometries, their property maps and the CRS tag of a collection.

use geo::{BoundingRect, Coord, MultiPolygon, Polygon, Rect};
use serde_json::{Map, Value as JsonValue};

/// Property map attached to every feature
pub type Properties = Map<String, JsonValue>;

/// Areal geometry: the only geometric domain the engine works with
#[derive(Clone, Debug, PartialEq)]
pub enum Areal {
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

impl Areal {
    /// Build from an overlay result, collapsing single-part results to a polygon
    pub fn from_multi(multi: MultiPolygon<f64>) -> Self {
        if multi.0.len() == 1 {
            let mut parts = multi.0;
            match parts.pop() {
                Some(polygon) => Areal::Polygon(polygon),
                None => Areal::MultiPolygon(MultiPolygon::new(parts)),
            }
        } else {
            Areal::MultiPolygon(multi)
        }
    }

    /// View the geometry as a multipolygon (the overlay algorithms' input type)
    pub fn to_multi(&self) -> MultiPolygon<f64> {
        match self {
            Areal::Polygon(polygon) => MultiPolygon::new(vec![polygon.clone()]),
            Areal::MultiPolygon(multi) => multi.clone(),
        }
    }

    /// Consume the geometry into a multipolygon
    pub fn into_multi(self) -> MultiPolygon<f64> {
        match self {
            Areal::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
            Areal::MultiPolygon(multi) => multi,
        }
    }

    /// True when the geometry has no polygon parts at all
    pub fn is_empty(&self) -> bool {
        match self {
            Areal::Polygon(polygon) => polygon.exterior().0.is_empty(),
            Areal::MultiPolygon(multi) => multi.0.is_empty(),
        }
    }

    /// Axis-aligned envelope, `None` for empty geometries
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        match self {
            Areal::Polygon(polygon) => polygon.bounding_rect(),
            Areal::MultiPolygon(multi) => multi.bounding_rect(),
        }
    }

    /// Geometry type name as used on the wire
    pub fn type_name(&self) -> &'static str {
        match self {
            Areal::Polygon(_) => "Polygon",
            Areal::MultiPolygon(_) => "MultiPolygon",
        }
    }
}

/// Local projection family
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProjectionKind {
    /// Azimuthal equidistant (distances from the centre are true)
    #[default]
    Equidistant,
    /// Lambert azimuthal equal-area (areas are true everywhere)
    EqualArea,
}

impl ProjectionKind {
    /// Short name used in CRS blocks and graph arguments
    pub fn name(&self) -> &'static str {
        match self {
            ProjectionKind::Equidistant => "aeqd",
            ProjectionKind::EqualArea => "laea",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "aeqd" => Some(ProjectionKind::Equidistant),
            "laea" => Some(ProjectionKind::EqualArea),
            _ => None,
        }
    }
}

/// Coordinate reference system tag carried by a collection
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Crs {
    /// WGS84 longitude/latitude in degrees
    Global,
    /// Metric projection centred on `centroid` (lon, lat in degrees)
    Local {
        centroid: Coord<f64>,
        kind: ProjectionKind,
    },
}

/// A single areal feature
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub geometry: Areal,
    pub properties: Properties,
}

impl Feature {
    pub fn new(geometry: Areal, properties: Properties) -> Self {
        Self {
            geometry,
            properties,
        }
    }

    /// Property lookup treating JSON `null` as absent
    pub fn property(&self, name: &str) -> Option<&JsonValue> {
        self.properties.get(name).filter(|value| !value.is_null())
    }
}

/// An ordered set of features sharing one CRS tag
///
/// Operations never mutate a collection in place; every transformation returns a new one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
    pub crs: Option<Crs>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>, crs: Option<Crs>) -> Self {
        Self { features, crs }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// True if the collection carries a local (metric) CRS tag
    #[inline]
    pub fn is_local(&self) -> bool {
        matches!(self.crs, Some(Crs::Local { .. }))
    }

    /// The local frame, if any. An untagged collection is global.
    #[inline]
    pub fn local_frame(&self) -> Option<(Coord<f64>, ProjectionKind)> {
        match self.crs {
            Some(Crs::Local { centroid, kind }) => Some((centroid, kind)),
            _ => None,
        }
    }

    /// Whether two collections live in the same coordinate system
    pub fn same_crs(&self, other: &FeatureCollection) -> bool {
        match (self.local_frame(), other.local_frame()) {
            (None, None) => true,
            (Some((a, ka)), Some((b, kb))) => {
                ka == kb && (a.x - b.x).abs() < 1e-12 && (a.y - b.y).abs() < 1e-12
            }
            _ => false,
        }
    }

    /// Combined envelope of all features, `None` when empty
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.features
            .iter()
            .filter_map(|feature| feature.geometry.bounding_rect())
            .reduce(|acc, rect| {
                Rect::new(
                    Coord {
                        x: acc.min().x.min(rect.min().x),
                        y: acc.min().y.min(rect.min().y),
                    },
                    Coord {
                        x: acc.max().x.max(rect.max().x),
                        y: acc.max().y.max(rect.max().y),
                    },
                )
            })
    }
}
