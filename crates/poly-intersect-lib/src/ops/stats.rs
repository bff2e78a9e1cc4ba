use super::{CategoryKey, M2_PER_HECTARE, labelled};
use crate::{Areal, Error, Feature, FeatureCollection, Result, Statistic};
use geo::Area;
use std::collections::BTreeMap;

/// Area in hectares, as one scalar or grouped by `field`
///
/// Without a field the collection must hold at most one feature (dissolve first).
/// Features lacking the field are summed under the `null` key. Grouping follows value
/// equality; distinct values with the same text (`1` and `"1"`) are a cardinality error.
pub fn get_area(fc: &FeatureCollection, field: Option<&str>) -> Result<Statistic> {
    warn_if_not_local(fc, "get_area");

    match field {
        None => {
            if fc.len() > 1 {
                return Err(Error::AmbiguousAggregation { count: fc.len() });
            }
            Ok(Statistic::Scalar(
                fc.features.first().map(feature_hectares).unwrap_or(0.0),
            ))
        }
        Some(field) => {
            let mut grouped: BTreeMap<CategoryKey, f64> = BTreeMap::new();
            for feature in &fc.features {
                let key = CategoryKey::of(feature.property(field));
                *grouped.entry(key).or_default() += feature_hectares(feature);
            }
            Ok(Statistic::Grouped(labelled(field, grouped)?))
        }
    }
}

/// Percentage of a reference area covered by the collection
///
/// | `aoi_field` | `intersect_field` | reference  | result                        |
/// |-------------|-------------------|------------|-------------------------------|
/// | -           | -                 | scalar     | scalar                        |
/// | -           | set               | scalar     | category -> percent           |
/// | set         | -                 | per AOI    | AOI -> percent                |
/// | set         | set               | per AOI    | AOI -> category -> percent    |
///
/// Per-AOI results are keyed by the reference mapping; AOIs absent from the collection
/// report 0. Values are not clamped: overlapping inputs can exceed 100.
pub fn get_area_percent(
    fc: &FeatureCollection,
    reference: &Statistic,
    aoi_field: Option<&str>,
    intersect_field: Option<&str>,
) -> Result<Statistic> {
    warn_if_not_local(fc, "get_area_percent");

    match (aoi_field, intersect_field) {
        (None, None) => {
            let whole = scalar_reference(reference)?;
            let part = get_area(fc, None)?.as_scalar().unwrap_or(0.0);
            Ok(Statistic::Scalar(percent(part, whole)?))
        }
        (None, Some(category)) => {
            let whole = scalar_reference(reference)?;
            let grouped = strict_groups(fc, category)?
                .into_iter()
                .map(|(key, part)| Ok((key, percent(part, whole)?)))
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok(Statistic::Grouped(grouped))
        }
        (Some(aoi), None) => {
            let references = grouped_reference(reference, aoi)?;
            let parts = strict_groups(fc, aoi)?;
            check_known_aois(parts.keys(), references, aoi)?;

            let grouped = references
                .iter()
                .map(|(key, whole)| {
                    let part = parts.get(key).copied().unwrap_or(0.0);
                    Ok((key.clone(), percent(part, *whole)?))
                })
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok(Statistic::Grouped(grouped))
        }
        (Some(aoi), Some(category)) => {
            let references = grouped_reference(reference, aoi)?;

            let mut keyed: BTreeMap<CategoryKey, BTreeMap<CategoryKey, f64>> = BTreeMap::new();
            for (position, feature) in fc.features.iter().enumerate() {
                let aoi_key = required_key(fc, position, aoi)?;
                let category_value = required_key(fc, position, category)?;
                *keyed
                    .entry(aoi_key)
                    .or_default()
                    .entry(category_value)
                    .or_default() += feature_hectares(feature);
            }
            let parts = labelled(aoi, keyed)?
                .into_iter()
                .map(|(aoi_label, categories)| Ok((aoi_label, labelled(category, categories)?)))
                .collect::<Result<BTreeMap<_, _>>>()?;
            check_known_aois(parts.keys(), references, aoi)?;

            let nested = references
                .iter()
                .map(|(key, whole)| {
                    let categories = match parts.get(key) {
                        Some(categories) => categories
                            .iter()
                            .map(|(category, part)| Ok((category.clone(), percent(*part, *whole)?)))
                            .collect::<Result<BTreeMap<_, _>>>()?,
                        None => BTreeMap::new(),
                    };
                    Ok((key.clone(), categories))
                })
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok(Statistic::Nested(nested))
        }
    }
}

fn feature_hectares(feature: &Feature) -> f64 {
    let area_m2 = match &feature.geometry {
        Areal::Polygon(polygon) => polygon.unsigned_area(),
        Areal::MultiPolygon(multi) => multi.unsigned_area(),
    };
    area_m2 / M2_PER_HECTARE
}

fn percent(part: f64, whole: f64) -> Result<f64> {
    if whole == 0.0 {
        if part == 0.0 {
            return Ok(0.0);
        }
        return Err(Error::InvalidArgument {
            operation: "get_area_percent",
            index: 1,
            reason: format!("reference area is zero but the covered area is {part} ha"),
        });
    }
    Ok(part / whole * 100.0)
}

fn warn_if_not_local(fc: &FeatureCollection, operation: &str) {
    if !fc.is_local() && !fc.is_empty() {
        tracing::warn!(
            "{} on a collection without a local CRS: areas are in squared source units",
            operation
        );
    }
}

fn scalar_reference(reference: &Statistic) -> Result<f64> {
    match reference {
        Statistic::Scalar(value) => Ok(*value),
        Statistic::Grouped(_) => Err(Error::CategoryCardinality {
            field: "aoi_field".to_string(),
            reason: "a per-AOI reference mapping requires an AOI field".to_string(),
        }),
        Statistic::Nested(_) => Err(Error::InvalidArgument {
            operation: "get_area_percent",
            index: 1,
            reason: "reference area must be a number or a mapping of numbers".to_string(),
        }),
    }
}

fn grouped_reference<'a>(
    reference: &'a Statistic,
    aoi: &str,
) -> Result<&'a BTreeMap<String, f64>> {
    match reference {
        Statistic::Grouped(map) => Ok(map),
        Statistic::Scalar(_) => Err(Error::CategoryCardinality {
            field: aoi.to_string(),
            reason: "grouping by AOI requires a reference area per AOI".to_string(),
        }),
        Statistic::Nested(_) => Err(Error::InvalidArgument {
            operation: "get_area_percent",
            index: 1,
            reason: "reference area must be a number or a mapping of numbers".to_string(),
        }),
    }
}

/// Group property value of one feature; a missing value is a cardinality error
fn required_key(fc: &FeatureCollection, position: usize, field: &str) -> Result<CategoryKey> {
    match CategoryKey::of(fc.features[position].property(field)) {
        CategoryKey::Missing => Err(Error::CategoryCardinality {
            field: field.to_string(),
            reason: format!("feature {position} has no value for the grouping field"),
        }),
        key => Ok(key),
    }
}

fn strict_groups(fc: &FeatureCollection, field: &str) -> Result<BTreeMap<String, f64>> {
    let mut grouped: BTreeMap<CategoryKey, f64> = BTreeMap::new();
    for (position, feature) in fc.features.iter().enumerate() {
        let key = required_key(fc, position, field)?;
        *grouped.entry(key).or_default() += feature_hectares(feature);
    }
    labelled(field, grouped)
}

fn check_known_aois<'a>(
    keys: impl Iterator<Item = &'a String>,
    references: &BTreeMap<String, f64>,
    aoi: &str,
) -> Result<()> {
    for key in keys {
        if !references.contains_key(key) {
            return Err(Error::CategoryCardinality {
                field: aoi.to_string(),
                reason: format!("AOI '{key}' has no reference area"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{collection, square};
    use crate::ops::intersect;
    use crate::{Crs, ProjectionKind};
    use geo::Coord;
    use serde_json::{Value as JsonValue, json};

    fn local(mut fc: FeatureCollection) -> FeatureCollection {
        fc.crs = Some(Crs::Local {
            centroid: Coord { x: 0.0, y: 0.0 },
            kind: ProjectionKind::Equidistant,
        });
        fc
    }

    /// Local features of `size` meters square, tagged with (aoi, landcover)
    fn categorised(items: &[(f64, &str, &str)]) -> FeatureCollection {
        let features = items
            .iter()
            .enumerate()
            .map(|(position, (size, aoi, category))| {
                let mut feature = Feature::new(
                    square(position as f64 * 10_000.0, 0.0, *size),
                    Default::default(),
                );
                feature.properties.insert("aoi".into(), json!(aoi));
                feature.properties.insert("landcover".into(), json!(category));
                feature
            })
            .collect();
        local(FeatureCollection::new(features, None))
    }

    #[test]
    fn test_get_area_hectares() {
        // 1 km x 1 km = 100 ha
        let fc = local(collection(vec![square(0.0, 0.0, 1000.0)]));
        assert_eq!(get_area(&fc, None).unwrap(), Statistic::Scalar(100.0));

        let empty = local(FeatureCollection::default());
        assert_eq!(get_area(&empty, None).unwrap(), Statistic::Scalar(0.0));
    }

    #[test]
    fn test_get_area_ambiguous_without_field() {
        let fc = local(collection(vec![square(0.0, 0.0, 1.0), square(5.0, 0.0, 1.0)]));
        assert!(matches!(
            get_area(&fc, None),
            Err(Error::AmbiguousAggregation { count: 2 })
        ));
    }

    #[test]
    fn test_get_area_grouped() {
        let fc = categorised(&[(100.0, "a", "forest"), (200.0, "a", "crop"), (100.0, "b", "forest")]);
        let Statistic::Grouped(grouped) = get_area(&fc, Some("landcover")).unwrap() else {
            panic!("expected grouped areas");
        };
        assert!((grouped["forest"] - 2.0).abs() < 1e-9);
        assert!((grouped["crop"] - 4.0).abs() < 1e-9);

        let Statistic::Grouped(missing) = get_area(&fc, Some("absent")).unwrap() else {
            panic!("expected grouped areas");
        };
        assert!((missing["null"] - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_get_area_groups_by_value() {
        let mut fc = categorised(&[(100.0, "a", "x"), (100.0, "a", "x"), (100.0, "a", "x")]);
        fc.features[0].properties.insert("class".into(), json!(2));
        fc.features[1].properties.insert("class".into(), json!(2.0));
        fc.features[2].properties.insert("class".into(), json!(3));
        let Statistic::Grouped(grouped) = get_area(&fc, Some("class")).unwrap() else {
            panic!("expected grouped areas");
        };
        assert_eq!(grouped.len(), 2);
        assert!((grouped["2"] - 2.0).abs() < 1e-9);
        assert!((grouped["3"] - 1.0).abs() < 1e-9);

        // Same text, different values
        fc.features[2].properties.insert("class".into(), json!("2"));
        assert!(matches!(
            get_area(&fc, Some("class")),
            Err(Error::CategoryCardinality { .. })
        ));
    }

    #[test]
    fn test_identical_square_overlap_is_100_percent() {
        let aoi = local(collection(vec![square(0.0, 0.0, 1000.0)]));
        let reference = local(collection(vec![square(0.0, 0.0, 1000.0)]));

        let overlap = intersect(&aoi, &reference).unwrap();
        let whole = get_area(&aoi, None).unwrap();
        let pct = get_area_percent(&overlap, &whole, None, None).unwrap();
        assert!((pct.as_scalar().unwrap() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_percent_per_category() {
        let fc = categorised(&[(100.0, "a", "forest"), (200.0, "a", "crop")]);
        let Statistic::Grouped(grouped) =
            get_area_percent(&fc, &Statistic::Scalar(10.0), None, Some("landcover")).unwrap()
        else {
            panic!("expected grouped percentages");
        };
        assert!((grouped["forest"] - 10.0).abs() < 1e-9);
        assert!((grouped["crop"] - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_percent_per_aoi_defaults_missing_to_zero() {
        let fc = categorised(&[(100.0, "a", "forest"), (100.0, "a", "crop")]);
        let reference = Statistic::Grouped(BTreeMap::from([
            ("a".to_string(), 4.0),
            ("b".to_string(), 7.0),
        ]));
        let Statistic::Grouped(grouped) =
            get_area_percent(&fc, &reference, Some("aoi"), None).unwrap()
        else {
            panic!("expected grouped percentages");
        };
        assert!((grouped["a"] - 50.0).abs() < 1e-9);
        assert_eq!(grouped["b"], 0.0);
    }

    #[test]
    fn test_percent_nested() {
        let fc = categorised(&[(100.0, "a", "forest"), (200.0, "a", "crop"), (100.0, "b", "forest")]);
        let reference = Statistic::Grouped(BTreeMap::from([
            ("a".to_string(), 10.0),
            ("b".to_string(), 2.0),
            ("c".to_string(), 1.0),
        ]));
        let Statistic::Nested(nested) =
            get_area_percent(&fc, &reference, Some("aoi"), Some("landcover")).unwrap()
        else {
            panic!("expected nested percentages");
        };
        assert!((nested["a"]["forest"] - 10.0).abs() < 1e-9);
        assert!((nested["a"]["crop"] - 40.0).abs() < 1e-9);
        assert!((nested["b"]["forest"] - 50.0).abs() < 1e-9);
        assert!(nested["c"].is_empty());
    }

    #[test]
    fn test_percent_cardinality_errors() {
        let fc = categorised(&[(100.0, "a", "forest")]);

        // Mapping reference without an AOI field
        let mapping = Statistic::Grouped(BTreeMap::from([("a".to_string(), 1.0)]));
        assert!(matches!(
            get_area_percent(&fc, &mapping, None, None),
            Err(Error::CategoryCardinality { .. })
        ));

        // AOI field with a scalar reference
        assert!(matches!(
            get_area_percent(&fc, &Statistic::Scalar(1.0), Some("aoi"), None),
            Err(Error::CategoryCardinality { .. })
        ));

        // AOI missing from the reference
        let other = Statistic::Grouped(BTreeMap::from([("z".to_string(), 1.0)]));
        assert!(matches!(
            get_area_percent(&fc, &other, Some("aoi"), None),
            Err(Error::CategoryCardinality { .. })
        ));

        // Feature without the category value
        let mut untagged = fc.clone();
        untagged.features[0]
            .properties
            .insert("landcover".into(), JsonValue::Null);
        assert!(matches!(
            get_area_percent(&untagged, &Statistic::Scalar(1.0), None, Some("landcover")),
            Err(Error::CategoryCardinality { .. })
        ));
    }

    #[test]
    fn test_percent_is_not_clamped() {
        // Double-counted overlap: two identical features against one reference area
        let fc = categorised(&[(100.0, "a", "forest"), (100.0, "a", "forest")]);
        let Statistic::Grouped(grouped) =
            get_area_percent(&fc, &Statistic::Scalar(1.0), None, Some("landcover")).unwrap()
        else {
            panic!("expected grouped percentages");
        };
        assert!((grouped["forest"] - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_reference_area() {
        let empty = local(FeatureCollection::default());
        assert_eq!(
            get_area_percent(&empty, &Statistic::Scalar(0.0), None, None).unwrap(),
            Statistic::Scalar(0.0)
        );

        let fc = local(collection(vec![square(0.0, 0.0, 100.0)]));
        assert!(matches!(
            get_area_percent(&fc, &Statistic::Scalar(0.0), None, None),
            Err(Error::InvalidArgument { .. })
        ));
    }
}
