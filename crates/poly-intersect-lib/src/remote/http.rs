use super::{FeatureQuery, FeatureService, HistogramQuery, RemoteSource};
use crate::{Error, FeatureCollection, Result};
use geo::{MultiPolygon, Rect};
use reqwest::blocking::Client;
use serde_json::{Value as JsonValue, json};
use std::time::Duration;

/// Remote source speaking the ArcGIS REST and CartoDB SQL APIs over blocking HTTP
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    /// Create a source whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("poly-intersect/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::RemoteFetch(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn get_json(&self, url: &str, params: &[(&str, String)]) -> Result<JsonValue> {
        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .map_err(|e| Error::RemoteFetch(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::RemoteFetch(format!("{url} answered HTTP {status}")));
        }

        let body: JsonValue = response
            .json()
            .map_err(|e| Error::RemoteFetch(format!("malformed payload from {url}: {e}")))?;

        // ArcGIS reports failures inside a 200 response
        if let Some(error) = body.get("error") {
            return Err(Error::RemoteFetch(format!("{url} returned an error: {error}")));
        }
        Ok(body)
    }
}

impl RemoteSource for HttpSource {
    fn fetch_features(&self, query: &FeatureQuery) -> Result<FeatureCollection> {
        let (url, params) = match &query.service {
            FeatureService::Esri { url } => (
                format!("{}/query", url.trim_end_matches('/')),
                esri_query_params(query),
            ),
            FeatureService::CartoDb { sql_url, table } => (
                sql_url.clone(),
                vec![
                    ("q", cartodb_sql(table, query)?),
                    ("format", "GeoJSON".to_string()),
                ],
            ),
        };

        let body = self.get_json(&url, &params)?;
        let fc = crate::wire::parse_value(body)
            .map_err(|e| Error::RemoteFetch(format!("malformed payload from {url}: {e}")))?;
        tracing::info!("Fetched {} features from {}", fc.len(), url);
        Ok(fc)
    }

    fn fetch_histogram(&self, query: &HistogramQuery) -> Result<Vec<f64>> {
        let url = format!("{}/computeHistograms", query.url.trim_end_matches('/'));
        let params = vec![
            ("geometry", esri_polygon(&query.geometry).to_string()),
            ("geometryType", "esriGeometryPolygon".to_string()),
            ("f", "json".to_string()),
        ];

        let body = self.get_json(&url, &params)?;
        histogram_counts(&body)
            .ok_or_else(|| Error::RemoteFetch(format!("malformed histogram payload from {url}")))
    }
}

fn esri_query_params(query: &FeatureQuery) -> Vec<(&'static str, String)> {
    let out_fields = if query.out_fields.is_empty() {
        "*".to_string()
    } else {
        query.out_fields.join(",")
    };
    vec![
        ("where", query.where_clause.clone().unwrap_or_else(|| "1=1".to_string())),
        ("geometry", envelope_param(query.envelope)),
        ("geometryType", "esriGeometryEnvelope".to_string()),
        ("inSR", "4326".to_string()),
        ("outSR", "4326".to_string()),
        ("spatialRel", "esriSpatialRelIntersects".to_string()),
        ("outFields", out_fields),
        ("returnGeometry", "true".to_string()),
        ("f", "geojson".to_string()),
    ]
}

fn envelope_param(envelope: Rect<f64>) -> String {
    let (min, max) = (envelope.min(), envelope.max());
    format!("{},{},{},{}", min.x, min.y, max.x, max.y)
}

/// SQL for a CartoDB table filtered by the query envelope
///
/// Table and field names are interpolated, so only plain identifiers are accepted.
fn cartodb_sql(table: &str, query: &FeatureQuery) -> Result<String> {
    for identifier in std::iter::once(table).chain(query.out_fields.iter().map(String::as_str)) {
        if !is_identifier(identifier) {
            return Err(Error::RemoteFetch(format!(
                "refusing to query CartoDB with identifier '{identifier}'"
            )));
        }
    }

    let columns = if query.out_fields.is_empty() {
        "*".to_string()
    } else {
        format!("{}, the_geom", query.out_fields.join(", "))
    };
    let (min, max) = (query.envelope.min(), query.envelope.max());
    let mut sql = format!(
        "SELECT {columns} FROM {table} WHERE ST_Intersects(the_geom, ST_MakeEnvelope({}, {}, {}, {}, 4326))",
        min.x, min.y, max.x, max.y
    );
    if let Some(clause) = &query.where_clause {
        sql.push_str(&format!(" AND ({clause})"));
    }
    Ok(sql)
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// ArcGIS polygon JSON: every exterior and interior ring of every part
fn esri_polygon(geometry: &MultiPolygon<f64>) -> JsonValue {
    let rings: Vec<Vec<[f64; 2]>> = geometry
        .iter()
        .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
        .map(|ring| ring.coords().map(|c| [c.x, c.y]).collect())
        .collect();
    json!({"rings": rings, "spatialReference": {"wkid": 4326}})
}

fn histogram_counts(body: &JsonValue) -> Option<Vec<f64>> {
    body.get("histograms")?
        .get(0)?
        .get("counts")?
        .as_array()?
        .iter()
        .map(JsonValue::as_f64)
        .collect()
}
