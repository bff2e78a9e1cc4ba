//! Remote data sources and their fetch cache
//!
//! Remote layers are external collaborators: the engine only sees them through the
//! [`RemoteSource`] trait, which turns a query into a [`FeatureCollection`] or raw histogram
//! counts. Results are memoised per adapter kind in an injectable [`Cache`].

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpSource;

use crate::{FeatureCollection, Result, Value};
use geo::{CoordsIter, MultiPolygon, Rect};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Adapter kinds, each with its own cache
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceKind {
    /// ArcGIS REST FeatureServer layer
    EsriFeatureServer,
    /// CartoDB SQL API
    CartoDb,
    /// ArcGIS REST ImageServer histograms
    EsriImageServer,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [
        ServiceKind::EsriFeatureServer,
        ServiceKind::CartoDb,
        ServiceKind::EsriImageServer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ServiceKind::EsriFeatureServer => "esri:server",
            ServiceKind::CartoDb => "cartodb",
            ServiceKind::EsriImageServer => "esri:imageserver",
        }
    }
}

/// Where a feature query is sent
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureService {
    Esri { url: String },
    CartoDb { sql_url: String, table: String },
}

impl FeatureService {
    pub fn kind(&self) -> ServiceKind {
        match self {
            FeatureService::Esri { .. } => ServiceKind::EsriFeatureServer,
            FeatureService::CartoDb { .. } => ServiceKind::CartoDb,
        }
    }
}

/// Features of a remote layer intersecting an envelope (WGS84)
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureQuery {
    pub service: FeatureService,
    pub envelope: Rect<f64>,
    /// Requested attribute fields, all fields when empty
    pub out_fields: Vec<String>,
    pub where_clause: Option<String>,
}

impl FeatureQuery {
    /// Stable key identifying the request for caching
    pub fn cache_key(&self) -> String {
        let target = match &self.service {
            FeatureService::Esri { url } => url.clone(),
            FeatureService::CartoDb { sql_url, table } => format!("{sql_url}#{table}"),
        };
        format!(
            "{}|{}|{}|{}|{}",
            self.service.kind().name(),
            target,
            envelope_key(self.envelope),
            self.out_fields.join(","),
            self.where_clause.as_deref().unwrap_or("")
        )
    }
}

/// Histogram of a raster layer inside a polygon (WGS84)
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramQuery {
    pub url: String,
    pub geometry: MultiPolygon<f64>,
}

impl HistogramQuery {
    pub fn cache_key(&self) -> String {
        let coords: Vec<String> = self
            .geometry
            .coords_iter()
            .map(|c| format!("{:.9},{:.9}", c.x, c.y))
            .collect();
        format!(
            "{}|{}|{}",
            ServiceKind::EsriImageServer.name(),
            self.url,
            coords.join(";")
        )
    }
}

fn envelope_key(envelope: Rect<f64>) -> String {
    let (min, max) = (envelope.min(), envelope.max());
    format!("{:.9},{:.9},{:.9},{:.9}", min.x, min.y, max.x, max.y)
}

/// A remote data source
///
/// Implementations must surface every failure (transport, timeout, HTTP status,
/// malformed payload) as [`crate::Error::RemoteFetch`] and never return partial results.
pub trait RemoteSource: Send + Sync {
    fn fetch_features(&self, query: &FeatureQuery) -> Result<FeatureCollection>;

    fn fetch_histogram(&self, query: &HistogramQuery) -> Result<Vec<f64>>;
}

/// Memoisation store for remote results
///
/// Cached values are immutable snapshots shared behind `Arc`.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn put(&self, key: String, value: Value);
}

/// Least-recently-used cache with a fixed capacity
///
/// A capacity of zero disables caching.
pub struct LruCache {
    entries: Option<Mutex<lru::LruCache<String, Value>>>,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|capacity| Mutex::new(lru::LruCache::new(capacity))),
        }
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries
            .as_ref()
            .map(|entries| entries.lock().unwrap_or_else(|e| e.into_inner()).len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for LruCache {
    fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.as_ref()?;
        entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn put(&self, key: String, value: Value) {
        if let Some(entries) = &self.entries {
            entries.lock().unwrap_or_else(|e| e.into_inner()).put(key, value);
        }
    }
}

/// Fetch features through `cache`; failures are returned and never cached
pub fn fetch_features_cached(
    source: &dyn RemoteSource,
    cache: &dyn Cache,
    query: &FeatureQuery,
) -> Result<Arc<FeatureCollection>> {
    let key = query.cache_key();
    if let Some(Value::Features(fc)) = cache.get(&key) {
        tracing::debug!("Cache hit for {}", query.service.kind().name());
        return Ok(fc);
    }

    tracing::debug!("Cache miss for {}, fetching", query.service.kind().name());
    let fc = Arc::new(source.fetch_features(query)?);
    cache.put(key, Value::Features(fc.clone()));
    Ok(fc)
}

/// Fetch histogram counts through `cache`; failures are returned and never cached
pub fn fetch_histogram_cached(
    source: &dyn RemoteSource,
    cache: &dyn Cache,
    query: &HistogramQuery,
) -> Result<Arc<Vec<f64>>> {
    let key = query.cache_key();
    if let Some(Value::Histogram(counts)) = cache.get(&key) {
        tracing::debug!("Cache hit for {}", ServiceKind::EsriImageServer.name());
        return Ok(counts);
    }

    tracing::debug!("Cache miss for {}, fetching", ServiceKind::EsriImageServer.name());
    let counts = Arc::new(source.fetch_histogram(query)?);
    cache.put(key, Value::Histogram(counts.clone()));
    Ok(counts)
}
