use super::{Arg, Graph, Node, Operation};
use crate::remote::{
    self, Cache, FeatureQuery, FeatureService, HistogramQuery, LruCache, RemoteSource, ServiceKind,
};
use crate::{
    Config, Error, FeatureCollection, ProjectionKind, Result, Statistic, Value, ops, projection,
};
use dashmap::DashMap;
use geo::{MultiPolygon, Rect};
use rayon::prelude::*;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything an evaluation may use besides the graph itself
///
/// Holds the configuration, the remote source (if any) and one fetch cache per adapter
/// kind. The caches outlive single requests; everything else an evaluation creates is
/// dropped when it returns.
#[derive(Clone)]
pub struct Context {
    config: Config,
    source: Option<Arc<dyn RemoteSource>>,
    caches: BTreeMap<ServiceKind, Arc<dyn Cache>>,
}

impl Context {
    /// A context without remote source, with an LRU cache per adapter kind
    pub fn new(config: Config) -> Self {
        let caches = ServiceKind::ALL
            .into_iter()
            .map(|kind| {
                let cache: Arc<dyn Cache> = Arc::new(LruCache::new(config.fetch_cache_capacity));
                (kind, cache)
            })
            .collect();
        Self {
            config,
            source: None,
            caches,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn RemoteSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Use the HTTP adapters, with the configured timeout
    #[cfg(feature = "http")]
    pub fn with_http(self) -> Result<Self> {
        let source = remote::HttpSource::new(self.config.fetch_timeout)?;
        Ok(self.with_source(Arc::new(source)))
    }

    /// Replace the cache used for one adapter kind
    pub fn with_cache(mut self, kind: ServiceKind, cache: Arc<dyn Cache>) -> Self {
        self.caches.insert(kind, cache);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn source(&self) -> Result<&dyn RemoteSource> {
        self.source
            .as_deref()
            .ok_or_else(|| Error::RemoteFetch("no remote data source is configured".to_string()))
    }

    fn cache(&self, kind: ServiceKind) -> Result<&dyn Cache> {
        self.caches
            .get(&kind)
            .map(|cache| cache.as_ref())
            .ok_or_else(|| Error::RemoteFetch(format!("no cache for {}", kind.name())))
    }
}

/// Evaluates validated graphs
pub struct Executor {
    context: Context,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Executor {
    pub fn new(context: Context) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Evaluate the requested outputs and serialise them
    ///
    /// Feature collections go through the GeoJSON adapter, statistics pass through.
    pub fn run(&self, graph: &Graph, outputs: &[&str]) -> Result<BTreeMap<String, JsonValue>> {
        Ok(self
            .evaluate(graph, outputs)?
            .into_iter()
            .map(|(name, value)| (name, value.to_json()))
            .collect())
    }

    /// Evaluate the requested outputs and their ancestors
    ///
    /// Each scheduled node runs exactly once. Nodes of one wave are independent and run
    /// on the rayon pool when [`Config::parallel`] is set. The first failure (in
    /// topological order) aborts the request; no partial results are returned.
    pub fn evaluate(&self, graph: &Graph, outputs: &[&str]) -> Result<BTreeMap<String, Value>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("executor::evaluate");

        let waves = graph.waves(outputs)?;
        let memo: DashMap<String, Value> = DashMap::new();

        for wave in &waves {
            let results: Vec<Result<()>> = if self.context.config.parallel && wave.len() > 1 {
                wave.par_iter().map(|node| self.evaluate_node(node, &memo)).collect()
            } else {
                wave.iter().map(|node| self.evaluate_node(node, &memo)).collect()
            };
            results.into_iter().collect::<Result<Vec<()>>>()?;
        }

        outputs
            .iter()
            .map(|name| {
                memo.get(*name)
                    .map(|value| (name.to_string(), value.clone()))
                    .ok_or_else(|| Error::UnresolvedReference(name.to_string()))
            })
            .collect()
    }

    fn evaluate_node(&self, node: &Node, memo: &DashMap<String, Value>) -> Result<()> {
        tracing::debug!("Evaluating node '{}' ({})", node.name, node.operation);
        let args = Args { node, memo };
        let value = self.apply(node.operation, &args).map_err(|source| Error::Node {
            node: node.name.clone(),
            operation: node.operation.name(),
            source: Box::new(source),
        })?;
        memo.insert(node.name.clone(), value);
        Ok(())
    }

    fn apply(&self, operation: Operation, args: &Args<'_>) -> Result<Value> {
        let value = match operation {
            Operation::GeoJson => Value::Features(args.features(0)?),
            Operation::EsriServer => {
                let query = FeatureQuery {
                    service: FeatureService::Esri {
                        url: args.string(0)?,
                    },
                    envelope: query_envelope(&*args.features(1)?, operation)?,
                    out_fields: args.field_list(2)?,
                    where_clause: args.optional_string(3)?,
                };
                self.fetch_features(&query)?
            }
            Operation::CartoDb => {
                let query = FeatureQuery {
                    service: FeatureService::CartoDb {
                        sql_url: args.string(0)?,
                        table: args.string(1)?,
                    },
                    envelope: query_envelope(&*args.features(2)?, operation)?,
                    out_fields: args.field_list(3)?,
                    where_clause: args.optional_string(4)?,
                };
                self.fetch_features(&query)?
            }
            Operation::EsriImageServer => {
                let aoi = args.features(1)?;
                query_envelope(&aoi, operation)?;
                let merged = ops::dissolve(&aoi, None)?;
                let query = HistogramQuery {
                    url: args.string(0)?,
                    geometry: merged
                        .features
                        .into_iter()
                        .next()
                        .map(|feature| feature.geometry.into_multi())
                        .unwrap_or_else(|| MultiPolygon::new(Vec::new())),
                };
                let counts = remote::fetch_histogram_cached(
                    self.context.source()?,
                    self.context.cache(ServiceKind::EsriImageServer)?,
                    &query,
                )?;
                Value::Histogram(counts)
            }
            Operation::Dissolve => Value::features(ops::dissolve(
                &*args.features(0)?,
                args.optional_string(1)?.as_deref(),
            )?),
            Operation::Intersect => {
                Value::features(ops::intersect(&*args.features(0)?, &*args.features(1)?)?)
            }
            Operation::Erase => Value::features(ops::erase(&*args.features(0)?, &*args.features(1)?)?),
            Operation::BufferToDist => Value::features(ops::buffer_to_distance(
                &*args.features(0)?,
                args.number(1)?,
            )?),
            Operation::ProjectLocal => {
                let fc = args.features(0)?;
                match args.get(1) {
                    None | Some(Arg::Literal(JsonValue::Null)) => {
                        Value::features(projection::project_local(&fc, ProjectionKind::default())?)
                    }
                    Some(Arg::Literal(JsonValue::String(name))) => {
                        let kind = ProjectionKind::from_name(name).ok_or_else(|| {
                            args.invalid(1, format!("unknown projection '{name}', expected aeqd or laea"))
                        })?;
                        Value::features(projection::project_local(&fc, kind)?)
                    }
                    Some(Arg::Ref(_)) => {
                        let frame = args.features(1)?;
                        Value::features(projection::project_local_in_frame(&fc, &frame)?)
                    }
                    Some(Arg::Literal(other)) => {
                        return Err(args.invalid(
                            1,
                            format!("expected a local node or a projection name, got {other}"),
                        ));
                    }
                }
            }
            Operation::ProjectGlobal => {
                Value::features(projection::project_global(&*args.features(0)?)?)
            }
            Operation::GetArea => Value::Statistic(ops::get_area(
                &*args.features(0)?,
                args.optional_string(1)?.as_deref(),
            )?),
            Operation::GetAreaPercent => Value::Statistic(ops::get_area_percent(
                &*args.features(0)?,
                &args.statistic(1)?,
                args.optional_string(2)?.as_deref(),
                args.optional_string(3)?.as_deref(),
            )?),
        };
        Ok(value)
    }

    fn fetch_features(&self, query: &FeatureQuery) -> Result<Value> {
        let fc = remote::fetch_features_cached(
            self.context.source()?,
            self.context.cache(query.service.kind())?,
            query,
        )?;
        Ok(Value::Features(fc))
    }
}

/// Envelope of a querying AOI, which must be a non-empty WGS84 collection
fn query_envelope(aoi: &FeatureCollection, operation: Operation) -> Result<Rect<f64>> {
    if aoi.is_local() {
        return Err(Error::InvalidArgument {
            operation: operation.name(),
            index: operation.collection_slots().first().copied().unwrap_or(0),
            reason: "the querying AOI must be in global WGS84 coordinates".to_string(),
        });
    }
    aoi.bounding_rect().ok_or(Error::EmptyInput {
        operation: operation.name(),
    })
}

/// Typed access to the arguments of one node
struct Args<'a> {
    node: &'a Node,
    memo: &'a DashMap<String, Value>,
}

impl Args<'_> {
    fn get(&self, index: usize) -> Option<&Arg> {
        self.node.args.get(index)
    }

    fn invalid(&self, index: usize, reason: String) -> Error {
        Error::InvalidArgument {
            operation: self.node.operation.name(),
            index,
            reason,
        }
    }

    /// Output of a referenced node, which is guaranteed evaluated by wave ordering
    fn resolved(&self, name: &str) -> Result<Value> {
        self.memo
            .get(name)
            .map(|value| value.clone())
            .ok_or_else(|| Error::UnresolvedReference(name.to_string()))
    }

    /// A feature collection from a reference or an inline document
    fn features(&self, index: usize) -> Result<Arc<FeatureCollection>> {
        match self.get(index) {
            Some(Arg::Ref(name)) => match self.resolved(name)? {
                Value::Features(fc) => Ok(fc),
                other => Err(self.invalid(
                    index,
                    format!("node '{name}' is a {}, not a feature collection", other.kind()),
                )),
            },
            Some(Arg::Literal(literal)) => Ok(Arc::new(crate::wire::parse_value(literal.clone())?)),
            None => Err(self.invalid(index, "missing feature collection".to_string())),
        }
    }

    fn string(&self, index: usize) -> Result<String> {
        self.optional_string(index)?
            .ok_or_else(|| self.invalid(index, "missing string".to_string()))
    }

    /// A string literal; an absent argument or `null` is `None`
    fn optional_string(&self, index: usize) -> Result<Option<String>> {
        match self.get(index) {
            None | Some(Arg::Literal(JsonValue::Null)) => Ok(None),
            Some(Arg::Literal(JsonValue::String(text))) => Ok(Some(text.clone())),
            Some(Arg::Ref(name)) => Err(self.invalid(
                index,
                format!("expected a string, got a reference to node '{name}'"),
            )),
            Some(Arg::Literal(other)) => {
                Err(self.invalid(index, format!("expected a string, got {other}")))
            }
        }
    }

    /// Field list as an array of names or a comma separated string; `"*"` means all
    fn field_list(&self, index: usize) -> Result<Vec<String>> {
        let fields: Vec<String> = match self.get(index) {
            None | Some(Arg::Literal(JsonValue::Null)) => Vec::new(),
            Some(Arg::Literal(JsonValue::String(text))) => text
                .split(',')
                .map(str::trim)
                .filter(|field| !field.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Arg::Literal(JsonValue::Array(items))) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.invalid(index, format!("field names must be strings, got {item}")))
                })
                .collect::<Result<_>>()?,
            Some(other) => {
                return Err(self.invalid(index, format!("expected a field list, got {other:?}")));
            }
        };
        if fields.iter().any(|field| field == "*") {
            return Ok(Vec::new());
        }
        Ok(fields)
    }

    /// A number literal or a scalar statistic node
    fn number(&self, index: usize) -> Result<f64> {
        match self.get(index) {
            Some(Arg::Literal(JsonValue::Number(number))) => number
                .as_f64()
                .ok_or_else(|| self.invalid(index, format!("{number} is not representable"))),
            Some(Arg::Ref(_)) => self
                .statistic(index)?
                .as_scalar()
                .ok_or_else(|| self.invalid(index, "expected a scalar statistic".to_string())),
            other => Err(self.invalid(index, format!("expected a number, got {other:?}"))),
        }
    }

    /// A statistic node, a number, or a mapping of numbers
    fn statistic(&self, index: usize) -> Result<Statistic> {
        match self.get(index) {
            Some(Arg::Ref(name)) => match self.resolved(name)? {
                Value::Statistic(statistic) => Ok(statistic),
                other => Err(self.invalid(
                    index,
                    format!("node '{name}' is a {}, not a statistic", other.kind()),
                )),
            },
            Some(Arg::Literal(literal)) => Statistic::from_json(literal).ok_or_else(|| {
                self.invalid(index, format!("expected a number or a mapping of numbers, got {literal}"))
            }),
            None => Err(self.invalid(index, "missing statistic".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::square_geojson;
    use crate::remote::tests::FakeSource;
    use serde_json::json;
    use std::str::FromStr;
    use std::sync::atomic::Ordering;

    fn executor() -> Executor {
        Executor::new(Context::new(Config::default()))
    }

    fn sequential() -> Executor {
        Executor::new(Context::new(Config {
            parallel: false,
            ..Config::default()
        }))
    }

    /// Roughly 1 km^2 near the equator, in degrees
    fn aoi_doc() -> JsonValue {
        square_geojson(-67.0, -13.0, 0.009)
    }

    #[test]
    fn test_buffer_without_projection_fails_whole_request() {
        let graph = Graph::from_value(json!({
            "a": ["geojson", aoi_doc()],
            "b": ["dissolve", "a"],
            "c": ["buffer_to_dist", "b", 10],
        }))
        .unwrap();

        let err = executor().run(&graph, &["c"]).unwrap_err();
        match &err {
            Error::Node { node, operation, .. } => {
                assert_eq!(node, "c");
                assert_eq!(*operation, "buffer_to_dist");
            }
            other => panic!("expected a node error, got {other:?}"),
        }
        assert!(matches!(err.root(), Error::ProjectionRequired { .. }));
    }

    #[test]
    fn test_full_pipeline_outputs() {
        let graph = Graph::from_value(json!({
            "aoi": ["geojson", aoi_doc()],
            "dissolved": ["dissolve", "aoi"],
            "local": ["project_local", "dissolved"],
            "buffered": ["buffer_to_dist", "local", 1],
            "ring": ["erase", "buffered", "local"],
            "area": ["get_area", "local"],
            "buffer_area": ["get_area", "buffered"],
            "overlap": ["intersect", "buffered", "local"],
            "pct": ["get_area_percent", "overlap", "buffer_area"],
            "back": ["project_global", "buffered"],
        }))
        .unwrap();

        for executor in [executor(), sequential()] {
            let outputs = executor
                .run(&graph, &["area", "pct", "back", "ring"])
                .unwrap();
            assert_eq!(outputs.len(), 4);

            let area = outputs["area"].as_f64().unwrap();
            assert!(area > 90.0 && area < 110.0, "{area}");

            // The AOI covers a fraction of its own 1 km buffer
            let pct = outputs["pct"].as_f64().unwrap();
            assert!(pct > 5.0 && pct < 20.0, "{pct}");

            assert_eq!(outputs["back"]["type"], json!("FeatureCollection"));
            assert_eq!(outputs["back"]["crs"]["properties"]["name"], json!("global"));
            assert_eq!(outputs["ring"]["features"].as_array().unwrap().len(), 1);
        }
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let graph = Graph::from_value(json!({
            "aoi": ["geojson", aoi_doc()],
            "local": ["project_local", "aoi", "laea"],
            "a1": ["buffer_to_dist", "local", 1],
            "a2": ["buffer_to_dist", "local", 2],
            "a3": ["buffer_to_dist", "local", 3],
            "s1": ["get_area", "a1"],
            "s2": ["get_area", "a2"],
            "s3": ["get_area", "a3"],
        }))
        .unwrap();
        let outputs = ["s1", "s2", "s3"];
        assert_eq!(
            executor().run(&graph, &outputs).unwrap(),
            sequential().run(&graph, &outputs).unwrap()
        );
    }

    #[test]
    fn test_shared_dependency_is_evaluated_once() {
        let source = Arc::new(FakeSource::default());
        let context = Context::new(Config {
            fetch_cache_capacity: 0,
            ..Config::default()
        })
        .with_source(source.clone());

        let graph = Graph::from_value(json!({
            "aoi": ["geojson", aoi_doc()],
            "layer": ["esri:server", "https://example.org/FeatureServer/0", "aoi"],
            "x": ["dissolve", "layer"],
            "y": ["dissolve", "layer", "id"],
            "z": ["intersect", "x", "y"],
        }))
        .unwrap();

        Executor::new(context).run(&graph, &["x", "y", "z"]).unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remote_results_cached_across_requests() {
        let source = Arc::new(FakeSource::default());
        let executor = Executor::new(Context::new(Config::default()).with_source(source.clone()));
        let graph = Graph::from_value(json!({
            "aoi": ["geojson", aoi_doc()],
            "layer": ["cartodb", "https://example.carto.com/api/v2/sql", "wdpa", "aoi", null, "iucn = 'II'"],
            "histogram": ["esri:imageserver", "https://example.org/ImageServer", "aoi"],
        }))
        .unwrap();

        for _ in 0..3 {
            let outputs = executor.run(&graph, &["layer", "histogram"]).unwrap();
            assert_eq!(outputs["histogram"], json!([3.0, 1.0, 4.0]));
            assert_eq!(outputs["layer"]["features"].as_array().unwrap().len(), 1);
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    /// Never hits, records every key stored
    #[derive(Default)]
    struct RecordingCache {
        keys: std::sync::Mutex<Vec<String>>,
    }

    impl Cache for RecordingCache {
        fn get(&self, _key: &str) -> Option<Value> {
            None
        }

        fn put(&self, key: String, _value: Value) {
            self.keys.lock().unwrap().push(key);
        }
    }

    #[test]
    fn test_injected_cache_is_used_per_adapter() {
        let source = Arc::new(FakeSource::default());
        let cache = Arc::new(RecordingCache::default());
        let executor = Executor::new(
            Context::new(Config::default())
                .with_source(source.clone())
                .with_cache(ServiceKind::EsriImageServer, cache.clone()),
        );
        let graph = Graph::from_value(json!({
            "aoi": ["geojson", aoi_doc()],
            "layer": ["esri:server", "https://example.org/FeatureServer/0", "aoi"],
            "histogram": ["esri:imageserver", "https://example.org/ImageServer", "aoi"],
        }))
        .unwrap();

        for _ in 0..2 {
            executor.run(&graph, &["layer", "histogram"]).unwrap();
        }
        // The feature layer stays in the default LRU, the histogram never hits
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.keys.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_remote_without_source_is_fetch_error() {
        let graph = Graph::from_value(json!({
            "aoi": ["geojson", aoi_doc()],
            "layer": ["esri:server", "https://example.org/FeatureServer/0", "aoi"],
        }))
        .unwrap();
        let err = executor().run(&graph, &["layer"]).unwrap_err();
        assert!(matches!(err.root(), Error::RemoteFetch(_)));
    }

    #[test]
    fn test_remote_failure_aborts_request() {
        let source = Arc::new(FakeSource::default());
        source.failures.store(1, Ordering::SeqCst);
        let executor = Executor::new(Context::new(Config::default()).with_source(source));
        let graph = Graph::from_value(json!({
            "aoi": ["geojson", aoi_doc()],
            "layer": ["esri:server", "https://example.org/FeatureServer/0", "aoi"],
            "d": ["dissolve", "layer"],
        }))
        .unwrap();

        let err = executor.run(&graph, &["aoi", "d"]).unwrap_err();
        match err {
            Error::Node { node, source, .. } => {
                assert_eq!(node, "layer");
                assert!(matches!(*source, Error::RemoteFetch(_)));
            }
            other => panic!("expected a node error, got {other:?}"),
        }
    }

    #[test]
    fn test_literal_arguments_and_explicit_refs() {
        let graph = Graph::from_value(json!({
            "aoi": ["geojson", aoi_doc().to_string()],
            "local": ["project_local", {"$ref": "aoi"}, null],
            "pct": ["get_area_percent", "local", 50.0],
            "grouped": ["get_area_percent", "local", {"0": 100.0}, "id"],
        }))
        .unwrap();
        let outputs = executor().run(&graph, &["pct", "grouped"]).unwrap();
        let pct = outputs["pct"].as_f64().unwrap();
        assert!(pct > 180.0 && pct < 220.0, "{pct}");
        let grouped = outputs["grouped"]["0"].as_f64().unwrap();
        assert!(grouped > 90.0 && grouped < 110.0, "{grouped}");
    }

    #[test]
    fn test_argument_kind_errors() {
        let graph = Graph::from_value(json!({
            "aoi": ["geojson", aoi_doc()],
            "local": ["project_local", "aoi"],
            "area": ["get_area", "local"],
            "bad": ["dissolve", "area"],
            "bad_projection": ["project_local", "aoi", "mercator"],
        }))
        .unwrap();

        let err = executor().run(&graph, &["bad"]).unwrap_err();
        assert!(matches!(
            err.root(),
            Error::InvalidArgument { operation: "dissolve", index: 0, .. }
        ));

        let err = executor().run(&graph, &["bad_projection"]).unwrap_err();
        assert!(matches!(err.root(), Error::InvalidArgument { index: 1, .. }));
    }

    #[test]
    fn test_only_requested_ancestors_run() {
        // "broken" would fail, but nothing requested depends on it
        let graph = Graph::from_value(json!({
            "aoi": ["geojson", aoi_doc()],
            "broken": ["buffer_to_dist", "aoi", 5],
            "d": ["dissolve", "aoi"],
        }))
        .unwrap();
        let outputs = executor().run(&graph, &["d"]).unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(executor().run(&graph, &["broken"]).is_err());
    }

    #[test]
    fn test_validation_errors_surface_before_evaluation() {
        assert!(matches!(
            Graph::from_str(r#"{"x": ["drop_table"]}"#),
            Err(Error::UnknownOperation(_))
        ));
        assert!(matches!(
            Graph::from_str(r#"{"a": ["dissolve", "b"], "b": ["dissolve", "a"]}"#),
            Err(Error::CyclicGraph(_))
        ));
    }
}
