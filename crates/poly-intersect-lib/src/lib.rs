//! Poly Intersect Library - Spatial Overlap Statistics Engine
//!
//! This library computes overlap statistics between a user supplied area of interest (AOI)
//! and reference polygon layers. A small set of composable primitives (dissolve, intersect,
//! erase, buffer, area statistics) can be chained by hand or described as data and handed to
//! the graph executor, which validates, orders and evaluates the computation.
//!
//! # Architecture
//!
//! - **[`FeatureCollection`]**: Ordered areal features with an optional CRS tag
//! - **[`wire`]**: GeoJSON wire format adapter
//! - **[`Quadtree`]**: Bounding-box index used by the overlay operations
//! - **[`projection`]**: Local metric projections centred on the data
//! - **[`ops`]**: Core operations and area statistics
//! - **[`graph`]**: Declarative operation graphs and their executor
//! - **[`remote`]**: Remote data-source contract and the per-adapter fetch cache
//! - **[`analysis`]**: Canned overlap analyses built on top of the graph executor
//!
//! # Example
//!
//! ```ignore
//! use poly_intersect_lib::{Config, Context, Executor, Graph};
//! use std::str::FromStr;
//!
//! let graph = Graph::from_str(r#"{
//!     "aoi": ["geojson", {"type": "FeatureCollection", "features": []}],
//!     "dissolved": ["dissolve", "aoi"]
//! }"#)?;
//! let executor = Executor::new(Context::new(Config::default()));
//! let outputs = executor.run(&graph, &["dissolved"])?;
//! ```

pub mod analysis;
mod config;
mod feature;
pub mod graph;
pub mod ops;
pub mod projection;
mod quadtree;
pub mod remote;
mod value;
pub mod wire;

#[cfg(test)]
mod fixtures;

// Public API exports
pub use config::Config;
pub use feature::{Areal, Crs, Feature, FeatureCollection, ProjectionKind};
pub use graph::{Context, Executor, Graph, Operation};
pub use quadtree::Quadtree;
pub use value::{Statistic, Value};

/// Error types for the overlap engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Format error: {0}")]
    Format(String),

    #[error("Collection is already in a local projection")]
    AlreadyProjected,

    #[error("Collection carries no local CRS to project back from")]
    MissingCrs,

    #[error("Collection is already in global WGS84 coordinates")]
    AlreadyGlobal,

    #[error("{operation} requires a locally projected collection")]
    ProjectionRequired { operation: &'static str },

    #[error("{operation} received collections in different coordinate systems")]
    CrsMismatch { operation: &'static str },

    #[error("{operation} requires a non-empty collection")]
    EmptyInput { operation: &'static str },

    #[error("Area of {count} undissolved features is ambiguous without a grouping field")]
    AmbiguousAggregation { count: usize },

    #[error("Category cardinality error on '{field}': {reason}")]
    CategoryCardinality { field: String, reason: String },

    #[error("Unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("Graph contains a cycle through node '{0}'")]
    CyclicGraph(String),

    #[error("Unresolved reference to node '{0}'")]
    UnresolvedReference(String),

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Operation '{operation}' expects {expected} arguments, got {found}")]
    Arity {
        operation: &'static str,
        expected: String,
        found: usize,
    },

    #[error("Invalid argument {index} for '{operation}': {reason}")]
    InvalidArgument {
        operation: &'static str,
        index: usize,
        reason: String,
    },

    #[error("Remote fetch failed: {0}")]
    RemoteFetch(String),

    #[error("Node '{node}' ({operation}) failed: {source}")]
    Node {
        node: String,
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The originating error, with any node wrapping removed
    pub fn root(&self) -> &Error {
        match self {
            Error::Node { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that all public types are accessible
        let _: fn(Context) -> Executor = Executor::new;
        let _: fn() -> Config = Config::default;
    }

    #[test]
    fn test_root_unwraps_node_errors() {
        let err = Error::Node {
            node: "outer".to_string(),
            operation: "dissolve",
            source: Box::new(Error::Node {
                node: "inner".to_string(),
                operation: "buffer_to_dist",
                source: Box::new(Error::ProjectionRequired {
                    operation: "buffer_to_dist",
                }),
            }),
        };
        assert!(matches!(err.root(), Error::ProjectionRequired { .. }));
        assert!(err.to_string().contains("outer"));
    }
}
