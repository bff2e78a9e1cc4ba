//! Declarative operation graphs
//!
//! A graph is a JSON object mapping node names to `[operation, args...]`:
//!
//! ```json
//! {
//!     "aoi": ["geojson", {"type": "FeatureCollection", "features": [...]}],
//!     "local": ["project_local", "aoi"],
//!     "buffer": ["buffer_to_dist", "local", 10],
//!     "area": ["get_area", "buffer"]
//! }
//! ```
//!
//! [`Graph`] validates the description (operation whitelist, arity, references, cycles)
//! without evaluating anything; [`Executor`] then evaluates the requested outputs.

mod executor;
mod operation;
mod parse;

pub use executor::{Context, Executor};
pub use operation::Operation;
pub use parse::{Arg, Graph, Node, REF_KEY};
