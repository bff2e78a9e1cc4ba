use super::Operation;
use crate::{Error, Result};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// Key of the explicit reference form `{"$ref": "node"}`
pub const REF_KEY: &str = "$ref";

/// A bound node argument
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Literal(JsonValue),
    /// Output of another node
    Ref(String),
}

/// One validated graph node
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub name: String,
    pub operation: Operation,
    pub args: Vec<Arg>,
}

impl Node {
    /// Names of the nodes this one reads from (in argument order, may repeat)
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(|arg| match arg {
            Arg::Ref(name) => Some(name.as_str()),
            Arg::Literal(_) => None,
        })
    }
}

/// A validated, acyclic operation graph
///
/// Built from a JSON object mapping node names to `[operation, args...]`. An argument is
/// a reference when it is `{"$ref": name}` or a string equal to a node name; a string
/// that matches a node name is never read as a literal.
#[derive(Clone, Debug)]
pub struct Graph {
    nodes: BTreeMap<String, Node>,
    /// Every node, dependencies first
    order: Vec<String>,
}

impl FromStr for Graph {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(input)
            .map_err(|e| Error::InvalidGraph(format!("not valid JSON: {e}")))?;
        Graph::from_value(value)
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Graph {
    /// Parse and validate a graph description
    ///
    /// Checks, in order: node shapes, the operation whitelist, arities, reference
    /// binding and acyclicity. Nothing is evaluated.
    pub fn from_value(value: JsonValue) -> Result<Self> {
        let object = match value {
            JsonValue::Object(object) => object,
            _ => {
                return Err(Error::InvalidGraph(
                    "graph must be an object mapping node names to operations".to_string(),
                ));
            }
        };

        // Shape and whitelist first, so no binding work happens for rejected graphs
        let mut raw: Vec<(String, Operation, Vec<JsonValue>)> = Vec::with_capacity(object.len());
        for (name, descriptor) in object {
            let (operation, args) = parse_descriptor(&name, descriptor)?;
            raw.push((name, operation, args));
        }

        let names: BTreeSet<String> = raw.iter().map(|(name, _, _)| name.clone()).collect();
        let mut nodes = BTreeMap::new();
        for (name, operation, args) in raw {
            let args = bind_args(operation, args, &names)?;
            nodes.insert(
                name.clone(),
                Node {
                    name,
                    operation,
                    args,
                },
            );
        }

        let order = topological_order(&nodes)?;
        tracing::debug!("Validated graph with {} nodes", nodes.len());
        Ok(Self { nodes, order })
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node names, dependencies before dependants (ties broken by name)
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Evaluation waves for the requested outputs
    ///
    /// Only the outputs and their ancestors are scheduled. Every node of a wave depends
    /// only on nodes of earlier waves; within a wave nodes keep topological order.
    pub fn waves(&self, outputs: &[&str]) -> Result<Vec<Vec<&Node>>> {
        let mut needed: BTreeSet<&str> = BTreeSet::new();
        let mut stack: Vec<&str> = Vec::new();
        for output in outputs {
            if !self.nodes.contains_key(*output) {
                return Err(Error::UnresolvedReference(output.to_string()));
            }
            stack.push(*output);
        }
        while let Some(name) = stack.pop() {
            if !needed.insert(name) {
                continue;
            }
            if let Some(node) = self.nodes.get(name) {
                stack.extend(node.dependencies());
            }
        }

        let mut level: BTreeMap<&str, usize> = BTreeMap::new();
        let mut waves: Vec<Vec<&Node>> = Vec::new();
        for name in &self.order {
            if !needed.contains(name.as_str()) {
                continue;
            }
            let Some(node) = self.nodes.get(name) else {
                continue;
            };
            let depth = node
                .dependencies()
                .filter_map(|dep| level.get(dep))
                .map(|depth| depth + 1)
                .max()
                .unwrap_or(0);
            level.insert(name.as_str(), depth);
            if waves.len() <= depth {
                waves.resize_with(depth + 1, Vec::new);
            }
            waves[depth].push(node);
        }
        Ok(waves)
    }
}

fn parse_descriptor(name: &str, descriptor: JsonValue) -> Result<(Operation, Vec<JsonValue>)> {
    let mut items = match descriptor {
        JsonValue::Array(items) if !items.is_empty() => items.into_iter(),
        JsonValue::Array(_) => {
            return Err(Error::InvalidGraph(format!("node '{name}' is an empty list")));
        }
        _ => {
            return Err(Error::InvalidGraph(format!(
                "node '{name}' must be a list [operation, args...]"
            )));
        }
    };

    let operation = match items.next() {
        Some(JsonValue::String(op)) => {
            Operation::from_name(&op).ok_or(Error::UnknownOperation(op))?
        }
        _ => {
            return Err(Error::InvalidGraph(format!(
                "node '{name}' does not start with an operation name"
            )));
        }
    };

    let args: Vec<JsonValue> = items.collect();
    let (min, max) = operation.arity();
    if args.len() < min || args.len() > max {
        return Err(Error::Arity {
            operation: operation.name(),
            expected: if min == max {
                min.to_string()
            } else {
                format!("{min} to {max}")
            },
            found: args.len(),
        });
    }
    Ok((operation, args))
}

fn bind_args(operation: Operation, args: Vec<JsonValue>, names: &BTreeSet<String>) -> Result<Vec<Arg>> {
    args.into_iter()
        .enumerate()
        .map(|(index, arg)| {
            if let Some(target) = explicit_ref(&arg)? {
                return if names.contains(target) {
                    Ok(Arg::Ref(target.to_string()))
                } else {
                    Err(Error::UnresolvedReference(target.to_string()))
                };
            }
            match arg {
                JsonValue::String(text) if names.contains(&text) => Ok(Arg::Ref(text)),
                // A bare string in a collection slot can only be meant as a node name
                JsonValue::String(text) if operation.collection_slots().contains(&index) => {
                    Err(Error::UnresolvedReference(text))
                }
                other => Ok(Arg::Literal(other)),
            }
        })
        .collect()
}

/// The target of `{"$ref": name}`, if the argument has that form
fn explicit_ref(arg: &JsonValue) -> Result<Option<&str>> {
    let Some(object) = arg.as_object().filter(|object| object.contains_key(REF_KEY)) else {
        return Ok(None);
    };
    match single_ref(object) {
        Some(target) => Ok(Some(target)),
        None => Err(Error::InvalidGraph(format!(
            "a reference must be exactly {{\"{REF_KEY}\": \"node\"}}, got {arg}"
        ))),
    }
}

fn single_ref(object: &Map<String, JsonValue>) -> Option<&str> {
    if object.len() != 1 {
        return None;
    }
    object.get(REF_KEY)?.as_str()
}

/// Kahn's algorithm with a name-ordered ready set
fn topological_order(nodes: &BTreeMap<String, Node>) -> Result<Vec<String>> {
    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependants: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, node) in nodes {
        let deps: BTreeSet<&str> = node.dependencies().collect();
        pending.insert(name.as_str(), deps.len());
        for dep in deps {
            dependants.entry(dep).or_default().push(name.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(name) = ready.pop_first() {
        order.push(name.to_string());
        for &dependant in dependants.get(name).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependant) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependant);
                }
            }
        }
    }

    if order.len() < nodes.len() {
        let emitted: BTreeSet<&str> = order.iter().map(String::as_str).collect();
        let stuck = pending
            .keys()
            .find(|name| !emitted.contains(**name))
            .map(|name| name.to_string())
            .unwrap_or_default();
        return Err(Error::CyclicGraph(stuck));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::square_geojson;
    use serde_json::json;

    #[test]
    fn test_rejects_unknown_operation() {
        let err = Graph::from_str(r#"{"x": ["drop_table"]}"#).unwrap_err();
        match err {
            Error::UnknownOperation(name) => assert_eq!(name, "drop_table"),
            other => panic!("expected UnknownOperation, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_cycles() {
        let err = Graph::from_str(r#"{"a": ["dissolve", "b"], "b": ["dissolve", "a"]}"#).unwrap_err();
        assert!(matches!(err, Error::CyclicGraph(_)));

        let err = Graph::from_str(r#"{"a": ["dissolve", "a"]}"#).unwrap_err();
        assert!(matches!(err, Error::CyclicGraph(name) if name == "a"));
    }

    #[test]
    fn test_rejects_malformed_nodes() {
        for input in [
            r#"[1, 2]"#,
            r#"{"a": []}"#,
            r#"{"a": "dissolve"}"#,
            r#"{"a": [3, "b"]}"#,
            r#"{"a": ["dissolve"#,
        ] {
            assert!(
                matches!(Graph::from_str(input), Err(Error::InvalidGraph(_))),
                "{input}"
            );
        }
    }

    #[test]
    fn test_arity_is_checked_at_validation() {
        let err = Graph::from_value(json!({"a": ["intersect", {"features": []}]})).unwrap_err();
        assert!(matches!(
            err,
            Error::Arity {
                operation: "intersect",
                found: 1,
                ..
            }
        ));

        let err = Graph::from_value(json!({"a": ["project_global"]})).unwrap_err();
        assert!(matches!(err, Error::Arity { found: 0, .. }));
    }

    #[test]
    fn test_binding_references_and_literals() {
        let graph = Graph::from_value(json!({
            "aoi": ["geojson", square_geojson(0.0, 0.0, 1.0)],
            "by_name": ["dissolve", "aoi", "name"],
            "explicit": ["dissolve", {"$ref": "aoi"}],
        }))
        .unwrap();

        let by_name = graph.node("by_name").unwrap();
        assert_eq!(by_name.args[0], Arg::Ref("aoi".to_string()));
        assert_eq!(by_name.args[1], Arg::Literal(json!("name")));
        assert_eq!(graph.node("explicit").unwrap().args[0], Arg::Ref("aoi".to_string()));
    }

    #[test]
    fn test_string_equal_to_node_name_is_a_reference() {
        // The field name collides with a node name: the reference wins
        let graph = Graph::from_value(json!({
            "name": ["geojson", square_geojson(0.0, 0.0, 1.0)],
            "d": ["dissolve", "name", "name"],
        }))
        .unwrap();
        assert_eq!(graph.node("d").unwrap().args[1], Arg::Ref("name".to_string()));
    }

    #[test]
    fn test_unresolved_references() {
        let err = Graph::from_value(json!({"a": ["dissolve", "missing"]})).unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference(name) if name == "missing"));

        let err = Graph::from_value(json!({"a": ["dissolve", {"$ref": "missing"}]})).unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference(_)));

        let err = Graph::from_value(json!({"a": ["dissolve", {"$ref": "x", "other": 1}]})).unwrap_err();
        assert!(matches!(err, Error::InvalidGraph(_)));
    }

    #[test]
    fn test_topological_order_is_deterministic() {
        let graph = Graph::from_value(json!({
            "z": ["geojson", square_geojson(0.0, 0.0, 1.0)],
            "a": ["dissolve", "z"],
            "m": ["intersect", "a", "z"],
            "b": ["geojson", square_geojson(0.0, 0.0, 1.0)],
        }))
        .unwrap();
        assert_eq!(graph.topological_order(), ["b", "z", "a", "m"]);
    }

    #[test]
    fn test_waves_prune_unrequested_nodes() {
        let graph = Graph::from_value(json!({
            "src": ["geojson", square_geojson(0.0, 0.0, 1.0)],
            "other": ["geojson", square_geojson(5.0, 5.0, 1.0)],
            "left": ["dissolve", "src"],
            "right": ["dissolve", "src", "id"],
            "both": ["intersect", "left", "right"],
        }))
        .unwrap();

        let names = |waves: Vec<Vec<&Node>>| -> Vec<Vec<String>> {
            waves
                .into_iter()
                .map(|wave| wave.into_iter().map(|node| node.name.clone()).collect())
                .collect()
        };

        assert_eq!(
            names(graph.waves(&["both"]).unwrap()),
            vec![vec!["src"], vec!["left", "right"], vec!["both"]]
        );
        assert_eq!(names(graph.waves(&["src"]).unwrap()), vec![vec!["src"]]);
        assert!(graph.waves(&[]).unwrap().is_empty());
        assert!(matches!(
            graph.waves(&["nope"]),
            Err(Error::UnresolvedReference(_))
        ));
    }
}
